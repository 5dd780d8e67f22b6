// src/rewrite.rs

//! Two-pass textual rewrite: placeholder probes first, real IDs later.

use crate::error::{Error, Result, Stage};
use crate::model::{InsertPosition, TrackIdxInterval};
use crate::syntax::GoSource;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};

pub const PLACEHOLDER_ALIAS: &str = "canaryTrackPlaceholder";
pub const PLACEHOLDER_ID: &str = "CANARY_TRACK_PLACEHOLDER_ID";
pub const PLACEHOLDER_IMPORT: &str = "canary-track.invalid/placeholder";

/// Lines taken by one placeholder block
const BLOCK_LINES: usize = 1;

pub fn placeholder_statement() -> String {
    format!("{PLACEHOLDER_ALIAS}.Track({PLACEHOLDER_ALIAS}.{PLACEHOLDER_ID})")
}

fn placeholder_import() -> String {
    format!("import {PLACEHOLDER_ALIAS} \"{PLACEHOLDER_IMPORT}\"")
}

/// Name of the generated constant for a track ID
pub fn track_const(id: u32) -> String {
    format!("ID{id}")
}

/// Inserts a placeholder probe at every position, plus the placeholder import.
///
/// Line insertions are applied first in ascending order, each shifted by the
/// blocks already inserted above it. Splices then re-derive their line from
/// the same deltas and are applied right-to-left within a line.
pub fn insert_placeholders(source: &GoSource, positions: &[InsertPosition]) -> String {
    if positions.is_empty() {
        return source.text.clone();
    }
    let mut lines: Vec<String> = source.text.split('\n').map(str::to_string).collect();

    let mut line_inserts: Vec<u32> = positions
        .iter()
        .filter(|p| !p.is_splice())
        .map(|p| p.line)
        .collect();
    line_inserts.sort_unstable();
    line_inserts.dedup();

    let statement = placeholder_statement();
    for (shift, line) in line_inserts.iter().enumerate() {
        let idx = (*line as usize - 1) + shift * BLOCK_LINES;
        let indent = indent_at(&lines, idx);
        lines.insert(idx.min(lines.len()), format!("{indent}{statement}"));
    }

    let mut splices: Vec<InsertPosition> = positions.iter().filter(|p| p.is_splice()).copied().collect();
    splices.sort_by(|a, b| a.line.cmp(&b.line).then(b.column.cmp(&a.column)));
    for pos in splices {
        let above = line_inserts.partition_point(|l| *l <= pos.line);
        let idx = (pos.line as usize - 1) + above * BLOCK_LINES;
        if let Some(text) = lines.get_mut(idx) {
            let column = (pos.column as usize).min(text.len());
            text.insert_str(column, &format!(" {statement};"));
        }
    }

    let import_at = source.package_line().unwrap_or(0) as usize;
    lines.insert(import_at.min(lines.len()), placeholder_import());
    lines.join("\n")
}

/// Indentation of the statement starting at `idx`. Labels sit at their own
/// (usually outdented) column, so a label-only line defers to the line after it.
fn indent_at(lines: &[String], idx: usize) -> String {
    lines
        .iter()
        .skip(idx)
        .find(|line| !is_label_line(line))
        .or_else(|| lines.get(idx))
        .map(|line| line[..line.len() - line.trim_start().len()].to_string())
        .unwrap_or_default()
}

fn is_label_line(line: &str) -> bool {
    let code = match line.find("//") {
        Some(at) => &line[..at],
        None => line,
    };
    code.trim()
        .strip_suffix(':')
        .is_some_and(|name| {
            let mut chars = name.chars();
            matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
                && chars.all(|c| c == '_' || c.is_alphanumeric())
        })
}

/// Re-parses rewritten text and, when configured, pipes it through gofmt.
pub fn reformat(path: &str, text: String, gofmt: Option<&Path>) -> Result<String> {
    let source = GoSource::parse(path, text, Stage::Placeholder)?;
    match gofmt {
        Some(binary) => run_gofmt(path, binary, &source.text),
        None => Ok(source.text),
    }
}

fn run_gofmt(path: &str, binary: &Path, text: &str) -> Result<String> {
    let format_error = |message: String| Error::Format {
        path: path.to_string(),
        message,
    };
    let mut child = Command::new(binary)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format_error(e.to_string()))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(text.as_bytes())
            .map_err(|e| format_error(e.to_string()))?;
    }
    let output = child
        .wait_with_output()
        .map_err(|e| format_error(e.to_string()))?;
    if !output.status.success() {
        return Err(format_error(String::from_utf8_lossy(&output.stderr).trim().to_string()));
    }
    String::from_utf8(output.stdout).map_err(|e| format_error(e.to_string()))
}

/// Replaces placeholders with sequential IDs starting at `*next_id`, and
/// the placeholder import with the generated package.
pub fn assign_ids(
    path: &str,
    text: &str,
    next_id: &mut u32,
    alias: &str,
    import_path: &str,
) -> Result<(String, TrackIdxInterval)> {
    let start = *next_id;
    let statement = placeholder_statement();
    let mut parts = text.split(statement.as_str());
    let mut out = String::with_capacity(text.len());
    out.push_str(parts.next().unwrap_or_default());
    for part in parts {
        out.push_str(&format!("{alias}.Track({alias}.{})", track_const(*next_id)));
        *next_id += 1;
        out.push_str(part);
    }
    if *next_id == start {
        return Ok((text.to_string(), TrackIdxInterval::empty_at(start)));
    }
    let out = out.replacen(&placeholder_import(), &format!("import {alias} \"{import_path}\""), 1);
    let source = GoSource::parse(path, out, Stage::Assign)?;
    Ok((
        source.text,
        TrackIdxInterval {
            start,
            end: *next_id - 1,
        },
    ))
}
