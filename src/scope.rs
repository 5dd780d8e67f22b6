// src/scope.rs

//! Scope indexes derived from a parsed file: flat function boundaries
//! (`BlockScopes`) and per-function gap-filled control-flow trees
//! (`TrackScope`).

use crate::syntax::{self, Body, GoSource};
use tree_sitter::Node;

/// A function/closure (or whole-file) boundary, exclusive of both edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockScope {
    pub start_line: u32,
    pub end_line: u32,
}

impl BlockScope {
    pub fn new(start_line: u32, end_line: u32) -> Self {
        Self { start_line, end_line }
    }

    /// Whole-file scope: every line of a file with `line_count` lines
    pub fn file(line_count: u32) -> Self {
        Self::new(0, line_count + 1)
    }

    pub fn is_file(&self) -> bool {
        self.start_line == 0
    }

    /// True only strictly inside the boundary lines
    pub fn contains(&self, line: u32) -> bool {
        line > self.start_line && line < self.end_line
    }

    /// Line insertions must land strictly inside; splices may sit on the brace lines.
    pub fn contains_position(&self, pos: crate::model::InsertPosition) -> bool {
        if pos.is_splice() {
            pos.line >= self.start_line && pos.line <= self.end_line
        } else {
            self.contains(pos.line)
        }
    }
}

/// Block scopes sorted by start line, larger ranges first on equal starts.
#[derive(Debug, Clone, Default)]
pub struct BlockScopes(Vec<BlockScope>);

impl BlockScopes {
    pub fn new(mut scopes: Vec<BlockScope>) -> Self {
        scopes.sort_by(|a, b| a.start_line.cmp(&b.start_line).then(b.end_line.cmp(&a.end_line)));
        Self(scopes)
    }

    /// Innermost scope strictly containing `line`. The last match of the
    /// linear scan wins, so equal-start ties resolve to the smaller range.
    pub fn search(&self, line: u32) -> Option<&BlockScope> {
        self.0.iter().filter(|s| s.contains(line)).last()
    }

    pub fn search_position(&self, pos: crate::model::InsertPosition) -> Option<&BlockScope> {
        self.0.iter().filter(|s| s.contains_position(pos)).last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BlockScope> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Node of a function's control-flow tree.
///
/// A scope owns the lines strictly between `start_line` and `end_line`.
/// When a scope has children they partition exactly the lines it owns;
/// `filler` children have no construct behind them and close the gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackScope {
    pub start_line: u32,
    pub end_line: u32,
    pub filler: bool,
    pub children: Vec<TrackScope>,
}

impl TrackScope {
    /// Builds a scope, or `None` when it owns no line.
    pub fn new(start_line: u32, end_line: u32, children: Vec<TrackScope>) -> Option<Self> {
        if end_line <= start_line + 1 {
            return None;
        }
        Some(Self {
            start_line,
            end_line,
            filler: false,
            children: fill_gaps(start_line, end_line, children),
        })
    }

    fn filler(first: u32, last: u32) -> Self {
        Self {
            start_line: first - 1,
            end_line: last + 1,
            filler: true,
            children: Vec::new(),
        }
    }

    /// Root scope of one function body, `None` for bodies without interior lines.
    pub fn for_body(body: &Body<'_>) -> Option<Self> {
        Self::new(body.open_line, body.close_line, collect_children(&body.statements))
    }

    pub fn key(&self) -> (u32, u32) {
        (self.start_line, self.end_line)
    }

    pub fn first_line(&self) -> u32 {
        self.start_line + 1
    }

    pub fn last_line(&self) -> u32 {
        self.end_line - 1
    }

    pub fn owns(&self, line: u32) -> bool {
        line > self.start_line && line < self.end_line
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// The leaf scope owning `line`.
    pub fn innermost(&self, line: u32) -> Option<&TrackScope> {
        if !self.owns(line) {
            return None;
        }
        match self.children.iter().find(|c| c.owns(line)) {
            Some(child) => child.innermost(line),
            None => Some(self),
        }
    }

    /// Checks that children, recursively, cover the owned lines without gaps or overlaps.
    pub fn is_partitioned(&self) -> bool {
        if self.children.is_empty() {
            return true;
        }
        let mut next = self.first_line();
        for child in &self.children {
            if child.first_line() != next || child.last_line() < child.first_line() {
                return false;
            }
            if !child.is_partitioned() {
                return false;
            }
            next = child.last_line() + 1;
        }
        next == self.end_line
    }
}

fn fill_gaps(start_line: u32, end_line: u32, mut real: Vec<TrackScope>) -> Vec<TrackScope> {
    if real.is_empty() {
        return real;
    }
    real.sort_by_key(|c| c.start_line);
    let mut children = Vec::with_capacity(real.len() * 2 + 1);
    let mut next = start_line + 1;
    for child in real {
        // siblings that reach back into already covered lines are not kept
        if child.first_line() < next || child.last_line() >= end_line {
            continue;
        }
        if child.first_line() > next {
            children.push(TrackScope::filler(next, child.first_line() - 1));
        }
        next = child.last_line() + 1;
        children.push(child);
    }
    if next < end_line {
        children.push(TrackScope::filler(next, end_line - 1));
    }
    children
}

fn collect_children(statements: &[Node<'_>]) -> Vec<TrackScope> {
    let mut out = Vec::new();
    for stmt in statements {
        collect_statement(*stmt, &mut out);
    }
    out
}

fn collect_statement(stmt: Node<'_>, out: &mut Vec<TrackScope>) {
    match stmt.kind() {
        "if_statement" => collect_if(stmt, out),
        "for_statement" => {
            if let Some(scope) = stmt.child_by_field_name("body").and_then(block_scope) {
                out.push(scope);
            }
        }
        "block" => out.extend(block_scope(stmt)),
        "labeled_statement" => {
            if let Some(inner) = syntax::labeled_inner(stmt) {
                collect_statement(inner, out);
            }
        }
        kind if syntax::SWITCH_KINDS.contains(&kind) => {
            let Some((open, close)) = syntax::braces(stmt) else { return };
            let clauses = syntax::clause_bodies(stmt)
                .into_iter()
                .filter_map(|(_, body)| {
                    TrackScope::new(body.open_line, body.close_line, collect_children(&body.statements))
                })
                .collect();
            out.extend(TrackScope::new(open, close, clauses));
        }
        _ => {}
    }
}

fn collect_if(stmt: Node<'_>, out: &mut Vec<TrackScope>) {
    if let Some(scope) = stmt.child_by_field_name("consequence").and_then(block_scope) {
        out.push(scope);
    }
    if let Some(alt) = stmt.child_by_field_name("alternative") {
        match alt.kind() {
            "if_statement" => collect_if(alt, out),
            "block" => out.extend(block_scope(alt)),
            _ => {}
        }
    }
}

fn block_scope(block: Node<'_>) -> Option<TrackScope> {
    let body = Body::of_block(block)?;
    TrackScope::new(body.open_line, body.close_line, collect_children(&body.statements))
}

/// Both scope indexes of one file.
///
/// `tracks[i]` is the tree of the i-th function body in source order
/// (`None` when that body has no interior lines).
#[derive(Debug, Clone)]
pub struct ScopeIndex {
    pub blocks: BlockScopes,
    pub tracks: Vec<Option<TrackScope>>,
}

pub fn analyze(source: &GoSource) -> ScopeIndex {
    let bodies = syntax::function_bodies(source.root());
    let mut blocks = Vec::with_capacity(bodies.len() + 1);
    blocks.push(BlockScope::file(source.line_count()));
    let mut tracks = Vec::with_capacity(bodies.len());
    for body in &bodies {
        blocks.push(BlockScope::new(body.open_line, body.close_line));
        tracks.push(TrackScope::for_body(body));
    }
    ScopeIndex {
        blocks: BlockScopes::new(blocks),
        tracks,
    }
}
