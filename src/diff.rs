// src/diff.rs

//! Turns a pair of revisions into per-file line-level change ranges.

use crate::config::{FileFilter, CONFIG_FILE};
use crate::error::{Error, Result, Stage};
use crate::model::{DiffStrategy, FileChange, LineChanges};
use crate::pool::WorkerPool;
use chrono::{DateTime, TimeZone, Utc};
use git2::{
    BlameOptions, Delta, DiffOptions, ObjectType, Oid, Repository, StatusOptions, TreeWalkMode,
    TreeWalkResult,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A resolved commit and its committer timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revision {
    pub oid: Oid,
    pub time: DateTime<Utc>,
}

/// Attributes changed lines of one file between two revisions.
pub trait ChangeStrategy: Sync {
    fn line_changes(&self, repo: &Repository, path: &str) -> Result<LineChanges>;
}

/// A line is new when the commit that last touched it at the target is not
/// the base commit and was committed strictly after it.
pub struct BlameStrategy {
    pub base: Revision,
    pub target: Revision,
}

impl ChangeStrategy for BlameStrategy {
    fn line_changes(&self, repo: &Repository, path: &str) -> Result<LineChanges> {
        let mut opts = BlameOptions::new();
        opts.newest_commit(self.target.oid);
        let blame = repo
            .blame_file(Path::new(path), Some(&mut opts))
            .map_err(|e| Error::git(Stage::Diff, path, e))?;

        let mut is_new: HashMap<Oid, bool> = HashMap::new();
        let mut changes = LineChanges::new();
        for hunk in blame.iter() {
            let oid = hunk.final_commit_id();
            let new = match is_new.get(&oid) {
                Some(new) => *new,
                None => {
                    let new = oid != self.base.oid && commit_time(repo, oid, path)? > self.base.time;
                    is_new.insert(oid, new);
                    new
                }
            };
            if new {
                changes.push(hunk.final_start_line() as u32, hunk.lines_in_hunk() as u32);
            }
        }
        Ok(changes)
    }
}

/// Counts added lines of the tree-to-tree patch, ignoring deletions and
/// renames across paths.
pub struct PatchStrategy {
    pub base: Oid,
    pub target: Oid,
}

impl ChangeStrategy for PatchStrategy {
    fn line_changes(&self, repo: &Repository, path: &str) -> Result<LineChanges> {
        let git_err = |e| Error::git(Stage::Diff, path, e);
        let base_tree = repo.find_commit(self.base).and_then(|c| c.tree()).map_err(git_err)?;
        let target_tree = repo.find_commit(self.target).and_then(|c| c.tree()).map_err(git_err)?;

        let mut diff_opts = DiffOptions::new();
        diff_opts.pathspec(path);
        diff_opts.disable_pathspec_match(true);
        diff_opts.ignore_filemode(true);
        let diff = repo
            .diff_tree_to_tree(Some(&base_tree), Some(&target_tree), Some(&mut diff_opts))
            .map_err(git_err)?;

        let mut changes = LineChanges::new();
        // (old_start, new_start) of the hunk being walked, and the next new-side line
        let mut cursor: Option<((u32, u32), u32)> = None;
        diff.foreach(
            &mut |_, _| true,
            None,
            None,
            Some(&mut |delta, hunk, line| {
                if delta.new_file().path() != Some(Path::new(path)) {
                    return true;
                }
                let Some(hunk) = hunk else { return true };
                let key = (hunk.old_start(), hunk.new_start());
                let mut current_line_no = match cursor {
                    Some((k, next)) if k == key => next,
                    _ => hunk.new_start(),
                };
                match line.origin() {
                    '+' => {
                        changes.push(current_line_no, 1);
                        current_line_no += 1;
                    }
                    ' ' => current_line_no += 1,
                    _ => {}
                }
                cursor = Some((key, current_line_no));
                true
            }),
        )
        .map_err(git_err)?;
        Ok(changes)
    }
}

fn commit_time(repo: &Repository, oid: Oid, path: &str) -> Result<DateTime<Utc>> {
    let commit = repo.find_commit(oid).map_err(|e| Error::git(Stage::Diff, path, e))?;
    Ok(to_utc(commit.time().seconds()))
}

fn to_utc(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0).single().unwrap_or_default()
}

/// Number of lines in a blob, counting a final unterminated line
pub fn count_lines(content: &[u8]) -> u32 {
    let newlines = content.iter().filter(|b| **b == b'\n').count() as u32;
    match content.last() {
        Some(b'\n') | None => newlines,
        Some(_) => newlines + 1,
    }
}

pub struct RevisionDiffer<'a> {
    repo: Repository,
    workdir: PathBuf,
    filter: &'a FileFilter,
    strategy: DiffStrategy,
    pool: &'a WorkerPool,
}

impl<'a> RevisionDiffer<'a> {
    pub fn open(
        repo_path: &Path,
        filter: &'a FileFilter,
        strategy: DiffStrategy,
        pool: &'a WorkerPool,
    ) -> Result<Self> {
        let repo = Repository::open(repo_path).map_err(|source| Error::Repository {
            path: repo_path.to_path_buf(),
            source,
        })?;
        let workdir = repo
            .workdir()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::Repository {
                path: repo_path.to_path_buf(),
                source: git2::Error::from_str("bare repositories cannot be instrumented"),
            })?;
        info!("Analyzing repository at: {}", workdir.display());
        Ok(Self {
            repo,
            workdir,
            filter,
            strategy,
            pool,
        })
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn resolve(&self, rev: &str) -> Result<Revision> {
        let commit = self
            .repo
            .revparse_single(rev)
            .and_then(|obj| obj.peel_to_commit())
            .map_err(|source| Error::Resolve {
                rev: rev.to_string(),
                source,
            })?;
        Ok(Revision {
            oid: commit.id(),
            time: to_utc(commit.time().seconds()),
        })
    }

    /// Fails unless every modification is untracked or the config file.
    pub fn ensure_clean(&self) -> Result<()> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).include_ignored(false);
        let statuses = self.repo.statuses(Some(&mut opts))?;
        let dirty: Vec<String> = statuses
            .iter()
            .filter(|entry| !entry.status().is_wt_new() && !entry.status().is_ignored())
            .filter_map(|entry| entry.path().map(str::to_string))
            .filter(|path| path != CONFIG_FILE)
            .collect();
        if dirty.is_empty() {
            Ok(())
        } else {
            Err(Error::DirtyTree { paths: dirty })
        }
    }

    pub fn ensure_checked_out(&self, target: &Revision) -> Result<()> {
        let head = self.repo.head()?.peel_to_commit()?.id();
        if head != target.oid {
            return Err(Error::NotCheckedOut {
                target: target.oid.to_string(),
                head: head.to_string(),
            });
        }
        Ok(())
    }

    /// Changed line ranges of every eligible file, sorted by path.
    /// Without a base revision every eligible file counts as fully changed.
    pub fn diff(&self, base: Option<&str>, target: &str) -> Result<Vec<FileChange>> {
        let target = self.resolve(target)?;
        let base = base.map(|rev| self.resolve(rev)).transpose()?;
        self.ensure_clean()?;
        self.ensure_checked_out(&target)?;

        let mut changes = match base {
            None => self.bootstrap(&target)?,
            Some(base) => {
                info!(
                    "Comparing {} ({}) to {}",
                    base.oid,
                    base.time.to_rfc2822(),
                    target.oid
                );
                let paths = self.changed_paths(&base, &target)?;
                match self.strategy {
                    DiffStrategy::Blame => self.analyze(&paths, &BlameStrategy { base, target })?,
                    DiffStrategy::Patch => self.analyze(
                        &paths,
                        &PatchStrategy {
                            base: base.oid,
                            target: target.oid,
                        },
                    )?,
                }
            }
        };
        changes.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Found {} changed files", changes.len());
        Ok(changes)
    }

    /// Eligible paths present at the target that differ from the base
    fn changed_paths(&self, base: &Revision, target: &Revision) -> Result<Vec<String>> {
        let base_tree = self.repo.find_commit(base.oid)?.tree()?;
        let target_tree = self.repo.find_commit(target.oid)?.tree()?;
        let mut diff_opts = DiffOptions::new();
        diff_opts.include_untracked(false);
        diff_opts.ignore_filemode(true);
        let diff = self
            .repo
            .diff_tree_to_tree(Some(&base_tree), Some(&target_tree), Some(&mut diff_opts))?;

        let mut paths: Vec<String> = diff
            .deltas()
            .filter(|delta| {
                matches!(
                    delta.status(),
                    Delta::Added | Delta::Modified | Delta::Renamed | Delta::Copied | Delta::Typechange
                )
            })
            .filter_map(|delta| delta.new_file().path().and_then(|p| p.to_str()).map(String::from))
            .filter(|path| self.filter.is_eligible(path))
            .collect();
        paths.sort();
        paths.dedup();
        debug!(candidates = paths.len(), "collected changed paths");
        Ok(paths)
    }

    /// Runs `strategy` over every path on the worker pool. Each task opens its
    /// own repository handle.
    fn analyze(&self, paths: &[String], strategy: &dyn ChangeStrategy) -> Result<Vec<FileChange>> {
        let workdir = &self.workdir;
        let results = self.pool.run("Analyzing changes", paths, |path| {
            let repo = Repository::open(workdir).map_err(|source| Error::Repository {
                path: workdir.clone(),
                source,
            })?;
            let line_changes = strategy.line_changes(&repo, path)?;
            Ok((!line_changes.is_empty()).then(|| FileChange {
                path: path.clone(),
                line_changes,
            }))
        })?;
        Ok(results.into_iter().flatten().collect())
    }

    fn bootstrap(&self, target: &Revision) -> Result<Vec<FileChange>> {
        info!("No base revision, treating every source file as new");
        let tree = self.repo.find_commit(target.oid)?.tree()?;
        let mut blobs = Vec::new();
        tree.walk(TreeWalkMode::PreOrder, |dir, entry| {
            if entry.kind() == Some(ObjectType::Blob) {
                if let Some(name) = entry.name() {
                    let path = format!("{dir}{name}");
                    if self.filter.is_eligible(&path) {
                        blobs.push((path, entry.id()));
                    }
                }
            }
            TreeWalkResult::Ok
        })?;

        let mut changes = Vec::with_capacity(blobs.len());
        for (path, id) in blobs {
            let blob = self.repo.find_blob(id).map_err(|e| Error::git(Stage::Diff, &path, e))?;
            let line_changes = LineChanges::whole_file(count_lines(blob.content()));
            if !line_changes.is_empty() {
                changes.push(FileChange { path, line_changes });
            }
        }
        Ok(changes)
    }
}
