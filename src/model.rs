// src/model.rs

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A run of `count` consecutive changed lines starting at 1-based line `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineChange {
    pub start: u32,
    #[serde(rename = "lines")]
    pub count: u32,
}

impl LineChange {
    /// One past the last line of the range
    pub fn end(&self) -> u32 {
        self.start.saturating_add(self.count)
    }
}

/// Sorted, non-overlapping, maximal line ranges of one file.
///
/// Ranges that touch or overlap are merged as they are pushed, so no two
/// stored ranges satisfy `a.start + a.count == b.start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<LineChange>", into = "Vec<LineChange>")]
pub struct LineChanges(Vec<LineChange>);

impl LineChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `count` changed lines starting at `start`. Ranges running
    /// past `u32::MAX` are cut short.
    pub fn push(&mut self, start: u32, count: u32) {
        let count = count.min(u32::MAX - start);
        if count == 0 {
            return;
        }
        match self.0.last_mut() {
            Some(last) if start >= last.start && start <= last.end() => {
                let end = last.end().max(start.saturating_add(count));
                last.count = end - last.start;
            }
            Some(last) if start > last.end() => self.0.push(LineChange { start, count }),
            None => self.0.push(LineChange { start, count }),
            Some(_) => {
                self.0.push(LineChange { start, count });
                self.normalize();
            }
        }
    }

    /// Builds ranges from per-line flags, `flags[0]` being line 1.
    pub fn from_flags<I: IntoIterator<Item = bool>>(flags: I) -> Self {
        let mut changes = Self::new();
        for (idx, flag) in flags.into_iter().enumerate() {
            if flag {
                changes.push(idx as u32 + 1, 1);
            }
        }
        changes
    }

    /// A single range covering lines `1..=line_count`.
    pub fn whole_file(line_count: u32) -> Self {
        let mut changes = Self::new();
        changes.push(1, line_count);
        changes
    }

    fn normalize(&mut self) {
        let mut ranges = std::mem::take(&mut self.0);
        ranges.sort_by_key(|r| r.start);
        for r in ranges {
            self.push(r.start, r.count);
        }
    }

    pub fn contains(&self, line: u32) -> bool {
        self.0.iter().any(|r| line >= r.start && line < r.end())
    }

    /// Per-line bitmap indexed by 1-based line, sized to hold `line_count + 2` entries.
    pub fn to_flags(&self, line_count: u32) -> Vec<bool> {
        let mut flags = vec![false; line_count as usize + 2];
        let limit = flags.len();
        for r in &self.0 {
            let (start, end) = (r.start as usize, (r.end() as usize).min(limit));
            if start < end {
                flags[start..end].fill(true);
            }
        }
        flags
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LineChange> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Total number of changed lines
    pub fn line_total(&self) -> u32 {
        self.0.iter().map(|r| r.count).sum()
    }
}

impl From<Vec<LineChange>> for LineChanges {
    fn from(ranges: Vec<LineChange>) -> Self {
        let mut changes = LineChanges(ranges);
        changes.normalize();
        changes
    }
}

impl From<LineChanges> for Vec<LineChange> {
    fn from(changes: LineChanges) -> Self {
        changes.0
    }
}

/// Changed lines of one eligible file, keyed by its repository-relative path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    pub line_changes: LineChanges,
}

/// A rewrite point. `column` is 0 for a line insertion before `line`, and
/// the byte offset just past a body opener for a mid-line splice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InsertPosition {
    pub line: u32,
    pub column: u32,
}

impl InsertPosition {
    pub fn line(line: u32) -> Self {
        Self { line, column: 0 }
    }

    pub fn splice(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn is_splice(&self) -> bool {
        self.column != 0
    }
}

/// Inclusive range of track IDs owned by one file; empty when `end < start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackIdxInterval {
    pub start: u32,
    pub end: u32,
}

impl TrackIdxInterval {
    pub fn empty_at(next: u32) -> Self {
        Self {
            start: next,
            end: next.saturating_sub(1),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    pub fn len(&self) -> u32 {
        if self.is_empty() {
            0
        } else {
            self.end - self.start + 1
        }
    }

    pub fn ids(&self) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end
    }
}

/// Maps a repository-relative file path to the IDs assigned in it
pub type IntervalMap = BTreeMap<String, TrackIdxInterval>;

/// All track IDs reachable from one program entry point
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Component {
    pub id: u32,
    pub name: String,
    pub track_ids: Vec<u32>,
}

/// How many probes represent a contiguous changed region
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// One probe per changed statement
    Line,
    /// One probe per changed function
    Func,
    /// One probe per changed innermost control-flow scope
    #[default]
    Scope,
    /// One probe per contiguous changed run inside a scope
    Patch,
}

/// How changed lines are attributed between two revisions
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiffStrategy {
    /// Per-line authorship at the target revision
    #[default]
    Blame,
    /// Added hunks of the tree-to-tree patch
    Patch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_merges_contiguous_ranges() {
        let mut changes = LineChanges::new();
        changes.push(3, 2);
        changes.push(5, 1);
        changes.push(9, 1);
        assert_eq!(
            changes.iter().copied().collect::<Vec<_>>(),
            vec![LineChange { start: 3, count: 3 }, LineChange { start: 9, count: 1 }]
        );
    }

    #[test]
    fn test_huge_ranges_saturate_and_stay_bounded() {
        let mut changes = LineChanges::new();
        changes.push(4, u32::MAX);
        changes.push(u32::MAX - 1, 5);
        changes.push(u32::MAX, 2);
        assert_eq!(
            changes.iter().copied().collect::<Vec<_>>(),
            vec![LineChange { start: 4, count: u32::MAX - 4 }]
        );
        assert_eq!(changes.iter().next().unwrap().end(), u32::MAX);

        let flags = changes.to_flags(6);
        assert_eq!(flags.len(), 8);
        assert_eq!(flags, vec![false, false, false, false, true, true, true, true]);

        let record: LineChanges = vec![LineChange { start: 2, count: u32::MAX }].into();
        assert_eq!(record.to_flags(2), vec![false, false, true, true]);
    }

    #[test]
    fn test_push_out_of_order_is_normalized() {
        let mut changes = LineChanges::new();
        changes.push(10, 2);
        changes.push(2, 1);
        changes.push(3, 7);
        assert_eq!(
            changes.iter().copied().collect::<Vec<_>>(),
            vec![LineChange { start: 2, count: 10 }]
        );
    }

    #[test]
    fn test_from_flags_breaks_on_unchanged() {
        let changes = LineChanges::from_flags([true, true, false, true, false, false, true]);
        assert_eq!(
            changes.iter().copied().collect::<Vec<_>>(),
            vec![
                LineChange { start: 1, count: 2 },
                LineChange { start: 4, count: 1 },
                LineChange { start: 7, count: 1 },
            ]
        );
        assert!(changes.contains(2));
        assert!(!changes.contains(3));
    }

    #[test]
    fn test_change_record_json_shape() {
        let record = FileChange {
            path: "pkg/a.go".to_string(),
            line_changes: LineChanges::from_flags([false, true, true]),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"path":"pkg/a.go","line_changes":[{"start":2,"lines":2}]}"#);
        let back: FileChange = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_empty_interval() {
        let empty = TrackIdxInterval::empty_at(4);
        assert!(empty.is_empty());
        assert_eq!(empty.len(), 0);
        assert_eq!(empty.ids().count(), 0);
        let one = TrackIdxInterval { start: 1, end: 1 };
        assert_eq!(one.len(), 1);
    }
}
