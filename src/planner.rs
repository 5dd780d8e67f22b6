// src/planner.rs

//! Decides where probes go in one file, under one of four granularities.

use crate::model::{Granularity, InsertPosition, LineChanges};
use crate::scope::{ScopeIndex, TrackScope};
use crate::syntax::{self, Body, GoSource};
use std::collections::{HashMap, HashSet};
use tree_sitter::Node;

/// Accepted insertion points of one file, sorted and free of duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertionPlan {
    pub positions: Vec<InsertPosition>,
}

impl InsertionPlan {
    pub fn count(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineMark {
    Unchanged,
    Pending,
    Covered,
}

/// Per-line coverage marks over the lines owned by one leaf scope.
#[derive(Debug, Clone)]
pub struct PatchScope {
    first: u32,
    marks: Vec<LineMark>,
    comments: Vec<bool>,
}

impl PatchScope {
    pub fn new(scope: &TrackScope, changed: &[bool], comments: &[bool]) -> Self {
        Self::over(scope.first_line(), scope.last_line(), changed, comments)
    }

    fn over(first: u32, last: u32, changed: &[bool], comments: &[bool]) -> Self {
        let lines = first..=last;
        let at = |flags: &[bool], line: u32| flags.get(line as usize).copied().unwrap_or(false);
        Self {
            first,
            marks: lines
                .clone()
                .map(|l| if at(changed, l) { LineMark::Pending } else { LineMark::Unchanged })
                .collect(),
            comments: lines.map(|l| at(comments, l)).collect(),
        }
    }

    fn slot(&self, line: u32) -> Option<usize> {
        let idx = line.checked_sub(self.first)? as usize;
        (idx < self.marks.len()).then_some(idx)
    }

    /// Walks back from `line` through pending and comment lines: refused as
    /// soon as a covered line is met, allowed on the first plain unchanged
    /// line or at the scope start.
    pub fn can_insert(&self, line: u32) -> bool {
        let Some(mut idx) = self.slot(line) else {
            return true;
        };
        loop {
            match self.marks[idx] {
                LineMark::Covered => return false,
                LineMark::Unchanged if !self.comments[idx] => return true,
                _ => {}
            }
            if idx == 0 {
                return true;
            }
            idx -= 1;
        }
    }

    /// Covers `first..=last` and the pending/comment runs touching it on either side.
    pub fn mark_inserted(&mut self, first: u32, last: u32) {
        let lo = first.max(self.first);
        let hi = last.min(self.first + self.marks.len() as u32 - 1);
        if lo > hi {
            return;
        }
        let (lo, hi) = (lo - self.first, hi - self.first);
        for idx in lo..=hi {
            self.marks[idx as usize] = LineMark::Covered;
        }
        let mut idx = hi as usize + 1;
        while idx < self.marks.len() && self.extends(idx) {
            self.cover(idx);
            idx += 1;
        }
        let mut idx = lo as usize;
        while idx > 0 && self.extends(idx - 1) {
            self.cover(idx - 1);
            idx -= 1;
        }
    }

    fn extends(&self, idx: usize) -> bool {
        self.marks[idx] == LineMark::Pending || self.comments[idx]
    }

    fn cover(&mut self, idx: usize) {
        if self.marks[idx] == LineMark::Pending {
            self.marks[idx] = LineMark::Covered;
        }
    }

    pub fn is_covered(&self, line: u32) -> bool {
        self.slot(line).is_some_and(|idx| self.marks[idx] == LineMark::Covered)
    }
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    function: usize,
    entry: InsertPosition,
}

struct Planner<'a> {
    scopes: &'a ScopeIndex,
    granularity: Granularity,
    changed: Vec<bool>,
    comments: Vec<bool>,
    visited: HashSet<InsertPosition>,
    positions: Vec<InsertPosition>,
    marked_functions: HashSet<usize>,
    marked_scopes: HashSet<(u32, u32)>,
    patches: HashMap<(u32, u32), PatchScope>,
    /// Lines already judged as part of a statement or header, per function
    judged: HashSet<u32>,
    /// Statement positions of the current function
    anchors: Vec<InsertPosition>,
    /// Entry position of every body of the current function, keyed like its scope
    body_entries: HashMap<(u32, u32), InsertPosition>,
}

/// Plans the insertion points of one file.
pub fn plan(
    source: &GoSource,
    scopes: &ScopeIndex,
    changes: &LineChanges,
    granularity: Granularity,
) -> InsertionPlan {
    let line_count = source.line_count();
    let mut planner = Planner {
        scopes,
        granularity,
        changed: changes.to_flags(line_count),
        comments: source.comment_lines(),
        visited: HashSet::new(),
        positions: Vec::new(),
        marked_functions: HashSet::new(),
        marked_scopes: HashSet::new(),
        patches: HashMap::new(),
        judged: HashSet::new(),
        anchors: Vec::new(),
        body_entries: HashMap::new(),
    };
    for (function, body) in syntax::function_bodies(source.root()).iter().enumerate() {
        let frame = Frame {
            function,
            entry: entry_position(body),
        };
        planner.judged.clear();
        planner.anchors.clear();
        planner.body_entries.clear();
        planner.walk_body(body, frame, false);
        planner.sweep_interior(body, frame);
    }
    let mut positions = planner.positions;
    positions.sort();
    InsertionPlan { positions }
}

fn position_for(stmt: Node<'_>, body: &Body<'_>) -> InsertPosition {
    let line = syntax::line(stmt);
    if line == body.open_line {
        InsertPosition::splice(line, body.open_column)
    } else {
        InsertPosition::line(line)
    }
}

fn entry_position(body: &Body<'_>) -> InsertPosition {
    body.statements
        .first()
        .map(|stmt| position_for(*stmt, body))
        .unwrap_or_else(|| InsertPosition::splice(body.open_line, body.open_column))
}

impl<'a> Planner<'a> {
    fn walk_body(&mut self, body: &Body<'_>, frame: Frame, forced: bool) {
        self.body_entries
            .insert((body.open_line, body.close_line), entry_position(body));
        if forced {
            self.force(body, frame);
        }
        for stmt in &body.statements {
            self.anchors.push(position_for(*stmt, body));
            self.walk_statement(*stmt, body, frame);
        }
    }

    /// Changed interior lines no statement accounts for: comments, blank
    /// lines and closing braces. They still mark their function, and under
    /// `scope` their leaf, anchored at the leaf's first statement.
    fn sweep_interior(&mut self, body: &Body<'_>, frame: Frame) {
        if !matches!(self.granularity, Granularity::Func | Granularity::Scope) {
            return;
        }
        let nested: Vec<(u32, u32)> = body
            .statements
            .iter()
            .flat_map(|stmt| syntax::nested_closure_spans(*stmt))
            .collect();
        let lines: Vec<u32> = (body.open_line + 1..body.close_line)
            .filter(|line| self.changed.get(*line as usize).copied().unwrap_or(false))
            .filter(|line| !nested.iter().any(|&(open, close)| *line > open && *line < close))
            .collect();
        if lines.is_empty() {
            return;
        }
        if self.granularity == Granularity::Func {
            self.mark_function(frame);
            return;
        }
        let scopes = self.scopes;
        let Some(root) = scopes.tracks.get(frame.function).and_then(Option::as_ref) else {
            return;
        };
        for line in lines {
            if self.judged.contains(&line) {
                continue;
            }
            let Some(leaf) = root.innermost(line) else { continue };
            let key = leaf.key();
            if self.marked_scopes.contains(&key) {
                continue;
            }
            if let Some(anchor) = self.anchor_in(key) {
                self.marked_scopes.insert(key);
                self.accept(anchor);
            }
        }
    }

    /// First statement starting inside the scope, else the entry of the
    /// body the scope stands for. Fillers holding only braces get none.
    fn anchor_in(&self, key: (u32, u32)) -> Option<InsertPosition> {
        self.anchors
            .iter()
            .filter(|pos| pos.line > key.0 && pos.line < key.1)
            .min()
            .copied()
            .or_else(|| self.body_entries.get(&key).copied())
    }

    fn walk_statement(&mut self, stmt: Node<'_>, body: &Body<'_>, frame: Frame) {
        match stmt.kind() {
            "if_statement" => self.walk_if(stmt, frame, false),
            "for_statement" => {
                let Some(inner) = stmt.child_by_field_name("body").and_then(Body::of_block) else {
                    return;
                };
                let header = self.lines_changed(stmt, syntax::line(stmt), inner.open_line);
                self.walk_body(&inner, frame, header);
            }
            "block" => {
                if let Some(inner) = Body::of_block(stmt) {
                    self.walk_body(&inner, frame, false);
                }
            }
            "labeled_statement" => {
                if let Some(inner) = syntax::labeled_inner(stmt) {
                    self.walk_statement(inner, body, frame);
                }
            }
            kind if syntax::SWITCH_KINDS.contains(&kind) => self.walk_switch(stmt, frame),
            _ => self.evaluate(stmt, body, frame),
        }
    }

    fn walk_if(&mut self, stmt: Node<'_>, frame: Frame, inherited: bool) {
        let Some(consequence) = stmt.child_by_field_name("consequence").and_then(Body::of_block) else {
            return;
        };
        let header =
            inherited || self.lines_changed(stmt, syntax::line(stmt), consequence.open_line);
        self.walk_body(&consequence, frame, header);
        if let Some(alt) = stmt.child_by_field_name("alternative") {
            match alt.kind() {
                "if_statement" => self.walk_if(alt, frame, header),
                "block" => {
                    if let Some(inner) = Body::of_block(alt) {
                        self.walk_body(&inner, frame, header);
                    }
                }
                _ => {}
            }
        }
    }

    fn walk_switch(&mut self, stmt: Node<'_>, frame: Frame) {
        let Some((open, _)) = syntax::braces(stmt) else {
            return;
        };
        let header = self.lines_changed(stmt, syntax::line(stmt), open);
        for (clause, body) in syntax::clause_bodies(stmt) {
            let forced =
                header || self.lines_changed(clause, syntax::line(clause), body.open_line);
            self.walk_body(&body, frame, forced);
        }
    }

    /// Simple statements are judged by their own lines.
    fn evaluate(&mut self, stmt: Node<'_>, body: &Body<'_>, frame: Frame) {
        if !self.lines_changed(stmt, syntax::line(stmt), syntax::end_line(stmt)) {
            return;
        }
        let pos = position_for(stmt, body);
        match self.granularity {
            Granularity::Line => self.accept(pos),
            Granularity::Func => self.mark_function(frame),
            Granularity::Scope => match self.leaf_key(frame.function, pos) {
                Some(key) => {
                    if self.marked_scopes.insert(key) {
                        self.accept(pos);
                    }
                }
                None => self.accept(pos),
            },
            Granularity::Patch => match self.leaf_key(frame.function, pos) {
                Some(key) => {
                    let patch = self.patch_scope(key);
                    let allowed = patch.can_insert(pos.line);
                    patch.mark_inserted(syntax::line(stmt), syntax::end_line(stmt));
                    if allowed {
                        self.accept(pos);
                    }
                }
                None => self.accept(pos),
            },
        }
    }

    /// Marks a body whose controlling header changed, even if the body did not.
    fn force(&mut self, body: &Body<'_>, frame: Frame) {
        let entry = entry_position(body);
        match self.granularity {
            Granularity::Func => self.mark_function(frame),
            Granularity::Line => self.accept(entry),
            Granularity::Scope => {
                if let Some(key) = self.leaf_key(frame.function, entry) {
                    self.marked_scopes.insert(key);
                }
                self.accept(entry);
            }
            Granularity::Patch => {
                if let (Some(first), Some(key)) =
                    (body.statements.first(), self.leaf_key(frame.function, entry))
                {
                    let (start, end) = (syntax::line(*first), syntax::end_line(*first));
                    self.patch_scope(key).mark_inserted(start, end);
                }
                self.accept(entry);
            }
        }
    }

    fn mark_function(&mut self, frame: Frame) {
        if self.marked_functions.insert(frame.function) {
            self.accept(frame.entry);
        }
    }

    /// Leaf scope of a line insertion; splices sit inside single-line
    /// bodies that no scope owns, so they never share a leaf.
    fn leaf_key(&self, function: usize, pos: InsertPosition) -> Option<(u32, u32)> {
        if pos.is_splice() {
            return None;
        }
        self.scopes
            .tracks
            .get(function)?
            .as_ref()?
            .innermost(pos.line)
            .map(TrackScope::key)
    }

    fn patch_scope(&mut self, key: (u32, u32)) -> &mut PatchScope {
        let (changed, comments) = (&self.changed, &self.comments);
        self.patches
            .entry(key)
            .or_insert_with(|| PatchScope::over(key.0 + 1, key.1 - 1, changed, comments))
    }

    /// Whether any line in `first..=last` changed, ignoring lines that
    /// belong to closures nested in `node` (those are planned on their own).
    fn lines_changed(&mut self, node: Node<'_>, first: u32, last: u32) -> bool {
        self.judged.extend(first..=last);
        let nested = syntax::nested_closure_spans(node);
        (first..=last).any(|line| {
            self.changed.get(line as usize).copied().unwrap_or(false)
                && !nested.iter().any(|&(open, close)| line > open && line < close)
        })
    }

    /// Keeps a position when it lands inside a function and was not seen before.
    fn accept(&mut self, mut pos: InsertPosition) {
        if !pos.is_splice() {
            while self.comments.get(pos.line as usize).copied().unwrap_or(false) {
                pos.line += 1;
            }
        }
        match self.scopes.blocks.search_position(pos) {
            Some(scope) if !scope.is_file() => {}
            _ => return,
        }
        if self.visited.insert(pos) {
            self.positions.push(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Stage;
    use crate::scope;
    use pretty_assertions::assert_eq;

    fn run(text: &str, changed: &[u32], granularity: Granularity) -> Vec<(u32, u32)> {
        let source = GoSource::parse("t.go", text.to_string(), Stage::Placeholder).unwrap();
        let scopes = scope::analyze(&source);
        let mut changes = LineChanges::new();
        for line in changed {
            changes.push(*line, 1);
        }
        plan(&source, &scopes, &changes, granularity)
            .positions
            .iter()
            .map(|p| (p.line, p.column))
            .collect()
    }

    const SAMPLE: &str = "package p

func f(x int) int {
	a := x
	b := a + 1
	// note
	c := b * 2
	if c > 10 {
		c = 10
	}
	return c
}

func g() {
	h()
}
";

    #[test]
    fn test_line_marks_each_changed_statement() {
        assert_eq!(
            run(SAMPLE, &[4, 5, 9, 15], Granularity::Line),
            vec![(4, 0), (5, 0), (9, 0), (15, 0)]
        );
    }

    #[test]
    fn test_func_marks_function_entry_once() {
        assert_eq!(run(SAMPLE, &[5, 9, 11], Granularity::Func), vec![(4, 0)]);
        assert_eq!(run(SAMPLE, &[5, 15], Granularity::Func), vec![(4, 0), (15, 0)]);
    }

    #[test]
    fn test_scope_marks_each_leaf_once() {
        // lines 4..7 share the leading filler, line 9 is the if body, line 11 the trailing filler
        assert_eq!(
            run(SAMPLE, &[5, 7, 9, 11], Granularity::Scope),
            vec![(5, 0), (9, 0), (11, 0)]
        );
    }

    #[test]
    fn test_patch_consolidates_runs_across_comments() {
        assert_eq!(run(SAMPLE, &[5, 7], Granularity::Patch), vec![(5, 0)]);
        assert_eq!(run(SAMPLE, &[4, 7], Granularity::Patch), vec![(4, 0), (7, 0)]);
    }

    #[test]
    fn test_patch_scope_mark_semantics() {
        let leaf = TrackScope {
            start_line: 3,
            end_line: 10,
            filler: false,
            children: Vec::new(),
        };
        let mut changed = vec![false; 12];
        changed[5] = true;
        changed[6] = true;
        let comments = vec![false; 12];
        let mut patch = PatchScope::new(&leaf, &changed, &comments);
        assert!(patch.can_insert(5));
        patch.mark_inserted(5, 5);
        assert!(patch.is_covered(6));
        assert!(!patch.can_insert(6));
        assert!(patch.can_insert(8));
    }

    #[test]
    fn test_changed_if_header_forces_both_bodies() {
        let text = "package p

func f(x int) {
	if x > 1 {
		a()
	} else {
		b()
	}
}
";
        assert_eq!(run(text, &[4], Granularity::Line), vec![(5, 0), (7, 0)]);
        assert_eq!(run(text, &[4], Granularity::Patch), vec![(5, 0), (7, 0)]);
        assert_eq!(run(text, &[4], Granularity::Scope), vec![(5, 0), (7, 0)]);
        assert_eq!(run(text, &[4], Granularity::Func), vec![(4, 0)]);
    }

    #[test]
    fn test_single_line_bodies_are_spliced() {
        let text = "package p

func f(x int) int {
	if x > 1 { return 1 } else { return 2 }
	go func() { work() }()
	return 0
}
";
        let positions = run(text, &[4, 5], Granularity::Line);
        assert_eq!(positions, vec![(4, 11), (4, 29), (5, 0), (5, 12)]);
    }

    #[test]
    fn test_changed_clause_header_forces_clause() {
        let text = "package p

func f(x int) {
	switch x {
	case 1, 2:
		a()
	default:
		b()
	}
}
";
        assert_eq!(run(text, &[5], Granularity::Line), vec![(6, 0)]);
        assert_eq!(run(text, &[4], Granularity::Line), vec![(6, 0), (8, 0)]);
    }

    #[test]
    fn test_nothing_outside_functions() {
        let text = "package p

var x = 1

func f() {
	y()
}
";
        assert!(run(text, &[3], Granularity::Line).is_empty());
        assert!(run(text, &[3], Granularity::Func).is_empty());
    }

    #[test]
    fn test_closure_lines_belong_to_closure() {
        let text = "package p

func f() {
	run(func() {
		inner()
	})
}
";
        assert_eq!(run(text, &[5], Granularity::Func), vec![(5, 0)]);
        assert_eq!(run(text, &[5], Granularity::Line), vec![(5, 0)]);
    }

    #[test]
    fn test_planning_is_repeatable() {
        for granularity in [Granularity::Line, Granularity::Func, Granularity::Scope, Granularity::Patch] {
            let first = run(SAMPLE, &[4, 5, 6, 7, 9, 15], granularity);
            let second = run(SAMPLE, &[4, 5, 6, 7, 9, 15], granularity);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_changed_comment_line_marks_function_and_leaf() {
        let text = "package p

func f() {
	a()
	// new note
	b()
}
";
        assert_eq!(run(text, &[5], Granularity::Func), vec![(4, 0)]);
        assert_eq!(run(text, &[5], Granularity::Scope), vec![(4, 0)]);
        assert!(run(text, &[5], Granularity::Line).is_empty());
    }

    #[test]
    fn test_changed_closing_brace_marks_trailing_filler() {
        let text = "package p

func f(x int) {
	if x > 0 {
		a()
	}
	b()
}
";
        assert_eq!(run(text, &[6], Granularity::Scope), vec![(7, 0)]);
        assert_eq!(run(text, &[6], Granularity::Func), vec![(4, 0)]);
    }

    #[test]
    fn test_comment_only_body_is_spliced_after_its_brace() {
        let text = "package p

func f(x int) {
	if x > 0 {
		// later
	}
}
";
        assert_eq!(run(text, &[5], Granularity::Scope), vec![(4, 11)]);
        assert_eq!(run(text, &[5], Granularity::Func), vec![(4, 0)]);
    }
}
