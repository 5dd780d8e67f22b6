// src/syntax.rs

//! Thin layer over tree-sitter-go: parsing, line bookkeeping and the body
//! shapes shared by the scope analyzer and the insertion planner.

use crate::error::{Error, Result, Stage};
use tree_sitter::{Node, Parser, Tree};

const FUNCTION_KINDS: [&str; 3] = ["function_declaration", "method_declaration", "func_literal"];

pub const SWITCH_KINDS: [&str; 3] = [
    "expression_switch_statement",
    "type_switch_statement",
    "select_statement",
];

const CLAUSE_KINDS: [&str; 4] = [
    "expression_case",
    "default_case",
    "type_case",
    "communication_case",
];

/// A parsed Go file
pub struct GoSource {
    pub path: String,
    pub text: String,
    tree: Tree,
}

impl GoSource {
    /// Parses `text`, failing when the syntax tree contains errors.
    pub fn parse(path: &str, text: String, stage: Stage) -> Result<Self> {
        let source = Self::parse_lenient(path, text).ok_or_else(|| Error::Parse {
            path: path.to_string(),
            stage,
        })?;
        if source.root().has_error() {
            return Err(Error::Parse {
                path: path.to_string(),
                stage,
            });
        }
        Ok(source)
    }

    /// Parses `text` and keeps whatever tree tree-sitter recovers.
    pub fn parse_lenient(path: &str, text: String) -> Option<Self> {
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_go::LANGUAGE.into()).ok()?;
        let tree = parser.parse(&text, None)?;
        Some(Self {
            path: path.to_string(),
            text,
            tree,
        })
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn line_count(&self) -> u32 {
        self.text.lines().count() as u32
    }

    pub fn node_text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.text.as_bytes()).unwrap_or("")
    }

    /// Line of the `package` clause
    pub fn package_line(&self) -> Option<u32> {
        let root = self.root();
        let mut cursor = root.walk();
        let line = root
            .children(&mut cursor)
            .find(|n| n.kind() == "package_clause")
            .map(end_line);
        line
    }

    /// Bitmap indexed by 1-based line: true when the line holds only comment text.
    pub fn comment_lines(&self) -> Vec<bool> {
        let lines: Vec<&str> = self.text.split('\n').collect();
        let mut flags = vec![false; lines.len() + 2];
        walk_tree(self.root(), |node| {
            if node.kind() != "comment" {
                return true;
            }
            let start = node.start_position();
            let end = node.end_position();
            for row in start.row..=end.row {
                let Some(text) = lines.get(row) else { break };
                let before = if row == start.row {
                    text.get(..start.column).unwrap_or("")
                } else {
                    ""
                };
                let after = if row == end.row {
                    text.get(end.column..).unwrap_or("")
                } else {
                    ""
                };
                if before.trim().is_empty() && after.trim().is_empty() {
                    flags[row + 1] = true;
                }
            }
            false
        });
        flags
    }
}

/// 1-based start line of `node`
pub fn line(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-based end line of `node`
pub fn end_line(node: Node<'_>) -> u32 {
    node.end_position().row as u32 + 1
}

/// Pre-order walk; `visit` returns whether to descend into the node.
pub fn walk_tree<'t>(root: Node<'t>, mut visit: impl FnMut(Node<'t>) -> bool) {
    let mut cursor = root.walk();
    loop {
        let descend = visit(cursor.node());
        if descend && cursor.goto_first_child() {
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return;
            }
        }
    }
}

/// A statement list together with the token that opens it.
///
/// For blocks the opener is `{`; for switch and select clauses it is the
/// clause's `:`. `close_line` is the line that ends the body: the `}` of a
/// block, or the line of the next clause.
#[derive(Debug, Clone)]
pub struct Body<'t> {
    pub open_line: u32,
    /// Byte column just past the opener
    pub open_column: u32,
    pub close_line: u32,
    pub statements: Vec<Node<'t>>,
}

impl<'t> Body<'t> {
    pub fn of_block(block: Node<'t>) -> Option<Self> {
        let children = children(block);
        let open = children.iter().find(|c| c.kind() == "{")?;
        let close = children.iter().rev().find(|c| c.kind() == "}")?;
        let mut statements = Vec::new();
        for child in children.iter().filter(|c| c.is_named()) {
            push_statements(*child, &mut statements);
        }
        Some(Self {
            open_line: line(*open),
            open_column: open.end_position().column as u32,
            close_line: line(*close),
            statements,
        })
    }

    pub fn of_clause(clause: Node<'t>, close_line: u32) -> Option<Self> {
        let children = children(clause);
        let colon_idx = children.iter().position(|c| c.kind() == ":")?;
        let colon = children[colon_idx];
        let mut statements = Vec::new();
        for child in children[colon_idx + 1..].iter().filter(|c| c.is_named()) {
            push_statements(*child, &mut statements);
        }
        Some(Self {
            open_line: line(colon),
            open_column: colon.end_position().column as u32,
            close_line,
            statements,
        })
    }

    pub fn is_single_line(&self) -> bool {
        self.open_line == self.close_line
    }
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    let children = node.children(&mut cursor).collect();
    children
}

fn push_statements<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    match node.kind() {
        "comment" | "empty_statement" => {}
        "statement_list" => {
            for child in children(node).into_iter().filter(|c| c.is_named()) {
                push_statements(child, out);
            }
        }
        _ => out.push(node),
    }
}

/// Every function, method and closure body of the file, in source order.
pub fn function_bodies<'t>(root: Node<'t>) -> Vec<Body<'t>> {
    let mut bodies = Vec::new();
    walk_tree(root, |node| {
        if FUNCTION_KINDS.contains(&node.kind()) {
            if let Some(body) = node.child_by_field_name("body").and_then(Body::of_block) {
                bodies.push(body);
            }
        }
        true
    });
    bodies
}

/// The clauses of a switch/select statement with their bodies, each body
/// ending at the next clause or at the statement's closing brace.
pub fn clause_bodies<'t>(switch: Node<'t>) -> Vec<(Node<'t>, Body<'t>)> {
    let children = children(switch);
    let Some(close) = children.iter().rev().find(|c| c.kind() == "}") else {
        return Vec::new();
    };
    let clauses: Vec<Node<'t>> = children
        .iter()
        .copied()
        .filter(|c| CLAUSE_KINDS.contains(&c.kind()))
        .collect();
    clauses
        .iter()
        .enumerate()
        .filter_map(|(i, clause)| {
            let close_line = clauses.get(i + 1).map_or(line(*close), |next| line(*next));
            Body::of_clause(*clause, close_line).map(|body| (*clause, body))
        })
        .collect()
}

/// Lines of the `{` and `}` of a switch/select statement
pub fn braces(node: Node<'_>) -> Option<(u32, u32)> {
    let children = children(node);
    let open = children.iter().find(|c| c.kind() == "{")?;
    let close = children.iter().rev().find(|c| c.kind() == "}")?;
    Some((line(*open), line(*close)))
}

/// The statement wrapped by a `labeled_statement`
pub fn labeled_inner(node: Node<'_>) -> Option<Node<'_>> {
    children(node)
        .into_iter()
        .filter(|c| c.is_named() && c.kind() != "label_name" && c.kind() != "comment")
        .last()
}

/// Line spans `(open, close)` of closure bodies nested inside `node`,
/// not descending into the closures themselves.
pub fn nested_closure_spans(node: Node<'_>) -> Vec<(u32, u32)> {
    let mut spans = Vec::new();
    let own_id = node.id();
    walk_tree(node, |n| {
        if n.id() != own_id && n.kind() == "func_literal" {
            if let Some(body) = n.child_by_field_name("body").and_then(Body::of_block) {
                spans.push((body.open_line, body.close_line));
            }
            return false;
        }
        true
    });
    spans
}
