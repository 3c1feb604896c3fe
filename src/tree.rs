//! Parser output consumed by the unit builder
//!
//! The external parser may emit either an index-linked node arena
//! (`{"nodes": [...], "root": 0}`) or a plain nested tree
//! (`{"kind": ..., "children": [...]}`). Both forms are normalized into a
//! [`SyntaxTree`]. Only `kind`, `startLine`, `endLine` and `children` are
//! required by the scheduler; `name` is used to label aggregates.

use crate::unit::LineRange;
use serde::{Deserialize, Serialize};

/// One node of the arena form; `children` are indices into [`SyntaxTree::nodes`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntaxNode {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub start_line: Option<u32>,
    #[serde(default)]
    pub end_line: Option<u32>,
    #[serde(default)]
    pub children: Vec<usize>,
}

impl SyntaxNode {
    pub fn new(kind: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            start_line: Some(start_line),
            end_line: Some(end_line),
            children: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_children(mut self, children: Vec<usize>) -> Self {
        self.children = children;
        self
    }
}

/// Nested form as emitted by most grammar-based parsers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedNode {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub start_line: Option<u32>,
    #[serde(default)]
    pub end_line: Option<u32>,
    #[serde(default)]
    pub children: Vec<NestedNode>,
}

impl NestedNode {
    pub fn new(kind: impl Into<String>, start_line: u32, end_line: u32) -> Self {
        Self {
            kind: kind.into(),
            name: None,
            start_line: Some(start_line),
            end_line: Some(end_line),
            children: Vec::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_children(mut self, children: Vec<NestedNode>) -> Self {
        self.children = children;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxTree {
    pub nodes: Vec<SyntaxNode>,
    #[serde(default)]
    pub root: usize,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TreeDocument {
    Arena(SyntaxTree),
    Nested(NestedNode),
}

impl SyntaxTree {
    pub fn new(nodes: Vec<SyntaxNode>, root: usize) -> Self {
        Self { nodes, root }
    }

    /// Flattens a nested tree into arena form without recursion. The root lands at index 0.
    pub fn from_nested(root: NestedNode) -> Self {
        let mut nodes: Vec<SyntaxNode> = Vec::new();
        let mut stack: Vec<(NestedNode, Option<usize>)> = vec![(root, None)];

        while let Some((node, parent)) = stack.pop() {
            let index = nodes.len();
            nodes.push(SyntaxNode {
                kind: node.kind,
                name: node.name,
                start_line: node.start_line,
                end_line: node.end_line,
                children: Vec::new(),
            });
            if let Some(parent) = parent {
                nodes[parent].children.push(index);
            }
            for child in node.children.into_iter().rev() {
                stack.push((child, Some(index)));
            }
        }

        Self { nodes, root: 0 }
    }

    /// Parses either document form
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        Ok(match serde_json::from_str::<TreeDocument>(json)? {
            TreeDocument::Arena(tree) => tree,
            TreeDocument::Nested(root) => Self::from_nested(root),
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Line-indexed source text (1-based)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceText {
    lines: Vec<String>,
}

impl SourceText {
    pub fn new(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_owned).collect(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn line(&self, number: u32) -> Option<&str> {
        let index = (number as usize).checked_sub(1)?;
        self.lines.get(index).map(String::as_str)
    }

    /// Lines of `range` joined with newlines; lines past the end are skipped
    pub fn slice(&self, range: LineRange) -> String {
        (range.start..=range.end)
            .filter_map(|number| self.line(number))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_nested_preserves_child_order() {
        let nested = NestedNode::new("PROCEDURE", 1, 5).with_children(vec![
            NestedNode::new("IF", 2, 4).with_children(vec![NestedNode::new("INSERT", 3, 3)]),
            NestedNode::new("RETURN", 5, 5),
        ]);

        let tree = SyntaxTree::from_nested(nested);

        assert_eq!(tree.root, 0);
        assert_eq!(tree.len(), 4);
        assert_eq!(tree.nodes[0].children, vec![1, 3]);
        assert_eq!(tree.nodes[1].kind, "IF");
        assert_eq!(tree.nodes[1].children, vec![2]);
        assert_eq!(tree.nodes[3].kind, "RETURN");
    }

    #[test]
    fn test_from_json_accepts_arena_form() {
        let json = r#"{
            "nodes": [
                {"kind": "PROCEDURE", "name": "p", "startLine": 1, "endLine": 2, "children": [1]},
                {"kind": "SELECT", "startLine": 2, "endLine": 2}
            ],
            "root": 0
        }"#;

        let tree = SyntaxTree::from_json(json).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.nodes[0].name.as_deref(), Some("p"));
        assert_eq!(tree.nodes[0].children, vec![1]);
    }

    #[test]
    fn test_from_json_accepts_nested_form() {
        let json = r#"{
            "kind": "FUNCTION",
            "startLine": 1,
            "endLine": 3,
            "children": [{"kind": "RETURN", "startLine": 2, "endLine": 2}]
        }"#;

        let tree = SyntaxTree::from_json(json).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.nodes[1].kind, "RETURN");
    }

    #[test]
    fn test_missing_range_deserializes_as_none() {
        let tree = SyntaxTree::from_json(r#"{"kind": "BLOCK"}"#).unwrap();
        assert!(tree.nodes[0].start_line.is_none());
    }

    #[test]
    fn test_source_slice() {
        let source = SourceText::new("a\nb\nc\nd");
        assert_eq!(source.line_count(), 4);
        assert_eq!(source.line(0), None);
        assert_eq!(source.line(2), Some("b"));
        assert_eq!(source.slice(LineRange::new(2, 3).unwrap()), "b\nc");
        assert_eq!(source.slice(LineRange::new(4, 9).unwrap()), "d");
    }
}
