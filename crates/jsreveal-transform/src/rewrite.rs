//! Helpers shared by every source-to-source rewrite.

use crate::errors::AttemptResult;
use jsreveal_parser::{check, visit, EditSet, SourceTree};
use tree_sitter::Node;

pub fn node_text<'s>(node: Node<'_>, source: &'s str) -> &'s str {
    &source[node.byte_range()]
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Keeps `return!0` from becoming `returntrue`.
pub fn pad_word_boundaries(node: Node<'_>, source: &str, text: String) -> String {
    let before = source[..node.start_byte()].chars().next_back();
    let after = source[node.end_byte()..].chars().next();
    let mut out = text;
    if before.map_or(false, is_word_char) && out.chars().next().map_or(false, is_word_char) {
        out.insert(0, ' ');
    }
    if after.map_or(false, is_word_char) && out.chars().next_back().map_or(false, is_word_char) {
        out.push(' ');
    }
    out
}

/// Runs `rule` over the tree top-down. A node the rule rewrites is not descended into, so the
/// collected edits never overlap.
pub fn collect_top_down<F>(tree: &SourceTree, mut rule: F) -> EditSet
where
    F: FnMut(Node<'_>, &str) -> Option<String>,
{
    let source = tree.source();
    let mut edits = EditSet::new();
    visit(tree.root(), |node| match rule(node, source) {
        Some(text) if text != source[node.byte_range()] => {
            edits.replace(node.byte_range(), pad_word_boundaries(node, source, text));
            false
        }
        _ => true,
    });
    edits
}

/// Applies `edits` to `original`; refuses any result that no longer parses.
pub fn finish(original: &str, edits: &EditSet) -> AttemptResult {
    if edits.is_empty() {
        return AttemptResult::Unchanged;
    }
    let rewritten = edits.apply(original);
    if !check(&rewritten) {
        return AttemptResult::Failed("rewrite produced invalid syntax".to_string());
    }
    AttemptResult::from_rewrite(original, rewritten)
}

/// Leading whitespace of the line holding `byte`.
pub fn line_indent(source: &str, byte: usize) -> String {
    let line_start = source[..byte].rfind('\n').map_or(0, |i| i + 1);
    source[line_start..byte]
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect()
}

/// Removes a whole statement, swallowing the line break after it when nothing else sits on its
/// line.
pub fn remove_statement(edits: &mut EditSet, statement: Node<'_>, source: &str) -> bool {
    let start = statement.start_byte();
    let mut end = statement.end_byte();
    let line_start = source[..start].rfind('\n').map_or(0, |i| i + 1);
    let alone = source[line_start..start].chars().all(char::is_whitespace);
    let rest = &source[end..];
    let trailing_ws = rest.len() - rest.trim_start_matches(|c| c == ' ' || c == '\t').len();
    if alone && rest[trailing_ws..].starts_with('\n') {
        end += trailing_ws + 1;
        return edits.remove(line_start..end);
    }
    edits.remove(start..end)
}

/// The declaration statement that owns `declarator`, when it declares nothing else.
pub fn sole_declaration(declarator: Node<'_>) -> Option<Node<'_>> {
    let statement = declarator.parent()?;
    if !matches!(
        statement.kind(),
        "variable_declaration" | "lexical_declaration"
    ) {
        return None;
    }
    let mut cursor = statement.walk();
    let count = statement
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "variable_declarator")
        .count();
    (count == 1).then_some(statement)
}

/// Every identifier node spelling `name`, shorthand properties included.
pub fn identifier_refs<'t>(root: Node<'t>, source: &str, name: &str) -> Vec<Node<'t>> {
    let mut out = Vec::new();
    visit(root, |node| {
        if matches!(node.kind(), "identifier" | "shorthand_property_identifier")
            && &source[node.byte_range()] == name
        {
            out.push(node);
        }
        true
    });
    out
}

/// True when `inner` lies within `outer`.
pub fn contains(outer: Node<'_>, inner: Node<'_>) -> bool {
    outer.start_byte() <= inner.start_byte() && inner.end_byte() <= outer.end_byte()
}
