//! Locates `switch` dispatch loops, the shape shared by control-flow flattening and VM
//! interpreters.

use crate::const_eval::evaluate_condition;
use jsreveal_parser::literal::decode_string_literal;
use jsreveal_parser::walk::{called_property, code_children, is_loop, visit};
use jsreveal_parser::{location_of, unwrap_parens};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::ops::Range;
use tree_sitter::Node;

static REGISTER_ASSIGN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\br\d+\s*=[^=]").expect("valid register regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchLoop {
    pub loop_range: Range<usize>,
    pub switch_range: Range<usize>,
    pub location: String,
    /// Source text of the `switch` discriminant, e.g. `op` or `code[pc++]`.
    pub discriminant: String,
    pub case_count: usize,
    /// Every case label is a number or a string of digits.
    pub numeric_labels: bool,
    /// Labels are string literals, as in `'3|1|0'.split('|')` order dispatchers.
    pub quoted_labels: bool,
    pub has_stack_ops: bool,
    pub has_registers: bool,
}

impl DispatchLoop {
    pub fn looks_like_interpreter(&self) -> bool {
        self.numeric_labels
            && !self.quoted_labels
            && (self.has_stack_ops
                || self.has_registers
                || self.discriminant.contains('[')
                || self.case_count >= 8)
    }
}

/// True for `while (true)`, `while (!![])`, `for (;;)` and `do {} while (1)`.
pub fn is_infinite_loop(node: Node<'_>, source: &str) -> bool {
    match node.kind() {
        "while_statement" | "do_statement" => node
            .child_by_field_name("condition")
            .and_then(|c| evaluate_condition(c, source))
            .unwrap_or(false),
        "for_statement" => match node.child_by_field_name("condition") {
            None => true,
            Some(cond) => match cond.kind() {
                "empty_statement" | ";" => true,
                "expression_statement" => code_children(cond)
                    .first()
                    .and_then(|e| evaluate_condition(*e, source))
                    .unwrap_or(false),
                _ => evaluate_condition(cond, source).unwrap_or(false),
            },
        },
        _ => false,
    }
}

/// The `switch` a loop body dispatches through, if the body is (or directly holds) one.
pub fn dispatch_switch(loop_node: Node<'_>) -> Option<Node<'_>> {
    let body = loop_node.child_by_field_name("body")?;
    if body.kind() == "switch_statement" {
        return Some(body);
    }
    if body.kind() != "statement_block" {
        return None;
    }
    code_children(body)
        .into_iter()
        .find(|s| s.kind() == "switch_statement")
}

pub fn case_labels(switch: Node<'_>, source: &str) -> Vec<String> {
    let Some(body) = switch.child_by_field_name("body") else {
        return Vec::new();
    };
    code_children(body)
        .into_iter()
        .filter(|c| c.kind() == "switch_case")
        .filter_map(|c| c.child_by_field_name("value"))
        .map(|v| label_text(v, source))
        .collect()
}

fn label_text(value: Node<'_>, source: &str) -> String {
    let value = unwrap_parens(value);
    let raw = &source[value.byte_range()];
    if value.kind() == "string" {
        if let Some(decoded) = decode_string_literal(raw) {
            return decoded;
        }
    }
    raw.to_string()
}

fn is_numeric_label(label: &str) -> bool {
    let body = label
        .strip_prefix("0x")
        .or_else(|| label.strip_prefix("0X"))
        .map(|hex| (hex, 16))
        .unwrap_or((label, 10));
    !body.0.is_empty() && body.0.chars().all(|c| c.is_digit(body.1))
}

fn quoted_labels(switch: Node<'_>) -> bool {
    let Some(body) = switch.child_by_field_name("body") else {
        return false;
    };
    code_children(body)
        .into_iter()
        .filter_map(|c| c.child_by_field_name("value"))
        .all(|v| unwrap_parens(v).kind() == "string")
}

pub fn find_dispatch_loops(root: Node<'_>, source: &str) -> Vec<DispatchLoop> {
    let mut found = Vec::new();
    visit(root, |node| {
        if !is_loop(node.kind()) || !is_infinite_loop(node, source) {
            return true;
        }
        let Some(switch) = dispatch_switch(node) else {
            return true;
        };
        let labels = case_labels(switch, source);
        if labels.is_empty() {
            return true;
        }
        let distinct: BTreeSet<&str> = labels.iter().map(String::as_str).collect();
        let discriminant = switch
            .child_by_field_name("value")
            .map(|v| source[unwrap_parens(v).byte_range()].to_string())
            .unwrap_or_default();

        let mut has_stack_ops = false;
        visit(node, |inner| {
            if inner.kind() == "call_expression"
                && matches!(called_property(inner, source), Some("push" | "pop"))
            {
                has_stack_ops = true;
            }
            !has_stack_ops
        });

        found.push(DispatchLoop {
            loop_range: node.byte_range(),
            switch_range: switch.byte_range(),
            location: location_of(node),
            discriminant,
            case_count: distinct.len(),
            numeric_labels: labels.iter().all(|l| is_numeric_label(l)),
            quoted_labels: quoted_labels(switch),
            has_stack_ops,
            has_registers: REGISTER_ASSIGN.is_match(&source[node.byte_range()]),
        });
        true
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsreveal_parser::parse;

    #[test]
    fn test_finds_flattened_loop() {
        let source = "var o = '1|0'.split('|'), i = 0;\n\
                      while (true) { switch (o[i++]) { case '0': b(); continue; case '1': a(); continue; } break; }";
        let tree = parse(source).unwrap();
        let loops = find_dispatch_loops(tree.root(), source);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].case_count, 2);
        assert!(loops[0].numeric_labels);
        assert!(loops[0].quoted_labels);
        assert!(!loops[0].has_stack_ops);
        assert!(!loops[0].looks_like_interpreter());
    }

    #[test]
    fn test_interpreter_shape() {
        let source = "for (;;) { switch (code[pc++]) { case 0x1: stack.push(1); break; case 0x2: r1 = stack.pop(); break; } }";
        let tree = parse(source).unwrap();
        let loops = find_dispatch_loops(tree.root(), source);
        assert_eq!(loops.len(), 1);
        assert!(loops[0].has_stack_ops);
        assert!(loops[0].has_registers);
        assert!(loops[0].looks_like_interpreter());
    }

    #[test]
    fn test_finite_loop_ignored() {
        let source = "while (i < 3) { switch (i) { case 1: i++; } }";
        let tree = parse(source).unwrap();
        assert!(find_dispatch_loops(tree.root(), source).is_empty());
    }

    #[test]
    fn test_infinite_loop_forms() {
        for source in ["while (!![]) {}", "for (;;) {}", "do {} while (1);"] {
            let tree = parse(source).unwrap();
            let node = tree.root().named_child(0).unwrap();
            assert!(is_infinite_loop(node, source), "{}", source);
        }
    }
}
