//! Constant folding and dead-branch elimination over the syntax tree.
//!
//! `optimize` is total: it never panics and never returns broken code. Each round collects
//! non-overlapping rewrites top-down, applies them, and re-parses; a round whose output fails to
//! parse is discarded and the last good text is returned.

use crate::const_eval::{evaluate, evaluate_condition, JsValue};
use crate::rewrite::{collect_top_down, line_indent, node_text as text};
use jsreveal_parser::literal::{decode_string_literal, is_valid_identifier};
use jsreveal_parser::walk::{code_children, is_statement_list};
use jsreveal_parser::{parse, unwrap_parens, visit, EditSet, SourceTree};
use tracing::debug;
use tree_sitter::Node;

pub const MAX_ROUNDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeReport {
    pub code: String,
    pub rounds: usize,
    pub rewrites: usize,
}

pub fn optimize(code: &str) -> String {
    optimize_with_report(code).code
}

pub fn optimize_with_report(code: &str) -> OptimizeReport {
    let mut report = OptimizeReport {
        code: code.to_string(),
        rounds: 0,
        rewrites: 0,
    };
    let Ok(mut tree) = parse(code) else {
        debug!("optimizer: input does not parse, returning it unchanged");
        return report;
    };

    while report.rounds < MAX_ROUNDS {
        let edits = collect_rewrites(&tree);
        if edits.is_empty() {
            break;
        }
        let next = edits.apply(tree.source());
        match parse(&next) {
            Ok(reparsed) => {
                report.rounds += 1;
                report.rewrites += edits.len();
                report.code = next;
                tree = reparsed;
            }
            Err(err) => {
                debug!(round = report.rounds, %err, "optimizer: discarding round that broke the parse");
                break;
            }
        }
    }
    debug!(rounds = report.rounds, rewrites = report.rewrites, "optimizer finished");
    report
}

fn collect_rewrites(tree: &SourceTree) -> EditSet {
    collect_top_down(tree, rewrite_node)
}

fn rewrite_node(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "binary_expression" => fold_constant(node, source).or_else(|| short_circuit(node, source)),
        "unary_expression" => {
            fold_constant(node, source).or_else(|| double_negation(node, source))
        }
        "ternary_expression" => collapse_ternary(node, source),
        "parenthesized_expression" => strip_literal_parens(node, source),
        "if_statement" => prune_if(node, source),
        "while_statement" => prune_while(node, source),
        "subscript_expression" => dotted_access(node, source),
        "expression_statement" => split_sequence(node, source),
        _ => None,
    }
}

/// Contexts where a bare negative number or a low-precedence expression would rebind.
fn operand_context(node: Node<'_>) -> bool {
    node.parent().map_or(false, |p| {
        matches!(
            p.kind(),
            "binary_expression"
                | "unary_expression"
                | "update_expression"
                | "member_expression"
                | "subscript_expression"
                | "call_expression"
                | "new_expression"
                | "await_expression"
                | "spread_element"
                | "ternary_expression"
        )
    })
}

fn is_primary(kind: &str) -> bool {
    matches!(
        kind,
        "identifier"
            | "number"
            | "string"
            | "template_string"
            | "true"
            | "false"
            | "null"
            | "undefined"
            | "this"
            | "array"
            | "object"
            | "parenthesized_expression"
            | "call_expression"
            | "member_expression"
            | "subscript_expression"
    )
}

fn embed(original: Node<'_>, replacement: Node<'_>, source: &str) -> String {
    let body = text(replacement, source);
    if operand_context(original) && !is_primary(replacement.kind()) {
        format!("({})", body)
    } else {
        body.to_string()
    }
}

fn preferred_quote(node: Node<'_>, source: &str) -> char {
    let mut quote = '"';
    let mut found = false;
    visit(node, |n| {
        if found {
            return false;
        }
        if n.kind() == "string" {
            if let Some(c) = text(n, source).chars().next() {
                quote = c;
                found = true;
            }
        }
        true
    });
    quote
}

fn fold_constant(node: Node<'_>, source: &str) -> Option<String> {
    let value = evaluate(node, source)?;
    if let JsValue::Number(n) = value {
        if n == 0.0 && n.is_sign_negative() {
            return None;
        }
    }
    let rendered = value.render(preferred_quote(node, source))?;
    if rendered.starts_with('-') && operand_context(node) {
        return Some(format!("({})", rendered));
    }
    Some(rendered)
}

/// `const || x`, `const && x`, `const ?? x`
fn short_circuit(node: Node<'_>, source: &str) -> Option<String> {
    let op = text(node.child_by_field_name("operator")?, source);
    if !matches!(op, "||" | "&&" | "??") {
        return None;
    }
    let left = node.child_by_field_name("left")?;
    let right = node.child_by_field_name("right")?;
    let value = evaluate(left, source)?;
    let take_left = match op {
        "||" => value.truthy(),
        "&&" => !value.truthy(),
        _ => !matches!(value, JsValue::Null | JsValue::Undefined),
    };
    Some(embed(node, if take_left { left } else { right }, source))
}

fn double_negation(node: Node<'_>, source: &str) -> Option<String> {
    if text(node.child_by_field_name("operator")?, source) != "!" {
        return None;
    }
    let inner = unwrap_parens(node.child_by_field_name("argument")?);
    if inner.kind() != "unary_expression"
        || text(inner.child_by_field_name("operator")?, source) != "!"
    {
        return None;
    }
    let target = inner.child_by_field_name("argument")?;
    Some(format!("Boolean({})", text(unwrap_parens(target), source)))
}

pub(crate) fn collapse_ternary(node: Node<'_>, source: &str) -> Option<String> {
    let live = evaluate_condition(node.child_by_field_name("condition")?, source)?;
    let branch = if live {
        node.child_by_field_name("consequence")?
    } else {
        node.child_by_field_name("alternative")?
    };
    Some(embed(node, branch, source))
}

/// `(3)` or `(name)` lose their parentheses where they sit in a plain value slot.
fn strip_literal_parens(node: Node<'_>, source: &str) -> Option<String> {
    let inner = code_children(node);
    if inner.len() != 1 {
        return None;
    }
    let inner = inner[0];
    let simple = match inner.kind() {
        "number" => !text(inner, source).starts_with('-'),
        "string" | "true" | "false" | "null" | "undefined" | "identifier" => true,
        _ => false,
    };
    let parent = node.parent()?;
    let value_slot = matches!(
        parent.kind(),
        "binary_expression"
            | "unary_expression"
            | "variable_declarator"
            | "assignment_expression"
            | "augmented_assignment_expression"
            | "arguments"
            | "array"
            | "pair"
            | "return_statement"
            | "ternary_expression"
    );
    if !simple || !value_slot {
        return None;
    }
    Some(text(inner, source).to_string())
}

fn empty_statement(node: Node<'_>) -> String {
    let in_list = node.parent().map_or(true, |p| is_statement_list(p.kind()));
    if in_list {
        String::new()
    } else {
        "{}".to_string()
    }
}

pub(crate) fn prune_if(node: Node<'_>, source: &str) -> Option<String> {
    let live = evaluate_condition(node.child_by_field_name("condition")?, source)?;
    if live {
        return Some(text(node.child_by_field_name("consequence")?, source).to_string());
    }
    match node.child_by_field_name("alternative") {
        Some(alt) => {
            let statement = if alt.kind() == "else_clause" {
                code_children(alt).into_iter().next()?
            } else {
                alt
            };
            Some(text(statement, source).to_string())
        }
        None => Some(empty_statement(node)),
    }
}

fn prune_while(node: Node<'_>, source: &str) -> Option<String> {
    let live = evaluate_condition(node.child_by_field_name("condition")?, source)?;
    if live {
        return None;
    }
    Some(empty_statement(node))
}

pub(crate) fn dotted_access(node: Node<'_>, source: &str) -> Option<String> {
    let object = node.child_by_field_name("object")?;
    let index = node.child_by_field_name("index")?;
    if index.kind() != "string" || object.kind() == "number" {
        return None;
    }
    let key = decode_string_literal(text(index, source))?;
    if !is_valid_identifier(&key) {
        return None;
    }
    let mut cursor = node.walk();
    let optional = node
        .children(&mut cursor)
        .any(|c| c.kind() == "optional_chain");
    let sep = if optional { "?." } else { "." };
    Some(format!("{}{}{}", text(object, source), sep, key))
}

fn flatten_sequence<'t>(node: Node<'t>, out: &mut Vec<Node<'t>>) {
    // Reversed so the stack pops in source order.
    let mut pending: Vec<Node<'t>> = code_children(node).into_iter().rev().collect();
    while let Some(child) = pending.pop() {
        if child.kind() == "sequence_expression" {
            pending.extend(code_children(child).into_iter().rev());
        } else {
            out.push(child);
        }
    }
}

fn is_body_slot(parent: Node<'_>, node: Node<'_>) -> bool {
    if parent.kind() == "else_clause" {
        return true;
    }
    ["body", "consequence"].iter().any(|field| {
        parent
            .child_by_field_name(field)
            .map_or(false, |n| n.id() == node.id())
    })
}

fn split_sequence(node: Node<'_>, source: &str) -> Option<String> {
    let expr = code_children(node).into_iter().next()?;
    if expr.kind() != "sequence_expression" {
        return None;
    }
    let parent = node.parent()?;
    let in_list = is_statement_list(parent.kind());
    if !in_list && !is_body_slot(parent, node) {
        return None;
    }

    let mut parts = Vec::new();
    flatten_sequence(expr, &mut parts);
    if parts.len() < 2 {
        return None;
    }
    let statements: Vec<String> = parts
        .iter()
        .map(|part| {
            let body = text(*part, source);
            let ambiguous = body.starts_with('{')
                || body.starts_with("function")
                || body.starts_with("class")
                || body.starts_with("async function")
                || body.starts_with("let[");
            if ambiguous {
                format!("({});", body)
            } else {
                format!("{};", body)
            }
        })
        .collect();

    let indent = line_indent(source, node.start_byte());
    let joined = statements.join(&format!("\n{}", indent));
    if in_list {
        Some(joined)
    } else {
        Some(format!("{{ {} }}", statements.join(" ")))
    }
}
