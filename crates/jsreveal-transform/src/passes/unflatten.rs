//! Linearizes flattened control flow.
//!
//! Two dispatcher shapes are recognized:
//!
//! * the order-string dispatcher, `var o = '2|0|1'.split('|'), i = 0; while (true) { switch
//!   (o[i++]) { case '0': ...; continue; } break; }`
//! * the numeric state machine, `var s = 0; while (true) { switch (s) { case 0: ...; s = 2; break;
//!   case 2: ...; return; } }`
//!
//! A dispatcher is rewritten only when every step can be followed statically and the walk ends.

use super::DeobfuscationPass;
use crate::const_eval::{evaluate, JsValue};
use crate::dispatch::{dispatch_switch, is_infinite_loop};
use crate::errors::{AttemptResult, StageResult};
use crate::rewrite::{
    contains, finish, identifier_refs, line_indent, node_text, remove_statement,
};
use jsreveal_parser::literal::decode_string_literal;
use jsreveal_parser::walk::{called_property, code_children, is_function_like, is_loop};
use jsreveal_parser::{parse, unwrap_parens, visit, EditSet, SourceTree};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use tree_sitter::Node;

pub struct UnflattenPass;

impl DeobfuscationPass for UnflattenPass {
    fn name(&self) -> &'static str {
        "unflatten"
    }

    fn description(&self) -> &'static str {
        "Restored sequential control flow from switch dispatchers"
    }

    fn run(&self, code: &str) -> StageResult<AttemptResult> {
        let tree = parse(code)?;
        let (edits, restored) = unflatten_tree(&tree);
        if restored > 0 {
            debug!(restored, "unflattened dispatch loops");
        }
        Ok(finish(code, &edits))
    }
}

/// Edits that linearize every dispatcher in `tree`, plus how many were restored.
pub fn unflatten_tree(tree: &SourceTree) -> (EditSet, usize) {
    let source = tree.source();
    let mut edits = EditSet::new();
    let mut restored = 0;

    let mut loops = Vec::new();
    visit(tree.root(), |node| {
        if is_loop(node.kind()) && is_infinite_loop(node, source) {
            loops.push(node);
        }
        true
    });

    for loop_node in loops {
        let Some(switch) = dispatch_switch(loop_node) else {
            continue;
        };
        let plan = split_dispatcher(tree, loop_node, switch)
            .or_else(|| state_machine(tree, loop_node, switch));
        let Some(plan) = plan else {
            continue;
        };
        let indent = line_indent(source, loop_node.start_byte());
        let text = plan.statements.join(&format!("\n{}", indent));
        if !edits.replace(loop_node.byte_range(), text) {
            continue;
        }
        for statement in plan.removable {
            remove_statement(&mut edits, statement, source);
        }
        restored += 1;
    }
    (edits, restored)
}

struct Plan<'t> {
    statements: Vec<String>,
    removable: Vec<Node<'t>>,
}

struct Case<'t> {
    statements: Vec<Node<'t>>,
}

fn cases<'t>(switch: Node<'t>, source: &str) -> Option<HashMap<String, Case<'t>>> {
    let body = switch.child_by_field_name("body")?;
    let mut out = HashMap::new();
    for clause in code_children(body) {
        if clause.kind() != "switch_case" {
            return None;
        }
        let value = clause.child_by_field_name("value")?;
        let label = evaluate(value, source)?.to_js_string()?;
        let statements = code_children(clause)
            .into_iter()
            .filter(|s| s.id() != value.id())
            .collect();
        if out.insert(label, Case { statements }).is_some() {
            return None;
        }
    }
    Some(out)
}

/// True when `node` holds a `break`/`continue` that would leave the dispatcher.
fn escapes_dispatcher(node: Node<'_>) -> bool {
    let mut escapes = false;
    visit(node, |n| {
        if escapes {
            return false;
        }
        let kind = n.kind();
        if matches!(kind, "break_statement" | "continue_statement") {
            escapes = true;
            return false;
        }
        !(is_loop(kind) || is_function_like(kind) || kind == "switch_statement")
    });
    escapes
}

fn declarator_for<'t>(tree: &'t SourceTree, name: &str) -> Option<Node<'t>> {
    let mut found: Vec<Node<'t>> = tree
        .nodes_of_kind("variable_declarator")
        .into_iter()
        .filter(|d| {
            d.child_by_field_name("name")
                .map_or(false, |n| tree.text(n) == name)
        })
        .collect();
    if found.len() == 1 {
        found.pop()
    } else {
        None
    }
}

/// Statements that only declare dispatcher state and are referenced nowhere else.
fn removable_declarations<'t>(
    tree: &'t SourceTree,
    loop_node: Node<'t>,
    declarators: &[Node<'t>],
    names: &[&str],
) -> Vec<Node<'t>> {
    let source = tree.source();
    let mut statements: Vec<Node<'t>> = Vec::new();
    for declarator in declarators {
        let Some(statement) = declarator.parent() else {
            return Vec::new();
        };
        let mut cursor = statement.walk();
        let only_state = statement
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "variable_declarator")
            .all(|c| declarators.iter().any(|d| d.id() == c.id()));
        if !only_state
            || !matches!(statement.kind(), "variable_declaration" | "lexical_declaration")
        {
            return Vec::new();
        }
        if !statements.iter().any(|s| s.id() == statement.id()) {
            statements.push(statement);
        }
    }
    let unused_elsewhere = names.iter().all(|name| {
        identifier_refs(tree.root(), source, name)
            .into_iter()
            .all(|r| contains(loop_node, r) || statements.iter().any(|s| contains(*s, r)))
    });
    if unused_elsewhere {
        statements
    } else {
        Vec::new()
    }
}

fn split_dispatcher<'t>(
    tree: &'t SourceTree,
    loop_node: Node<'t>,
    switch: Node<'t>,
) -> Option<Plan<'t>> {
    let source = tree.source();
    let body = loop_node.child_by_field_name("body")?;
    let body_statements = code_children(body);
    if body_statements.len() != 2
        || body_statements[0].id() != switch.id()
        || body_statements[1].kind() != "break_statement"
        || !code_children(body_statements[1]).is_empty()
    {
        return None;
    }

    let discriminant = unwrap_parens(switch.child_by_field_name("value")?);
    if discriminant.kind() != "subscript_expression" {
        return None;
    }
    let order_name = node_text(discriminant.child_by_field_name("object")?, source);
    let index = unwrap_parens(discriminant.child_by_field_name("index")?);
    if index.kind() != "update_expression" || !node_text(index, source).ends_with("++") {
        return None;
    }
    let counter = index.child_by_field_name("argument")?;
    let counter_name = node_text(counter, source);

    let order_decl = declarator_for(tree, order_name)?;
    let split_call = order_decl.child_by_field_name("value")?;
    if split_call.kind() != "call_expression" || called_property(split_call, source) != Some("split") {
        return None;
    }
    let order_string = split_call
        .child_by_field_name("function")?
        .child_by_field_name("object")?;
    let order = decode_string_literal(node_text(order_string, source))?;
    let separator = code_children(split_call.child_by_field_name("arguments")?)
        .into_iter()
        .next()
        .and_then(|a| decode_string_literal(node_text(a, source)))?;
    if separator.is_empty() {
        return None;
    }

    let counter_decl = declarator_for(tree, counter_name)?;
    let start = evaluate(counter_decl.child_by_field_name("value")?, source)?;
    if start != JsValue::Number(0.0) {
        return None;
    }

    let cases = cases(switch, source)?;
    let mut statements = Vec::new();
    for label in order.split(separator.as_str()) {
        let case = cases.get(label)?;
        let (last, rest) = case.statements.split_last()?;
        let kept: &[Node<'t>] = match last.kind() {
            "continue_statement" if code_children(*last).is_empty() => rest,
            "return_statement" | "throw_statement" => &case.statements,
            _ => return None,
        };
        if kept.iter().any(|s| escapes_dispatcher(*s)) {
            return None;
        }
        statements.extend(kept.iter().map(|s| node_text(*s, source).to_string()));
    }

    Some(Plan {
        statements,
        removable: removable_declarations(
            tree,
            loop_node,
            &[order_decl, counter_decl],
            &[order_name, counter_name],
        ),
    })
}

fn state_assignment(statement: Node<'_>, source: &str, state: &str) -> Option<String> {
    if statement.kind() != "expression_statement" {
        return None;
    }
    let expr = code_children(statement).into_iter().next()?;
    if expr.kind() != "assignment_expression"
        || node_text(expr.child_by_field_name("left")?, source) != state
    {
        return None;
    }
    evaluate(expr.child_by_field_name("right")?, source)?.to_js_string()
}

fn state_machine<'t>(
    tree: &'t SourceTree,
    loop_node: Node<'t>,
    switch: Node<'t>,
) -> Option<Plan<'t>> {
    let source = tree.source();
    let body = loop_node.child_by_field_name("body")?;
    if body.id() != switch.id() && code_children(body).len() != 1 {
        return None;
    }

    let discriminant = unwrap_parens(switch.child_by_field_name("value")?);
    if discriminant.kind() != "identifier" {
        return None;
    }
    let state_name = node_text(discriminant, source);
    let state_decl = declarator_for(tree, state_name)?;
    let mut state = match evaluate(state_decl.child_by_field_name("value")?, source)? {
        value @ JsValue::Number(_) => value.to_js_string()?,
        _ => return None,
    };

    let cases = cases(switch, source)?;
    let mut visited = HashSet::new();
    let mut statements = Vec::new();
    loop {
        if !visited.insert(state.clone()) {
            return None;
        }
        let case = cases.get(&state)?;
        let (last, rest) = case.statements.split_last()?;
        let (kept, next) = match last.kind() {
            "return_statement" | "throw_statement" => (&case.statements[..], None),
            "break_statement" | "continue_statement" if code_children(*last).is_empty() => {
                let (transition, before) = rest.split_last()?;
                let next = state_assignment(*transition, source, state_name)?;
                (before, Some(next))
            }
            _ => return None,
        };
        let touches_state = kept
            .iter()
            .any(|s| !identifier_refs(*s, source, state_name).is_empty());
        if touches_state || kept.iter().any(|s| escapes_dispatcher(*s)) {
            return None;
        }
        statements.extend(kept.iter().map(|s| node_text(*s, source).to_string()));
        match next {
            Some(next) => state = next,
            None => break,
        }
    }

    Some(Plan {
        statements,
        removable: removable_declarations(tree, loop_node, &[state_decl], &[state_name]),
    })
}
