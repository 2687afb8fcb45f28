use super::DeobfuscationPass;
use crate::errors::{AttemptResult, StageResult};
use crate::optimizer::dotted_access;
use crate::rewrite::{collect_top_down, finish, node_text};
use jsreveal_parser::walk::code_children;
use jsreveal_parser::{parse, unwrap_parens};
use tree_sitter::Node;

/// Undoes expression-level noise: `(0, f)(x)`, `!(a === b)`, `obj['key']`.
pub struct SimplifyPass;

impl DeobfuscationPass for SimplifyPass {
    fn name(&self) -> &'static str {
        "simplify"
    }

    fn description(&self) -> &'static str {
        "Simplified indirect calls, negated comparisons and computed member access"
    }

    fn run(&self, code: &str) -> StageResult<AttemptResult> {
        let tree = parse(code)?;
        let edits = collect_top_down(&tree, simplify_node);
        Ok(finish(code, &edits))
    }
}

fn simplify_node(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "call_expression" => indirect_call(node, source),
        "unary_expression" => negated_comparison(node, source),
        "subscript_expression" => dotted_access(node, source),
        _ => None,
    }
}

/// `(0, f)(x)` to `f(x)`. Only plain identifiers: for `(0, a.b)()` the comma drops `this`.
fn indirect_call(node: Node<'_>, source: &str) -> Option<String> {
    let callee = node.child_by_field_name("function")?;
    if callee.kind() != "parenthesized_expression" {
        return None;
    }
    let sequence = code_children(callee).into_iter().next()?;
    if sequence.kind() != "sequence_expression" {
        return None;
    }
    let parts = code_children(sequence);
    let [first, target] = parts.as_slice() else {
        return None;
    };
    if first.kind() != "number" || target.kind() != "identifier" {
        return None;
    }
    let name = node_text(*target, source);
    // `(0, eval)(x)` is an indirect eval; dropping the comma would make it direct.
    if name == "eval" {
        return None;
    }
    let args = node.child_by_field_name("arguments")?;
    Some(format!("{}{}", name, node_text(args, source)))
}

fn negated_comparison(node: Node<'_>, source: &str) -> Option<String> {
    if node_text(node.child_by_field_name("operator")?, source) != "!" {
        return None;
    }
    let argument = node.child_by_field_name("argument")?;
    if argument.kind() != "parenthesized_expression" {
        return None;
    }
    let inner = unwrap_parens(argument);
    if inner.kind() != "binary_expression" {
        return None;
    }
    let op = inner.child_by_field_name("operator")?;
    let flipped = match node_text(op, source) {
        "===" => "!==",
        "!==" => "===",
        "==" => "!=",
        "!=" => "==",
        _ => return None,
    };
    let left = node_text(inner.child_by_field_name("left")?, source);
    let right = node_text(inner.child_by_field_name("right")?, source);
    Some(format!("({} {} {})", left, flipped, right))
}
