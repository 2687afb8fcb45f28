//! Dead arms, unreachable statements and opaque predicates.

use crate::const_eval::evaluate;
use crate::optimizer::{collapse_ternary, prune_if};
use crate::rewrite::{pad_word_boundaries, remove_statement};
use jsreveal_parser::walk::{code_children, is_statement_list};
use jsreveal_parser::{unwrap_parens, visit, EditSet, SourceTree};
use tree_sitter::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// `false`, `!![]`, `0`: a literal with no comparison.
    Literal,
    /// `5 > 3`, `1 === 2`: a comparison whose operands are both constant.
    Comparison,
}

fn is_comparison(op: &str) -> bool {
    matches!(
        op,
        "<" | ">" | "<=" | ">=" | "==" | "!=" | "===" | "!=="
    )
}

pub fn classify_guard(condition: Node<'_>, source: &str) -> Option<Guard> {
    let inner = unwrap_parens(condition);
    evaluate(inner, source)?;
    let comparison = inner.kind() == "binary_expression"
        && inner
            .child_by_field_name("operator")
            .map_or(false, |op| is_comparison(&source[op.byte_range()]));
    Some(if comparison {
        Guard::Comparison
    } else {
        Guard::Literal
    })
}

/// Replaces every `if`/ternary guarded by a constant of kind `guard` with its live arm.
pub fn prune_guards(tree: &SourceTree, guard: Guard) -> (EditSet, usize) {
    let source = tree.source();
    let mut edits = EditSet::new();
    let mut pruned = 0;
    visit(tree.root(), |node| {
        let rewrite = match node.kind() {
            "if_statement" | "ternary_expression" => {
                let matches_guard = node
                    .child_by_field_name("condition")
                    .and_then(|c| classify_guard(c, source))
                    == Some(guard);
                if !matches_guard {
                    None
                } else if node.kind() == "if_statement" {
                    prune_if(node, source)
                } else {
                    collapse_ternary(node, source)
                }
            }
            _ => None,
        };
        match rewrite {
            Some(text) => {
                if edits.replace(node.byte_range(), pad_word_boundaries(node, source, text)) {
                    pruned += 1;
                }
                false
            }
            None => true,
        }
    });
    (edits, pruned)
}

fn is_jump(kind: &str) -> bool {
    matches!(
        kind,
        "return_statement" | "throw_statement" | "break_statement" | "continue_statement"
    )
}

/// Declarations that are visible before the jump and must survive it.
fn is_hoisted(kind: &str) -> bool {
    matches!(
        kind,
        "function_declaration"
            | "generator_function_declaration"
            | "variable_declaration"
            | "lexical_declaration"
            | "class_declaration"
    )
}

/// Removes statements that follow an unconditional jump in the same statement list.
pub fn remove_unreachable(tree: &SourceTree) -> (EditSet, usize) {
    let source = tree.source();
    let mut edits = EditSet::new();
    let mut removed = 0;
    visit(tree.root(), |node| {
        if !is_statement_list(node.kind()) {
            return true;
        }
        let mut after_jump = false;
        for statement in code_children(node) {
            if after_jump && !is_hoisted(statement.kind()) {
                if remove_statement(&mut edits, statement, source) {
                    removed += 1;
                }
                continue;
            }
            if is_jump(statement.kind()) {
                after_jump = true;
            }
        }
        true
    });
    (edits, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsreveal_parser::parse;
    use pretty_assertions::assert_eq;

    fn apply(code: &str, f: impl Fn(&SourceTree) -> (EditSet, usize)) -> (String, usize) {
        let tree = parse(code).unwrap();
        let (edits, n) = f(&tree);
        (edits.apply(code), n)
    }

    #[test]
    fn test_classify_guard() {
        let source = "if (5 > 3) {} if (!![]) {} if (x) {}";
        let tree = parse(source).unwrap();
        let ifs = tree.nodes_of_kind("if_statement");
        let guards: Vec<Option<Guard>> = ifs
            .iter()
            .map(|n| classify_guard(n.child_by_field_name("condition").unwrap(), source))
            .collect();
        assert_eq!(
            guards,
            vec![Some(Guard::Comparison), Some(Guard::Literal), None]
        );
    }

    #[test]
    fn test_opaque_predicates() {
        let (out, n) = apply("if (1 === 2) { bad(); } else { good(); }\nx = 5 > 3 ? a : b;", |t| {
            prune_guards(t, Guard::Comparison)
        });
        assert_eq!(out, "{ good(); }\nx = a;");
        assert_eq!(n, 2);
    }

    #[test]
    fn test_literal_guards_only() {
        let (out, n) = apply("if (false) { a(); }\nif (2 > 1) { b(); }", |t| {
            prune_guards(t, Guard::Literal)
        });
        assert_eq!(out, "\nif (2 > 1) { b(); }");
        assert_eq!(n, 1);
    }

    #[test]
    fn test_unreachable_after_return() {
        let code = "function f() {\n  return 1;\n  dead();\n  function g() {}\n  var v;\n}";
        let (out, n) = apply(code, remove_unreachable);
        assert_eq!(out, "function f() {\n  return 1;\n  function g() {}\n  var v;\n}");
        assert_eq!(n, 1);
    }
}
