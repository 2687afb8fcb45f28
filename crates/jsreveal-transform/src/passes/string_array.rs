use super::DeobfuscationPass;
use crate::const_eval::{evaluate, JsValue};
use crate::errors::{AttemptResult, StageResult};
use crate::rewrite::{finish, identifier_refs, node_text, remove_statement, sole_declaration};
use jsreveal_parser::walk::code_children;
use jsreveal_parser::{parse, EditSet};
use tracing::debug;
use tree_sitter::Node;

/// Inlines `var a = ["x", "y"]` into every `a[0]`-style use and drops the declaration.
pub struct StringArrayPass;

impl DeobfuscationPass for StringArrayPass {
    fn name(&self) -> &'static str {
        "string-array"
    }

    fn description(&self) -> &'static str {
        "Inlined constant-indexed string arrays"
    }

    fn run(&self, code: &str) -> StageResult<AttemptResult> {
        let tree = parse(code)?;
        let source = tree.source();
        let mut edits = EditSet::new();
        let mut inlined = 0usize;

        for declarator in tree.nodes_of_kind("variable_declarator") {
            let Some((name, elements)) = string_array(declarator, source) else {
                continue;
            };
            let Some(sites) = literal_index_sites(tree.root(), source, name, &elements) else {
                continue;
            };
            if sites.is_empty() {
                continue;
            }
            for (site, raw) in &sites {
                edits.replace(site.byte_range(), *raw);
            }
            if let Some(statement) = sole_declaration(declarator) {
                remove_statement(&mut edits, statement, source);
            }
            inlined += 1;
            debug!(array = name, uses = sites.len(), "inlined string array");
        }

        if inlined == 0 {
            return Ok(AttemptResult::Unchanged);
        }
        Ok(finish(code, &edits))
    }
}

fn string_array<'s>(declarator: Node<'_>, source: &'s str) -> Option<(&'s str, Vec<&'s str>)> {
    let name = declarator.child_by_field_name("name")?;
    let value = declarator.child_by_field_name("value")?;
    if name.kind() != "identifier" || value.kind() != "array" {
        return None;
    }
    let elements = code_children(value);
    if elements.is_empty() || elements.iter().any(|e| e.kind() != "string") {
        return None;
    }
    Some((
        node_text(name, source),
        elements.iter().map(|e| node_text(*e, source)).collect(),
    ))
}

/// Every use of `name` as `name[<constant in range>]` read, or `None` if any use is anything else.
fn literal_index_sites<'t, 's>(
    root: Node<'t>,
    source: &'s str,
    name: &str,
    elements: &[&'s str],
) -> Option<Vec<(Node<'t>, &'s str)>> {
    let mut sites = Vec::new();
    let mut declarations = 0;
    for reference in identifier_refs(root, source, name) {
        let parent = reference.parent()?;
        if parent.kind() == "variable_declarator"
            && parent
                .child_by_field_name("name")
                .map_or(false, |n| n.id() == reference.id())
        {
            declarations += 1;
            continue;
        }
        if parent.kind() != "subscript_expression"
            || parent
                .child_by_field_name("object")
                .map_or(true, |o| o.id() != reference.id())
            || is_write_target(parent)
        {
            return None;
        }
        let index = match evaluate(parent.child_by_field_name("index")?, source)? {
            JsValue::Number(n) if n >= 0.0 && n.fract() == 0.0 => n as usize,
            _ => return None,
        };
        sites.push((parent, *elements.get(index)?));
    }
    (declarations == 1).then_some(sites)
}

fn is_write_target(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    match parent.kind() {
        "assignment_expression" | "augmented_assignment_expression" => parent
            .child_by_field_name("left")
            .map_or(false, |l| l.id() == node.id()),
        "update_expression" => true,
        "unary_expression" => parent
            .child_by_field_name("operator")
            .map_or(false, |op| op.kind() == "delete"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(code: &str) -> String {
        StringArrayPass.run(code).unwrap().into_code(code)
    }

    #[test]
    fn test_inlines_and_removes_array() {
        let code = "var _0xa = ['log', 'hi'];\nconsole[_0xa[0]](_0xa[0x1]);";
        assert_eq!(run(code), "console['log']('hi');");
    }

    #[test]
    fn test_dynamic_index_blocks_inlining() {
        let code = "var a = ['x', 'y'];\nf(a[i]);";
        assert_eq!(run(code), code);
    }

    #[test]
    fn test_writes_block_inlining() {
        let code = "var a = ['x'];\na[0] = 'z';\nf(a[0]);";
        assert_eq!(run(code), code);
    }

    #[test]
    fn test_out_of_range_blocks_inlining() {
        let code = "var a = ['x'];\nf(a[3]);";
        assert_eq!(run(code), code);
    }
}
