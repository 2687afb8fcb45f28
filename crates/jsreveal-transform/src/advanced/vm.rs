//! Interpreter loops and their bytecode tables.
//!
//! Nothing here executes bytecode. An interpreter is recognized, described, and in aggressive
//! mode replaced by a marker comment together with the tables it reads.

use crate::dispatch::DispatchLoop;
use crate::rewrite::{contains, identifier_refs, node_text, remove_statement, sole_declaration};
use jsreveal_parser::walk::code_children;
use jsreveal_parser::{location_of, EditSet, SourceTree};
use serde::Serialize;
use std::fmt;
use tree_sitter::Node;

/// Numeric arrays shorter than this are ordinary data.
pub const MIN_BYTECODE_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VmKind {
    StackBased,
    RegisterBased,
    Unknown,
}

impl VmKind {
    pub fn of(dispatch: &DispatchLoop) -> Self {
        if dispatch.has_stack_ops {
            VmKind::StackBased
        } else if dispatch.has_registers {
            VmKind::RegisterBased
        } else {
            VmKind::Unknown
        }
    }
}

impl fmt::Display for VmKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmKind::StackBased => "stack-based",
            VmKind::RegisterBased => "register-based",
            VmKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub struct BytecodeTable<'t> {
    /// Declared name, when the literal initializes a variable.
    pub name: Option<String>,
    pub literal: Node<'t>,
    /// The statement to drop with the table, when it declares nothing else.
    pub declaration: Option<Node<'t>>,
    pub len: usize,
    pub location: String,
}

fn is_numeric_element(node: Node<'_>, source: &str) -> bool {
    match node.kind() {
        "number" => true,
        "unary_expression" => {
            node_text(node, source).starts_with('-')
                && node
                    .child_by_field_name("argument")
                    .map_or(false, |a| a.kind() == "number")
        }
        _ => false,
    }
}

/// Array literals of at least [`MIN_BYTECODE_LEN`] numbers.
pub fn bytecode_tables(tree: &SourceTree) -> Vec<BytecodeTable<'_>> {
    let source = tree.source();
    tree.nodes_of_kind("array")
        .into_iter()
        .filter_map(|array| {
            let elements = code_children(array);
            if elements.len() < MIN_BYTECODE_LEN
                || !elements.iter().all(|e| is_numeric_element(*e, source))
            {
                return None;
            }
            let declarator = array
                .parent()
                .filter(|p| p.kind() == "variable_declarator")
                .filter(|p| {
                    p.child_by_field_name("value")
                        .map_or(false, |v| v.id() == array.id())
                });
            let name = declarator
                .and_then(|d| d.child_by_field_name("name"))
                .filter(|n| n.kind() == "identifier")
                .map(|n| tree.text(n).to_string());
            Some(BytecodeTable {
                name,
                literal: array,
                declaration: declarator.and_then(sole_declaration),
                len: elements.len(),
                location: location_of(array),
            })
        })
        .collect()
}

pub fn marker(dispatch: &DispatchLoop) -> String {
    format!(
        "/* {} VM interpreter removed: {} opcodes dispatched on `{}`, bytecode not executed */",
        VmKind::of(dispatch),
        dispatch.case_count,
        dispatch.discriminant.replace("*/", "* /"),
    )
}

/// Replaces each interpreter loop with a marker and drops bytecode tables that only it reads.
pub fn neutralize(tree: &SourceTree, interpreters: &[DispatchLoop]) -> (EditSet, usize) {
    let source = tree.source();
    let root = tree.root();
    let mut edits = EditSet::new();
    let mut loops: Vec<Node<'_>> = Vec::new();

    for dispatch in interpreters {
        let range = dispatch.loop_range.clone();
        let Some(node) = root.descendant_for_byte_range(range.start, range.end) else {
            continue;
        };
        if edits.replace(range, marker(dispatch)) {
            loops.push(node);
        }
    }

    for table in bytecode_tables(tree) {
        let (Some(name), Some(declaration)) = (table.name.as_deref(), table.declaration) else {
            continue;
        };
        let refs = identifier_refs(root, source, name);
        let read_by_removed_loop = refs
            .iter()
            .any(|r| loops.iter().any(|l| contains(*l, *r)));
        let read_elsewhere = refs.iter().any(|r| {
            !contains(declaration, *r) && !loops.iter().any(|l| contains(*l, *r))
        });
        if read_by_removed_loop && !read_elsewhere {
            remove_statement(&mut edits, declaration, source);
        }
    }

    let removed = loops.len();
    (edits, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::find_dispatch_loops;
    use jsreveal_parser::parse;

    fn program(table_len: usize) -> String {
        let bytes: Vec<String> = (0..table_len).map(|i| (i % 4).to_string()).collect();
        format!(
            "var code = [{}];\nvar pc = 0, stack = [];\nfor (;;) {{\n  switch (code[pc++]) {{\n    case 0: stack.push(1); break;\n    case 1: stack.push(stack.pop() + stack.pop()); break;\n    case 2: out(stack.pop()); break;\n    case 3: throw done;\n  }}\n}}",
            bytes.join(", ")
        )
    }

    #[test]
    fn test_bytecode_tables_need_minimum_length() {
        let long = program(MIN_BYTECODE_LEN);
        let tree = parse(&long).unwrap();
        let tables = bytecode_tables(&tree);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name.as_deref(), Some("code"));

        let short = program(4);
        assert!(bytecode_tables(&parse(&short).unwrap()).is_empty());
    }

    #[test]
    fn test_vm_kind() {
        let code = program(MIN_BYTECODE_LEN);
        let tree = parse(&code).unwrap();
        let loops = find_dispatch_loops(tree.root(), &code);
        assert_eq!(VmKind::of(&loops[0]), VmKind::StackBased);
        assert_eq!(VmKind::StackBased.to_string(), "stack-based");
    }

    #[test]
    fn test_neutralize_replaces_loop_and_table() {
        let code = program(MIN_BYTECODE_LEN);
        let tree = parse(&code).unwrap();
        let loops = find_dispatch_loops(tree.root(), &code);
        let (edits, removed) = neutralize(&tree, &loops);
        assert_eq!(removed, 1);
        let out = edits.apply(&code);
        assert!(out.starts_with("var pc = 0, stack = [];\n/* stack-based VM interpreter removed: 4 opcodes"));
        assert!(!out.contains("switch"));
    }
}
