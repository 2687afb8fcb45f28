//! Renames mangled `_0x…` identifiers by role.

use crate::errors::{AttemptResult, StageResult};
use crate::rewrite::{finish, node_text};
use jsreveal_parser::literal::is_hex_identifier;
use jsreveal_parser::{parse, EditSet, SourceTree};
use std::collections::{HashMap, HashSet};
use tracing::debug;
use tree_sitter::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Function,
    Array,
    Argument,
    Variable,
}

impl Role {
    fn prefix(&self) -> &'static str {
        match self {
            Role::Function => "func",
            Role::Array => "arr",
            Role::Argument => "arg",
            Role::Variable => "var",
        }
    }

    fn slot(&self) -> usize {
        match self {
            Role::Function => 0,
            Role::Array => 1,
            Role::Argument => 2,
            Role::Variable => 3,
        }
    }
}

/// Keeps one consistent name per mangled identifier across calls.
#[derive(Debug, Default)]
pub struct IdentifierRenamer {
    mapping: HashMap<String, String>,
    reverse_mapping: HashMap<String, String>,
    counters: [usize; 4],
}

fn is_name_node(kind: &str) -> bool {
    matches!(
        kind,
        "identifier" | "shorthand_property_identifier" | "shorthand_property_identifier_pattern"
    )
}

fn is_function_value(kind: &str) -> bool {
    matches!(
        kind,
        "function_expression" | "function" | "arrow_function" | "generator_function"
    )
}

/// Role of the declaration that introduces `node`, if `node` is a declared name.
fn declared_role(node: Node<'_>) -> Option<Role> {
    let parent = node.parent()?;
    let is_name_field = |p: Node<'_>| {
        p.child_by_field_name("name")
            .map_or(false, |n| n.id() == node.id())
    };
    match parent.kind() {
        "function_declaration" | "generator_function_declaration" | "class_declaration"
            if is_name_field(parent) =>
        {
            Some(Role::Function)
        }
        "function_expression" | "function" if is_name_field(parent) => Some(Role::Function),
        "formal_parameters" => Some(Role::Argument),
        "arrow_function"
            if parent
                .child_by_field_name("parameter")
                .map_or(false, |p| p.id() == node.id()) =>
        {
            Some(Role::Argument)
        }
        "assignment_pattern" if parent.parent()?.kind() == "formal_parameters" => {
            Some(Role::Argument)
        }
        "variable_declarator" if is_name_field(parent) => {
            let value = parent.child_by_field_name("value").map(|v| v.kind());
            Some(match value {
                Some(kind) if is_function_value(kind) => Role::Function,
                Some("array") => Role::Array,
                _ => Role::Variable,
            })
        }
        _ => None,
    }
}

impl IdentifierRenamer {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_name(&mut self, role: Role, taken: &HashSet<String>) -> String {
        loop {
            let slot = role.slot();
            let candidate = format!("{}_{}", role.prefix(), self.counters[slot]);
            self.counters[slot] += 1;
            if !taken.contains(&candidate) && !self.reverse_mapping.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    fn name_for(&mut self, original: &str, role: Role, taken: &HashSet<String>) -> String {
        if let Some(renamed) = self.mapping.get(original) {
            return renamed.clone();
        }
        let renamed = self.fresh_name(role, taken);
        self.mapping.insert(original.to_string(), renamed.clone());
        self.reverse_mapping
            .insert(renamed.clone(), original.to_string());
        renamed
    }

    fn collect_edits(&mut self, tree: &SourceTree) -> (EditSet, usize) {
        let source = tree.source();
        let names: Vec<Node<'_>> = tree
            .nodes()
            .into_iter()
            .filter(|n| is_name_node(n.kind()))
            .collect();

        let taken: HashSet<String> = names
            .iter()
            .map(|n| node_text(*n, source).to_string())
            .collect();
        let mut roles: HashMap<&str, Role> = HashMap::new();
        for node in &names {
            let text = node_text(*node, source);
            if is_hex_identifier(text) {
                if let Some(role) = declared_role(*node) {
                    roles.entry(text).or_insert(role);
                }
            }
        }

        let mut edits = EditSet::new();
        let mut renamed = 0;
        for node in names {
            let original = node_text(node, source);
            if !is_hex_identifier(original) {
                continue;
            }
            let role = roles.get(original).copied().unwrap_or(Role::Variable);
            let new_name = self.name_for(original, role, &taken);
            // Shorthand `{ _0x1 }` keeps its key by expanding to `{ _0x1: var_0 }`.
            let replacement = if node.kind() == "identifier" {
                new_name
            } else {
                format!("{}: {}", original, new_name)
            };
            if edits.replace(node.byte_range(), replacement) {
                renamed += 1;
            }
        }
        (edits, renamed)
    }

    pub fn rename(&mut self, code: &str) -> StageResult<AttemptResult> {
        let tree = parse(code)?;
        let (edits, renamed) = self.collect_edits(&tree);
        if renamed > 0 {
            debug!(renamed, distinct = self.mapping.len(), "renamed mangled identifiers");
        }
        Ok(finish(code, &edits))
    }

    /// Renamed name to original name.
    pub fn export_mapping(&self) -> HashMap<String, String> {
        self.reverse_mapping.clone()
    }

    pub fn original_name(&self, renamed: &str) -> Option<&str> {
        self.reverse_mapping.get(renamed).map(|s| s.as_str())
    }

    pub fn renamed_count(&self) -> usize {
        self.mapping.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn rename(code: &str) -> (String, IdentifierRenamer) {
        let mut renamer = IdentifierRenamer::new();
        let out = renamer.rename(code).unwrap().into_code(code);
        (out, renamer)
    }

    #[test]
    fn test_roles() {
        let (out, _) = rename(
            "var _0xa = ['x'];\nfunction _0xb(_0xc) { var _0xd = _0xa[_0xc]; return _0xd; }\n_0xb(0);",
        );
        assert_eq!(
            out,
            "var arr_0 = ['x'];\nfunction func_0(arg_0) { var var_0 = arr_0[arg_0]; return var_0; }\nfunc_0(0);"
        );
    }

    #[test]
    fn test_shorthand_keeps_keys() {
        let (out, _) = rename("var _0x1f = 1; var o = { _0x1f }; var { _0x2e } = o;");
        assert_eq!(
            out,
            "var var_0 = 1; var o = { _0x1f: var_0 }; var { _0x2e: var_1 } = o;"
        );
    }

    #[test]
    fn test_no_collision_with_existing_names() {
        let (out, renamer) = rename("var var_0 = 1; var _0xab = 2;");
        assert_eq!(out, "var var_0 = 1; var var_1 = 2;");
        assert_eq!(renamer.original_name("var_1"), Some("_0xab"));
    }

    #[test]
    fn test_plain_names_untouched() {
        assert_eq!(
            IdentifierRenamer::new().rename("var total = a + b;").unwrap(),
            AttemptResult::Unchanged
        );
    }

    #[test]
    fn test_export_mapping() {
        let (_, renamer) = rename("function _0x1(_0x2) { return _0x2; }");
        let mapping = renamer.export_mapping();
        assert_eq!(mapping.get("func_0").map(String::as_str), Some("_0x1"));
        assert_eq!(mapping.get("arg_0").map(String::as_str), Some("_0x2"));
        assert_eq!(renamer.renamed_count(), 2);
    }
}
