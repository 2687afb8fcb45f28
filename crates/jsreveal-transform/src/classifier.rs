//! Tags source text with the obfuscation techniques its syntax tree shows.

use crate::const_eval::evaluate_condition;
use crate::dispatch::find_dispatch_loops;
use jsreveal_core::ObfuscationTechnique;
use jsreveal_parser::literal::{has_encoded_escapes, is_hex_identifier};
use jsreveal_parser::walk::called_property;
use jsreveal_parser::{parse, unwrap_parens, SourceTree};
use std::collections::BTreeSet;
use tracing::debug;

const DECODE_CALLS: &[&str] = &["eval", "atob", "unescape", "escape", "Function"];
const DECODE_METHODS: &[&str] = &["fromCharCode", "decodeURIComponent"];
const LOADER_GLOBALS: &[&str] = &["__webpack_require__", "webpackJsonp", "__webpack_modules__"];

/// Counters gathered in one pass over the tree.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Signals {
    pub identifiers: usize,
    pub hex_identifiers: usize,
    pub short_identifiers: usize,
    pub decode_calls: usize,
    pub constant_branches: usize,
    pub escaped_strings: usize,
    pub loader_globals: usize,
    pub packer_wrappers: usize,
    pub invisible_chars: usize,
    pub rotation_iifes: usize,
}

impl Signals {
    fn mangled(&self) -> bool {
        if self.hex_identifiers > 0 {
            return true;
        }
        self.identifiers >= 10 && self.short_identifiers * 10 >= self.identifiers * 6
    }
}

pub fn classify(code: &str) -> BTreeSet<ObfuscationTechnique> {
    let mut tags = BTreeSet::new();
    let Ok(tree) = parse(code) else {
        debug!("classifier: unparsable input");
        tags.insert(ObfuscationTechnique::Unknown);
        return tags;
    };

    let signals = collect_signals(&tree);
    let source = tree.source();

    if signals.mangled() && signals.decode_calls > 0 {
        tags.insert(ObfuscationTechnique::JavascriptObfuscator);
    }
    if signals.rotation_iifes > 0 {
        tags.insert(ObfuscationTechnique::StringArrayRotation);
        tags.insert(ObfuscationTechnique::JavascriptObfuscator);
    }
    for dispatch in find_dispatch_loops(tree.root(), source) {
        if dispatch.numeric_labels {
            tags.insert(ObfuscationTechnique::VmProtection);
            tags.insert(ObfuscationTechnique::ControlFlowFlattening);
        }
    }
    if signals.constant_branches > 0 {
        tags.insert(ObfuscationTechnique::DeadCodeInjection);
    }
    if signals.escaped_strings > 0 {
        tags.insert(ObfuscationTechnique::HexEncoding);
    }
    if signals.loader_globals > 0 {
        tags.insert(ObfuscationTechnique::Webpack);
    }
    if signals.packer_wrappers > 0 {
        tags.insert(ObfuscationTechnique::Packer);
    }
    if signals.invisible_chars >= 8 {
        tags.insert(ObfuscationTechnique::InvisibleUnicode);
    }

    if tags.is_empty() {
        tags.insert(ObfuscationTechnique::Unknown);
    }
    debug!(?signals, tags = tags.len(), "classified input");
    tags
}

pub fn collect_signals(tree: &SourceTree) -> Signals {
    let source = tree.source();
    let mut signals = Signals {
        invisible_chars: source
            .chars()
            .filter(|c| matches!(c, '\u{200b}' | '\u{200c}'))
            .count(),
        ..Default::default()
    };

    tree.walk(|node| match node.kind() {
        "identifier" => {
            let name = tree.text(node);
            signals.identifiers += 1;
            if is_hex_identifier(name) {
                signals.hex_identifiers += 1;
            } else if name.len() <= 2 {
                signals.short_identifiers += 1;
            }
            if LOADER_GLOBALS.contains(&name) {
                signals.loader_globals += 1;
            }
        }
        "call_expression" => {
            let Some(callee) = node.child_by_field_name("function") else {
                return;
            };
            let callee = unwrap_parens(callee);
            let name = tree.text(callee);
            if callee.kind() == "identifier" && DECODE_CALLS.contains(&name) {
                signals.decode_calls += 1;
            }
            if let Some(prop) = called_property(node, source) {
                if DECODE_METHODS.contains(&prop) {
                    signals.decode_calls += 1;
                }
                if prop == "push" && is_rotation_call(node, tree) {
                    signals.rotation_iifes += 1;
                }
            }
            if name == "eval" && is_packer_call(node, tree) {
                signals.packer_wrappers += 1;
            }
        }
        "new_expression" => {
            if let Some(ctor) = node.child_by_field_name("constructor") {
                if tree.text(ctor) == "Function" {
                    signals.decode_calls += 1;
                }
            }
        }
        "if_statement" | "ternary_expression" => {
            if let Some(cond) = node.child_by_field_name("condition") {
                if is_literal_condition(cond, source) {
                    signals.constant_branches += 1;
                }
            }
        }
        "string" => {
            if has_encoded_escapes(tree.text(node)) {
                signals.escaped_strings += 1;
            }
        }
        _ => {}
    });
    signals
}

/// Literal-only conditions: `false`, `!![]`, `1 === 2`. A bare identifier never qualifies.
fn is_literal_condition(cond: tree_sitter::Node<'_>, source: &str) -> bool {
    evaluate_condition(cond, source).is_some()
}

/// `arr.push(arr.shift())`, the body of a string-array rotation loop.
fn is_rotation_call(push: tree_sitter::Node<'_>, tree: &SourceTree) -> bool {
    let Some(args) = push.child_by_field_name("arguments") else {
        return false;
    };
    let source = tree.source();
    let mut cursor = args.walk();
    let shifted = args.named_children(&mut cursor).any(|arg| {
        arg.kind() == "call_expression" && called_property(arg, source) == Some("shift")
    });
    shifted
}

/// `eval(function(p,a,c,k,e,...){...}(...))`
fn is_packer_call(call: tree_sitter::Node<'_>, tree: &SourceTree) -> bool {
    let Some(args) = call.child_by_field_name("arguments") else {
        return false;
    };
    let text: String = tree
        .text(args)
        .chars()
        .filter(|c| !c.is_whitespace())
        .take(40)
        .collect();
    text.starts_with("(function(p,a,c,k,e,")
}

#[cfg(test)]
mod tests {
    use super::*;
    use ObfuscationTechnique::*;

    #[test]
    fn test_unparsable_is_unknown() {
        let tags = classify("function (");
        assert_eq!(tags.into_iter().collect::<Vec<_>>(), vec![Unknown]);
    }

    #[test]
    fn test_plain_code_is_unknown() {
        let tags = classify("function add(a, b) { return a + b; }");
        assert!(tags.contains(&Unknown));
        assert_eq!(tags.len(), 1);
    }

    #[test]
    fn test_obfuscator_signature() {
        let tags = classify("var _0x1a2b = ['aGVsbG8=']; console.log(atob(_0x1a2b[0]));");
        assert!(tags.contains(&JavascriptObfuscator));
        assert!(!tags.contains(&Unknown));
    }

    #[test]
    fn test_dispatch_loop_tags_both() {
        let tags = classify("while (true) { switch (s) { case 0: a(); break; case 1: b(); break; } }");
        assert!(tags.contains(&VmProtection));
        assert!(tags.contains(&ControlFlowFlattening));
    }

    #[test]
    fn test_independent_signatures() {
        let code = "if (false) { x(); }\nvar s = '\\x41';\n__webpack_require__(1);";
        let tags = classify(code);
        assert!(tags.contains(&DeadCodeInjection));
        assert!(tags.contains(&HexEncoding));
        assert!(tags.contains(&Webpack));
    }

    #[test]
    fn test_constant_ternary_counts_as_dead_code() {
        assert!(classify("var a = !![] ? x : y;").contains(&DeadCodeInjection));
        assert!(!classify("var a = ok ? x : y;").contains(&DeadCodeInjection));
    }

    #[test]
    fn test_packer_signature() {
        let code = "eval(function(p,a,c,k,e,d){return p}('0',2,1,'x'.split('|'),0,{}))";
        assert!(classify(code).contains(&Packer));
    }
}
