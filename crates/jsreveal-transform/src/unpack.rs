//! Generic unpacking: whole-program wrappers that rebuild their payload and `eval` it.

use crate::const_eval::{evaluate, JsValue};
use crate::errors::StageResult;
use crate::rewrite::node_text;
use jsreveal_parser::literal::decode_string_literal;
use jsreveal_parser::walk::{called_property, code_children};
use jsreveal_parser::{check, parse, unwrap_parens, EditSet, SourceTree};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use tree_sitter::Node;

/// Nested wrappers beyond this depth are left packed.
const MAX_LAYERS: usize = 8;

const BASE62: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

static WORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?-u:\b\w+\b)").expect("valid packer word regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackOutcome {
    pub code: String,
    pub description: String,
    pub layers: usize,
}

/// Stage 1 collaborator. `Ok(None)` means nothing was packed.
///
/// Implementations return `StageError::Parse` for input they cannot read; any other error is
/// treated as a defect and aborts the pipeline call.
pub trait Unpacker: Send + Sync {
    fn name(&self) -> &str;

    fn unpack(&self, code: &str) -> StageResult<Option<UnpackOutcome>>;
}

/// Dean Edwards' P.A.C.K.E.R. plus plain `eval("...")` wrappers.
#[derive(Debug, Default, Clone, Copy)]
pub struct PackerUnpacker;

impl Unpacker for PackerUnpacker {
    fn name(&self) -> &str {
        "packer"
    }

    fn unpack(&self, code: &str) -> StageResult<Option<UnpackOutcome>> {
        let mut current = code.to_string();
        let mut packer_layers = 0;
        let mut eval_layers = 0;

        for _ in 0..MAX_LAYERS {
            let tree = parse(&current)?;
            let Some((edits, kind)) = unwrap_once(&tree) else {
                break;
            };
            let next = edits.apply(&current);
            if next == current || !check(&next) {
                break;
            }
            match kind {
                Layer::Packer => packer_layers += 1,
                Layer::Eval => eval_layers += 1,
            }
            current = next;
        }

        let layers = packer_layers + eval_layers;
        if layers == 0 {
            return Ok(None);
        }
        debug!(packer_layers, eval_layers, "unpacked wrappers");

        let mut parts = Vec::new();
        if packer_layers > 0 {
            parts.push(format!("{} Packer layers", packer_layers));
        }
        if eval_layers > 0 {
            parts.push(format!("{} eval string wrappers", eval_layers));
        }
        Ok(Some(UnpackOutcome {
            code: current,
            description: format!("Unpacked {}", parts.join(" and ")),
            layers,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layer {
    Packer,
    Eval,
}

/// Edits replacing the first top-level `eval(...)` statement with its payload.
fn unwrap_once(tree: &SourceTree) -> Option<(EditSet, Layer)> {
    let source = tree.source();
    for statement in code_children(tree.root()) {
        if statement.kind() != "expression_statement" {
            continue;
        }
        let Some(call) = code_children(statement).into_iter().next().map(unwrap_parens) else {
            continue;
        };
        if call.kind() != "call_expression" {
            continue;
        }
        let callee = call.child_by_field_name("function").map(unwrap_parens);
        if callee.map(|c| node_text(c, source)) != Some("eval") {
            continue;
        }
        let Some(argument) = call
            .child_by_field_name("arguments")
            .and_then(|a| code_children(a).into_iter().next())
            .map(unwrap_parens)
        else {
            continue;
        };

        let unpacked = match argument.kind() {
            "call_expression" => packer_payload(argument, source).map(|p| (p, Layer::Packer)),
            "string" => decode_string_literal(node_text(argument, source))
                .filter(|p| check(p))
                .map(|p| (p, Layer::Eval)),
            _ => None,
        };
        if let Some((payload, layer)) = unpacked {
            let mut edits = EditSet::new();
            edits.replace(statement.byte_range(), payload);
            return Some((edits, layer));
        }
    }
    None
}

fn is_packer_function(function: Node<'_>, source: &str) -> bool {
    if !matches!(function.kind(), "function_expression" | "function") {
        return false;
    }
    let Some(params) = function.child_by_field_name("parameters") else {
        return false;
    };
    let names: Vec<&str> = code_children(params)
        .into_iter()
        .map(|p| node_text(p, source))
        .collect();
    names.len() >= 4 && names[..4] == ["p", "a", "c", "k"]
}

/// Rebuilds the payload of `function(p,a,c,k,e,d){...}('payload', radix, count, 'w|o|r|d'.split('|'), ...)`.
fn packer_payload(call: Node<'_>, source: &str) -> Option<String> {
    let function = unwrap_parens(call.child_by_field_name("function")?);
    if !is_packer_function(function, source) {
        return None;
    }
    let args = code_children(call.child_by_field_name("arguments")?);
    let payload = decode_string_literal(node_text(*args.first()?, source))?;
    let radix = number_arg(*args.get(1)?, source)?;
    let count = number_arg(*args.get(2)?, source)?;
    let words = keyword_list(*args.get(3)?, source)?;
    unpack_words(&payload, radix, count, &words)
}

fn number_arg(node: Node<'_>, source: &str) -> Option<usize> {
    match evaluate(node, source)? {
        JsValue::Number(n) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => {
            Some(n as usize)
        }
        _ => None,
    }
}

fn keyword_list(node: Node<'_>, source: &str) -> Option<Vec<String>> {
    let node = unwrap_parens(node);
    if node.kind() != "call_expression" || called_property(node, source) != Some("split") {
        return None;
    }
    let object = node.child_by_field_name("function")?.child_by_field_name("object")?;
    let joined = decode_string_literal(node_text(object, source))?;
    let separator = code_children(node.child_by_field_name("arguments")?)
        .into_iter()
        .next()
        .and_then(|a| decode_string_literal(node_text(a, source)))?;
    if separator.is_empty() {
        return None;
    }
    Some(joined.split(separator.as_str()).map(str::to_string).collect())
}

/// Inverse of the packer's base encoding: digits, then lowercase, then uppercase letters.
pub fn decode_word_index(word: &str, radix: usize) -> Option<usize> {
    if radix < 2 || radix > BASE62.len() {
        return None;
    }
    let alphabet = &BASE62[..radix];
    word.chars().try_fold(0usize, |acc, c| {
        let digit = alphabet.find(c)?;
        acc.checked_mul(radix)?.checked_add(digit)
    })
}

pub fn unpack_words(payload: &str, radix: usize, count: usize, words: &[String]) -> Option<String> {
    if radix < 2 || radix > BASE62.len() {
        return None;
    }
    let unpacked = WORD.replace_all(payload, |caps: &regex::Captures<'_>| {
        let word = &caps[0];
        decode_word_index(word, radix)
            .filter(|i| *i < count)
            .and_then(|i| words.get(i))
            .filter(|w| !w.is_empty())
            .cloned()
            .unwrap_or_else(|| word.to_string())
    });
    Some(unpacked.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PACKED: &str = r"eval(function(p,a,c,k,e,d){e=function(c){return c.toString(36)};if(!''.replace(/^/,String)){while(c--){d[c.toString(a)]=k[c]||c.toString(a)}k=[function(e){return d[e]}];e=function(){return'\\w+'};c=1};while(c--){if(k[c]){p=p.replace(new RegExp('\\b'+e(c)+'\\b','g'),k[c])}}return p}('0 1=2;3(1)',4,4,'var|greeting|10|alert'.split('|'),0,{}))";

    #[test]
    fn test_word_index_bases() {
        assert_eq!(decode_word_index("z", 36), Some(35));
        assert_eq!(decode_word_index("A", 62), Some(36));
        assert_eq!(decode_word_index("10", 62), Some(62));
        assert_eq!(decode_word_index("Z", 36), None);
    }

    #[test]
    fn test_unpack_packer() {
        let outcome = PackerUnpacker.unpack(PACKED).unwrap().unwrap();
        assert_eq!(outcome.code, "var greeting=10;alert(greeting)");
        assert_eq!(outcome.layers, 1);
        assert!(outcome.description.contains("Packer"));
    }

    #[test]
    fn test_unwrap_eval_string() {
        let outcome = PackerUnpacker
            .unpack("eval(\"console.log('x')\");")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.code, "console.log('x')");
        assert!(!outcome.description.contains("Packer"));
    }

    #[test]
    fn test_nothing_packed() {
        assert_eq!(PackerUnpacker.unpack("eval(userInput);").unwrap(), None);
        assert_eq!(PackerUnpacker.unpack("eval('not js (');").unwrap(), None);
    }

    #[test]
    fn test_unparsable_input_is_recoverable() {
        assert!(PackerUnpacker.unpack("eval(").unwrap_err().is_recoverable());
    }
}
