use super::DeobfuscationPass;
use crate::const_eval::{evaluate, JsValue};
use crate::errors::{AttemptResult, StageResult};
use crate::rewrite::{collect_top_down, finish, node_text};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use jsreveal_parser::literal::{decode_string_literal, has_encoded_escapes, render_string_literal};
use jsreveal_parser::walk::{called_property, code_children};
use jsreveal_parser::{parse, unwrap_parens};
use tree_sitter::Node;

/// Decodes escape-heavy literals and constant `fromCharCode`/`atob`/`unescape` calls.
pub struct StringDecodePass;

impl DeobfuscationPass for StringDecodePass {
    fn name(&self) -> &'static str {
        "string-decode"
    }

    fn description(&self) -> &'static str {
        "Decoded escaped and encoded string literals"
    }

    fn run(&self, code: &str) -> StageResult<AttemptResult> {
        let tree = parse(code)?;
        let edits = collect_top_down(&tree, decode_node);
        Ok(finish(code, &edits))
    }
}

fn decode_node(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "string" => decode_escaped_literal(node, source),
        "call_expression" => decode_call(node, source),
        _ => None,
    }
}

fn decode_escaped_literal(node: Node<'_>, source: &str) -> Option<String> {
    let raw = node_text(node, source);
    if !has_encoded_escapes(raw) {
        return None;
    }
    // Directive prologues change meaning when their spelling changes.
    if node.parent().map_or(false, |p| p.kind() == "expression_statement") {
        return None;
    }
    let quote = raw.chars().next()?;
    let decoded = decode_string_literal(raw)?;
    Some(render_string_literal(&decoded, quote))
}

fn string_args<'t>(call: Node<'t>) -> Option<Vec<Node<'t>>> {
    let args = call.child_by_field_name("arguments")?;
    Some(code_children(args))
}

fn decode_call(node: Node<'_>, source: &str) -> Option<String> {
    let callee = unwrap_parens(node.child_by_field_name("function")?);
    let callee_text = node_text(callee, source);
    let args = string_args(node)?;

    let decoded = if called_property(node, source) == Some("fromCharCode")
        && callee
            .child_by_field_name("object")
            .map_or(false, |o| node_text(o, source) == "String")
    {
        from_char_codes(&args, source)?
    } else if callee.kind() == "identifier" && args.len() == 1 {
        let JsValue::Str(arg) = evaluate(args[0], source)? else {
            return None;
        };
        match callee_text {
            "atob" => atob(&arg)?,
            "unescape" => unescape(&arg)?,
            _ => return None,
        }
    } else {
        return None;
    };
    Some(render_string_literal(&decoded, '"'))
}

fn from_char_codes(args: &[Node<'_>], source: &str) -> Option<String> {
    if args.is_empty() {
        return None;
    }
    let mut units = Vec::with_capacity(args.len());
    for arg in args {
        let JsValue::Number(n) = evaluate(*arg, source)? else {
            return None;
        };
        if !n.is_finite() || n.fract() != 0.0 {
            return None;
        }
        units.push(n.rem_euclid(65536.0) as u16);
    }
    String::from_utf16(&units).ok()
}

/// `atob` yields one char per decoded byte.
pub fn atob(encoded: &str) -> Option<String> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(&cleaned)
        .or_else(|_| STANDARD_NO_PAD.decode(cleaned.trim_end_matches('=')))
        .ok()?;
    Some(bytes.into_iter().map(char::from).collect())
}

pub fn unescape(encoded: &str) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(encoded.len());
    let chars: Vec<char> = encoded.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '%' {
            if chars.get(i + 1) == Some(&'u') {
                let hex: String = chars.iter().skip(i + 2).take(4).collect();
                if hex.len() == 4 {
                    if let Ok(v) = u16::from_str_radix(&hex, 16) {
                        units.push(v);
                        i += 6;
                        continue;
                    }
                }
            } else {
                let hex: String = chars.iter().skip(i + 1).take(2).collect();
                if hex.len() == 2 {
                    if let Ok(v) = u8::from_str_radix(&hex, 16) {
                        units.push(v as u16);
                        i += 3;
                        continue;
                    }
                }
            }
        }
        let mut buf = [0u16; 2];
        units.extend_from_slice(c.encode_utf16(&mut buf));
        i += 1;
    }
    String::from_utf16(&units).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(code: &str) -> String {
        StringDecodePass.run(code).unwrap().into_code(code)
    }

    #[test]
    fn test_escaped_literals() {
        assert_eq!(run(r#"var s = "\x68\x69";"#), r#"var s = "hi";"#);
        assert_eq!(run(r"var s = 'A\x27';"), r"var s = 'A\'';");
        assert_eq!(run(r#""\x75se strict";"#), r#""\x75se strict";"#);
    }

    #[test]
    fn test_decoding_calls() {
        assert_eq!(
            run("var s = String.fromCharCode(104, 0x69);"),
            r#"var s = "hi";"#
        );
        assert_eq!(run("var s = atob('aGVsbG8=');"), r#"var s = "hello";"#);
        assert_eq!(run("var s = unescape('%41%u0042c');"), r#"var s = "ABc";"#);
        assert_eq!(run("var s = atob(x);"), "var s = atob(x);");
    }

    #[test]
    fn test_atob_helpers() {
        assert_eq!(atob("aGk").as_deref(), Some("hi"));
        assert_eq!(atob("!!"), None);
        assert_eq!(unescape("100%").as_deref(), Some("100%"));
    }
}
