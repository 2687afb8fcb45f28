use super::DeobfuscationPass;
use crate::errors::{AttemptResult, StageResult};
use crate::rewrite::{collect_top_down, finish, node_text};
use jsreveal_parser::literal::{number_to_js_string, parse_number_literal, NumberLiteral};
use jsreveal_parser::parse;
use jsreveal_parser::walk::code_children;
use tree_sitter::Node;

/// Rewrites obfuscator literal idioms: `0x1f`, `!0`, `![]`, `void 0`.
pub struct LiteralPass;

impl DeobfuscationPass for LiteralPass {
    fn name(&self) -> &'static str {
        "literals"
    }

    fn description(&self) -> &'static str {
        "Normalized hex numbers and boolean/undefined idioms"
    }

    fn run(&self, code: &str) -> StageResult<AttemptResult> {
        let tree = parse(code)?;
        let edits = collect_top_down(&tree, rewrite_literal);
        Ok(finish(code, &edits))
    }
}

fn rewrite_literal(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "number" => decimal_number(node, source),
        "unary_expression" => boolean_idiom(node, source),
        _ => None,
    }
}

fn decimal_number(node: Node<'_>, source: &str) -> Option<String> {
    let raw = node_text(node, source);
    let prefixed = raw.len() > 1
        && raw.starts_with('0')
        && raw[1..].starts_with(|c: char| c.is_ascii_alphanumeric());
    if !prefixed {
        return None;
    }
    let decimal = match parse_number_literal(raw)? {
        NumberLiteral::BigInt(value) => return Some(format!("{}n", value)),
        NumberLiteral::Number(value) => number_to_js_string(value)?,
    };
    // `16.toString()` would read as a malformed decimal.
    let member_object = node.parent().map_or(false, |p| {
        p.kind() == "member_expression"
            && p.child_by_field_name("object").map_or(false, |o| o.id() == node.id())
    });
    if member_object && !decimal.contains('.') {
        return Some(format!("({})", decimal));
    }
    Some(decimal)
}

fn boolean_idiom(node: Node<'_>, source: &str) -> Option<String> {
    let op = node_text(node.child_by_field_name("operator")?, source);
    let arg = node.child_by_field_name("argument")?;
    let arg_text = node_text(arg, source).trim();
    match (op, arg.kind(), arg_text) {
        ("!", "number", "0") => Some("true".to_string()),
        ("!", "number", "1") => Some("false".to_string()),
        ("!", "array", _) if code_children(arg).is_empty() => Some("false".to_string()),
        ("!", "unary_expression", _) => {
            let inner_op = node_text(arg.child_by_field_name("operator")?, source);
            let inner = arg.child_by_field_name("argument")?;
            if inner_op == "!" && inner.kind() == "array" && code_children(inner).is_empty() {
                Some("true".to_string())
            } else {
                None
            }
        }
        ("void", "number", "0") => Some("undefined".to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run(code: &str) -> String {
        LiteralPass.run(code).unwrap().into_code(code)
    }

    #[test]
    fn test_hex_to_decimal() {
        assert_eq!(run("var a = 0x1f + 0o17 + 0b11;"), "var a = 31 + 15 + 3;");
        assert_eq!(run("var big = 0xffn;"), "var big = 255n;");
        assert_eq!(run("0x10.toString(2);"), "(16).toString(2);");
        assert_eq!(run("var plain = 10;"), "var plain = 10;");
    }

    #[test]
    fn test_boolean_idioms() {
        assert_eq!(run("var t = !0, f = !1;"), "var t = true, f = false;");
        assert_eq!(run("x = !![] && ![];"), "x = true && false;");
        assert_eq!(run("function f(){return!0}"), "function f(){return true}");
        assert_eq!(run("if (x === void 0) {}"), "if (x === undefined) {}");
    }

    #[test]
    fn test_unchanged_reports_unchanged() {
        assert_eq!(LiteralPass.run("a(b);").unwrap(), AttemptResult::Unchanged);
    }
}
