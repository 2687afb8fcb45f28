//! Compile-time evaluation of constant JavaScript expressions.
//!
//! Only operations whose result is fully determined by literal operands are evaluated. Anything
//! that could observe the environment (identifiers, calls, objects other than `[]`) yields `None`.

use jsreveal_parser::literal::{
    decode_escapes, decode_string_literal, number_to_js_string, parse_number_literal,
    render_string_literal, NumberLiteral,
};
use jsreveal_parser::walk::code_children;
use jsreveal_parser::{unwrap_parens, MAX_DEPTH};
use num_bigint::BigInt;
use num_traits::{ToPrimitive, Zero};
use std::cmp::Ordering;
use tree_sitter::Node;

#[derive(Debug, Clone, PartialEq)]
pub enum JsValue {
    Number(f64),
    BigInt(BigInt),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    /// `[]`, which obfuscators lean on for `![]` and `!![]`.
    EmptyArray,
}

impl JsValue {
    pub fn truthy(&self) -> bool {
        match self {
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::BigInt(b) => !b.is_zero(),
            Self::Str(s) => !s.is_empty(),
            Self::Bool(b) => *b,
            Self::Null | Self::Undefined => false,
            Self::EmptyArray => true,
        }
    }

    pub fn to_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::BigInt(_) => None,
            Self::Str(s) => Some(string_to_number(s)),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::Null | Self::EmptyArray => Some(0.0),
            Self::Undefined => Some(f64::NAN),
        }
    }

    pub fn to_js_string(&self) -> Option<String> {
        match self {
            Self::Number(n) => number_to_js_string(*n),
            Self::BigInt(b) => Some(b.to_string()),
            Self::Str(s) => Some(s.clone()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Null => Some("null".to_string()),
            Self::Undefined => Some("undefined".to_string()),
            Self::EmptyArray => Some(String::new()),
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
            Self::Undefined => "undefined",
            Self::Null | Self::EmptyArray => "object",
        }
    }

    /// Source text for the value, or `None` when no plain literal expresses it.
    pub fn render(&self, quote: char) -> Option<String> {
        match self {
            Self::Number(n) if n.is_finite() => number_to_js_string(*n),
            Self::Number(_) => None,
            Self::BigInt(b) => Some(format!("{}n", b)),
            Self::Str(s) => Some(render_string_literal(s, quote)),
            Self::Bool(b) => Some(b.to_string()),
            Self::Null => Some("null".to_string()),
            Self::Undefined => Some("undefined".to_string()),
            Self::EmptyArray => None,
        }
    }

    fn is_stringish(&self) -> bool {
        matches!(self, Self::Str(_) | Self::EmptyArray)
    }
}

pub fn is_literal_kind(kind: &str) -> bool {
    matches!(
        kind,
        "number" | "string" | "true" | "false" | "null" | "undefined"
    )
}

pub fn evaluate(node: Node<'_>, source: &str) -> Option<JsValue> {
    evaluate_at(node, source, 0)
}

/// Truthiness of a constant condition, looking through parentheses.
pub fn evaluate_condition(node: Node<'_>, source: &str) -> Option<bool> {
    evaluate(unwrap_parens(node), source).map(|v| v.truthy())
}

fn evaluate_at(node: Node<'_>, source: &str, depth: usize) -> Option<JsValue> {
    if depth > MAX_DEPTH {
        return None;
    }
    let text = &source[node.byte_range()];
    match node.kind() {
        "number" => match parse_number_literal(text)? {
            NumberLiteral::Number(n) => Some(JsValue::Number(n)),
            NumberLiteral::BigInt(b) => Some(JsValue::BigInt(b)),
        },
        "string" => decode_string_literal(text).map(JsValue::Str),
        "template_string" => {
            let plain = code_children(node)
                .iter()
                .all(|c| matches!(c.kind(), "string_fragment" | "escape_sequence"));
            if !plain || text.len() < 2 {
                return None;
            }
            decode_escapes(&text[1..text.len() - 1]).map(JsValue::Str)
        }
        "true" => Some(JsValue::Bool(true)),
        "false" => Some(JsValue::Bool(false)),
        "null" => Some(JsValue::Null),
        "undefined" => Some(JsValue::Undefined),
        "array" if code_children(node).is_empty() => Some(JsValue::EmptyArray),
        "parenthesized_expression" => {
            let inner = code_children(node);
            if inner.len() != 1 {
                return None;
            }
            evaluate_at(inner[0], source, depth + 1)
        }
        "unary_expression" => {
            let op = node.child_by_field_name("operator")?;
            let arg = node.child_by_field_name("argument")?;
            let value = evaluate_at(arg, source, depth + 1)?;
            eval_unary(&source[op.byte_range()], value)
        }
        "binary_expression" => {
            let op = &source[node.child_by_field_name("operator")?.byte_range()];
            let left = evaluate_at(node.child_by_field_name("left")?, source, depth + 1)?;
            match op {
                "&&" => {
                    if !left.truthy() {
                        return Some(left);
                    }
                    evaluate_at(node.child_by_field_name("right")?, source, depth + 1)
                }
                "||" => {
                    if left.truthy() {
                        return Some(left);
                    }
                    evaluate_at(node.child_by_field_name("right")?, source, depth + 1)
                }
                "??" => {
                    if !matches!(left, JsValue::Null | JsValue::Undefined) {
                        return Some(left);
                    }
                    evaluate_at(node.child_by_field_name("right")?, source, depth + 1)
                }
                _ => {
                    let right =
                        evaluate_at(node.child_by_field_name("right")?, source, depth + 1)?;
                    eval_binary(op, &left, &right)
                }
            }
        }
        _ => None,
    }
}

pub fn eval_unary(op: &str, value: JsValue) -> Option<JsValue> {
    match op {
        "!" => Some(JsValue::Bool(!value.truthy())),
        "-" => match value {
            JsValue::BigInt(b) => Some(JsValue::BigInt(-b)),
            other => Some(JsValue::Number(-other.to_number()?)),
        },
        "+" => Some(JsValue::Number(value.to_number()?)),
        "~" => match value {
            JsValue::BigInt(b) => Some(JsValue::BigInt(-b - 1)),
            other => Some(JsValue::Number(!to_int32(other.to_number()?) as f64)),
        },
        "typeof" => Some(JsValue::Str(value.type_of().to_string())),
        "void" => Some(JsValue::Undefined),
        _ => None,
    }
}

pub fn eval_binary(op: &str, left: &JsValue, right: &JsValue) -> Option<JsValue> {
    match op {
        "+" => {
            if left.is_stringish() || right.is_stringish() {
                let mut s = left.to_js_string()?;
                s.push_str(&right.to_js_string()?);
                return Some(JsValue::Str(s));
            }
            match (left, right) {
                (JsValue::BigInt(a), JsValue::BigInt(b)) => Some(JsValue::BigInt(a + b)),
                (JsValue::BigInt(_), _) | (_, JsValue::BigInt(_)) => None,
                _ => Some(JsValue::Number(left.to_number()? + right.to_number()?)),
            }
        }
        "-" | "*" | "/" | "%" | "**" => match (left, right) {
            (JsValue::BigInt(a), JsValue::BigInt(b)) => bigint_arith(op, a, b),
            (JsValue::BigInt(_), _) | (_, JsValue::BigInt(_)) => None,
            _ => {
                let a = left.to_number()?;
                let b = right.to_number()?;
                let value = match op {
                    "-" => a - b,
                    "*" => a * b,
                    "/" => a / b,
                    "%" => a % b,
                    _ => {
                        if a.is_nan() || b.is_nan() {
                            f64::NAN
                        } else {
                            a.powf(b)
                        }
                    }
                };
                Some(JsValue::Number(value))
            }
        },
        "&" | "|" | "^" | "<<" | ">>" | ">>>" => {
            if matches!(left, JsValue::BigInt(_)) || matches!(right, JsValue::BigInt(_)) {
                return None;
            }
            let a = to_int32(left.to_number()?);
            let b = to_int32(right.to_number()?);
            let shift = (b as u32) & 31;
            let value = match op {
                "&" => (a & b) as f64,
                "|" => (a | b) as f64,
                "^" => (a ^ b) as f64,
                "<<" => a.wrapping_shl(shift) as f64,
                ">>" => (a >> shift) as f64,
                _ => ((a as u32) >> shift) as f64,
            };
            Some(JsValue::Number(value))
        }
        "<" | ">" | "<=" | ">=" => {
            let ordering = compare(left, right)?;
            let result = match ordering {
                None => false,
                Some(ord) => match op {
                    "<" => ord == Ordering::Less,
                    ">" => ord == Ordering::Greater,
                    "<=" => ord != Ordering::Greater,
                    _ => ord != Ordering::Less,
                },
            };
            Some(JsValue::Bool(result))
        }
        "===" => strict_equals(left, right).map(JsValue::Bool),
        "!==" => strict_equals(left, right).map(|b| JsValue::Bool(!b)),
        "==" => loose_equals(left, right).map(JsValue::Bool),
        "!=" => loose_equals(left, right).map(|b| JsValue::Bool(!b)),
        _ => None,
    }
}

fn bigint_arith(op: &str, a: &BigInt, b: &BigInt) -> Option<JsValue> {
    let value = match op {
        "-" => a - b,
        "*" => a * b,
        "/" => {
            if b.is_zero() {
                return None;
            }
            a / b
        }
        "%" => {
            if b.is_zero() {
                return None;
            }
            a % b
        }
        _ => {
            let exp = b.to_u32().filter(|e| *e <= 4096)?;
            a.pow(exp)
        }
    };
    Some(JsValue::BigInt(value))
}

/// `Some(None)` means the comparison is defined but unordered (a NaN operand).
fn compare(left: &JsValue, right: &JsValue) -> Option<Option<Ordering>> {
    match (left, right) {
        (JsValue::Str(a), JsValue::Str(b)) => {
            if a.is_ascii() && b.is_ascii() {
                Some(Some(a.cmp(b)))
            } else {
                None
            }
        }
        (JsValue::BigInt(a), JsValue::BigInt(b)) => Some(Some(a.cmp(b))),
        (JsValue::BigInt(_), _) | (_, JsValue::BigInt(_)) => None,
        _ => {
            let a = left.to_number()?;
            let b = right.to_number()?;
            Some(a.partial_cmp(&b))
        }
    }
}

fn strict_equals(left: &JsValue, right: &JsValue) -> Option<bool> {
    match (left, right) {
        (JsValue::EmptyArray, _) | (_, JsValue::EmptyArray) => None,
        (JsValue::Number(a), JsValue::Number(b)) => Some(a == b),
        (JsValue::BigInt(a), JsValue::BigInt(b)) => Some(a == b),
        (JsValue::Str(a), JsValue::Str(b)) => Some(a == b),
        (JsValue::Bool(a), JsValue::Bool(b)) => Some(a == b),
        (JsValue::Null, JsValue::Null) | (JsValue::Undefined, JsValue::Undefined) => Some(true),
        _ => Some(false),
    }
}

fn loose_equals(left: &JsValue, right: &JsValue) -> Option<bool> {
    use JsValue::*;
    match (left, right) {
        (EmptyArray, _) | (_, EmptyArray) => None,
        (Null | Undefined, Null | Undefined) => Some(true),
        (Null | Undefined, _) | (_, Null | Undefined) => Some(false),
        (BigInt(_), _) | (_, BigInt(_)) => {
            if std::mem::discriminant(left) == std::mem::discriminant(right) {
                strict_equals(left, right)
            } else {
                None
            }
        }
        _ if std::mem::discriminant(left) == std::mem::discriminant(right) => {
            strict_equals(left, right)
        }
        _ => Some(left.to_number()? == right.to_number()?),
    }
}

pub fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let truncated = n.trunc();
    let modulo = truncated.rem_euclid(4_294_967_296.0);
    modulo as u32 as i32
}

fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    let lower = trimmed.to_ascii_lowercase();
    for (prefix, radix) in [("0x", 16), ("0o", 8), ("0b", 2)] {
        if let Some(digits) = lower.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix)
                .map(|v| v as f64)
                .unwrap_or(f64::NAN);
        }
    }
    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return f64::NAN;
    }
    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsreveal_parser::parse;

    fn eval_expr(expr: &str) -> Option<JsValue> {
        let source = format!("({});", expr);
        let tree = parse(&source).unwrap();
        let stmt = tree.root().named_child(0).unwrap();
        let node = stmt.named_child(0).unwrap();
        evaluate(node, &source)
    }

    #[test]
    fn test_arithmetic_and_concat() {
        assert_eq!(eval_expr("1 + 2 * 3"), Some(JsValue::Number(7.0)));
        assert_eq!(eval_expr("'a' + 1 + 2"), Some(JsValue::Str("a12".into())));
        assert_eq!(eval_expr("0x10 - 1"), Some(JsValue::Number(15.0)));
        assert_eq!(eval_expr("7 % -3"), Some(JsValue::Number(1.0)));
        assert_eq!(eval_expr("2 ** 10"), Some(JsValue::Number(1024.0)));
    }

    #[test]
    fn test_obfuscator_booleans() {
        assert_eq!(eval_expr("!![]"), Some(JsValue::Bool(true)));
        assert_eq!(eval_expr("![]"), Some(JsValue::Bool(false)));
        assert_eq!(eval_expr("[] + []"), Some(JsValue::Str(String::new())));
        assert_eq!(eval_expr("+[]"), Some(JsValue::Number(0.0)));
        assert_eq!(eval_expr("!0"), Some(JsValue::Bool(true)));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval_expr("5 > 3"), Some(JsValue::Bool(true)));
        assert_eq!(eval_expr("1 === 2"), Some(JsValue::Bool(false)));
        assert_eq!(eval_expr("'1' == 1"), Some(JsValue::Bool(true)));
        assert_eq!(eval_expr("null == undefined"), Some(JsValue::Bool(true)));
        assert_eq!(eval_expr("'b' > 'a'"), Some(JsValue::Bool(true)));
        assert_eq!(eval_expr("[] === []"), None);
    }

    #[test]
    fn test_bitwise_and_bigint() {
        assert_eq!(eval_expr("-1 >>> 28"), Some(JsValue::Number(15.0)));
        assert_eq!(eval_expr("1 << 31"), Some(JsValue::Number(-2147483648.0)));
        assert_eq!(eval_expr("~5"), Some(JsValue::Number(-6.0)));
        assert_eq!(
            eval_expr("2n ** 64n"),
            Some(JsValue::BigInt(BigInt::from(18446744073709551616u128)))
        );
        assert_eq!(eval_expr("1n + 1"), None);
    }

    #[test]
    fn test_non_constant() {
        assert_eq!(eval_expr("a + 1"), None);
        assert_eq!(eval_expr("f()"), None);
        assert_eq!(eval_expr("typeof 1"), Some(JsValue::Str("number".into())));
        assert_eq!(eval_expr("void 0"), Some(JsValue::Undefined));
    }

    #[test]
    fn test_render() {
        assert_eq!(JsValue::Number(-3.0).render('"').as_deref(), Some("-3"));
        assert_eq!(JsValue::Number(f64::NAN).render('"'), None);
        assert_eq!(JsValue::Str("x'y".into()).render('\'').as_deref(), Some(r"'x\'y'"));
        assert_eq!(JsValue::EmptyArray.render('"'), None);
    }
}
