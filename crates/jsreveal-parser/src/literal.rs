//! Decoding and rendering of JavaScript literals.

use num_bigint::BigInt;
use num_traits::ToPrimitive;

#[derive(Debug, Clone, PartialEq)]
pub enum NumberLiteral {
    Number(f64),
    BigInt(BigInt),
}

/// Decodes a quoted string literal (`'...'` or `"..."`), resolving every escape sequence.
///
/// Returns `None` for legacy octal escapes and for lone surrogates, which have no faithful
/// representation in a Rust `String`.
pub fn decode_string_literal(raw: &str) -> Option<String> {
    let mut chars = raw.chars();
    let quote = chars.next()?;
    if !(quote == '"' || quote == '\'') || raw.len() < 2 || !raw.ends_with(quote) {
        return None;
    }
    decode_escapes(&raw[1..raw.len() - 1])
}

/// Resolves escape sequences in the body of a string literal.
pub fn decode_escapes(body: &str) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '\\' {
            push_char(&mut units, c);
            continue;
        }
        let esc = chars.next()?;
        match esc {
            'n' => units.push(0x0a),
            'r' => units.push(0x0d),
            't' => units.push(0x09),
            'b' => units.push(0x08),
            'f' => units.push(0x0c),
            'v' => units.push(0x0b),
            '0' => {
                if chars.peek().map_or(false, |d| d.is_ascii_digit()) {
                    return None;
                }
                units.push(0);
            }
            '1'..='9' => return None,
            'x' => {
                let hi = chars.next()?.to_digit(16)?;
                let lo = chars.next()?.to_digit(16)?;
                units.push((hi * 16 + lo) as u16);
            }
            'u' => {
                if chars.peek() == Some(&'{') {
                    chars.next();
                    let mut value: u32 = 0;
                    let mut digits = 0;
                    loop {
                        let d = chars.next()?;
                        if d == '}' {
                            break;
                        }
                        value = value.checked_mul(16)?.checked_add(d.to_digit(16)?)?;
                        digits += 1;
                    }
                    if digits == 0 {
                        return None;
                    }
                    push_char(&mut units, char::from_u32(value)?);
                } else {
                    let mut value: u32 = 0;
                    for _ in 0..4 {
                        value = value * 16 + chars.next()?.to_digit(16)?;
                    }
                    units.push(value as u16);
                }
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            other => push_char(&mut units, other),
        }
    }

    String::from_utf16(&units).ok()
}

fn push_char(units: &mut Vec<u16>, c: char) {
    let mut buf = [0u16; 2];
    units.extend_from_slice(c.encode_utf16(&mut buf));
}

/// Renders `value` as a string literal using `quote`, escaping only what must be escaped plus
/// control and invisible formatting characters.
pub fn render_string_literal(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{8}' => out.push_str("\\b"),
            '\u{b}' => out.push_str("\\v"),
            '\u{c}' => out.push_str("\\f"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                out.push_str(&format!("\\x{:02x}", c as u32));
            }
            '\u{2028}' | '\u{2029}' | '\u{200b}'..='\u{200f}' | '\u{feff}' => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// True when the literal body uses `\x` or `\u` escapes.
pub fn has_encoded_escapes(raw: &str) -> bool {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'\\' {
            if bytes[i + 1] == b'x' || bytes[i + 1] == b'u' {
                return true;
            }
            i += 2;
            continue;
        }
        i += 1;
    }
    false
}

pub fn parse_number_literal(raw: &str) -> Option<NumberLiteral> {
    let cleaned: String = raw.chars().filter(|c| *c != '_').collect();
    if cleaned.is_empty() {
        return None;
    }

    if let Some(digits) = cleaned.strip_suffix('n') {
        let (radix, body) = split_radix(digits);
        let value = BigInt::parse_bytes(body.as_bytes(), radix)?;
        return Some(NumberLiteral::BigInt(value));
    }

    let (radix, body) = split_radix(&cleaned);
    if radix != 10 {
        let value = BigInt::parse_bytes(body.as_bytes(), radix)?;
        return Some(NumberLiteral::Number(value.to_f64()?));
    }

    // Legacy octal: 017 == 15, but 018 is decimal.
    if cleaned.len() > 1
        && cleaned.starts_with('0')
        && cleaned.bytes().all(|b| b.is_ascii_digit())
    {
        if cleaned.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
            let value = BigInt::parse_bytes(cleaned[1..].as_bytes(), 8)?;
            return Some(NumberLiteral::Number(value.to_f64()?));
        }
        return cleaned.parse::<f64>().ok().map(NumberLiteral::Number);
    }

    if !cleaned
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    cleaned.parse::<f64>().ok().map(NumberLiteral::Number)
}

fn split_radix(text: &str) -> (u32, &str) {
    let lower = text.get(..2).map(|p| p.to_ascii_lowercase());
    match lower.as_deref() {
        Some("0x") => (16, &text[2..]),
        Some("0o") => (8, &text[2..]),
        Some("0b") => (2, &text[2..]),
        _ => (10, text),
    }
}

/// JavaScript `Number::toString` for the range where Rust's shortest round-trip formatting agrees
/// with it. Values that JavaScript would print in exponent form yield `None`.
pub fn number_to_js_string(value: f64) -> Option<String> {
    if value.is_nan() {
        return Some("NaN".to_string());
    }
    if value.is_infinite() {
        return Some(if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string());
    }
    if value == 0.0 {
        return Some("0".to_string());
    }
    let magnitude = value.abs();
    if magnitude >= 1e21 {
        return None;
    }
    if value.fract() == 0.0 {
        return Some(format!("{}", value));
    }
    if magnitude < 1e-6 {
        return None;
    }
    Some(format!("{}", value))
}

pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Identifiers in the `_0x1a2b` style emitted by javascript-obfuscator.
pub fn is_hex_identifier(name: &str) -> bool {
    name.strip_prefix("_0x")
        .map_or(false, |rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_escapes() {
        assert_eq!(
            decode_string_literal(r#""\x68\x65\x6c\x6c\x6f""#).as_deref(),
            Some("hello")
        );
        assert_eq!(
            decode_string_literal(r"'A\u{42}\'c'").as_deref(),
            Some("AB'c")
        );
        assert_eq!(
            decode_string_literal(r#""\uD83D\uDE00""#).as_deref(),
            Some("\u{1F600}")
        );
        assert_eq!(decode_string_literal(r#""\uD83D""#), None);
        assert_eq!(decode_string_literal(r#""\101""#), None);
        assert_eq!(decode_string_literal("plain"), None);
    }

    #[test]
    fn test_render_string_literal() {
        assert_eq!(render_string_literal("a\"b\n", '"'), r#""a\"b\n""#);
        assert_eq!(render_string_literal("it's", '\''), r"'it\'s'");
        assert_eq!(render_string_literal("\u{200b}", '"'), r#""\u200b""#);
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(parse_number_literal("0x1f"), Some(NumberLiteral::Number(31.0)));
        assert_eq!(parse_number_literal("0b101"), Some(NumberLiteral::Number(5.0)));
        assert_eq!(parse_number_literal("017"), Some(NumberLiteral::Number(15.0)));
        assert_eq!(parse_number_literal("018"), Some(NumberLiteral::Number(18.0)));
        assert_eq!(parse_number_literal("1_000"), Some(NumberLiteral::Number(1000.0)));
        assert_eq!(parse_number_literal(".5"), Some(NumberLiteral::Number(0.5)));
        assert_eq!(parse_number_literal("1e3"), Some(NumberLiteral::Number(1000.0)));
        assert_eq!(
            parse_number_literal("0xffn"),
            Some(NumberLiteral::BigInt(BigInt::from(255)))
        );
        assert_eq!(parse_number_literal("inf"), None);
    }

    #[test]
    fn test_number_to_js_string() {
        assert_eq!(number_to_js_string(3.0).as_deref(), Some("3"));
        assert_eq!(number_to_js_string(-0.0).as_deref(), Some("0"));
        assert_eq!(number_to_js_string(0.5).as_deref(), Some("0.5"));
        assert_eq!(
            number_to_js_string(0.1 + 0.2).as_deref(),
            Some("0.30000000000000004")
        );
        assert_eq!(number_to_js_string(1e-7), None);
        assert_eq!(number_to_js_string(1e21), None);
    }

    #[test]
    fn test_identifiers() {
        assert!(is_valid_identifier("$foo_1"));
        assert!(!is_valid_identifier("1abc"));
        assert!(!is_valid_identifier("a-b"));
        assert!(!is_valid_identifier(""));
        assert!(is_hex_identifier("_0x4a2f"));
        assert!(!is_hex_identifier("_0x"));
        assert!(!is_hex_identifier("_0xzz"));
    }
}
