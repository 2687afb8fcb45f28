//! Hidden payloads spelled in zero-width characters.
//!
//! A run of U+200B (bit 0) and U+200C (bit 1) encodes bytes most-significant bit first.

const ZERO: char = '\u{200b}';
const ONE: char = '\u{200c}';

/// Shorter runs show up in ordinary text and carry no whole byte.
pub const MIN_RUN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvisibleDecode {
    /// Source with every marker run removed.
    pub code: String,
    pub payloads: Vec<String>,
}

pub fn detect(code: &str) -> bool {
    runs(code).into_iter().any(|(start, end)| {
        code[start..end].chars().count() >= MIN_RUN
    })
}

fn runs(code: &str) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in code.char_indices() {
        let marker = c == ZERO || c == ONE;
        match (marker, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                out.push((s, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, code.len()));
    }
    out
}

fn decode_run(run: &str) -> Option<String> {
    let bits: Vec<u8> = run.chars().map(|c| u8::from(c == ONE)).collect();
    if bits.len() < MIN_RUN {
        return None;
    }
    let bytes: Vec<u8> = bits
        .chunks_exact(8)
        .map(|chunk| chunk.iter().fold(0u8, |acc, b| (acc << 1) | b))
        .collect();
    let text = String::from_utf8(bytes).ok()?;
    if text.chars().any(|c| c.is_control() && !c.is_whitespace()) {
        return None;
    }
    Some(text)
}

/// Strips marker runs of at least [`MIN_RUN`] characters and decodes the ones that spell text.
pub fn decode(code: &str) -> Option<InvisibleDecode> {
    let long_runs: Vec<(usize, usize)> = runs(code)
        .into_iter()
        .filter(|(s, e)| code[*s..*e].chars().count() >= MIN_RUN)
        .collect();
    if long_runs.is_empty() {
        return None;
    }
    let mut cleaned = String::with_capacity(code.len());
    let mut payloads = Vec::new();
    let mut pos = 0;
    for (start, end) in long_runs {
        cleaned.push_str(&code[pos..start]);
        payloads.extend(decode_run(&code[start..end]));
        pos = end;
    }
    cleaned.push_str(&code[pos..]);
    Some(InvisibleDecode {
        code: cleaned,
        payloads,
    })
}

/// Encodes `text` the way [`decode`] expects. Test helper and fixture generator.
pub fn encode(text: &str) -> String {
    text.bytes()
        .flat_map(|b| (0..8).rev().map(move |i| if (b >> i) & 1 == 1 { ONE } else { ZERO }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_needs_a_full_byte() {
        assert!(!detect("plain"));
        assert!(!detect("a\u{200b}b"));
        assert!(detect(&format!("x{}y", encode("A"))));
    }

    #[test]
    fn test_decode_payload_and_strip() {
        let code = format!("var a = 1;{}\nvar b = 2;", encode("hi"));
        let decoded = decode(&code).unwrap();
        assert_eq!(decoded.code, "var a = 1;\nvar b = 2;");
        assert_eq!(decoded.payloads, vec!["hi".to_string()]);
    }

    #[test]
    fn test_binary_noise_is_stripped_not_reported() {
        let noise: String = std::iter::repeat(ZERO).take(16).collect();
        let decoded = decode(&format!("a{}b", noise)).unwrap();
        assert_eq!(decoded.code, "ab");
        assert!(decoded.payloads.is_empty());
    }
}
