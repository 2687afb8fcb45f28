//! Readability and confidence heuristics. Neither is a semantic guarantee.

use jsreveal_core::{clamp_confidence, TransformationRecord};
use jsreveal_parser::literal::is_hex_identifier;
use jsreveal_parser::parse_lenient;
use tree_sitter::Node;

const LONG_LINE: usize = 120;
/// Syntax depth at which the structure score reaches zero.
const DEEP_NESTING: usize = 60;

fn max_depth(root: Node<'_>) -> usize {
    let mut cursor = root.walk();
    let mut depth = 0;
    let mut max = 0;
    loop {
        if cursor.goto_first_child() {
            depth += 1;
            max = max.max(depth);
            continue;
        }
        loop {
            if cursor.goto_next_sibling() {
                break;
            }
            if !cursor.goto_parent() {
                return max;
            }
            depth -= 1;
        }
    }
}

/// Scores `code` in `[0, 1]` from line lengths, mangled names, comments and nesting depth.
pub fn readability_score(code: &str) -> f64 {
    let lines: Vec<&str> = code.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.is_empty() {
        return 0.5;
    }
    let short_lines = lines.iter().filter(|l| l.chars().count() <= LONG_LINE).count();
    let line_score = short_lines as f64 / lines.len() as f64;

    let Ok(tree) = parse_lenient(code) else {
        return 0.5 * line_score;
    };

    let mut identifiers = 0usize;
    let mut mangled = 0usize;
    let mut comments = 0usize;
    tree.walk(|node| match node.kind() {
        "identifier" | "property_identifier" => {
            identifiers += 1;
            if is_hex_identifier(tree.text(node)) {
                mangled += 1;
            }
        }
        "comment" => comments += 1,
        _ => {}
    });

    let identifier_score = if identifiers == 0 {
        1.0
    } else {
        1.0 - mangled as f64 / identifiers as f64
    };
    let comment_score = (comments as f64 * 5.0 / lines.len() as f64).min(1.0);
    let structure_score =
        1.0 - (max_depth(tree.root()) as f64 / DEEP_NESTING as f64).min(1.0);

    let score = 0.35 * line_score
        + 0.35 * identifier_score
        + 0.1 * comment_score
        + 0.2 * structure_score;
    score.clamp(0.0, 1.0)
}

/// Pipeline confidence from the audit trail, blended with the advanced stage's own estimate
/// when that stage ran.
pub fn pipeline_confidence(
    transformations: &[TransformationRecord],
    warnings: usize,
    readability: f64,
    advanced: Option<f64>,
) -> f64 {
    let attempted = transformations.len();
    let applied = transformations.iter().filter(|t| t.success).count();
    let success_ratio = if attempted == 0 {
        0.0
    } else {
        applied as f64 / attempted as f64
    };
    let base = 0.3 + 0.4 * success_ratio + 0.05 * applied.min(6) as f64
        - 0.05 * warnings as f64
        + 0.2 * (readability - 0.5);
    let blended = match advanced {
        Some(stage) => (base + stage) / 2.0,
        None => base,
    };
    clamp_confidence(blended)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_code_scores_higher() {
        let clean = "// add two numbers\nfunction add(a, b) {\n  return a + b;\n}\n";
        let mangled = format!(
            "function _0x1a(_0x2b,_0x3c){{return _0x2b+_0x3c;}}{}",
            ";".repeat(200)
        );
        assert!(readability_score(clean) > readability_score(&mangled));
        assert!(readability_score(clean) <= 1.0);
    }

    #[test]
    fn test_empty_code() {
        assert_eq!(readability_score(""), 0.5);
    }

    #[test]
    fn test_confidence_bounds() {
        let ok: Vec<TransformationRecord> = (0..10)
            .map(|i| TransformationRecord::succeeded(format!("t{}", i), ""))
            .collect();
        assert_eq!(pipeline_confidence(&ok, 0, 1.0, None), 0.95);

        let failed = vec![TransformationRecord::failed("t", "parse error")];
        assert_eq!(pipeline_confidence(&failed, 20, 0.0, None), 0.1);
    }

    #[test]
    fn test_warnings_lower_confidence() {
        let records = vec![
            TransformationRecord::succeeded("a", ""),
            TransformationRecord::failed("b", ""),
        ];
        let quiet = pipeline_confidence(&records, 0, 0.5, None);
        let noisy = pipeline_confidence(&records, 3, 0.5, None);
        assert!(noisy < quiet);
        assert!(pipeline_confidence(&records, 0, 0.5, Some(0.9)) > quiet);
    }
}
