//! Strength scoring over security issues.
//!
//! Four factors start at 100. Every issue lands in exactly one factor, chosen by keywords in its
//! text, and costs that factor a penalty scaled by severity. The overall score is the mean of the
//! factors, capped below "strong" by any high issue and below "moderate" by any critical one.

use jsreveal_core::{
    CryptoAlgorithm, SecurityIssue, Severity, Strength, StrengthAssessment, StrengthFactors,
};
use std::collections::HashSet;
use tracing::debug;

const STRONG_MIN: u32 = 85;
const MODERATE_MIN: u32 = 60;
const WEAK_MIN: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Factor {
    Algorithm,
    Mode,
    KeySize,
    Implementation,
}

/// Checked in order; the first factor with a matching keyword takes the issue.
const CATEGORY_KEYWORDS: [(Factor, &[&str]); 4] = [
    (Factor::KeySize, &["key size", "key length", "-bit"]),
    (Factor::Mode, &["mode", "padding", "initialization vector"]),
    (
        Factor::Implementation,
        &["hardcoded", "math.random", "custom", "implementation"],
    ),
    (
        Factor::Algorithm,
        &["broken", "hash function", "cipher", "deprecated", "collision"],
    ),
];

pub fn penalty(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => 50,
        Severity::High => 30,
        Severity::Medium => 15,
        Severity::Low => 5,
    }
}

pub fn classify_issue(issue: &SecurityIssue) -> Factor {
    let text = issue.issue.to_ascii_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map_or(Factor::Implementation, |(factor, _)| *factor)
}

fn factor_mut(factors: &mut StrengthFactors, factor: Factor) -> &mut u32 {
    match factor {
        Factor::Algorithm => &mut factors.algorithm,
        Factor::Mode => &mut factors.mode,
        Factor::KeySize => &mut factors.key_size,
        Factor::Implementation => &mut factors.implementation,
    }
}

pub fn analyze_strength(
    algorithms: &[CryptoAlgorithm],
    issues: &[SecurityIssue],
) -> StrengthAssessment {
    if issues.is_empty() {
        return StrengthAssessment::default();
    }

    let mut factors = StrengthFactors::default();
    let mut critical_factors = HashSet::new();
    let mut criticals = 0;
    let mut highs = 0;
    for issue in issues {
        let factor = classify_issue(issue);
        let slot = factor_mut(&mut factors, factor);
        *slot = slot.saturating_sub(penalty(issue.severity));
        if issue.severity == Severity::Critical {
            criticals += 1;
            critical_factors.insert(factor);
        } else if issue.severity == Severity::High {
            highs += 1;
        }
    }

    let total = factors.algorithm + factors.mode + factors.key_size + factors.implementation;
    let mut score = ((total as f64) / 4.0).round().clamp(0.0, 100.0) as u32;
    if criticals > 0 {
        score = score.min(MODERATE_MIN - 1);
    } else if highs > 0 {
        score = score.min(STRONG_MIN - 1);
    }
    let overall = if criticals >= 2 && critical_factors.len() >= 2 {
        score = score.min(WEAK_MIN - 1);
        Strength::Broken
    } else if score >= STRONG_MIN {
        Strength::Strong
    } else if score >= MODERATE_MIN {
        Strength::Moderate
    } else if score >= WEAK_MIN {
        Strength::Weak
    } else {
        Strength::Broken
    };

    debug!(
        algorithms = algorithms.len(),
        issues = issues.len(),
        score,
        %overall,
        "strength assessed"
    );
    StrengthAssessment {
        overall,
        score,
        factors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn issue(severity: Severity, text: &str) -> SecurityIssue {
        SecurityIssue::new(severity, text, "fix it")
    }

    #[test]
    fn test_no_issues_is_strong() {
        let assessment = analyze_strength(&[], &[]);
        assert_eq!(assessment.overall, Strength::Strong);
        assert_eq!(assessment.score, 100);
        assert_eq!(assessment.factors, StrengthFactors::default());
    }

    #[test]
    fn test_issue_classification() {
        assert_eq!(
            classify_issue(&issue(Severity::High, "Short key size: 64-bit AES key")),
            Factor::KeySize
        );
        assert_eq!(
            classify_issue(&issue(Severity::High, "ECB mode leaks plaintext patterns")),
            Factor::Mode
        );
        assert_eq!(
            classify_issue(&issue(Severity::High, "Broken hash function MD5")),
            Factor::Algorithm
        );
        assert_eq!(
            classify_issue(&issue(Severity::High, "Hardcoded key material in source")),
            Factor::Implementation
        );
        assert_eq!(
            classify_issue(&issue(Severity::Low, "Something unusual")),
            Factor::Implementation
        );
    }

    #[test]
    fn test_ecb_with_short_key_is_moderate() {
        let issues = vec![
            issue(Severity::High, "ECB mode leaks plaintext patterns"),
            issue(Severity::Medium, "Missing padding (NoPadding) on AES"),
            issue(Severity::High, "Short key size: 64-bit AES key is below the 128-bit minimum"),
        ];
        let assessment = analyze_strength(&[], &issues);
        assert_eq!(assessment.factors.mode, 55);
        assert_eq!(assessment.factors.key_size, 70);
        assert_eq!(assessment.score, 81);
        assert_eq!(assessment.overall, Strength::Moderate);
    }

    #[test]
    fn test_broken_hash_alone_is_moderate() {
        let assessment = analyze_strength(
            &[],
            &[issue(Severity::High, "Broken hash function MD5: practical collision attacks exist")],
        );
        assert_eq!(assessment.factors.algorithm, 70);
        assert_eq!(assessment.score, 84);
        assert_eq!(assessment.overall, Strength::Moderate);
    }

    #[test]
    fn test_criticals_across_factors_are_broken() {
        let issues = vec![
            issue(Severity::Critical, "RC4 is a broken cipher"),
            issue(Severity::Critical, "Short key size: 512-bit RSA key"),
        ];
        let assessment = analyze_strength(&[], &issues);
        assert_eq!(assessment.overall, Strength::Broken);
        assert!(assessment.score < 40);
    }

    #[test]
    fn test_factors_clamp_at_zero() {
        let issues: Vec<SecurityIssue> = (0..5)
            .map(|_| issue(Severity::Critical, "DES is a broken cipher"))
            .collect();
        let assessment = analyze_strength(&[], &issues);
        assert_eq!(assessment.factors.algorithm, 0);
        assert_eq!(assessment.score, 59);
        assert_eq!(assessment.overall, Strength::Weak);
    }

    #[test]
    fn test_low_issues_stay_strong() {
        let assessment = analyze_strength(&[], &[issue(Severity::Low, "Library version unknown")]);
        assert_eq!(assessment.factors.implementation, 95);
        assert_eq!(assessment.score, 99);
        assert_eq!(assessment.overall, Strength::Strong);
    }

    #[test]
    fn test_penalties_are_ordered() {
        assert!(penalty(Severity::Critical) > penalty(Severity::High));
        assert!(penalty(Severity::High) > penalty(Severity::Medium));
        assert!(penalty(Severity::Medium) > penalty(Severity::Low));
    }
}
