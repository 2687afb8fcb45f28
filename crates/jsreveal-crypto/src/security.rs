//! Rule-based security evaluation of detected crypto usage.
//!
//! Rules are independent: one algorithm can trip several of them. Source-level rules (hardcoded
//! keys, `Math.random`, static IVs) read the code itself and report at most once each.

use crate::rules::{base_name, CryptoRules};
use jsreveal_core::{CryptoAlgorithm, CryptoParameters, CryptoType, SecurityIssue, Severity};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Modes that never pad.
const UNPADDED_MODES: [&str; 6] = ["GCM", "CTR", "CCM", "OFB", "CFB", "OCB"];
const BLOCK_CIPHERS: [&str; 4] = ["AES", "DES", "3DES", "Blowfish"];

static HARDCODED_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ix)
        \b\w*(?:key|secret|passphrase|password)\w*\s*[:=]\s*
            (?:CryptoJS\.)?(?:enc\.\w+\.parse|Buffer\.from)\(\s*["'`][^"'`]{4,}["'`]
        | createCipheriv\(\s*["'][^"']+["']\s*,\s*["'][^"']+["']
        | CryptoJS\.\w+\.(?:encrypt|decrypt)\([^,()]+,\s*["'][^"']{4,}["']
        "#,
    )
    .expect("valid hardcoded key regex")
});

static RANDOM_NEAR_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:key|\biv\b|salt|nonce|secret)[^\n]*Math\.random|Math\.random[^\n]*(?:key|\biv\b|salt|nonce|secret)",
    )
    .expect("valid random source regex")
});

static STATIC_IV: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?ix)
        \biv\s*[:=]\s*
        (?: ["'][^"']*["']
          | \[\s*0(?:\s*,\s*0)*\s*\]
          | new\s+Uint8Array\(\s*\d+\s*\)
          | (?:CryptoJS\.)?enc\.\w+\.parse\(\s*["']
          | Buffer\.(?:alloc|from)\(\s*(?:\d+|["'])
        )"#,
    )
    .expect("valid static iv regex")
});

fn is_literal_iv(iv: &str) -> bool {
    let iv = iv.trim();
    iv.starts_with('"')
        || iv.starts_with('\'')
        || iv.starts_with('`')
        || (iv.starts_with('[') && iv.trim_matches(|c| c == '[' || c == ']').split(',').all(|v| v.trim() == "0"))
}

fn needs_padding(algorithm: &CryptoAlgorithm, params: &CryptoParameters) -> bool {
    algorithm.kind == CryptoType::Symmetric
        && BLOCK_CIPHERS
            .iter()
            .any(|c| c.eq_ignore_ascii_case(base_name(&algorithm.name)))
        && !params
            .mode
            .as_deref()
            .map_or(false, |m| UNPADDED_MODES.iter().any(|u| u.eq_ignore_ascii_case(m)))
}

fn parameter_issues(
    algorithm: &CryptoAlgorithm,
    params: &CryptoParameters,
    rules: &CryptoRules,
    issues: &mut Vec<SecurityIssue>,
) {
    let name = algorithm.name.as_str();
    if params.mode.as_deref().map_or(false, |m| m.eq_ignore_ascii_case("ECB")) {
        issues.push(
            SecurityIssue::new(
                Severity::High,
                format!("ECB mode leaks plaintext patterns: identical {} blocks encrypt identically", name),
                "Use an authenticated mode such as GCM, or CBC with a random IV and a MAC",
            )
            .for_algorithm(name),
        );
    }

    match params.padding.as_deref() {
        Some(padding) if padding.eq_ignore_ascii_case("NoPadding") => issues.push(
            SecurityIssue::new(
                Severity::Medium,
                format!("Missing padding (NoPadding) on {}: padding oracle and truncation risk", name),
                "Use PKCS#7 padding or switch to an authenticated mode that needs none",
            )
            .for_algorithm(name),
        ),
        None if needs_padding(algorithm, params) => issues.push(
            SecurityIssue::new(
                Severity::Medium,
                format!("Padding scheme not specified for {}: padding oracle risk", name),
                "Configure PKCS#7 padding explicitly and authenticate ciphertexts",
            )
            .for_algorithm(name),
        ),
        _ => {}
    }

    if let (Some(bits), Some(minimum)) = (params.key_size, rules.min_key_size(name)) {
        if bits < minimum {
            let severity = if bits < minimum / 2 {
                Severity::Critical
            } else {
                Severity::High
            };
            issues.push(
                SecurityIssue::new(
                    severity,
                    format!(
                        "Short key size: {}-bit {} key is below the {}-bit minimum",
                        bits, name, minimum
                    ),
                    format!("Use keys of at least {} bits", minimum),
                )
                .for_algorithm(name),
            );
        }
    }

    if params.iv.as_deref().map_or(false, is_literal_iv) {
        issues.push(
            SecurityIssue::new(
                Severity::Medium,
                format!("Static initialization vector passed to {}", name),
                "Generate a fresh random IV for every encryption",
            )
            .for_algorithm(name),
        );
    }
}

fn source_issues(code: &str, issues: &mut Vec<SecurityIssue>) {
    if HARDCODED_KEY.is_match(code) {
        issues.push(SecurityIssue::new(
            Severity::High,
            "Hardcoded key material in source",
            "Load keys from a key store or derive them with a KDF at runtime",
        ));
    }
    if RANDOM_NEAR_KEY.is_match(code) {
        issues.push(SecurityIssue::new(
            Severity::High,
            "Math.random is not a secure random source for keys, IVs or salts",
            "Use crypto.getRandomValues or crypto.randomBytes",
        ));
    }
    let iv_reported = issues
        .iter()
        .any(|i| i.issue.starts_with("Static initialization vector"));
    if !iv_reported && STATIC_IV.is_match(code) {
        issues.push(SecurityIssue::new(
            Severity::Medium,
            "Static initialization vector in source",
            "Generate a fresh random IV for every encryption",
        ));
    }
}

pub fn evaluate_security(
    algorithms: &[CryptoAlgorithm],
    code: &str,
    rules: &CryptoRules,
) -> Vec<SecurityIssue> {
    let mut issues = Vec::new();
    for algorithm in algorithms {
        let name = algorithm.name.as_str();
        if rules.is_broken_hash(name) {
            issues.push(
                SecurityIssue::new(
                    Severity::High,
                    format!("Broken hash function {}: practical collision attacks exist", name),
                    "Use SHA-256, SHA-3 or BLAKE2; use a password hash such as bcrypt or Argon2 for passwords",
                )
                .for_algorithm(name),
            );
        }
        if rules.is_broken_cipher(name) {
            issues.push(
                SecurityIssue::new(
                    Severity::Critical,
                    format!("{} is a broken cipher and offers no real confidentiality", name),
                    "Use AES-GCM or ChaCha20-Poly1305",
                )
                .for_algorithm(name),
            );
        }
        if algorithm.kind == CryptoType::Custom {
            issues.push(
                SecurityIssue::new(
                    Severity::Medium,
                    format!("Custom cryptographic implementation ({}) has not been vetted", name),
                    "Replace hand-rolled primitives with a reviewed library",
                )
                .for_algorithm(name),
            );
        }
        if let Some(params) = &algorithm.parameters {
            parameter_issues(algorithm, params, rules, &mut issues);
        }
    }
    source_issues(code, &mut issues);
    debug!(issues = issues.len(), "security evaluation finished");
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsreveal_core::CodeLocation;
    use pretty_assertions::assert_eq;

    fn with_params(name: &str, kind: CryptoType, params: CryptoParameters) -> CryptoAlgorithm {
        let mut algorithm = CryptoAlgorithm::new(name, kind, 0.9, "test", CodeLocation::default());
        algorithm.parameters = Some(params);
        algorithm
    }

    fn plain(name: &str, kind: CryptoType) -> CryptoAlgorithm {
        CryptoAlgorithm::new(name, kind, 0.9, "test", CodeLocation::default())
    }

    #[test]
    fn test_ecb_no_padding_short_key() {
        let aes = with_params(
            "AES",
            CryptoType::Symmetric,
            CryptoParameters {
                mode: Some("ECB".to_string()),
                padding: Some("NoPadding".to_string()),
                key_size: Some(64),
                ..Default::default()
            },
        );
        let issues = evaluate_security(&[aes], "", &CryptoRules::default());
        let texts: Vec<&str> = issues.iter().map(|i| i.issue.as_str()).collect();
        assert_eq!(issues.len(), 3, "{:?}", texts);
        assert!(texts[0].contains("ECB mode"));
        assert!(texts[1].contains("Missing padding"));
        assert!(texts[2].contains("Short key size"));
        assert_eq!(issues[2].severity, Severity::High);
        assert!(issues.iter().all(|i| i.algorithm.as_deref() == Some("AES")));
        assert!(issues.iter().all(|i| !i.recommendation.is_empty()));
    }

    #[test]
    fn test_broken_primitives() {
        let issues = evaluate_security(
            &[
                plain("MD5", CryptoType::Hash),
                plain("SHA-1", CryptoType::Hash),
                plain("RC4", CryptoType::Symmetric),
                plain("DES", CryptoType::Symmetric),
                plain("SHA-256", CryptoType::Hash),
            ],
            "",
            &CryptoRules::default(),
        );
        let severities: Vec<Severity> = issues.iter().map(|i| i.severity).collect();
        assert_eq!(
            severities,
            vec![Severity::High, Severity::High, Severity::Critical, Severity::Critical]
        );
        assert!(issues[0].issue.contains("MD5"));
        assert!(issues[2].issue.contains("RC4"));
    }

    #[test]
    fn test_very_short_rsa_key_is_critical() {
        let rsa = with_params(
            "RSA",
            CryptoType::Asymmetric,
            CryptoParameters {
                key_size: Some(512),
                ..Default::default()
            },
        );
        let issues = evaluate_security(&[rsa], "", &CryptoRules::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Critical);
        assert!(issues[0].issue.contains("2048-bit minimum"));
    }

    #[test]
    fn test_unspecified_padding_only_for_padded_modes() {
        let rules = CryptoRules::default();
        let gcm = with_params(
            "AES",
            CryptoType::Symmetric,
            CryptoParameters {
                mode: Some("GCM".to_string()),
                key_size: Some(256),
                ..Default::default()
            },
        );
        assert!(evaluate_security(&[gcm], "", &rules).is_empty());

        let cbc = with_params(
            "AES",
            CryptoType::Symmetric,
            CryptoParameters {
                mode: Some("CBC".to_string()),
                ..Default::default()
            },
        );
        let issues = evaluate_security(&[cbc], "", &rules);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].issue.contains("padding oracle"));
    }

    #[test]
    fn test_source_rules() {
        let code = "var key = CryptoJS.enc.Utf8.parse('0123456789abcdef');\n\
                    var iv = CryptoJS.enc.Utf8.parse('0000000000000000');\n\
                    var salt = Math.random().toString(36);";
        let issues = evaluate_security(&[], code, &CryptoRules::default());
        let texts: Vec<&str> = issues.iter().map(|i| i.issue.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Hardcoded key material in source",
                "Math.random is not a secure random source for keys, IVs or salts",
                "Static initialization vector in source",
            ]
        );
        assert!(issues.iter().all(|i| i.algorithm.is_none()));
    }

    #[test]
    fn test_clean_code_has_no_issues() {
        let aes = with_params(
            "AES",
            CryptoType::Symmetric,
            CryptoParameters {
                mode: Some("GCM".to_string()),
                key_size: Some(256),
                iv: Some("iv".to_string()),
                ..Default::default()
            },
        );
        let code = "const iv = crypto.getRandomValues(new Uint8Array(12));";
        assert!(evaluate_security(&[aes], code, &CryptoRules::default()).is_empty());
    }

    #[test]
    fn test_custom_cipher_flagged() {
        let issues = evaluate_security(
            &[plain("Custom XOR cipher", CryptoType::Custom)],
            "",
            &CryptoRules::default(),
        );
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Medium);
    }
}
