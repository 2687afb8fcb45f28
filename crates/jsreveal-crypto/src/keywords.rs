//! Keyword and library-signature scan over raw source text.
//!
//! Catches plain mentions (`'sha1'`, `"RSA-OAEP"`, a comment naming Rijndael) that the syntax-tree
//! pass has no call or table to anchor on.

use crate::rules::CryptoRules;
use jsreveal_core::{CodeLocation, CryptoAlgorithm, DetectedLibrary};
use regex::Regex;
use tracing::{debug, warn};

const KEYWORD_CONFIDENCE: f64 = 0.4;
const KEYWORD_CONFIDENCE_MAX: f64 = 0.6;
const LIBRARY_CONFIDENCE_MAX: f64 = 0.95;

#[derive(Debug, Clone, Copy)]
struct Hit {
    rule: usize,
    start: usize,
    end: usize,
}

/// Compiled keyword rules. Build once per rule set and reuse across scans.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    patterns: Vec<(usize, Regex)>,
}

impl KeywordMatcher {
    pub fn new(rules: &CryptoRules) -> Self {
        let mut patterns = Vec::new();
        for (index, rule) in rules.keywords.iter().enumerate() {
            if rules.is_non_algorithm(&rule.name) {
                continue;
            }
            let alternatives: Vec<String> = rule
                .keywords
                .iter()
                .filter(|k| !k.is_empty() && !rules.is_non_algorithm(k))
                .map(|k| regex::escape(k))
                .collect();
            if alternatives.is_empty() {
                continue;
            }
            let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
            match Regex::new(&pattern) {
                Ok(regex) => patterns.push((index, regex)),
                Err(err) => warn!(rule = %rule.name, error = %err, "skipping keyword rule"),
            }
        }
        Self { patterns }
    }

    pub fn scan(&self, code: &str, file: &str, rules: &CryptoRules) -> Vec<CryptoAlgorithm> {
        let hits: Vec<Hit> = self
            .patterns
            .iter()
            .flat_map(|(rule, regex)| {
                regex.find_iter(code).map(move |m| Hit {
                    rule: *rule,
                    start: m.start(),
                    end: m.end(),
                })
            })
            .collect();

        // `des` inside `des-ede3` belongs to 3DES, not to DES.
        let shadowed = |hit: &Hit| {
            hits.iter().any(|other| {
                other.rule != hit.rule
                    && other.start <= hit.start
                    && other.end >= hit.end
                    && other.end - other.start > hit.end - hit.start
            })
        };

        let mut found = Vec::new();
        for (rule_index, _) in &self.patterns {
            let own: Vec<&Hit> = hits
                .iter()
                .filter(|h| h.rule == *rule_index && !shadowed(h))
                .collect();
            let Some(first) = own.first() else {
                continue;
            };
            let Some(rule) = rules.keywords.get(*rule_index) else {
                continue;
            };
            let confidence = (KEYWORD_CONFIDENCE + 0.05 * (own.len() - 1) as f64)
                .min(KEYWORD_CONFIDENCE_MAX);
            let (line, column) = line_column(code, first.start);
            found.push(CryptoAlgorithm::new(
                rule.name.clone(),
                rule.kind,
                confidence,
                format!(
                    "Keyword \"{}\" mentioned {} time(s)",
                    &code[first.start..first.end],
                    own.len()
                ),
                CodeLocation::new(file, line, column),
            ));
        }
        debug!(algorithms = found.len(), "keyword scan finished");
        found
    }
}

fn line_column(code: &str, offset: usize) -> (usize, usize) {
    let before = &code[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);
    (line, before[line_start..].chars().count() + 1)
}

pub fn detect_by_keywords(code: &str, file: &str, rules: &CryptoRules) -> Vec<CryptoAlgorithm> {
    KeywordMatcher::new(rules).scan(code, file, rules)
}

/// Libraries whose signatures appear in `code`. More matching signatures raise the confidence.
pub fn detect_libraries(code: &str, rules: &CryptoRules) -> Vec<DetectedLibrary> {
    rules
        .libraries
        .iter()
        .filter_map(|library| {
            let matched: Vec<&String> = library
                .patterns
                .iter()
                .filter(|p| !p.is_empty() && code.contains(p.as_str()))
                .collect();
            let evidence = matched.first()?;
            let confidence = (library.base_confidence + 0.05 * (matched.len() - 1) as f64)
                .min(LIBRARY_CONFIDENCE_MAX);
            Some(DetectedLibrary {
                name: library.name.clone(),
                confidence,
                evidence: evidence.to_string(),
            })
        })
        .collect()
}
