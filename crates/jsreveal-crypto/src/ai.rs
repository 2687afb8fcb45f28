//! Optional AI-assisted detection through a completion provider.
//!
//! The provider is asked for a JSON document; anything that is not one, or that has no
//! `algorithms` array, contributes nothing.

use crate::rules::canonical_algorithm;
use jsreveal_core::completion::{build_crypto_detection_prompt, first_json_object};
use jsreveal_core::{
    CodeLocation, CompletionError, CompletionProvider, CryptoAlgorithm, CryptoParameters,
    CryptoType,
};
use serde_json::Value;
use tracing::debug;

const DEFAULT_AI_CONFIDENCE: f64 = 0.5;

fn parse_entry(entry: &Value, file: &str) -> Option<CryptoAlgorithm> {
    let raw_name = entry.get("name")?.as_str()?.trim();
    if raw_name.is_empty() {
        return None;
    }
    let canonical = canonical_algorithm(raw_name);
    let name = canonical.map_or(raw_name, |(name, _)| name);
    let kind = entry
        .get("type")
        .and_then(Value::as_str)
        .and_then(CryptoType::parse)
        .or(canonical.map(|(_, kind)| kind))
        .unwrap_or(CryptoType::Custom);
    let confidence = entry
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(DEFAULT_AI_CONFIDENCE);
    let usage = entry
        .get("usage")
        .and_then(Value::as_str)
        .unwrap_or("Reported by AI analysis");

    let mut algorithm =
        CryptoAlgorithm::new(name, kind, confidence, usage, CodeLocation::new(file, 0, 0));
    algorithm.parameters = entry
        .get("parameters")
        .filter(|p| p.is_object())
        .and_then(|p| serde_json::from_value::<CryptoParameters>(p.clone()).ok())
        .filter(|p| !p.is_empty());
    Some(algorithm)
}

/// Algorithms listed in a provider response. Malformed entries are skipped one by one.
pub fn parse_ai_response(content: &str, file: &str) -> Vec<CryptoAlgorithm> {
    let Some(json) = first_json_object(content) else {
        return Vec::new();
    };
    let Ok(document) = serde_json::from_str::<Value>(json) else {
        debug!("AI crypto response is not valid JSON");
        return Vec::new();
    };
    let Some(entries) = document.get("algorithms").and_then(Value::as_array) else {
        debug!("AI crypto response has no algorithms array");
        return Vec::new();
    };
    entries.iter().filter_map(|e| parse_entry(e, file)).collect()
}

pub fn detect_with_ai(
    provider: &dyn CompletionProvider,
    code: &str,
    file: &str,
) -> Result<Vec<CryptoAlgorithm>, CompletionError> {
    let response = provider.chat(&build_crypto_detection_prompt(code))?;
    Ok(parse_ai_response(&response.content, file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parses_wrapped_json() {
        let content = r#"Here you go:
{"algorithms": [
  {"name": "aes-256-cbc", "type": "symmetric", "confidence": 0.8, "usage": "encrypts tokens",
   "parameters": {"mode": "CBC", "keySize": 256}},
  {"name": "sha1", "confidence": 1.4}
]}"#;
        let found = parse_ai_response(content, "app.js");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].name, "AES");
        assert_eq!(found[0].usage, "encrypts tokens");
        let params = found[0].parameters.as_ref().unwrap();
        assert_eq!(params.key_size, Some(256));
        assert_eq!(params.mode.as_deref(), Some("CBC"));
        assert_eq!(found[1].name, "SHA-1");
        assert_eq!(found[1].kind, CryptoType::Hash);
        assert_eq!(found[1].confidence, 1.0);
        assert_eq!(found[1].location.file, "app.js");
    }

    #[test]
    fn test_invalid_json_contributes_nothing() {
        assert!(parse_ai_response("no json here", "inline").is_empty());
        assert!(parse_ai_response("{not: valid", "inline").is_empty());
        assert!(parse_ai_response("{\"algorithms\": {\"name\": \"AES\"}}", "inline").is_empty());
        assert!(parse_ai_response("{\"result\": []}", "inline").is_empty());
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let content = r#"{"algorithms": [42, {"name": ""}, {"name": "Serpent", "parameters": "n/a"}]}"#;
        let found = parse_ai_response(content, "inline");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Serpent");
        assert_eq!(found[0].kind, CryptoType::Custom);
        assert_eq!(found[0].parameters, None);
    }
}
