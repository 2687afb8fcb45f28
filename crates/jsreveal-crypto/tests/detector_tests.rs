use anyhow::anyhow;
use jsreveal_core::{
    ChatMessage, ChatResponse, CompletionError, CompletionProvider, CryptoOptions, Strength,
};
use jsreveal_crypto::sbox::AES_SBOX;
use jsreveal_crypto::{CryptoDetector, CryptoRules};
use std::sync::Arc;

const ECB_PROGRAM: &str = r#"var key = CryptoJS.enc.Utf8.parse("12345678");
var encrypted = CryptoJS.AES.encrypt(data, key, {
  mode: CryptoJS.mode.ECB,
  padding: CryptoJS.pad.NoPadding
});"#;

struct CannedProvider(&'static str);

impl CompletionProvider for CannedProvider {
    fn chat(&self, _messages: &[ChatMessage]) -> Result<ChatResponse, CompletionError> {
        Ok(ChatResponse {
            content: self.0.to_string(),
        })
    }
}

struct DownProvider;

impl CompletionProvider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }

    fn chat(&self, _messages: &[ChatMessage]) -> Result<ChatResponse, CompletionError> {
        Err(CompletionError::Other(anyhow!("connection refused")))
    }
}

fn ai() -> CryptoOptions {
    CryptoOptions { use_ai: true }
}

#[test]
fn test_no_crypto_is_strong() {
    let mut detector = CryptoDetector::new();
    let result = detector.detect("function add(a, b) { return a + b; }", &CryptoOptions::default());
    assert!(result.algorithms.is_empty());
    assert!(result.libraries.is_empty());
    assert!(result.security.is_empty());
    assert_eq!(result.strength.overall, Strength::Strong);
    assert_eq!(result.strength.score, 100);
}

#[test]
fn test_aes_sbox_detected() {
    let entries: Vec<String> = AES_SBOX.iter().map(|v| v.to_string()).collect();
    let code = format!("const S = [\n{}\n];\nfunction sub(b) {{ return S[b]; }}", entries.join(","));
    let mut detector = CryptoDetector::new();
    let result = detector.detect(&code, &CryptoOptions::default());
    let sbox = result.find("AES S-box").expect("S-box finding");
    assert_eq!(sbox.location.line, 1);
}

#[test]
fn test_ecb_program_issues_and_strength() {
    let mut detector = CryptoDetector::new();
    let result = detector.detect(ECB_PROGRAM, &CryptoOptions::default());

    let aes = result.find("AES").expect("AES finding");
    let params = aes.parameters.as_ref().expect("AES parameters");
    assert_eq!(params.mode.as_deref(), Some("ECB"));
    assert_eq!(params.key_size, Some(64));

    let texts: Vec<&str> = result.security.iter().map(|i| i.issue.as_str()).collect();
    assert!(texts.iter().any(|t| t.contains("ECB mode")), "{:?}", texts);
    assert!(texts.iter().any(|t| t.contains("Missing padding")), "{:?}", texts);
    assert!(texts.iter().any(|t| t.contains("Short key size")), "{:?}", texts);
    assert!(texts.iter().any(|t| t.contains("Hardcoded key")), "{:?}", texts);

    assert_eq!(result.strength.overall, Strength::Moderate);
    assert_eq!(result.strength.score, 74);
    assert_eq!(result.libraries[0].name, "CryptoJS");
}

#[test]
fn test_broken_primitives_in_several_factors() {
    let code = "const c = crypto.createCipher('rc4', secret);\n\
                const pair = crypto.generateKeyPairSync('rsa', { modulusLength: 512 });";
    let mut detector = CryptoDetector::new();
    let result = detector.detect(code, &CryptoOptions::default());
    assert!(result.find("RC4").is_some());
    assert_eq!(
        result.find("RSA").and_then(|a| a.parameters.as_ref()).and_then(|p| p.key_size),
        Some(512)
    );
    assert_eq!(result.strength.overall, Strength::Broken);
    assert!(result.strength.score < 40);
}

#[test]
fn test_repeat_call_returns_cached_object() {
    let mut detector = CryptoDetector::new();
    let first = detector.detect(ECB_PROGRAM, &CryptoOptions::default());
    let second = detector.detect(ECB_PROGRAM, &CryptoOptions::default());
    assert!(Arc::ptr_eq(&first, &second));

    let elsewhere = detector.detect_in("other.js", ECB_PROGRAM, &CryptoOptions::default());
    assert!(!Arc::ptr_eq(&first, &elsewhere));
    assert_eq!(elsewhere.algorithms[0].location.file, "other.js");
    assert_eq!(detector.cache().len(), 2);
}

#[test]
fn test_ai_without_provider_keeps_static_results() {
    let mut detector = CryptoDetector::new();
    let result = detector.detect("var h = CryptoJS.MD5(pw);", &ai());
    assert!(result.find("MD5").is_some());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.starts_with("AI detection unavailable")));
}

#[test]
fn test_ai_provider_adds_findings() {
    let provider = CannedProvider(
        r#"{"algorithms": [{"name": "Blowfish", "type": "symmetric", "confidence": 0.7,
            "usage": "session cookie", "parameters": {"keySize": 64}}]}"#,
    );
    let mut detector = CryptoDetector::new().with_provider(Some(Arc::new(provider)));
    let result = detector.detect("var x = encode(cookie);", &ai());
    let blowfish = result.find("Blowfish").expect("AI finding");
    assert_eq!(blowfish.parameters.as_ref().and_then(|p| p.key_size), Some(64));
    assert!(result.security.iter().any(|i| i.issue.contains("Short key size")));
    assert!(result.warnings.is_empty());
}

#[test]
fn test_ai_invalid_response_contributes_nothing() {
    let provider = CannedProvider("I could not find any cryptography, sorry.");
    let mut detector = CryptoDetector::new().with_provider(Some(Arc::new(provider)));
    let result = detector.detect("var x = 1;", &ai());
    assert!(result.algorithms.is_empty());
    assert!(result.warnings.is_empty());
}

#[test]
fn test_ai_failure_is_a_warning() {
    let mut detector = CryptoDetector::new().with_provider(Some(Arc::new(DownProvider)));
    let result = detector.detect("var h = CryptoJS.SHA256(pw);", &ai());
    assert!(result.find("SHA-256").is_some());
    assert!(result.warnings[0].contains("connection refused"));
}

#[test]
fn test_malformed_input_still_detects() {
    let mut detector = CryptoDetector::new();
    let result = detector.detect("CryptoJS.MD5(pw); function (", &CryptoOptions::default());
    assert!(result.find("MD5").is_some());
    assert!(result.security.iter().any(|i| i.issue.contains("MD5")));
}

#[test]
fn test_custom_rules() {
    let rules = CryptoRules::from_json(r#"{"brokenHashes": ["SHA-256"]}"#).unwrap();
    let mut detector = CryptoDetector::with_rules(rules);
    let result = detector.detect("crypto.createHash('sha256')", &CryptoOptions::default());
    assert!(result.security.iter().any(|i| i.issue.contains("SHA-256")));
}

#[test]
fn test_hostile_parameters_do_not_abort_detection() {
    let mut detector = CryptoDetector::new();
    let sum = vec!["1"; 60_000].join("+");
    let deep = format!("CryptoJS.AES.encrypt(m, k, {{ keySize: {} }});", sum);
    let oversized = "CryptoJS.AES.encrypt(m, k, { keySize: 200000000 });\n\
                     for (var i = 0; i <= 4294967295; i++) { x ^= data[i]; }\n\
                     crypto.pbkdf2Sync(p, s, 1000, 4294967295, 'sha1');";
    for code in [deep.as_str(), oversized] {
        let result = detector.detect(code, &CryptoOptions::default());
        let aes = result.find("AES").unwrap();
        assert_eq!(aes.parameters.as_ref().and_then(|p| p.key_size), None);
        assert!(!result
            .security
            .iter()
            .any(|i| i.issue.starts_with("Short key size")));
    }
}
