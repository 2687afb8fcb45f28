use jsreveal::emit::{OutputFormat, VerbosityLevel};
use jsreveal::{
    CryptoDetector, CryptoEmitter, CryptoOptions, DeobfuscateOptions, DeobfuscationEmitter,
    DeobfuscationPipeline, Emitter, EmitterConfig, ObfuscationTechnique, Strength,
};

const OBFUSCATED_CRYPTO: &str = r#"var _0x3a = ["\x41\x45\x53", "secret-key"];
var cipher = CryptoJS[_0x3a[0]].encrypt(payload, _0x3a[1], { mode: CryptoJS.mode.ECB });
var digest = CryptoJS.MD5(payload).toString();"#;

#[test]
fn test_deobfuscate_then_detect() {
    let mut pipeline = DeobfuscationPipeline::new();
    let result = pipeline
        .deobfuscate(OBFUSCATED_CRYPTO, &DeobfuscateOptions::default())
        .unwrap();
    assert!(result.has_technique(ObfuscationTechnique::HexEncoding));
    assert!(jsreveal::check(&result.code));

    let mut detector = CryptoDetector::new();
    let crypto = detector.detect(&result.code, &CryptoOptions::default());
    assert!(crypto.find("MD5").is_some());
    assert!(crypto.strength.overall != Strength::Strong);
}

#[test]
fn test_reports_render_for_pipeline_output() {
    let mut pipeline = DeobfuscationPipeline::new();
    let result = pipeline
        .deobfuscate("var a = 0x10 + 1;", &DeobfuscateOptions::default())
        .unwrap();
    let config = EmitterConfig::plain().with_verbosity(VerbosityLevel::Normal);
    let report = DeobfuscationEmitter::new(config.clone())
        .emit_to_string(&result)
        .unwrap();
    assert!(report.starts_with("=== Summary ==="));
    assert!(report.contains("=== Code ==="));

    let mut detector = CryptoDetector::new();
    let crypto = detector.detect(&result.code, &CryptoOptions::default());
    let json = CryptoEmitter::new(config.with_format(OutputFormat::Json))
        .emit_to_string(&crypto)
        .unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["strength"]["overall"], "strong");
}
