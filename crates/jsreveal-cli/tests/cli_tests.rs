use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const HEX_SCRIPT: &str = "var greeting = \"\\x68\\x65\\x6c\\x6c\\x6f\";\nconsole.log(greeting);\n";

const ECB_SCRIPT: &str = r#"var key = CryptoJS.enc.Utf8.parse("12345678");
var encrypted = CryptoJS.AES.encrypt(data, key, {
  mode: CryptoJS.mode.ECB,
  padding: CryptoJS.pad.NoPadding
});
"#;

fn jsreveal() -> Command {
    Command::cargo_bin("jsreveal").unwrap()
}

fn write_script(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_classify_lists_techniques() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "hex.js", HEX_SCRIPT);
    jsreveal()
        .arg("classify")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("hex-encoding"));
}

#[test]
fn test_deobfuscate_quiet_prints_code() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "hex.js", HEX_SCRIPT);
    jsreveal()
        .args(["deobfuscate", "--quiet"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"hello\""))
        .stdout(predicate::str::contains("=== Summary ===").not());
}

#[test]
fn test_deobfuscate_json_report() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "hex.js", HEX_SCRIPT);
    let output = jsreveal()
        .args(["deobfuscate", "--json"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(value["obfuscationTypes"]
        .as_array()
        .unwrap()
        .contains(&serde_json::json!("hex-encoding")));
    assert!(value["code"].as_str().unwrap().contains("hello"));
}

#[test]
fn test_deobfuscate_writes_output_file() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "hex.js", HEX_SCRIPT);
    let out = dir.path().join("clean.js");
    jsreveal()
        .arg("deobfuscate")
        .arg(&input)
        .arg("-o")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::contains("=== Summary ==="))
        .stdout(predicate::str::contains("=== Code ===").not())
        .stderr(predicate::str::contains("Deobfuscated code saved to"));
    let written = fs::read_to_string(&out).unwrap();
    assert!(written.contains("\"hello\""));
}

#[test]
fn test_llm_without_provider_degrades() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "hex.js", HEX_SCRIPT);
    jsreveal()
        .args(["deobfuscate", "--llm"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("LLM analysis unavailable"));
}

#[test]
fn test_crypto_json_report() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "ecb.js", ECB_SCRIPT);
    let output = jsreveal()
        .args(["crypto", "--json"])
        .arg(&input)
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["strength"]["overall"], "moderate");
    let algorithms = value["algorithms"].as_array().unwrap();
    assert!(algorithms.iter().any(|a| a["name"] == "AES"));
    assert!(algorithms[0]["location"]["file"]
        .as_str()
        .unwrap()
        .ends_with("ecb.js"));
}

#[test]
fn test_crypto_text_report_and_ai_warning() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "ecb.js", ECB_SCRIPT);
    jsreveal()
        .args(["crypto", "--ai"])
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("=== Security Issues ==="))
        .stdout(predicate::str::contains("[high] ECB mode"))
        .stdout(predicate::str::contains("AI detection unavailable"));
}

#[test]
fn test_crypto_custom_rules() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "hash.js", "const h = crypto.createHash('sha256');\n");
    let rules = write_script(&dir, "rules.json", r#"{"brokenHashes": ["SHA-256"]}"#);
    jsreveal()
        .arg("crypto")
        .arg(&input)
        .arg("--rules")
        .arg(&rules)
        .assert()
        .success()
        .stdout(predicate::str::contains("Broken hash function SHA-256"));
}

#[test]
fn test_crypto_invalid_rules_fail() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "hash.js", "const h = 1;\n");
    let rules = write_script(&dir, "rules.json", "{not json");
    jsreveal()
        .arg("crypto")
        .arg(&input)
        .arg("--rules")
        .arg(&rules)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid rules document"));
}

#[test]
fn test_missing_input_fails() {
    jsreveal()
        .args(["classify", "/nonexistent/input.js"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read"));
}

#[test]
fn test_optimize_prints_code() {
    let dir = TempDir::new().unwrap();
    let input = write_script(&dir, "branch.js", "if (true) { a(); } else { b(); }\n");
    jsreveal()
        .arg("optimize")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("a()"))
        .stdout(predicate::str::contains("b()").not());
}

#[test]
fn test_scan_walks_scripts_only() {
    let dir = TempDir::new().unwrap();
    write_script(&dir, "a.js", HEX_SCRIPT);
    fs::create_dir(dir.path().join("nested")).unwrap();
    fs::write(dir.path().join("nested").join("b.mjs"), ECB_SCRIPT).unwrap();
    write_script(&dir, "notes.txt", "MD5 everywhere");
    jsreveal()
        .arg("scan")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Scanned 2 file(s), 2 with findings"))
        .stdout(predicate::str::contains("notes.txt").not());
}

#[test]
fn test_scan_json() {
    let dir = TempDir::new().unwrap();
    write_script(&dir, "ecb.js", ECB_SCRIPT);
    let output = jsreveal()
        .args(["scan", "--json"])
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let entries = value.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert!(!entries[0]["crypto"]["security"].as_array().unwrap().is_empty());
}
