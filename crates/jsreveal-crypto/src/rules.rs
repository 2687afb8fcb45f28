//! Detection rules: what counts as a primitive, a library, a broken choice or a short key.
//!
//! The built-in rule set is [`CryptoRules::default`]. Rules round-trip through JSON so a rule file
//! can replace them wholesale.

use crate::{CryptoError, Result};
use indexmap::IndexMap;
use jsreveal_core::CryptoType;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One algorithm and the words that name it in source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRule {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CryptoType,
    pub keywords: Vec<String>,
}

impl KeywordRule {
    fn new(name: &str, kind: CryptoType, keywords: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            kind,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibrarySignature {
    pub name: String,
    /// Substrings whose presence is evidence of the library.
    pub patterns: Vec<String>,
    pub base_confidence: f64,
}

impl LibrarySignature {
    fn new(name: &str, base_confidence: f64, patterns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            base_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CryptoRules {
    pub keywords: Vec<KeywordRule>,
    /// Words that turn up next to algorithm names but are modes or paddings, not algorithms.
    pub non_algorithm_keywords: Vec<String>,
    pub libraries: Vec<LibrarySignature>,
    pub broken_hashes: Vec<String>,
    pub broken_ciphers: Vec<String>,
    /// Minimum acceptable key size in bits, by algorithm name.
    pub min_key_sizes: IndexMap<String, u32>,
}

impl Default for CryptoRules {
    fn default() -> Self {
        use CryptoType::*;
        let keywords = vec![
            KeywordRule::new("AES", Symmetric, &["AES", "Rijndael"]),
            KeywordRule::new("DES", Symmetric, &["DES"]),
            KeywordRule::new("3DES", Symmetric, &["TripleDES", "3DES", "DESede", "des-ede3"]),
            KeywordRule::new("RC4", Symmetric, &["RC4", "ARC4"]),
            KeywordRule::new("Blowfish", Symmetric, &["Blowfish"]),
            KeywordRule::new("ChaCha20", Symmetric, &["ChaCha20", "XChaCha20"]),
            KeywordRule::new("Rabbit", Symmetric, &["Rabbit"]),
            KeywordRule::new("RSA", Asymmetric, &["RSA", "RSA-OAEP", "RSASSA", "JSEncrypt"]),
            KeywordRule::new("ECDSA", Asymmetric, &["ECDSA", "secp256k1", "P-256"]),
            KeywordRule::new("ECDH", Asymmetric, &["ECDH", "X25519"]),
            KeywordRule::new("Ed25519", Asymmetric, &["Ed25519"]),
            KeywordRule::new("MD5", Hash, &["MD5"]),
            KeywordRule::new("SHA-1", Hash, &["SHA1", "SHA-1"]),
            KeywordRule::new("SHA-256", Hash, &["SHA256", "SHA-256"]),
            KeywordRule::new("SHA-512", Hash, &["SHA512", "SHA-512"]),
            KeywordRule::new("SHA-3", Hash, &["SHA3", "SHA-3", "Keccak"]),
            KeywordRule::new("RIPEMD-160", Hash, &["RIPEMD160", "RIPEMD-160"]),
            KeywordRule::new("HMAC", Hash, &["HMAC"]),
            KeywordRule::new("PBKDF2", Hash, &["PBKDF2"]),
            KeywordRule::new("bcrypt", Hash, &["bcrypt"]),
            KeywordRule::new("scrypt", Hash, &["scrypt"]),
        ];
        let non_algorithm_keywords = [
            "ECB", "CBC", "CFB", "OFB", "CTR", "GCM", "CCM", "Pkcs7", "Pkcs5", "NoPadding",
            "ZeroPadding", "Iso10126", "Iso97971", "AnsiX923",
        ]
        .iter()
        .map(|k| k.to_string())
        .collect();
        let libraries = vec![
            LibrarySignature::new("CryptoJS", 0.8, &["CryptoJS.", "crypto-js"]),
            LibrarySignature::new(
                "Node.js crypto",
                0.7,
                &[
                    "require('crypto')",
                    "require(\"crypto\")",
                    "from 'crypto'",
                    "from \"crypto\"",
                    "createCipheriv(",
                    "createHash(",
                    "createHmac(",
                ],
            ),
            LibrarySignature::new("Web Crypto API", 0.8, &["crypto.subtle", "subtle.encrypt", "subtle.digest"]),
            LibrarySignature::new("node-forge", 0.8, &["forge.cipher", "forge.md.", "forge.pki", "node-forge"]),
            LibrarySignature::new("SJCL", 0.8, &["sjcl.encrypt", "sjcl.cipher", "sjcl.hash"]),
            LibrarySignature::new("JSEncrypt", 0.85, &["new JSEncrypt", "jsencrypt"]),
            LibrarySignature::new("TweetNaCl", 0.8, &["nacl.box", "nacl.secretbox", "nacl.sign", "tweetnacl"]),
            LibrarySignature::new("elliptic", 0.7, &["require('elliptic')", "new EC(", "ec.genKeyPair"]),
            LibrarySignature::new("bcryptjs", 0.7, &["bcrypt.hash", "bcrypt.compare", "bcryptjs"]),
        ];
        let min_key_sizes = [
            ("AES", 128),
            ("Blowfish", 128),
            ("3DES", 168),
            ("HMAC", 128),
            ("RSA", 2048),
            ("DSA", 2048),
            ("ECDSA", 256),
            ("ECDH", 256),
        ]
        .iter()
        .map(|(name, bits)| (name.to_string(), *bits))
        .collect();

        Self {
            keywords,
            non_algorithm_keywords,
            libraries,
            broken_hashes: vec!["MD2".into(), "MD4".into(), "MD5".into(), "SHA-1".into()],
            broken_ciphers: vec!["RC4".into(), "DES".into()],
            min_key_sizes,
        }
    }
}

impl CryptoRules {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CryptoError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn is_broken_hash(&self, name: &str) -> bool {
        contains_name(&self.broken_hashes, base_name(name))
    }

    pub fn is_broken_cipher(&self, name: &str) -> bool {
        contains_name(&self.broken_ciphers, base_name(name))
    }

    pub fn min_key_size(&self, name: &str) -> Option<u32> {
        let base = base_name(name);
        self.min_key_sizes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(base))
            .map(|(_, bits)| *bits)
    }

    pub fn is_non_algorithm(&self, keyword: &str) -> bool {
        contains_name(&self.non_algorithm_keywords, keyword)
    }
}

fn contains_name(list: &[String], name: &str) -> bool {
    list.iter().any(|entry| entry.eq_ignore_ascii_case(name))
}

/// `"AES S-box"` and `"AES"` share the rule entries for `"AES"`.
pub fn base_name(name: &str) -> &str {
    name.split_whitespace().next().unwrap_or(name)
}

static KEY_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:aes|camellia|aria)-?(\d{3})").expect("valid key suffix regex"));

/// Canonical name and kind for an algorithm string as libraries spell it (`aes-128-cbc`,
/// `sha256`, `RSA-OAEP`, `des-ede3-cbc`).
pub fn canonical_algorithm(cipher: &str) -> Option<(&'static str, CryptoType)> {
    use CryptoType::*;
    let lower = cipher.trim().to_ascii_lowercase();
    let normalized = lower.replace('_', "-");
    let head = normalized.split('-').next().unwrap_or(&normalized);
    let found = match normalized.as_str() {
        s if s.starts_with("des-ede3") || s.starts_with("des3") || s == "tripledes" || s == "3des" => {
            ("3DES", Symmetric)
        }
        s if s.starts_with("sha-1") || s == "sha1" => ("SHA-1", Hash),
        s if s.starts_with("sha-256") || s == "sha256" => ("SHA-256", Hash),
        s if s.starts_with("sha-384") || s == "sha384" => ("SHA-384", Hash),
        s if s.starts_with("sha-512") || s == "sha512" => ("SHA-512", Hash),
        s if s.starts_with("sha-224") || s == "sha224" => ("SHA-224", Hash),
        s if s.starts_with("sha3") => ("SHA-3", Hash),
        s if s.starts_with("ripemd160") || s.starts_with("ripemd-160") => ("RIPEMD-160", Hash),
        _ => match head {
            "aes" | "aes128" | "aes192" | "aes256" => ("AES", Symmetric),
            "des" => ("DES", Symmetric),
            "rc4" | "arc4" => ("RC4", Symmetric),
            "bf" | "blowfish" => ("Blowfish", Symmetric),
            "chacha20" | "xchacha20" => ("ChaCha20", Symmetric),
            "rabbit" => ("Rabbit", Symmetric),
            "md5" => ("MD5", Hash),
            "md4" => ("MD4", Hash),
            "hmac" | "hmacsha1" | "hmacsha256" | "hmacsha512" | "hmacmd5" => ("HMAC", Hash),
            "pbkdf2" => ("PBKDF2", Hash),
            "rsa" | "rsassa" => ("RSA", Asymmetric),
            "ecdsa" => ("ECDSA", Asymmetric),
            "ecdh" => ("ECDH", Asymmetric),
            "ed25519" => ("Ed25519", Asymmetric),
            "dsa" => ("DSA", Asymmetric),
            _ => return None,
        },
    };
    Some(found)
}

/// Key size embedded in names like `aes-256-gcm` or `AES128`.
pub fn key_size_from_cipher(cipher: &str) -> Option<u32> {
    let lower = cipher.trim().to_ascii_lowercase();
    KEY_SUFFIX
        .captures(&lower)
        .and_then(|c| c[1].parse().ok())
        .filter(|bits| matches!(bits, 128 | 192 | 256))
}

/// Block mode embedded in names like `aes-128-ecb`, `AES-GCM` or `des-ede3-cbc`.
pub fn mode_from_cipher(cipher: &str) -> Option<String> {
    const MODES: [&str; 8] = ["ecb", "cbc", "cfb", "ofb", "ctr", "gcm", "ccm", "ocb"];
    cipher.to_ascii_lowercase()
        .split(|c: char| c == '-' || c == '_')
        .find(|part| MODES.contains(part))
        .map(|m| m.to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_canonical_algorithm_names() {
        assert_eq!(canonical_algorithm("aes-128-ecb"), Some(("AES", CryptoType::Symmetric)));
        assert_eq!(canonical_algorithm("des-ede3-cbc"), Some(("3DES", CryptoType::Symmetric)));
        assert_eq!(canonical_algorithm("des-cbc"), Some(("DES", CryptoType::Symmetric)));
        assert_eq!(canonical_algorithm("sha1"), Some(("SHA-1", CryptoType::Hash)));
        assert_eq!(canonical_algorithm("SHA-256"), Some(("SHA-256", CryptoType::Hash)));
        assert_eq!(canonical_algorithm("RSA-OAEP"), Some(("RSA", CryptoType::Asymmetric)));
        assert_eq!(canonical_algorithm("utf8"), None);
    }

    #[test]
    fn test_spec_parts() {
        assert_eq!(key_size_from_cipher("aes-256-gcm"), Some(256));
        assert_eq!(key_size_from_cipher("AES128"), Some(128));
        assert_eq!(key_size_from_cipher("des-cbc"), None);
        assert_eq!(mode_from_cipher("aes-128-ecb").as_deref(), Some("ECB"));
        assert_eq!(mode_from_cipher("AES-GCM").as_deref(), Some("GCM"));
        assert_eq!(mode_from_cipher("sha256"), None);
    }

    #[test]
    fn test_rule_lookups_use_base_name() {
        let rules = CryptoRules::default();
        assert_eq!(rules.min_key_size("AES S-box"), Some(128));
        assert_eq!(rules.min_key_size("rsa"), Some(2048));
        assert!(rules.is_broken_hash("MD5"));
        assert!(rules.is_broken_cipher("DES"));
        assert!(!rules.is_broken_cipher("3DES"));
        assert!(rules.is_non_algorithm("ecb"));
    }

    #[test]
    fn test_rules_round_trip_through_json() {
        let rules = CryptoRules::default();
        let json = rules.to_json().unwrap();
        assert_eq!(CryptoRules::from_json(&json).unwrap(), rules);

        let partial = CryptoRules::from_json(r#"{"brokenHashes": ["MD5"]}"#).unwrap();
        assert_eq!(partial.broken_hashes, vec!["MD5".to_string()]);
        assert_eq!(partial.keywords, rules.keywords);
    }
}
