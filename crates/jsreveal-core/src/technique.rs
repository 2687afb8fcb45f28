use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ObfuscationTechnique {
    JavascriptObfuscator,
    VmProtection,
    ControlFlowFlattening,
    DeadCodeInjection,
    OpaquePredicates,
    StringArrayRotation,
    HexEncoding,
    InvisibleUnicode,
    Webpack,
    Packer,
    Unknown,
}

impl ObfuscationTechnique {
    pub const ALL: [ObfuscationTechnique; 11] = [
        Self::JavascriptObfuscator,
        Self::VmProtection,
        Self::ControlFlowFlattening,
        Self::DeadCodeInjection,
        Self::OpaquePredicates,
        Self::StringArrayRotation,
        Self::HexEncoding,
        Self::InvisibleUnicode,
        Self::Webpack,
        Self::Packer,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JavascriptObfuscator => "javascript-obfuscator",
            Self::VmProtection => "vm-protection",
            Self::ControlFlowFlattening => "control-flow-flattening",
            Self::DeadCodeInjection => "dead-code-injection",
            Self::OpaquePredicates => "opaque-predicates",
            Self::StringArrayRotation => "string-array-rotation",
            Self::HexEncoding => "hex-encoding",
            Self::InvisibleUnicode => "invisible-unicode",
            Self::Webpack => "webpack",
            Self::Packer => "packer",
            Self::Unknown => "unknown",
        }
    }

    /// `Unknown` is a placeholder, every other tag names a concrete technique.
    pub fn is_specific(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for ObfuscationTechnique {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObfuscationTechnique {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| CoreError::UnknownTechnique(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_technique_string_forms() {
        for technique in ObfuscationTechnique::ALL {
            assert_eq!(
                technique.as_str().parse::<ObfuscationTechnique>().unwrap(),
                technique
            );
        }
        assert_eq!(
            "VM_PROTECTION".parse::<ObfuscationTechnique>().unwrap(),
            ObfuscationTechnique::VmProtection
        );
        assert!("rot13".parse::<ObfuscationTechnique>().is_err());
    }

    #[test]
    fn test_technique_serializes_kebab_case() {
        let json = serde_json::to_string(&ObfuscationTechnique::ControlFlowFlattening).unwrap();
        assert_eq!(json, "\"control-flow-flattening\"");
    }
}
