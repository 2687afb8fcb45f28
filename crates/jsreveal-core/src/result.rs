use crate::ObfuscationTechnique;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One attempt of one pipeline stage. Records are appended, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformationRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl TransformationRecord {
    pub fn succeeded(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            success: true,
            warnings: Vec::new(),
        }
    }

    pub fn failed(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: reason.into(),
            success: false,
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnresolvedPart {
    pub location: String,
    pub reason: String,
    pub suggestion: String,
}

impl UnresolvedPart {
    pub fn new(
        location: impl Into<String>,
        reason: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            location: location.into(),
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeobfuscationResult {
    pub code: String,
    pub transformations: Vec<TransformationRecord>,
    pub warnings: Vec<String>,
    pub unresolved_parts: Vec<UnresolvedPart>,
    pub confidence: f64,
    pub obfuscation_types: BTreeSet<ObfuscationTechnique>,
    pub readability_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
}

impl DeobfuscationResult {
    pub fn successful_transformations(&self) -> impl Iterator<Item = &TransformationRecord> {
        self.transformations.iter().filter(|t| t.success)
    }

    pub fn has_technique(&self, technique: ObfuscationTechnique) -> bool {
        self.obfuscation_types.contains(&technique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serializes_type_field() {
        let record = TransformationRecord::succeeded("unpack", "Unpacked Packer payload");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "unpack");
        assert_eq!(value["success"], true);
        assert!(value.get("warnings").is_none());
    }

    #[test]
    fn test_result_uses_camel_case() {
        let result = DeobfuscationResult {
            code: "a();".to_string(),
            transformations: vec![],
            warnings: vec![],
            unresolved_parts: vec![UnresolvedPart::new("line 1", "opaque", "inspect")],
            confidence: 0.5,
            obfuscation_types: [ObfuscationTechnique::Unknown].into_iter().collect(),
            readability_score: 0.7,
            analysis: None,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("unresolvedParts").is_some());
        assert_eq!(value["obfuscationTypes"][0], "unknown");
    }
}
