use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoType {
    Symmetric,
    Asymmetric,
    Hash,
    Custom,
}

impl CryptoType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "symmetric" => Some(Self::Symmetric),
            "asymmetric" => Some(Self::Asymmetric),
            "hash" => Some(Self::Hash),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Symmetric => "symmetric",
            Self::Asymmetric => "asymmetric",
            Self::Hash => "hash",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for CryptoType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl CodeLocation {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn inline(line: usize, column: usize) -> Self {
        Self::new("inline", line, column)
    }
}

impl Default for CodeLocation {
    fn default() -> Self {
        Self::inline(0, 0)
    }
}

impl fmt::Display for CodeLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Configuration recovered for one algorithm. Named fields cover what the security rules read;
/// anything else a library call carried lands in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoParameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub padding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_json::Value>,
}

impl CryptoParameters {
    pub fn is_empty(&self) -> bool {
        self.mode.is_none()
            && self.padding.is_none()
            && self.key_size.is_none()
            && self.length.is_none()
            && self.iv.is_none()
            && self.extra.is_empty()
    }

    /// Fills every field still unset from `other`; fields already known are kept.
    pub fn fill_missing(&mut self, other: &CryptoParameters) {
        if self.mode.is_none() {
            self.mode = other.mode.clone();
        }
        if self.padding.is_none() {
            self.padding = other.padding.clone();
        }
        if self.key_size.is_none() {
            self.key_size = other.key_size;
        }
        if self.length.is_none() {
            self.length = other.length;
        }
        if self.iv.is_none() {
            self.iv = other.iv.clone();
        }
        for (key, value) in &other.extra {
            self.extra
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoAlgorithm {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CryptoType,
    pub confidence: f64,
    pub usage: String,
    pub location: CodeLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<CryptoParameters>,
}

impl CryptoAlgorithm {
    pub fn new(
        name: impl Into<String>,
        kind: CryptoType,
        confidence: f64,
        usage: impl Into<String>,
        location: CodeLocation,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            confidence: confidence.clamp(0.0, 1.0),
            usage: usage.into(),
            location,
            parameters: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityIssue {
    pub severity: Severity,
    pub issue: String,
    pub recommendation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

impl SecurityIssue {
    pub fn new(
        severity: Severity,
        issue: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            issue: issue.into(),
            recommendation: recommendation.into(),
            algorithm: None,
        }
    }

    pub fn for_algorithm(mut self, name: impl Into<String>) -> Self {
        self.algorithm = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strength {
    Strong,
    Moderate,
    Weak,
    Broken,
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Strong => "strong",
            Self::Moderate => "moderate",
            Self::Weak => "weak",
            Self::Broken => "broken",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrengthFactors {
    pub algorithm: u32,
    pub mode: u32,
    pub key_size: u32,
    pub implementation: u32,
}

impl Default for StrengthFactors {
    fn default() -> Self {
        Self {
            algorithm: 100,
            mode: 100,
            key_size: 100,
            implementation: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrengthAssessment {
    pub overall: Strength,
    pub score: u32,
    pub factors: StrengthFactors,
}

impl Default for StrengthAssessment {
    fn default() -> Self {
        Self {
            overall: Strength::Strong,
            score: 100,
            factors: StrengthFactors::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedLibrary {
    pub name: String,
    pub confidence: f64,
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoDetectionResult {
    pub algorithms: Vec<CryptoAlgorithm>,
    pub libraries: Vec<DetectedLibrary>,
    pub security: Vec<SecurityIssue>,
    pub strength: StrengthAssessment,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl CryptoDetectionResult {
    pub fn find(&self, name: &str) -> Option<&CryptoAlgorithm> {
        self.algorithms.iter().find(|a| a.name == name)
    }
}
