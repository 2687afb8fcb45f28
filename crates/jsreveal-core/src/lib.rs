/*! Shared result types, options and capabilities for JavaScript analysis.
 *
 * Obfuscated third-party scripts are hostile input: every stage that touches them needs to agree on
 * what a transformation record looks like, how confident a result is, and which knobs the caller
 * turned. This crate holds that shared vocabulary plus the bounded result cache and the optional
 * text-completion capability both analysis pipelines can consult.
 */

pub mod cache;
pub mod completion;
pub mod crypto;
pub mod options;
pub mod result;
pub mod technique;

pub use cache::{CacheKey, CacheStatistics, ResultCache};
pub use completion::{ChatMessage, ChatResponse, ChatRole, CompletionError, CompletionProvider};
pub use crypto::{
    CodeLocation, CryptoAlgorithm, CryptoDetectionResult, CryptoParameters, CryptoType,
    DetectedLibrary, SecurityIssue, Severity, Strength, StrengthAssessment, StrengthFactors,
};
pub use options::{CryptoOptions, DeobfuscateOptions};
pub use result::{DeobfuscationResult, TransformationRecord, UnresolvedPart};
pub use technique::ObfuscationTechnique;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown obfuscation technique: {0}")]
    UnknownTechnique(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

/// Clamps a confidence value into the range every pipeline reports.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.1;
    }
    value.clamp(0.1, 0.95)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_confidence_bounds() {
        assert_eq!(clamp_confidence(2.0), 0.95);
        assert_eq!(clamp_confidence(-1.0), 0.1);
        assert_eq!(clamp_confidence(f64::NAN), 0.1);
        assert_eq!(clamp_confidence(0.5), 0.5);
    }
}
