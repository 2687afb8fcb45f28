/*! Unified interface for JavaScript deobfuscation and crypto review.
 *
 * Single import for everything you need: classifying and undoing obfuscation, finding the
 * cryptography a script uses and rating it, and rendering either result as a report.
 */

pub use jsreveal_core as core;
pub use jsreveal_crypto as crypto;
pub use jsreveal_emit as emit;
pub use jsreveal_parser as parser;
pub use jsreveal_transform as transform;

pub use jsreveal_core::{
    CompletionProvider, CryptoDetectionResult, CryptoOptions, DeobfuscateOptions,
    DeobfuscationResult, ObfuscationTechnique, SecurityIssue, Severity, Strength,
};

pub use jsreveal_crypto::{CryptoDetector, CryptoRules};

pub use jsreveal_emit::{CryptoEmitter, DeobfuscationEmitter, Emitter, EmitterConfig};

pub use jsreveal_parser::{check, parse};

pub use jsreveal_transform::{classify, optimize, DeobfuscationPipeline, PipelineError};
