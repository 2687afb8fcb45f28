/*! Find the cryptography in a JavaScript file and judge how well it is used.
 *
 * Detection runs two independent passes over the source: a syntax-tree walk that recognizes
 * library calls, constant tables and hand-rolled loops, and a keyword scan for plain mentions. An
 * optional completion provider can add a third opinion. The merged findings go through a rule set
 * that flags broken primitives and bad configuration, and the issues found are folded into a
 * single strength rating.
 */

pub mod ai;
pub mod ast_detector;
pub mod detector;
pub mod keywords;
pub mod merge;
pub mod rules;
pub mod sbox;
pub mod security;
pub mod strength;

pub use ai::{detect_with_ai, parse_ai_response};
pub use ast_detector::{detect_by_ast, AstDetection};
pub use detector::CryptoDetector;
pub use keywords::{detect_by_keywords, detect_libraries, KeywordMatcher};
pub use merge::{merge_parameters, merge_results};
pub use rules::{CryptoRules, KeywordRule, LibrarySignature};
pub use security::evaluate_security;
pub use strength::{analyze_strength, classify_issue, Factor};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Failed to read rules from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid rules document: {0}")]
    Rules(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
