//! Baseline passes the pipeline attempts on every input.

pub mod array_decrypt;
pub mod literals;
pub mod simplify;
pub mod string_array;
pub mod strings;
pub mod unflatten;

pub use array_decrypt::ArrayDecryptPass;
pub use literals::LiteralPass;
pub use simplify::SimplifyPass;
pub use string_array::StringArrayPass;
pub use strings::StringDecodePass;
pub use unflatten::UnflattenPass;

use crate::errors::{AttemptResult, StageResult};

/// One source-to-source rewrite.
///
/// `run` returns `Err(StageError::Parse)` when the input does not parse; the pipeline records that
/// and carries on. Any other error aborts the whole call.
pub trait DeobfuscationPass: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str {
        "No description provided"
    }

    fn run(&self, code: &str) -> StageResult<AttemptResult>;
}

/// The baseline passes in the order the pipeline runs them.
pub fn baseline_passes() -> Vec<Box<dyn DeobfuscationPass>> {
    vec![
        Box::new(StringArrayPass),
        Box::new(LiteralPass),
        Box::new(StringDecodePass),
        Box::new(ArrayDecryptPass),
        Box::new(UnflattenPass),
        Box::new(SimplifyPass),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baseline_order() {
        let names: Vec<&str> = baseline_passes().iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "string-array",
                "literals",
                "string-decode",
                "array-decrypt",
                "unflatten",
                "simplify"
            ]
        );
    }

    #[test]
    fn test_every_pass_reports_parse_failure() {
        for pass in baseline_passes() {
            let err = pass.run("var = ;").err();
            assert!(
                err.map_or(false, |e| e.is_recoverable()),
                "{} should fail recoverably",
                pass.name()
            );
        }
    }
}
