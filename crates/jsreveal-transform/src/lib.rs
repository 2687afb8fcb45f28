/*! Recover readable JavaScript from obfuscated input.
 *
 * Obfuscators hide intent behind string tables, dispatch loops, constant-guarded junk and embedded
 * interpreters. This crate classifies which of those techniques a script uses, undoes the ones it
 * can with source-to-source rewrites over the syntax tree, and reports what it could not. Every
 * rewrite is re-parsed before it is accepted, so a stage either improves the code or leaves it
 * alone.
 */

pub mod advanced;
pub mod classifier;
pub mod const_eval;
pub mod dispatch;
pub mod errors;
pub mod jsvmp;
pub mod optimizer;
pub mod passes;
pub mod pipeline;
pub mod rename;
pub mod rewrite;
pub mod scoring;
pub mod unpack;

pub use advanced::{AdvancedReport, AdvancedStage};
pub use classifier::classify;
pub use errors::{AttemptResult, PipelineError, StageError, StageResult};
pub use jsvmp::{JsvmpDetector, VmAnalysis, VmDeobfuscator, VmOutcome};
pub use optimizer::{optimize, optimize_with_report, OptimizeReport};
pub use passes::{baseline_passes, DeobfuscationPass};
pub use pipeline::{merge_obfuscation_types, should_run, DeobfuscationPipeline};
pub use rename::IdentifierRenamer;
pub use scoring::{pipeline_confidence, readability_score};
pub use unpack::{PackerUnpacker, UnpackOutcome, Unpacker};
