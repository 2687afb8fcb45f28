/*! Render analysis results for people and for other tools.
 *
 * A deobfuscation result is mostly code, a crypto result is mostly findings; both read best as a
 * short summary followed by the details. Text output is for terminals, Markdown for tickets and
 * review notes, JSON for anything that wants to parse the result back.
 */

pub mod config;
pub mod crypto_emitter;
pub mod deobfuscation_emitter;
pub mod emitter;
pub mod output;

pub use config::{EmitterConfig, VerbosityLevel};
pub use crypto_emitter::{format_parameters, CryptoEmitter};
pub use deobfuscation_emitter::DeobfuscationEmitter;
pub use emitter::{EmitHelper, EmitResult, Emitter, ReportBuilder};
pub use output::{OutputFormat, OutputFormatter};
