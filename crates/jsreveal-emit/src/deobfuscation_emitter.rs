//! Report for one deobfuscation run: summary, the stage log, what is left to do, and the code.

use crate::config::EmitterConfig;
use crate::emitter::{EmitHelper, EmitResult, Emitter, ReportBuilder};
use crate::output::{JsonFormatter, OutputFormat};
use jsreveal_core::{DeobfuscationResult, TransformationRecord};
use std::io::Write;

pub struct DeobfuscationEmitter {
    config: EmitterConfig,
}

impl DeobfuscationEmitter {
    pub fn new(config: EmitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    fn record_line(&self, record: &TransformationRecord) -> String {
        let colors = self.config.colors_enabled();
        let mut line = if record.success {
            format!(
                "{}: {}",
                EmitHelper::colorize(&record.kind, "green", colors),
                record.description
            )
        } else {
            format!(
                "{}: {}",
                EmitHelper::colorize(&format!("{} (failed)", record.kind), "red", colors),
                record.description
            )
        };
        if self.config.verbosity.should_print_record_warnings() && !record.warnings.is_empty() {
            line.push_str(&format!(" [{}]", record.warnings.join("; ")));
        }
        line
    }
}

impl Emitter for DeobfuscationEmitter {
    type Item = DeobfuscationResult;

    fn emit<W: Write>(&self, result: &DeobfuscationResult, writer: &mut W) -> EmitResult {
        if self.config.format == OutputFormat::Json {
            return JsonFormatter::format_object(writer, result);
        }

        let formatter = EmitHelper::formatter(&self.config);
        let mut report = ReportBuilder::new(formatter.as_ref());
        let code = formatter.format_code(&result.code, Some("javascript"));
        let verbosity = self.config.verbosity;
        if !verbosity.should_print_details() {
            report.raw(code);
            return report.finish(writer);
        }

        if self.config.format == OutputFormat::Markdown {
            report.raw("# Deobfuscation Report".to_string());
        }

        let techniques = if result.obfuscation_types.is_empty() {
            "none".to_string()
        } else {
            result
                .obfuscation_types
                .iter()
                .map(|t| t.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        report.pairs_section(
            "Summary",
            &[
                ("Confidence", EmitHelper::ratio(result.confidence)),
                ("Readability", EmitHelper::ratio(result.readability_score)),
                ("Techniques", techniques),
            ],
        );

        let records: Vec<String> = result
            .transformations
            .iter()
            .filter(|r| r.success || verbosity.should_print_failures())
            .map(|r| self.record_line(r))
            .collect();
        report.list_section("Transformations", &records);
        report.list_section("Warnings", &result.warnings);

        let unresolved: Vec<String> = result
            .unresolved_parts
            .iter()
            .map(|p| format!("{}: {}. {}", p.location, p.reason, p.suggestion))
            .collect();
        report.list_section("Unresolved", &unresolved);

        if let Some(analysis) = &result.analysis {
            report.section("Analysis", analysis.trim().to_string());
        }
        if !result.code.is_empty() {
            report.section("Code", code);
        }
        report.finish(writer)
    }
}
