use crate::config::EmitterConfig;
use crate::emitter::{EmitHelper, EmitResult, Emitter, ReportBuilder};
use crate::output::{JsonFormatter, OutputFormat};
use jsreveal_core::{
    CryptoAlgorithm, CryptoDetectionResult, CryptoParameters, Severity, Strength,
    StrengthAssessment,
};
use std::io::Write;

pub struct CryptoEmitter {
    config: EmitterConfig,
}

fn strength_color(strength: Strength) -> &'static str {
    match strength {
        Strength::Strong => "green",
        Strength::Moderate => "yellow",
        Strength::Weak => "magenta",
        Strength::Broken => "red",
    }
}

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "bright_red",
        Severity::High => "red",
        Severity::Medium => "yellow",
        Severity::Low => "blue",
    }
}

/// `mode=ECB, padding=NoPadding, keySize=64`, named fields first, then extras in insertion order.
pub fn format_parameters(params: &CryptoParameters) -> String {
    let mut parts = Vec::new();
    if let Some(mode) = &params.mode {
        parts.push(format!("mode={}", mode));
    }
    if let Some(padding) = &params.padding {
        parts.push(format!("padding={}", padding));
    }
    if let Some(bits) = params.key_size {
        parts.push(format!("keySize={}", bits));
    }
    if let Some(length) = params.length {
        parts.push(format!("length={}", length));
    }
    if let Some(iv) = &params.iv {
        parts.push(format!("iv={}", iv));
    }
    for (key, value) in &params.extra {
        match value.as_str() {
            Some(s) => parts.push(format!("{}={}", key, s)),
            None => parts.push(format!("{}={}", key, value)),
        }
    }
    parts.join(", ")
}

impl CryptoEmitter {
    pub fn new(config: EmitterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EmitterConfig {
        &self.config
    }

    fn strength_line(&self, strength: &StrengthAssessment) -> String {
        EmitHelper::colorize(
            &format!("{} ({}/100)", strength.overall, strength.score),
            strength_color(strength.overall),
            self.config.colors_enabled(),
        )
    }

    fn algorithm_line(&self, algorithm: &CryptoAlgorithm) -> String {
        let mut line = format!(
            "{} ({}, {}) at {}",
            algorithm.name,
            algorithm.kind,
            EmitHelper::ratio(algorithm.confidence),
            algorithm.location
        );
        if let Some(params) = algorithm.parameters.as_ref().filter(|p| !p.is_empty()) {
            line.push_str(&format!(" [{}]", format_parameters(params)));
        }
        if self.config.verbosity.should_print_evidence() {
            line.push_str(&format!(": {}", algorithm.usage));
        }
        line
    }
}

impl Emitter for CryptoEmitter {
    type Item = CryptoDetectionResult;

    fn emit<W: Write>(&self, result: &CryptoDetectionResult, writer: &mut W) -> EmitResult {
        if self.config.format == OutputFormat::Json {
            return JsonFormatter::format_object(writer, result);
        }

        let formatter = EmitHelper::formatter(&self.config);
        let mut report = ReportBuilder::new(formatter.as_ref());
        let verbosity = self.config.verbosity;
        if !verbosity.should_print_details() {
            report.raw(formatter.format_pair("Strength", &self.strength_line(&result.strength)));
            return report.finish(writer);
        }

        if self.config.format == OutputFormat::Markdown {
            report.raw("# Crypto Report".to_string());
        }

        let factors = &result.strength.factors;
        report.pairs_section(
            "Summary",
            &[
                ("Strength", self.strength_line(&result.strength)),
                (
                    "Factors",
                    format!(
                        "algorithm {}, mode {}, key size {}, implementation {}",
                        factors.algorithm, factors.mode, factors.key_size, factors.implementation
                    ),
                ),
            ],
        );

        let algorithms: Vec<String> = result
            .algorithms
            .iter()
            .map(|a| self.algorithm_line(a))
            .collect();
        report.list_section("Algorithms", &algorithms);

        let libraries: Vec<String> = result
            .libraries
            .iter()
            .map(|l| {
                let mut line = format!("{} ({})", l.name, EmitHelper::ratio(l.confidence));
                if verbosity.should_print_evidence() {
                    line.push_str(&format!(": matched `{}`", l.evidence));
                }
                line
            })
            .collect();
        report.list_section("Libraries", &libraries);

        let colors = self.config.colors_enabled();
        let issues: Vec<String> = result
            .security
            .iter()
            .map(|i| {
                let tag = format!("[{}]", i.severity);
                format!(
                    "{} {}. {}",
                    EmitHelper::colorize(&tag, severity_color(i.severity), colors),
                    i.issue,
                    i.recommendation
                )
            })
            .collect();
        report.list_section("Security Issues", &issues);
        report.list_section("Warnings", &result.warnings);
        report.finish(writer)
    }
}
