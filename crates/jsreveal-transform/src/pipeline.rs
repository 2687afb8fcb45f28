//! The deobfuscation pipeline: classify, run the selected stages in order, score, cache.

use crate::advanced::AdvancedStage;
use crate::classifier::classify;
use crate::errors::{AttemptResult, PipelineError, StageError, StageResult};
use crate::jsvmp::{JsvmpDetector, VmDeobfuscator};
use crate::optimizer::optimize_with_report;
use crate::passes::{baseline_passes, DeobfuscationPass};
use crate::rename::IdentifierRenamer;
use crate::scoring::{pipeline_confidence, readability_score};
use crate::unpack::{PackerUnpacker, Unpacker};
use jsreveal_core::completion::build_deobfuscation_prompt;
use jsreveal_core::{
    CacheKey, CompletionProvider, DeobfuscateOptions, DeobfuscationResult, ObfuscationTechnique,
    ResultCache, TransformationRecord, UnresolvedPart,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const CACHE_SCOPE: &str = "deobfuscate";

pub const UNPACK_TRIGGERS: &[ObfuscationTechnique] = &[ObfuscationTechnique::Packer];

pub const JSVMP_TRIGGERS: &[ObfuscationTechnique] = &[ObfuscationTechnique::VmProtection];

pub const ADVANCED_TRIGGERS: &[ObfuscationTechnique] = &[
    ObfuscationTechnique::JavascriptObfuscator,
    ObfuscationTechnique::VmProtection,
    ObfuscationTechnique::ControlFlowFlattening,
    ObfuscationTechnique::DeadCodeInjection,
    ObfuscationTechnique::OpaquePredicates,
    ObfuscationTechnique::StringArrayRotation,
    ObfuscationTechnique::HexEncoding,
    ObfuscationTechnique::InvisibleUnicode,
];

/// An explicit setting wins; otherwise run when `auto` is on and a trigger was detected.
pub fn should_run(
    explicit: Option<bool>,
    auto: bool,
    detected: &BTreeSet<ObfuscationTechnique>,
    triggers: &[ObfuscationTechnique],
) -> bool {
    match explicit {
        Some(run) => run,
        None => auto && triggers.iter().any(|t| detected.contains(t)),
    }
}

/// The technique a successful record confirms, judged by its kind and description.
fn confirmed_technique(record: &TransformationRecord) -> Option<ObfuscationTechnique> {
    if record.description.contains("Packer") {
        return Some(ObfuscationTechnique::Packer);
    }
    let technique = match record.kind.as_str() {
        "jsvmp" | "vm-protection" => ObfuscationTechnique::VmProtection,
        "unflatten" | "control-flow-flattening" => ObfuscationTechnique::ControlFlowFlattening,
        "dead-code" => ObfuscationTechnique::DeadCodeInjection,
        "opaque-predicates" => ObfuscationTechnique::OpaquePredicates,
        "string-array-rotation" => ObfuscationTechnique::StringArrayRotation,
        "invisible-unicode" => ObfuscationTechnique::InvisibleUnicode,
        "string-encoding" => ObfuscationTechnique::HexEncoding,
        "array-decrypt" => ObfuscationTechnique::JavascriptObfuscator,
        _ => return None,
    };
    Some(technique)
}

/// Refines the classifier's tags with what the stages actually undid. `Unknown` goes once any
/// specific tag is confirmed.
pub fn merge_obfuscation_types(
    detected: &BTreeSet<ObfuscationTechnique>,
    transformations: &[TransformationRecord],
) -> BTreeSet<ObfuscationTechnique> {
    let mut merged = detected.clone();
    merged.extend(
        transformations
            .iter()
            .filter(|t| t.success)
            .filter_map(confirmed_technique),
    );
    if merged.iter().any(|t| t.is_specific()) {
        merged.remove(&ObfuscationTechnique::Unknown);
    }
    if merged.is_empty() {
        merged.insert(ObfuscationTechnique::Unknown);
    }
    merged
}

/// Mutable state of one `deobfuscate` call.
struct Trail {
    code: String,
    transformations: Vec<TransformationRecord>,
    warnings: Vec<String>,
    unresolved: Vec<UnresolvedPart>,
}

impl Trail {
    /// Parse failures become a failed record; anything else aborts the call.
    fn recover<T>(&mut self, stage: &str, result: StageResult<T>) -> Result<Option<T>, PipelineError> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(StageError::Parse(err)) => {
                warn!(stage, %err, "stage could not parse its input");
                self.transformations
                    .push(TransformationRecord::failed(stage, format!("Parse error: {}", err)));
                Ok(None)
            }
            Err(StageError::Collaborator(source)) => {
                warn!(stage, error = %source, "stage collaborator failed, aborting");
                Err(PipelineError::Stage {
                    stage: stage.to_string(),
                    source,
                })
            }
        }
    }

    fn attempt(&mut self, stage: &str, description: String, attempt: AttemptResult) {
        match attempt {
            AttemptResult::Changed(code) => {
                self.code = code;
                self.transformations
                    .push(TransformationRecord::succeeded(stage, description));
            }
            AttemptResult::Unchanged => {}
            AttemptResult::Failed(reason) => {
                self.transformations
                    .push(TransformationRecord::failed(stage, reason.clone()));
                self.warnings.push(format!("{}: {}", stage, reason));
            }
        }
    }
}

pub struct DeobfuscationPipeline {
    cache: ResultCache<DeobfuscationResult>,
    unpacker: Box<dyn Unpacker>,
    vm: Box<dyn VmDeobfuscator>,
    passes: Vec<Box<dyn DeobfuscationPass>>,
    provider: Option<Arc<dyn CompletionProvider>>,
}

impl Default for DeobfuscationPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl DeobfuscationPipeline {
    pub fn new() -> Self {
        Self::with_capacity(ResultCache::<DeobfuscationResult>::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: ResultCache::new(capacity),
            unpacker: Box::new(PackerUnpacker),
            vm: Box::new(JsvmpDetector),
            passes: baseline_passes(),
            provider: None,
        }
    }

    pub fn with_unpacker(mut self, unpacker: Box<dyn Unpacker>) -> Self {
        self.unpacker = unpacker;
        self
    }

    pub fn with_vm_deobfuscator(mut self, vm: Box<dyn VmDeobfuscator>) -> Self {
        self.vm = vm;
        self
    }

    pub fn with_passes(mut self, passes: Vec<Box<dyn DeobfuscationPass>>) -> Self {
        self.passes = passes;
        self
    }

    pub fn with_provider(mut self, provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        self.provider = provider;
        self
    }

    pub fn cache(&self) -> &ResultCache<DeobfuscationResult> {
        &self.cache
    }

    /// Runs every selected stage over `code`. A repeat call with the same code and the same
    /// output-relevant options returns the cached `Arc` itself.
    pub fn deobfuscate(
        &mut self,
        code: &str,
        options: &DeobfuscateOptions,
    ) -> Result<Arc<DeobfuscationResult>, PipelineError> {
        let key = CacheKey::from_parts(CACHE_SCOPE, code, &options.cache_fingerprint());
        if let Some(cached) = self.cache.get(&key) {
            debug!(hit_rate = self.cache.hit_rate(), "deobfuscation cache hit");
            return Ok(cached);
        }

        let mut detected = classify(code);
        info!(techniques = ?detected, "starting deobfuscation");
        let mut trail = Trail {
            code: code.to_string(),
            transformations: Vec::new(),
            warnings: Vec::new(),
            unresolved: Vec::new(),
        };

        if should_run(options.unpack, options.auto, &detected, UNPACK_TRIGGERS) {
            let result = self.unpacker.unpack(&trail.code);
            if let Some(Some(outcome)) = trail.recover("unpack", result)? {
                trail.code = outcome.code;
                trail
                    .transformations
                    .push(TransformationRecord::succeeded("unpack", outcome.description));
                // The payload is what the later stages see, so classify it too.
                detected.extend(classify(&trail.code));
            }
        }

        let mut vm_reported = false;
        let jsvmp = options.vm_stage_override(options.jsvmp);
        if should_run(jsvmp, options.auto, &detected, JSVMP_TRIGGERS) {
            let result = self.vm.deobfuscate(&trail.code);
            if let Some(Some(outcome)) = trail.recover("jsvmp", result)? {
                trail.transformations.push(
                    TransformationRecord::succeeded("jsvmp", outcome.description)
                        .with_warnings(outcome.warnings.clone()),
                );
                trail.code = outcome.code;
                trail.warnings.extend(outcome.warnings);
                vm_reported = !outcome.unresolved.is_empty();
                trail.unresolved.extend(outcome.unresolved);
            }
        }

        let mut advanced_confidence = None;
        let advanced = options.vm_stage_override(options.advanced);
        if should_run(advanced, options.auto, &detected, ADVANCED_TRIGGERS) {
            let llm_cleanup = options.llm && self.provider.is_some();
            let stage = AdvancedStage::new()
                .with_provider(self.provider.clone())
                .aggressive(options.aggressive)
                .llm_cleanup(llm_cleanup)
                .vm_reported(vm_reported);
            let result = stage.run(&trail.code, &detected);
            if let Some(report) = trail.recover("advanced", result)? {
                trail.code = report.code;
                trail.transformations.extend(report.transformations);
                trail.warnings.extend(report.warnings);
                trail.unresolved.extend(report.unresolved);
                advanced_confidence = Some(report.confidence);
            }
        }

        for pass in &self.passes {
            let result = pass.run(&trail.code);
            if let Some(attempt) = trail.recover(pass.name(), result)? {
                trail.attempt(pass.name(), pass.description().to_string(), attempt);
            }
        }

        if options.ast_optimize {
            let report = optimize_with_report(&trail.code);
            // A no-op (including unparsable input) still counts as a successful stage.
            let description = if report.rewrites > 0 {
                format!(
                    "Applied {} structural simplifications in {} rounds",
                    report.rewrites, report.rounds
                )
            } else {
                "No structural simplifications applied".to_string()
            };
            trail.code = report.code;
            trail
                .transformations
                .push(TransformationRecord::succeeded("ast-optimize", description));
        }

        if options.rename_variables {
            let mut renamer = IdentifierRenamer::new();
            let result = renamer.rename(&trail.code);
            if let Some(attempt) = trail.recover("rename", result)? {
                let description = format!("Renamed {} mangled identifiers", renamer.renamed_count());
                trail.attempt("rename", description, attempt);
            }
        }

        let analysis = if options.llm {
            self.analyze(&trail.code, &mut trail.warnings)
        } else {
            None
        };

        let obfuscation_types = merge_obfuscation_types(&detected, &trail.transformations);
        let readability = readability_score(&trail.code);
        let confidence = pipeline_confidence(
            &trail.transformations,
            trail.warnings.len(),
            readability,
            advanced_confidence,
        );
        info!(
            transformations = trail.transformations.len(),
            warnings = trail.warnings.len(),
            confidence,
            "deobfuscation finished"
        );

        let result = DeobfuscationResult {
            code: trail.code,
            transformations: trail.transformations,
            warnings: trail.warnings,
            unresolved_parts: trail.unresolved,
            confidence,
            obfuscation_types,
            readability_score: readability,
            analysis,
        };
        Ok(self.cache.insert(key, result))
    }

    /// Advisory analysis. Failures become a warning.
    fn analyze(&self, code: &str, warnings: &mut Vec<String>) -> Option<String> {
        let Some(provider) = &self.provider else {
            warnings.push("LLM analysis unavailable: no completion provider configured".to_string());
            return None;
        };
        match provider.chat(&build_deobfuscation_prompt(code)) {
            Ok(response) => Some(response.content),
            Err(err) => {
                warn!(provider = provider.name(), error = %err, "LLM analysis failed");
                warnings.push(format!("LLM analysis unavailable: {}", err));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[ObfuscationTechnique]) -> BTreeSet<ObfuscationTechnique> {
        list.iter().copied().collect()
    }

    #[test]
    fn test_should_run_policy() {
        let packer = tags(&[ObfuscationTechnique::Packer]);
        assert!(should_run(None, true, &packer, UNPACK_TRIGGERS));
        assert!(!should_run(Some(false), true, &packer, UNPACK_TRIGGERS));
        assert!(!should_run(None, false, &packer, UNPACK_TRIGGERS));
        assert!(should_run(Some(true), false, &BTreeSet::new(), UNPACK_TRIGGERS));
        assert!(!should_run(
            None,
            true,
            &tags(&[ObfuscationTechnique::Webpack]),
            UNPACK_TRIGGERS
        ));
    }

    #[test]
    fn test_merge_promotes_packer_and_drops_unknown() {
        let detected = tags(&[ObfuscationTechnique::Unknown]);
        let records = vec![TransformationRecord::succeeded(
            "unpack",
            "Unpacked 1 Packer layers",
        )];
        assert_eq!(
            merge_obfuscation_types(&detected, &records),
            tags(&[ObfuscationTechnique::Packer])
        );
    }

    #[test]
    fn test_merge_ignores_failed_records() {
        let detected = tags(&[ObfuscationTechnique::Unknown]);
        let records = vec![TransformationRecord::failed("unpack", "Packer parse error")];
        assert_eq!(merge_obfuscation_types(&detected, &records), detected);
    }

    #[test]
    fn test_parse_failures_are_recorded() {
        let mut pipeline = DeobfuscationPipeline::new();
        let result = pipeline
            .deobfuscate("var = ;", &DeobfuscateOptions::default())
            .unwrap();
        assert_eq!(result.code, "var = ;");
        let passes = baseline_passes().len();
        assert_eq!(result.transformations.len(), passes + 1);
        assert!(result.transformations[..passes].iter().all(|t| !t.success));
        let optimizer = &result.transformations[passes];
        assert_eq!(optimizer.kind, "ast-optimize");
        assert!(optimizer.success);
        assert!(result.has_technique(ObfuscationTechnique::Unknown));
    }

    #[test]
    fn test_optimizer_noop_is_recorded() {
        let mut pipeline = DeobfuscationPipeline::new();
        let result = pipeline
            .deobfuscate("console.log(x);", &DeobfuscateOptions::default())
            .unwrap();
        let optimizer = result
            .transformations
            .iter()
            .find(|t| t.kind == "ast-optimize")
            .unwrap();
        assert!(optimizer.success);
        assert_eq!(optimizer.description, "No structural simplifications applied");
    }
}
