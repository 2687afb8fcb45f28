//! The advanced-technique stage.
//!
//! Each detector runs independently over the output of the previous one. A detector that finds
//! nothing, or whose rewrite would break the syntax, leaves the code as it was and the stage moves
//! on. Only a parse failure of the stage's input aborts it, and that is recoverable upstream.

pub mod invisible;
pub mod predicates;
pub mod rotation;
pub mod vm;

use crate::dispatch::find_dispatch_loops;
use crate::errors::{AttemptResult, StageResult};
use crate::passes::unflatten::unflatten_tree;
use crate::passes::{DeobfuscationPass, StringDecodePass};
use crate::rewrite::finish;
use jsreveal_core::completion::{build_vm_cleanup_prompt, first_code_block};
use jsreveal_core::{
    clamp_confidence, CompletionProvider, ObfuscationTechnique, TransformationRecord,
    UnresolvedPart,
};
use jsreveal_parser::literal::has_encoded_escapes;
use jsreveal_parser::{check, parse, parse_lenient, EditSet, SourceTree};
use predicates::Guard;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct AdvancedReport {
    pub code: String,
    pub transformations: Vec<TransformationRecord>,
    pub warnings: Vec<String>,
    pub unresolved: Vec<UnresolvedPart>,
    pub techniques_addressed: BTreeSet<ObfuscationTechnique>,
    pub confidence: f64,
}

/// Accumulates one run's output while the detectors rewrite `code` in turn.
struct StageRun {
    code: String,
    transformations: Vec<TransformationRecord>,
    warnings: Vec<String>,
    unresolved: Vec<UnresolvedPart>,
    addressed: BTreeSet<ObfuscationTechnique>,
}

impl StageRun {
    fn tree(&self) -> StageResult<SourceTree> {
        Ok(parse(&self.code)?)
    }

    /// Applies `edits` and credits `technique` when the result still parses.
    fn apply(
        &mut self,
        edits: &EditSet,
        technique: ObfuscationTechnique,
        kind: &str,
        description: String,
    ) -> bool {
        match finish(&self.code, edits) {
            AttemptResult::Changed(code) => {
                self.code = code;
                self.addressed.insert(technique);
                self.transformations
                    .push(TransformationRecord::succeeded(kind, description));
                true
            }
            AttemptResult::Unchanged => false,
            AttemptResult::Failed(reason) => {
                warn!(kind, %reason, "advanced rewrite rejected");
                self.warnings
                    .push(format!("{} rewrite skipped: {}", kind, reason));
                false
            }
        }
    }
}

/// Detects and neutralizes VM protection, flattening, dead code, opaque predicates, string-array
/// rotation and hidden or encoded strings.
#[derive(Default)]
pub struct AdvancedStage {
    provider: Option<Arc<dyn CompletionProvider>>,
    aggressive: bool,
    llm_cleanup: bool,
    vm_reported: bool,
}

impl AdvancedStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: Option<Arc<dyn CompletionProvider>>) -> Self {
        self.provider = provider;
        self
    }

    /// Also replace recognized interpreter loops instead of only reporting them.
    pub fn aggressive(mut self, aggressive: bool) -> Self {
        self.aggressive = aggressive;
        self
    }

    pub fn llm_cleanup(mut self, enabled: bool) -> Self {
        self.llm_cleanup = enabled;
        self
    }

    /// Interpreter loops were already reported as unresolved by an earlier stage.
    pub fn vm_reported(mut self, reported: bool) -> Self {
        self.vm_reported = reported;
        self
    }

    pub fn run(
        &self,
        code: &str,
        detected: &BTreeSet<ObfuscationTechnique>,
    ) -> StageResult<AdvancedReport> {
        let mut run = StageRun {
            code: code.to_string(),
            transformations: Vec::new(),
            warnings: Vec::new(),
            unresolved: Vec::new(),
            addressed: BTreeSet::new(),
        };

        self.decode_invisible(&mut run);
        // Everything after this point needs a tree.
        run.tree()?;

        self.decode_strings(&mut run)?;
        self.derotate(&mut run)?;
        self.unflatten(&mut run)?;
        self.handle_vm(&mut run)?;
        self.remove_dead_code(&mut run)?;
        self.remove_opaque_predicates(&mut run)?;
        self.llm_pass(&mut run, detected);

        let complexity = complexity(&run.code);
        let confidence = clamp_confidence(
            0.5 + 0.1 * run.addressed.len() as f64
                - 0.05 * run.warnings.len() as f64
                - 0.1 * complexity,
        );
        debug!(
            addressed = run.addressed.len(),
            warnings = run.warnings.len(),
            confidence,
            "advanced stage finished"
        );

        Ok(AdvancedReport {
            code: run.code,
            transformations: run.transformations,
            warnings: run.warnings,
            unresolved: run.unresolved,
            techniques_addressed: run.addressed,
            confidence,
        })
    }

    fn decode_invisible(&self, run: &mut StageRun) {
        if !invisible::detect(&run.code) {
            return;
        }
        let Some(decoded) = invisible::decode(&run.code) else {
            return;
        };
        // A `#!` line must stay first.
        let split = if decoded.code.starts_with("#!") {
            decoded.code.find('\n').map_or(decoded.code.len(), |i| i + 1)
        } else {
            0
        };
        let (shebang, body) = decoded.code.split_at(split);
        let mut code = shebang.to_string();
        if !shebang.is_empty() && !shebang.ends_with('\n') {
            code.push('\n');
        }
        for payload in &decoded.payloads {
            code.push_str(&format!(
                "/* hidden payload: {} */\n",
                payload.replace("*/", "* /")
            ));
        }
        code.push_str(body);
        run.code = code;
        run.addressed.insert(ObfuscationTechnique::InvisibleUnicode);
        run.transformations.push(TransformationRecord::succeeded(
            "invisible-unicode",
            format!(
                "Stripped zero-width character runs ({} hidden payloads recovered)",
                decoded.payloads.len()
            ),
        ));
    }

    fn decode_strings(&self, run: &mut StageRun) -> StageResult<()> {
        let tree = run.tree()?;
        let encoded = tree
            .nodes_of_kind("string")
            .into_iter()
            .any(|s| has_encoded_escapes(tree.text(s)));
        if !encoded {
            return Ok(());
        }
        if let AttemptResult::Changed(code) = StringDecodePass.run(&run.code)? {
            run.code = code;
            run.addressed.insert(ObfuscationTechnique::HexEncoding);
            run.transformations.push(TransformationRecord::succeeded(
                "string-encoding",
                "Decoded hex and unicode escaped strings",
            ));
        }
        Ok(())
    }

    fn derotate(&self, run: &mut StageRun) -> StageResult<()> {
        let tree = run.tree()?;
        let report = rotation::derotate(&tree);
        if report.found == 0 {
            return Ok(());
        }
        run.warnings.extend(report.warnings);
        run.unresolved.extend(report.unresolved);
        if report.derotated > 0 {
            run.apply(
                &report.edits,
                ObfuscationTechnique::StringArrayRotation,
                "string-array-rotation",
                format!("Derotated {} string arrays", report.derotated),
            );
        }
        Ok(())
    }

    fn unflatten(&self, run: &mut StageRun) -> StageResult<()> {
        let tree = run.tree()?;
        let candidates: Vec<_> = find_dispatch_loops(tree.root(), tree.source())
            .into_iter()
            .filter(|d| !d.looks_like_interpreter())
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }
        let (edits, restored) = unflatten_tree(&tree);
        if restored > 0 {
            run.apply(
                &edits,
                ObfuscationTechnique::ControlFlowFlattening,
                "control-flow-flattening",
                format!("Linearized {} flattened dispatch loops", restored),
            );
        }
        if restored < candidates.len() {
            run.warnings.push(format!(
                "{} flattened dispatch loops could not be linearized",
                candidates.len() - restored
            ));
        }
        Ok(())
    }

    fn handle_vm(&self, run: &mut StageRun) -> StageResult<()> {
        let tree = run.tree()?;
        let interpreters: Vec<_> = find_dispatch_loops(tree.root(), tree.source())
            .into_iter()
            .filter(|d| d.looks_like_interpreter())
            .collect();
        if interpreters.is_empty() {
            return Ok(());
        }

        if !self.vm_reported {
            for dispatch in &interpreters {
                run.unresolved.push(UnresolvedPart::new(
                    dispatch.location.clone(),
                    format!(
                        "{} VM interpreter with {} opcodes; bytecode is not executed",
                        vm::VmKind::of(dispatch),
                        dispatch.case_count
                    ),
                    "Trace the interpreter at runtime and lift the executed opcodes by hand",
                ));
            }
        }

        if !self.aggressive {
            run.warnings.push(format!(
                "{} VM interpreter loops detected; enable aggressive mode to replace them",
                interpreters.len()
            ));
            return Ok(());
        }

        let (edits, removed) = vm::neutralize(&tree, &interpreters);
        if removed > 0 {
            run.apply(
                &edits,
                ObfuscationTechnique::VmProtection,
                "vm-protection",
                format!("Replaced {} VM interpreter loops with markers", removed),
            );
        }
        Ok(())
    }

    fn remove_dead_code(&self, run: &mut StageRun) -> StageResult<()> {
        let tree = run.tree()?;
        let (edits, pruned) = predicates::prune_guards(&tree, Guard::Literal);
        if pruned > 0 {
            run.apply(
                &edits,
                ObfuscationTechnique::DeadCodeInjection,
                "dead-code",
                format!("Removed {} constant-guarded branches", pruned),
            );
        }

        let tree = run.tree()?;
        let (edits, removed) = predicates::remove_unreachable(&tree);
        if removed > 0 {
            run.apply(
                &edits,
                ObfuscationTechnique::DeadCodeInjection,
                "dead-code",
                format!("Removed {} unreachable statements", removed),
            );
        }
        Ok(())
    }

    fn remove_opaque_predicates(&self, run: &mut StageRun) -> StageResult<()> {
        let tree = run.tree()?;
        let (edits, pruned) = predicates::prune_guards(&tree, Guard::Comparison);
        if pruned > 0 {
            run.apply(
                &edits,
                ObfuscationTechnique::OpaquePredicates,
                "opaque-predicates",
                format!("Resolved {} opaque predicates", pruned),
            );
        }
        Ok(())
    }

    /// Advisory: any failure keeps the code from before the call.
    fn llm_pass(&self, run: &mut StageRun, detected: &BTreeSet<ObfuscationTechnique>) {
        if !self.llm_cleanup {
            return;
        }
        let Some(provider) = &self.provider else {
            run.warnings
                .push("LLM cleanup requested but no completion provider is configured".to_string());
            return;
        };
        let techniques: Vec<ObfuscationTechnique> = detected.iter().copied().collect();
        let messages = build_vm_cleanup_prompt(&run.code, &techniques);
        let response = match provider.chat(&messages) {
            Ok(response) => response,
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "LLM cleanup failed");
                run.warnings.push(format!("LLM cleanup failed: {}", e));
                return;
            }
        };
        match first_code_block(&response.content) {
            Some(cleaned) if check(cleaned) && cleaned != run.code => {
                run.code = cleaned.to_string();
                run.transformations.push(TransformationRecord::succeeded(
                    "llm-cleanup",
                    format!("Simplified with {}", provider.name()),
                ));
            }
            Some(cleaned) if cleaned == run.code => {}
            _ => run
                .warnings
                .push("LLM cleanup returned no valid code; kept the previous result".to_string()),
        }
    }
}

/// Branch and loop density of `code`, in `[0, 1]`.
pub fn complexity(code: &str) -> f64 {
    let Ok(tree) = parse_lenient(code) else {
        return 1.0;
    };
    let mut statements = 0usize;
    let mut branches = 0usize;
    tree.walk(|node| {
        let kind = node.kind();
        if kind.ends_with("_statement") || kind.ends_with("_declaration") {
            statements += 1;
        }
        if matches!(
            kind,
            "if_statement"
                | "switch_case"
                | "ternary_expression"
                | "while_statement"
                | "do_statement"
                | "for_statement"
                | "for_in_statement"
        ) {
            branches += 1;
        }
    });
    if statements == 0 {
        return 0.0;
    }
    (branches as f64 / statements as f64).min(1.0)
}
