//! JSVMP detection and cleanup (stage 2 collaborator).
//!
//! The detector describes what it finds and strips the anti-debugging noise around interpreters.
//! Bytecode is never executed, so every interpreter loop is reported as unresolved.

use crate::advanced::vm::{bytecode_tables, VmKind};
use crate::dispatch::find_dispatch_loops;
use crate::errors::{AttemptResult, StageResult};
use crate::rewrite::{finish, remove_statement};
use jsreveal_core::UnresolvedPart;
use jsreveal_parser::{parse, EditSet};
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmAnalysis {
    pub detected: bool,
    pub vm_kind: VmKind,
    pub interpreters: usize,
    pub opcode_count: usize,
    pub bytecode_tables: Vec<String>,
    pub debugger_statements: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VmOutcome {
    pub code: String,
    pub analysis: VmAnalysis,
    pub description: String,
    pub warnings: Vec<String>,
    pub unresolved: Vec<UnresolvedPart>,
}

/// Stage 2 collaborator. `Ok(None)` means no interpreter was found.
pub trait VmDeobfuscator: Send + Sync {
    fn name(&self) -> &str;

    fn deobfuscate(&self, code: &str) -> StageResult<Option<VmOutcome>>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsvmpDetector;

impl VmDeobfuscator for JsvmpDetector {
    fn name(&self) -> &str {
        "jsvmp"
    }

    fn deobfuscate(&self, code: &str) -> StageResult<Option<VmOutcome>> {
        let tree = parse(code)?;
        let source = tree.source();
        let interpreters: Vec<_> = find_dispatch_loops(tree.root(), source)
            .into_iter()
            .filter(|d| d.looks_like_interpreter())
            .collect();
        if interpreters.is_empty() {
            return Ok(None);
        }

        let vm_kind = interpreters
            .iter()
            .map(VmKind::of)
            .find(|k| *k != VmKind::Unknown)
            .unwrap_or(VmKind::Unknown);
        let opcode_count = interpreters.iter().map(|d| d.case_count).sum();
        let tables: Vec<String> = bytecode_tables(&tree)
            .into_iter()
            .map(|t| match t.name {
                Some(name) => format!("{} ({} entries, {})", name, t.len, t.location),
                None => format!("anonymous ({} entries, {})", t.len, t.location),
            })
            .collect();

        let mut edits = EditSet::new();
        let mut debugger_statements = 0;
        for statement in tree.nodes_of_kind("debugger_statement") {
            if remove_statement(&mut edits, statement, source) {
                debugger_statements += 1;
            }
        }

        let mut warnings = Vec::new();
        let cleaned = match finish(code, &edits) {
            AttemptResult::Changed(cleaned) => cleaned,
            AttemptResult::Unchanged => code.to_string(),
            AttemptResult::Failed(reason) => {
                warnings.push(format!("debugger removal skipped: {}", reason));
                debugger_statements = 0;
                code.to_string()
            }
        };

        let unresolved = interpreters
            .iter()
            .map(|d| {
                UnresolvedPart::new(
                    d.location.clone(),
                    format!(
                        "{} interpreter dispatching {} opcodes on `{}`",
                        VmKind::of(d),
                        d.case_count,
                        d.discriminant
                    ),
                    "Instrument the dispatch switch at runtime to recover the executed opcode trace",
                )
            })
            .collect();
        if tables.is_empty() {
            warnings.push(format!(
                "Interpreter at {} has no literal bytecode table; bytecode is loaded at runtime",
                interpreters[0].location
            ));
        }

        debug!(
            interpreters = interpreters.len(),
            opcode_count,
            tables = tables.len(),
            debugger_statements,
            "analyzed JSVMP code"
        );

        let description = format!(
            "Detected {} JSVMP interpreter ({} opcodes, {} bytecode tables), removed {} debugger statements",
            vm_kind,
            opcode_count,
            tables.len(),
            debugger_statements
        );
        Ok(Some(VmOutcome {
            code: cleaned,
            analysis: VmAnalysis {
                detected: true,
                vm_kind,
                interpreters: interpreters.len(),
                opcode_count,
                bytecode_tables: tables,
                debugger_statements,
            },
            description,
            warnings,
            unresolved,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM: &str = "function run(code) {\n  var pc = 0, r1 = 0;\n  debugger;\n  while (true) {\n    switch (code[pc++]) {\n      case 0: r1 = code[pc++]; break;\n      case 1: out(r1); break;\n      case 2: return;\n    }\n  }\n}";

    #[test]
    fn test_detects_register_vm_and_strips_debugger() {
        let outcome = JsvmpDetector.deobfuscate(VM).unwrap().unwrap();
        assert_eq!(outcome.analysis.vm_kind, VmKind::RegisterBased);
        assert_eq!(outcome.analysis.opcode_count, 3);
        assert_eq!(outcome.analysis.debugger_statements, 1);
        assert!(!outcome.code.contains("debugger"));
        assert_eq!(outcome.unresolved.len(), 1);
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn test_plain_code_has_no_vm() {
        assert!(JsvmpDetector.deobfuscate("a(); b();").unwrap().is_none());
    }

    #[test]
    fn test_unresolved_points_at_loop() {
        let outcome = JsvmpDetector.deobfuscate(VM).unwrap().unwrap();
        assert_eq!(outcome.unresolved[0].location, "line 4, column 3");
    }

    #[test]
    fn test_analysis_serializes_camel_case() {
        let outcome = JsvmpDetector.deobfuscate(VM).unwrap().unwrap();
        let value = serde_json::to_value(&outcome.analysis).unwrap();
        assert_eq!(value["vmKind"], "register-based");
    }
}
