use anyhow::anyhow;
use jsreveal_core::{DeobfuscateOptions, ObfuscationTechnique};
use jsreveal_transform::{
    optimize, DeobfuscationPipeline, StageError, StageResult, UnpackOutcome, Unpacker,
};
use std::sync::Arc;

const PACKED: &str = r"eval(function(p,a,c,k,e,d){e=function(c){return c.toString(36)};while(c--){if(k[c]){p=p.replace(new RegExp('\\b'+e(c)+'\\b','g'),k[c])}}return p}('0 1=2;3(1)',4,4,'var|greeting|10|alert'.split('|'),0,{}))";

const FLATTENED: &str = "var _0x1 = ['log', 'hello'];\n\
function main() {\n  var o = '1|0'.split('|'), i = 0;\n  while (true) {\n    switch (o[i++]) {\n      case '0': console[_0x1[0]](_0x1[1]); continue;\n      case '1': init(); continue;\n    }\n    break;\n  }\n}";

struct ExplodingUnpacker;

impl Unpacker for ExplodingUnpacker {
    fn name(&self) -> &str {
        "exploding"
    }

    fn unpack(&self, _code: &str) -> StageResult<Option<UnpackOutcome>> {
        Err(StageError::collaborator(anyhow!("unpacker crashed")))
    }
}

#[test]
fn test_optimize_never_throws() {
    let inputs = [
        "",
        "var = ;",
        "function (",
        "}}}{{{",
        "if (true) { a(); } else { b(); }",
        "x = 1 + 2 * 3;",
        "\u{200b}\u{200c}",
    ];
    for input in inputs {
        let out = optimize(input);
        if jsreveal_parser::check(input) {
            assert!(jsreveal_parser::check(&out), "optimize broke {:?}", input);
        } else {
            assert_eq!(out, input);
        }
    }
}

#[test]
fn test_repeat_call_returns_cached_object() {
    let mut pipeline = DeobfuscationPipeline::new();
    let options = DeobfuscateOptions::default();
    let first = pipeline.deobfuscate("var a = 1 + 2;", &options).unwrap();
    let second = pipeline.deobfuscate("var a = 1 + 2;", &options).unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let renamed = DeobfuscateOptions {
        rename_variables: true,
        ..Default::default()
    };
    let third = pipeline.deobfuscate("var a = 1 + 2;", &renamed).unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(pipeline.cache().len(), 2);
}

#[test]
fn test_collaborator_failure_aborts_call() {
    let mut pipeline = DeobfuscationPipeline::new().with_unpacker(Box::new(ExplodingUnpacker));
    let options = DeobfuscateOptions {
        unpack: Some(true),
        ..Default::default()
    };
    let err = pipeline.deobfuscate("a();", &options).unwrap_err();
    assert_eq!(err.stage(), "unpack");
    assert!(pipeline.cache().is_empty());
}

#[test]
fn test_explicit_off_skips_collaborator() {
    let mut pipeline = DeobfuscationPipeline::new().with_unpacker(Box::new(ExplodingUnpacker));
    let options = DeobfuscateOptions {
        unpack: Some(false),
        ..Default::default()
    };
    assert!(pipeline.deobfuscate(PACKED, &options).is_ok());
}

#[test]
fn test_malformed_input_still_returns_result() {
    let mut pipeline = DeobfuscationPipeline::new();
    let result = pipeline
        .deobfuscate("function (", &DeobfuscateOptions::aggressive())
        .unwrap();
    assert_eq!(result.code, "function (");
    assert!(result.transformations.iter().any(|t| !t.success));
    assert!(result.confidence >= 0.1 && result.confidence <= 0.95);
}

#[test]
fn test_packer_is_unpacked_and_tagged() {
    let mut pipeline = DeobfuscationPipeline::new();
    let result = pipeline
        .deobfuscate(PACKED, &DeobfuscateOptions::default())
        .unwrap();
    assert_eq!(result.code, "var greeting=10;alert(greeting)");
    assert!(result.has_technique(ObfuscationTechnique::Packer));
    assert!(!result.has_technique(ObfuscationTechnique::Unknown));
    assert_eq!(result.transformations[0].kind, "unpack");
}

#[test]
fn test_flattened_string_array_program() {
    let mut pipeline = DeobfuscationPipeline::new();
    let result = pipeline
        .deobfuscate(FLATTENED, &DeobfuscateOptions::default())
        .unwrap();
    assert!(result.code.contains("init();\n  console.log('hello');"), "{}", result.code);
    assert!(!result.code.contains("switch"));
    assert!(!result.code.contains("_0x1"));
    assert!(result.has_technique(ObfuscationTechnique::ControlFlowFlattening));
    assert!(result.unresolved_parts.is_empty());
}

#[test]
fn test_rename_option() {
    let mut pipeline = DeobfuscationPipeline::new();
    let options = DeobfuscateOptions {
        rename_variables: true,
        ..Default::default()
    };
    let result = pipeline
        .deobfuscate("function _0xab(_0xcd) { return _0xcd * 2; }\n_0xab(window.x);", &options)
        .unwrap();
    assert_eq!(
        result.code,
        "function func_0(arg_0) { return arg_0 * 2; }\nfunc_0(window.x);"
    );
    assert!(result
        .successful_transformations()
        .any(|t| t.kind == "rename"));
}

#[test]
fn test_llm_without_provider_is_advisory() {
    let mut pipeline = DeobfuscationPipeline::new();
    let options = DeobfuscateOptions {
        llm: true,
        ..Default::default()
    };
    let result = pipeline.deobfuscate("a();", &options).unwrap();
    assert_eq!(result.analysis, None);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.starts_with("LLM analysis unavailable")));
}

#[test]
fn test_constant_ternary_collapses() {
    let mut pipeline = DeobfuscationPipeline::new();
    let result = pipeline
        .deobfuscate("var a = true ? x : y;", &DeobfuscateOptions::default())
        .unwrap();
    assert_eq!(result.code, "var a = x;");
    assert_eq!(optimize("var b = 1 > 2 ? x : y;"), "var b = y;");
}

#[test]
fn test_interpreter_reported_once() {
    let vm = "function run(code) {\n  var pc = 0, r1 = 0;\n  debugger;\n  while (true) {\n    switch (code[pc++]) {\n      case 0: r1 = code[pc++]; break;\n      case 1: out(r1); break;\n      case 2: return;\n    }\n  }\n}";
    let mut pipeline = DeobfuscationPipeline::new();
    for options in [DeobfuscateOptions::default(), DeobfuscateOptions::aggressive()] {
        let result = pipeline.deobfuscate(vm, &options).unwrap();
        assert_eq!(result.unresolved_parts.len(), 1, "{:?}", result.unresolved_parts);
        assert!(result.unresolved_parts[0].reason.contains("interpreter dispatching 3 opcodes"));
    }
}
