//! Resolves calls into string-array decoder functions of the shape
//! `function(i) { i = i - K; var s = ARR[i]; ... return s; }`.

use super::DeobfuscationPass;
use crate::const_eval::{evaluate, JsValue};
use crate::errors::{AttemptResult, StageResult};
use crate::rewrite::{
    contains, finish, identifier_refs, node_text, remove_statement, sole_declaration,
};
use base64::alphabet::{self, Alphabet};
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use jsreveal_parser::literal::{decode_string_literal, parse_number_literal, render_string_literal, NumberLiteral};
use jsreveal_parser::walk::{called_property, code_children};
use jsreveal_parser::{parse, unwrap_parens, visit, EditSet, SourceTree};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use tracing::debug;
use tree_sitter::Node;

const LOWER_FIRST_ALPHABET: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+/";
const STANDARD_ALPHABET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

fn lenient_config() -> GeneralPurposeConfig {
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true)
}

static STANDARD_ENGINE: Lazy<GeneralPurpose> =
    Lazy::new(|| GeneralPurpose::new(&alphabet::STANDARD, lenient_config()));

static LOWER_FIRST_ENGINE: Lazy<Option<GeneralPurpose>> = Lazy::new(|| {
    Alphabet::new(LOWER_FIRST_ALPHABET)
        .ok()
        .map(|a| GeneralPurpose::new(&a, lenient_config()))
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    Plain,
    Base64Standard,
    /// The javascript-obfuscator alphabet, lowercase letters first.
    Base64LowerFirst,
}

/// Where a decoder's strings live.
#[derive(Debug, Clone)]
pub struct ArraySource<'t> {
    /// Name the rest of the program uses for it: the array variable or the function returning it.
    pub name: String,
    pub literal: Node<'t>,
    pub statement: Option<Node<'t>>,
    pub strings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Decoder<'t> {
    pub name: String,
    pub function: Node<'t>,
    pub statement: Option<Node<'t>>,
    pub array: ArraySource<'t>,
    pub offset: f64,
    pub encoding: StringEncoding,
    pub utf8: bool,
}

impl Decoder<'_> {
    /// Decodes entry `index` of `strings`, applying the decoder's offset and encoding.
    pub fn decode(&self, strings: &[String], index: f64) -> Option<String> {
        let slot = index - self.offset;
        if !slot.is_finite() || slot < 0.0 || slot.fract() != 0.0 {
            return None;
        }
        let raw = strings.get(slot as usize)?;
        let bytes = match self.encoding {
            StringEncoding::Plain => return Some(raw.clone()),
            StringEncoding::Base64Standard => STANDARD_ENGINE.decode(base64_body(raw)).ok()?,
            StringEncoding::Base64LowerFirst => LOWER_FIRST_ENGINE
                .as_ref()?
                .decode(base64_body(raw))
                .ok()?,
        };
        if self.utf8 {
            if let Ok(text) = String::from_utf8(bytes.clone()) {
                return Some(text);
            }
        }
        Some(bytes.into_iter().map(char::from).collect())
    }

    pub fn resolve(&self, index: f64) -> Option<String> {
        self.decode(&self.array.strings, index)
    }
}

fn base64_body(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .collect()
}

/// Index argument of a decoder call: a number, or a string holding one (`'0x1f'`).
pub fn index_argument(node: Node<'_>, source: &str) -> Option<f64> {
    match evaluate(node, source)? {
        JsValue::Number(n) => Some(n),
        JsValue::Str(s) => match parse_number_literal(s.trim())? {
            NumberLiteral::Number(n) => Some(n),
            NumberLiteral::BigInt(_) => None,
        },
        _ => None,
    }
}

fn is_function_value(node: Node<'_>) -> bool {
    matches!(
        node.kind(),
        "function_expression" | "function" | "arrow_function"
    )
}

fn string_array_values(array: Node<'_>, source: &str) -> Option<Vec<String>> {
    if array.kind() != "array" {
        return None;
    }
    let elements = code_children(array);
    if elements.is_empty() {
        return None;
    }
    elements
        .iter()
        .map(|e| {
            if e.kind() == "string" {
                decode_string_literal(node_text(*e, source))
            } else {
                None
            }
        })
        .collect()
}

fn declarators_named<'t>(tree: &'t SourceTree, name: &str) -> Vec<Node<'t>> {
    tree.nodes_of_kind("variable_declarator")
        .into_iter()
        .filter(|d| {
            d.child_by_field_name("name")
                .map_or(false, |n| tree.text(n) == name)
        })
        .collect()
}

pub(crate) fn find_array<'t>(tree: &'t SourceTree, body: Node<'t>, name: &str) -> Option<ArraySource<'t>> {
    let source = tree.source();
    for declarator in declarators_named(tree, name) {
        let Some(value) = declarator.child_by_field_name("value") else {
            continue;
        };
        if let Some(strings) = string_array_values(value, source) {
            return Some(ArraySource {
                name: name.to_string(),
                literal: value,
                statement: sole_declaration(declarator),
                strings,
            });
        }
        // `var a = arrayFn();` inside the decoder, where `arrayFn` holds the literal.
        if value.kind() == "call_expression" && contains(body, declarator) {
            let callee = unwrap_parens(value.child_by_field_name("function")?);
            if callee.kind() != "identifier" {
                continue;
            }
            let fn_name = tree.text(callee);
            for function in tree.nodes_of_kind("function_declaration") {
                if function
                    .child_by_field_name("name")
                    .map_or(true, |n| tree.text(n) != fn_name)
                {
                    continue;
                }
                let mut found = None;
                visit(function, |node| {
                    if found.is_none() && node.kind() == "array" {
                        if let Some(strings) = string_array_values(node, source) {
                            found = Some((node, strings));
                        }
                    }
                    found.is_none()
                });
                if let Some((literal, strings)) = found {
                    return Some(ArraySource {
                        name: fn_name.to_string(),
                        literal,
                        statement: Some(function),
                        strings,
                    });
                }
            }
        }
    }
    None
}

fn decoder_offset(body: Node<'_>, source: &str, param: &str) -> f64 {
    let mut offset = 0.0;
    visit(body, |node| {
        match node.kind() {
            "assignment_expression" => {
                let left = node.child_by_field_name("left");
                let right = node.child_by_field_name("right").map(unwrap_parens);
                if let (Some(left), Some(right)) = (left, right) {
                    if node_text(left, source) == param && right.kind() == "binary_expression" {
                        let op = right
                            .child_by_field_name("operator")
                            .map(|o| node_text(o, source));
                        let base = right.child_by_field_name("left").map(|l| node_text(l, source));
                        let amount = right
                            .child_by_field_name("right")
                            .and_then(|r| evaluate(r, source));
                        if let (Some(op), Some(base), Some(JsValue::Number(k))) = (op, base, amount) {
                            if base == param {
                                match op {
                                    "-" => offset = k,
                                    "+" => offset = -k,
                                    _ => {}
                                }
                            }
                        }
                    }
                }
            }
            "augmented_assignment_expression" => {
                let left = node.child_by_field_name("left").map(|l| node_text(l, source));
                let op = node.child_by_field_name("operator").map(|o| node_text(o, source));
                let amount = node
                    .child_by_field_name("right")
                    .and_then(|r| evaluate(r, source));
                if let (Some(left), Some(op), Some(JsValue::Number(k))) = (left, op, amount) {
                    if left == param {
                        match op {
                            "-=" => offset = k,
                            "+=" => offset = -k,
                            _ => {}
                        }
                    }
                }
            }
            _ => {}
        }
        true
    });
    offset
}

fn indexed_array_name<'s>(body: Node<'_>, source: &'s str, param: &str) -> Option<&'s str> {
    let mut name = None;
    visit(body, |node| {
        if name.is_some() {
            return false;
        }
        if node.kind() == "subscript_expression" {
            let object = node.child_by_field_name("object");
            let index = node.child_by_field_name("index").map(unwrap_parens);
            if let (Some(object), Some(index)) = (object, index) {
                if object.kind() == "identifier" && node_text(index, source) == param {
                    name = Some(node_text(object, source));
                }
            }
        }
        true
    });
    name
}

fn build_decoder<'t>(
    tree: &'t SourceTree,
    name: String,
    function: Node<'t>,
    statement: Option<Node<'t>>,
) -> Option<Decoder<'t>> {
    let source = tree.source();
    let params = function
        .child_by_field_name("parameters")
        .map(code_children)
        .or_else(|| function.child_by_field_name("parameter").map(|p| vec![p]))?;
    let body = function.child_by_field_name("body")?;
    let first = params.first().filter(|p| p.kind() == "identifier")?;
    let param = node_text(*first, source);

    // A used second parameter is an RC4 key; those decoders are not resolved statically.
    if let Some(second) = params.get(1) {
        if !identifier_refs(body, source, node_text(*second, source)).is_empty() {
            return None;
        }
    }

    let array_name = indexed_array_name(body, source, param)?;
    let array = find_array(tree, body, array_name)?;
    let body_text = node_text(body, source);
    let encoding = if body_text.contains(LOWER_FIRST_ALPHABET) {
        StringEncoding::Base64LowerFirst
    } else if body_text.contains(STANDARD_ALPHABET) || body_text.contains("atob") {
        StringEncoding::Base64Standard
    } else {
        StringEncoding::Plain
    };

    Some(Decoder {
        name,
        function,
        statement,
        array,
        offset: decoder_offset(body, source, param),
        encoding,
        utf8: body_text.contains("decodeURIComponent"),
    })
}

pub fn find_decoders(tree: &SourceTree) -> Vec<Decoder<'_>> {
    let mut decoders = Vec::new();
    for node in tree.nodes() {
        match node.kind() {
            "function_declaration" => {
                if let Some(name) = node.child_by_field_name("name") {
                    let name = tree.text(name).to_string();
                    decoders.extend(build_decoder(tree, name, node, Some(node)));
                }
            }
            "variable_declarator" => {
                let name = node.child_by_field_name("name");
                let value = node.child_by_field_name("value");
                if let (Some(name), Some(value)) = (name, value) {
                    if name.kind() == "identifier" && is_function_value(value) {
                        let name = tree.text(name).to_string();
                        decoders.extend(build_decoder(tree, name, value, sole_declaration(node)));
                    }
                }
            }
            _ => {}
        }
    }
    decoders
}

/// Names that a `push(shift())` rotation loop touches, directly or as IIFE arguments.
pub fn rotated_names(tree: &SourceTree) -> HashSet<String> {
    let source = tree.source();
    let mut names = HashSet::new();
    for call in tree.nodes_of_kind("call_expression") {
        if called_property(call, source) != Some("push") {
            continue;
        }
        let rotates = call
            .child_by_field_name("arguments")
            .map(code_children)
            .unwrap_or_default()
            .iter()
            .any(|a| a.kind() == "call_expression" && called_property(*a, source) == Some("shift"));
        if !rotates {
            continue;
        }
        if let Some(object) = call
            .child_by_field_name("function")
            .and_then(|f| f.child_by_field_name("object"))
        {
            names.insert(node_text(object, source).to_string());
        }
        let mut ancestor = call.parent();
        while let Some(node) = ancestor {
            if node.kind() == "call_expression" {
                if let Some(args) = node.child_by_field_name("arguments") {
                    for arg in code_children(args) {
                        if arg.kind() == "identifier" {
                            names.insert(node_text(arg, source).to_string());
                        }
                    }
                }
            }
            ancestor = node.parent();
        }
    }
    names
}

/// `var alias = decoder;` declarators.
fn aliases<'t>(tree: &'t SourceTree, decoder: &str) -> Vec<(String, Node<'t>)> {
    tree.nodes_of_kind("variable_declarator")
        .into_iter()
        .filter_map(|d| {
            let name = d.child_by_field_name("name")?;
            let value = d.child_by_field_name("value")?;
            (value.kind() == "identifier" && tree.text(value) == decoder)
                .then(|| (tree.text(name).to_string(), d))
        })
        .collect()
}

pub struct ArrayDecryptPass;

impl DeobfuscationPass for ArrayDecryptPass {
    fn name(&self) -> &'static str {
        "array-decrypt"
    }

    fn description(&self) -> &'static str {
        "Resolved string-array decoder calls"
    }

    fn run(&self, code: &str) -> StageResult<AttemptResult> {
        let tree = parse(code)?;
        let source = tree.source();
        let decoders = find_decoders(&tree);
        if decoders.is_empty() {
            return Ok(AttemptResult::Unchanged);
        }
        let rotated = rotated_names(&tree);
        let calls = tree.nodes_of_kind("call_expression");
        let mut edits = EditSet::new();

        for decoder in &decoders {
            if rotated.contains(&decoder.array.name) {
                debug!(decoder = %decoder.name, "array still rotated at runtime, skipping");
                continue;
            }
            let alias_decls = aliases(&tree, &decoder.name);
            let mut callees: HashSet<&str> = alias_decls.iter().map(|(n, _)| n.as_str()).collect();
            callees.insert(decoder.name.as_str());

            let mut resolved: HashSet<usize> = HashSet::new();
            let mut unresolved = 0usize;
            for call in &calls {
                let Some(callee) = call.child_by_field_name("function") else {
                    continue;
                };
                if callee.kind() != "identifier"
                    || !callees.contains(node_text(callee, source))
                    || contains(decoder.function, *call)
                {
                    continue;
                }
                let value = call
                    .child_by_field_name("arguments")
                    .and_then(|args| code_children(args).into_iter().next())
                    .and_then(|arg| index_argument(arg, source))
                    .and_then(|index| decoder.resolve(index));
                match value {
                    Some(text) if edits.replace(call.byte_range(), render_string_literal(&text, '\'')) => {
                        resolved.insert(callee.id());
                    }
                    _ => unresolved += 1,
                }
            }
            if resolved.is_empty() {
                continue;
            }
            debug!(decoder = %decoder.name, resolved = resolved.len(), unresolved, "decoded call sites");
            if unresolved == 0 {
                remove_unused(&tree, decoder, &alias_decls, &resolved, &mut edits);
            }
        }

        Ok(finish(code, &edits))
    }
}

fn remove_unused(
    tree: &SourceTree,
    decoder: &Decoder<'_>,
    alias_decls: &[(String, Node<'_>)],
    resolved: &HashSet<usize>,
    edits: &mut EditSet,
) {
    let source = tree.source();
    let Some(statement) = decoder.statement else {
        return;
    };
    let alias_statements: Option<Vec<Node<'_>>> =
        alias_decls.iter().map(|(_, d)| sole_declaration(*d)).collect();
    let Some(alias_statements) = alias_statements else {
        return;
    };

    let mut names = vec![decoder.name.as_str()];
    names.extend(alias_decls.iter().map(|(n, _)| n.as_str()));
    let accounted = names.iter().all(|name| {
        identifier_refs(tree.root(), source, name).into_iter().all(|r| {
            resolved.contains(&r.id())
                || contains(statement, r)
                || alias_statements.iter().any(|s| contains(*s, r))
        })
    });
    if !accounted {
        return;
    }

    remove_statement(edits, statement, source);
    for alias in &alias_statements {
        remove_statement(edits, *alias, source);
    }
    if let Some(array_statement) = decoder.array.statement {
        let array_unused = identifier_refs(tree.root(), source, &decoder.array.name)
            .into_iter()
            .all(|r| contains(statement, r) || contains(array_statement, r));
        if array_unused {
            remove_statement(edits, array_statement, source);
        }
    }
}
