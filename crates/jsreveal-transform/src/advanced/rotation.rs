//! String-array rotation wrappers.
//!
//! Obfuscators shuffle their string array at startup with an immediately-invoked function that
//! repeats `arr.push(arr.shift())`. Two shapes are undone statically:
//!
//! * a fixed count, `(function (a, n) { ... while (--n) a.push(a.shift()) ... }(arr, 0x1a3))`
//! * a checksum loop that rotates until a `parseInt(decode(..))` sum equals a target
//!
//! Either way the literal is rewritten in its final order and the wrapper is removed. A wrapper
//! whose rotation cannot be computed is left in place, since removing it alone would desync
//! every decoded string.

use crate::const_eval::{evaluate, JsValue};
use crate::passes::array_decrypt::{find_array, find_decoders, index_argument, Decoder};
use crate::rewrite::{contains, node_text, remove_statement};
use jsreveal_core::UnresolvedPart;
use jsreveal_parser::walk::{called_property, code_children};
use jsreveal_parser::{location_of, unwrap_parens, visit, EditSet, SourceTree, MAX_DEPTH};
use tracing::debug;
use tree_sitter::Node;

#[derive(Debug, Default)]
pub struct RotationReport {
    pub edits: EditSet,
    pub derotated: usize,
    pub found: usize,
    pub warnings: Vec<String>,
    pub unresolved: Vec<UnresolvedPart>,
}

fn is_rotation_call(call: Node<'_>, source: &str) -> bool {
    called_property(call, source) == Some("push")
        && call
            .child_by_field_name("arguments")
            .map(code_children)
            .unwrap_or_default()
            .iter()
            .any(|a| a.kind() == "call_expression" && called_property(*a, source) == Some("shift"))
}

fn rotates(node: Node<'_>, source: &str) -> bool {
    let mut found = false;
    visit(node, |n| {
        if !found && n.kind() == "call_expression" && is_rotation_call(n, source) {
            found = true;
        }
        !found
    });
    found
}

/// Immediately-invoked functions whose body runs a push/shift rotation.
pub fn rotation_wrappers<'t>(tree: &'t SourceTree) -> Vec<Node<'t>> {
    let source = tree.source();
    tree.nodes_of_kind("call_expression")
        .into_iter()
        .filter(|call| {
            call.child_by_field_name("function")
                .map(unwrap_parens)
                .map_or(false, |f| {
                    matches!(f.kind(), "function_expression" | "function") && rotates(f, source)
                })
        })
        .collect()
}

pub fn detect(tree: &SourceTree) -> bool {
    !rotation_wrappers(tree).is_empty()
}

fn enclosing_statement(node: Node<'_>) -> Option<Node<'_>> {
    let mut current = node.parent();
    while let Some(n) = current {
        match n.kind() {
            "parenthesized_expression" | "call_expression" => current = n.parent(),
            "expression_statement" => return Some(n),
            _ => return None,
        }
    }
    None
}

/// JavaScript `parseInt(s)` with the default radix.
pub fn parse_int(s: &str) -> f64 {
    let trimmed = s.trim_start();
    let (sign, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (-1.0, &trimmed[1..]),
        Some(b'+') => (1.0, &trimmed[1..]),
        _ => (1.0, trimmed),
    };
    let (radix, digits) = match rest.get(..2) {
        Some("0x") | Some("0X") => (16, &rest[2..]),
        _ => (10, rest),
    };
    let run: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if run.is_empty() {
        return f64::NAN;
    }
    let value = run
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0.0, |acc, d| acc * radix as f64 + d as f64);
    sign * value
}

/// Evaluates a checksum expression against one candidate ordering of the strings.
fn checksum(
    node: Node<'_>,
    source: &str,
    decoder: &Decoder<'_>,
    strings: &[String],
    depth: usize,
) -> Option<f64> {
    if depth > MAX_DEPTH {
        return None;
    }
    let node = unwrap_parens(node);
    match node.kind() {
        "number" => match evaluate(node, source)? {
            JsValue::Number(n) => Some(n),
            _ => None,
        },
        "unary_expression" => {
            let op = node_text(node.child_by_field_name("operator")?, source);
            let argument = node.child_by_field_name("argument")?;
            let value = checksum(argument, source, decoder, strings, depth + 1)?;
            match op {
                "-" => Some(-value),
                "+" => Some(value),
                _ => None,
            }
        }
        "binary_expression" => {
            let op = node_text(node.child_by_field_name("operator")?, source);
            let left = node.child_by_field_name("left")?;
            let right = node.child_by_field_name("right")?;
            let left = checksum(left, source, decoder, strings, depth + 1)?;
            let right = checksum(right, source, decoder, strings, depth + 1)?;
            match op {
                "+" => Some(left + right),
                "-" => Some(left - right),
                "*" => Some(left * right),
                "/" => Some(left / right),
                "%" => Some(left % right),
                _ => None,
            }
        }
        "call_expression" => {
            let callee = unwrap_parens(node.child_by_field_name("function")?);
            let args = code_children(node.child_by_field_name("arguments")?);
            if node_text(callee, source) == "parseInt" {
                let inner = *args.first()?;
                let text = decoded_call(inner, source, decoder, strings)?;
                return Some(parse_int(&text));
            }
            decoded_call(node, source, decoder, strings).map(|t| parse_int(&t))
        }
        _ => None,
    }
}

fn decoded_call(call: Node<'_>, source: &str, decoder: &Decoder<'_>, strings: &[String]) -> Option<String> {
    let call = unwrap_parens(call);
    if call.kind() != "call_expression" {
        return None;
    }
    let first = *code_children(call.child_by_field_name("arguments")?).first()?;
    decoder.decode(strings, index_argument(first, source)?)
}

/// The expression compared against the target inside a checksum loop.
fn checksum_expression<'t>(wrapper: Node<'t>, source: &str) -> Option<Node<'t>> {
    let mut found = None;
    visit(wrapper, |node| {
        if found.is_some() {
            return false;
        }
        if node.kind() == "variable_declarator" {
            if let Some(value) = node.child_by_field_name("value") {
                if node_text(value, source).contains("parseInt(") {
                    found = Some(value);
                }
            }
        }
        true
    });
    found
}

fn rotate_left<T: Clone>(items: &[T], by: usize) -> Vec<T> {
    if items.is_empty() {
        return Vec::new();
    }
    let by = by % items.len();
    items[by..].iter().chain(items[..by].iter()).cloned().collect()
}

/// Rotation count for the fixed-count shape.
fn fixed_count(function: Node<'_>, source: &str, count: f64) -> Option<usize> {
    let params = code_children(function.child_by_field_name("parameters")?);
    let count_param = node_text(*params.get(1)?, source);
    let body = node_text(function.child_by_field_name("body")?, source);
    let pre_increment = body.contains(&format!("++{}", count_param));
    let loop_decrements = body.contains(&format!("while (--{})", count_param))
        || body.contains(&format!("while(--{})", count_param));
    if !(count.is_finite() && count >= 0.0 && count.fract() == 0.0) {
        return None;
    }
    let count = count as usize;
    if loop_decrements && !pre_increment {
        return Some(count.saturating_sub(1));
    }
    Some(count)
}

pub fn derotate(tree: &SourceTree) -> RotationReport {
    let source = tree.source();
    let decoders = find_decoders(tree);
    let mut report = RotationReport::default();

    for wrapper in rotation_wrappers(tree) {
        report.found += 1;
        let location = location_of(wrapper);
        let solved = solve(tree, wrapper, &decoders);
        let statement = enclosing_statement(wrapper);

        match (solved, statement) {
            (Some((literal, rotation)), Some(statement)) => {
                let raw: Vec<&str> = code_children(literal)
                    .into_iter()
                    .map(|e| node_text(e, source))
                    .collect();
                let rotated = rotate_left(&raw, rotation);
                if report
                    .edits
                    .replace(literal.byte_range(), format!("[{}]", rotated.join(", ")))
                {
                    remove_statement(&mut report.edits, statement, source);
                    report.derotated += 1;
                    debug!(rotation, %location, "derotated string array");
                }
            }
            _ => {
                report.warnings.push(format!(
                    "String-array rotation at {} could not be computed statically",
                    location
                ));
                report.unresolved.push(UnresolvedPart::new(
                    location,
                    "String-array rotation depends on runtime state",
                    "Run the wrapper in a sandbox and capture the array after it returns",
                ));
            }
        }
    }
    report
}

fn solve<'t>(
    tree: &'t SourceTree,
    wrapper: Node<'t>,
    decoders: &[Decoder<'t>],
) -> Option<(Node<'t>, usize)> {
    let source = tree.source();
    let function = unwrap_parens(wrapper.child_by_field_name("function")?);
    let args = code_children(wrapper.child_by_field_name("arguments")?);
    let array_arg = args.first().filter(|a| a.kind() == "identifier")?;
    let array_name = node_text(*array_arg, source);
    let target = match evaluate(*args.get(1)?, source)? {
        JsValue::Number(n) => n,
        _ => return None,
    };

    if let Some(expression) = checksum_expression(function, source) {
        let decoder = decoders
            .iter()
            .find(|d| d.array.name == array_name && !contains(function, d.function))?;
        let strings = &decoder.array.strings;
        for rotation in 0..strings.len() {
            let candidate = rotate_left(strings, rotation);
            if checksum(expression, source, decoder, &candidate, 0) == Some(target) {
                return Some((decoder.array.literal, rotation));
            }
        }
        return None;
    }

    let array = find_array(tree, tree.root(), array_name)?;
    let rotation = fixed_count(function, source, target)?;
    Some((array.literal, rotation))
}
