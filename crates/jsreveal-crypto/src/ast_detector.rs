//! Syntax-tree detection of cryptographic primitives.
//!
//! One pre-order walk looks for five things at once: XOR/shift loops over byte arrays, bit-rotation
//! loops with a fixed round count, modular exponentiation calls, literal tables that reproduce a
//! standard S-box or constant set, and calls into known crypto library APIs. Library calls also
//! yield their configuration (mode, padding, key size, tag length), keyed by algorithm name.

use crate::rules::{canonical_algorithm, key_size_from_cipher, mode_from_cipher, CryptoRules};
use crate::sbox::{match_table, signature_constant, MIN_TABLE_MATCH};
use indexmap::IndexMap;
use jsreveal_core::{CodeLocation, CryptoAlgorithm, CryptoParameters, CryptoType};
use jsreveal_parser::literal::{decode_string_literal, parse_number_literal, NumberLiteral};
use jsreveal_parser::walk::{called_property, code_children, is_loop};
use jsreveal_parser::{parse_lenient, unwrap_parens, visit, ParseResult, SourceTree, MAX_DEPTH};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use tree_sitter::Node;

/// Round counts of the common hash compression loops.
const HASH_ROUNDS: [u32; 6] = [16, 20, 32, 48, 64, 80];
const MODPOW_METHODS: [&str; 4] = ["modPow", "modpow", "powMod", "modExp"];
const RSA_METHODS: [&str; 4] = [
    "publicEncrypt",
    "privateDecrypt",
    "privateEncrypt",
    "publicDecrypt",
];
const NODE_CIPHERS: [&str; 4] = [
    "createCipheriv",
    "createDecipheriv",
    "createCipher",
    "createDecipher",
];
const BLOCK_CIPHERS: [&str; 4] = ["AES", "DES", "3DES", "Blowfish"];
/// CryptoJS namespaces that hold helpers rather than algorithms.
const CRYPTO_JS_HELPERS: [&str; 8] = ["enc", "lib", "mode", "pad", "format", "kdf", "algo", "x64"];

#[derive(Debug, Default)]
pub struct AstDetection {
    pub algorithms: Vec<CryptoAlgorithm>,
    pub parameters: IndexMap<String, CryptoParameters>,
}

impl AstDetection {
    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty()
    }
}

/// Runs the syntax-tree pass. Error recovery keeps whatever the parser could make of broken
/// input, so only a grammar load failure is an error.
pub fn detect_by_ast(code: &str, file: &str, rules: &CryptoRules) -> ParseResult<AstDetection> {
    let tree = parse_lenient(code)?;
    let mut scan = Scan::new(&tree, file, rules);
    visit(tree.root(), |node| {
        scan.visit(node);
        true
    });
    let found = scan.found;
    debug!(
        algorithms = found.algorithms.len(),
        parameterized = found.parameters.len(),
        "syntax tree crypto pass finished"
    );
    Ok(found)
}

#[derive(Debug, Default)]
struct LoopOps {
    xor: bool,
    and: bool,
    shift: bool,
    rotate: bool,
    byte_access: bool,
}

fn operator<'t>(node: Node<'t>) -> Option<&'t str> {
    node.child_by_field_name("operator").map(|op| op.kind())
}

fn is_shift(node: Node<'_>, op: &str) -> bool {
    let node = unwrap_parens(node);
    node.kind() == "binary_expression" && operator(node) == Some(op)
}

impl LoopOps {
    fn collect(body: Node<'_>, source: &str) -> Self {
        let mut ops = Self::default();
        visit(body, |node| {
            match node.kind() {
                "binary_expression" => match operator(node) {
                    Some("^") => ops.xor = true,
                    Some("&") => ops.and = true,
                    Some("<<") | Some(">>") | Some(">>>") => ops.shift = true,
                    Some("|") | Some("+") => {
                        let (Some(left), Some(right)) = (
                            node.child_by_field_name("left"),
                            node.child_by_field_name("right"),
                        ) else {
                            return true;
                        };
                        if (is_shift(left, "<<") && is_shift(right, ">>>"))
                            || (is_shift(left, ">>>") && is_shift(right, "<<"))
                        {
                            ops.rotate = true;
                        }
                    }
                    _ => {}
                },
                "augmented_assignment_expression" => match operator(node) {
                    Some("^=") => ops.xor = true,
                    Some("&=") => ops.and = true,
                    Some("<<=") | Some(">>=") | Some(">>>=") => ops.shift = true,
                    _ => {}
                },
                "subscript_expression" => ops.byte_access = true,
                "call_expression" => {
                    if called_property(node, source) == Some("charCodeAt") {
                        ops.byte_access = true;
                    }
                }
                _ => {}
            }
            true
        });
        ops
    }
}

fn compact(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

fn arguments(call: Node<'_>) -> Vec<Node<'_>> {
    call.child_by_field_name("arguments")
        .map(code_children)
        .unwrap_or_default()
}

fn curve_bits(curve: &str) -> Option<u32> {
    let digits: String = curve
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok().filter(|bits| (160..=571).contains(bits))
}

fn encoded_bits(literal: &str, encoding: &str) -> Option<u32> {
    let bytes = match encoding.to_ascii_lowercase().as_str() {
        "hex" => literal.len() / 2,
        "base64" => literal.trim_end_matches('=').len() * 6 / 8,
        _ => literal.len(),
    };
    u32::try_from(bytes.checked_mul(8)?).ok()
}

struct Scan<'t> {
    source: &'t str,
    file: &'t str,
    rules: &'t CryptoRules,
    found: AstDetection,
    signatures: HashSet<&'static str>,
    /// Bit length of string keys bound to a variable, for calls that pass the key by name.
    key_literals: HashMap<String, u32>,
    last_node_cipher: Option<String>,
}

impl<'t> Scan<'t> {
    fn new(tree: &'t SourceTree, file: &'t str, rules: &'t CryptoRules) -> Self {
        Self {
            source: tree.source(),
            file,
            rules,
            found: AstDetection::default(),
            signatures: HashSet::new(),
            key_literals: HashMap::new(),
            last_node_cipher: None,
        }
    }

    fn visit(&mut self, node: Node<'t>) {
        match node.kind() {
            kind if is_loop(kind) => self.check_loop(node),
            "call_expression" => self.check_call(node),
            "new_expression" => self.check_new(node),
            "array" => self.check_table(node),
            "number" => self.check_constant(node),
            "variable_declarator" => self.remember_key(node),
            _ => {}
        }
    }

    fn text(&self, node: Node<'_>) -> &'t str {
        &self.source[node.byte_range()]
    }

    fn location(&self, node: Node<'_>) -> CodeLocation {
        let pos = node.start_position();
        CodeLocation::new(self.file, pos.row + 1, pos.column + 1)
    }

    fn push(
        &mut self,
        name: &str,
        kind: CryptoType,
        confidence: f64,
        usage: impl Into<String>,
        node: Node<'_>,
    ) {
        let location = self.location(node);
        self.found
            .algorithms
            .push(CryptoAlgorithm::new(name, kind, confidence, usage, location));
    }

    /// Earlier calls win for fields both calls set.
    fn record_params(&mut self, name: &str, params: CryptoParameters) {
        if params.is_empty() {
            return;
        }
        self.found
            .parameters
            .entry(name.to_string())
            .or_default()
            .fill_missing(&params);
    }

    fn resolve(&self, token: &str) -> Option<(String, CryptoType)> {
        if let Some((name, kind)) = canonical_algorithm(token) {
            return Some((name.to_string(), kind));
        }
        self.rules
            .keywords
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| k.eq_ignore_ascii_case(token)))
            .map(|rule| (rule.name.clone(), rule.kind))
    }

    fn string(&self, node: Node<'_>) -> Option<String> {
        let node = unwrap_parens(node);
        let raw = self.text(node);
        match node.kind() {
            "string" => decode_string_literal(raw),
            "template_string" => {
                let mut cursor = node.walk();
                let interpolated = node
                    .named_children(&mut cursor)
                    .any(|c| c.kind() == "template_substitution");
                if interpolated || raw.contains('\\') || raw.len() < 2 {
                    None
                } else {
                    Some(raw[1..raw.len() - 1].to_string())
                }
            }
            _ => None,
        }
    }

    fn number(&self, node: Node<'_>) -> Option<f64> {
        self.number_at(node, 0)
    }

    fn number_at(&self, node: Node<'_>, depth: usize) -> Option<f64> {
        if depth > MAX_DEPTH {
            return None;
        }
        let node = unwrap_parens(node);
        match node.kind() {
            "number" => match parse_number_literal(self.text(node))? {
                NumberLiteral::Number(value) => Some(value),
                NumberLiteral::BigInt(_) => None,
            },
            "unary_expression" if operator(node) == Some("-") => {
                Some(-self.number_at(node.child_by_field_name("argument")?, depth + 1)?)
            }
            "binary_expression" => {
                let left = self.number_at(node.child_by_field_name("left")?, depth + 1)?;
                let right = self.number_at(node.child_by_field_name("right")?, depth + 1)?;
                match operator(node)? {
                    "+" => Some(left + right),
                    "-" => Some(left - right),
                    "*" => Some(left * right),
                    "/" if right != 0.0 => Some(left / right),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn bits(&self, node: Node<'_>) -> Option<u32> {
        let value = self.number(node)?;
        (value > 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64).then(|| value as u32)
    }

    /// `{ key: value }` pairs of an object literal with plain keys.
    fn object_pairs(&self, node: Node<'t>) -> Vec<(String, Node<'t>)> {
        let node = unwrap_parens(node);
        if node.kind() != "object" {
            return Vec::new();
        }
        code_children(node)
            .into_iter()
            .filter(|child| child.kind() == "pair")
            .filter_map(|pair| {
                let key = pair.child_by_field_name("key")?;
                let value = pair.child_by_field_name("value")?;
                let name = match key.kind() {
                    "property_identifier" | "number" => self.text(key).to_string(),
                    "string" => decode_string_literal(self.text(key))?,
                    _ => return None,
                };
                Some((name, value))
            })
            .collect()
    }

    /// `CryptoJS.mode.ECB` gives `ECB`, a string literal gives its value.
    fn option_name(&self, node: Node<'_>) -> String {
        if let Some(value) = self.string(node) {
            return value;
        }
        let text = compact(self.text(node));
        match text.rsplit_once('.') {
            Some((_, tail)) => tail.to_string(),
            None => text,
        }
    }

    /// Bit length of key material written into the source.
    fn key_bits(&self, node: Node<'_>) -> Option<u32> {
        let node = unwrap_parens(node);
        match node.kind() {
            "string" | "template_string" => encoded_bits(&self.string(node)?, "utf8"),
            "identifier" => self.key_literals.get(self.text(node)).copied(),
            "call_expression" => {
                let callee = compact(self.text(node.child_by_field_name("function")?));
                let args = arguments(node);
                let literal = self.string(*args.first()?)?;
                let encoding = if callee == "Buffer.from" {
                    args.get(1)
                        .and_then(|e| self.string(*e))
                        .unwrap_or_else(|| "utf8".to_string())
                } else if callee.contains("enc.") && callee.ends_with(".parse") {
                    let parts: Vec<&str> = callee.rsplit('.').collect();
                    parts.get(1).map(|e| e.to_string()).unwrap_or_default()
                } else {
                    return None;
                };
                encoded_bits(&literal, &encoding)
            }
            _ => None,
        }
    }

    fn remember_key(&mut self, node: Node<'t>) {
        let (Some(name), Some(value)) = (
            node.child_by_field_name("name"),
            node.child_by_field_name("value"),
        ) else {
            return;
        };
        if name.kind() != "identifier" {
            return;
        }
        if let Some(bits) = self.key_bits(value) {
            self.key_literals.insert(self.text(name).to_string(), bits);
        }
    }

    fn round_count(&self, node: Node<'_>) -> Option<u32> {
        if node.kind() != "for_statement" {
            return None;
        }
        let mut cond = node.child_by_field_name("condition")?;
        if cond.kind() == "expression_statement" {
            cond = *code_children(cond).first()?;
        }
        if cond.kind() != "binary_expression" {
            return None;
        }
        let bound = self.bits(cond.child_by_field_name("right")?)?;
        match operator(cond)? {
            "<" => Some(bound),
            "<=" => bound.checked_add(1),
            _ => None,
        }
    }

    fn check_loop(&mut self, node: Node<'t>) {
        let Some(body) = node.child_by_field_name("body") else {
            return;
        };
        let ops = LoopOps::collect(body, self.source);
        let rounds = self.round_count(node).filter(|n| HASH_ROUNDS.contains(n));
        if let (true, Some(rounds)) = (ops.rotate && (ops.xor || ops.and), rounds) {
            self.push(
                "Custom hash function",
                CryptoType::Hash,
                0.55,
                format!("{}-round loop of bit rotations", rounds),
                node,
            );
        } else if ops.xor && ops.byte_access {
            let usage = if ops.shift {
                "XOR and shift applied across a byte array"
            } else {
                "XOR applied across a byte array"
            };
            self.push("Custom XOR cipher", CryptoType::Custom, 0.6, usage, node);
        }
    }

    fn check_table(&mut self, node: Node<'t>) {
        let items = code_children(node);
        if items.len() < MIN_TABLE_MATCH {
            return;
        }
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            if item.kind() != "number" {
                return;
            }
            match parse_number_literal(self.text(item)) {
                Some(NumberLiteral::Number(v))
                    if v >= 0.0 && v.fract() == 0.0 && v <= u32::MAX as f64 =>
                {
                    values.push(v as u32)
                }
                _ => return,
            }
        }
        if let Some(table) = match_table(&values) {
            let confidence = if values.len() == table.len() { 0.95 } else { 0.8 };
            self.push(
                table.name,
                table.kind,
                confidence,
                format!(
                    "Literal table matching the {} ({} of {} entries)",
                    table.name,
                    values.len(),
                    table.len()
                ),
                node,
            );
        }
    }

    fn check_constant(&mut self, node: Node<'t>) {
        if node.parent().map_or(false, |p| p.kind() == "array") {
            return;
        }
        let mut value = match parse_number_literal(self.text(node)) {
            Some(NumberLiteral::Number(v)) if v.fract() == 0.0 => v,
            _ => return,
        };
        if node
            .parent()
            .map_or(false, |p| p.kind() == "unary_expression" && operator(p) == Some("-"))
        {
            value = -value;
        }
        if value < i32::MIN as f64 || value > u32::MAX as f64 {
            return;
        }
        // Signed 32-bit spellings (`-680876936`) wrap onto the same constant.
        let word = (value as i64) as u32;
        let Some((name, kind)) = signature_constant(word) else {
            return;
        };
        if self.signatures.insert(name) {
            self.push(
                name,
                kind,
                0.5,
                format!("Implementation constant {:#010x}", word),
                node,
            );
        }
    }

    fn check_call(&mut self, node: Node<'t>) {
        let Some(callee) = node.child_by_field_name("function").map(unwrap_parens) else {
            return;
        };
        let args = arguments(node);
        let path = compact(self.text(callee));
        let method = called_property(node, self.source);

        if let Some(method) = method {
            if MODPOW_METHODS.contains(&method) {
                self.push(
                    "RSA",
                    CryptoType::Asymmetric,
                    0.7,
                    format!("Modular exponentiation via {}()", method),
                    node,
                );
                return;
            }
            if RSA_METHODS.contains(&method) {
                self.push(
                    "RSA",
                    CryptoType::Asymmetric,
                    0.85,
                    format!("crypto.{}()", method),
                    node,
                );
                return;
            }
            if NODE_CIPHERS.contains(&method) && !path.starts_with("forge.") {
                self.node_cipher(node, method, &args);
                return;
            }
            match method {
                "createHash" => return self.node_hash(node, &args),
                "createHmac" => return self.node_hmac(node, &args),
                "generateKeyPair" | "generateKeyPairSync" if !path.starts_with("forge.") => {
                    return self.node_key_pair(node, method, &args)
                }
                "pbkdf2" | "pbkdf2Sync" if !path.starts_with("forge.") => {
                    return self.node_pbkdf2(node, method, &args)
                }
                "setAutoPadding" => return self.auto_padding(&args),
                _ => {}
            }
        }

        // `CryptoJS.AES.encrypt(m, k).toString()` is reported once, at the inner call.
        if path.contains('(') {
            return;
        }
        if path.starts_with("CryptoJS.") {
            self.crypto_js(node, &path, &args);
        } else if path.starts_with("forge.") {
            self.forge(node, &path, &args);
        } else if path.starts_with("sjcl.") {
            self.sjcl(node, &path, &args);
        } else if let Some(method) = method.filter(|_| path.contains("subtle.")) {
            self.subtle(node, method, &args);
        }
    }

    fn crypto_js(&mut self, node: Node<'t>, path: &str, args: &[Node<'t>]) {
        let segments: Vec<&str> = path.split('.').collect();
        let Some(token) = segments.get(1).copied() else {
            return;
        };
        if CRYPTO_JS_HELPERS.contains(&token) {
            return;
        }
        let mut params = CryptoParameters::default();
        let (name, kind) = match token.strip_prefix("Hmac") {
            Some(hash) => {
                if let Some((hash_name, _)) = canonical_algorithm(hash) {
                    params.extra.insert("hash".to_string(), json!(hash_name));
                }
                ("HMAC".to_string(), CryptoType::Hash)
            }
            None => match self.resolve(token) {
                Some(found) => found,
                None => return,
            },
        };

        let operation = segments.get(2).copied();
        if matches!(operation, Some("encrypt") | Some("decrypt")) {
            if let Some(key) = args.get(1) {
                params.key_size = self.key_bits(*key);
            }
            if let Some(options) = args.get(2) {
                self.crypto_js_options(*options, &mut params);
            }
            if BLOCK_CIPHERS.contains(&name.as_str()) {
                params.mode.get_or_insert_with(|| "CBC".to_string());
                params.padding.get_or_insert_with(|| "Pkcs7".to_string());
            }
        } else if name == "PBKDF2" {
            if let Some(options) = args.get(2) {
                self.crypto_js_options(*options, &mut params);
            }
        }

        self.push(&name, kind, 0.9, segments.join("."), node);
        self.record_params(&name, params);
    }

    fn crypto_js_options(&self, options: Node<'t>, params: &mut CryptoParameters) {
        for (key, value) in self.object_pairs(options) {
            match key.as_str() {
                "mode" => params.mode = Some(self.option_name(value).to_ascii_uppercase()),
                "padding" => params.padding = Some(self.option_name(value)),
                "iv" => params.iv = Some(self.text(value).to_string()),
                // CryptoJS sizes keys in 32-bit words.
                "keySize" => {
                    params.key_size = self.bits(value).and_then(|words| words.checked_mul(32))
                }
                "iterations" => {
                    if let Some(n) = self.bits(value) {
                        params.extra.insert("iterations".to_string(), json!(n));
                    }
                }
                "hasher" => {
                    params
                        .extra
                        .insert("hasher".to_string(), json!(self.option_name(value)));
                }
                _ => {}
            }
        }
    }

    fn node_cipher(&mut self, node: Node<'t>, method: &str, args: &[Node<'t>]) {
        let Some(cipher) = args.first().and_then(|a| self.string(*a)) else {
            return;
        };
        let Some((name, kind)) = canonical_algorithm(&cipher) else {
            return;
        };
        let mut params = CryptoParameters {
            mode: mode_from_cipher(&cipher),
            key_size: key_size_from_cipher(&cipher)
                .or_else(|| args.get(1).and_then(|k| self.key_bits(*k))),
            ..Default::default()
        };
        if let Some(iv) = args.get(2) {
            params.iv = Some(self.text(*iv).to_string());
        }
        if matches!(params.mode.as_deref(), Some("ECB") | Some("CBC")) {
            params.padding = Some("Pkcs7".to_string());
        }
        self.push(name, kind, 0.9, format!("crypto.{}('{}')", method, cipher), node);
        self.record_params(name, params);
        self.last_node_cipher = Some(name.to_string());
    }

    /// `cipher.setAutoPadding(false)` turns off the padding of the cipher created before it.
    fn auto_padding(&mut self, args: &[Node<'t>]) {
        let disabled = args.first().map_or(false, |a| self.text(*a) == "false");
        if let (true, Some(name)) = (disabled, self.last_node_cipher.clone()) {
            self.found.parameters.entry(name).or_default().padding =
                Some("NoPadding".to_string());
        }
    }

    fn node_hash(&mut self, node: Node<'t>, args: &[Node<'t>]) {
        let Some(algorithm) = args.first().and_then(|a| self.string(*a)) else {
            return;
        };
        if let Some((name, kind)) = canonical_algorithm(&algorithm) {
            self.push(name, kind, 0.9, format!("crypto.createHash('{}')", algorithm), node);
        }
    }

    fn node_hmac(&mut self, node: Node<'t>, args: &[Node<'t>]) {
        let algorithm = args.first().and_then(|a| self.string(*a));
        let mut params = CryptoParameters {
            key_size: args.get(1).and_then(|k| self.key_bits(*k)),
            ..Default::default()
        };
        if let Some((hash, _)) = algorithm.as_deref().and_then(canonical_algorithm) {
            params.extra.insert("hash".to_string(), json!(hash));
        }
        let usage = format!("crypto.createHmac('{}')", algorithm.unwrap_or_default());
        self.push("HMAC", CryptoType::Hash, 0.9, usage, node);
        self.record_params("HMAC", params);
    }

    fn node_key_pair(&mut self, node: Node<'t>, method: &str, args: &[Node<'t>]) {
        let Some(algorithm) = args.first().and_then(|a| self.string(*a)) else {
            return;
        };
        let (name, kind) = match algorithm.as_str() {
            "ec" => ("ECDSA", CryptoType::Asymmetric),
            other => match canonical_algorithm(other) {
                Some(found) => found,
                None => return,
            },
        };
        let mut params = CryptoParameters::default();
        if let Some(options) = args.get(1) {
            for (key, value) in self.object_pairs(*options) {
                match key.as_str() {
                    "modulusLength" => params.key_size = self.bits(value),
                    "namedCurve" => {
                        let curve = self.option_name(value);
                        params.key_size = curve_bits(&curve);
                        params.extra.insert("namedCurve".to_string(), json!(curve));
                    }
                    _ => {}
                }
            }
        }
        self.push(name, kind, 0.9, format!("crypto.{}('{}')", method, algorithm), node);
        self.record_params(name, params);
    }

    fn node_pbkdf2(&mut self, node: Node<'t>, method: &str, args: &[Node<'t>]) {
        let mut params = CryptoParameters::default();
        if let Some(n) = args.get(2).and_then(|a| self.bits(*a)) {
            params.extra.insert("iterations".to_string(), json!(n));
        }
        params.length = args
            .get(3)
            .and_then(|a| self.bits(*a))
            .and_then(|bytes| bytes.checked_mul(8));
        if let Some(digest) = args.get(4).and_then(|a| self.string(*a)) {
            params.extra.insert("digest".to_string(), json!(digest));
        }
        self.push("PBKDF2", CryptoType::Hash, 0.9, format!("crypto.{}()", method), node);
        self.record_params("PBKDF2", params);
    }

    fn subtle(&mut self, node: Node<'t>, method: &str, args: &[Node<'t>]) {
        let algorithm = match method {
            "digest" | "encrypt" | "decrypt" | "sign" | "verify" | "generateKey" | "deriveBits" => {
                args.first()
            }
            "importKey" | "deriveKey" | "unwrapKey" => args.get(2),
            _ => None,
        };
        let Some(algorithm) = algorithm.copied() else {
            return;
        };

        let mut params = CryptoParameters::default();
        let mut cipher = self.string(algorithm);
        for (key, value) in self.object_pairs(algorithm) {
            match key.as_str() {
                "name" => cipher = self.string(value),
                "length" | "modulusLength" => params.key_size = self.bits(value),
                "tagLength" => params.length = self.bits(value),
                "iv" | "counter" => params.iv = Some(self.text(value).to_string()),
                "namedCurve" => {
                    let curve = self.option_name(value);
                    params.key_size = curve_bits(&curve);
                    params.extra.insert("namedCurve".to_string(), json!(curve));
                }
                "hash" => {
                    let hash = self
                        .object_pairs(value)
                        .into_iter()
                        .find(|(k, _)| k == "name")
                        .and_then(|(_, v)| self.string(v))
                        .or_else(|| self.string(value));
                    if let Some(hash) = hash {
                        params.extra.insert("hash".to_string(), json!(hash));
                    }
                }
                _ => {}
            }
        }
        let Some(cipher) = cipher else {
            return;
        };
        let Some((name, kind)) = canonical_algorithm(&cipher) else {
            return;
        };
        params.mode = mode_from_cipher(&cipher);
        // Web Crypto always pads AES-CBC with PKCS#7.
        if params.mode.as_deref() == Some("CBC") {
            params.padding = Some("Pkcs7".to_string());
        }
        self.push(name, kind, 0.9, format!("crypto.subtle.{}('{}')", method, cipher), node);
        self.record_params(name, params);
    }

    fn forge(&mut self, node: Node<'t>, path: &str, args: &[Node<'t>]) {
        let segments: Vec<&str> = path.split('.').collect();
        match segments.get(1..).unwrap_or_default() {
            ["cipher", "createCipher" | "createDecipher"] => {
                let Some(cipher) = args.first().and_then(|a| self.string(*a)) else {
                    return;
                };
                let Some((name, kind)) = canonical_algorithm(&cipher) else {
                    return;
                };
                let mut params = CryptoParameters {
                    mode: mode_from_cipher(&cipher),
                    key_size: args.get(1).and_then(|k| self.key_bits(*k)),
                    ..Default::default()
                };
                if matches!(params.mode.as_deref(), Some("ECB") | Some("CBC")) {
                    params.padding = Some("Pkcs7".to_string());
                }
                self.push(name, kind, 0.9, format!("forge.cipher('{}')", cipher), node);
                self.record_params(name, params);
            }
            ["md", hash, "create"] => {
                if let Some((name, kind)) = canonical_algorithm(hash) {
                    self.push(name, kind, 0.9, path.to_string(), node);
                }
            }
            ["hmac", "create"] => self.push("HMAC", CryptoType::Hash, 0.85, path.to_string(), node),
            ["pki", "rsa", "generateKeyPair"] => {
                let bits = args.first().and_then(|a| {
                    self.bits(*a).or_else(|| {
                        self.object_pairs(*a)
                            .into_iter()
                            .find(|(k, _)| k == "bits")
                            .and_then(|(_, v)| self.bits(v))
                    })
                });
                let params = CryptoParameters {
                    key_size: bits,
                    ..Default::default()
                };
                self.push("RSA", CryptoType::Asymmetric, 0.9, path.to_string(), node);
                self.record_params("RSA", params);
            }
            ["pkcs5", "pbkdf2"] => {
                let mut params = CryptoParameters::default();
                if let Some(n) = args.get(2).and_then(|a| self.bits(*a)) {
                    params.extra.insert("iterations".to_string(), json!(n));
                }
                params.length = args
                    .get(3)
                    .and_then(|a| self.bits(*a))
                    .and_then(|b| b.checked_mul(8));
                self.push("PBKDF2", CryptoType::Hash, 0.9, path.to_string(), node);
                self.record_params("PBKDF2", params);
            }
            _ => {}
        }
    }

    fn sjcl(&mut self, node: Node<'t>, path: &str, args: &[Node<'t>]) {
        let segments: Vec<&str> = path.split('.').collect();
        match segments.get(1..).unwrap_or_default() {
            ["encrypt" | "decrypt"] => {
                let mut params = CryptoParameters {
                    mode: Some("CCM".to_string()),
                    key_size: Some(128),
                    ..Default::default()
                };
                if let Some(options) = args.get(2) {
                    for (key, value) in self.object_pairs(*options) {
                        match key.as_str() {
                            "mode" => params.mode = Some(self.option_name(value).to_ascii_uppercase()),
                            "ks" => params.key_size = self.bits(value),
                            "ts" => params.length = self.bits(value),
                            "iter" => {
                                if let Some(n) = self.bits(value) {
                                    params.extra.insert("iterations".to_string(), json!(n));
                                }
                            }
                            _ => {}
                        }
                    }
                }
                self.push("AES", CryptoType::Symmetric, 0.9, path.to_string(), node);
                self.record_params("AES", params);
            }
            ["hash", hash, ..] => {
                if let Some((name, kind)) = canonical_algorithm(hash) {
                    self.push(name, kind, 0.9, path.to_string(), node);
                }
            }
            ["misc", "pbkdf2"] => self.push("PBKDF2", CryptoType::Hash, 0.9, path.to_string(), node),
            _ => {}
        }
    }

    fn check_new(&mut self, node: Node<'t>) {
        let Some(constructor) = node.child_by_field_name("constructor") else {
            return;
        };
        let path = compact(self.text(constructor));
        let args = arguments(node);
        let mut params = CryptoParameters::default();
        let (name, kind) = match path.as_str() {
            "JSEncrypt" | "NodeRSA" => {
                if let Some(options) = args.first() {
                    for (key, value) in self.object_pairs(*options) {
                        if key == "default_key_size" || key == "b" {
                            params.key_size = self.bits(value).or_else(|| {
                                self.string(value).and_then(|s| s.parse().ok())
                            });
                        }
                    }
                }
                ("RSA", CryptoType::Asymmetric)
            }
            "sjcl.cipher.aes" => {
                params.key_size = args.first().and_then(|k| self.key_bits(*k));
                ("AES", CryptoType::Symmetric)
            }
            "EC" | "elliptic.ec" => {
                if let Some(curve) = args.first().and_then(|a| self.string(*a)) {
                    params.key_size = curve_bits(&curve);
                    params.extra.insert("namedCurve".to_string(), json!(curve));
                }
                ("ECDSA", CryptoType::Asymmetric)
            }
            _ => return,
        };
        self.push(name, kind, 0.85, format!("new {}()", path), node);
        self.record_params(name, params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sbox::AES_SBOX;
    use pretty_assertions::assert_eq;

    fn detect(code: &str) -> AstDetection {
        detect_by_ast(code, "test.js", &CryptoRules::default()).unwrap()
    }

    fn names(found: &AstDetection) -> Vec<&str> {
        found.algorithms.iter().map(|a| a.name.as_str()).collect()
    }

    #[test]
    fn test_aes_sbox_table() {
        let entries: Vec<String> = AES_SBOX.iter().map(|v| format!("0x{:02x}", v)).collect();
        let code = format!("var SBOX = [{}];", entries.join(", "));
        let found = detect(&code);
        let sbox = found
            .algorithms
            .iter()
            .find(|a| a.name == "AES S-box")
            .unwrap();
        assert_eq!(sbox.kind, CryptoType::Symmetric);
        assert_eq!(sbox.confidence, 0.95);
        assert_eq!(sbox.location.to_string(), "test.js:1:12");
    }

    #[test]
    fn test_crypto_js_parameters() {
        let code = r#"var key = CryptoJS.enc.Utf8.parse("12345678");
var out = CryptoJS.AES.encrypt(data, key, { mode: CryptoJS.mode.ECB, padding: CryptoJS.pad.NoPadding });"#;
        let found = detect(code);
        assert_eq!(names(&found), vec!["AES"]);
        let params = &found.parameters["AES"];
        assert_eq!(params.mode.as_deref(), Some("ECB"));
        assert_eq!(params.padding.as_deref(), Some("NoPadding"));
        assert_eq!(params.key_size, Some(64));
    }

    #[test]
    fn test_key_size_words_out_of_range() {
        let found = detect("CryptoJS.AES.encrypt(m, k, { keySize: 200000000 });");
        assert_eq!(names(&found), vec!["AES"]);
        assert_eq!(found.parameters["AES"].key_size, None);

        let found = detect("CryptoJS.AES.encrypt(m, k, { keySize: words });");
        assert_eq!(found.parameters["AES"].key_size, None);

        let found = detect("CryptoJS.AES.encrypt(m, k, { keySize: 256 / 32 });");
        assert_eq!(found.parameters["AES"].key_size, Some(256));
    }

    #[test]
    fn test_derived_length_out_of_range() {
        let found = detect("crypto.pbkdf2Sync(p, s, 1000, 4294967295, 'sha1');");
        assert_eq!(names(&found), vec!["PBKDF2"]);
        assert_eq!(found.parameters["PBKDF2"].length, None);

        let found = detect("forge.pkcs5.pbkdf2(p, s, 1000, 4294967295);");
        assert_eq!(names(&found), vec!["PBKDF2"]);
        assert!(found
            .parameters
            .get("PBKDF2")
            .map_or(true, |params| params.length.is_none()));
    }

    #[test]
    fn test_loop_bound_at_u32_max() {
        let found = detect("for (var i = 0; i <= 4294967295; i++) { h = (h << 5 | h >>> 27) ^ w[i]; }");
        assert!(!names(&found).contains(&"Custom hash function"));
    }

    #[test]
    fn test_deep_arithmetic_key_size() {
        let sum = vec!["1"; 20_000].join("+");
        let code = format!("CryptoJS.AES.encrypt(m, k, {{ keySize: {} }});", sum);
        let found = detect(&code);
        assert_eq!(names(&found), vec!["AES"]);
        assert_eq!(found.parameters["AES"].key_size, None);
    }

    #[test]
    fn test_crypto_js_defaults() {
        let found = detect("CryptoJS.AES.encrypt(msg, passphrase); CryptoJS.MD5(msg);");
        assert_eq!(names(&found), vec!["AES", "MD5"]);
        let params = &found.parameters["AES"];
        assert_eq!(params.mode.as_deref(), Some("CBC"));
        assert_eq!(params.padding.as_deref(), Some("Pkcs7"));
        assert!(!found.parameters.contains_key("MD5"));
    }

    #[test]
    fn test_node_crypto() {
        let code = "const c = crypto.createCipheriv('aes-128-ecb', key, null);\n\
                    c.setAutoPadding(false);\n\
                    const h = crypto.createHash('md5').update(x).digest('hex');";
        let found = detect(code);
        assert_eq!(names(&found), vec!["AES", "MD5"]);
        let params = &found.parameters["AES"];
        assert_eq!(params.mode.as_deref(), Some("ECB"));
        assert_eq!(params.key_size, Some(128));
        assert_eq!(params.padding.as_deref(), Some("NoPadding"));
    }

    #[test]
    fn test_web_crypto_key_pair() {
        let code = "crypto.subtle.generateKey({ name: 'RSA-OAEP', modulusLength: 1024, \
                    publicExponent: e, hash: 'SHA-256' }, true, ['encrypt']);";
        let found = detect(code);
        assert_eq!(names(&found), vec!["RSA"]);
        assert_eq!(found.parameters["RSA"].key_size, Some(1024));
        assert_eq!(found.parameters["RSA"].extra["hash"], json!("SHA-256"));
    }

    #[test]
    fn test_web_crypto_gcm_tag_length() {
        let code = "crypto.subtle.encrypt({ name: 'AES-GCM', iv: iv, tagLength: 96 }, key, data);";
        let found = detect(code);
        let params = &found.parameters["AES"];
        assert_eq!(params.mode.as_deref(), Some("GCM"));
        assert_eq!(params.length, Some(96));
        assert_eq!(params.padding, None);
    }

    #[test]
    fn test_custom_xor_loop() {
        let code = "for (var i = 0; i < data.length; i++) {\n\
                    out.push(data.charCodeAt(i) ^ key.charCodeAt(i % key.length));\n}";
        let found = detect(code);
        assert_eq!(names(&found), vec!["Custom XOR cipher"]);
        assert_eq!(found.algorithms[0].kind, CryptoType::Custom);
    }

    #[test]
    fn test_custom_hash_rounds() {
        let code = "for (var j = 0; j < 64; j++) {\n\
                    t = ((a << 5) | (a >>> 27)) ^ w[j];\n  a = t;\n}";
        let found = detect(code);
        assert_eq!(names(&found), vec!["Custom hash function"]);
        assert!(found.algorithms[0].usage.starts_with("64-round"));
    }

    #[test]
    fn test_modpow_is_asymmetric() {
        let found = detect("var c = m.modPow(e, n);");
        assert_eq!(names(&found), vec!["RSA"]);
        assert_eq!(found.algorithms[0].kind, CryptoType::Asymmetric);
    }

    #[test]
    fn test_signed_md5_constant() {
        let found = detect("a = ff(a, b, c, d, x[i], 7, -680876936); b = ff(b, c, d, a, x[i + 1], 12, -389564586);");
        assert_eq!(names(&found), vec!["MD5"]);
    }

    #[test]
    fn test_jsencrypt_key_size() {
        let found = detect("var rsa = new JSEncrypt({ default_key_size: '512' });");
        assert_eq!(names(&found), vec!["RSA"]);
        assert_eq!(found.parameters["RSA"].key_size, Some(512));
    }

    #[test]
    fn test_plain_code_finds_nothing() {
        let found = detect("function add(a, b) { return a + b; }\nvar list = [1, 2, 3, 4, 5, 6, 7, 8, 9];");
        assert!(found.is_empty());
        assert!(found.parameters.is_empty());
    }
}
