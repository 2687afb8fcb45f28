//! The optional text-completion capability and the prompts sent to it.
//!
//! Nothing in the analysis pipelines requires a provider. Every call site holds an
//! `Option<Arc<dyn CompletionProvider>>` and degrades to its non-AI path when it is `None` or
//! when the provider fails.

use crate::ObfuscationTechnique;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_PROMPT_CODE_CHARS: usize = 12_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
}

#[derive(Error, Debug)]
pub enum CompletionError {
    #[error("Completion provider unavailable: {0}")]
    Unavailable(String),
    #[error("Completion request failed: {0}")]
    Request(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A blocking chat-completion backend. The call has no internal timeout; a provider that hangs
/// stalls only the analysis call waiting on it.
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &str {
        "completion"
    }

    fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse, CompletionError>;
}

pub fn build_deobfuscation_prompt(code: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You are a JavaScript reverse engineer. Explain what the given deobfuscated code does, \
             list suspicious behaviour (network access, fingerprinting, anti-debugging) and name \
             any remaining obfuscation. Be concise.",
        ),
        ChatMessage::user(format!(
            "Analyze this JavaScript:\n```javascript\n{}\n```",
            truncate_code(code)
        )),
    ]
}

pub fn build_crypto_detection_prompt(code: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "You detect cryptographic algorithms in JavaScript. Answer with a single JSON object \
             of the form {\"algorithms\": [{\"name\": string, \"type\": \
             \"symmetric\"|\"asymmetric\"|\"hash\"|\"custom\", \"confidence\": number, \
             \"usage\": string, \"parameters\": object}]} and nothing else.",
        ),
        ChatMessage::user(format!(
            "Which cryptographic primitives does this code use?\n```javascript\n{}\n```",
            truncate_code(code)
        )),
    ]
}

pub fn build_vm_cleanup_prompt(code: &str, techniques: &[ObfuscationTechnique]) -> Vec<ChatMessage> {
    let listed = if techniques.is_empty() {
        "none detected".to_string()
    } else {
        techniques
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    };
    vec![
        ChatMessage::system(
            "You simplify obfuscated JavaScript while preserving behaviour. Reply with the \
             rewritten program in one ```javascript fenced block.",
        ),
        ChatMessage::user(format!(
            "Detected techniques: {}\nRewrite the program below without the interpreter loop, \
             dispatch tables and dead branches.\n```javascript\n{}\n```",
            listed,
            truncate_code(code)
        )),
    ]
}

/// Body of the first fenced block in `response`, ignoring the language tag.
pub fn first_code_block(response: &str) -> Option<&str> {
    let start = response.find("```")?;
    let after_fence = &response[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim_end_matches(['\n', '\r']))
}

/// The outermost `{ ... }` span of `response`, for models that wrap JSON in prose.
pub fn first_json_object(response: &str) -> Option<&str> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&response[start..=end])
}

fn truncate_code(code: &str) -> &str {
    match code.char_indices().nth(MAX_PROMPT_CODE_CHARS) {
        Some((idx, _)) => &code[..idx],
        None => code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_code_block() {
        let response = "Here you go:\n```javascript\nconsole.log(1);\n```\nmore\n```\nx\n```";
        assert_eq!(first_code_block(response), Some("console.log(1);"));
        assert_eq!(first_code_block("no fences"), None);
        assert_eq!(first_code_block("```js\nunterminated"), None);
    }

    #[test]
    fn test_first_json_object() {
        let response = "Result: {\"algorithms\": []} done";
        assert_eq!(first_json_object(response), Some("{\"algorithms\": []}"));
        assert_eq!(first_json_object("} {"), None);
    }

    #[test]
    fn test_vm_prompt_lists_techniques() {
        let messages = build_vm_cleanup_prompt(
            "while(1){}",
            &[ObfuscationTechnique::VmProtection, ObfuscationTechnique::ControlFlowFlattening],
        );
        assert_eq!(messages.len(), 2);
        assert!(messages[1]
            .content
            .contains("vm-protection, control-flow-flattening"));
    }

    #[test]
    fn test_prompt_truncates_long_code() {
        let code = "a".repeat(MAX_PROMPT_CODE_CHARS + 50);
        let messages = build_deobfuscation_prompt(&code);
        assert!(messages[1].content.len() < code.len());
    }
}
