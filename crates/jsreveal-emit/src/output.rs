use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Text,
    Json,
    Markdown,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "markdown" | "md" => Ok(Self::Markdown),
            other => bail!("unknown output format '{}'", other),
        }
    }
}

pub trait OutputFormatter {
    fn format_pair(&self, key: &str, value: &str) -> String;

    fn format_list(&self, items: &[String]) -> String;

    fn format_section(&self, title: &str) -> String;

    fn format_code(&self, code: &str, language: Option<&str>) -> String;
}

pub struct TextFormatter {
    pub use_colors: bool,
}

impl OutputFormatter for TextFormatter {
    fn format_pair(&self, key: &str, value: &str) -> String {
        format!("{}: {}", key, value)
    }

    fn format_list(&self, items: &[String]) -> String {
        items
            .iter()
            .map(|item| format!("  - {}", item))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_section(&self, title: &str) -> String {
        let header = format!("=== {} ===", title);
        if self.use_colors {
            use colored::Colorize;
            header.cyan().bold().to_string()
        } else {
            header
        }
    }

    fn format_code(&self, code: &str, _language: Option<&str>) -> String {
        code.trim_end().to_string()
    }
}

pub struct MarkdownFormatter;

impl OutputFormatter for MarkdownFormatter {
    fn format_pair(&self, key: &str, value: &str) -> String {
        format!("**{}**: {}", key, value)
    }

    fn format_list(&self, items: &[String]) -> String {
        items
            .iter()
            .map(|item| format!("- {}", item))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_section(&self, title: &str) -> String {
        format!("## {}", title)
    }

    fn format_code(&self, code: &str, language: Option<&str>) -> String {
        let lang = language.unwrap_or("javascript");
        format!("```{}\n{}\n```", lang, code.trim_end())
    }
}

pub struct JsonFormatter;

impl JsonFormatter {
    pub fn format_object<W: Write, T: Serialize + ?Sized>(writer: &mut W, obj: &T) -> Result<()> {
        serde_json::to_writer_pretty(&mut *writer, obj)?;
        writeln!(writer)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_names() {
        assert_eq!("md".parse::<OutputFormat>().unwrap(), OutputFormat::Markdown);
        assert_eq!(" JSON ".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("html".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_markdown_code_fence() {
        let fenced = MarkdownFormatter.format_code("var a = 1;\n", None);
        assert_eq!(fenced, "```javascript\nvar a = 1;\n```");
    }

    #[test]
    fn test_plain_text_section() {
        let text = TextFormatter { use_colors: false };
        assert_eq!(text.format_section("Code"), "=== Code ===");
        assert_eq!(
            text.format_list(&["a".to_string(), "b".to_string()]),
            "  - a\n  - b"
        );
    }

    #[test]
    fn test_json_object_ends_with_newline() {
        let mut buffer = Vec::new();
        JsonFormatter::format_object(&mut buffer, &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "{\n  \"a\": 1\n}\n");
    }
}
