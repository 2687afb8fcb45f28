use crate::config::EmitterConfig;
use crate::output::{MarkdownFormatter, OutputFormat, OutputFormatter, TextFormatter};
use anyhow::Result;
use std::io::Write;

pub type EmitResult = Result<()>;

pub trait Emitter {
    type Item;

    fn emit<W: Write>(&self, item: &Self::Item, writer: &mut W) -> EmitResult;

    fn emit_to_string(&self, item: &Self::Item) -> Result<String> {
        let mut buffer = Vec::new();
        self.emit(item, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Sections of a text or Markdown report, separated by one blank line.
pub struct ReportBuilder<'f> {
    formatter: &'f dyn OutputFormatter,
    blocks: Vec<String>,
}

impl<'f> ReportBuilder<'f> {
    pub fn new(formatter: &'f dyn OutputFormatter) -> Self {
        Self {
            formatter,
            blocks: Vec::new(),
        }
    }

    pub fn formatter(&self) -> &dyn OutputFormatter {
        self.formatter
    }

    /// Empty bodies are dropped together with their header.
    pub fn section(&mut self, title: &str, body: String) -> &mut Self {
        if !body.is_empty() {
            self.blocks
                .push(format!("{}\n{}", self.formatter.format_section(title), body));
        }
        self
    }

    pub fn list_section(&mut self, title: &str, items: &[String]) -> &mut Self {
        let body = self.formatter.format_list(items);
        self.section(title, body)
    }

    pub fn pairs_section(&mut self, title: &str, pairs: &[(&str, String)]) -> &mut Self {
        let body = pairs
            .iter()
            .map(|(key, value)| self.formatter.format_pair(key, value))
            .collect::<Vec<_>>()
            .join("\n");
        self.section(title, body)
    }

    pub fn raw(&mut self, text: String) -> &mut Self {
        if !text.is_empty() {
            self.blocks.push(text);
        }
        self
    }

    pub fn finish<W: Write>(&self, writer: &mut W) -> EmitResult {
        if self.blocks.is_empty() {
            return Ok(());
        }
        writeln!(writer, "{}", self.blocks.join("\n\n"))?;
        Ok(())
    }
}

pub struct EmitHelper;

impl EmitHelper {
    pub fn formatter(config: &EmitterConfig) -> Box<dyn OutputFormatter> {
        match config.format {
            OutputFormat::Markdown => Box::new(MarkdownFormatter),
            OutputFormat::Text | OutputFormat::Json => Box::new(TextFormatter {
                use_colors: config.colors_enabled(),
            }),
        }
    }

    pub fn colorize(text: &str, color: &str, enabled: bool) -> String {
        if !enabled {
            return text.to_string();
        }
        use colored::Colorize;
        match color {
            "red" => text.red().to_string(),
            "green" => text.green().to_string(),
            "blue" => text.blue().to_string(),
            "yellow" => text.yellow().to_string(),
            "magenta" => text.magenta().to_string(),
            "cyan" => text.cyan().to_string(),
            "bright_red" => text.bright_red().bold().to_string(),
            _ => text.to_string(),
        }
    }

    pub fn ratio(value: f64) -> String {
        format!("{:.2}", value)
    }
}
