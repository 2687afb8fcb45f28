use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use jsreveal_core::{CryptoDetectionResult, CryptoOptions, DeobfuscateOptions, ObfuscationTechnique};
use jsreveal_crypto::{CryptoDetector, CryptoRules};
use jsreveal_emit::{
    CryptoEmitter, DeobfuscationEmitter, Emitter, EmitterConfig, OutputFormat, VerbosityLevel,
};
use jsreveal_transform::{classify, optimize_with_report, DeobfuscationPipeline};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

const SCRIPT_EXTENSIONS: [&str; 3] = ["js", "mjs", "cjs"];

#[derive(Parser)]
#[command(name = "jsreveal")]
#[command(about = "jsreveal - Deobfuscate JavaScript and review the cryptography it uses")]
#[command(version)]
struct Cli {
    /// Debug logging on stderr. RUST_LOG overrides.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Never color the report.
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Undo obfuscation and report what was done.
    Deobfuscate {
        input: PathBuf,

        /// Write the recovered code here instead of printing it.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Force the VM and advanced stages and apply every rewrite.
        #[arg(long)]
        aggressive: bool,

        /// Only run stages that were forced on.
        #[arg(long)]
        no_auto: bool,

        /// Skip the structural optimizer.
        #[arg(long)]
        no_optimize: bool,

        /// Rename mangled identifiers.
        #[arg(long)]
        rename: bool,

        /// Ask the completion provider for an analysis of the result.
        #[arg(long)]
        llm: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: ReportFormat,

        /// Shorthand for `--format json`.
        #[arg(long)]
        json: bool,

        /// Print only the recovered code.
        #[arg(short, long)]
        quiet: bool,
    },

    /// Detect cryptographic primitives and rate how they are used.
    Crypto {
        input: PathBuf,

        /// JSON detection rules replacing the built-in set.
        #[arg(long)]
        rules: Option<PathBuf>,

        /// Ask the completion provider for a second opinion.
        #[arg(long)]
        ai: bool,

        #[arg(long, value_enum, default_value = "text")]
        format: ReportFormat,

        #[arg(long)]
        json: bool,
    },

    /// List the obfuscation techniques found in a file.
    Classify {
        input: PathBuf,

        #[arg(long)]
        json: bool,
    },

    /// Run the structural optimizer alone.
    Optimize {
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Classify and crypto-check every script under a directory.
    Scan {
        dir: PathBuf,

        #[arg(long)]
        rules: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ReportFormat {
    Text,
    Json,
    Markdown,
}

impl From<ReportFormat> for OutputFormat {
    fn from(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Text => OutputFormat::Text,
            ReportFormat::Json => OutputFormat::Json,
            ReportFormat::Markdown => OutputFormat::Markdown,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanEntry {
    file: String,
    techniques: BTreeSet<ObfuscationTechnique>,
    crypto: CryptoDetectionResult,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .format_timestamp(None)
        .init();

    let use_colors = !cli.no_color && io::stdout().is_terminal();

    match cli.command {
        Commands::Deobfuscate {
            input,
            output,
            aggressive,
            no_auto,
            no_optimize,
            rename,
            llm,
            format,
            json,
            quiet,
        } => {
            let options = DeobfuscateOptions {
                auto: !no_auto,
                aggressive,
                ast_optimize: !no_optimize,
                rename_variables: rename,
                llm,
                ..Default::default()
            };
            let config = EmitterConfig {
                use_colors,
                format: pick_format(format, json),
                verbosity: if quiet {
                    VerbosityLevel::Quiet
                } else {
                    VerbosityLevel::Normal
                },
            };
            cmd_deobfuscate(&input, output.as_deref(), &options, config)
        }
        Commands::Crypto {
            input,
            rules,
            ai,
            format,
            json,
        } => {
            let config = EmitterConfig {
                use_colors,
                format: pick_format(format, json),
                verbosity: VerbosityLevel::Normal,
            };
            cmd_crypto(&input, rules.as_deref(), ai, config)
        }
        Commands::Classify { input, json } => cmd_classify(&input, json),
        Commands::Optimize { input, output } => cmd_optimize(&input, output.as_deref()),
        Commands::Scan { dir, rules, json } => cmd_scan(&dir, rules.as_deref(), json, use_colors),
    }
}

fn pick_format(format: ReportFormat, json: bool) -> OutputFormat {
    if json {
        OutputFormat::Json
    } else {
        format.into()
    }
}

fn read_source(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn load_rules(path: Option<&Path>) -> Result<CryptoRules> {
    match path {
        Some(path) => Ok(CryptoRules::from_file(path)?),
        None => Ok(CryptoRules::default()),
    }
}

fn cmd_deobfuscate(
    input: &Path,
    output: Option<&Path>,
    options: &DeobfuscateOptions,
    config: EmitterConfig,
) -> Result<()> {
    use colored::*;

    let source = read_source(input)?;
    let mut pipeline = DeobfuscationPipeline::new();
    let result = pipeline.deobfuscate(&source, options)?;

    if let Some(output_path) = output {
        fs::write(output_path, &result.code)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        eprintln!(
            " {} Deobfuscated code saved to: {}",
            "SUCCESS:".bright_green().bold(),
            output_path.display()
        );
        if config.verbosity == VerbosityLevel::Quiet {
            return Ok(());
        }
        let mut summary = (*result).clone();
        if config.format != OutputFormat::Json {
            // The code went to the file.
            summary.code.clear();
        }
        return emit_to_stdout(&DeobfuscationEmitter::new(config), &summary);
    }

    emit_to_stdout(&DeobfuscationEmitter::new(config), &result)
}

fn cmd_crypto(input: &Path, rules: Option<&Path>, ai: bool, config: EmitterConfig) -> Result<()> {
    let source = read_source(input)?;
    let mut detector = CryptoDetector::with_rules(load_rules(rules)?);
    let result = detector.detect_in(
        &input.display().to_string(),
        &source,
        &CryptoOptions { use_ai: ai },
    );
    emit_to_stdout(&CryptoEmitter::new(config), &result)
}

fn cmd_classify(input: &Path, json: bool) -> Result<()> {
    let source = read_source(input)?;
    let techniques = classify(&source);
    if json {
        println!("{}", serde_json::to_string_pretty(&techniques)?);
    } else {
        for technique in &techniques {
            println!("{}", technique);
        }
    }
    Ok(())
}

fn cmd_optimize(input: &Path, output: Option<&Path>) -> Result<()> {
    let source = read_source(input)?;
    let report = optimize_with_report(&source);
    debug!(
        rounds = report.rounds,
        rewrites = report.rewrites,
        "optimizer finished"
    );
    match output {
        Some(path) => fs::write(path, &report.code)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", report.code.trim_end()),
    }
    Ok(())
}

fn is_script(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| SCRIPT_EXTENSIONS.contains(&ext))
}

fn cmd_scan(dir: &Path, rules: Option<&Path>, json: bool, use_colors: bool) -> Result<()> {
    use colored::*;

    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    let mut detector = CryptoDetector::with_rules(load_rules(rules)?);
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_script(entry.path()) {
            continue;
        }
        let source = match fs::read_to_string(entry.path()) {
            Ok(source) => source,
            Err(err) => {
                warn!(path = %entry.path().display(), error = %err, "skipping unreadable file");
                continue;
            }
        };
        let file = entry.path().display().to_string();
        let techniques = classify(&source);
        let crypto = detector.detect_in(&file, &source, &CryptoOptions::default());
        entries.push(ScanEntry {
            file,
            techniques,
            crypto: (*crypto).clone(),
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let paint = |text: String| {
        if use_colors {
            text.bright_blue().bold().to_string()
        } else {
            text
        }
    };
    let mut flagged = 0;
    for entry in &entries {
        let techniques: Vec<&str> = entry
            .techniques
            .iter()
            .filter(|t| t.is_specific())
            .map(|t| t.as_str())
            .collect();
        let algorithms: Vec<&str> = entry
            .crypto
            .algorithms
            .iter()
            .map(|a| a.name.as_str())
            .collect();
        if !techniques.is_empty() || !entry.crypto.security.is_empty() {
            flagged += 1;
        }
        println!("{}", paint(entry.file.clone()));
        println!(
            "  techniques: {}",
            if techniques.is_empty() {
                "none".to_string()
            } else {
                techniques.join(", ")
            }
        );
        println!(
            "  crypto: {} ({}/100), algorithms: {}, issues: {}",
            entry.crypto.strength.overall,
            entry.crypto.strength.score,
            if algorithms.is_empty() {
                "none".to_string()
            } else {
                algorithms.join(", ")
            },
            entry.crypto.security.len()
        );
    }
    println!(
        "Scanned {} file(s), {} with findings",
        entries.len(),
        flagged
    );
    Ok(())
}

fn emit_to_stdout<E: Emitter>(emitter: &E, item: &E::Item) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    emitter.emit(item, &mut handle)?;
    handle.flush()?;
    Ok(())
}
