//! `daq-json-metadata`: write a run's metadata file from a recorded document stream.
//!
//! Input is JSON Lines, one `[kind, document]` pair per line:
//!
//! ```text
//! ["start", {"uid": "u1", "plan_name": "scan"}]
//! ["descriptor", {"name": "primary", "uid": "d1", "run_start": "u1"}]
//! ["event", {"uid": "e1", "descriptor": "d1"}]
//! ["stop", {"uid": "s1", "run_start": "u1", "exit_status": "success"}]
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use daq_json_metadata::config::ExportConfig;
use daq_json_metadata::{try_export, Document, ExportError, Separators};
use serde_json::Value;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Serialize the metadata of a document stream into `<prefix>meta.json`.
#[derive(Parser, Debug)]
#[command(name = "daq-json-metadata", version, about, long_about = None)]
struct Cli {
    /// JSON Lines document stream, or `-` for stdin
    #[arg(default_value = "-")]
    input: String,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// File prefix template, e.g. "{plan_name}-{uid}-"
    #[arg(short = 'p', long)]
    file_prefix: Option<String>,

    /// Pretty-print with this many spaces of indentation
    #[arg(long)]
    indent: Option<usize>,

    /// Sort object keys
    #[arg(long)]
    sort_keys: bool,

    /// Escape all non-ASCII characters
    #[arg(long)]
    ensure_ascii: bool,

    /// Use compact separators ("," and ":")
    #[arg(long)]
    compact: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    fn apply(&self, config: &mut ExportConfig) {
        if let Some(directory) = &self.directory {
            config.output.directory = directory.clone();
        }
        if let Some(prefix) = &self.file_prefix {
            config.output.file_prefix = prefix.clone();
        }
        if self.indent.is_some() {
            config.encoding.indent = self.indent;
        }
        if self.compact {
            config.encoding.separators = Some(Separators::compact());
        }
        config.encoding.sort_keys |= self.sort_keys;
        config.encoding.ensure_ascii |= self.ensure_ascii;
        config.logging.json |= self.log_json;
    }
}

fn init_tracing(config: &ExportConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .init();
    }
}

fn open_input(input: &str) -> Result<Box<dyn BufRead>> {
    if input == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(input).with_context(|| format!("failed to open {input}"))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Parse one `[kind, document]` line.
fn parse_line(number: usize, line: &str) -> Result<(String, Document), ExportError> {
    let (kind, doc): (String, Value) = serde_json::from_str(line)
        .map_err(|e| ExportError::from_source(format!("line {number}: {e}")))?;
    let doc = Document::try_from(doc)
        .map_err(|e| ExportError::from_source(format!("line {number}: {e}")))?;
    Ok((kind, doc))
}

fn documents(reader: Box<dyn BufRead>) -> impl Iterator<Item = Result<(String, Document), ExportError>> {
    reader
        .lines()
        .enumerate()
        .filter_map(|(index, line)| match line {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(parse_line(index + 1, &line)),
            Err(e) => Some(Err(e.into())),
        })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = ExportConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    cli.apply(&mut config);
    config
        .validate()
        .context("invalid configuration after command-line overrides")?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    init_tracing(&config);
    info!(
        directory = %config.output.directory.display(),
        file_prefix = %config.output.file_prefix,
        "exporting run metadata"
    );

    let reader = open_input(&cli.input)?;
    let artifacts = try_export(
        documents(reader),
        config.output.directory.clone(),
        &config.output.file_prefix,
        config.encoding.clone(),
    )
    .with_context(|| format!("failed to export {}", cli.input))?;

    if artifacts.is_empty() {
        info!("no run completed; nothing written");
    }
    for (label, paths) in &artifacts {
        for path in paths {
            println!("{label}\t{}", path.display());
        }
    }
    Ok(())
}
