use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use patternscope::technology_signatures::catalog;
use patternscope::{AnalysisOptions, Pipeline, PreprocessedCorpus};
use serde::Serialize;
use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "patternscope")]
#[command(about = "Analyze web fingerprint corpora and recommend CMS detection patterns", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every analyzer over a corpus and print the results as JSON
    Analyze {
        /// Corpus JSON file (array of site records)
        corpus: PathBuf,

        /// Analysis options JSON file
        #[arg(short, long)]
        options: Option<PathBuf>,

        /// Override the minimum site support for retained patterns
        #[arg(long)]
        min_occurrences: Option<usize>,

        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Print the default analysis options as JSON
    Defaults,

    /// List the built-in technology signature templates
    Signatures,
}

fn load_options(path: Option<&Path>) -> Result<AnalysisOptions> {
    let Some(path) = path else {
        return Ok(AnalysisOptions::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read options file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid options in {}", path.display()))
}

/// RUST_LOG directives win over --verbose.
fn log_filter(verbose: bool, rust_log: Option<String>) -> EnvFilter {
    match rust_log {
        Some(directives) => EnvFilter::new(directives),
        None if verbose => EnvFilter::new("debug"),
        None => EnvFilter::new("info"),
    }
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut stdout, value)?;
    } else {
        serde_json::to_writer(&mut stdout, value)?;
    }
    writeln!(stdout)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only JSON
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(cli.verbose, env::var("RUST_LOG").ok()))
        .with_target(false)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Analyze {
            corpus,
            options,
            min_occurrences,
            pretty,
        } => {
            let mut options = load_options(options.as_deref())?;
            if let Some(min) = min_occurrences {
                options = options.with_min_occurrences(min);
            }
            let pipeline = Pipeline::new(options)?;

            info!("Loading corpus from {}", corpus.display());
            let corpus = PreprocessedCorpus::from_path(&corpus)?;
            if corpus.duplicates_dropped() > 0 || corpus.malformed_dropped() > 0 {
                info!(
                    "Dropped {} duplicate and {} malformed site records",
                    corpus.duplicates_dropped(),
                    corpus.malformed_dropped()
                );
            }

            let output = pipeline.run(&corpus);
            emit(&output, pretty)
        }

        Commands::Defaults => emit(&AnalysisOptions::default(), true),

        Commands::Signatures => emit(&catalog(), true),
    }
}
