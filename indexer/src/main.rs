use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use search_core::{Config, Document, DocumentStore, IndexBuilder, Tokenizer};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};
use walkdir::WalkDir;

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Load crawled documents and build the inverted index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Tokenize every stored document and persist per-term postings
    Build {
        /// JSON config file (defaults are used when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Only index the first N documents
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Save crawler output (.json or .jsonl) into the document store
    Import {
        /// Input path (file or directory)
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { config, limit } => build_index(config.as_deref(), limit),
        Commands::Import { input, config } => import_documents(&input, config.as_deref()),
    }
}

fn build_index(config: Option<&Path>, limit: Option<usize>) -> Result<()> {
    let config = Config::load_or_default(config)?;
    let tokenizer = Arc::new(Tokenizer::new(&config.tokenizer)?);
    let mut store = DocumentStore::connect(&config.store)?;
    tracing::info!(mode = ?store.mode(), "store ready");

    let mut builder = IndexBuilder::new(tokenizer);
    let report = builder.build(&mut store, limit);
    store.close();

    tracing::info!(
        loaded = report.documents_loaded,
        indexed = report.documents_indexed,
        skipped = report.documents_skipped,
        duplicates = report.duplicates_collapsed,
        terms = report.terms,
        written = report.terms_written,
        failed = report.terms_failed,
        "build finished"
    );
    println!(
        "indexed {} documents ({} skipped), wrote {}/{} terms",
        report.documents_indexed, report.documents_skipped, report.terms_written, report.terms
    );
    Ok(())
}

#[derive(Debug, Default)]
struct ImportSummary {
    files: usize,
    saved: usize,
    skipped: usize,
    failed: usize,
}

fn import_documents(input: &Path, config: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config)?;
    let files = collect_input_files(input);
    if files.is_empty() {
        anyhow::bail!("no .json or .jsonl files found under {}", input.display());
    }
    let mut store = DocumentStore::connect(&config.store)?;
    tracing::info!(mode = ?store.mode(), files = files.len(), "importing documents");

    let mut summary = ImportSummary::default();
    for file in files {
        summary.files += 1;
        let records = if file.extension().and_then(|s| s.to_str()) == Some("jsonl") {
            read_jsonl(&file)?
        } else {
            read_json(&file)?
        };
        for (line, record) in records {
            let record = match record {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(file = %file.display(), line, error = %e, "malformed record");
                    summary.skipped += 1;
                    continue;
                }
            };
            save_record(&mut store, &record, &file, line, &mut summary);
        }
    }
    store.close();

    tracing::info!(?summary, "import finished");
    println!(
        "imported {} documents from {} files ({} skipped, {} failed)",
        summary.saved, summary.files, summary.skipped, summary.failed
    );
    Ok(())
}

fn save_record(store: &mut DocumentStore, record: &Value, file: &Path, line: usize, summary: &mut ImportSummary) {
    let doc = match Document::from_json(record) {
        Ok(doc) if !doc.url.trim().is_empty() => doc,
        Ok(_) => {
            tracing::warn!(file = %file.display(), line, "record has no url");
            summary.skipped += 1;
            return;
        }
        Err(e) => {
            tracing::warn!(file = %file.display(), line, error = %e, "invalid document");
            summary.skipped += 1;
            return;
        }
    };
    match store.save_document(&doc) {
        Ok(row_key) => {
            tracing::debug!(%row_key, url = %doc.url, "saved");
            summary.saved += 1;
        }
        Err(e) => {
            tracing::error!(url = %doc.url, error = %e, "failed to save document");
            summary.failed += 1;
        }
    }
}

fn collect_input_files(input: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && matches!(p.extension().and_then(|s| s.to_str()), Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }
    files
}

type Records = Vec<(usize, Result<Value, serde_json::Error>)>;

/// One record per non-blank line.
fn read_jsonl(path: &Path) -> Result<Records> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(f).lines().enumerate() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        out.push((idx + 1, serde_json::from_str(&line)));
    }
    Ok(out)
}

/// A single document object or an array of them.
fn read_json(path: &Path) -> Result<Records> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(items)) => Ok(items.into_iter().enumerate().map(|(i, v)| (i + 1, Ok(v))).collect()),
        Ok(v) => Ok(vec![(1, Ok(v))]),
        Err(e) => Ok(vec![(1, Err(e))]),
    }
}
