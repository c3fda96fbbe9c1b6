use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

use extrait_parse::{parse_statement, ScanOptions};
use extrait_reconcile::Reconciler;

/// Recover transactions from a layout-preserving statement text dump and
/// reconcile them against authoritative OFX exports.
///
/// The input is the positional text produced by `pdftotext -layout` (or
/// an equivalent converter); running the conversion itself is out of
/// scope. The parsed statement is printed as JSON on stdout.
#[derive(Parser, Debug)]
#[command(name = "extrait", version, about)]
struct Args {
    /// Statement text file, one physical statement line per text line.
    input: PathBuf,

    /// Comma-separated glob patterns of authoritative OFX exports.
    /// Omitting this disables reconciliation; all identifiers then come
    /// from the content-hash scheme.
    #[arg(long)]
    ofx_files: Option<String>,

    /// Directory against which relative OFX globs are resolved.
    /// Defaults to the input file's directory.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Fallback bank id, used only when the statement text carries no
    /// IBAN/BIC line.
    #[arg(long)]
    bank_id: Option<String>,

    /// Width of the check-number band left of the operation-date column.
    #[arg(long, default_value_t = 20)]
    check_no_margin: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let text = std::fs::read_to_string(&args.input)
        .with_context(|| format!("reading {}", args.input.display()))?;

    let options = ScanOptions {
        bank_id: args.bank_id.clone(),
        check_no_margin: args.check_no_margin,
    };
    let mut statement = parse_statement(&text, &options)?;

    let mut reconciler = match &args.ofx_files {
        Some(patterns) => {
            let cwd = match &args.cwd {
                Some(dir) => dir.clone(),
                None => args
                    .input
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from(".")),
            };
            Reconciler::load(patterns, &cwd)?
        }
        None => Reconciler::empty(),
    };
    reconciler.apply(&mut statement);

    statement.validate().context("statement failed validation")?;
    tracing::info!(
        account_id = statement.account_id.as_deref().unwrap_or("?"),
        records = statement.records.len(),
        "statement parsed"
    );

    serde_json::to_writer_pretty(std::io::stdout().lock(), &statement)?;
    println!();
    Ok(())
}
