//! `dbio`: the conformance-probe CLI for the persisted-state format (spec
//! §6 "Persisted state", §4.3 "Memory codec"). Operates on a single local
//! file holding an [`ExportFile`] — `{template, index, data}` — the same
//! shape used for interchange between peers. `clear`/`print` inspect and
//! reset that file in place; `export` copies it to a portable snapshot;
//! `import` merges (or, with `--override`, replaces) it from one.
//!
//! Out of scope per spec §1: this tool never talks to a live server or a
//! real backing store — it is a probe against the persisted-state format
//! alone. Exit codes: `0` success, `1` error.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use sync_core::xdr::memory::ExportFile;

#[derive(Parser)]
#[command(name = "dbio", about = "Inspect and edit a remote-synchronization persisted-state file")]
struct Cli {
    /// Path to the local store file (created on first `clear`/`import`).
    #[arg(long, short = 'f', global = true, default_value = "dbio.json")]
    file: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reset the store to the empty state (no templates, no indices, no data).
    Clear,
    /// Decode and print every element currently in the store.
    Print,
    /// Copy the store to a portable snapshot file.
    Export {
        /// Destination path for the snapshot.
        #[arg(long, short = 'o')]
        out: PathBuf,
    },
    /// Merge a portable snapshot file into the store.
    Import {
        /// Source snapshot to read.
        path: PathBuf,
        /// Replace the store wholesale instead of merging by identifier
        /// (imported values win on collision either way).
        #[arg(long)]
        r#override: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dbio: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    tracing::debug!(file = %cli.file.display(), "dbio invoked");
    match cli.command {
        Command::Clear => clear(&cli.file),
        Command::Print => print_store(&cli.file),
        Command::Export { out } => export_store(&cli.file, &out),
        Command::Import { path, r#override } => import_store(&cli.file, &path, r#override),
    }
}

fn clear(file: &PathBuf) -> anyhow::Result<()> {
    write_export_file(file, &ExportFile::default())?;
    println!("cleared {}", file.display());
    Ok(())
}

fn print_store(file: &PathBuf) -> anyhow::Result<()> {
    let export_file = read_export_file(file)?;
    let lines = sync_cli::describe_lines(&export_file)?;
    if lines.is_empty() {
        println!("(empty)");
        return Ok(());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn export_store(file: &PathBuf, out: &PathBuf) -> anyhow::Result<()> {
    let export_file = read_export_file(file)?;
    // Round-tripped through a fresh registry so the snapshot is
    // self-contained and canonically ordered, not whatever order the
    // source file happened to list entries in.
    let elements = sync_cli::decode(&export_file)?;
    let snapshot = sync_cli::encode(&elements);
    write_export_file(out, &snapshot)?;
    println!("exported {} element(s) to {}", elements.len(), out.display());
    Ok(())
}

fn import_store(file: &PathBuf, source: &PathBuf, override_existing: bool) -> anyhow::Result<()> {
    let incoming = read_export_file(source)?;
    let incoming_count = sync_cli::decode(&incoming)?.len();

    let base = if override_existing || !file.exists() { None } else { Some(read_export_file(file)?) };
    let merged = sync_cli::merge(base.as_ref(), &incoming)?;
    let total = sync_cli::decode(&merged)?.len();
    write_export_file(file, &merged)?;
    println!(
        "imported {incoming_count} element(s) from {} into {} ({total} total, override={override_existing})",
        source.display(),
        file.display(),
    );
    Ok(())
}

fn read_export_file(path: &PathBuf) -> anyhow::Result<ExportFile> {
    if !path.exists() {
        return Ok(ExportFile::default());
    }
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_export_file(path: &PathBuf, export_file: &ExportFile) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(export_file)?;
    std::fs::write(path, text)?;
    Ok(())
}
