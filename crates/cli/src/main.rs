//! Command-line interface for the site update pipeline.
//!
//! Operators scan and inspect archives, stage them as pending updates, apply
//! them to the live tree and roll back from the command line.

use clap::{Parser, Subcommand};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use tracing::debug;
use updater::{
    DirTree, JsonFileStore, PendingUpdate, PipelineConfig, StaticTokenGate, UpdatePipeline,
    UpdateService, UploadedFile,
};
use uuid::Uuid;

type Service = UpdateService<JsonFileStore, DirTree, StaticTokenGate>;
type CliResult = Result<(), Box<dyn std::error::Error>>;

const DEFAULT_CONFIG: &str = "site-update.json";

#[derive(Parser)]
#[command(name = "site-update")]
#[command(version, about = "Scan, stage, apply and roll back site updates", long_about = None)]
struct Cli {
    /// Pipeline config file (JSON); defaults to ./site-update.json when present
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Live site root, overriding the config file
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Operator session token
    #[arg(long, global = true, env = "SITE_UPDATE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a file and print the verdict
    Scan {
        file: PathBuf,

        /// Declared MIME type
        #[arg(long = "type")]
        declared_type: String,

        /// Declared file name (defaults to the file's own name)
        #[arg(long)]
        name: Option<String>,

        /// Apply the archive rules instead of the ordinary upload rules
        #[arg(long)]
        archive: bool,
    },

    /// List an archive's entries without extracting
    Inspect {
        archive: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Stage an archive as a pending update
    Upload {
        archive: PathBuf,

        /// Version label (defaults to a timestamp)
        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        description: Option<String>,

        /// Declared MIME type (guessed from the extension when omitted)
        #[arg(long = "type")]
        declared_type: Option<String>,
    },

    /// List updates, newest first
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply a pending update
    Apply { id: Uuid },

    /// Restore the newest completed update's backup
    Rollback,

    /// Delete an update with its archive and backup
    Delete { id: Uuid },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult {
    let config = load_config(cli.config.as_deref(), cli.root)?;
    let token = cli.token.unwrap_or_default();

    match cli.command {
        Commands::Scan {
            file,
            declared_type,
            name,
            archive,
        } => handle_scan(&config, file, declared_type, name, archive),
        Commands::Inspect { archive, json } => handle_inspect(&archive, json),
        Commands::Upload {
            archive,
            version,
            description,
            declared_type,
        } => handle_upload(config, token, archive, version, description, declared_type).await,
        Commands::List { json } => handle_list(config, json),
        Commands::Apply { id } => handle_apply(config, token, id).await,
        Commands::Rollback => handle_rollback(config, token).await,
        Commands::Delete { id } => {
            build_service(config)?.delete(&token, id)?;
            println!("Deleted {}", id);
            Ok(())
        }
    }
}

fn load_config(
    path: Option<&Path>,
    root: Option<PathBuf>,
) -> Result<PipelineConfig, updater::ConfigError> {
    let default_path = Path::new(DEFAULT_CONFIG);
    let mut config = match path {
        Some(path) => PipelineConfig::load(path)?,
        None if default_path.exists() => PipelineConfig::load(default_path)?,
        None => PipelineConfig::default(),
    };
    if let Some(root) = root {
        config.live_root = root;
    }
    debug!(root = %config.live_root.display(), "Loaded pipeline config");
    Ok(config)
}

fn build_service(config: PipelineConfig) -> Result<Service, Box<dyn std::error::Error>> {
    let store = JsonFileStore::open(config.store_path())?;
    let tree = DirTree::new(&config.live_root);
    let gate = StaticTokenGate::from_config(&config);
    Ok(UpdateService::new(UpdatePipeline::new(config, store, tree), gate))
}

fn spinner() -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

/// MIME type implied by an archive's file name.
fn guess_archive_type(name: &str) -> &'static str {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with(".zip") {
        "application/zip"
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        "application/gzip"
    } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
        "application/x-bzip2"
    } else if lower.ends_with(".tar") {
        "application/x-tar"
    } else {
        "application/octet-stream"
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string())
}

fn handle_scan(
    config: &PipelineConfig,
    file: PathBuf,
    declared_type: String,
    name: Option<String>,
    archive: bool,
) -> CliResult {
    let scanner = updater::Scanner::new(config.scanner.clone());
    let name = name.unwrap_or_else(|| file_name_of(&file));
    let upload = UploadedFile::from_path(&file, name, declared_type)?;

    let verdict = if archive {
        scanner.validate_archive(&upload)
    } else {
        scanner.validate_upload(&upload)
    };
    println!("{}", serde_json::to_string_pretty(&verdict)?);

    match verdict.reason {
        Some(reason) if !verdict.accepted => Err(reason.into()),
        _ => Ok(()),
    }
}

fn handle_inspect(archive: &Path, json: bool) -> CliResult {
    let info = extractor::probe(archive)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Format:  {}", info.format);
    println!("Entries: {}", info.entries);
    println!(
        "Size:    {} compressed, ~{} uncompressed",
        HumanBytes(info.compressed_bytes),
        HumanBytes(info.uncompressed_estimate)
    );
    for entry in &info.entry_list {
        let marker = if entry.is_directory { "d" } else { "-" };
        println!("  {} {:>10}  {}", marker, HumanBytes(entry.size).to_string(), entry.path);
    }
    Ok(())
}

async fn handle_upload(
    config: PipelineConfig,
    token: String,
    archive: PathBuf,
    version: Option<String>,
    description: Option<String>,
    declared_type: Option<String>,
) -> CliResult {
    let original_name = file_name_of(&archive);
    let declared_type = declared_type.unwrap_or_else(|| guess_archive_type(&original_name).to_string());

    let updates_dir = config.updates_path();
    let service = build_service(config)?;

    // Copy into the updates directory under a unique name, as an upload
    // endpoint would store it.
    tokio::fs::create_dir_all(&updates_dir).await?;
    let stored = updates_dir.join(format!("{}-{}", Uuid::new_v4(), original_name));
    if let Err(e) = tokio::fs::copy(&archive, &stored).await {
        discard_upload(&stored).await;
        return Err(e.into());
    }

    let staged = match UploadedFile::from_path(&stored, original_name, declared_type) {
        Ok(upload) => tokio::task::spawn_blocking(move || {
            service.upload(&token, &upload, version, description)
        })
        .await
        .map_err(Box::<dyn std::error::Error>::from)
        .and_then(|result| result.map_err(Into::into)),
        Err(e) => Err(e.into()),
    };

    let record = match staged {
        Ok(record) => record,
        Err(e) => {
            // Rejected uploads are already gone; anything else leaves our copy.
            discard_upload(&stored).await;
            return Err(e);
        }
    };

    println!("Staged {} as {} ({})", record.source_file_name, record.version, record.id);
    Ok(())
}

async fn discard_upload(stored: &Path) {
    if let Err(e) = tokio::fs::remove_file(stored).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            debug!(path = %stored.display(), error = %e, "Failed to remove stored upload");
        }
    }
}

fn handle_list(config: PipelineConfig, json: bool) -> CliResult {
    let updates = build_service(config)?.list_updates()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&updates)?);
        return Ok(());
    }
    if updates.is_empty() {
        println!("No updates");
        return Ok(());
    }
    for update in &updates {
        print_update(update);
    }
    Ok(())
}

fn print_update(update: &PendingUpdate) {
    println!(
        "{}  {:<10}  {:<16}  {}  {}",
        update.id,
        update.status,
        update.version,
        update.created_at.format("%Y-%m-%d %H:%M:%S"),
        update.source_file_name
    );
    if let Some(error) = &update.error_message {
        println!("    error: {}", error);
    }
    if let Some(backup) = &update.backup_path {
        println!("    backup: {}", backup.display());
    }
}

async fn handle_apply(config: PipelineConfig, token: String, id: Uuid) -> CliResult {
    let service = build_service(config)?;
    let pb = spinner()?;
    pb.set_message(format!("Applying {}", id));

    let pb_for_progress = pb.clone();
    let result = tokio::task::spawn_blocking(move || {
        let progress_cb = move |entry: &str, bytes_written: u64| {
            pb_for_progress.set_message(format!("{} ({})", entry, HumanBytes(bytes_written)));
        };
        service.apply_with_progress(&token, id, &progress_cb)
    })
    .await?;
    pb.finish_and_clear();

    let record = result?;
    println!("Applied {} ({})", record.version, record.id);
    if let Some(backup) = &record.backup_path {
        println!("Backup: {}", backup.display());
    }
    Ok(())
}

async fn handle_rollback(config: PipelineConfig, token: String) -> CliResult {
    let service = build_service(config)?;
    let pb = spinner()?;
    pb.set_message("Rolling back");

    let result = tokio::task::spawn_blocking(move || service.rollback(&token)).await?;
    pb.finish_and_clear();

    let outcome = result?;
    println!(
        "Restored {} from {}",
        outcome.restored_version,
        outcome.backup_path.display()
    );
    println!("Pre-rollback snapshot: {}", outcome.new_backup_path.display());
    println!("Restored: {}", outcome.restored_paths.join(", "));
    Ok(())
}
