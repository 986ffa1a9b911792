/*!
Docvault CLI - operator interface for the Docvault backup and recovery engine.

Documents are read from and restored into a directory tree
(`<data-dir>/<collection>/<id>.json`); snapshot blobs live in the configured
backup store. The backup history is rebuilt from the store on every run.
*/

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use docvault_core::{
    init_observability_with, BackupEngine, BackupFilter, BackupKind, BackupRecord, EngineConfig,
    FsDataSource, RecoveryOptions, RecoveryRecord, RetentionPolicy, StorageConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::{debug, error};

#[derive(Parser, Debug)]
#[command(name = "docvault")]
#[command(about = "Backup and recovery for document collections")]
#[command(version)]
struct Cli {
    /// JSON engine configuration file
    #[arg(short, long, global = true, env = "DOCVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding one sub-directory per collection
    #[arg(long, global = true, env = "DOCVAULT_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Directory for snapshot blobs (overrides the configured storage)
    #[arg(long, global = true, env = "DOCVAULT_STORE_DIR")]
    store_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum KindArg {
    Full,
    Incremental,
}

impl From<KindArg> for BackupKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Full => BackupKind::Full,
            KindArg::Incremental => BackupKind::Incremental,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a backup
    Backup {
        #[arg(short, long, value_enum, default_value = "full")]
        kind: KindArg,
        /// Store the snapshot uncompressed
        #[arg(long)]
        no_compress: bool,
        /// Apply the retention policy afterwards
        #[arg(long)]
        auto_cleanup: bool,
        /// Comma-separated subset of collections
        #[arg(long, value_delimiter = ',')]
        collections: Vec<String>,
    },
    /// List backups
    List {
        #[arg(short, long, value_enum)]
        kind: Option<KindArg>,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        oldest_first: bool,
    },
    /// Show registry status and counters
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check a backup's integrity without restoring it
    Validate { backup_id: String },
    /// Restore a backup into the data directory
    Recover {
        backup_id: String,
        /// Report what would be restored without writing
        #[arg(long)]
        dry_run: bool,
        /// Restore even if validation fails
        #[arg(long)]
        force: bool,
        /// Comma-separated subset of collections
        #[arg(long, value_delimiter = ',')]
        collections: Vec<String>,
        #[arg(long, env = "USER")]
        requested_by: Option<String>,
    },
    /// Delete a backup
    Delete {
        backup_id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Apply the retention policy
    Cleanup {
        #[arg(long)]
        max_backups: Option<usize>,
        #[arg(long)]
        max_age_days: Option<u64>,
    },
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Collections")]
    collections: String,
    #[tabled(rename = "Based On")]
    based_on: String,
}

impl From<&BackupRecord> for BackupRow {
    fn from(record: &BackupRecord) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind.to_string(),
            created: format_timestamp(record.created_at),
            size: format_size(record.size_bytes),
            collections: record.collection_names.iter().cloned().collect::<Vec<_>>().join(","),
            based_on: record.based_on_id.clone().unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Tabled)]
struct CollectionRow {
    #[tabled(rename = "Collection")]
    collection: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Documents")]
    documents: usize,
    #[tabled(rename = "Error")]
    error: String,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let directive = if cli.verbose { "docvault=debug" } else { "docvault=info" };
    init_observability_with(cli.json_logs, directive)?;

    run(&cli)
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let engine = open_engine(cli)?;

    match &cli.command {
        Commands::Backup {
            kind,
            no_compress,
            auto_cleanup,
            collections,
        } => {
            let mut options = engine.backup_options();
            options.compress = !no_compress;
            options.auto_cleanup |= auto_cleanup;
            if !collections.is_empty() {
                options.collections = Some(collections.clone());
            }

            let record = engine.create_backup((*kind).into(), &options)?;
            println!("✓ Backup {} stored as {}", record.id, record.storage_key);
            println!("{}", Table::new([BackupRow::from(&record)]));
        }
        Commands::List {
            kind,
            limit,
            oldest_first,
        } => {
            let mut filter = BackupFilter::default();
            filter.kind = kind.map(Into::into);
            filter.limit = *limit;
            if *oldest_first {
                filter = filter.oldest_first();
            }

            let backups = engine.list_backups(&filter);
            if backups.is_empty() {
                println!("No backups found");
            } else {
                println!("{}", Table::new(backups.iter().map(BackupRow::from)));
            }
        }
        Commands::Status { json } => {
            let status = engine.status();
            if *json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                let counters = status.counters;
                println!("Backups stored: {}", status.backup_count);
                match &status.last_backup {
                    Some(last) => println!(
                        "Last backup:    {} ({}, {})",
                        last.id,
                        last.kind,
                        format_timestamp(last.created_at)
                    ),
                    None => println!("Last backup:    none"),
                }
                println!(
                    "Backups:        {} total, {} succeeded, {} failed (this run)",
                    counters.total_backups, counters.successful_backups, counters.failed_backups
                );
            }
        }
        Commands::Validate { backup_id } => {
            let result = engine.validate_backup(backup_id)?;
            if result.valid {
                println!("✓ Backup {backup_id} passed integrity checks");
            } else {
                for issue in &result.issues {
                    error!("  {}", issue);
                }
                bail!(
                    "Backup {backup_id} failed integrity checks ({} issue(s))",
                    result.issues.len()
                );
            }
        }
        Commands::Recover {
            backup_id,
            dry_run,
            force,
            collections,
            requested_by,
        } => {
            let options = RecoveryOptions {
                dry_run: *dry_run,
                collections: (!collections.is_empty()).then(|| collections.clone()),
                force: *force,
                requested_by: requested_by.clone(),
            };
            let record = engine.recover(backup_id, &options)?;
            print_recovery(&record);
        }
        Commands::Delete { backup_id, force } => {
            if !force && !confirm(&format!("Are you sure you want to delete backup '{backup_id}'?"))? {
                println!("Deletion cancelled");
                return Ok(());
            }
            let record = engine.delete_backup(backup_id)?;
            println!("✓ Backup {} deleted", record.id);
        }
        Commands::Cleanup {
            max_backups,
            max_age_days,
        } => {
            let policy = retention_policy(&engine.config().retention, *max_backups, *max_age_days);
            let report = engine.cleanup(&policy)?;
            println!("✓ Deleted {} backup(s)", report.deleted.len());
            for failure in &report.failed {
                println!("✗ Kept {}: {}", failure.backup_id, failure.error);
            }
            for base in &report.kept_as_base {
                println!("• Kept {base}: a newer incremental builds on it");
            }
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => {
            let names = FsDataSource::new(&cli.data_dir)
                .collection_names()
                .with_context(|| format!("Failed to scan {}", cli.data_dir.display()))?;
            if names.is_empty() {
                bail!(
                    "No collections found under {}; create them or pass --config",
                    cli.data_dir.display()
                );
            }
            EngineConfig::with_collection_names(names)
        }
    };

    if let Some(store_dir) = &cli.store_dir {
        config.storage = StorageConfig::local(store_dir);
    }
    config.validate()?;
    debug!(collections = config.collections.len(), "Loaded configuration");
    Ok(config)
}

fn open_engine(cli: &Cli) -> anyhow::Result<BackupEngine> {
    let config = load_config(cli)?;
    let source = Arc::new(FsDataSource::new(&cli.data_dir));
    let engine = BackupEngine::from_config(config, source)?;
    let found = engine.rehydrate()?;
    debug!(backups = found, "Backup history loaded");
    Ok(engine)
}

fn retention_policy(
    configured: &RetentionPolicy,
    max_backups: Option<usize>,
    max_age_days: Option<u64>,
) -> RetentionPolicy {
    let mut policy = configured.clone();
    if let Some(max) = max_backups {
        policy = policy.with_max_backups(max);
    }
    if let Some(days) = max_age_days {
        policy = policy.with_max_age_days(days);
    }
    policy
}

fn print_recovery(record: &RecoveryRecord) {
    let prefix = if record.dry_run { "[dry run] " } else { "" };
    println!(
        "{prefix}Recovery {} of {}: {:?}, {} document(s) restored in {} ms",
        record.id, record.backup_id, record.status, record.total_documents_restored, record.duration_ms
    );

    let rows = record.per_collection.iter().map(|(name, outcome)| CollectionRow {
        collection: name.clone(),
        status: format!("{:?}", outcome.status),
        documents: outcome.restored_count,
        error: outcome.error.clone().unwrap_or_default(),
    });
    println!("{}", Table::new(rows));
}

fn confirm(question: &str) -> anyhow::Result<bool> {
    use std::io::{self, Write};

    print!("{question} (y/N): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_lowercase().starts_with('y'))
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: chrono::DateTime<chrono::Utc>) -> String {
    timestamp
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docvault_core::{DataSource, DocumentRecord};
    use tempfile::TempDir;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("docvault").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_parse_backup_command() {
        let parsed = cli(&["backup", "--kind", "incremental", "--collections", "a,b", "--no-compress"]);
        match parsed.command {
            Commands::Backup {
                kind,
                no_compress,
                collections,
                ..
            } => {
                assert_eq!(kind, KindArg::Incremental);
                assert!(no_compress);
                assert_eq!(collections, vec!["a", "b"]);
            }
            other => panic!("Unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_retention_overrides() {
        let policy = retention_policy(&RetentionPolicy::default(), Some(2), None);
        assert_eq!(policy.max_backups, Some(2));
        assert_eq!(policy.max_age_ms, RetentionPolicy::default().max_age_ms);
    }

    #[test]
    fn test_backup_then_recover_through_cli() {
        let data = TempDir::new().unwrap();
        let store = TempDir::new().unwrap();
        let source = FsDataSource::new(data.path());
        source
            .put_document("products", &DocumentRecord::new("p-1", Default::default()))
            .unwrap();

        let data_dir = data.path().to_str().unwrap();
        let store_dir = store.path().to_str().unwrap();
        let global = ["--data-dir", data_dir, "--store-dir", store_dir];
        let with = |extra: &[&str]| cli(&global.iter().copied().chain(extra.iter().copied()).collect::<Vec<_>>());

        run(&with(&["backup"])).unwrap();
        std::fs::remove_dir_all(data.path().join("products")).unwrap();
        std::fs::create_dir_all(data.path().join("products")).unwrap();

        let engine = open_engine(&with(&["status"])).unwrap();
        let backup_id = engine.list_backups(&BackupFilter::default())[0].id.clone();
        drop(engine);

        run(&with(&["validate", backup_id.as_str()])).unwrap();
        run(&with(&["recover", backup_id.as_str(), "--requested-by", "tests"])).unwrap();
        assert_eq!(source.list_documents("products").unwrap().len(), 1);
    }
}
