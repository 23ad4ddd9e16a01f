//! ledgerkeep maintenance CLI
//!
//! Opens a file-backed local store (and the remote service, when built with
//! `remote-http` and configured) and runs one maintenance command.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use ledgerkeep::storage::persistent::{open_local_store, FileStoreConfig};
use ledgerkeep::storage::{LocalStore, NullRemote, RemoteBackend};
use ledgerkeep::{BackupKind, Ledger, LedgerConfig, LedgerError, LedgerResult, SaveOutcome};

enum Command {
    Stats,
    Backups,
    Backup,
    Restore(String),
    Verify,
    Export(PathBuf),
    Import(PathBuf),
}

struct Args {
    data_dir: PathBuf,
    config: Option<PathBuf>,
    command: Command,
}

fn usage() {
    println!("ledgerkeep - maintenance tool for a ledgerkeep data directory");
    println!();
    println!("USAGE:");
    println!("    ledgerkeep [OPTIONS] <COMMAND>");
    println!();
    println!("OPTIONS:");
    println!("    -d, --data-dir <DIR>      Local data directory [default: ./ledgerkeep-data]");
    println!("    -c, --config <FILE>       TOML configuration file");
    println!("    -h, --help                Print help information");
    println!();
    println!("COMMANDS:");
    println!("    stats                     Record counts and sales totals");
    println!("    backups                   List backups, newest first");
    println!("    backup                    Take a manual backup");
    println!("    restore <ID>              Restore a backup (a pre-restore backup is taken first)");
    println!("    verify                    Run the integrity checks");
    println!("    export <FILE>             Write the whole dataset as JSON");
    println!("    import <FILE>             Replace the dataset from JSON (a pre-import backup is taken first)");
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(2);
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    args.get(i + 1)
        .cloned()
        .unwrap_or_else(|| fail(&format!("{flag} requires a value")))
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut data_dir = None;
    let mut config = None;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" | "-d" => {
                data_dir = Some(PathBuf::from(value_of(&args, i, "--data-dir")));
                i += 2;
            }
            "--config" | "-c" => {
                config = Some(PathBuf::from(value_of(&args, i, "--config")));
                i += 2;
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => fail(&format!("unknown option: {arg}")),
            arg => {
                positional.push(arg.to_string());
                i += 1;
            }
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("stats") => Command::Stats,
        Some("backups") => Command::Backups,
        Some("backup") => Command::Backup,
        Some("verify") => Command::Verify,
        Some("restore") => Command::Restore(
            positional
                .next()
                .unwrap_or_else(|| fail("restore requires a backup id")),
        ),
        Some("export") => Command::Export(PathBuf::from(
            positional.next().unwrap_or_else(|| fail("export requires a file")),
        )),
        Some("import") => Command::Import(PathBuf::from(
            positional.next().unwrap_or_else(|| fail("import requires a file")),
        )),
        Some(other) => fail(&format!("unknown command: {other}")),
        None => {
            usage();
            std::process::exit(2);
        }
    };
    if let Some(extra) = positional.next() {
        fail(&format!("unexpected argument: {extra}"));
    }

    Args {
        data_dir: data_dir.unwrap_or_else(|| PathBuf::from("./ledgerkeep-data")),
        config,
        command,
    }
}

#[cfg(feature = "remote-http")]
fn remote_backend(config: &LedgerConfig) -> LedgerResult<Arc<dyn RemoteBackend>> {
    if config.remote.base_url.is_some() {
        let remote = ledgerkeep::storage::HttpRemote::new(&config.remote)?;
        return Ok(Arc::new(remote));
    }
    Ok(Arc::new(NullRemote))
}

#[cfg(not(feature = "remote-http"))]
#[allow(clippy::unnecessary_wraps)]
fn remote_backend(config: &LedgerConfig) -> LedgerResult<Arc<dyn RemoteBackend>> {
    if config.remote.base_url.is_some() {
        tracing::warn!("remote.base_url is set but this build has no HTTP client; running local-only");
    }
    Ok(Arc::new(NullRemote))
}

fn describe_save(outcome: &SaveOutcome) -> String {
    match outcome.report() {
        Some(report) if report.is_degraded() => "saved locally only (remote unavailable)".to_string(),
        Some(_) => "saved".to_string(),
        None => "save coalesced into a running one".to_string(),
    }
}

fn run(args: Args) -> LedgerResult<()> {
    let config = match &args.config {
        Some(path) => LedgerConfig::load(path)?,
        None => LedgerConfig::default().with_env_overrides().validate()?,
    };
    let data_dir = config.local.data_dir.clone().unwrap_or(args.data_dir);

    let local: Arc<dyn LocalStore> = Arc::new(open_local_store(
        &data_dir,
        Some(FileStoreConfig {
            per_key_quota: config.local.per_key_quota,
            ..FileStoreConfig::default()
        }),
    )?);
    let remote = remote_backend(&config)?;
    let ledger = Ledger::new(remote, local, config)?;
    let load = ledger.load()?;
    tracing::info!(source = ?load.source, data_dir = %data_dir.display(), "ledger loaded");

    match args.command {
        Command::Stats => {
            for (collection, count) in ledger.counts()? {
                println!("{:<10} {count}", collection.as_str());
            }
            let sales = ledger.sales_summary()?;
            println!();
            println!("sales      {}", sales.count);
            println!("gross      {}", sales.gross);
            println!("commission {}", sales.commission);
            println!("net        {}", sales.net);
        }
        Command::Backups => {
            for meta in ledger.list_backups()? {
                let total: usize = meta.counts.values().sum();
                println!(
                    "{}  {:<12} {}  {total} records",
                    meta.id,
                    meta.kind.as_str(),
                    meta.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
        Command::Backup => {
            let meta = ledger.create_backup(BackupKind::Manual)?;
            println!("created backup {}", meta.id);
        }
        Command::Restore(id) => {
            let report = ledger.restore_backup(&id)?;
            println!(
                "restored {} (safety backup {}); {}",
                report.restored.id,
                report.safety.id,
                describe_save(&report.save)
            );
        }
        Command::Verify => {
            let report = ledger.verify()?;
            if report.is_clean() {
                println!("ok");
            }
            for issue in &report.issues {
                println!("{:?} {} {}: {}", issue.kind, issue.collection, issue.record, issue.detail);
            }
        }
        Command::Export(path) => {
            let dataset = ledger.export_dataset()?;
            let text = serde_json::to_string_pretty(&dataset)
                .map_err(|e| LedgerError::internal(format!("cannot encode export: {e}")))?;
            std::fs::write(&path, text)
                .map_err(|e| LedgerError::internal(format!("cannot write {}: {e}", path.display())))?;
            println!("exported to {}", path.display());
        }
        Command::Import(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| LedgerError::internal(format!("cannot read {}: {e}", path.display())))?;
            let report = ledger.import_json(&text)?;
            println!(
                "imported (pre-import backup {}, {} issues); {}",
                report.backup.id,
                report.issues.issues.len(),
                describe_save(&report.save)
            );
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ledgerkeep=info")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
