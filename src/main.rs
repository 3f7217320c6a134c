//! Site backup CLI.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use site_backup::compressor;
use site_backup::config::AppConfig;
use site_backup::db::{MySqlSiteDatabase, SiteDatabase};
use site_backup::error::BackupError;
use site_backup::fs::{FileEnumerator, WalkOptions, WalkdirEnumerator};
use site_backup::logger;
use site_backup::notice::{LogNotices, NoticeSink};
use site_backup::pipeline::{Orchestrator, Run, RunOutcome, StepSet};
use site_backup::progress::{format_elapsed, InProgressTracker};
use site_backup::remote::{RemoteForm, RemoteSettings, SftpClient, DEFAULT_PORT, REMOTE_KEY};
use site_backup::settings::{RemoteSubtype, SettingsStore, SqliteSettingsStore};
use site_backup::steps::{
    self, ArchiveStep, DatabaseStep, DiscoveryStep, FilelistStep, UploadStep,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Resumable site backups", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new backup run
    Run,
    /// Continue an interrupted run from its last checkpoint
    Resume,
    /// Cancel the current run and release the in-progress marker
    Abort,
    /// Show the last run and the in-progress marker
    Status,
    /// List usable compressors in preference order
    Compressors,
    /// Manage remote storage credentials
    Remote {
        #[command(subcommand)]
        command: RemoteCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RemoteCommand {
    /// Validate and persist remote credentials
    Save {
        #[arg(long)]
        host: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        secret: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Protocol subtype (sftp)
        #[arg(long, default_value = "sftp")]
        protocol: String,
        /// Remote archives to keep; 0 keeps everything
        #[arg(long, default_value_t = 0)]
        retention: u32,
        #[arg(long, default_value = "")]
        nickname: String,
    },
    /// Forget the stored credentials
    Delete,
    /// Probe the stored credentials against the live host
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = AppConfig::from_env();

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    logger::init(log_level)?;

    std::fs::create_dir_all(&config.backup_dir)
        .with_context(|| format!("could not create {}", config.backup_dir.display()))?;
    let store: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::open(&config.settings_path)?);

    match args.command {
        Command::Run => {
            let orchestrator = build_orchestrator(&config, store.clone()).await?;
            let dir = config.backup_dir.join(format!(
                "run-{}",
                chrono::Utc::now().format("%Y%m%d-%H%M%S")
            ));
            match orchestrator.start(dir).await {
                Ok(RunOutcome::Completed) => println!("Backup completed."),
                Ok(RunOutcome::Suspended) => {
                    println!("Time budget exhausted; run `site-backup resume` to continue.");
                }
                Err(BackupError::Conflict(since)) => {
                    let elapsed = (chrono::Utc::now().timestamp() - since).max(0) as u64;
                    anyhow::bail!(
                        "a backup started {} ago is already in progress (use `site-backup abort` to cancel it)",
                        format_elapsed(elapsed)
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Resume => {
            let orchestrator = build_orchestrator(&config, store.clone()).await?;
            match orchestrator.resume().await? {
                None => println!("Nothing to resume."),
                Some(RunOutcome::Completed) => println!("Backup completed."),
                Some(RunOutcome::Suspended) => {
                    println!("Time budget exhausted; run `site-backup resume` to continue.");
                }
            }
        }
        Command::Abort => {
            // Abort never touches the database or the file tree, so the
            // orchestrator is built without steps.
            let tracker = Arc::new(InProgressTracker::new(store.clone()));
            let notices: Arc<dyn NoticeSink> = Arc::new(LogNotices);
            let orchestrator = Orchestrator::new(
                StepSet::new(),
                store.clone(),
                tracker,
                notices,
                state_path(&config),
            );
            orchestrator.abort().await?;
            println!("Backup aborted.");
        }
        Command::Status => {
            let tracker = InProgressTracker::new(store.clone());
            print_status(&config, &tracker)?;
        }
        Command::Compressors => {
            for name in compressor::available_compressors() {
                println!("{name}");
            }
        }
        Command::Remote { command } => run_remote_command(command, store).await?,
    }

    Ok(())
}

fn state_path(config: &AppConfig) -> PathBuf {
    config.backup_dir.join("run-state.json")
}

async fn build_orchestrator(
    config: &AppConfig,
    store: Arc<dyn SettingsStore>,
) -> Result<Orchestrator> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;
    let db: Arc<dyn SiteDatabase> = Arc::new(
        MySqlSiteDatabase::connect(url, &config.database_name, config.database_charset.clone())
            .await?,
    );

    let tracker = Arc::new(InProgressTracker::new(store.clone()));
    let notices: Arc<dyn NoticeSink> = Arc::new(LogNotices);
    let enumerator: Arc<dyn FileEnumerator> = Arc::new(WalkdirEnumerator::new(WalkOptions {
        exclude_dirs: vec![config.backup_dir.clone()],
        ..WalkOptions::default()
    }));

    let site_root = config.site_root.clone();
    let step_set = StepSet::new()
        .register(steps::DISCOVERY, {
            let db = db.clone();
            let site_root = site_root.clone();
            move || Box::new(DiscoveryStep::new(db.clone(), site_root.clone()))
        })
        .register(steps::DATABASE, {
            let db = db.clone();
            let tracker = tracker.clone();
            move || Box::new(DatabaseStep::new(db.clone(), tracker.clone()))
        })
        .register(steps::FILELIST, {
            let enumerator = enumerator.clone();
            let site_root = site_root.clone();
            move || Box::new(FilelistStep::new(enumerator.clone(), site_root.clone()))
        })
        .register(steps::ARCHIVE, || Box::new(ArchiveStep::new()))
        .register(steps::UPLOAD, {
            let store = store.clone();
            let notices = notices.clone();
            move || Box::new(UploadStep::new(store.clone(), notices.clone()))
        });

    Ok(Orchestrator::new(
        step_set,
        store,
        tracker,
        notices,
        state_path(config),
    )
    .with_max_attempts(config.max_step_attempts)
    .with_time_budget(config.time_budget))
}

fn print_status(config: &AppConfig, tracker: &InProgressTracker) -> Result<()> {
    match Run::load(&state_path(config))? {
        None => println!("No backup run recorded."),
        Some(run) => {
            let status = serde_json::to_value(run.status)?;
            println!(
                "run {} [{}] in {}",
                run.id,
                status.as_str().unwrap_or("unknown"),
                run.dir.display()
            );
            for record in &run.steps {
                let step_status = serde_json::to_value(record.status)?;
                let mut line = format!(
                    "  {:<12} {} (attempts: {})",
                    record.name,
                    step_status.as_str().unwrap_or("unknown"),
                    record.attempts
                );
                if let Some(error) = &record.last_error {
                    line.push_str(&format!(" last error: {error}"));
                }
                println!("{line}");
            }
        }
    }

    // The tracker owns the marker policy: a stale marker gets its closing
    // remark here and is cleared, exactly once.
    let notices = tracker.add_notice(Vec::new())?;
    if notices.is_empty() {
        println!("No backup in progress.");
    }
    for notice in notices {
        println!("{}", notice.message);
    }
    Ok(())
}

async fn run_remote_command(command: RemoteCommand, store: Arc<dyn SettingsStore>) -> Result<()> {
    match command {
        RemoteCommand::Save {
            host,
            user,
            secret,
            port,
            protocol,
            retention,
            nickname,
        } => {
            let subtype: RemoteSubtype = protocol.parse()?;
            let form = RemoteForm {
                host,
                user,
                secret,
                port,
                subtype,
                retention_count: retention,
                nickname,
            };
            // ssh2 validation is synchronous.
            tokio::task::spawn_blocking(move || {
                let mut remote = RemoteSettings::new(store);
                remote.save(&form)
            })
            .await??;
            println!("Remote credentials validated and saved.");
        }
        RemoteCommand::Delete => {
            let mut remote = RemoteSettings::new(store);
            remote.delete()?;
            println!("Remote credentials deleted.");
        }
        RemoteCommand::Test => {
            let credential = store.get()?.remote.get(REMOTE_KEY).cloned().unwrap_or_default();
            if !credential.is_configured() {
                anyhow::bail!("no remote credentials configured");
            }
            let host = credential.host.clone();
            let errors = tokio::task::spawn_blocking(move || {
                let mut client = SftpClient::new();
                let mut errors = Vec::new();
                client.is_valid_credentials(
                    &credential.host,
                    &credential.user,
                    &credential.secret,
                    credential.port,
                    credential.subtype,
                    &mut errors,
                );
                client.disconnect();
                errors
            })
            .await?;

            if errors.is_empty() {
                println!("Connection to {host} succeeded.");
            } else {
                anyhow::bail!("connection to {host} failed: {}", errors.join("; "));
            }
        }
    }
    Ok(())
}
