//! `schedule` — operator CLI over the scheduling core.
//!
//! Mirrors the shape of every other entry point in this workspace: a
//! thin `main` that parses arguments, connects to the database, and
//! dispatches into the library crates that hold the real logic.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sched_config::SchedulerConfig;
use sched_db::PgPool;
use sched_schemas::Bucket;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "schedule")]
#[command(about = "Scheduling core operator CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enumerate candidates and print projected priorities without
    /// enqueuing anything.
    Schedule {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        campaign: Option<String>,
        #[arg(long)]
        codebase: Option<String>,
    },

    /// Database commands.
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Queue inspection and administration.
    Queue {
        #[command(subcommand)]
        cmd: QueueCmd,
    },

    /// Compute a layered config hash and print canonical JSON.
    ConfigHash {
        #[arg(required = true)]
        paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    Migrate,
}

#[derive(Subcommand)]
enum QueueCmd {
    List {
        #[arg(long)]
        campaign: Option<String>,
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
    },
    Priority {
        id: String,
        priority: i64,
    },
    Remove {
        id: String,
    },
}

/// Exit-code classification per spec: 0 success, 64 usage, 70 internal,
/// 75 transient (DB unavailable). Only argument parsing failures get
/// 64 — a `SchedulerError` from the backend is either 70 or 75
/// depending on whether it is retryable.
enum CliError {
    Usage(String),
    Internal(anyhow::Error),
    Transient(anyhow::Error),
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::Internal(e)
    }
}

impl From<sched_schemas::SchedulerError> for CliError {
    fn from(e: sched_schemas::SchedulerError) -> Self {
        if e.is_retryable() {
            CliError::Transient(e.into())
        } else {
            CliError::Internal(e.into())
        }
    }
}

fn parse_uuid_arg(flag: &str, s: &str) -> Result<Uuid, CliError> {
    Uuid::parse_str(s).map_err(|_| CliError::Usage(format!("{flag}: not a valid UUID: {s}")))
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let _ = dotenvy::from_filename(".env.local");

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::from(0),
        Err(CliError::Usage(msg)) => {
            eprintln!("usage error: {msg}");
            ExitCode::from(64)
        }
        Err(CliError::Internal(e)) => {
            eprintln!("error: {e:#}");
            ExitCode::from(70)
        }
        Err(CliError::Transient(e)) => {
            eprintln!("transient error (database unavailable?): {e:#}");
            ExitCode::from(75)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}

async fn connect() -> Result<PgPool, CliError> {
    sched_db::connect_from_env().await.map_err(CliError::Transient)
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.cmd {
        Commands::Schedule { dry_run, campaign, codebase } => {
            schedule_cmd(dry_run, campaign, codebase).await
        }
        Commands::Db { cmd } => db_cmd(cmd).await,
        Commands::Queue { cmd } => queue_cmd(cmd).await,
        Commands::ConfigHash { paths } => config_hash_cmd(paths),
    }
}

async fn schedule_cmd(dry_run: bool, campaign: Option<String>, codebase: Option<String>) -> Result<(), CliError> {
    if !dry_run {
        return Err(CliError::Usage(
            "only --dry-run is supported; the daemon owns live enqueueing".to_string(),
        ));
    }

    let campaign_id = campaign.as_deref().map(|s| parse_uuid_arg("--campaign", s)).transpose()?;
    let codebase_id = codebase.as_deref().map(|s| parse_uuid_arg("--codebase", s)).transpose()?;

    let pool = connect().await?;
    let config = SchedulerConfig::default();

    let proposals = sched_selector::select_candidates(&pool, &config, false).await?;

    let mut printed = 0;
    for p in &proposals {
        if let Some(cid) = campaign_id {
            if p.candidate.campaign_id != cid {
                continue;
            }
        }
        if let Some(cbid) = codebase_id {
            if p.candidate.codebase_id != cbid {
                continue;
            }
        }
        println!(
            "candidate={} codebase={} campaign={} bucket={} priority={} est_duration_s={} success_probability={:.3}",
            p.candidate.id,
            p.candidate.codebase_id,
            p.candidate.campaign_id,
            p.item.bucket.as_str(),
            p.item.priority,
            p.item.estimated_duration_secs,
            p.item.success_probability,
        );
        printed += 1;
    }
    eprintln!("{printed} candidate(s) would be enqueued");
    Ok(())
}

async fn db_cmd(cmd: DbCmd) -> Result<(), CliError> {
    let pool = connect().await?;
    match cmd {
        DbCmd::Status => {
            let status = sched_db::status(&pool).await.map_err(CliError::Transient)?;
            println!("reachable={} queue_depth={}", status.reachable, status.queue_depth);
        }
        DbCmd::Migrate => {
            sched_db::migrate(&pool).await.map_err(CliError::Transient)?;
            println!("migrations_applied=true");
        }
    }
    Ok(())
}

async fn queue_cmd(cmd: QueueCmd) -> Result<(), CliError> {
    let pool = connect().await?;
    match cmd {
        QueueCmd::List { campaign, bucket, limit, offset } => {
            let campaign_id = campaign.as_deref().map(|s| parse_uuid_arg("--campaign", s)).transpose()?;
            let bucket = bucket
                .as_deref()
                .map(|s| parse_bucket_arg(s))
                .transpose()?;
            let items = sched_db::list(&pool, campaign_id, bucket, limit, offset).await?;
            for item in items {
                println!(
                    "id={} bucket={} priority={} candidate={} created_at={}",
                    item.id,
                    item.bucket.as_str(),
                    item.priority,
                    item.candidate_id,
                    item.created_at.to_rfc3339(),
                );
            }
        }
        QueueCmd::Priority { id, priority } => {
            let id = parse_uuid_arg("id", &id)?;
            let queue = sched_queue::QueueManager::new(pool);
            queue.reprioritize(id, priority).await?;
            println!("priority_updated=true");
        }
        QueueCmd::Remove { id } => {
            let id = parse_uuid_arg("id", &id)?;
            let queue = sched_queue::QueueManager::new(pool);
            queue.remove(id).await?;
            println!("removed=true");
        }
    }
    Ok(())
}

fn parse_bucket_arg(s: &str) -> Result<Bucket, CliError> {
    match s {
        "control" => Ok(Bucket::Control),
        "hook" => Ok(Bucket::Hook),
        "manual" => Ok(Bucket::Manual),
        "update-existing-mp" => Ok(Bucket::UpdateExistingMp),
        "update-new-mp" => Ok(Bucket::UpdateNewMp),
        "reschedule" => Ok(Bucket::Reschedule),
        "missing-deps" => Ok(Bucket::MissingDeps),
        "default" => Ok(Bucket::Default),
        other => Err(CliError::Usage(format!("--bucket: unknown bucket {other}"))),
    }
}

fn config_hash_cmd(paths: Vec<String>) -> Result<(), CliError> {
    let path_refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    let loaded = sched_config::load_layered_yaml(&path_refs)?;
    println!("config_hash={}", loaded.config_hash);
    println!("{}", loaded.canonical_json);
    Ok(())
}
