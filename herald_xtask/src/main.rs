use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use herald_core::{
    DiagnosticsApi, EmbeddingIngestApi, GroupCurationApi, GroupId, GroupStatus, Id, NewEmbedding,
    RunHistoryApi,
};
use herald_engine::{ClusteringEngine, EngineConfig, RetryPolicy, RunRequest};
use herald_store::{ClusterStore, EngineSettings, load_schema_manifest, open_store};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    match cli.command {
        Command::Cluster(args) => cluster(&cli.base, args).await,
        Command::ImportEmbeddings(args) => import_embeddings(&cli.base, args).await,
        Command::SetGroupStatus(args) => set_group_status(&cli.base, args).await,
        Command::Health(args) => check_health(&cli.base, args).await,
        Command::Runs(args) => list_runs(&cli.base, args).await,
    }
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Operator utilities for Herald story clustering"
)]
struct Cli {
    /// Directory holding herald.json and the default sqlite datastore.
    #[arg(long, global = true, default_value = ".herald")]
    base: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Assign ungrouped embeddings in the lookback window to story groups.
    Cluster(ClusterArgs),
    /// Load embeddings from a JSON-lines file.
    ImportEmbeddings(ImportArgs),
    /// Archive or merge a group.
    SetGroupStatus(SetStatusArgs),
    /// Check connectivity, migrations and membership bookkeeping.
    Health(HealthArgs),
    /// Show recent clustering runs.
    Runs(RunsArgs),
}

#[derive(Parser)]
struct ClusterArgs {
    /// Minimum cosine similarity for joining an existing group, in (0, 1].
    #[arg(long)]
    threshold: f64,
    /// Only embeddings and groups created within this many days are considered.
    #[arg(long)]
    lookback_days: u32,
    /// Skip writing the run to history.
    #[arg(long, default_value_t = false)]
    no_record: bool,
}

#[derive(Parser)]
struct ImportArgs {
    /// JSON-lines file; one `{"story_id", "vector", "created_at"?}` object per line.
    #[arg(long)]
    input: PathBuf,
}

#[derive(Parser)]
struct SetStatusArgs {
    /// Group id (uuid or ulid form).
    #[arg(long)]
    group: String,
    /// archived or merged.
    #[arg(long)]
    status: String,
}

#[derive(Parser)]
struct HealthArgs {
    /// Reduce output to errors only.
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

#[derive(Parser)]
struct RunsArgs {
    #[arg(long, default_value_t = 10)]
    limit: u32,
}

async fn open(base: &Path) -> Result<(ClusterStore, EngineSettings)> {
    open_store(base)
        .await
        .with_context(|| format!("open datastore under {}", base.display()))
}

fn engine_config(settings: &EngineSettings) -> EngineConfig {
    let defaults = EngineConfig::default();
    let retry = settings.retry.clone().unwrap_or_default();
    EngineConfig {
        ungrouped_batch_size: settings
            .ungrouped_batch_size
            .unwrap_or(defaults.ungrouped_batch_size),
        group_id_page_size: settings
            .group_id_page_size
            .unwrap_or(defaults.group_id_page_size),
        group_resolve_chunk: settings
            .group_resolve_chunk
            .unwrap_or(defaults.group_resolve_chunk),
        max_batches: settings.max_batches.unwrap_or(defaults.max_batches),
        call_timeout: settings
            .call_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.call_timeout),
        batch_timeout: settings
            .batch_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.batch_timeout),
        expected_dimension: settings.expected_dimension,
        retry: RetryPolicy {
            max_attempts: retry.max_attempts.unwrap_or(defaults.retry.max_attempts),
            base_backoff: retry
                .base_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.base_backoff),
            max_backoff: retry
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry.max_backoff),
        },
    }
}

async fn cluster(base: &Path, args: ClusterArgs) -> Result<()> {
    let request = RunRequest::new(args.threshold, args.lookback_days)?;
    let (store, settings) = open(base).await?;
    let store = Arc::new(store);
    let engine = ClusteringEngine::with_store(store.clone(), engine_config(&settings));
    let report = engine.run(request).await.context("clustering run failed")?;
    if !args.no_record
        && let Err(err) = store.record_run(report.to_record(&request)).await
    {
        log::warn!("herald.xtask: could not record run history: {err}");
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn import_embeddings(base: &Path, args: ImportArgs) -> Result<()> {
    let raw = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let (store, _) = open(base).await?;
    let mut imported = 0usize;
    for (idx, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let input: NewEmbedding = serde_json::from_str(line)
            .with_context(|| format!("{}:{} is not an embedding", args.input.display(), idx + 1))?;
        store
            .insert_embedding(input)
            .await
            .with_context(|| format!("insert line {}", idx + 1))?;
        imported += 1;
    }
    println!("imported {imported} embeddings from {}", args.input.display());
    Ok(())
}

fn parse_group_id(value: &str) -> Result<GroupId> {
    Ok(GroupId(value.parse::<Id>()?))
}

async fn set_group_status(base: &Path, args: SetStatusArgs) -> Result<()> {
    let group_id = parse_group_id(&args.group)?;
    let status: GroupStatus = args.status.parse()?;
    let (store, _) = open(base).await?;
    store
        .set_group_status(group_id, status)
        .await
        .with_context(|| format!("set group {group_id} to {}", status.as_str()))?;
    println!("group {group_id} is now {}", status.as_str());
    Ok(())
}

struct Finding {
    kind: &'static str,
    message: String,
}

async fn check_health(base: &Path, args: HealthArgs) -> Result<()> {
    let (store, _) = open(base).await?;
    let mut findings: Vec<Finding> = Vec::new();

    if let Err(err) = store.ping().await {
        findings.push(Finding {
            kind: "error",
            message: format!("ping failed: {err}"),
        });
    }

    let manifest = load_schema_manifest()?;
    let applied = store.applied_migrations().await?;
    for expected in &manifest.migrations {
        if !applied.contains(expected) {
            findings.push(Finding {
                kind: "error",
                message: format!("migration {expected} is not applied"),
            });
        }
    }
    for name in applied.iter().filter(|name| !manifest.migrations.contains(name)) {
        findings.push(Finding {
            kind: "warning",
            message: format!("migration {name} is applied but not in the schema manifest"),
        });
    }

    let integrity = store.check_integrity().await?;
    for mismatch in &integrity.count_mismatches {
        findings.push(Finding {
            kind: "error",
            message: format!(
                "group {} records {} members but has {} membership rows",
                mismatch.group_id, mismatch.member_count, mismatch.membership_rows
            ),
        });
    }
    for embedding_id in &integrity.multi_assigned {
        findings.push(Finding {
            kind: "error",
            message: format!("embedding {embedding_id} belongs to more than one group"),
        });
    }
    if integrity.embeddings_ungrouped > 0 {
        findings.push(Finding {
            kind: "warning",
            message: format!(
                "{} embeddings are not assigned to any group",
                integrity.embeddings_ungrouped
            ),
        });
    }

    if !args.quiet {
        println!("Backend: {}", store.backend_name());
        println!("Groups checked: {}", integrity.groups_checked);
        println!("Embeddings: {}", integrity.embeddings_total);
    }

    let errors: Vec<&Finding> = findings.iter().filter(|f| f.kind == "error").collect();
    let warnings: Vec<&Finding> = findings.iter().filter(|f| f.kind == "warning").collect();

    if !args.quiet {
        for warn in &warnings {
            println!("warning: {}", warn.message);
        }
    }

    if !errors.is_empty() {
        for err in &errors {
            eprintln!("error: {}", err.message);
        }
        return Err(anyhow!(
            "health check failed ({} errors, {} warnings)",
            errors.len(),
            warnings.len()
        ));
    }

    if !args.quiet {
        println!("health check passed with {} warnings", warnings.len());
    }
    Ok(())
}

async fn list_runs(base: &Path, args: RunsArgs) -> Result<()> {
    let (store, _) = open(base).await?;
    let runs = store.list_runs(args.limit).await?;
    println!("{}", serde_json::to_string_pretty(&runs)?);
    Ok(())
}
