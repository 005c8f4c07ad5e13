//! Libra Migrate - relational catalogue to document store migration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use libra_common::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use libra_migrate::config::MigrationConfig;
use libra_migrate::framework::{DocumentStore, JobExecution, JobParameters, RunRepository};
use libra_migrate::idmap::{IdMapper, MappingStore};
use libra_migrate::library::{job_builder, EntityKind, JOB_NAME};
use libra_migrate::storage::postgres::{
    create_pool, run_target_migrations, PgDocumentStore, PgMappingStore, PgRunRepository, PgSource,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "libra-migrate")]
#[command(author, version, about = "Migrate the relational library catalogue into the document store")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format: text or json
    #[arg(long, global = true)]
    log_format: Option<String>,

    /// Core pool size; also the number of comment partitions
    #[arg(long, global = true)]
    core_pool_size: Option<usize>,

    /// Maximum concurrently running step units
    #[arg(long, global = true)]
    max_pool_size: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a full migration pass
    Migrate,

    /// Run again after a failure; every pass is an idempotent upsert
    Restart,

    /// Delete the migrated collections and the id mappings
    Clean {
        /// Keep the id mapping table so later runs reuse the same target ids
        #[arg(long)]
        keep_mappings: bool,
    },

    /// List recent runs
    Runs {
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = LogConfig::builder()
        .log_file_prefix("libra-migrate")
        .filter_directives("sqlx=warn")
        .build()
        .merge_env()?;
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    if let Some(format) = &cli.log_format {
        log_config.format = format.parse::<LogFormat>()?;
    }
    let _guard = init_logging(&log_config)?;

    let config = MigrationConfig::from_env()
        .context("Failed to load configuration")?
        .with_pool_overrides(cli.core_pool_size, cli.max_pool_size);
    config.validate().context("Invalid configuration")?;

    let source_pool = create_pool(&config.database.source_url, &config.database)
        .await
        .context("Failed to connect to source database")?;
    let target_pool = if config.database.target_url == config.database.source_url {
        source_pool.clone()
    } else {
        create_pool(&config.database.target_url, &config.database)
            .await
            .context("Failed to connect to target database")?
    };

    run_target_migrations(&target_pool)
        .await
        .context("Failed to run target migrations")?;
    info!("Target schema ready");

    match cli.command {
        Command::Migrate => {
            run_job(&config, source_pool, target_pool, JobParameters::started_now()).await?;
        },
        Command::Restart => {
            let runs = PgRunRepository::new(target_pool.clone());
            let last_failed = runs.last_failed(JOB_NAME).await?;
            match &last_failed {
                Some(run) => info!(run_id = %run.run_id, "Restarting after failed run"),
                None => info!("No failed run recorded, starting a fresh pass"),
            }
            let params = JobParameters::restarted_now(last_failed.map(|r| r.run_id));
            run_job(&config, source_pool, target_pool, params).await?;
        },
        Command::Clean { keep_mappings } => {
            clean(target_pool, keep_mappings).await?;
        },
        Command::Runs { limit } => {
            list_runs(target_pool, limit).await?;
        },
    }

    Ok(())
}

async fn run_job(
    config: &MigrationConfig,
    source_pool: PgPool,
    target_pool: PgPool,
    params: JobParameters,
) -> Result<()> {
    let ids = Arc::new(IdMapper::new(
        Arc::new(PgMappingStore::new(target_pool.clone())),
        config.id_cache.clone(),
    ));
    let job = job_builder(
        Arc::new(PgSource::new(source_pool)),
        Arc::new(PgDocumentStore::new(target_pool.clone())),
        ids,
        config,
    )
    .run_repository(Arc::new(PgRunRepository::new(target_pool)))
    .build();

    let execution = job.run(params).await.context("Failed to start migration run")?;
    info!(
        run_id = %execution.run_id,
        exit_code = %execution.exit_code,
        "Migration finished"
    );

    if !execution.is_success() {
        anyhow::bail!(
            "Migration run {} finished with exit code {}",
            execution.run_id,
            execution.exit_code
        );
    }
    Ok(())
}

async fn clean(target_pool: PgPool, keep_mappings: bool) -> Result<()> {
    let documents = PgDocumentStore::new(target_pool.clone());
    let mut dropped = 0;
    let mut skipped = 0;

    for kind in EntityKind::ALL {
        let removed = documents.drop_collection(kind.collection()).await?;
        if removed > 0 {
            dropped += 1;
            info!(collection = kind.collection(), documents = removed, "Dropped collection");
        } else {
            skipped += 1;
            info!(collection = kind.collection(), "Collection empty, skipped");
        }
    }

    if keep_mappings {
        warn!("Keeping id mappings; the next run reuses existing target ids");
    } else {
        let removed = PgMappingStore::new(target_pool).clear().await?;
        info!(mappings = removed, "Cleared id mappings");
    }

    info!(dropped, skipped, "Clean complete");
    Ok(())
}

async fn list_runs(target_pool: PgPool, limit: usize) -> Result<()> {
    let runs = PgRunRepository::new(target_pool).recent(JOB_NAME, limit).await?;
    if runs.is_empty() {
        info!("No runs recorded");
    }

    for run in runs {
        let totals = run
            .summary
            .and_then(|s| serde_json::from_value::<JobExecution>(s).ok())
            .map(|e| e.totals().to_string())
            .unwrap_or_default();
        info!(
            run_id = %run.run_id,
            status = %run.status,
            started_at = %run.started_at,
            ended_at = ?run.ended_at,
            params = %run.parameters,
            "{}",
            totals
        );
    }
    Ok(())
}
