//! Benchmarkoor CLI: build the suite, run every configured client
//! instance, and index the persisted results.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use benchmarkoor_clients::ClientKind;
use benchmarkoor_docker::ContainerManager;
use benchmarkoor_host::Conditioner;
use benchmarkoor_indexer::{Indexer, IndexerConfig, RedbStore};
use benchmarkoor_runner::{run_instance, RunStatus, RunSummary, RunnerContext};
use benchmarkoor_storage::FsStorage;

#[derive(Parser)]
#[command(name = "benchmarkoor", about = "Black-box benchmarking for Ethereum execution clients")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the configured benchmark run
    Run {
        /// Path to the YAML config file
        #[arg(long)]
        config: PathBuf,
        /// Only run instances of this client type
        #[arg(long)]
        limit_instance_client: Option<String>,
        /// Only run tests whose name or path contains this substring
        #[arg(long)]
        test_filter: Option<String>,
    },
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Version => {
            println!("benchmarkoor {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Run {
            config,
            limit_instance_client,
            test_filter,
        } => {
            let (summaries, instances_total) =
                run(config, limit_instance_client, test_filter).await?;
            let all_completed = summaries.len() == instances_total
                && summaries
                    .iter()
                    .all(|summary| summary.status == RunStatus::Completed);
            if !all_completed {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn run(
    config_path: PathBuf,
    limit_instance_client: Option<String>,
    test_filter: Option<String>,
) -> anyhow::Result<(Vec<RunSummary>, usize)> {
    let mut config = benchmarkoor_config::load_config(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    if let Some(filter) = test_filter {
        config.run.test_filter = Some(filter);
    }
    if let Some(client) = &limit_instance_client {
        config
            .client
            .instances
            .retain(|instance| &instance.client == client);
        if config.client.instances.is_empty() {
            anyhow::bail!("no configured instance matches client type {client}");
        }
    }

    for instance in &config.client.instances {
        if ClientKind::from_name(&instance.client).is_none() {
            anyhow::bail!(
                "instance {}: unknown client type {:?} (known: {})",
                instance.id,
                instance.client,
                ClientKind::all()
                    .iter()
                    .map(|kind| kind.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    let results_root = PathBuf::from(&config.run.results_dir);
    std::fs::create_dir_all(&results_root)?;

    // Restore host settings left behind by crashed runs before touching
    // anything else.
    let conditioner = Arc::new(Conditioner::new(cache_dir()));
    match conditioner.recover_stale() {
        Ok(0) => {}
        Ok(count) => info!(count, "recovered stale host conditioner state"),
        Err(error) => warn!(%error, "failed to recover stale conditioner state"),
    }

    info!(sources = config.suite.sources.len(), "building suite");
    let suite = benchmarkoor_suite::build(&config.suite.sources, config.suite.filter.as_deref())?;
    benchmarkoor_suite::persist(&suite, &results_root)?;
    info!(hash = %suite.hash, tests = suite.tests.len(), warmup = suite.warmup.len(), "suite ready");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    // Background indexer over the same results directory.
    let indexer = if config.indexer.enabled {
        let storage = Arc::new(FsStorage::new(&results_root));
        let store = Arc::new(RedbStore::open(&results_root.join("index.redb"))?);
        Some(Arc::new(Indexer::new(
            storage,
            store,
            IndexerConfig {
                interval: Duration::from_secs(config.indexer.interval),
                concurrency: config.indexer.concurrency,
                rollup_root: Some(results_root.clone()),
            },
        )))
    } else {
        None
    };
    let indexer_cancel = CancellationToken::new();
    if let Some(indexer) = indexer.clone() {
        let indexer_cancel = indexer_cancel.clone();
        tokio::spawn(async move { indexer.run(&indexer_cancel).await });
    }

    let ctx = Arc::new(RunnerContext {
        manager: Arc::new(ContainerManager::connect()?),
        conditioner,
        run: config.run.clone(),
        results_root: results_root.clone(),
    });
    let suite = Arc::new(suite);

    let instances_total = config.client.instances.len();
    let mut tasks = JoinSet::new();
    for instance in config.client.instances.clone() {
        let ctx = Arc::clone(&ctx);
        let suite = Arc::clone(&suite);
        let cancel = cancel.clone();
        tasks.spawn(async move { run_instance(&ctx, &instance, &suite, cancel).await });
    }

    let mut summaries = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(summary)) => {
                info!(
                    run_id = %summary.run_id,
                    instance = %summary.instance_id,
                    status = ?summary.status,
                    tests = summary.tests_total,
                    failed = summary.tests_failed,
                    "instance finished"
                );
                summaries.push(summary);
            }
            Ok(Err(error)) => {
                warn!(%error, "instance run failed before producing a summary");
            }
            Err(error) => {
                warn!(%error, "instance task panicked");
            }
        }
    }

    // One final pass so everything this process produced is indexed.
    indexer_cancel.cancel();
    if let Some(indexer) = indexer {
        if let Err(error) = indexer.pass().await {
            warn!(%error, "final indexer pass failed");
        }
    }

    for summary in &summaries {
        println!(
            "{}\t{}\t{:?}\t{} tests, {} failed",
            summary.run_id,
            summary.instance_id,
            summary.status,
            summary.tests_total,
            summary.tests_failed
        );
    }
    Ok((summaries, instances_total))
}

fn cache_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME") {
        return PathBuf::from(xdg).join("benchmarkoor");
    }
    if let Some(home) = std::env::var_os("HOME") {
        return PathBuf::from(home).join(".cache/benchmarkoor");
    }
    std::env::temp_dir().join("benchmarkoor")
}
