//! adaptpoold: runs self-tuning worker pools from a config file.
//!
//! Assembles one process-wide system sampler, an adaptive pool per
//! configured `[[pools]]` entry, the pool service, an in-memory registry
//! and the change-detecting report loop.
//!
//! # Usage
//!
//! ```text
//! adaptpoold init --path adaptpool.toml
//! adaptpoold run --config adaptpool.toml --load --duration-secs 60
//! adaptpoold sample --count 5 --interval-ms 500
//! ```

mod config;
mod load;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adaptpool_autoscale::AdaptivePool;
use adaptpool_registry::{ConfigCenter, InMemoryRegistry, PoolService, ReportJob};
use adaptpool_sysmetrics::{SystemMetricsSampler, SystemSample};
use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;
use crate::load::LoadProfile;

#[derive(Parser)]
#[command(name = "adaptpoold", about = "Self-tuning worker pool daemon", version)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the sampler, the pools and the report loop.
    Run {
        /// Path to adaptpool.toml.
        #[arg(short, long, default_value = "adaptpool.toml")]
        config: PathBuf,

        /// Stop after this many seconds instead of waiting for Ctrl-C.
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Drive the pools with a synthetic bursty load.
        #[arg(long)]
        load: bool,
    },
    /// Write a starting adaptpool.toml.
    Init {
        #[arg(short, long, default_value = "adaptpool.toml")]
        path: PathBuf,

        /// Application name recorded in the file.
        #[arg(long, default_value = "adaptpool-demo")]
        app_name: String,

        /// Replace an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Print host samples as JSON lines.
    Sample {
        #[arg(long, default_value = "5")]
        count: u32,

        #[arg(long, default_value = "1000")]
        interval_ms: u64,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,adaptpool=debug"))?;
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Command::Run {
            config,
            duration_secs,
            load,
        } => run(&config, duration_secs, load).await,
        Command::Init {
            path,
            app_name,
            force,
        } => init(&path, &app_name, force),
        Command::Sample { count, interval_ms } => sample(count, interval_ms).await,
    }
}

fn init(path: &Path, app_name: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let content = DaemonConfig::scaffold(app_name).to_toml_string()?;
    std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "config scaffold written");
    Ok(())
}

async fn sample(count: u32, interval_ms: u64) -> anyhow::Result<()> {
    let interval = Duration::from_millis(interval_ms.max(1));
    let sampler = Arc::new(SystemMetricsSampler::host(interval));
    // The first tick only records a baseline.
    blocking_tick(&sampler).await?;

    for _ in 0..count {
        tokio::time::sleep(interval).await;
        match blocking_tick(&sampler).await? {
            Some(sample) => println!("{}", serde_json::to_string(&sample)?),
            None => warn!("no cpu delta over the interval"),
        }
    }
    Ok(())
}

async fn blocking_tick(sampler: &Arc<SystemMetricsSampler>) -> anyhow::Result<Option<SystemSample>> {
    let sampler = sampler.clone();
    Ok(tokio::task::spawn_blocking(move || sampler.tick()).await??)
}

async fn run(config_path: &Path, duration_secs: Option<u64>, load: bool) -> anyhow::Result<()> {
    let config = DaemonConfig::from_file(config_path)?;
    info!(
        app = %config.app_name,
        pools = config.pools.len(),
        path = %config_path.display(),
        "adaptpool daemon starting"
    );

    // ── Subsystems ─────────────────────────────────────────────

    let sampler = Arc::new(SystemMetricsSampler::host(config.sampler_interval()));
    let sampler_handle = sampler.start();

    let service = Arc::new(PoolService::new(config.app_name.clone()));
    let mut pools = Vec::with_capacity(config.pools.len());
    for spec in &config.pools {
        let pool = spec.build_pool()?;
        let adaptive = AdaptivePool::new(pool, sampler.clone(), config.auto_adjust.clone())
            .with_context(|| format!("attaching autoscaler to pool {}", spec.name))?;
        service.register(adaptive.pool().clone())?;
        pools.push(Arc::new(adaptive));
    }

    let registry = Arc::new(InMemoryRegistry::new());
    registry.subscribe(&config.app_name, service.clone());
    // The file is the first config push every pool sees.
    let seeded = config.publish_pool_specs(&registry)?;
    info!(app = %config.app_name, deliveries = seeded, "pool configs published");
    let report_job = Arc::new(ReportJob::new(registry.clone(), service.clone()));
    report_job.report_initial()?;

    // ── Background tasks ───────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let report_handle = {
        let job = report_job.clone();
        let interval = config.report_interval();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { job.run(interval, shutdown).await })
    };

    let load_handle = load.then(|| {
        tokio::spawn(load::drive(pools.clone(), LoadProfile::default(), shutdown_rx.clone()))
    });

    // ── Wait for stop ──────────────────────────────────────────

    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("installing Ctrl-C handler")?;
            info!("shutdown signal received");
        }
        _ = deadline => info!("run duration elapsed"),
    }
    let _ = shutdown_tx.send(true);

    if let Some(handle) = load_handle {
        let _ = handle.await;
    }
    let _ = report_handle.await;
    sampler_handle.stop().await;

    for pool in &pools {
        pool.shutdown();
    }
    let drained = {
        let pools = pools.clone();
        tokio::task::spawn_blocking(move || {
            pools
                .iter()
                .all(|p| p.pool().await_termination(Duration::from_secs(30)))
        })
        .await?
    };
    if !drained {
        warn!("some pools did not terminate in time");
    }

    for status in service.query_all() {
        info!(
            pool = %status.config.name,
            core = status.metrics.core_pool_size,
            max = status.metrics.max_pool_size,
            queue_capacity = status.metrics.queue_capacity,
            completed = status.metrics.completed_task_count,
            rejected = status.metrics.rejected_count,
            "final pool state"
        );
    }
    info!(
        reports = report_job.reports_sent(),
        stored = registry.fetch_configs(&config.app_name)?.len(),
        "adaptpool daemon stopped"
    );
    Ok(())
}
