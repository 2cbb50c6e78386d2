use billrun::application::engine::{Backends, BillingEngine};
use billrun::application::registry::{ProcessorRegistry, builtin_factories};
use billrun::config::BillingConfig;
use billrun::domain::ports::ClockRef;
use billrun::infrastructure::clock::{ManualClock, SystemClock};
use billrun::infrastructure::storage::LocalArtifactStorage;
use billrun::interfaces::csv::document_writer::DocumentWriter;
use billrun::interfaces::csv::subscription_reader::{SubscriptionReader, parse_timestamp};
use chrono::Utc;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input subscriptions CSV file
    input: PathBuf,

    /// Bill as of this instant (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long)]
    as_of: Option<String>,

    /// JSON configuration file. Missing keys take their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of concurrent workers, overriding the configuration.
    #[arg(long)]
    workers: Option<usize>,

    /// Scheduler ticks to run before writing the report.
    #[arg(long, default_value_t = 1)]
    ticks: u32,

    /// Directory for rendered documents. Kept in memory when omitted.
    #[arg(long)]
    artifacts_dir: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Run the scheduler and workers until Ctrl-C instead of a fixed number of ticks.
    #[arg(long)]
    serve: bool,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => BillingConfig::from_path(path).into_diagnostic()?,
        None => BillingConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.workers.count = workers;
    }
    config.validate().into_diagnostic()?;

    let clock: ClockRef = if cli.serve {
        if cli.as_of.is_some() {
            tracing::warn!("--as-of is ignored in --serve mode");
        }
        Arc::new(SystemClock)
    } else {
        let as_of = match &cli.as_of {
            Some(raw) => parse_timestamp(raw).into_diagnostic()?,
            None => Utc::now(),
        };
        Arc::new(ManualClock::new(as_of))
    };

    let mut backends = Backends::in_memory(clock, &config);

    #[cfg(feature = "storage-rocksdb")]
    if let Some(db_path) = &cli.db_path {
        // Use persistent storage (RocksDB)
        let store = billrun::infrastructure::rocksdb::RocksDBStore::open(db_path).into_diagnostic()?;
        backends.plans = Arc::new(store.clone());
        backends.subscriptions = Arc::new(store.clone());
        backends.documents = Arc::new(store.clone());
        backends.transactions = Arc::new(store);
    }
    #[cfg(not(feature = "storage-rocksdb"))]
    if cli.db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
        );
    }

    if let Some(lock_backend) = &config.lock_backend {
        #[cfg(feature = "lock-redis")]
        {
            let store = billrun::infrastructure::redis_lock::RedisLockStore::connect(lock_backend)
                .await
                .into_diagnostic()?;
            backends.locks = Arc::new(store);
        }
        #[cfg(not(feature = "lock-redis"))]
        {
            tracing::warn!(
                host = %lock_backend.host,
                "Redis lock backend configured, but 'lock-redis' feature is not enabled. Using in-process locks."
            );
        }
    }

    if let Some(dir) = &cli.artifacts_dir {
        backends.storage = Arc::new(LocalArtifactStorage::new(dir).await.into_diagnostic()?);
    }

    // Load plans and subscriptions
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = SubscriptionReader::new(file);
    for row in reader.subscriptions() {
        match row {
            Ok((plan, subscription)) => {
                backends.plans.store(plan).await.into_diagnostic()?;
                backends.subscriptions.store(subscription).await.into_diagnostic()?;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping invalid subscription row");
            }
        }
    }

    let registry = ProcessorRegistry::from_config(&config.processors, &builtin_factories())
        .into_diagnostic()?;
    let engine = BillingEngine::new(config, backends, registry).into_diagnostic()?;

    if cli.serve {
        let shutdown = CancellationToken::new();
        let scheduler = engine.scheduler().clone().spawn(shutdown.clone());
        let workers = engine.workers().spawn(shutdown.clone());

        tokio::signal::ctrl_c().await.into_diagnostic()?;
        tracing::info!("Shutdown requested, waiting for workers");
        shutdown.cancel();
        scheduler.await.into_diagnostic()?;
        for worker in workers {
            worker.await.into_diagnostic()?;
        }
    } else {
        for tick in 1..=cli.ticks {
            let (report, handled) = engine.run_cycle().await.into_diagnostic()?;
            tracing::info!(tick, enqueued = report.enqueued(), handled, "Billing cycle finished");
        }
    }

    let failed = engine.backends().queue.failed_jobs().await.into_diagnostic()?;
    for job in &failed {
        tracing::error!(
            job_id = %job.id,
            job_type = job.kind.job_type(),
            reason = job.last_error.as_deref().unwrap_or(""),
            "Job requires operator attention"
        );
    }

    // Output final state
    let documents = engine.documents().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = DocumentWriter::new(stdout.lock());
    writer.write_documents(&documents).into_diagnostic()?;

    Ok(())
}
