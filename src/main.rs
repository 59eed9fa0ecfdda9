use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use stem_split::config::{ServiceConfig, load_worker_directory};
use stem_split::dispatch::{Dispatcher, HttpWorkerClient, spawn_queue_sweeper};
use stem_split::http::{AppState, router};
use stem_split::intake::ResultIntake;
use stem_split::job::JobBoard;
use stem_split::registry::WorkerRegistry;
use stem_split::retrieval::RetrievalFacade;
use stem_split::store::{ArtifactStore, DiskArtifactStore, MemoryArtifactStore};
use stem_split::submit::{BasicWavValidator, SubmissionService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing: stdout plus a rolling log file.
    let log_dir = std::env::var("STEM_SPLIT_LOG_DIR").unwrap_or_else(|_| "./logs".to_string());
    let file_appender = tracing_appender::rolling::daily(&log_dir, "stem-split.log");
    let (file_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stdout.and(file_writer))
        .init();

    let config = ServiceConfig::from_env().context("load configuration")?;

    eprintln!("🎚  stem-split v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}:{}", config.bind_addr, config.port);
    eprintln!("   Logs: {log_dir}");

    // ── Artifact store ───────────────────────────────────────────────
    let store: Arc<dyn ArtifactStore> = match &config.data_dir {
        Some(dir) => {
            eprintln!("   Artifacts: disk at {}", dir.display());
            Arc::new(
                DiskArtifactStore::open(dir.clone())
                    .await
                    .context("open artifact store")?,
            )
        }
        None => {
            eprintln!("   Artifacts: in-memory");
            Arc::new(MemoryArtifactStore::new())
        }
    };

    // ── Worker registry ──────────────────────────────────────────────
    let registry = WorkerRegistry::new();
    match &config.worker_directory {
        Some(path) => {
            let workers = load_worker_directory(path).context("load worker directory")?;
            eprintln!("   Workers: {} from {}", workers.len(), path.display());
            for descriptor in workers {
                if let Err(e) = registry.register(descriptor).await {
                    tracing::warn!(error = %e, "Skipping worker directory entry");
                }
            }
        }
        None => eprintln!("   Workers: none configured (self-registration only)"),
    }

    // ── Core services ────────────────────────────────────────────────
    let jobs = JobBoard::new();
    let client = Arc::new(
        HttpWorkerClient::new(config.dispatch.request_timeout)
            .context("build worker HTTP client")?,
    );
    let dispatcher = Dispatcher::new(
        Arc::clone(&jobs),
        Arc::clone(&registry),
        client,
        config.dispatch.clone(),
    );
    let intake = ResultIntake::new(Arc::clone(&jobs), Arc::clone(&store), Arc::clone(&registry));
    let retrieval = RetrievalFacade::new(Arc::clone(&jobs), Arc::clone(&store));
    let submission = SubmissionService::new(
        Arc::new(BasicWavValidator::new(config.max_upload_bytes)),
        Arc::clone(&store),
        Arc::clone(&jobs),
        Arc::clone(&dispatcher),
    );

    // Queued jobs left behind by NoCapacity/WorkerUnreachable get
    // retried here.
    let _sweeper = spawn_queue_sweeper(Arc::clone(&dispatcher), config.dispatch.sweep_interval);

    // ── HTTP server ──────────────────────────────────────────────────
    let state = AppState {
        submission,
        dispatcher,
        intake,
        retrieval,
        registry,
    };
    let app = router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(format!("{}:{}", config.bind_addr, config.port))
        .await
        .context("bind server port")?;
    tracing::info!(addr = %listener.local_addr()?, "stem-split listening");
    axum::serve(listener, app).await?;

    Ok(())
}
