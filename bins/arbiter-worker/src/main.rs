// Queue consumer: pops jobs from Redis, judges them and stores outcomes.
// Up to `ARBITER_MAX_CONCURRENT_JOBS` jobs (default 1) run at once; each
// gets its own workspace and containers. Scale out with more replicas.

mod metrics;

use anyhow::Context;
use arbiter_common::config::ServiceConfig;
use arbiter_common::redis;
use arbiter_common::types::{JobOutcome, JobRequest};
use arbiter_engine::{DockerRuntime, EngineConfig, Executor, LanguageRegistry};
use ::redis::aio::ConnectionManager;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// How often a running job's cancel flag is checked
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(250);
/// BLPOP timeout, bounds how long shutdown waits on an idle queue
const POP_TIMEOUT_SECONDS: f64 = 5.0;
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 1;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Arbiter Worker booting...");

    let service = ServiceConfig::from_env();
    let engine_config = EngineConfig::from_env();
    info!(
        workspace_root = %engine_config.workspace_root.display(),
        max_parallel_cases = engine_config.max_parallel_cases,
        default_time_limit_ms = engine_config.default_time_limit_ms,
        "Engine configuration loaded"
    );

    let registry = load_registry()?;
    info!("Enabled languages: {:?}", registry.list_languages());

    let runtime = DockerRuntime::connect().context("Failed to connect to Docker")?;
    runtime
        .ping()
        .await
        .context("Docker daemon is not responding")?;
    info!("Connected to Docker");

    if warm_up_enabled() {
        warm_images(&runtime, &registry).await;
    }

    let client = ::redis::Client::open(service.redis_url.as_str())
        .context("Invalid REDIS_URL")?;
    let mut redis_conn = ConnectionManager::new(client)
        .await
        .context("Failed to connect to Redis")?;
    info!("Connected to Redis: {}", service.redis_url);

    let metrics_addr = service.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = metrics::serve(metrics_addr).await {
            error!(error = %e, "Metrics server stopped");
        }
    });

    let executor = Arc::new(Executor::new(Arc::new(registry), Arc::new(runtime), engine_config));
    let max_jobs = max_concurrent_jobs(std::env::var("ARBITER_MAX_CONCURRENT_JOBS").ok().as_deref());
    info!(max_concurrent_jobs = max_jobs, "Worker ready");

    // Setup graceful shutdown: finish the current job, then stop
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C signal handler");
            return;
        }
        warn!("Received shutdown signal, draining...");
        let _ = shutdown_tx.send(true);
    });

    worker_loop(&mut redis_conn, executor, max_jobs, shutdown_rx).await;

    info!("Worker shutdown complete");
    Ok(())
}

fn load_registry() -> anyhow::Result<LanguageRegistry> {
    match std::env::var("ARBITER_LANGUAGES_FILE") {
        Ok(path) if !path.trim().is_empty() => {
            info!("Loading language profiles from {}", path);
            LanguageRegistry::load(Path::new(&path))
                .with_context(|| format!("Failed to load language profiles from {}", path))
        }
        _ => Ok(LanguageRegistry::builtin()),
    }
}

fn max_concurrent_jobs(raw: Option<&str>) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_MAX_CONCURRENT_JOBS)
        .max(1)
}

fn warm_up_enabled() -> bool {
    std::env::var("ARBITER_WARM_IMAGES")
        .map(|v| !matches!(v.trim().to_lowercase().as_str(), "0" | "false" | "no"))
        .unwrap_or(true)
}

/// Pull every enabled image up front; execution never pulls
async fn warm_images(runtime: &DockerRuntime, registry: &LanguageRegistry) {
    for profile in registry.profiles() {
        match runtime.ensure_image(&profile.image).await {
            Ok(()) => debug!(language = %profile.language, image = %profile.image, "Image ready"),
            Err(e) => warn!(
                language = %profile.language,
                image = %profile.image,
                error = %e,
                "Image warm-up failed; jobs for this language will fail until it is available"
            ),
        }
    }
}

#[instrument(skip_all)]
async fn worker_loop(
    redis_conn: &mut ConnectionManager,
    executor: Arc<Executor>,
    max_jobs: usize,
    shutdown: watch::Receiver<bool>,
) {
    let mut in_flight = JoinSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        if in_flight.len() >= max_jobs {
            if let Some(Err(e)) = in_flight.join_next().await {
                error!(error = %e, "Job task panicked");
            }
            continue;
        }

        match redis::pop_job(redis_conn, POP_TIMEOUT_SECONDS).await {
            Ok(Some(job)) => {
                let conn = redis_conn.clone();
                let executor = executor.clone();
                in_flight.spawn(async move { handle_job(conn, executor, job).await });
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    if !in_flight.is_empty() {
        info!(remaining = in_flight.len(), "Waiting for in-flight jobs");
    }
    while let Some(result) = in_flight.join_next().await {
        if let Err(e) = result {
            error!(error = %e, "Job task panicked");
        }
    }
}

async fn handle_job(mut redis_conn: ConnectionManager, executor: Arc<Executor>, job: JobRequest) {
    let job_id = job.id;
    info!(
        job_id = %job_id,
        language = %job.request.language,
        test_cases = job.request.test_cases.len(),
        source_size = job.request.code.len(),
        "Received job"
    );

    let start = Instant::now();
    metrics::ACTIVE_JOBS.inc();
    let outcome = process_job(&redis_conn, &executor, &job).await;
    metrics::ACTIVE_JOBS.dec();

    let elapsed = start.elapsed();
    metrics::record_job(outcome.status, elapsed.as_secs_f64());
    if let Some(summary) = &outcome.summary {
        metrics::record_cases(summary);
    }

    info!(
        job_id = %job_id,
        status = ?outcome.status,
        execution_ms = elapsed.as_millis() as u64,
        "Job finished"
    );

    // Persist outcome to Redis
    match redis::store_outcome(&mut redis_conn, &outcome).await {
        Ok(()) => debug!(job_id = %job_id, "Outcome persisted to Redis"),
        // Non-fatal - worker continues
        Err(e) => error!(job_id = %job_id, error = %e, "Failed to persist outcome"),
    }
}

/// Run one job, racing it against its cancel flag
async fn process_job(
    redis_conn: &ConnectionManager,
    executor: &Executor,
    job: &JobRequest,
) -> JobOutcome {
    let mut cancel_conn = redis_conn.clone();

    if redis::is_cancelled(&mut cancel_conn, &job.id)
        .await
        .unwrap_or(false)
    {
        info!(job_id = %job.id, "Job was cancelled before it started");
        return JobOutcome::cancelled(job.id);
    }

    tokio::select! {
        result = executor.execute(&job.request) => match result {
            Ok(summary) => {
                for (idx, case) in summary.results.iter().enumerate() {
                    debug!(
                        job_id = %job.id,
                        test_num = idx + 1,
                        passed = case.passed,
                        failure = ?case.failure,
                        execution_ms = case.execution_time_ms,
                        "Test result"
                    );
                }
                JobOutcome::completed(job.id, summary)
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Execution failed");
                JobOutcome::failed(job.id, e.to_string())
            }
        },
        // dropping the execute future tears down its containers and workspace
        _ = wait_for_cancel(&mut cancel_conn, job.id) => {
            warn!(job_id = %job.id, "Job cancelled while running");
            JobOutcome::cancelled(job.id)
        }
    }
}

async fn wait_for_cancel(conn: &mut ConnectionManager, job_id: Uuid) {
    let mut interval = tokio::time::interval(CANCEL_POLL_INTERVAL);
    loop {
        interval.tick().await;
        match redis::is_cancelled(conn, &job_id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => debug!(job_id = %job_id, error = %e, "Cancel flag check failed"),
        }
    }
}
