use anyhow::Context;
use gradebox_common::config::QueueConfig;
use gradebox_common::redis;
use gradebox_common::types::{Job, JobVerdict};
use gradebox_engine::{Engine, EngineConfig};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    // GRADEBOX_LOG_FORMAT=json for log shippers, human-readable otherwise
    let json = std::env::var("GRADEBOX_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Gradebox Worker booting...");

    let engine_config = EngineConfig::load_default()
        .and_then(EngineConfig::with_env_overrides)
        .map_err(|e| {
            error!("Failed to load engine configuration: {:#}", e);
            error!("Check config/engine.json and GRADEBOX_* variables");
            e
        })?;
    let queue_config = QueueConfig::from_env();

    info!(
        scratch_root = %engine_config.scratch_root.display(),
        max_parallel_jobs = engine_config.max_parallel_jobs,
        memory_limit_mb = engine_config.memory_limit_mb,
        cpu_limit = engine_config.cpu_limit,
        "Engine configured"
    );

    let engine = Arc::new(Engine::with_docker(engine_config).context("Failed to connect to Docker")?);

    let client = ::redis::Client::open(queue_config.redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client).await?;

    info!("Connected to Redis: {}", queue_config.redis_url);

    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
        warn!("Received shutdown signal, no longer accepting jobs");
    };

    let engine_slots = engine.config().max_parallel_jobs;
    let permits = Arc::new(Semaphore::new(engine_slots));

    tokio::select! {
        _ = worker_loop(&mut redis_conn, engine, permits.clone(), queue_config.verdict_ttl_seconds) => {},
        _ = shutdown => {},
    }

    // Let in-flight jobs finish and persist their verdicts
    let slots = u32::try_from(engine_slots).unwrap_or(u32::MAX);
    if permits.acquire_many(slots).await.is_err() {
        warn!("Job semaphore closed before in-flight jobs drained");
    }
    info!("Worker shutdown complete");
    Ok(())
}

#[instrument(skip_all)]
async fn worker_loop(
    redis_conn: &mut ::redis::aio::ConnectionManager,
    engine: Arc<Engine>,
    permits: Arc<Semaphore>,
    verdict_ttl_seconds: u64,
) -> anyhow::Result<()> {
    loop {
        // Hold a slot before popping so queued jobs stay in Redis while we are saturated
        let permit = permits.clone().acquire_owned().await?;

        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_job(redis_conn, 5.0).await {
            Ok(Some(job)) => {
                info!(
                    job_id = %job.id,
                    framework = %job.request.framework,
                    language = %job.request.language,
                    timeout_ms = job.request.timeout_ms,
                    test_cases = job.request.test_cases.len(),
                    source_size = job.request.source_code.len(),
                    "Received job"
                );

                let engine = engine.clone();
                let mut conn = redis_conn.clone();
                tokio::spawn(async move {
                    process_job(&engine, &mut conn, job, verdict_ttl_seconds).await;
                    drop(permit);
                });
            }
            Ok(None) => continue,
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }
    }
}

async fn process_job(
    engine: &Engine,
    redis_conn: &mut ::redis::aio::ConnectionManager,
    job: Job,
    verdict_ttl_seconds: u64,
) {
    let job_id = job.id;
    let verdict = engine.execute(&job.request).await;

    for (idx, outcome) in verdict.results.iter().enumerate() {
        debug!(
            job_id = %job_id,
            test_num = idx + 1,
            test_id = %outcome.test_id,
            passed = outcome.passed,
            points = outcome.points,
            "Test result"
        );
    }

    let envelope = JobVerdict {
        job_id,
        completed_at: chrono::Utc::now(),
        verdict,
    };

    match redis::store_verdict(redis_conn, &envelope, verdict_ttl_seconds).await {
        Ok(_) => info!(job_id = %job_id, "Verdict persisted to Redis"),
        // Non-fatal - worker continues
        Err(e) => error!(job_id = %job_id, error = %e, "Failed to persist verdict"),
    }
}
