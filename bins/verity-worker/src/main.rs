use std::sync::Arc;

use chrono::Utc;
use tokio::signal;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use verity_common::config::{
    env_parse, redis_url, DEFAULT_RESULT_TTL_SECONDS, DEFAULT_WORKER_CONCURRENCY,
};
use verity_common::redis;
use verity_common::types::{JobRecord, JobRequest, JobStatus};
use verity_harness::{HarnessConfig, Sandbox, SandboxBackend};

/// State shared by every in-flight job.
struct WorkerContext {
    config: HarnessConfig,
    sandbox: SandboxBackend,
    result_ttl: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Verity Worker booting...");

    let config = HarnessConfig::load_default().map_err(|e| {
        error!("Failed to load harness configuration: {:#}", e);
        e
    })?;
    let sandbox = SandboxBackend::from_config(&config)?;

    info!(
        backend = %config.backend,
        timeout_ms = config.timeout_ms,
        memory_mb = config.memory_limit_mb,
        "Harness configured"
    );

    let concurrency = env_parse("WORKER_CONCURRENCY")
        .filter(|n: &usize| *n > 0)
        .unwrap_or(DEFAULT_WORKER_CONCURRENCY);
    let result_ttl = env_parse("RESULT_TTL_SECONDS").unwrap_or(DEFAULT_RESULT_TTL_SECONDS);

    let redis_url = redis_url();
    let client = ::redis::Client::open(redis_url.as_str())?;
    let mut redis_conn = ::redis::aio::ConnectionManager::new(client).await?;

    info!("Connected to Redis: {}", redis_url);
    info!(concurrency, queue = redis::QUEUE_KEY, "Waiting for jobs");

    let context = Arc::new(WorkerContext {
        config,
        sandbox,
        result_ttl,
    });
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut in_flight = JoinSet::new();

    tokio::select! {
        _ = worker_loop(&mut redis_conn, &context, &permits, &mut in_flight) => {},
        _ = signal::ctrl_c() => {
            warn!("Received shutdown signal, waiting for in-flight jobs...");
        },
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Job task panicked");
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true);

    if std::env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[instrument(skip_all, fields(backend = context.sandbox.name()))]
async fn worker_loop(
    redis_conn: &mut ::redis::aio::ConnectionManager,
    context: &Arc<WorkerContext>,
    permits: &Arc<Semaphore>,
    in_flight: &mut JoinSet<()>,
) -> anyhow::Result<()> {
    loop {
        // A permit is taken before popping so queued jobs stay visible to other workers
        let permit = permits.clone().acquire_owned().await?;

        // BLPOP with 5 second timeout for graceful shutdown
        match redis::pop_job(redis_conn, 5.0).await {
            Ok(Some(job)) => {
                info!(
                    job_id = %job.id,
                    test_cases = job.request.test_cases.len(),
                    source_size = job.request.code.len(),
                    "Received job"
                );

                let context = Arc::clone(context);
                let mut conn = redis_conn.clone();
                in_flight.spawn(async move {
                    process_job(job, &context, &mut conn).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                // Timeout - check for shutdown
                continue;
            }
            Err(e) => {
                error!(error = %e, "Redis error");
                tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
            }
        }

        // Reap finished tasks so the set does not grow unbounded
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Job task panicked");
            }
        }
    }
}

#[instrument(skip_all, fields(job_id = %job.id))]
async fn process_job(
    job: JobRequest,
    context: &WorkerContext,
    redis_conn: &mut ::redis::aio::ConnectionManager,
) {
    let mut config = context.config.clone();
    if let Some(timeout_ms) = job.timeout_ms {
        config.timeout_ms = timeout_ms;
    }

    if let Err(e) = redis::set_status(redis_conn, &job.id, JobStatus::Running, context.result_ttl).await {
        warn!(error = %e, "Failed to mark job running");
    }

    let started_at = Utc::now();
    let outcome = verity_harness::run(&job.request, &context.sandbox, &config).await;
    let finished_at = Utc::now();

    info!(
        success = outcome.success,
        passed = outcome.passed,
        cases = outcome.results.len(),
        execution_ms = (finished_at - started_at).num_milliseconds(),
        "Execution completed"
    );

    for result in &outcome.results {
        debug!(
            case = result.index,
            passed = result.passed,
            error = result.error.as_deref().unwrap_or(""),
            "Case result"
        );
    }

    let record = JobRecord {
        job_id: job.id,
        status: JobStatus::from_outcome(&outcome),
        outcome,
        started_at,
        finished_at,
    };

    match redis::store_record(redis_conn, &record, context.result_ttl).await {
        Ok(_) => {
            info!("Result persisted to Redis");
        }
        Err(e) => {
            // Non-fatal - worker continues
            error!(error = %e, "Failed to persist result");
        }
    }
}
