// CLI commands for running and queueing submissions
use anyhow::{Context, Result};
use serde_json::json;
use std::fs;
use std::path::Path;
use verity_common::config::{redis_url, DEFAULT_RESULT_TTL_SECONDS};
use verity_common::redis;
use verity_common::types::{JobRequest, JobStatus, RunRequest};
use verity_harness::config::Backend;
use verity_harness::parser::{parse_expected, parse_input, ParsedInput};
use verity_harness::{HarnessConfig, SandboxBackend};

fn read_request(path: &Path) -> Result<RunRequest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request in {}", path.display()))
}

async fn connect() -> Result<::redis::aio::ConnectionManager> {
    let url = redis_url();
    let client = ::redis::Client::open(url.as_str())
        .with_context(|| format!("Invalid Redis URL: {}", url))?;
    ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", url))
}

/// Returns whether the submission ran and every case passed.
pub async fn run_local(
    file: &Path,
    timeout_ms: Option<u64>,
    backend: Option<&str>,
    pretty: bool,
) -> Result<bool> {
    let request = read_request(file)?;

    let mut config = HarnessConfig::load_default()?;
    if let Some(timeout_ms) = timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(backend) = backend {
        config.backend = backend.parse::<Backend>()?;
    }

    let sandbox = SandboxBackend::from_config(&config)?;
    let outcome = verity_harness::run(&request, &sandbox, &config).await;

    let rendered = if pretty {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string(&outcome)?
    };
    println!("{}", rendered);

    Ok(outcome.success && outcome.passed)
}

pub fn show_parse(input: &str, output: Option<&str>) -> Result<()> {
    let mut report = match parse_input(input) {
        Ok(ParsedInput::Literal { scope, last_expr }) => json!({
            "kind": "literal",
            "scope": scope,
            "last_expr": last_expr,
        }),
        Ok(ParsedInput::Script {
            source,
            fallback,
            assigned,
        }) => json!({
            "kind": "script",
            "source": source,
            "fallback": fallback,
            "assigned": assigned,
        }),
        Err(e) => json!({
            "kind": "error",
            "error": format!("Could not parse test input: {}", e),
        }),
    };

    if let Some(output) = output {
        report["expected"] = json!(parse_expected(output).display());
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn submit(file: &Path, timeout_ms: Option<u64>) -> Result<()> {
    let request = read_request(file)?;
    let job = JobRequest::new(request, timeout_ms);

    let mut conn = connect().await?;
    // Written before the push so a fast worker's `running` is never overwritten
    redis::set_status(&mut conn, &job.id, JobStatus::Pending, DEFAULT_RESULT_TTL_SECONDS)
        .await
        .context("Failed to record job status")?;
    redis::push_job(&mut conn, &job)
        .await
        .context("Failed to queue job")?;

    println!("{}", job.id);
    Ok(())
}

pub async fn fetch_result(id: &uuid::Uuid) -> Result<()> {
    let mut conn = connect().await?;
    match redis::get_record(&mut conn, id)
        .await
        .context("Failed to fetch job record")?
    {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => {
            let status = redis::get_status(&mut conn, id)
                .await
                .context("Failed to fetch job status")?;
            println!("{}", status.map_or("unknown", JobStatus::as_str));
        }
    }
    Ok(())
}
