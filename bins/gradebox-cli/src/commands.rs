// CLI commands for running and queueing gradebox requests
use anyhow::{bail, Context, Result};
use gradebox_common::config::QueueConfig;
use gradebox_common::redis;
use gradebox_common::types::{ExecutionRequest, ExecutionVerdict, Framework, Job};
use gradebox_engine::workspace::{write_files, StagedFile};
use gradebox_engine::{render, Engine, EngineConfig};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

/// Load an execution request from a JSON file
pub fn load_request(path: &Path) -> Result<ExecutionRequest> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read request file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse request file {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };
    config.with_env_overrides()
}

fn print_verdict(verdict: &ExecutionVerdict) -> Result<()> {
    let json = serde_json::to_string_pretty(verdict).context("Failed to serialize verdict")?;
    println!("{}", json);
    Ok(())
}

/// Execute a request locally and print the verdict as JSON
pub async fn run_request(request_path: &Path, config_path: Option<&Path>) -> Result<()> {
    let request = load_request(request_path)?;
    let engine = Engine::with_docker(load_config(config_path)?)?;

    eprintln!(
        "🚀 Running {} case(s) with {}",
        request.test_cases.len(),
        request.framework
    );
    let verdict = engine.execute(&request).await;
    eprintln!(
        "{} {}/{} passed, {}/{} points",
        if verdict.success { "✅" } else { "❌" },
        verdict.tests_passed,
        verdict.tests_run,
        verdict.points_earned,
        verdict.total_points
    );
    print_verdict(&verdict)
}

/// Write staged files below `out`, refusing anything that would escape it
pub fn write_staged(out: &Path, files: &[StagedFile]) -> Result<()> {
    write_files(out, files)
        .with_context(|| format!("Failed to render into {}", out.display()))
}

/// Render a request's workspace into `out` for inspection
pub fn render_request(request_path: &Path, out: &Path, config_path: Option<&Path>) -> Result<()> {
    let request = load_request(request_path)?;
    let rendered = render(&load_config(config_path)?, &request)?;

    if out.exists() && fs::read_dir(out)?.next().is_some() {
        bail!("Output directory {} is not empty", out.display());
    }
    write_staged(out, &rendered.files)?;

    println!("📝 Rendered {} workspace into {}", rendered.framework, out.display());
    println!("   Image:   {}", rendered.image);
    if let Some(restore) = &rendered.restore {
        println!("   Restore: {} (network enabled)", restore.argv().join(" "));
    }
    println!("   Command: {}", rendered.command.argv().join(" "));
    for file in &rendered.files {
        println!("   - {}", file.path);
    }
    if !rendered.defaulted.is_empty() {
        println!(
            "⚠️  Cases graded by the fallback assertion: {}",
            rendered.defaulted.join(", ")
        );
    }
    Ok(())
}

/// List supported frameworks and their configured images
pub fn list_frameworks(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    println!("{:<16} {:<11} IMAGE", "FRAMEWORK", "LANGUAGE");
    for framework in Framework::ALL {
        println!(
            "{:<16} {:<11} {}",
            framework.as_str(),
            framework.language().to_string(),
            config.image_for(framework)
        );
    }
    Ok(())
}

async fn connect(queue: &QueueConfig) -> Result<::redis::aio::ConnectionManager> {
    let client = ::redis::Client::open(queue.redis_url.as_str())?;
    ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", queue.redis_url))
}

/// Enqueue a request; with `wait > 0`, poll for its verdict
pub async fn submit_request(request_path: &Path, wait: u64) -> Result<()> {
    let request = load_request(request_path)?;
    if Framework::from_str(&request.framework).is_none() {
        eprintln!(
            "⚠️  Framework \"{}\" is not supported; the worker will reject it",
            request.framework
        );
    }

    let queue = QueueConfig::from_env();
    let mut conn = connect(&queue).await?;
    let job = Job::new(request);
    redis::push_job(&mut conn, &job).await?;
    println!("📤 Submitted job {}", job.id);

    if wait == 0 {
        return Ok(());
    }

    let deadline = Instant::now() + Duration::from_secs(wait);
    while Instant::now() < deadline {
        if let Some(result) = redis::get_verdict(&mut conn, &job.id).await? {
            return print_verdict(&result.verdict);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    bail!("No verdict for job {} after {}s", job.id, wait)
}

/// Print the stored verdict of a job
pub async fn job_status(job_id: &uuid::Uuid) -> Result<()> {
    let queue = QueueConfig::from_env();
    let mut conn = connect(&queue).await?;
    match redis::get_verdict(&mut conn, job_id).await? {
        Some(result) => print_verdict(&result.verdict),
        None => {
            println!("⏳ Job {} is queued, running, or expired", job_id);
            Ok(())
        }
    }
}
