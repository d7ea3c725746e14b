/// Dispatcher - Request Lifecycle Orchestration
///
/// **Core Responsibility:**
/// Drive one request through
/// `Received → Screened → Staged → Executed → Parsed → Scored`
/// and always hand back a verdict.
///
/// **Critical Properties:**
/// - Unknown frameworks and rejected code never allocate a workspace or
///   reach the sandbox
/// - Errors and panics below this layer become `infrastructure` verdicts
/// - The workspace is released on every path
/// - Only a framework's dependency restore step runs with network access;
///   submission code always runs isolated
/// - Safe to share across tasks: no mutable state, one workspace per call

use crate::adapters::{adapter_for, FrameworkAdapter};
use crate::config::EngineConfig;
use crate::evaluator::aggregate;
use crate::sandbox::{CommandLine, DockerSandbox, RawExecutionOutcome, SandboxRunner};
use crate::screener::{sanitize, screen, Rejection};
use crate::workspace::{StagedFile, Workspace};
use anyhow::{Context, Result};
use futures_util::FutureExt;
use gradebox_common::types::{
    ExecutionRequest, ExecutionVerdict, FailureKind, Framework, Language,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

pub const TIMEOUT_MARKER: &str = "Execution timeout";
pub const RESTORE_FAILED_MARKER: &str = "Dependency restore failed";

/// Result of the sandboxed steps of one request
enum StepOutcome {
    /// The test step ran, or a step hit the wall-clock budget
    Ran(RawExecutionOutcome),
    /// The restore step exited non-zero; the test step never ran
    RestoreFailed(RawExecutionOutcome),
}

/// What the engine would stage and run for a request, without running it
#[derive(Debug, Clone)]
pub struct RenderedWorkspace {
    pub framework: Framework,
    pub image: String,
    /// Networked dependency restore, run before `command`
    pub restore: Option<CommandLine>,
    pub command: CommandLine,
    pub files: Vec<StagedFile>,
    pub defaulted: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Unsupported framework \"{0}\"")]
    UnsupportedFramework(String),
    #[error(transparent)]
    Rejected(#[from] Rejection),
}

pub struct Engine {
    config: EngineConfig,
    runner: Arc<dyn SandboxRunner>,
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn unsupported_message(framework: &str) -> String {
    format!(
        "Test execution is not supported for framework \"{}\". Supported: {}.",
        framework,
        Framework::supported_list()
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Resolve the adapter and screen the submission
fn admit(request: &ExecutionRequest) -> Result<&'static dyn FrameworkAdapter, RenderError> {
    let framework = Framework::from_str(&request.framework)
        .ok_or_else(|| RenderError::UnsupportedFramework(request.framework.clone()))?;
    let adapter = adapter_for(framework);

    match Language::from_str(&request.language) {
        Some(declared) if declared != adapter.language() => warn!(
            declared = %declared,
            expected = %adapter.language(),
            "Declared language does not match framework, screening as framework language"
        ),
        None => warn!(declared = %request.language, "Unknown declared language"),
        _ => {}
    }

    screen(&request.source_code, adapter.language())?;
    Ok(adapter)
}

/// What `config` would stage and run for `request`. Needs no sandbox.
pub fn render(
    config: &EngineConfig,
    request: &ExecutionRequest,
) -> Result<RenderedWorkspace, RenderError> {
    let adapter = admit(request)?;
    let source = sanitize(&request.source_code);
    let (files, defaulted) = adapter.stage_files(&source, &request.test_cases, &request.hints);
    Ok(RenderedWorkspace {
        framework: adapter.framework(),
        image: config.image_for(adapter.framework()),
        restore: adapter.restore_command(),
        command: adapter.command(),
        files,
        defaulted,
    })
}

impl Engine {
    pub fn new(config: EngineConfig, runner: Arc<dyn SandboxRunner>) -> Self {
        Self { config, runner }
    }

    /// Engine backed by the local Docker daemon
    pub fn with_docker(config: EngineConfig) -> Result<Self> {
        let sandbox = DockerSandbox::connect(config.pull_missing_images)?;
        Ok(Self::new(config, Arc::new(sandbox)))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stage files in memory for inspection; nothing is written or executed
    pub fn render(&self, request: &ExecutionRequest) -> Result<RenderedWorkspace, RenderError> {
        render(&self.config, request)
    }

    /// Execute a request end to end. Never fails: every outcome is a verdict.
    #[tracing::instrument(
        skip(self, request),
        fields(framework = %request.framework, cases = request.test_cases.len())
    )]
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionVerdict {
        let started = Instant::now();

        let adapter = match admit(request) {
            Ok(adapter) => adapter,
            Err(RenderError::UnsupportedFramework(name)) => {
                warn!(framework = %name, "Unsupported framework");
                return ExecutionVerdict::terminal(
                    &name,
                    FailureKind::UnsupportedFramework,
                    unsupported_message(&name),
                    elapsed_ms(started),
                );
            }
            Err(RenderError::Rejected(rejection)) => {
                warn!(
                    reason = %rejection,
                    pattern_class = ?rejection.pattern_class(),
                    "Submission rejected by screener"
                );
                return ExecutionVerdict::terminal(
                    &request.framework.trim().to_lowercase(),
                    FailureKind::Rejected,
                    rejection.to_string(),
                    elapsed_ms(started),
                );
            }
        };
        let framework = adapter.framework();
        let source = sanitize(&request.source_code);

        let pipeline = AssertUnwindSafe(self.run_pipeline(adapter, &source, request, started))
            .catch_unwind()
            .await;

        let verdict = match pipeline {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                let chain = format!("{:#}", e);
                error!(error = %chain, "Execution pipeline failed");
                ExecutionVerdict::terminal(
                    framework.as_str(),
                    FailureKind::Infrastructure,
                    chain,
                    elapsed_ms(started),
                )
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "Execution pipeline panicked");
                ExecutionVerdict::terminal(
                    framework.as_str(),
                    FailureKind::Infrastructure,
                    format!("Execution pipeline panicked: {}", message),
                    elapsed_ms(started),
                )
            }
        };

        info!(
            framework = %framework,
            success = verdict.success,
            tests_run = verdict.tests_run,
            tests_passed = verdict.tests_passed,
            points_earned = verdict.points_earned,
            total_points = verdict.total_points,
            failure = ?verdict.failure(),
            execution_ms = verdict.execution_time_ms,
            "Execution finished"
        );
        verdict
    }

    async fn run_pipeline(
        &self,
        adapter: &dyn FrameworkAdapter,
        source: &str,
        request: &ExecutionRequest,
        started: Instant,
    ) -> Result<ExecutionVerdict> {
        let framework = adapter.framework();
        let workspace = Workspace::create(&self.config.scratch_root)?;

        let (files, defaulted) = adapter.stage_files(source, &request.test_cases, &request.hints);
        workspace.stage(&files)?;
        workspace.make_writable()?;
        if !defaulted.is_empty() {
            warn!(
                cases = ?defaulted,
                "Cases without test code graded by the fallback assertion"
            );
        }

        let steps = self.run_steps(adapter, workspace.path(), request).await;
        if let Err(e) = workspace.close() {
            warn!(error = %e, "Failed to remove workspace");
        }

        let mut verdict = match steps? {
            StepOutcome::RestoreFailed(raw) => {
                warn!(exit_code = ?raw.exit_code, "Dependency restore failed");
                let mut verdict = ExecutionVerdict::terminal(
                    framework.as_str(),
                    FailureKind::Infrastructure,
                    format!("{}\n\n{}", RESTORE_FAILED_MARKER, raw.combined()),
                    raw.duration.as_millis() as u64,
                );
                verdict.diagnostics.output_truncated = raw.truncated;
                verdict
            }
            StepOutcome::Ran(raw) if raw.timed_out => {
                let partial = raw.combined();
                let output = if partial.trim().is_empty() {
                    TIMEOUT_MARKER.to_string()
                } else {
                    format!("{}\n\n{}", TIMEOUT_MARKER, partial)
                };
                warn!(timeout_ms = request.timeout_ms, "Execution timed out");
                let mut verdict = ExecutionVerdict::terminal(
                    framework.as_str(),
                    FailureKind::Timeout,
                    output,
                    raw.duration.as_millis() as u64,
                );
                verdict.diagnostics.output_truncated = raw.truncated;
                verdict
            }
            StepOutcome::Ran(raw) if adapter.build_failed(&raw) => {
                let mut verdict = ExecutionVerdict::terminal(
                    framework.as_str(),
                    FailureKind::CompilationError,
                    raw.combined(),
                    raw.duration.as_millis() as u64,
                );
                verdict.diagnostics.parser = adapter.parser_name().to_string();
                verdict.diagnostics.output_truncated = raw.truncated;
                verdict
            }
            StepOutcome::Ran(raw) => {
                let outcomes = adapter.parse_output(&raw, &request.test_cases);
                aggregate(
                    outcomes,
                    &request.test_cases,
                    &raw,
                    framework,
                    adapter.parser_name(),
                    adapter.execution_model(),
                )
            }
        };

        if verdict.execution_time_ms == 0 {
            verdict.execution_time_ms = elapsed_ms(started);
        }
        verdict.diagnostics.default_assertions = defaulted;
        Ok(verdict)
    }

    /// Run the optional restore step, then the test step, in one workspace.
    /// Both share the request's wall-clock budget.
    async fn run_steps(
        &self,
        adapter: &dyn FrameworkAdapter,
        workspace: &Path,
        request: &ExecutionRequest,
    ) -> Result<StepOutcome> {
        let image = self.config.image_for(adapter.framework());
        let limits = self.config.limits();
        let mut budget = request.timeout();

        if let Some(restore) = adapter.build_restore_invocation(workspace, &image, limits) {
            let raw = self
                .runner
                .run(&restore, budget)
                .await
                .with_context(|| format!("Dependency restore failed to run in image '{}'", image))?;
            if raw.timed_out {
                return Ok(StepOutcome::Ran(raw));
            }
            if raw.exit_code != Some(0) {
                return Ok(StepOutcome::RestoreFailed(raw));
            }
            debug!(restore_ms = raw.duration.as_millis() as u64, "Dependencies restored");
            budget = budget.saturating_sub(raw.duration);
        }

        let invocation = adapter.build_invocation(workspace, &image, limits);
        let raw = self
            .runner
            .run(&invocation, budget)
            .await
            .with_context(|| format!("Sandbox execution failed for image '{}'", image))?;
        Ok(StepOutcome::Ran(raw))
    }
}
