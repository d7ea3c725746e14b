/// Sandbox - Isolated Execution of a Staged Workspace
///
/// **Core Responsibility:**
/// Run one fixed command inside a disposable container with the workspace
/// mounted, and hand back raw streams plus exit status.
///
/// **Boundary:**
/// - The sandbox knows HOW to isolate (image, limits, network, mount)
/// - It does NOT know frameworks, report formats or scoring
/// - Adapters build the `SandboxInvocation`; the dispatcher interprets the outcome

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use anyhow::{Context, Result};
use futures_util::stream::StreamExt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Where the workspace appears inside the container
pub const CONTAINER_WORKSPACE: &str = "/workspace";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    /// Fractional CPUs, `1.0` is one core
    pub cpu_limit: f64,
    pub memory_limit_mb: u64,
    /// Cap on captured stdout + stderr
    pub output_limit_bytes: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_limit: 1.0,
            memory_limit_mb: 512,
            output_limit_bytes: 1024 * 1024,
        }
    }
}

impl ResourceLimits {
    pub fn memory_bytes(&self) -> i64 {
        (self.memory_limit_mb as i64) * 1024 * 1024
    }

    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkPolicy {
    /// No network at all
    Isolated,
    /// Outbound access for build tools that resolve packages
    Permitted,
}

/// Program plus arguments, passed to the container as a structured argv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// `sh -c <script>` for fixed, adapter-owned scripts
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.into()],
        }
    }

    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxInvocation {
    pub image: String,
    /// Host path of the staged workspace
    pub workspace: PathBuf,
    pub mount_path: String,
    pub working_dir: String,
    pub limits: ResourceLimits,
    pub network: NetworkPolicy,
    pub env: Vec<(String, String)>,
    pub command: CommandLine,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExecutionOutcome {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process never reported one (timeout, daemon error)
    pub exit_code: Option<i64>,
    pub duration: Duration,
    pub timed_out: bool,
    pub truncated: bool,
}

impl RawExecutionOutcome {
    /// stdout followed by stderr, the form handed to parsers and learners
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Seam between the dispatcher and the isolation backend.
/// Tests substitute an in-process runner.
#[async_trait]
pub trait SandboxRunner: Send + Sync {
    async fn run(&self, invocation: &SandboxInvocation, timeout: Duration)
        -> Result<RawExecutionOutcome>;
}

/// Stream accumulator that enforces the output cap. Bytes past the cap are
/// drained and dropped so the process never blocks on a full pipe.
#[derive(Debug, Default)]
struct CappedCapture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CappedCapture {
    fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Default::default()
        }
    }

    fn push(&mut self, to_stderr: bool, bytes: &[u8]) {
        let remaining = self.limit.saturating_sub(self.stdout.len() + self.stderr.len());
        let take = bytes.len().min(remaining);
        if take < bytes.len() {
            self.truncated = true;
        }
        let sink = if to_stderr { &mut self.stderr } else { &mut self.stdout };
        sink.extend_from_slice(&bytes[..take]);
    }

    fn into_strings(self) -> (String, String, bool) {
        (
            String::from_utf8_lossy(&self.stdout).into_owned(),
            String::from_utf8_lossy(&self.stderr).into_owned(),
            self.truncated,
        )
    }
}

/// Container cleanup guard - removal is guaranteed even when the
/// execution future is cancelled or panics
struct ContainerGuard {
    docker: Docker,
    container_id: Option<String>,
}

impl ContainerGuard {
    fn new(docker: &Docker, container_id: String) -> Self {
        Self {
            docker: docker.clone(),
            container_id: Some(container_id),
        }
    }

    /// Remove now and disarm the guard
    async fn remove(mut self) {
        if let Some(id) = self.container_id.take() {
            remove_container(&self.docker, &id).await;
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let Some(container_id) = self.container_id.take() else {
            return;
        };
        // Cannot await in Drop; hand removal to the runtime if one is alive
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let docker = self.docker.clone();
            handle.spawn(async move {
                remove_container(&docker, &container_id).await;
            });
        } else {
            warn!(container = %container_id, "No runtime available to remove container");
        }
    }
}

async fn remove_container(docker: &Docker, container_id: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(container_id, Some(options)).await {
        warn!(container = %container_id, error = %e, "Failed to remove container");
    }
}

/// Docker-backed sandbox
///
/// **Container Rules:**
/// 1. Image is pulled on a cache miss when `pull_missing_images` is set
/// 2. Network disabled unless the invocation permits it
/// 3. CPU, memory and pid limits enforced by the daemon
/// 4. Workspace bind-mounted read-write at the mount path
/// 5. Container removed on every exit path
#[derive(Clone)]
pub struct DockerSandbox {
    docker: Docker,
    pull_missing_images: bool,
}

impl DockerSandbox {
    pub fn connect(pull_missing_images: bool) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            pull_missing_images,
        })
    }

    /// Verify the image is present locally, pulling on a miss when allowed
    pub async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }
        if !self.pull_missing_images {
            anyhow::bail!("Image '{}' is not present and pulling is disabled", image);
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }
        info!(image, "Image pulled");
        Ok(())
    }

    fn container_config(invocation: &SandboxInvocation) -> Config<String> {
        let isolated = invocation.network == NetworkPolicy::Isolated;
        let env = invocation
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        Config {
            image: Some(invocation.image.clone()),
            // Images may ship an entrypoint; the argv must run exactly as built
            entrypoint: Some(vec![]),
            cmd: Some(invocation.command.argv()),
            working_dir: Some(invocation.working_dir.clone()),
            env: Some(env),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(isolated),
            host_config: Some(bollard::models::HostConfig {
                memory: Some(invocation.limits.memory_bytes()),
                memory_swap: Some(invocation.limits.memory_bytes()),
                nano_cpus: Some(invocation.limits.nano_cpus()),
                pids_limit: Some(256),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                network_mode: Some(if isolated { "none" } else { "bridge" }.to_string()),
                binds: Some(vec![format!(
                    "{}:{}",
                    invocation.workspace.display(),
                    invocation.mount_path
                )]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SandboxRunner for DockerSandbox {
    #[tracing::instrument(skip(self, invocation), fields(image = %invocation.image))]
    async fn run(
        &self,
        invocation: &SandboxInvocation,
        timeout: Duration,
    ) -> Result<RawExecutionOutcome> {
        self.ensure_image(&invocation.image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", invocation.image))?;

        let container_name = format!("gradebox-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };
        let container = self
            .docker
            .create_container(Some(create_options), Self::container_config(invocation))
            .await
            .context("Failed to create Docker container")?;
        let container_id = container.id.clone();
        let guard = ContainerGuard::new(&self.docker, container_id.clone());

        let start_time = Instant::now();
        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let mut capture = CappedCapture::new(invocation.limits.output_limit_bytes);
        let mut exit_code: Option<i64> = None;

        // Buffers live outside the future so partial output survives a timeout
        let execution = async {
            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });
            let mut logs = self.docker.logs(&container_id, logs_options);
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => capture.push(false, &message),
                    Ok(LogOutput::StdErr { message }) => capture.push(true, &message),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Error reading container logs");
                        break;
                    }
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };
            let mut wait = self.docker.wait_container(&container_id, Some(wait_options));
            match wait.next().await {
                Some(Ok(response)) => exit_code = Some(response.status_code),
                // Non-zero exits surface as this error variant
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    exit_code = Some(code)
                }
                Some(Err(e)) => warn!(error = %e, "Failed to get container exit code"),
                None => warn!("No wait response from container"),
            }
        };

        let timed_out = tokio::time::timeout(timeout, execution).await.is_err();
        if timed_out {
            warn!(timeout_ms = timeout.as_millis() as u64, "Execution timed out, killing container");
            if let Err(e) = self
                .docker
                .kill_container(&container_id, None::<KillContainerOptions<String>>)
                .await
            {
                warn!(error = %e, "Failed to kill timed-out container");
            }
        }
        let duration = start_time.elapsed();

        guard.remove().await;

        let (stdout, mut stderr, truncated) = capture.into_strings();
        match exit_code {
            Some(137) => stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]"),
            Some(139) => stderr.push_str("\n[Container killed: segmentation fault]"),
            _ => {}
        }
        debug!(
            exit_code = ?exit_code,
            duration_ms = duration.as_millis() as u64,
            timed_out,
            truncated,
            "Container finished"
        );

        Ok(RawExecutionOutcome {
            stdout,
            stderr,
            exit_code: if timed_out { None } else { exit_code },
            duration,
            timed_out,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(network: NetworkPolicy) -> SandboxInvocation {
        SandboxInvocation {
            image: "gradebox/executor-node:latest".to_string(),
            workspace: PathBuf::from("/tmp/gradebox/gradebox-abc"),
            mount_path: CONTAINER_WORKSPACE.to_string(),
            working_dir: CONTAINER_WORKSPACE.to_string(),
            limits: ResourceLimits::default(),
            network,
            env: vec![("DOTNET_NOLOGO".to_string(), "1".to_string())],
            command: CommandLine::shell("jest --ci; cat /workspace/results.json"),
        }
    }

    #[test]
    fn test_capture_truncates_at_limit() {
        let mut capture = CappedCapture::new(8);
        capture.push(false, b"hello");
        capture.push(true, b"world");
        capture.push(false, b"!!!");

        let (stdout, stderr, truncated) = capture.into_strings();
        assert_eq!(stdout, "hello");
        assert_eq!(stderr, "wor");
        assert!(truncated);
    }

    #[test]
    fn test_capture_under_limit_is_untouched() {
        let mut capture = CappedCapture::new(1024);
        capture.push(false, b"ok");
        let (stdout, stderr, truncated) = capture.into_strings();
        assert_eq!(stdout, "ok");
        assert!(stderr.is_empty());
        assert!(!truncated);
    }

    #[test]
    fn test_isolated_config_has_no_network() {
        let config = DockerSandbox::container_config(&invocation(NetworkPolicy::Isolated));
        let host = config.host_config.unwrap();

        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, Some(512 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(1_000_000_000));
        assert_eq!(
            host.binds,
            Some(vec!["/tmp/gradebox/gradebox-abc:/workspace".to_string()])
        );
        assert_eq!(config.env, Some(vec!["DOTNET_NOLOGO=1".to_string()]));
    }

    #[test]
    fn test_permitted_config_uses_bridge() {
        let config = DockerSandbox::container_config(&invocation(NetworkPolicy::Permitted));
        assert_eq!(config.network_disabled, Some(false));
        assert_eq!(
            config.host_config.unwrap().network_mode.as_deref(),
            Some("bridge")
        );
    }

    #[test]
    fn test_command_is_structured_argv() {
        let config = DockerSandbox::container_config(&invocation(NetworkPolicy::Isolated));
        let cmd = config.cmd.unwrap();
        assert_eq!(cmd[0], "sh");
        assert_eq!(cmd[1], "-c");
        assert_eq!(cmd.len(), 3);
    }

    #[test]
    fn test_combined_output() {
        let outcome = RawExecutionOutcome {
            stdout: "out".into(),
            stderr: "err".into(),
            ..Default::default()
        };
        assert_eq!(outcome.combined(), "out\nerr");

        let only_err = RawExecutionOutcome {
            stderr: "err".into(),
            ..Default::default()
        };
        assert_eq!(only_err.combined(), "err");
    }

    #[test]
    fn test_limit_conversions() {
        let limits = ResourceLimits {
            cpu_limit: 0.5,
            memory_limit_mb: 256,
            output_limit_bytes: 10,
        };
        assert_eq!(limits.nano_cpus(), 500_000_000);
        assert_eq!(limits.memory_bytes(), 256 * 1024 * 1024);
    }
}
