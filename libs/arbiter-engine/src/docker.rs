/// Docker-backed `ContainerRuntime` using Bollard
///
/// **Lifecycle of one step:**
/// 1. arm the cleanup guard by name, then create the container
///    (no network, memory/CPU/pids limits, read-only rootfs)
/// 2. attach stdin/stdout/stderr before starting, so no output is missed
/// 3. start, write stdin, close stdin
/// 4. drain output and wait for exit, racing the wall-clock timer
/// 5. on timeout: kill
/// 6. always: force-remove (explicitly, or via `ContainerGuard` on drop)
///
/// Refusals from the daemon before the program runs (unknown image,
/// daemon down, create/start errors) surface as `RuntimeUnavailable`.
/// Create, attach and remove are bounded by `DAEMON_CALL_TIMEOUT`, so a
/// stalled daemon cannot hold a step open past its limits.

use crate::sandbox::{ContainerRuntime, ContainerSpec, Mount, StepError, StepOutput};
use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    InspectContainerOptions, KillContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Captured stdout/stderr beyond this is dropped
const MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;
const TMPFS_OPTIONS: &str = "rw,nosuid,nodev,size=128m";
/// Upper bound on daemon calls made outside the program's own time limit
const DAEMON_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Container cleanup guard - guarantees container removal
///
/// The normal path calls `remove().await`. If the owning future is dropped
/// first (request cancelled, panic), `Drop` spawns the removal instead.
///
/// Armed with the container name before `create_container` is sent, so a
/// container the daemon creates after the caller gave up is still removed.
struct ContainerGuard {
    docker: Docker,
    container: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(docker: &Docker, container: impl Into<String>) -> Self {
        Self {
            docker: docker.clone(),
            container: container.into(),
            armed: true,
        }
    }

    async fn remove(mut self) {
        self.armed = false;
        remove_container(&self.docker, &self.container).await;
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let docker = self.docker.clone();
        let container = std::mem::take(&mut self.container);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remove_container(&docker, &container).await;
                });
            }
            Err(_) => warn!(container = %container, "No runtime to remove container; it is leaked"),
        }
    }
}

/// Force-remove by id or name. A 404 means create never went through.
async fn remove_container(docker: &Docker, container: &str) {
    let options = RemoveContainerOptions {
        force: true,
        v: true,
        ..Default::default()
    };
    let removal = docker.remove_container(container, Some(options));
    match tokio::time::timeout(DAEMON_CALL_TIMEOUT, removal).await {
        Ok(Ok(())) => debug!(container = %container, "Container removed"),
        Ok(Err(DockerError::DockerResponseServerError { status_code: 404, .. })) => {
            debug!(container = %container, "Container already gone")
        }
        Ok(Err(e)) => warn!(container = %container, error = %e, "Failed to remove container"),
        Err(_) => warn!(container = %container, "Timed out removing container"),
    }
}

/// Run a daemon call under `limit`, mapping both failure modes to
/// `RuntimeUnavailable`
async fn bounded<T, F>(limit: Duration, what: &str, call: F) -> Result<T, StepError>
where
    F: std::future::Future<Output = Result<T, DockerError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(StepError::RuntimeUnavailable(format!("failed to {}: {}", what, e))),
        Err(_) => Err(StepError::RuntimeUnavailable(format!(
            "timed out after {}ms trying to {}",
            limit.as_millis(),
            what
        ))),
    }
}

/// Raw stdout/stderr bytes, decoded once at the end so multi-byte
/// characters split across frames survive
#[derive(Debug, Default)]
struct CapturedOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    truncated: bool,
}

impl CapturedOutput {
    fn push_stdout(&mut self, bytes: &[u8]) {
        Self::append(&mut self.stdout, bytes, &mut self.truncated);
    }

    fn push_stderr(&mut self, bytes: &[u8]) {
        Self::append(&mut self.stderr, bytes, &mut self.truncated);
    }

    fn append(target: &mut Vec<u8>, bytes: &[u8], truncated: &mut bool) {
        let room = MAX_CAPTURE_BYTES.saturating_sub(target.len());
        if bytes.len() > room {
            *truncated = true;
        }
        target.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn into_strings(self) -> (String, String) {
        let stdout = String::from_utf8_lossy(&self.stdout).into_owned();
        let mut stderr = String::from_utf8_lossy(&self.stderr).into_owned();
        if self.truncated {
            stderr.push_str("\n[output truncated]");
        }
        (stdout, stderr)
    }
}

/// Aborts the memory sampler when the step ends, however it ends
struct SamplerHandle(JoinHandle<()>);

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect to the local Docker daemon (socket or DOCKER_HOST)
    pub fn connect() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }

    pub async fn ping(&self) -> Result<(), DockerError> {
        self.docker.ping().await.map(|_| ())
    }

    /// Make sure `image` is in the local cache, pulling it if missing.
    /// Only used for warm-up; execution never pulls.
    pub async fn ensure_image(&self, image: &str) -> Result<(), DockerError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image, "Image cache hit");
            return Ok(());
        }

        warn!(image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            progress?;
        }

        info!(image, "Image pulled");
        Ok(())
    }

    fn container_config(spec: &ContainerSpec) -> Config<String> {
        let mut tmpfs = HashMap::new();
        tmpfs.insert("/tmp".to_string(), TMPFS_OPTIONS.to_string());

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            user: Some(spec.user.clone()),
            working_dir: Some("/tmp".to_string()),
            env: Some(vec!["LANG=C.UTF-8".to_string(), "HOME=/tmp".to_string()]),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            open_stdin: Some(true),
            stdin_once: Some(true),
            tty: Some(false),
            network_disabled: Some(true),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                binds: Some(spec.mounts.iter().map(Mount::to_bind).collect()),
                memory: Some(spec.memory_bytes),
                // no swap: the memory ceiling is the whole budget
                memory_swap: Some(spec.memory_bytes),
                nano_cpus: Some(spec.nano_cpus),
                pids_limit: Some(spec.pids_limit),
                network_mode: Some("none".to_string()),
                readonly_rootfs: Some(true),
                tmpfs: Some(tmpfs),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn spawn_memory_sampler(&self, container_id: &str, peak: Arc<AtomicU64>) -> SamplerHandle {
        let docker = self.docker.clone();
        let container_id = container_id.to_string();

        SamplerHandle(tokio::spawn(async move {
            let options = Some(StatsOptions {
                stream: true,
                one_shot: false,
            });
            let mut stats = docker.stats(&container_id, options);
            while let Some(Ok(sample)) = stats.next().await {
                let usage = sample
                    .memory_stats
                    .max_usage
                    .or(sample.memory_stats.usage)
                    .unwrap_or(0);
                peak.fetch_max(usage, Ordering::Relaxed);
            }
        }))
    }

    async fn wait_exit_code(&self, container_id: &str) -> Result<i64, StepError> {
        let options = Some(WaitContainerOptions {
            condition: "not-running",
        });
        let mut wait_stream = self.docker.wait_container(container_id, options);

        match wait_stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // Bollard reports non-zero exits as an error carrying the code
            Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(StepError::RuntimeUnavailable(format!(
                "failed to wait for container: {}",
                e
            ))),
            None => Err(StepError::RuntimeUnavailable(
                "no wait response from container".to_string(),
            )),
        }
    }

    async fn was_oom_killed(&self, container_id: &str) -> bool {
        match self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
        {
            Ok(info) => info
                .state
                .and_then(|state| state.oom_killed)
                .unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Steps 2-5 for an already created container
    async fn run_created(
        &self,
        container_id: &str,
        stdin: &str,
        timeout: Duration,
    ) -> Result<StepOutput, StepError> {
        let attach_options = Some(AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            detach_keys: None,
        });

        let AttachContainerResults { mut output, mut input } = bounded(
            DAEMON_CALL_TIMEOUT,
            "attach to container",
            self.docker.attach_container(container_id, attach_options),
        )
        .await?;

        let peak_memory = Arc::new(AtomicU64::new(0));
        let start_time = Instant::now();

        // start, stdin, output and exit all race the same timer
        let execution = async {
            self.docker
                .start_container(container_id, None::<StartContainerOptions<String>>)
                .await
                .map_err(|e| StepError::RuntimeUnavailable(format!("failed to start container: {}", e)))?;

            let _sampler = self.spawn_memory_sampler(container_id, peak_memory.clone());

            if !stdin.is_empty() {
                if let Err(e) = input.write_all(stdin.as_bytes()).await {
                    // the program may exit without reading its input
                    debug!(error = %e, "Could not write full stdin");
                }
            }
            if let Err(e) = input.shutdown().await {
                debug!(error = %e, "Could not close stdin");
            }

            let mut captured = CapturedOutput::default();
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        captured.push_stdout(&message)
                    }
                    Ok(LogOutput::StdErr { message }) => captured.push_stderr(&message),
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(e) => {
                        warn!(error = %e, "Error reading container output");
                        break;
                    }
                }
            }
            let (stdout, stderr) = captured.into_strings();

            let exit_code = self.wait_exit_code(container_id).await?;
            Ok::<_, StepError>((stdout, stderr, exit_code))
        };

        match tokio::time::timeout(timeout, execution).await {
            Ok(Ok((stdout, mut stderr, exit_code))) => {
                let elapsed_ms = start_time.elapsed().as_millis() as u64;
                let peak_memory_bytes = peak_memory.load(Ordering::Relaxed);

                if exit_code == 0 {
                    return Ok(StepOutput {
                        stdout,
                        stderr,
                        elapsed_ms,
                        peak_memory_bytes,
                    });
                }

                if exit_code == 137 {
                    if self.was_oom_killed(container_id).await {
                        stderr.push_str("\n[Container killed: memory limit exceeded]");
                    } else {
                        stderr.push_str("\n[Container killed]");
                    }
                } else if exit_code == 139 {
                    stderr.push_str("\n[Container killed: segmentation fault]");
                }

                Err(StepError::NonZeroExit {
                    exit_code,
                    stderr,
                    elapsed_ms,
                    peak_memory_bytes,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                let limit_ms = timeout.as_millis() as u64;
                warn!(container = %container_id, limit_ms, "Execution timed out, killing container");

                if let Err(e) = self
                    .docker
                    .kill_container(container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container = %container_id, error = %e, "Failed to kill timed-out container");
                }

                Err(StepError::Timeout {
                    limit_ms,
                    elapsed_ms: start_time.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(
        &self,
        spec: &ContainerSpec,
        stdin: &str,
        timeout: Duration,
    ) -> Result<StepOutput, StepError> {
        let create_options = Some(CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        });

        let guard = ContainerGuard::new(&self.docker, spec.name.as_str());

        let created = bounded(
            DAEMON_CALL_TIMEOUT,
            &format!("create container from '{}'", spec.image),
            self.docker
                .create_container(create_options, Self::container_config(spec)),
        )
        .await;

        let result = match created {
            Ok(container) => self.run_created(&container.id, stdin, timeout).await,
            Err(e) => Err(e),
        };

        guard.remove().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::Mount;
    use std::path::PathBuf;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: "arbiter-test".into(),
            image: "python:3.12-slim".into(),
            command: vec!["python3".into(), "-c".into(), "print(1)".into()],
            mounts: vec![Mount {
                host_path: PathBuf::from("/tmp/x/src"),
                container_path: "/sandbox/src".into(),
                read_only: true,
            }],
            memory_bytes: 64 * 1024 * 1024,
            nano_cpus: 500_000_000,
            pids_limit: 32,
            user: "65534:65534".into(),
            labels: HashMap::new(),
        }
    }

    #[test]
    fn test_capture_keeps_characters_split_across_frames() {
        let text = "héllo wörld\n".as_bytes();
        let mut captured = CapturedOutput::default();
        // split inside the two-byte 'é'
        captured.push_stdout(&text[..2]);
        captured.push_stdout(&text[2..]);
        captured.push_stderr("ошибка".as_bytes());

        let (stdout, stderr) = captured.into_strings();
        assert_eq!(stdout, "héllo wörld\n");
        assert_eq!(stderr, "ошибка");
    }

    #[test]
    fn test_capture_is_capped_in_bytes() {
        let mut captured = CapturedOutput::default();
        captured.push_stdout(&vec![b'a'; MAX_CAPTURE_BYTES - 1]);
        captured.push_stdout(b"bcd");
        captured.push_stdout(b"e");

        let (stdout, stderr) = captured.into_strings();
        assert_eq!(stdout.len(), MAX_CAPTURE_BYTES);
        assert!(stdout.ends_with("ab"));
        assert!(stderr.ends_with("[output truncated]"));
    }

    #[tokio::test]
    async fn test_stalled_daemon_call_is_unavailable() {
        let stalled = std::future::pending::<Result<(), DockerError>>();
        let err = bounded(Duration::from_millis(50), "create container", stalled)
            .await
            .unwrap_err();
        match err {
            StepError::RuntimeUnavailable(message) => {
                assert!(message.contains("timed out after 50ms"));
                assert!(message.contains("create container"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_daemon_refusal_is_unavailable() {
        let refused = async {
            Err::<(), _>(DockerError::DockerResponseServerError {
                status_code: 404,
                message: "No such image: nope:latest".to_string(),
            })
        };
        let err = bounded(DAEMON_CALL_TIMEOUT, "create container from 'nope'", refused)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::RuntimeUnavailable(ref m) if m.contains("No such image")));
    }

    #[test]
    fn test_container_config_is_locked_down() {
        let config = DockerRuntime::container_config(&spec());
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(config.stdin_once, Some(true));

        let host = config.host_config.unwrap();
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.memory, Some(64 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(host.binds, Some(vec!["/tmp/x/src:/sandbox/src:ro".to_string()]));
    }
}
