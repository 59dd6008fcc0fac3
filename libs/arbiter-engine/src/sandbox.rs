/// Sandbox Runner - one ephemeral container per compile/run step
///
/// **Boundary:**
/// The executor only ever talks to `SandboxRunner`, which only ever talks to
/// a `ContainerRuntime`. The runtime trait is the single seam between the
/// judge and the container engine: Docker in production (`docker.rs`), a
/// scripted fake in tests.
///
/// **Per-step isolation:**
/// - network disabled
/// - `src/` bound read-only; `build/` writable only while compiling
/// - memory ceiling (swap included) and CPU share
/// - wall-clock timer that force-kills the container
/// - container removed whichever way the step ends

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::registry::RuntimeProfile;
use crate::workspace::Slot;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Where a slot's `src/` appears inside the sandbox
pub const SRC_MOUNT: &str = "/sandbox/src";
/// Where a slot's `build/` appears inside the sandbox
pub const BUILD_MOUNT: &str = "/sandbox/build";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

impl Mount {
    /// Docker `Binds` syntax: `host:container[:ro|:rw]`
    pub fn to_bind(&self) -> String {
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            if self.read_only { "ro" } else { "rw" }
        )
    }
}

/// Everything a runtime needs to start one sandbox
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub user: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed_ms: u64,
    /// Peak memory observed while running, 0 when no sample was taken
    pub peak_memory_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    /// Wall-clock limit hit; the container was killed
    #[error("time limit of {limit_ms}ms exceeded")]
    Timeout { limit_ms: u64, elapsed_ms: u64 },

    /// The program ran and exited unsuccessfully
    #[error("process exited with status {exit_code}")]
    NonZeroExit {
        exit_code: i64,
        stderr: String,
        elapsed_ms: u64,
        peak_memory_bytes: u64,
    },

    /// The sandbox itself could not be started
    #[error("sandbox runtime unavailable: {0}")]
    RuntimeUnavailable(String),
}

/// Narrow interface over a container engine
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Run `spec` to completion, writing `stdin` and closing it immediately.
    /// Implementations must tear the container down on every exit path,
    /// including when the returned future is dropped.
    async fn start(
        &self,
        spec: &ContainerSpec,
        stdin: &str,
        timeout: Duration,
    ) -> Result<StepOutput, StepError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Compile,
    Run,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Compile => "compile",
            Step::Run => "run",
        }
    }
}

/// Builds container specs for compile/run steps and retries infrastructure failures
pub struct SandboxRunner {
    runtime: std::sync::Arc<dyn ContainerRuntime>,
    config: EngineConfig,
}

impl SandboxRunner {
    pub fn new(runtime: std::sync::Arc<dyn ContainerRuntime>, config: EngineConfig) -> Self {
        Self { runtime, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn container_spec(
        &self,
        profile: &RuntimeProfile,
        step: Step,
        execution_id: Uuid,
        slot: &Slot,
        memory_limit_mb: u64,
    ) -> ContainerSpec {
        let command = match step {
            Step::Compile => profile.compile_command.clone().unwrap_or_default(),
            Step::Run => profile.run_command.clone(),
        };

        let mounts = vec![
            Mount {
                host_path: slot.src_dir.clone(),
                container_path: SRC_MOUNT.to_string(),
                read_only: true,
            },
            Mount {
                host_path: slot.build_dir.clone(),
                container_path: BUILD_MOUNT.to_string(),
                read_only: step == Step::Run,
            },
        ];

        let mut labels = HashMap::new();
        labels.insert("arbiter.execution".to_string(), execution_id.to_string());
        labels.insert("arbiter.step".to_string(), step.as_str().to_string());
        labels.insert("arbiter.language".to_string(), profile.language.to_string());

        let memory_bytes = (memory_limit_mb as i64) * 1024 * 1024;

        ContainerSpec {
            // fresh uuid per container, so retries never collide with a dying predecessor
            name: format!("arbiter-{}-{}-{}", slot.name, step.as_str(), Uuid::new_v4()),
            image: profile.image.clone(),
            command,
            mounts,
            memory_bytes,
            nano_cpus: profile.nano_cpus(),
            pids_limit: self.config.pids_limit,
            user: self.config.sandbox_user.clone(),
            labels,
        }
    }

    /// Run one step. `RuntimeUnavailable` is retried with exponential backoff;
    /// `Timeout` and `NonZeroExit` are returned as-is. Exhausting the retries
    /// yields `EngineError::RuntimeUnavailable`, which aborts the request.
    #[tracing::instrument(
        skip(self, profile, slot, stdin),
        fields(language = %profile.language, step = step.as_str(), slot = %slot.name)
    )]
    pub async fn run_step(
        &self,
        profile: &RuntimeProfile,
        step: Step,
        execution_id: Uuid,
        slot: &Slot,
        stdin: &str,
        time_limit_ms: u64,
        memory_limit_mb: u64,
    ) -> EngineResult<Result<StepOutput, StepError>> {
        let timeout_ms = match step {
            Step::Compile => self.config.compile_timeout_ms,
            Step::Run => time_limit_ms,
        };
        let timeout = Duration::from_millis(timeout_ms);
        let max_attempts = self.config.runtime_retries + 1;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let spec = self.container_spec(profile, step, execution_id, slot, memory_limit_mb);
            debug!(container = %spec.name, attempt, timeout_ms, "Starting sandbox");

            match self.runtime.start(&spec, stdin, timeout).await {
                Err(StepError::RuntimeUnavailable(message)) => {
                    if attempt >= max_attempts {
                        return Err(EngineError::RuntimeUnavailable {
                            attempts: attempt,
                            message,
                        });
                    }
                    let backoff = self.config.retry_backoff_ms.saturating_mul(1u64 << (attempt - 1).min(16));
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = backoff,
                        error = %message,
                        "Sandbox runtime unavailable, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                Err(StepError::Timeout { limit_ms, elapsed_ms }) => {
                    // the kill itself can take a moment; report at most limit + grace
                    let capped = elapsed_ms.min(limit_ms + self.config.timeout_grace_ms);
                    return Ok(Err(StepError::Timeout {
                        limit_ms,
                        elapsed_ms: capped,
                    }));
                }
                other => return Ok(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::LanguageRegistry;
    use arbiter_common::types::Language;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct FlakyRuntime {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ContainerRuntime for FlakyRuntime {
        async fn start(&self, _spec: &ContainerSpec, _stdin: &str, _timeout: Duration) -> Result<StepOutput, StepError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(StepError::RuntimeUnavailable("no such image".into()))
            } else {
                Ok(StepOutput {
                    stdout: "ok".into(),
                    ..Default::default()
                })
            }
        }
    }

    fn slot() -> Slot {
        Slot {
            name: "shared".into(),
            src_dir: PathBuf::from("/tmp/ws/shared/src"),
            build_dir: PathBuf::from("/tmp/ws/shared/build"),
        }
    }

    fn runner(runtime: Arc<dyn ContainerRuntime>, retries: u32) -> SandboxRunner {
        let config = EngineConfig {
            runtime_retries: retries,
            retry_backoff_ms: 1,
            ..Default::default()
        };
        SandboxRunner::new(runtime, config)
    }

    #[test]
    fn test_run_step_mounts_build_read_only() {
        let registry = LanguageRegistry::builtin();
        let profile = registry.profile_for(Language::Cpp).unwrap();
        let r = runner(Arc::new(FlakyRuntime { failures_before_success: 0, calls: AtomicU32::new(0) }), 0);

        let run = r.container_spec(profile, Step::Run, Uuid::new_v4(), &slot(), 128);
        assert!(run.mounts.iter().all(|m| m.read_only));
        assert_eq!(run.command, vec!["/sandbox/build/main".to_string()]);
        assert_eq!(run.memory_bytes, 128 * 1024 * 1024);

        let compile = r.container_spec(profile, Step::Compile, Uuid::new_v4(), &slot(), 128);
        let build = compile.mounts.iter().find(|m| m.container_path == BUILD_MOUNT).unwrap();
        assert!(!build.read_only);
        assert_eq!(build.to_bind(), "/tmp/ws/shared/build:/sandbox/build:rw");
        assert_eq!(compile.command[0], "g++");
        assert_ne!(run.name, compile.name);
    }

    #[tokio::test]
    async fn test_retries_runtime_unavailable_then_succeeds() {
        let runtime = Arc::new(FlakyRuntime { failures_before_success: 2, calls: AtomicU32::new(0) });
        let r = runner(runtime.clone(), 2);
        let registry = LanguageRegistry::builtin();
        let profile = registry.profile_for(Language::Python).unwrap();

        let out = r
            .run_step(profile, Step::Run, Uuid::new_v4(), &slot(), "", 1000, 64)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.stdout, "ok");
        assert_eq!(runtime.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let runtime = Arc::new(FlakyRuntime { failures_before_success: u32::MAX, calls: AtomicU32::new(0) });
        let r = runner(runtime.clone(), 2);
        let registry = LanguageRegistry::builtin();
        let profile = registry.profile_for(Language::Python).unwrap();

        let err = r
            .run_step(profile, Step::Run, Uuid::new_v4(), &slot(), "", 1000, 64)
            .await
            .unwrap_err();
        match err {
            EngineError::RuntimeUnavailable { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(runtime.calls.load(Ordering::SeqCst), 3);
    }
}
