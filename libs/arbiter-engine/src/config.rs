// Engine tunables, read once at process start from ARBITER_* variables
use std::path::PathBuf;
use std::str::FromStr;

/// Hard cap on sandboxes running at once for a single request
pub const MAX_PARALLEL_CASES_CAP: usize = 8;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Parent directory for per-request workspaces
    pub workspace_root: PathBuf,
    pub default_time_limit_ms: u64,
    pub default_memory_limit_mb: u64,
    /// Wall-clock budget for a compile step (not charged to the user's limit)
    pub compile_timeout_ms: u64,
    /// Slack reported on top of the time limit when a run is force-killed
    pub timeout_grace_ms: u64,
    /// Concurrent sandboxes per request, 1 = sequential
    pub max_parallel_cases: usize,
    /// Extra attempts after the first when the runtime cannot start a sandbox
    pub runtime_retries: u32,
    pub retry_backoff_ms: u64,
    pub pids_limit: i64,
    /// `uid:gid` the sandboxed process runs as
    pub sandbox_user: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            default_time_limit_ms: 2000,
            default_memory_limit_mb: 256,
            compile_timeout_ms: 15_000,
            timeout_grace_ms: 500,
            max_parallel_cases: 1,
            runtime_retries: 2,
            retry_backoff_ms: 200,
            pids_limit: 64,
            sandbox_user: "65534:65534".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workspace_root: std::env::var("ARBITER_WORKSPACE_ROOT")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            default_time_limit_ms: env_parse("ARBITER_DEFAULT_TIME_LIMIT_MS", defaults.default_time_limit_ms),
            default_memory_limit_mb: env_parse("ARBITER_DEFAULT_MEMORY_LIMIT_MB", defaults.default_memory_limit_mb),
            compile_timeout_ms: env_parse("ARBITER_COMPILE_TIMEOUT_MS", defaults.compile_timeout_ms),
            timeout_grace_ms: env_parse("ARBITER_TIMEOUT_GRACE_MS", defaults.timeout_grace_ms),
            max_parallel_cases: env_parse("ARBITER_MAX_PARALLEL_CASES", defaults.max_parallel_cases),
            runtime_retries: env_parse("ARBITER_RUNTIME_RETRIES", defaults.runtime_retries),
            retry_backoff_ms: env_parse("ARBITER_RETRY_BACKOFF_MS", defaults.retry_backoff_ms),
            pids_limit: env_parse("ARBITER_PIDS_LIMIT", defaults.pids_limit),
            sandbox_user: std::env::var("ARBITER_SANDBOX_USER").unwrap_or(defaults.sandbox_user),
        }
        .normalized()
    }

    /// Clamp values that would otherwise break the resource model
    pub fn normalized(mut self) -> Self {
        self.max_parallel_cases = self.max_parallel_cases.clamp(1, MAX_PARALLEL_CASES_CAP);
        self.default_time_limit_ms = self.default_time_limit_ms.max(1);
        self.default_memory_limit_mb = self.default_memory_limit_mb.max(1);
        self
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparsable setting, using default");
                default
            }
        },
        Err(_) => default,
    }
}
