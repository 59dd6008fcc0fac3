// Connection settings shared by the API and the worker

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_API_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9100";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub redis_url: String,
    pub api_addr: String,
    pub metrics_addr: String,
}

impl ServiceConfig {
    /// Read `REDIS_URL`, `ARBITER_API_ADDR` and `ARBITER_METRICS_ADDR`, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            redis_url: env_or("REDIS_URL", DEFAULT_REDIS_URL),
            api_addr: env_or("ARBITER_API_ADDR", DEFAULT_API_ADDR),
            metrics_addr: env_or("ARBITER_METRICS_ADDR", DEFAULT_METRICS_ADDR),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            api_addr: DEFAULT_API_ADDR.to_string(),
            metrics_addr: DEFAULT_METRICS_ADDR.to_string(),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
