// Queue connection settings shared by the worker and the CLI

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_VERDICT_TTL_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub redis_url: String,
    pub verdict_ttl_seconds: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            verdict_ttl_seconds: DEFAULT_VERDICT_TTL_SECONDS,
        }
    }
}

impl QueueConfig {
    /// Read `REDIS_URL` and `GRADEBOX_VERDICT_TTL` from the environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            verdict_ttl_seconds: lookup("GRADEBOX_VERDICT_TTL")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.verdict_ttl_seconds),
        }
    }
}
