//! Store configuration.

/// Which backend holds task records and balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl StoreBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "redis" => Some(StoreBackend::Redis),
            _ => None,
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key written
    pub key_prefix: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "clipmerge".to_string(),
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    ///
    /// `STORE_BACKEND` wins; otherwise Redis is used whenever `REDIS_URL` is set.
    pub fn from_env() -> Self {
        let redis_url = std::env::var("REDIS_URL").ok();
        let backend = std::env::var("STORE_BACKEND")
            .ok()
            .and_then(|s| StoreBackend::parse(&s))
            .unwrap_or(if redis_url.is_some() {
                StoreBackend::Redis
            } else {
                StoreBackend::Memory
            });

        Self {
            backend,
            redis_url: redis_url.unwrap_or_else(|| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("STORE_KEY_PREFIX").unwrap_or_else(|_| "clipmerge".to_string()),
        }
    }
}
