//! Configuration management.
//!
//! Loads configuration from environment variables (with an optional
//! `.env` file) and validates it before the server is allowed to start.

pub mod error;
pub mod validator;

pub use error::{ConfigResult, ConfigurationError};
pub use validator::ConfigValidator;

use serde::{Deserialize, Serialize};

/// Top-level application configuration (§6.5 Environment).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            redis: RedisConfig::default(),
            providers: ProvidersConfig::default(),
            worker: WorkerConfig::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the environment, then validate it.
    ///
    /// # Errors
    ///
    /// Returns an error if required settings are missing or malformed.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_unchecked()?;
        ConfigValidator::validate(&config).map_err(|e| anyhow::anyhow!("Configuration validation failed:\n\n{e}"))?;
        Ok(config)
    }

    /// Load configuration without validation. Useful for tests.
    pub fn load_unchecked() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("worker.concurrency", 3)?
            .set_default("worker.enable_template_self_healing", true)?
            .set_default("logging.level", "info")?
            .add_source(config::File::with_name("config/taskfabric").required(false))
            .add_source(config::Environment::with_prefix("TASKFABRIC").separator("__").try_parsing(true))
            .build()?;

        let mut app_config: AppConfig = config.try_deserialize().unwrap_or_default();

        if let Ok(url) = std::env::var("DATABASE_URL") {
            app_config.store.url = Some(url);
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            app_config.redis.url = Some(url);
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            app_config.providers.anthropic.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            app_config.providers.openai.api_key = Some(key);
        }
        if let Ok(root) = std::env::var("STORAGE_ROOT") {
            app_config.storage.root = Some(root);
        }
        if let Ok(n) = std::env::var("WORKER_CONCURRENCY") {
            app_config.worker.concurrency = n.parse().unwrap_or(app_config.worker.concurrency);
        }
        if let Ok(cap) = std::env::var("MAX_COST_PER_TASK_USD") {
            app_config.worker.max_cost_per_task_usd = cap.parse().ok();
        }
        if let Ok(flag) = std::env::var("ENABLE_TEMPLATE_SELF_HEALING") {
            app_config.worker.enable_template_self_healing = flag.parse().unwrap_or(true);
        }
        if let Ok(level) = std::env::var("LOG_LEVEL") {
            app_config.logging.level = level;
        }

        Ok(app_config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// Durable task/version store connection (C1, C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { url: None, max_connections: default_max_connections(), min_connections: default_min_connections() }
    }
}

/// Work-log / Streams connection (C2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
    #[serde(default = "default_redis_pool")]
    pub pool_size: u32,
}

fn default_redis_pool() -> u32 {
    20
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self { url: None, pool_size: default_redis_pool() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub anthropic: ProviderConfig,
    #[serde(default)]
    pub openai: ProviderConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub default_model: Option<String>,
}

/// Worker-runtime tunables (§5, §6.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub max_cost_per_task_usd: Option<f64>,
    #[serde(default = "default_true")]
    pub enable_template_self_healing: bool,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_llm_calls: usize,
    /// External requests-per-minute ceiling across every provider (§9
    /// "Global mutable state" — the gateway's rate limiter is process-wide,
    /// not per job). `None` disables the limiter.
    #[serde(default)]
    pub max_llm_requests_per_minute: Option<u32>,
    #[serde(default = "default_reaper_interval")]
    pub reaper_interval_secs: u64,
}

fn default_concurrency() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_calls() -> usize {
    2
}

fn default_reaper_interval() -> u64 {
    300
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_cost_per_task_usd: None,
            enable_template_self_healing: default_true(),
            max_concurrent_llm_calls: default_max_concurrent_calls(),
            max_llm_requests_per_minute: None,
            reaper_interval_secs: default_reaper_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), json: false }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub root: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Env mutation races with any other test that also sets process-wide
    /// vars `load_unchecked` reads, so this runs serialized rather than in
    /// parallel with the rest of the suite.
    #[test]
    #[serial]
    fn env_vars_override_file_and_builder_defaults() {
        let storage_dir = tempfile::tempdir().expect("tempdir");
        // SAFETY: serialized via #[serial]; no other thread reads/writes
        // these process-wide vars concurrently.
        unsafe {
            std::env::set_var("DATABASE_URL", "postgres://test-user@localhost/taskfabric_test");
            std::env::set_var("WORKER_CONCURRENCY", "7");
            std::env::set_var("STORAGE_ROOT", storage_dir.path().to_str().unwrap());
        }

        let config = AppConfig::load_unchecked().expect("config loads from env");

        assert_eq!(config.store.url.as_deref(), Some("postgres://test-user@localhost/taskfabric_test"));
        assert_eq!(config.worker.concurrency, 7);
        assert_eq!(config.storage.root.as_deref(), storage_dir.path().to_str());

        unsafe {
            std::env::remove_var("DATABASE_URL");
            std::env::remove_var("WORKER_CONCURRENCY");
            std::env::remove_var("STORAGE_ROOT");
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_nothing_is_set() {
        // SAFETY: serialized via #[serial].
        unsafe {
            std::env::remove_var("DATABASE_URL");
            std::env::remove_var("WORKER_CONCURRENCY");
        }
        let config = AppConfig::load_unchecked().expect("config loads with defaults");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.worker.concurrency, 3);
        assert!(config.worker.enable_template_self_healing);
    }
}
