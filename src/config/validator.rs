//! Configuration validation.
//!
//! Checks required settings (§6.5: LLM provider API key, log-service
//! endpoint, store connection string, storage root) are present and that
//! numeric tunables are sane, before the server is allowed to start.

use super::error::{ConfigResult, ConfigurationError};
use super::AppConfig;

#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if config.store.url.is_none() {
            errors.push(ConfigurationError::missing_required(
                "store connection string",
                "the durable task and template version stores",
                "DATABASE_URL",
            ));
        }

        if config.redis.url.is_none() {
            errors.push(ConfigurationError::missing_required(
                "log-service endpoint",
                "the work-log dispatch queue",
                "REDIS_URL",
            ));
        }

        if config.providers.anthropic.api_key.is_none() && config.providers.openai.api_key.is_none() {
            errors.push(ConfigurationError::missing_required(
                "LLM provider API key",
                "making LLM gateway calls",
                "ANTHROPIC_API_KEY or OPENAI_API_KEY",
            ));
        }

        if config.storage.root.is_none() {
            errors.push(ConfigurationError::missing_required(
                "storage root for uploaded files",
                "reading source documents for TemplateParse jobs",
                "STORAGE_ROOT",
            ));
        }

        if config.worker.concurrency == 0 {
            errors.push(ConfigurationError::invalid(
                "worker.concurrency is 0",
                "set WORKER_CONCURRENCY to a positive integer",
            ));
        }

        if let Some(cap) = config.worker.max_cost_per_task_usd {
            if cap <= 0.0 {
                errors.push(ConfigurationError::invalid(
                    format!("MAX_COST_PER_TASK_USD={cap} is not positive"),
                    "set MAX_COST_PER_TASK_USD to a positive dollar amount, or unset it to disable the cap",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ConfigurationError::multiple(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> AppConfig {
        let mut c = AppConfig::default();
        c.store.url = Some("postgres://localhost/taskfabric".into());
        c.redis.url = Some("redis://localhost".into());
        c.providers.anthropic.api_key = Some("sk-ant-test".into());
        c.storage.root = Some("/var/lib/taskfabric/uploads".into());
        c
    }

    #[test]
    fn complete_config_validates() {
        assert!(ConfigValidator::validate(&configured()).is_ok());
    }

    #[test]
    fn missing_store_url_is_rejected() {
        let mut c = configured();
        c.store.url = None;
        let err = ConfigValidator::validate(&c).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn missing_all_provider_keys_is_rejected() {
        let mut c = configured();
        c.providers.anthropic.api_key = None;
        let err = ConfigValidator::validate(&c).unwrap_err();
        assert!(err.to_string().contains("LLM provider API key"));
    }

    #[test]
    fn multiple_missing_settings_are_all_reported() {
        let mut c = configured();
        c.store.url = None;
        c.redis.url = None;
        let err = ConfigValidator::validate(&c).unwrap_err();
        assert_eq!(err.count(), 2);
    }

    #[test]
    fn zero_worker_concurrency_is_rejected() {
        let mut c = configured();
        c.worker.concurrency = 0;
        assert!(ConfigValidator::validate(&c).is_err());
    }
}
