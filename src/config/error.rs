//! Configuration error types with actionable user messages.

use std::fmt;

/// Configuration errors with enough context for an operator to fix them.
#[derive(Debug, Clone)]
pub enum ConfigurationError {
    Invalid { message: String, fix_hint: String },
    MissingRequired { setting: String, context: String, env_var: String },
    ConnectionFailed { service: String, endpoint: String, error: String, troubleshooting: String },
    Multiple(Vec<ConfigurationError>),
}

impl std::error::Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { message, fix_hint } => {
                write!(f, "Invalid configuration: {message}\n\nHow to fix: {fix_hint}")
            }
            Self::MissingRequired { setting, context, env_var } => {
                write!(
                    f,
                    "Missing required configuration: {setting}\n\nRequired for: {context}\nSet via: {env_var}"
                )
            }
            Self::ConnectionFailed { service, endpoint, error, troubleshooting } => {
                write!(
                    f,
                    "Connection failed: {service}\n\nEndpoint: {endpoint}\nError: {error}\n\nCheck: {troubleshooting}"
                )
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple configuration errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "\n{}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl ConfigurationError {
    #[must_use]
    pub fn invalid(message: impl Into<String>, fix_hint: impl Into<String>) -> Self {
        Self::Invalid { message: message.into(), fix_hint: fix_hint.into() }
    }

    #[must_use]
    pub fn missing_required(setting: impl Into<String>, context: impl Into<String>, env_var: impl Into<String>) -> Self {
        Self::MissingRequired { setting: setting.into(), context: context.into(), env_var: env_var.into() }
    }

    #[must_use]
    pub fn connection_failed(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        error: impl Into<String>,
        troubleshooting: impl Into<String>,
    ) -> Self {
        Self::ConnectionFailed {
            service: service.into(),
            endpoint: endpoint.into(),
            error: error.into(),
            troubleshooting: troubleshooting.into(),
        }
    }

    #[must_use]
    pub fn multiple(errors: Vec<ConfigurationError>) -> Self {
        Self::Multiple(errors)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.len(),
            _ => 1,
        }
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_error_display() {
        let err = ConfigurationError::invalid("WORKER_CONCURRENCY must be > 0", "Set WORKER_CONCURRENCY to a positive integer");
        let msg = err.to_string();
        assert!(msg.contains("Invalid configuration"));
        assert!(msg.contains("How to fix"));
    }

    #[test]
    fn missing_required_error_display() {
        let err = ConfigurationError::missing_required("LLM API Key", "making LLM requests", "ANTHROPIC_API_KEY or OPENAI_API_KEY");
        let msg = err.to_string();
        assert!(msg.contains("Missing required"));
        assert!(msg.contains("ANTHROPIC_API_KEY"));
    }

    #[test]
    fn multiple_errors_display_and_count() {
        let err = ConfigurationError::multiple(vec![
            ConfigurationError::invalid("a", "b"),
            ConfigurationError::invalid("c", "d"),
        ]);
        assert_eq!(err.count(), 2);
        assert!(err.to_string().contains("Multiple configuration errors"));
    }
}
