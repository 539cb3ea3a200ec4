//! The gateway (C5): a process-wide choke point for every LLM call.
//!
//! Grounded on the reference client's class-level shared semaphore and
//! retry loop. Two knobs are load-bearing invariants rather than ordinary
//! config (§9 "Global mutable state"):
//!
//! - a single `Semaphore` shared across every worker task in the process,
//!   bounding concurrent in-flight calls regardless of how many jobs are
//!   running;
//! - the per-task cost accumulator the caller threads through `call()`,
//!   which the gateway checks against `max_cost_per_task_usd` after every
//!   call completes (cost is only known once usage comes back on the
//!   response, so enforcement is necessarily post-call).

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use thiserror::Error;

use crate::domain::provider::LlmProviderRecord;
use crate::error::ErrorKind;

use super::providers::{LlmProvider, ProviderCallError, ProviderRequest};

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("rate limited after {MAX_RETRIES} retries")]
    RateLimited,
    #[error("provider timed out after {MAX_RETRIES} retries")]
    ProviderTimeout,
    #[error("network unavailable")]
    NetworkDown,
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("authentication failed")]
    AuthFailed,
    #[error("no provider configured with name {0}")]
    UnknownProvider(String),
    #[error("task cost {attempted_usd:.4} would exceed budget {limit_usd:.4}")]
    QuotaExhausted { attempted_usd: f64, limit_usd: f64 },
}

impl GatewayError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RateLimited => ErrorKind::RateLimited,
            Self::ProviderTimeout => ErrorKind::ProviderTimeout,
            Self::NetworkDown => ErrorKind::NetworkDown,
            Self::ProviderError(_) | Self::UnknownProvider(_) => ErrorKind::ProviderError,
            Self::AuthFailed => ErrorKind::Unauthorized,
            Self::QuotaExhausted { .. } => ErrorKind::QuotaExhausted,
        }
    }
}

/// Outcome of a successful gateway call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub text: String,
    pub tokens_in: i64,
    pub tokens_out: i64,
    pub cost_usd: f64,
    pub duration_ms: u64,
    /// `true` when the provider response carried no usage counts and
    /// `tokens_in`/`tokens_out` were estimated from character length
    /// instead (§4.5).
    pub estimated: bool,
}

/// §4.5: "If the provider response lacks token counts, the gateway
/// estimates them from character-length / 4." A floor of 1 keeps a
/// non-empty string from costing nothing.
fn estimate_tokens(text: &str) -> i64 {
    (text.len() as i64 / 4).max(1)
}

/// The process-global LLM gateway. One instance lives in `AppState` and is
/// shared (via `Arc`) across every worker task.
pub struct Gateway {
    providers: Vec<(LlmProviderRecord, Arc<dyn LlmProvider>)>,
    /// Bounds concurrent in-flight calls across the whole process, not per
    /// worker or per job. Default 2, matching the reference client.
    semaphore: Arc<tokio::sync::Semaphore>,
    max_cost_per_task_usd: Option<f64>,
    /// External rate limit across every provider this process talks to,
    /// a distinct concern from `semaphore`: this bounds *requests per
    /// minute*, not *concurrent* requests, so a burst of short calls is
    /// throttled even when none of them overlap.
    rate_limiter: Option<DefaultDirectRateLimiter>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        providers: Vec<(LlmProviderRecord, Arc<dyn LlmProvider>)>,
        max_concurrent_calls: usize,
        max_cost_per_task_usd: Option<f64>,
        max_requests_per_minute: Option<u32>,
    ) -> Self {
        let rate_limiter = max_requests_per_minute.and_then(NonZeroU32::new).map(|n| RateLimiter::direct(Quota::per_minute(n)));
        Self {
            providers,
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent_calls)),
            max_cost_per_task_usd,
            rate_limiter,
        }
    }

    fn find(&self, provider_name: &str) -> Result<&(LlmProviderRecord, Arc<dyn LlmProvider>), GatewayError> {
        self.providers
            .iter()
            .find(|(record, _)| record.name == provider_name && record.enabled)
            .ok_or_else(|| GatewayError::UnknownProvider(provider_name.to_string()))
    }

    /// The enabled provider flagged as the default document parser, if any.
    #[must_use]
    pub fn default_parser(&self) -> Option<&LlmProviderRecord> {
        self.providers.iter().find(|(record, _)| record.enabled && record.is_default_parser).map(|(r, _)| r)
    }

    /// Issue one call against `provider_name`, retrying transient failures
    /// up to [`MAX_RETRIES`] times with `2^attempt` second backoff, and
    /// enforce the per-task cost budget against `accumulated_cost_usd`
    /// (the sum of every prior call this task has made).
    pub async fn call(
        &self,
        provider_name: &str,
        request: &ProviderRequest,
        accumulated_cost_usd: f64,
    ) -> Result<CallOutcome, GatewayError> {
        let (record, provider) = self.find(provider_name)?;

        let mut attempt = 0u32;
        loop {
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }
            let _permit = self.semaphore.acquire().await.expect("semaphore is never closed");
            let call_started = Instant::now();
            let result = provider.complete(request).await;
            let duration_ms = call_started.elapsed().as_millis() as u64;
            drop(_permit);

            match result {
                Ok(response) => {
                    let estimated = response.tokens_in.is_none() || response.tokens_out.is_none();
                    let tokens_in = response.tokens_in.unwrap_or_else(|| estimate_tokens(&request.user_prompt));
                    let tokens_out = response.tokens_out.unwrap_or_else(|| estimate_tokens(&response.text));
                    let cost_usd = record.cost_usd(tokens_in, tokens_out);
                    if let Some(limit) = self.max_cost_per_task_usd {
                        if accumulated_cost_usd + cost_usd > limit {
                            return Err(GatewayError::QuotaExhausted {
                                attempted_usd: accumulated_cost_usd + cost_usd,
                                limit_usd: limit,
                            });
                        }
                    }
                    return Ok(CallOutcome { text: response.text, tokens_in, tokens_out, cost_usd, duration_ms, estimated });
                }
                Err(ProviderCallError::AuthFailed) => return Err(GatewayError::AuthFailed),
                Err(err) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    // Full jitter: a fixed exponential backoff would have every
                    // retrying caller wake on the same tick and re-contend the
                    // semaphore together.
                    let backoff_ms = 2u64.pow(attempt) * 1000;
                    let jitter_ms = rand::random::<u64>() % backoff_ms;
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                    let _ = err;
                }
                Err(ProviderCallError::RateLimited) => return Err(GatewayError::RateLimited),
                Err(ProviderCallError::Timeout) => return Err(GatewayError::ProviderTimeout),
                Err(ProviderCallError::Network(e)) => return Err(GatewayError::ProviderError(e.to_string())),
                Err(ProviderCallError::Provider(msg)) => return Err(GatewayError::ProviderError(msg)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::providers::ProviderResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use uuid::Uuid;

    struct FlakyProvider {
        failures_before_success: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmProvider for FlakyProvider {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderResponse, ProviderCallError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures_before_success {
                Err(ProviderCallError::RateLimited)
            } else {
                Ok(ProviderResponse { text: "{}".into(), tokens_in: Some(100), tokens_out: Some(50) })
            }
        }
    }

    struct NoUsageProvider;

    #[async_trait]
    impl LlmProvider for NoUsageProvider {
        fn name(&self) -> &str {
            "no-usage"
        }

        async fn complete(&self, _request: &ProviderRequest) -> Result<ProviderResponse, ProviderCallError> {
            Ok(ProviderResponse { text: "x".repeat(40), tokens_in: None, tokens_out: None })
        }
    }

    fn record(name: &str) -> LlmProviderRecord {
        LlmProviderRecord {
            id: Uuid::new_v4(),
            name: name.into(),
            model: "test-model".into(),
            max_tokens: 4096,
            cost_per_1k_in: 0.003,
            cost_per_1k_out: 0.015,
            enabled: true,
            is_default_parser: true,
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "test-model".into(),
            system_prompt: None,
            user_prompt: "hi".into(),
            temperature: 0.3,
            max_tokens: 1024,
            call_purpose: "section_identification",
        }
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected_before_any_call() {
        let gateway = Gateway::new(vec![], 2, None, None);
        let err = gateway.call("anthropic", &request(), 0.0).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn quota_is_enforced_after_the_call_completes() {
        let provider: Arc<dyn LlmProvider> = Arc::new(FlakyProvider { failures_before_success: 0, calls: AtomicU32::new(0) });
        let gateway = Gateway::new(vec![(record("anthropic"), provider)], 2, Some(0.001), None);
        let err = gateway.call("anthropic", &request(), 0.0).await.unwrap_err();
        assert!(matches!(err, GatewayError::QuotaExhausted { .. }));
        assert_eq!(err.kind(), ErrorKind::QuotaExhausted);
    }

    #[tokio::test]
    async fn successful_call_reports_accumulated_cost() {
        let provider: Arc<dyn LlmProvider> = Arc::new(FlakyProvider { failures_before_success: 0, calls: AtomicU32::new(0) });
        let gateway = Gateway::new(vec![(record("anthropic"), provider)], 2, None, None);
        let outcome = gateway.call("anthropic", &request(), 0.0).await.unwrap();
        assert_eq!(outcome.tokens_in, 100);
        assert!(outcome.cost_usd > 0.0);
        assert!(!outcome.estimated);
    }

    #[tokio::test]
    async fn missing_usage_counts_are_estimated_from_character_length() {
        let provider: Arc<dyn LlmProvider> = Arc::new(NoUsageProvider);
        let gateway = Gateway::new(vec![(record("anthropic"), provider)], 2, None, None);
        let outcome = gateway.call("anthropic", &request(), 0.0).await.unwrap();
        assert!(outcome.estimated);
        assert_eq!(outcome.tokens_in, request().user_prompt.len() as i64 / 4);
        assert_eq!(outcome.tokens_out, 40 / 4);
    }
}
