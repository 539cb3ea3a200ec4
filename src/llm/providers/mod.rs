//! Provider adapters. Each implements [`LlmProvider`] over its own HTTP
//! wire format; the gateway only ever sees [`ProviderRequest`]/[`ProviderResponse`].

pub mod anthropic;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single call to a model, independent of provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Free-form label describing why this call is being made
    /// (e.g. `"section_identification"`, `"self_heal_template"`), carried
    /// through to telemetry.
    pub call_purpose: &'static str,
}

/// The provider's raw text completion plus token accounting. `None` usage
/// fields mean the provider's response didn't carry a count; the gateway
/// falls back to a character-length estimate in that case (§4.5).
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub text: String,
    pub tokens_in: Option<i64>,
    pub tokens_out: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderCallError {
    #[error("rate limited")]
    RateLimited,
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("provider returned an error: {0}")]
    Provider(String),
    #[error("authentication failed")]
    AuthFailed,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderCallError>;
}
