//! Anthropic Messages API adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{LlmProvider, ProviderCallError, ProviderRequest, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: String, base_url: Option<String>) -> Self {
        Self { client, api_key, base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()) }
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<i64>,
    #[serde(default)]
    output_tokens: Option<i64>,
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderCallError> {
        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "system": request.system_prompt,
            "messages": [{"role": "user", "content": request.user_prompt}],
        });

        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { ProviderCallError::Timeout } else { ProviderCallError::Network(e) })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderCallError::RateLimited);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProviderCallError::AuthFailed);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderCallError::Provider(format!("{status}: {text}")));
        }

        let parsed: MessagesResponse = response.json().await?;
        let text = parsed.content.into_iter().map(|b| b.text).collect::<Vec<_>>().join("");

        // None here means Anthropic omitted the count; the gateway falls back
        // to a character-length estimate.
        Ok(ProviderResponse { text, tokens_in: parsed.usage.input_tokens, tokens_out: parsed.usage.output_tokens })
    }
}
