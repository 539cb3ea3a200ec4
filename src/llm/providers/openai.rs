//! OpenAI Chat Completions API adapter.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{LlmProvider, ProviderCallError, ProviderRequest, ProviderResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: String, base_url: Option<String>) -> Self {
        Self { client, api_key, base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()) }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<i64>,
    #[serde(default)]
    completion_tokens: Option<i64>,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<ProviderResponse, ProviderCallError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.user_prompt}));

        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": messages,
        });

        let response = self
            .client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
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

        let parsed: ChatCompletionResponse = response.json().await?;
        let text = parsed.choices.into_iter().next().map(|c| c.message.content).unwrap_or_default();

        // None here means OpenAI omitted the count; the gateway falls back
        // to a character-length estimate.
        Ok(ProviderResponse { text, tokens_in: parsed.usage.prompt_tokens, tokens_out: parsed.usage.completion_tokens })
    }
}
