//! LLM provider records (§3.1 "LLM Provider Record").

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A configured, billable LLM provider/model pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderRecord {
    pub id: Uuid,
    pub name: String,
    pub model: String,
    pub max_tokens: u32,
    pub cost_per_1k_in: f64,
    pub cost_per_1k_out: f64,
    pub enabled: bool,
    pub is_default_parser: bool,
}

impl LlmProviderRecord {
    /// Cost for the given token counts, using this provider's rates.
    #[must_use]
    pub fn cost_usd(&self, tokens_in: i64, tokens_out: i64) -> f64 {
        (tokens_in as f64 / 1000.0) * self.cost_per_1k_in + (tokens_out as f64 / 1000.0) * self.cost_per_1k_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_usd_matches_rate_table() {
        let p = LlmProviderRecord {
            id: Uuid::new_v4(),
            name: "anthropic".into(),
            model: "claude-sonnet-4-5".into(),
            max_tokens: 8192,
            cost_per_1k_in: 0.003,
            cost_per_1k_out: 0.015,
            enabled: true,
            is_default_parser: true,
        };
        let cost = p.cost_usd(1_000_000, 0);
        assert!((cost - 3.0).abs() < 1e-9);
        let cost_out = p.cost_usd(0, 1_000_000);
        assert!((cost_out - 15.0).abs() < 1e-9);
    }
}
