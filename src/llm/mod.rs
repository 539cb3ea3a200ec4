//! LLM gateway (C5) — the single choke point every call to a model provider
//! passes through, so concurrency, retries and cost accounting are enforced
//! in one place rather than per caller.

pub mod extract;
pub mod gateway;
pub mod providers;

pub use extract::extract_json;
pub use gateway::{CallOutcome, Gateway, GatewayError};
pub use providers::{LlmProvider, ProviderRequest};
