//! Composition root: wires every component into one [`AppState`] and
//! assembles the axum [`Router`] over it.
//!
//! Grounded on the reference `create_app`'s numbered init sequence —
//! connect the durable stores, build the gateway, assemble state, then
//! layer CORS/timeout/trace onto the router — generalized here from a
//! single orchestrator/workflow-engine stack to the fabric's store/queue/
//! gateway/bus stack.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::bus::ChannelBus;
use crate::config::AppConfig;
use crate::domain::provider::LlmProviderRecord;
use crate::llm::providers::{anthropic::AnthropicProvider, openai::OpenAiProvider, LlmProvider};
use crate::llm::Gateway;
use crate::logging::OpTimer;
use crate::queue::WorkLog;
use crate::store::{TaskStore, VersionStore};
use crate::{api, log_banner, log_init_step, log_init_warning, log_success, AppState};

const VERSION: &str = env!("CARGO_PKG_VERSION");
/// HTTP request timeout; generous enough for the submit endpoint, which
/// only enqueues work and never waits on the pipeline itself.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Build the fully wired application: connect to Postgres and Redis,
/// construct every component, assemble [`AppState`], and return the
/// router alongside it so callers (the API role and the CLI's `--role`
/// dispatch) can reuse the same state for the worker/reaper roles too.
pub async fn create_app(config: AppConfig) -> anyhow::Result<(Router, AppState)> {
    let overall_timer = OpTimer::new("server", "create_app");

    log_banner!(format!("taskfabric v{VERSION}"), format!("workers={}", config.worker.concurrency));

    // [1/6] Durable task/version store.
    let step_timer = OpTimer::new("server", "store");
    let database_url = config.store.url.clone().ok_or_else(|| anyhow::anyhow!("store.url is required"))?;
    let pool = PgPoolOptions::new()
        .max_connections(config.store.max_connections)
        .min_connections(config.store.min_connections)
        .connect(&database_url)
        .await?;
    let task_store = TaskStore::new(pool.clone());
    let version_store = VersionStore::new(pool);
    log_init_step!(1, 6, "Task Store", "connected to Postgres");
    step_timer.finish();

    // [2/6] Work log (Redis Streams).
    let step_timer = OpTimer::new("server", "work_log");
    let redis_url = config.redis.url.clone().ok_or_else(|| anyhow::anyhow!("redis.url is required"))?;
    let redis_conn = init_redis(&redis_url).await?;
    let work_log = WorkLog::new(redis_conn);
    log_init_step!(2, 6, "Work Log", "connected to Redis");
    step_timer.finish();

    // [3/6] LLM providers + gateway.
    let step_timer = OpTimer::new("server", "gateway");
    let providers = build_providers(&config);
    if providers.is_empty() {
        log_init_warning!("No LLM provider API keys configured; template pipelines will fail until one is set.");
    }
    let provider_names: Vec<&str> = providers.iter().map(|(record, _)| record.name.as_str()).collect();
    let gateway = Arc::new(Gateway::new(
        providers,
        config.worker.max_concurrent_llm_calls,
        config.worker.max_cost_per_task_usd,
        config.worker.max_llm_requests_per_minute,
    ));
    log_init_step!(3, 6, "LLM Gateway", format!("providers: {}", provider_names.join(", ")));
    step_timer.finish();

    // [4/6] Progress and health buses.
    let step_timer = OpTimer::new("server", "buses");
    let progress_bus = Arc::new(ChannelBus::new());
    let health_bus = Arc::new(ChannelBus::new());
    log_init_step!(4, 6, "Event Buses", "progress + health fan-out ready");
    step_timer.finish();

    // [5/6] Storage root for uploaded source files.
    let step_timer = OpTimer::new("server", "storage");
    let storage_root = config
        .storage
        .root
        .clone()
        .map(std::path::PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("storage.root is required"))?;
    tokio::fs::create_dir_all(&storage_root).await?;
    log_init_step!(5, 6, "Storage Root", storage_root.display().to_string());
    step_timer.finish();

    let state = AppState {
        config: Arc::new(config),
        task_store,
        version_store,
        work_log,
        gateway,
        progress_bus,
        health_bus,
        storage_root,
    };

    // [6/6] Router + middleware.
    let step_timer = OpTimer::new("server", "router");
    let app = api::create_router()
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TimeoutLayer::with_status_code(axum::http::StatusCode::REQUEST_TIMEOUT, Duration::from_secs(REQUEST_TIMEOUT_SECS)))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());
    log_init_step!(6, 6, "Router", "routes + middleware configured");
    step_timer.finish();

    overall_timer.finish();
    log_success!("taskfabric composition root ready");

    Ok((app, state))
}

async fn init_redis(url: &str) -> anyhow::Result<redis::aio::ConnectionManager> {
    let client = redis::Client::open(url)?;
    let conn = redis::aio::ConnectionManager::new(client).await?;
    Ok(conn)
}

/// Cost-rate table per provider/model. These mirror the reference
/// `llm_providers` seed data; operators adjust them via the same table at
/// runtime (§6.4 "A single relational namespace owns ... `llm_providers`"),
/// this is only the bootstrap default used when none exists yet.
fn build_providers(config: &AppConfig) -> Vec<(LlmProviderRecord, Arc<dyn LlmProvider>)> {
    let client = reqwest::Client::new();
    let mut providers: Vec<(LlmProviderRecord, Arc<dyn LlmProvider>)> = Vec::new();

    if let Some(api_key) = config.providers.anthropic.api_key.clone() {
        let model = config.providers.anthropic.default_model.clone().unwrap_or_else(|| "claude-sonnet-4-5".to_string());
        let record = LlmProviderRecord {
            id: uuid::Uuid::new_v4(),
            name: "anthropic".to_string(),
            model: model.clone(),
            max_tokens: 16_384,
            cost_per_1k_in: 0.003,
            cost_per_1k_out: 0.015,
            enabled: true,
            is_default_parser: true,
        };
        let provider: Arc<dyn LlmProvider> =
            Arc::new(AnthropicProvider::new(client.clone(), api_key, config.providers.anthropic.base_url.clone()));
        providers.push((record, provider));
    }

    if let Some(api_key) = config.providers.openai.api_key.clone() {
        let model = config.providers.openai.default_model.clone().unwrap_or_else(|| "gpt-4o".to_string());
        let record = LlmProviderRecord {
            id: uuid::Uuid::new_v4(),
            name: "openai".to_string(),
            model: model.clone(),
            max_tokens: 16_384,
            cost_per_1k_in: 0.0025,
            cost_per_1k_out: 0.01,
            enabled: true,
            is_default_parser: providers.is_empty(),
        };
        let provider: Arc<dyn LlmProvider> = Arc::new(OpenAiProvider::new(client, api_key, config.providers.openai.base_url.clone()));
        providers.push((record, provider));
    }

    providers
}
