//! `taskfabric` — a distributed document-analysis job-orchestration fabric:
//! task lifecycle store, work-dispatch queue, progress fan-out bus, zombie
//! reaper, self-healing LLM-call pipeline, and template version history.

pub mod api;
pub mod bus;
pub mod config;
pub mod domain;
pub mod error;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod queue;
pub mod reaper;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use crate::bus::{ChannelBus, HealthEvent, ProgressEvent};
use crate::config::AppConfig;
use crate::llm::Gateway;
use crate::queue::WorkLog;
use crate::store::{TaskStore, VersionStore};

/// Shared state handed to every HTTP handler, worker task and reaper tick.
///
/// Every field that must be process-wide rather than per-call is wrapped
/// in `Arc` here exactly once, then cloned cheaply wherever it's needed —
/// in particular the LLM gateway's semaphore, which must never be
/// recreated per caller (§5 "Shared resources").
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub task_store: TaskStore,
    pub version_store: VersionStore,
    pub work_log: WorkLog,
    pub gateway: Arc<Gateway>,
    pub progress_bus: Arc<ChannelBus<ProgressEvent>>,
    pub health_bus: Arc<ChannelBus<HealthEvent>>,
    pub storage_root: PathBuf,
}
