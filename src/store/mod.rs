//! Durable storage (C1 task store, C7 template version store).

pub mod task_store;
pub mod version_store;

pub use task_store::{ListFilter, NewJob, TaskStore, TaskStoreError};
pub use version_store::{VersionStore, VersionStoreError};
