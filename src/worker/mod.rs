//! Worker runtime (C4): pulls job messages off the work log, runs the
//! agent pipeline, and writes progress/results back through C1 and C3.

pub mod handler;
pub mod runtime;

pub use handler::handle_message;
pub use runtime::{consumer_id, WorkerRuntime};
