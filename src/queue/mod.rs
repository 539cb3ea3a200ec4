//! Work-dispatch queue (C2) — an append-only log with consumer groups.

pub mod work_log;

pub use work_log::{JobMessage, WorkLog, WorkLogError};
