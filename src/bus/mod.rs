//! Progress fan-out bus (C3) and the health/telemetry channel it shares its
//! mechanism with (C9).

pub mod progress_bus;

pub use progress_bus::{ChannelBus, HealthEvent, ProgressEvent};

/// Well-known channel key for the system health bus (§4.3).
pub const HEALTH_CHANNEL: &str = "system:health:alerts";
