//! Logging setup and router counters

mod logging;
mod metrics;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use metrics::{Counter, Gauge, InterfaceStats, MetricsRegistry};
