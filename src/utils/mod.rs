//! Configuration and statistics utilities.

pub mod config;
pub mod metrics;

pub use config::AppConfig;
pub use metrics::PerformanceMetrics;
