//! Temperature history for charting, fed from the telemetry topic.

pub mod history;
pub mod monitor;

pub use history::{BucketStats, ChartBucket, ChartPeriod, TelemetryHistory, TelemetrySample};
pub use monitor::Monitor;
