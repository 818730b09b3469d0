//! Temperature and battery sampling.
//!
//! ```text
//! TemperatureSource ──► TemperatureFilter ──► TemperatureSampler::read()
//!   (raw °C)            (offset + moving average)
//! ```

pub mod battery;
pub mod filter;
pub mod temperature;

pub use battery::BatteryGauge;
pub use filter::TemperatureFilter;
pub use temperature::{TemperatureSampler, TemperatureSource, ThermalZoneSource};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected sensor value {value:?} in {path}")]
    Parse { path: PathBuf, value: String },
}
