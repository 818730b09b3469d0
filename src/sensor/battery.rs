use super::SensorError;
use std::path::PathBuf;

/// Power-supply voltage from sysfs (`voltage_now`, microvolts).
#[derive(Debug, Clone)]
pub struct BatteryGauge {
    path: PathBuf,
}

impl BatteryGauge {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Volts, rounded to two decimals.
    pub fn read_volts(&self) -> Result<f64, SensorError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| SensorError::Read {
            path: self.path.clone(),
            source,
        })?;
        let value = raw.trim();
        let micro: u64 = value.parse().map_err(|_| SensorError::Parse {
            path: self.path.clone(),
            value: value.to_string(),
        })?;
        Ok((micro as f64 / 10_000.0).round() / 100.0)
    }
}
