use super::{SensorError, TemperatureFilter};
use crate::config::SamplingSettings;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// Anything that can report a temperature in degrees Celsius.
pub trait TemperatureSource: Send {
    fn read_celsius(&mut self) -> Result<f64, SensorError>;

    fn describe(&self) -> String;
}

/// Linux thermal zone, reported in millidegrees Celsius.
#[derive(Debug, Clone)]
pub struct ThermalZoneSource {
    path: PathBuf,
}

impl ThermalZoneSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TemperatureSource for ThermalZoneSource {
    fn read_celsius(&mut self) -> Result<f64, SensorError> {
        let raw = std::fs::read_to_string(&self.path).map_err(|source| SensorError::Read {
            path: self.path.clone(),
            source,
        })?;
        let value = raw.trim();
        let millis: i64 = value.parse().map_err(|_| SensorError::Parse {
            path: self.path.clone(),
            value: value.to_string(),
        })?;
        Ok(millis as f64 / 1000.0)
    }

    fn describe(&self) -> String {
        format!("thermal zone {}", self.path.display())
    }
}

pub struct TemperatureSampler {
    source: Box<dyn TemperatureSource>,
    filter: TemperatureFilter,
}

impl TemperatureSampler {
    pub fn new(source: Box<dyn TemperatureSource>, filter: TemperatureFilter) -> Self {
        Self { source, filter }
    }

    pub fn from_settings(settings: &SamplingSettings) -> Self {
        Self::new(
            Box::new(ThermalZoneSource::new(settings.thermal_zone_path.clone())),
            TemperatureFilter::new(
                settings.calibration_offset,
                settings.filter_enabled,
                settings.filter_samples,
            ),
        )
    }

    /// Reads the source and runs the value through the filter.
    ///
    /// A failed read leaves the filter window untouched.
    pub fn read(&mut self) -> Result<f64, SensorError> {
        match self.source.read_celsius() {
            Ok(raw) => {
                let value = self.filter.apply(raw);
                debug!("Temperature raw={:.3}°C filtered={:.3}°C", raw, value);
                Ok(value)
            }
            Err(e) => {
                error!("Failed to read temperature from {}: {}", self.source.describe(), e);
                Err(e)
            }
        }
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct ScriptedSource(VecDeque<Option<f64>>);

    impl TemperatureSource for ScriptedSource {
        fn read_celsius(&mut self) -> Result<f64, SensorError> {
            match self.0.pop_front().flatten() {
                Some(value) => Ok(value),
                None => Err(SensorError::Parse {
                    path: PathBuf::from("scripted"),
                    value: String::new(),
                }),
            }
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    #[test]
    fn reads_millidegrees_from_thermal_zone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        std::fs::write(&path, "42375\n").unwrap();

        let mut source = ThermalZoneSource::new(&path);
        assert_eq!(source.read_celsius().unwrap(), 42.375);
    }

    #[test]
    fn rejects_garbage_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        std::fs::write(&path, "hot").unwrap();

        let mut source = ThermalZoneSource::new(&path);
        assert!(matches!(source.read_celsius(), Err(SensorError::Parse { .. })));

        let mut missing = ThermalZoneSource::new(dir.path().join("nope"));
        assert!(matches!(missing.read_celsius(), Err(SensorError::Read { .. })));
    }

    #[test]
    fn failed_reads_do_not_enter_the_window() {
        let source = ScriptedSource(VecDeque::from(vec![Some(20.0), None, Some(22.0)]));
        let mut sampler =
            TemperatureSampler::new(Box::new(source), TemperatureFilter::new(0.0, true, 2));

        assert_eq!(sampler.read().unwrap(), 20.0);
        assert!(sampler.read().is_err());
        assert_eq!(sampler.read().unwrap(), 21.0);
    }
}
