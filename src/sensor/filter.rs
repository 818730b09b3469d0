use std::collections::VecDeque;
use tracing::debug;

/// Calibration offset followed by an optional moving average.
///
/// The average only kicks in once the window is full; until then the calibrated raw value
/// passes through unchanged.
#[derive(Debug, Clone)]
pub struct TemperatureFilter {
    offset: f64,
    enabled: bool,
    window_size: usize,
    window: VecDeque<f64>,
}

impl TemperatureFilter {
    pub fn new(offset: f64, enabled: bool, window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            offset,
            enabled,
            window_size,
            window: VecDeque::with_capacity(window_size + 1),
        }
    }

    pub fn apply(&mut self, raw: f64) -> f64 {
        let calibrated = raw + self.offset;
        if !self.enabled {
            return calibrated;
        }

        self.window.push_back(calibrated);
        if self.window.len() > self.window_size {
            self.window.pop_front();
        }

        if self.window.len() >= self.window_size {
            let average = self.window.iter().sum::<f64>() / self.window.len() as f64;
            debug!(
                "Filtered temperature over {} samples: {:.2}°C",
                self.window.len(),
                average
            );
            average
        } else {
            calibrated
        }
    }

    pub fn samples(&self) -> usize {
        self.window.len()
    }

    pub fn reset(&mut self) {
        self.window.clear();
    }
}
