//! RGB status LED controlled over MQTT.

pub mod driver;
pub mod state;

pub use driver::{LedDriver, LogDriver, Rgb, Ws2812Spi};
pub use state::{CommandError, ControlCommand, LedState};

use crate::config::{LedDriverKind, LedSettings};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum LedError {
    #[error("SPI error: {0}")]
    Spi(#[from] rppal::spi::Error),

    #[error("Unsupported SPI bus {0}")]
    InvalidSpiBus(u8),

    #[error("Unsupported SPI slave select {0}")]
    InvalidSlaveSelect(u8),

    #[error("LED strip not initialized")]
    NotInitialized,
}

pub struct LedStrip {
    driver: Box<dyn LedDriver>,
    num_leds: usize,
    state: LedState,
    initialized: bool,
}

impl LedStrip {
    pub fn new(driver: Box<dyn LedDriver>, num_leds: usize, state: LedState) -> Self {
        Self {
            driver,
            num_leds,
            state,
            initialized: false,
        }
    }

    pub fn from_settings(settings: &LedSettings) -> Result<Self, LedError> {
        let driver: Box<dyn LedDriver> = match settings.driver {
            LedDriverKind::Log => Box::new(LogDriver::new()),
            LedDriverKind::Spi => Box::new(Ws2812Spi::open(
                settings.spi_bus,
                settings.spi_slave_select,
            )?),
        };
        Ok(Self::new(
            driver,
            settings.num_leds,
            LedState::new(settings.default_color, settings.default_brightness),
        ))
    }

    /// Switches every LED off and marks the strip ready.
    pub fn init(&mut self) -> Result<(), LedError> {
        info!("Initializing {} LED(s)", self.num_leds);
        self.fill((0, 0, 0))?;
        self.initialized = true;
        Ok(())
    }

    pub fn state(&self) -> LedState {
        self.state
    }

    /// Updates the state and rewrites the strip only when something changed.
    pub fn apply_command(&mut self, command: &ControlCommand) -> Result<bool, LedError> {
        if !self.state.apply(command) {
            debug!("LED state unchanged");
            return Ok(false);
        }
        self.refresh()?;
        Ok(true)
    }

    pub fn refresh(&mut self) -> Result<(), LedError> {
        if !self.initialized {
            return Err(LedError::NotInitialized);
        }
        let color = self.state.scaled();
        debug!(
            "Setting LED colour R={} G={} B={} (brightness {})",
            color.0, color.1, color.2, self.state.brightness
        );
        self.fill(color)
    }

    pub fn turn_off(&mut self) -> Result<(), LedError> {
        if !self.initialized {
            debug!("LED strip not initialized, nothing to switch off");
            return Ok(());
        }
        self.fill((0, 0, 0))
    }

    fn fill(&mut self, color: Rgb) -> Result<(), LedError> {
        let pixels = vec![color; self.num_leds];
        self.driver.write(&pixels)
    }
}
