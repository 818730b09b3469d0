//! Output drivers for the LED strip.

use super::LedError;
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::debug;

pub type Rgb = (u8, u8, u8);

pub trait LedDriver: Send {
    fn write(&mut self, pixels: &[Rgb]) -> Result<(), LedError>;
}

/// Keeps the last frame and logs it. Used where no strip is attached.
#[derive(Debug, Default)]
pub struct LogDriver {
    frames_written: usize,
    last_frame: Vec<Rgb>,
}

impl LogDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_frame(&self) -> &[Rgb] {
        &self.last_frame
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }
}

impl LedDriver for LogDriver {
    fn write(&mut self, pixels: &[Rgb]) -> Result<(), LedError> {
        debug!("LED frame: {:?}", pixels);
        self.last_frame = pixels.to_vec();
        self.frames_written += 1;
        Ok(())
    }
}

/// SPI clock giving three SPI bits per WS2812 bit at 800kHz
const WS2812_SPI_CLOCK_HZ: u32 = 2_400_000;
/// Low time after a frame so the strip latches (>280µs for WS2812B)
const LATCH_BYTES: usize = 90;

/// WS2812 strip driven from the SPI MOSI line.
pub struct Ws2812Spi {
    spi: Spi,
}

impl Ws2812Spi {
    pub fn open(bus: u8, slave_select: u8) -> Result<Self, LedError> {
        let bus = match bus {
            0 => Bus::Spi0,
            1 => Bus::Spi1,
            2 => Bus::Spi2,
            3 => Bus::Spi3,
            4 => Bus::Spi4,
            5 => Bus::Spi5,
            6 => Bus::Spi6,
            other => return Err(LedError::InvalidSpiBus(other)),
        };
        let slave_select = match slave_select {
            0 => SlaveSelect::Ss0,
            1 => SlaveSelect::Ss1,
            2 => SlaveSelect::Ss2,
            other => return Err(LedError::InvalidSlaveSelect(other)),
        };
        let spi = Spi::new(bus, slave_select, WS2812_SPI_CLOCK_HZ, Mode::Mode0)?;
        Ok(Self { spi })
    }
}

impl LedDriver for Ws2812Spi {
    fn write(&mut self, pixels: &[Rgb]) -> Result<(), LedError> {
        let frame = encode_ws2812(pixels);
        self.spi.write(&frame)?;
        Ok(())
    }
}

/// Encodes pixels as GRB with each data bit expanded to `110` (one) or `100` (zero),
/// followed by the latch.
pub fn encode_ws2812(pixels: &[Rgb]) -> Vec<u8> {
    let mut out = Vec::with_capacity(pixels.len() * 9 + LATCH_BYTES);
    let mut acc: u32 = 0;
    let mut bits = 0;

    for &(r, g, b) in pixels {
        for byte in [g, r, b] {
            for i in (0..8).rev() {
                let symbol = if byte & (1 << i) != 0 { 0b110 } else { 0b100 };
                acc = (acc << 3) | symbol;
                bits += 3;
                while bits >= 8 {
                    bits -= 8;
                    out.push((acc >> bits) as u8);
                }
            }
        }
    }
    // 24 bits per pixel times 3 is always a whole number of bytes
    debug_assert_eq!(bits, 0);

    out.extend(std::iter::repeat(0u8).take(LATCH_BYTES));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_zero_and_one_bits() {
        let frame = encode_ws2812(&[(0, 0, 0)]);
        assert_eq!(frame.len(), 9 + LATCH_BYTES);
        assert_eq!(&frame[..9], &[0x92, 0x49, 0x24, 0x92, 0x49, 0x24, 0x92, 0x49, 0x24]);
        assert!(frame[9..].iter().all(|&b| b == 0));

        let white = encode_ws2812(&[(255, 255, 255)]);
        assert_eq!(&white[..3], &[0xDB, 0x6D, 0xB6]);
    }

    #[test]
    fn sends_green_first() {
        let frame = encode_ws2812(&[(0, 255, 0)]);
        assert_eq!(&frame[..3], &[0xDB, 0x6D, 0xB6]);
        assert_eq!(&frame[3..6], &[0x92, 0x49, 0x24]);
    }

    #[test]
    fn log_driver_records_frames() {
        let mut driver = LogDriver::new();
        driver.write(&[(1, 2, 3), (4, 5, 6)]).unwrap();
        assert_eq!(driver.last_frame(), &[(1, 2, 3), (4, 5, 6)]);
        assert_eq!(driver.frames_written(), 1);
    }
}
