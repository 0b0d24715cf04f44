// Host-side interfaces the Finch driver is generic over
//
// SPI and delays come straight from embedded-hal 1.0. Control lines, the
// millisecond clock and the host's inertial sensors get small local traits
// because embedded-hal has no vocabulary for them.

use std::time::Instant;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, Error as _, OutputPin};
use embedded_hal::spi::{MODE_0, Mode, SpiBus};

use crate::config::BUS_FREQUENCY_HZ;

/// SPI parameters applied during power-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub frequency_hz: u32,
    pub word_bits: u8,
    pub mode: Mode,
}

impl BusConfig {
    /// 1 MHz, 8-bit words, mode 0 (clock idle low, sample on leading edge)
    pub const FINCH: BusConfig = BusConfig {
        frequency_hz: BUS_FREQUENCY_HZ,
        word_bits: 8,
        mode: MODE_0,
    };
}

/// Full-duplex SPI bus that can be (re)configured at runtime.
///
/// Most HALs fix the bus parameters when the peripheral is built; those can
/// implement `configure` as a check that the existing setup matches.
pub trait FinchSpi: SpiBus<u8> {
    fn configure(&mut self, config: &BusConfig) -> Result<(), Self::Error>;
}

/// Digital lines the driver toggles around power-up and each exchange.
pub trait ControlLines {
    /// Pull the auxiliary power pin low before the reset pulse
    fn power_down(&mut self) -> Result<(), digital::ErrorKind>;
    fn set_reset(&mut self, high: bool) -> Result<(), digital::ErrorKind>;
    /// Assert chip-select (active low)
    fn select(&mut self) -> Result<(), digital::ErrorKind>;
    /// Release chip-select (idle high)
    fn deselect(&mut self) -> Result<(), digital::ErrorKind>;
    /// Host-side "ready" feedback once the robot is initialised
    fn signal_ready(&mut self) -> Result<(), digital::ErrorKind>;
}

/// `ControlLines` built from four plain output pins.
pub struct GpioLines<CS, RST, PWR, LED> {
    pub chip_select: CS,
    pub reset: RST,
    pub power: PWR,
    pub ready_led: LED,
}

impl<CS, RST, PWR, LED> ControlLines for GpioLines<CS, RST, PWR, LED>
where
    CS: OutputPin,
    RST: OutputPin,
    PWR: OutputPin,
    LED: OutputPin,
{
    fn power_down(&mut self) -> Result<(), digital::ErrorKind> {
        self.power.set_low().map_err(|e| e.kind())
    }

    fn set_reset(&mut self, high: bool) -> Result<(), digital::ErrorKind> {
        if high {
            self.reset.set_high().map_err(|e| e.kind())
        } else {
            self.reset.set_low().map_err(|e| e.kind())
        }
    }

    fn select(&mut self) -> Result<(), digital::ErrorKind> {
        self.chip_select.set_low().map_err(|e| e.kind())
    }

    fn deselect(&mut self) -> Result<(), digital::ErrorKind> {
        self.chip_select.set_high().map_err(|e| e.kind())
    }

    fn signal_ready(&mut self) -> Result<(), digital::ErrorKind> {
        self.ready_led.set_high().map_err(|e| e.kind())
    }
}

/// Monotonic millisecond clock
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Wall clock measured from construction
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Blocking delay backed by `std::thread::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(ns as u64));
    }
}

/// Raw samples from the host board's accelerometer and magnetometer, in the
/// host's own frame (accelerometer in milli-g).
pub trait InertialSensor {
    fn acceleration(&mut self) -> [i32; 3];
    fn magnetic_field(&mut self) -> [i32; 3];
    /// Host gesture detector's shake flag
    fn is_shaking(&mut self) -> bool;
}
