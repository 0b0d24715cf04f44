// Finch SPI command/response protocol
//
// Every exchange is exactly 16 bytes in each direction: the host sends
// [opcode, payload..., filler...] and simultaneously clocks in the latest
// sensor frame. Chip-select is toggled by hand around each exchange.

use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital;
use embedded_hal::spi::{self, Error as _};
use tracing::{debug, info, warn};

use super::hal::{BusConfig, Clock, ControlLines, FinchSpi};
use super::telemetry::Snapshot;
use crate::config::{
    BOOT_WAIT, CS_SETTLE_DELAY_US, GATE_RETRIES, GATE_RETRY_INTERVAL, POST_EXCHANGE_DELAY_US,
    PRE_EXCHANGE_DELAY_US, RESET_PULSE, TELEMETRY_MAX_AGE_MS,
};

/// Bytes per frame, both directions
pub const FRAME_LEN: usize = 16;

/// Default padding for unused frame bytes
pub const FILLER: u8 = 0xFF;

/// Command set
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    SetAllLeds = 0xD0,
    SetMotors = 0xD2,
    SetLed = 0xD3,
    Poll = 0xD4,
    ResetEncoders = 0xD5,
    Stop = 0xDF,
}

/// Error types for Finch communication and argument checking
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FinchError {
    #[error("Invalid {param} {value:?}: expected {accepted}")]
    InvalidArgument {
        param: &'static str,
        value: String,
        accepted: &'static str,
    },

    #[error("Frame of {len} bytes exceeds the 16-byte limit")]
    FrameTooLong { len: usize },

    #[error("SPI error: {0}")]
    Spi(spi::ErrorKind),

    #[error("Control line error: {0}")]
    Pin(digital::ErrorKind),

    #[error("Compass heading undefined: accelerometer reading is degenerate")]
    CompassUndefined,
}

impl FinchError {
    pub fn invalid_argument(
        param: &'static str,
        value: impl std::fmt::Display,
        accepted: &'static str,
    ) -> Self {
        FinchError::InvalidArgument {
            param,
            value: value.to_string(),
            accepted,
        }
    }
}

impl From<digital::ErrorKind> for FinchError {
    fn from(kind: digital::ErrorKind) -> Self {
        FinchError::Pin(kind)
    }
}

pub type Result<T> = std::result::Result<T, FinchError>;

/// Whether a command actually went out on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// The bus never became ready; nothing was transmitted
    Dropped,
}

/// Pad a command to a full frame
pub fn build_frame(bytes: &[u8], filler: u8) -> Result<[u8; FRAME_LEN]> {
    if bytes.len() > FRAME_LEN {
        return Err(FinchError::FrameTooLong { len: bytes.len() });
    }
    let mut frame = [filler; FRAME_LEN];
    frame[..bytes.len()].copy_from_slice(bytes);
    Ok(frame)
}

/// Restores the readiness flag however the exchange ends
struct BusyGuard<'a> {
    ready: &'a mut bool,
}

impl<'a> BusyGuard<'a> {
    fn acquire(ready: &'a mut bool) -> Self {
        *ready = false;
        Self { ready }
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        *self.ready = true;
    }
}

/// Finch bus - owns the SPI link, control lines and telemetry cache
pub struct FinchBus<SPI, L, D, C> {
    spi: SPI,
    lines: L,
    delay: D,
    clock: C,
    ready: bool,
    snapshot: Snapshot,
}

impl<SPI, L, D, C> FinchBus<SPI, L, D, C>
where
    SPI: FinchSpi,
    L: ControlLines,
    D: DelayNs,
    C: Clock,
{
    /// Wrap the host peripherals. The bus stays not-ready until `power_up`.
    pub fn new(spi: SPI, lines: L, delay: D, clock: C) -> Self {
        Self {
            spi,
            lines,
            delay,
            clock,
            ready: false,
            snapshot: Snapshot::default(),
        }
    }

    /// Pulse reset, wait for the robot to boot, configure SPI and open the gate
    pub fn power_up(&mut self) -> Result<()> {
        info!("Powering up Finch");
        self.lines.power_down()?;
        self.lines.set_reset(true)?;
        self.pause(RESET_PULSE);
        self.lines.set_reset(false)?;
        self.pause(BOOT_WAIT);

        self.lines.deselect()?;
        self.spi
            .configure(&BusConfig::FINCH)
            .map_err(|e| FinchError::Spi(e.kind()))?;
        debug!("SPI configured: {:?}", BusConfig::FINCH);

        self.ready = true;
        Ok(())
    }

    /// True when no exchange is in flight and the bus has been powered up
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Send a command padded with 0xFF
    pub fn send_command(&mut self, bytes: &[u8]) -> Result<Delivery> {
        self.send_command_with_filler(bytes, FILLER)
    }

    /// Send a command padded with `filler`.
    ///
    /// Commands that cannot get the bus within the gate window are dropped
    /// silently (logged, reported as `Delivery::Dropped`).
    pub fn send_command_with_filler(&mut self, bytes: &[u8], filler: u8) -> Result<Delivery> {
        let frame = build_frame(bytes, filler)?;

        if !self.wait_until_ready() {
            warn!(
                "Bus not ready after {} attempts, dropping command 0x{:02X}",
                GATE_RETRIES, frame[0]
            );
            return Ok(Delivery::Dropped);
        }

        let Self {
            spi,
            lines,
            delay,
            clock,
            ready,
            snapshot,
        } = self;
        let _busy = BusyGuard::acquire(ready);

        delay.delay_us(PRE_EXCHANGE_DELAY_US);
        lines.select()?;
        delay.delay_us(CS_SETTLE_DELAY_US);

        let mut response = [0u8; FRAME_LEN];
        let transferred = spi.transfer(&mut response, &frame).and_then(|_| spi.flush());
        delay.delay_us(POST_EXCHANGE_DELAY_US);
        if transferred.is_ok() {
            *snapshot = Snapshot::new(response, clock.now_ms());
        }
        delay.delay_us(CS_SETTLE_DELAY_US);
        lines.deselect()?;

        transferred.map_err(|e| FinchError::Spi(e.kind()))?;
        debug!("Sent {:02X?}, received {:02X?}", frame, response);
        Ok(Delivery::Sent)
    }

    /// Latest telemetry, polling first if the cache is older than 10 ms
    pub fn telemetry(&mut self) -> Result<Snapshot> {
        if self.snapshot.age_ms(self.clock.now_ms()) > TELEMETRY_MAX_AGE_MS {
            self.send_command(&[Opcode::Poll as u8])?;
        }
        Ok(self.snapshot)
    }

    /// Last stored telemetry without touching the bus
    pub fn cached_telemetry(&self) -> Snapshot {
        self.snapshot
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn pause(&mut self, duration: Duration) {
        self.delay.delay_ms(duration.as_millis() as u32);
    }

    pub fn lines_mut(&mut self) -> &mut L {
        &mut self.lines
    }

    fn wait_until_ready(&mut self) -> bool {
        let mut attempts = 0;
        while !self.ready && attempts < GATE_RETRIES {
            self.pause(GATE_RETRY_INTERVAL);
            attempts += 1;
        }
        self.ready
    }
}
