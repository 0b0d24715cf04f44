// Simulated Finch peripheral
//
// Answers SPI frames the way the robot does: the response to every frame is
// the sensor state *before* the command is applied. Time is either virtual
// (delays advance it instantly, used by tests) or the wall clock.
//
// All handles share one state, so a test can hand the bus, lines, delay,
// clock and IMU to the driver and still inspect what happened.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital;
use embedded_hal::spi::{self, ErrorType, SpiBus};

use crate::finch::actuator::Rgb;
use crate::finch::driver::Finch;
use crate::finch::hal::{BusConfig, Clock, ControlLines, FinchSpi, InertialSensor};
use crate::finch::protocol::{FRAME_LEN, Opcode};
use crate::finch::telemetry::Side;

/// Encoder counts per millisecond for each unit of velocity byte
const COUNTS_PER_MS_PER_VELOCITY: f64 = 0.04;

/// Frames and line events kept for inspection; oldest are discarded first
pub const HISTORY_LIMIT: usize = 1024;

fn push_bounded<T>(log: &mut VecDeque<T>, item: T) {
    if log.len() == HISTORY_LIMIT {
        log.pop_front();
    }
    log.push_back(item);
}

/// Control-line activity, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    PowerDown,
    Reset(bool),
    Select,
    Deselect,
    Ready,
}

/// Injected transfer failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimFault;

impl spi::Error for SimFault {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

struct SimState {
    origin: Option<Instant>,
    virtual_ns: u64,

    bus_config: Option<BusConfig>,
    chip_select_high: bool,
    fail_next: bool,
    frames: VecDeque<[u8; FRAME_LEN]>,
    line_events: VecDeque<LineEvent>,
    ready_signalled: bool,

    firmware: u8,
    distance_raw: u16,
    light: [u8; 2],
    line: [u8; 2],
    battery_raw: u8,
    encoder_counts: [f64; 2],
    velocity: [i32; 2],
    moving_until_ns: Option<u64>,
    last_update_ns: u64,
    beak: Rgb,
    tail: [Rgb; 4],

    acceleration: [i32; 3],
    magnetic_field: [i32; 3],
    shaking: bool,
}

impl SimState {
    fn new(origin: Option<Instant>) -> Self {
        Self {
            origin,
            virtual_ns: 0,
            bus_config: None,
            chip_select_high: false,
            fail_next: false,
            frames: VecDeque::with_capacity(HISTORY_LIMIT),
            line_events: VecDeque::with_capacity(HISTORY_LIMIT),
            ready_signalled: false,
            firmware: 1,
            // ~50 cm
            distance_raw: 544,
            light: [20, 20],
            // bright surface, no line
            line: [6, 6],
            battery_raw: 100,
            encoder_counts: [0.0; 2],
            velocity: [0; 2],
            moving_until_ns: None,
            last_update_ns: 0,
            beak: Rgb::OFF,
            tail: [Rgb::OFF; 4],
            // resting level on a table
            acceleration: [0, 643, -766],
            magnetic_field: [0, -30, 0],
            shaking: false,
        }
    }

    fn now_ns(&self) -> u64 {
        match self.origin {
            Some(origin) => origin.elapsed().as_nanos() as u64,
            None => self.virtual_ns,
        }
    }

    fn side_index(side: Side) -> usize {
        match side {
            Side::Left => 0,
            Side::Right => 1,
        }
    }

    /// Integrate wheel motion up to now, ending timed moves that have finished
    fn advance_motion(&mut self) {
        let now = self.now_ns();
        let mut until = now;
        let finished = matches!(self.moving_until_ns, Some(end) if end <= now);
        if let (true, Some(end)) = (finished, self.moving_until_ns) {
            until = end.max(self.last_update_ns);
        }

        let dt_ms = until.saturating_sub(self.last_update_ns) as f64 / 1e6;
        for (counts, &v) in self.encoder_counts.iter_mut().zip(&self.velocity) {
            *counts += v as f64 * COUNTS_PER_MS_PER_VELOCITY * dt_ms;
        }
        self.last_update_ns = now;

        if finished {
            self.velocity = [0; 2];
            self.moving_until_ns = None;
        }
    }

    fn telemetry(&self) -> [u8; FRAME_LEN] {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = self.firmware;
        bytes[2..4].copy_from_slice(&self.distance_raw.to_be_bytes());
        bytes[4] = self.light[0];
        bytes[5] = self.light[1];
        bytes[6] = self.line[0] & 0x7F;
        if self.moving_until_ns.is_some() {
            bytes[6] |= 0x80;
        }
        bytes[7] = self.line[1] & 0x7F;
        bytes[8] = self.battery_raw;
        for (i, start) in [9usize, 12].into_iter().enumerate() {
            let raw = (self.encoder_counts[i].round() as i32 as u32).to_be_bytes();
            bytes[start..start + 3].copy_from_slice(&raw[1..]);
        }
        bytes[15] = 0xFF;
        bytes
    }

    fn exchange(&mut self, frame: [u8; FRAME_LEN]) -> [u8; FRAME_LEN] {
        self.advance_motion();
        let response = self.telemetry();
        push_bounded(&mut self.frames, frame);
        self.apply(&frame);
        response
    }

    fn apply(&mut self, frame: &[u8; FRAME_LEN]) {
        let rgb = |b: &[u8]| Rgb::new(b[0], b[1], b[2]);
        match frame[0] {
            op if op == Opcode::Stop as u8 => {
                self.velocity = [0; 2];
                self.moving_until_ns = None;
                self.beak = Rgb::OFF;
                self.tail = [Rgb::OFF; 4];
            }
            op if op == Opcode::ResetEncoders as u8 => {
                self.encoder_counts = [0.0; 2];
            }
            op if op == Opcode::SetAllLeds as u8 => {
                self.beak = rgb(&frame[1..4]);
                for (i, chunk) in frame[4..16].chunks_exact(3).enumerate() {
                    self.tail[i] = rgb(chunk);
                }
            }
            op if op == Opcode::SetLed as u8 => {
                let color = rgb(&frame[2..5]);
                match frame[1] {
                    0 => self.beak = color,
                    port @ 1..=4 => self.tail[port as usize - 1] = color,
                    _ => {}
                }
            }
            op if op == Opcode::SetMotors as u8 => {
                let decode = |v: u8| {
                    let magnitude = (v & 0x7F) as i32;
                    if v & 0x80 != 0 { magnitude } else { -magnitude }
                };
                let ticks = |b: &[u8]| (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32;
                self.velocity = [decode(frame[2]), decode(frame[6])];
                let distance = ticks(&frame[3..6]).max(ticks(&frame[7..10]));
                let speed = self.velocity[0].abs().max(self.velocity[1].abs());

                self.moving_until_ns = if distance > 0 && speed > 0 {
                    let ms = distance as f64 / (speed as f64 * COUNTS_PER_MS_PER_VELOCITY);
                    Some(self.now_ns() + (ms * 1e6) as u64)
                } else {
                    None
                };
            }
            _ => {}
        }
    }
}

type Shared = Rc<RefCell<SimState>>;

/// Handle to a simulated robot and its host board
#[derive(Clone)]
pub struct SimFinch {
    state: Shared,
}

impl SimFinch {
    /// Virtual time: delays advance the clock instantly
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState::new(None))),
        }
    }

    /// Wall-clock time: delays really sleep
    pub fn realtime() -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState::new(Some(Instant::now())))),
        }
    }

    pub fn bus(&self) -> SimBus {
        SimBus {
            state: self.state.clone(),
        }
    }

    pub fn lines(&self) -> SimLines {
        SimLines {
            state: self.state.clone(),
        }
    }

    pub fn delay(&self) -> SimDelay {
        SimDelay {
            state: self.state.clone(),
        }
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            state: self.state.clone(),
        }
    }

    pub fn imu(&self) -> SimImu {
        SimImu {
            state: self.state.clone(),
        }
    }

    /// A driver wired to every simulated peripheral
    pub fn driver(&self) -> Finch<SimBus, SimLines, SimDelay, SimClock, SimImu> {
        Finch::new(self.bus(), self.lines(), self.delay(), self.clock(), self.imu())
    }

    pub fn now_ms(&self) -> u64 {
        self.state.borrow().now_ns() / 1_000_000
    }

    /// Move virtual time forward (no effect in realtime mode)
    pub fn advance_ms(&self, ms: u64) {
        self.state.borrow_mut().virtual_ns += ms * 1_000_000;
    }

    pub fn set_firmware(&self, version: u8) {
        self.state.borrow_mut().firmware = version;
    }

    pub fn set_distance_raw(&self, raw: u16) {
        self.state.borrow_mut().distance_raw = raw;
    }

    pub fn set_light(&self, side: Side, raw: u8) {
        self.state.borrow_mut().light[SimState::side_index(side)] = raw;
    }

    pub fn set_line(&self, side: Side, raw: u8) {
        self.state.borrow_mut().line[SimState::side_index(side)] = raw;
    }

    pub fn set_battery_raw(&self, raw: u8) {
        self.state.borrow_mut().battery_raw = raw;
    }

    pub fn set_encoder_counts(&self, side: Side, counts: i32) {
        self.state.borrow_mut().encoder_counts[SimState::side_index(side)] = counts as f64;
    }

    /// Raw host accelerometer sample (milli-g, host frame)
    pub fn set_acceleration(&self, raw: [i32; 3]) {
        self.state.borrow_mut().acceleration = raw;
    }

    pub fn set_magnetic_field(&self, raw: [i32; 3]) {
        self.state.borrow_mut().magnetic_field = raw;
    }

    pub fn set_shaking(&self, shaking: bool) {
        self.state.borrow_mut().shaking = shaking;
    }

    /// Make the next SPI transfer fail
    pub fn fail_next_transfer(&self) {
        self.state.borrow_mut().fail_next = true;
    }

    /// The last `HISTORY_LIMIT` frames the robot received, oldest first
    pub fn frames(&self) -> Vec<[u8; FRAME_LEN]> {
        self.state.borrow().frames.iter().copied().collect()
    }

    pub fn clear_frames(&self) {
        self.state.borrow_mut().frames.clear();
    }

    pub fn line_events(&self) -> Vec<LineEvent> {
        self.state.borrow().line_events.iter().copied().collect()
    }

    pub fn clear_line_events(&self) {
        self.state.borrow_mut().line_events.clear();
    }

    pub fn chip_select_high(&self) -> bool {
        self.state.borrow().chip_select_high
    }

    pub fn bus_config(&self) -> Option<BusConfig> {
        self.state.borrow().bus_config
    }

    pub fn ready_signalled(&self) -> bool {
        self.state.borrow().ready_signalled
    }

    pub fn beak(&self) -> Rgb {
        self.state.borrow().beak
    }

    /// Tail LED color, position 1-4
    pub fn tail(&self, position: usize) -> Rgb {
        self.state.borrow().tail[position - 1]
    }

    /// Signed velocity bytes currently applied to (left, right)
    pub fn wheel_velocity(&self) -> (i32, i32) {
        let mut state = self.state.borrow_mut();
        state.advance_motion();
        (state.velocity[0], state.velocity[1])
    }
}

impl Default for SimFinch {
    fn default() -> Self {
        Self::new()
    }
}

/// SPI side of the simulated robot
pub struct SimBus {
    state: Shared,
}

impl ErrorType for SimBus {
    type Error = SimFault;
}

impl SpiBus<u8> for SimBus {
    fn read(&mut self, words: &mut [u8]) -> Result<(), SimFault> {
        words.fill(0);
        Ok(())
    }

    fn write(&mut self, words: &[u8]) -> Result<(), SimFault> {
        let mut read = vec![0u8; words.len()];
        self.transfer(&mut read, words)
    }

    fn transfer(&mut self, read: &mut [u8], write: &[u8]) -> Result<(), SimFault> {
        let mut state = self.state.borrow_mut();
        if state.fail_next {
            state.fail_next = false;
            return Err(SimFault);
        }

        read.fill(0);
        // The robot only listens while selected, and only to whole frames
        if state.chip_select_high || write.len() != FRAME_LEN {
            return Ok(());
        }
        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(write);
        let response = state.exchange(frame);
        let n = read.len().min(FRAME_LEN);
        read[..n].copy_from_slice(&response[..n]);
        Ok(())
    }

    fn transfer_in_place(&mut self, words: &mut [u8]) -> Result<(), SimFault> {
        let write = words.to_vec();
        self.transfer(words, &write)
    }

    fn flush(&mut self) -> Result<(), SimFault> {
        Ok(())
    }
}

impl FinchSpi for SimBus {
    fn configure(&mut self, config: &BusConfig) -> Result<(), SimFault> {
        self.state.borrow_mut().bus_config = Some(*config);
        Ok(())
    }
}

/// Power, reset, chip-select and ready-indicator lines
pub struct SimLines {
    state: Shared,
}

impl SimLines {
    fn record(&mut self, event: LineEvent) {
        push_bounded(&mut self.state.borrow_mut().line_events, event);
    }
}

impl ControlLines for SimLines {
    fn power_down(&mut self) -> Result<(), digital::ErrorKind> {
        self.record(LineEvent::PowerDown);
        Ok(())
    }

    fn set_reset(&mut self, high: bool) -> Result<(), digital::ErrorKind> {
        self.record(LineEvent::Reset(high));
        Ok(())
    }

    fn select(&mut self) -> Result<(), digital::ErrorKind> {
        self.state.borrow_mut().chip_select_high = false;
        self.record(LineEvent::Select);
        Ok(())
    }

    fn deselect(&mut self) -> Result<(), digital::ErrorKind> {
        self.state.borrow_mut().chip_select_high = true;
        self.record(LineEvent::Deselect);
        Ok(())
    }

    fn signal_ready(&mut self) -> Result<(), digital::ErrorKind> {
        self.state.borrow_mut().ready_signalled = true;
        self.record(LineEvent::Ready);
        Ok(())
    }
}

/// Delay that advances virtual time, or sleeps in realtime mode
pub struct SimDelay {
    state: Shared,
}

impl SimDelay {
    fn wait(&mut self, ns: u64) {
        let realtime = self.state.borrow().origin.is_some();
        if realtime {
            std::thread::sleep(Duration::from_nanos(ns));
        } else {
            self.state.borrow_mut().virtual_ns += ns;
        }
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.wait(ns as u64);
    }

    fn delay_us(&mut self, us: u32) {
        self.wait(us as u64 * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.wait(ms as u64 * 1_000_000);
    }
}

pub struct SimClock {
    state: Shared,
}

impl Clock for SimClock {
    fn now_ms(&self) -> u64 {
        self.state.borrow().now_ns() / 1_000_000
    }
}

/// Host accelerometer/magnetometer as set on the `SimFinch`
pub struct SimImu {
    state: Shared,
}

impl InertialSensor for SimImu {
    fn acceleration(&mut self) -> [i32; 3] {
        self.state.borrow().acceleration
    }

    fn magnetic_field(&mut self) -> [i32; 3] {
        self.state.borrow().magnetic_field
    }

    fn is_shaking(&mut self) -> bool {
        self.state.borrow().shaking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(sim: &SimFinch) {
        sim.lines().select().unwrap();
    }

    #[test]
    fn test_ignores_transfers_while_deselected() {
        let sim = SimFinch::new();
        sim.lines().deselect().unwrap();
        let mut read = [0xAAu8; FRAME_LEN];
        sim.bus().transfer(&mut read, &[0xD4; FRAME_LEN]).unwrap();
        assert!(sim.frames().is_empty());
        assert_eq!(read, [0u8; FRAME_LEN]);
    }

    #[test]
    fn test_response_precedes_command() {
        let sim = SimFinch::new();
        sim.set_encoder_counts(Side::Left, 100);
        select(&sim);

        let mut reset = [0xFFu8; FRAME_LEN];
        reset[0] = Opcode::ResetEncoders as u8;
        let mut read = [0u8; FRAME_LEN];
        sim.bus().transfer(&mut read, &reset).unwrap();
        // counts before the reset
        assert_eq!(read[11], 100);

        let mut poll = [0xFFu8; FRAME_LEN];
        poll[0] = Opcode::Poll as u8;
        sim.bus().transfer(&mut read, &poll).unwrap();
        assert_eq!(&read[9..12], &[0, 0, 0]);
    }

    #[test]
    fn test_timed_move_finishes_and_counts() {
        let sim = SimFinch::new();
        select(&sim);
        // 100 ticks forward at velocity 10 -> 250 ms
        let mut frame = [0xFFu8; FRAME_LEN];
        frame[..10].copy_from_slice(&[0xD2, 0xFF, 0x8A, 0, 0, 100, 0x8A, 0, 0, 100]);
        let mut read = [0u8; FRAME_LEN];
        sim.bus().transfer(&mut read, &frame).unwrap();

        sim.advance_ms(100);
        assert_eq!(sim.wheel_velocity(), (10, 10));
        sim.advance_ms(200);
        assert_eq!(sim.wheel_velocity(), (0, 0));

        let mut poll = [0xFFu8; FRAME_LEN];
        poll[0] = Opcode::Poll as u8;
        sim.bus().transfer(&mut read, &poll).unwrap();
        assert_eq!(read[6] & 0x80, 0);
        assert_eq!(read[11], 100);
    }

    #[test]
    fn test_history_is_bounded() {
        let sim = SimFinch::new();
        let mut lines = sim.lines();
        let mut bus = sim.bus();
        let mut read = [0u8; FRAME_LEN];
        for i in 0..HISTORY_LIMIT + 10 {
            lines.select().unwrap();
            let mut frame = [0xFFu8; FRAME_LEN];
            frame[0] = Opcode::Poll as u8;
            frame[1] = i as u8;
            bus.transfer(&mut read, &frame).unwrap();
            lines.deselect().unwrap();
        }

        let frames = sim.frames();
        assert_eq!(frames.len(), HISTORY_LIMIT);
        // oldest ten were discarded
        assert_eq!(frames[0][1], 10);
        assert_eq!(frames.last().unwrap()[1], (HISTORY_LIMIT + 9) as u8);
        assert_eq!(sim.line_events().len(), HISTORY_LIMIT);
        assert_eq!(sim.line_events().last(), Some(&LineEvent::Deselect));
    }

    #[test]
    fn test_negative_counts_wrap_to_24_bits() {
        let sim = SimFinch::new();
        sim.set_encoder_counts(Side::Right, -1);
        sim.set_firmware(7);
        select(&sim);
        let mut read = [0u8; FRAME_LEN];
        sim.bus().transfer(&mut read, &[0xD4; FRAME_LEN]).unwrap();
        assert_eq!(read[0], 7);
        assert_eq!(&read[12..15], &[0xFF, 0xFF, 0xFF]);
    }
}
