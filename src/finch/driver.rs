// High-level driver for the Finch robot
//
// Combines the SPI protocol, actuator encodings, telemetry decoders and the
// orientation math behind one owned handle.

use embedded_hal::delay::DelayNs;
use tracing::{debug, info, warn};

use super::actuator::{
    BEAK_PORT, MotorCommand, MoveDirection, Rgb, TailLed, TurnDirection, all_leds_payload,
    angle_to_ticks, convert_speed, distance_to_ticks, single_led_payload,
};
use super::hal::{Clock, ControlLines, FinchSpi, InertialSensor};
use super::orientation::{
    self, Axis, Orientation, SensorKind, Vector3, acceleration_mps2, finch_acceleration,
    finch_magnetic_field,
};
use super::protocol::{Delivery, FinchBus, FinchError, Opcode, Result};
use super::telemetry::{Side, Snapshot};
use crate::config::{
    ENCODER_RESET_SETTLE, MOTION_POLL_INTERVAL, MOTION_START_DELAY, MOTION_STOP_SETTLE,
};
use crate::messages::SensorReport;

/// Default speed for timed moves and turns, in percent
pub const DEFAULT_SPEED: i32 = 50;

/// One Finch on one SPI bus
pub struct Finch<SPI, L, D, C, IMU>
where
    SPI: FinchSpi,
    L: ControlLines,
    D: DelayNs,
    C: Clock,
    IMU: InertialSensor,
{
    bus: FinchBus<SPI, L, D, C>,
    imu: IMU,
    beak: Rgb,
    started: bool,
}

impl<SPI, L, D, C, IMU> Finch<SPI, L, D, C, IMU>
where
    SPI: FinchSpi,
    L: ControlLines,
    D: DelayNs,
    C: Clock,
    IMU: InertialSensor,
{
    pub fn new(spi: SPI, lines: L, delay: D, clock: C, imu: IMU) -> Self {
        Self {
            bus: FinchBus::new(spi, lines, delay, clock),
            imu,
            beak: Rgb::OFF,
            started: false,
        }
    }

    /// Power up and bring the robot to a known idle state.
    ///
    /// Must run once before anything else; commands issued earlier wait out
    /// the gate window and are dropped.
    pub fn start(&mut self) -> Result<()> {
        self.bus.power_up()?;
        self.started = true;
        self.stop()?;
        self.reset_encoders()?;
        self.bus.send_command(&[Opcode::Poll as u8])?;
        self.bus.lines_mut().signal_ready()?;
        info!("Finch ready");
        Ok(())
    }

    /// Stop motors and turn off every LED
    pub fn stop(&mut self) -> Result<Delivery> {
        debug!("Stopping all actions");
        self.bus.send_command(&[Opcode::Stop as u8])
    }

    /// Zero both rotation counters
    pub fn reset_encoders(&mut self) -> Result<Delivery> {
        let delivery = self.bus.send_command(&[Opcode::ResetEncoders as u8])?;
        self.bus.pause(ENCODER_RESET_SETTLE);
        Ok(delivery)
    }

    /// Set the beak color from 0–100 % intensities
    pub fn set_beak(&mut self, red: i32, green: i32, blue: i32) -> Result<Delivery> {
        self.beak = Rgb::from_percent(red, green, blue);
        self.send_single_led(BEAK_PORT, self.beak)
    }

    /// Set one tail LED (port 1–4) or all of them (port 5)
    pub fn set_tail(&mut self, port: u8, red: i32, green: i32, blue: i32) -> Result<Delivery> {
        let color = Rgb::from_percent(red, green, blue);
        match TailLed::from_port(port)? {
            TailLed::Single(port) => self.send_single_led(port, color),
            TailLed::All => {
                let mut cmd = [0u8; 16];
                cmd[0] = Opcode::SetAllLeds as u8;
                cmd[1..].copy_from_slice(&all_leds_payload(self.beak, color));
                self.bus.send_command(&cmd)
            }
        }
    }

    /// Current beak color as stored by the last `set_beak`
    pub fn beak(&self) -> Rgb {
        self.beak
    }

    fn send_single_led(&mut self, port: u8, color: Rgb) -> Result<Delivery> {
        let mut cmd = [0u8; 5];
        cmd[0] = Opcode::SetLed as u8;
        cmd[1..].copy_from_slice(&single_led_payload(port, color));
        self.bus.send_command_with_filler(&cmd, 0x00)
    }

    /// Run both wheels continuously at -100..=100 % speed
    pub fn set_motors(&mut self, left_speed: i32, right_speed: i32) -> Result<Delivery> {
        debug!("Setting motors: left={}, right={}", left_speed, right_speed);
        self.send_motors(MotorCommand::continuous(left_speed, right_speed))
    }

    /// Zero velocity on both wheels, LEDs untouched
    pub fn stop_motors(&mut self) -> Result<Delivery> {
        self.send_motors(MotorCommand::halt())
    }

    fn send_motors(&mut self, motors: MotorCommand) -> Result<Delivery> {
        let mut cmd = [0u8; 10];
        cmd[0] = Opcode::SetMotors as u8;
        cmd[1..].copy_from_slice(&motors.payload());
        self.bus.send_command(&cmd)
    }

    /// Drive straight for `distance_cm` and block until the move completes.
    ///
    /// Distances that round to zero ticks return `Sent` immediately without
    /// touching the bus. A dropped motor frame returns `Dropped` without
    /// waiting for motion.
    pub fn set_move(
        &mut self,
        direction: MoveDirection,
        distance_cm: f64,
        speed: i32,
    ) -> Result<Delivery> {
        let ticks = distance_to_ticks(distance_cm);
        if ticks == 0 {
            return Ok(Delivery::Sent);
        }
        let velocity = convert_speed(direction.signed_speed(speed));
        info!("Moving {:?} {} cm ({} ticks)", direction, distance_cm, ticks);
        self.run_timed(MotorCommand {
            left_velocity: velocity,
            left_ticks: ticks,
            right_velocity: velocity,
            right_ticks: ticks,
        })
    }

    /// Turn in place by `degrees` and block until the turn completes
    pub fn set_turn(
        &mut self,
        direction: TurnDirection,
        degrees: f64,
        speed: i32,
    ) -> Result<Delivery> {
        let ticks = angle_to_ticks(degrees);
        if ticks == 0 {
            return Ok(Delivery::Sent);
        }
        let (left, right) = direction.wheel_speeds(speed);
        info!("Turning {:?} {} degrees ({} ticks)", direction, degrees, ticks);
        self.run_timed(MotorCommand {
            left_velocity: convert_speed(left),
            left_ticks: ticks,
            right_velocity: convert_speed(right),
            right_ticks: ticks,
        })
    }

    fn run_timed(&mut self, motors: MotorCommand) -> Result<Delivery> {
        if self.send_motors(motors)? == Delivery::Dropped {
            return Ok(Delivery::Dropped);
        }
        self.wait_for_motion()?;
        Ok(Delivery::Sent)
    }

    /// Block until the robot clears its motion flag, then halt the motors.
    ///
    /// There is no timeout: a robot that never reports completion blocks the
    /// caller indefinitely.
    pub fn wait_for_motion(&mut self) -> Result<()> {
        self.bus.pause(MOTION_START_DELAY);
        while self.is_moving()? {
            self.bus.pause(MOTION_POLL_INTERVAL);
        }
        debug!("Motion complete");
        self.stop_motors()?;
        self.bus.pause(MOTION_STOP_SETTLE);
        Ok(())
    }

    /// Latest telemetry frame, refreshed if stale
    pub fn telemetry(&mut self) -> Result<Snapshot> {
        self.bus.telemetry()
    }

    /// True while a timed move or turn is still running
    pub fn is_moving(&mut self) -> Result<bool> {
        Ok(self.telemetry()?.is_moving())
    }

    /// Obstacle distance in centimeters
    pub fn distance(&mut self) -> Result<u32> {
        Ok(self.telemetry()?.distance_cm())
    }

    /// Line sensor reading in percent
    pub fn line(&mut self, side: Side) -> Result<i32> {
        Ok(self.telemetry()?.line_percent(side))
    }

    /// Light sensor reading in percent, corrected for beak LED bleed
    pub fn light(&mut self, side: Side) -> Result<u8> {
        let beak = self.beak;
        Ok(self.telemetry()?.light_percent(side, beak))
    }

    /// Wheel rotations since the last encoder reset
    pub fn encoder(&mut self, side: Side) -> Result<f64> {
        Ok(self.telemetry()?.encoder_rotations(side))
    }

    /// Battery voltage in millivolts
    pub fn battery(&mut self) -> Result<u32> {
        Ok(self.telemetry()?.battery_mv())
    }

    /// Every decoded sensor from one telemetry frame
    pub fn sensors(&mut self) -> Result<SensorReport> {
        let snap = self.telemetry()?;
        Ok(SensorReport::from_snapshot(&snap, self.beak))
    }

    /// Accelerometer in the Finch frame (milli-g), recomputed on every call
    pub fn acceleration_raw(&mut self) -> Vector3 {
        finch_acceleration(self.imu.acceleration())
    }

    /// Magnetometer in the Finch frame, recomputed on every call
    pub fn magnetic_field_raw(&mut self) -> Vector3 {
        finch_magnetic_field(self.imu.magnetic_field())
    }

    /// One accelerometer axis in m/s^2 (one decimal)
    pub fn accelerometer(&mut self, axis: Axis) -> f64 {
        acceleration_mps2(self.acceleration_raw().component(axis))
    }

    /// One magnetometer axis, rounded
    pub fn magnetometer(&mut self, axis: Axis) -> i32 {
        self.magnetic_field_raw().component(axis).round_ties_even() as i32
    }

    /// One axis of either host sensor, scaled as `accelerometer`/`magnetometer` do
    pub fn inertial(&mut self, kind: SensorKind, axis: Axis) -> f64 {
        match kind {
            SensorKind::Accelerometer => self.accelerometer(axis),
            SensorKind::Magnetometer => self.magnetometer(axis) as f64,
        }
    }

    pub fn is_orientation(&mut self, orientation: Orientation) -> bool {
        let accel = self.acceleration_raw();
        let shaking = orientation == Orientation::Shake && self.imu.is_shaking();
        orientation.holds(&accel, shaking)
    }

    /// Every orientation that currently holds, in reporting order
    pub fn orientations(&mut self) -> Vec<Orientation> {
        let accel = self.acceleration_raw();
        let shaking = self.imu.is_shaking();
        orientation::orientations(&accel, shaking)
    }

    /// Tilt-compensated heading relative to the beak, 0..360 degrees
    pub fn compass(&mut self) -> Result<u16> {
        let accel = self.acceleration_raw();
        let mag = self.magnetic_field_raw();
        orientation::compass_heading(&accel, &mag).ok_or(FinchError::CompassUndefined)
    }
}

impl<SPI, L, D, C, IMU> Drop for Finch<SPI, L, D, C, IMU>
where
    SPI: FinchSpi,
    L: ControlLines,
    D: DelayNs,
    C: Clock,
    IMU: InertialSensor,
{
    fn drop(&mut self) {
        // Try to leave the robot stopped when the driver goes away
        if self.started {
            if let Err(e) = self.stop() {
                warn!("Failed to stop Finch on drop: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimClock, SimDelay, SimFinch, SimImu, SimLines};

    type SimDriver = Finch<SimBus, SimLines, SimDelay, SimClock, SimImu>;

    fn started(sim: &SimFinch) -> SimDriver {
        let mut finch = sim.driver();
        finch.start().unwrap();
        sim.clear_frames();
        finch
    }

    #[test]
    fn test_start_sequence() {
        let sim = SimFinch::new();
        let mut finch = sim.driver();
        finch.start().unwrap();

        let opcodes: Vec<u8> = sim.frames().iter().map(|f| f[0]).collect();
        assert_eq!(opcodes, vec![0xDF, 0xD5, 0xD4]);
        assert!(sim.ready_signalled());
    }

    #[test]
    fn test_beak_frame_uses_zero_filler() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        finch.set_beak(100, 40, 150).unwrap();

        let frame = sim.frames()[0];
        assert_eq!(&frame[..5], &[0xD3, 0, 255, 102, 255]);
        assert!(frame[5..].iter().all(|&b| b == 0x00));
        assert_eq!(finch.beak(), Rgb::new(255, 102, 255));
        assert_eq!(sim.beak(), Rgb::new(255, 102, 255));
    }

    #[test]
    fn test_tail_all_reuses_beak() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        finch.set_beak(100, 0, 0).unwrap();
        finch.set_tail(5, 0, 100, 0).unwrap();

        let frame = sim.frames()[1];
        assert_eq!(
            frame,
            [0xD0, 255, 0, 0, 0, 255, 0, 0, 255, 0, 0, 255, 0, 0, 255, 0]
        );
        assert_eq!(sim.tail(4), Rgb::new(0, 255, 0));
    }

    #[test]
    fn test_tail_single_and_invalid_port() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        finch.set_tail(2, 0, 0, 100).unwrap();
        assert_eq!(&sim.frames()[0][..5], &[0xD3, 2, 0, 0, 255]);

        assert!(matches!(
            finch.set_tail(9, 0, 0, 100),
            Err(FinchError::InvalidArgument { .. })
        ));
        assert_eq!(sim.frames().len(), 1);
    }

    #[test]
    fn test_set_motors_frame() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        finch.set_motors(50, -100).unwrap();

        let frame = sim.frames()[0];
        assert_eq!(
            &frame[..10],
            &[0xD2, 0xFF, 0x80 | 18, 0, 0, 0, 36, 0, 0, 0]
        );
        assert!(frame[10..].iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_zero_distance_and_angle_are_noops() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        let before = sim.now_ms();

        finch.set_move(MoveDirection::Forward, 0.0, 50).unwrap();
        finch.set_turn(TurnDirection::Left, 0.0, 50).unwrap();

        assert!(sim.frames().is_empty());
        assert_eq!(sim.now_ms(), before);
    }

    #[test]
    fn test_move_blocks_until_done_then_halts() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        finch.set_move(MoveDirection::Forward, 10.0, 50).unwrap();

        let frames = sim.frames();
        // 10 cm = 497 ticks = 0x0001F1
        assert_eq!(
            &frames[0][..10],
            &[0xD2, 0xFF, 0x80 | 18, 0x00, 0x01, 0xF1, 0x80 | 18, 0x00, 0x01, 0xF1]
        );
        let polls = frames.iter().filter(|f| f[0] == 0xD4).count();
        assert!(polls >= 2, "expected repeated polling, got {}", polls);

        let last = frames.last().unwrap();
        assert_eq!(&last[..10], &[0xD2, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(!finch.is_moving().unwrap());
    }

    #[test]
    fn test_turn_wheel_directions() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        finch.set_turn(TurnDirection::Right, 90.0, 50).unwrap();

        let frame = sim.frames()[0];
        // 90 degrees = 390 ticks = 0x000186
        assert_eq!(
            &frame[..10],
            &[0xD2, 0xFF, 0x80 | 18, 0x00, 0x01, 0x86, 18, 0x00, 0x01, 0x86]
        );
    }

    #[test]
    fn test_sensor_reads() {
        let sim = SimFinch::new();
        sim.set_distance_raw(544);
        sim.set_line(Side::Left, 6);
        sim.set_line(Side::Right, 127);
        sim.set_light(Side::Right, 30);
        sim.set_battery_raw(100);
        let mut finch = started(&sim);
        // start() zeroes the counters, so set them afterwards
        sim.set_encoder_counts(Side::Left, -792);
        sim.advance_ms(20);

        assert_eq!(finch.distance().unwrap(), 50);
        assert_eq!(finch.line(Side::Left).unwrap(), 100);
        assert_eq!(finch.line(Side::Right).unwrap(), 0);
        assert_eq!(finch.light(Side::Right).unwrap(), 30);
        assert_eq!(finch.battery().unwrap(), 3935);
        assert_eq!(finch.encoder(Side::Left).unwrap(), -1.0);
        // all of the above came from one poll
        assert_eq!(sim.frames().len(), 1);
    }

    #[test]
    fn test_encoder_reset() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        sim.set_encoder_counts(Side::Right, 1584);
        sim.advance_ms(20);
        assert_eq!(finch.encoder(Side::Right).unwrap(), 2.0);

        finch.reset_encoders().unwrap();
        sim.advance_ms(20);
        assert_eq!(finch.encoder(Side::Right).unwrap(), 0.0);
    }

    #[test]
    fn test_orientation_and_compass() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        sim.set_acceleration([0, 643, -766]);
        sim.set_shaking(true);

        assert_eq!(
            finch.orientations(),
            vec![Orientation::Level, Orientation::Shake]
        );
        assert!(finch.is_orientation(Orientation::Level));
        assert!(!finch.is_orientation(Orientation::UpsideDown));
        assert_eq!(finch.accelerometer(Axis::Z), -9.8);
        assert_eq!(finch.inertial(SensorKind::Accelerometer, Axis::Z), -9.8);
        // Strength reports X
        assert_eq!(finch.inertial(SensorKind::Accelerometer, Axis::Strength), 0.0);

        sim.set_acceleration([0, 1000, 0]);
        sim.set_magnetic_field([0, -30, 0]);
        assert_eq!(finch.inertial(SensorKind::Magnetometer, Axis::X), 0.0);
        let heading = finch.compass();
        assert!(heading.is_ok(), "{:?}", heading);

        // orientation reads never touch the bus
        assert!(sim.frames().is_empty());
    }

    #[test]
    fn test_commands_before_start_report_dropped() {
        let sim = SimFinch::new();
        let mut finch = sim.driver();

        assert_eq!(finch.set_motors(50, 50).unwrap(), Delivery::Dropped);
        assert_eq!(finch.set_beak(0, 100, 0).unwrap(), Delivery::Dropped);
        assert_eq!(finch.set_tail(5, 0, 100, 0).unwrap(), Delivery::Dropped);
        assert_eq!(finch.stop().unwrap(), Delivery::Dropped);

        // a dropped timed move does not wait for motion
        let before = sim.now_ms();
        assert_eq!(
            finch.set_move(MoveDirection::Forward, 10.0, 50).unwrap(),
            Delivery::Dropped
        );
        assert_eq!(sim.now_ms() - before, 250);
        assert_eq!(
            finch.set_turn(TurnDirection::Left, 90.0, 50).unwrap(),
            Delivery::Dropped
        );
        assert!(sim.frames().is_empty());
    }

    #[test]
    fn test_started_commands_report_sent() {
        let sim = SimFinch::new();
        let mut finch = started(&sim);
        assert_eq!(finch.set_motors(50, 50).unwrap(), Delivery::Sent);
        assert_eq!(finch.stop_motors().unwrap(), Delivery::Sent);
        assert_eq!(
            finch.set_move(MoveDirection::Backward, 5.0, i32::MAX).unwrap(),
            Delivery::Sent
        );
        // clamps to full speed backward
        let frames = sim.frames();
        let timed = frames.iter().find(|f| f[0] == 0xD2 && f[5] != 0).unwrap();
        assert_eq!(timed[2], 36);
    }

    #[test]
    fn test_drop_stops_started_robot() {
        let sim = SimFinch::new();
        {
            let mut finch = started(&sim);
            finch.set_motors(20, 20).unwrap();
        }
        assert_eq!(sim.frames().last().unwrap()[0], 0xDF);

        let unstarted_sim = SimFinch::new();
        drop(unstarted_sim.driver());
        assert!(unstarted_sim.frames().is_empty());
    }
}
