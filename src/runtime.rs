// 100 Hz demo control loops
// Each loop polls the robot, decides, and only talks to the bus when a decision changes.
// Ctrl-C (or the optional run duration) ends the loop and the robot is stopped.

use std::time::Duration;
use embedded_hal::delay::DelayNs;
use tokio::time::{Instant, interval};
use tracing::{debug, info};

// local imports
use crate::config::LOOP_HZ;
use crate::finch::driver::Finch;
use crate::finch::hal::{Clock, ControlLines, FinchSpi, InertialSensor};
use crate::finch::orientation::Orientation;
use crate::finch::protocol::{Delivery, Result as FinchResult};
use crate::messages::{BeakColor, DemoConfig, WheelSpeeds};

const STOP_BEAK: BeakColor = BeakColor::new(40, 0, 0);
const TURN_BEAK: BeakColor = BeakColor::new(50, 40, 0);
const FORWARD_BEAK: BeakColor = BeakColor::new(0, 40, 0);

/// What one control step wants sent to the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Decision {
    pub beak: Option<BeakColor>,
    pub motors: Option<WheelSpeeds>,
}

/// Two-sensor line follower with obstacle stop
pub struct LineFollower {
    config: DemoConfig,
    target: WheelSpeeds,
    current: Option<WheelSpeeds>,
    change_detected: bool,
}

impl LineFollower {
    pub fn new(config: DemoConfig) -> Self {
        Self {
            config,
            target: WheelSpeeds::zero(),
            current: None, // nothing sent yet
            change_detected: true,
        }
    }

    /// Decide from line readings (percent) and obstacle distance (cm)
    pub fn step(&mut self, line_left: i32, line_right: i32, distance_cm: u32) -> Decision {
        let cfg = &self.config;
        let mut beak = None;

        if distance_cm <= cfg.stop_distance_cm {
            beak = Some(STOP_BEAK);
            self.target = WheelSpeeds::zero();
        } else if line_left < cfg.line_threshold {
            beak = Some(TURN_BEAK);
            self.target = WheelSpeeds::new(-cfg.turn_speed, cfg.turn_speed);
        } else if line_right < cfg.line_threshold {
            beak = Some(TURN_BEAK);
            self.target = WheelSpeeds::new(cfg.turn_speed, -cfg.turn_speed);
        } else if self.change_detected {
            beak = Some(FORWARD_BEAK);
            self.target = WheelSpeeds::new(cfg.forward_speed, cfg.forward_speed);
            self.change_detected = false;
        }

        let mut motors = None;
        if self.current != Some(self.target) {
            debug!("Wheel speeds -> {:?}", self.target);
            motors = Some(self.target);
            self.current = Some(self.target);
            self.change_detected = true;
        }

        Decision { beak, motors }
    }

    /// Forget what was sent, e.g. after the robot was stopped
    pub fn reset(&mut self) {
        self.current = None;
        self.change_detected = true;
    }
}

/// Beak color that mirrors the robot's pose
#[derive(Default)]
pub struct OrientationLights {
    last: Option<BeakColor>,
}

impl OrientationLights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn color_for(orientations: &[Orientation]) -> BeakColor {
        if orientations.contains(&Orientation::UpsideDown) {
            BeakColor::new(100, 0, 0)
        } else if orientations.contains(&Orientation::BeakUp) {
            BeakColor::new(100, 80, 0)
        } else if orientations.contains(&Orientation::Level) {
            BeakColor::new(60, 60, 60)
        } else {
            BeakColor::default()
        }
    }

    /// New beak color, or `None` when it has not changed
    pub fn step(&mut self, orientations: &[Orientation]) -> Option<BeakColor> {
        let color = Self::color_for(orientations);
        if self.last == Some(color) {
            return None;
        }
        self.last = Some(color);
        Some(color)
    }
}

/// Tick `step` at LOOP_HZ until Ctrl-C or `duration` elapses
async fn run_loop<F>(duration: Option<Duration>, mut step: F) -> FinchResult<()>
where
    F: FnMut() -> FinchResult<()>,
{
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));
    let deadline = duration.map(|d| Instant::now() + d);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Ctrl-C received, stopping");
                break;
            }
            _ = tick.tick() => {}
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Run time elapsed, stopping");
            break;
        }
        step()?;
    }
    Ok(())
}

fn set_beak<SPI, L, D, C, IMU>(
    finch: &mut Finch<SPI, L, D, C, IMU>,
    color: BeakColor,
) -> FinchResult<Delivery>
where
    SPI: FinchSpi,
    L: ControlLines,
    D: DelayNs,
    C: Clock,
    IMU: InertialSensor,
{
    finch.set_beak(color.red, color.green, color.blue)
}

pub async fn run_line_follower<SPI, L, D, C, IMU>(
    finch: &mut Finch<SPI, L, D, C, IMU>,
    config: DemoConfig,
    duration: Option<Duration>,
) -> FinchResult<()>
where
    SPI: FinchSpi,
    L: ControlLines,
    D: DelayNs,
    C: Clock,
    IMU: InertialSensor,
{
    info!("Line follower started: {}Hz loop, {:?}", LOOP_HZ, config);
    let mut follower = LineFollower::new(config);

    let result = run_loop(duration, || {
        let report = finch.sensors()?;
        let decision = follower.step(report.line_left, report.line_right, report.distance_cm);
        if let Some(beak) = decision.beak {
            set_beak(finch, beak)?;
        }
        if let Some(speeds) = decision.motors {
            if finch.set_motors(speeds.left, speeds.right)? == Delivery::Dropped {
                // resend on the next tick
                follower.reset();
            }
        }
        Ok(())
    })
    .await;

    finch.stop()?;
    result
}

pub async fn run_orientation_lights<SPI, L, D, C, IMU>(
    finch: &mut Finch<SPI, L, D, C, IMU>,
    duration: Option<Duration>,
) -> FinchResult<()>
where
    SPI: FinchSpi,
    L: ControlLines,
    D: DelayNs,
    C: Clock,
    IMU: InertialSensor,
{
    info!("Orientation lights started: {}Hz loop", LOOP_HZ);
    let mut lights = OrientationLights::new();

    let result = run_loop(duration, || {
        let orientations = finch.orientations();
        if let Some(color) = lights.step(&orientations) {
            info!("Orientation {:?} -> beak {:?}", orientations, color);
            set_beak(finch, color)?;
        }
        Ok(())
    })
    .await;

    finch.stop()?;
    result
}
