// Message types shared by the driver, the demo loops and the CLI

use serde::{Deserialize, Serialize};

use crate::finch::actuator::Rgb;
use crate::finch::telemetry::{Side, Snapshot};

/// Every decoded sensor from one telemetry frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReport {
    pub firmware: u8,
    pub distance_cm: u32,
    pub line_left: i32,
    pub line_right: i32,
    pub light_left: u8,
    pub light_right: u8,
    pub encoder_left: f64,
    pub encoder_right: f64,
    pub battery_mv: u32,
    pub moving: bool,
}

impl SensorReport {
    /// Decode a snapshot; `beak` is needed for the light-sensor correction
    pub fn from_snapshot(snap: &Snapshot, beak: Rgb) -> Self {
        Self {
            firmware: snap.firmware_version(),
            distance_cm: snap.distance_cm(),
            line_left: snap.line_percent(Side::Left),
            line_right: snap.line_percent(Side::Right),
            light_left: snap.light_percent(Side::Left, beak),
            light_right: snap.light_percent(Side::Right, beak),
            encoder_left: snap.encoder_rotations(Side::Left),
            encoder_right: snap.encoder_rotations(Side::Right),
            battery_mv: snap.battery_mv(),
            moving: snap.is_moving(),
        }
    }
}

/// Wheel speed pair produced by a control loop, -100..=100 %
// Has default values because a loop may not have decided anything yet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WheelSpeeds {
    pub left: i32,
    pub right: i32,
}

impl WheelSpeeds {
    pub fn new(left: i32, right: i32) -> Self {
        Self { left, right }
    }

    pub fn zero() -> Self {
        Self::default()
    }
}

/// Beak color request in percent, as the demo loops express it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BeakColor {
    pub red: i32,
    pub green: i32,
    pub blue: i32,
}

impl BeakColor {
    pub const fn new(red: i32, green: i32, blue: i32) -> Self {
        Self { red, green, blue }
    }
}

/// Tunables for the demo control loops, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DemoConfig {
    /// Line sensor reading (percent) below which a line is considered detected
    pub line_threshold: i32,
    pub turn_speed: i32,
    pub forward_speed: i32,
    /// Stop when an obstacle is this close (cm)
    pub stop_distance_cm: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            line_threshold: 50,
            turn_speed: 10,
            forward_speed: 50,
            stop_distance_cm: 15,
        }
    }
}
