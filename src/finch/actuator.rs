// Actuator encodings: LED intensities, motor velocities and move distances
//
// Motor payload layout (after the 0xD2 opcode):
// [0xFF, left velocity, left ticks (3 bytes BE), right velocity, right ticks (3 bytes BE)]
// Velocity byte: bit 7 = forward, bits 0-6 = magnitude (0..=36).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::protocol::FinchError;

const SPEED_SCALE: f64 = 0.36;
/// Smallest nonzero velocity the motors respond to
const MIN_VELOCITY: u8 = 3;
const FORWARD_BIT: u8 = 0x80;

const TICKS_PER_CM: f64 = 49.7;
const TICKS_PER_DEGREE: f64 = 4.335;
pub const MAX_DISTANCE_CM: f64 = 100_000.0;
pub const MAX_ANGLE_DEG: f64 = 360_000.0;

/// Convert a 0–100 % intensity to a 0–255 byte, clamping out-of-range input
pub fn percent_to_byte(percent: i32) -> u8 {
    (percent.clamp(0, 100) as f64 / 100.0 * 255.0).round_ties_even() as u8
}

/// Encode a -100..=100 % wheel speed as a Finch velocity byte
pub fn convert_speed(speed: i32) -> u8 {
    let mut magnitude = (speed.clamp(-100, 100).abs() as f64 * SPEED_SCALE).round_ties_even() as u8;
    if magnitude != 0 && magnitude < MIN_VELOCITY {
        magnitude = MIN_VELOCITY;
    }
    if speed >= 0 {
        FORWARD_BIT | magnitude
    } else {
        0x7F & magnitude
    }
}

/// Centimeters to motor ticks
pub fn distance_to_ticks(cm: f64) -> u32 {
    (cm.clamp(0.0, MAX_DISTANCE_CM) * TICKS_PER_CM).round_ties_even() as u32
}

/// Degrees of body rotation to motor ticks
pub fn angle_to_ticks(degrees: f64) -> u32 {
    (degrees.clamp(0.0, MAX_ANGLE_DEG) * TICKS_PER_DEGREE).round_ties_even() as u32
}

/// LED color as raw 0–255 channel values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Build from 0–100 % intensities
    pub fn from_percent(red: i32, green: i32, blue: i32) -> Self {
        Self::new(
            percent_to_byte(red),
            percent_to_byte(green),
            percent_to_byte(blue),
        )
    }

    pub fn as_array(&self) -> [u8; 3] {
        [self.red, self.green, self.blue]
    }
}

/// Tail LED addressing: one of four positions, or all at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailLed {
    Single(u8),
    All,
}

impl TailLed {
    /// Port ids 1-4 address one LED, 5 addresses all four
    pub fn from_port(port: u8) -> Result<Self, FinchError> {
        match port {
            1..=4 => Ok(TailLed::Single(port)),
            5 => Ok(TailLed::All),
            _ => Err(FinchError::invalid_argument(
                "tail port",
                port,
                "1-4 or 5 for all",
            )),
        }
    }
}

/// Port id for the beak in the single-LED command
pub const BEAK_PORT: u8 = 0;

/// Payload for the single-LED command (port, r, g, b)
pub fn single_led_payload(port: u8, color: Rgb) -> [u8; 4] {
    [port, color.red, color.green, color.blue]
}

/// Payload for the set-all command: beak color then the tail color four times
pub fn all_leds_payload(beak: Rgb, tail: Rgb) -> [u8; 15] {
    let mut payload = [0u8; 15];
    payload[..3].copy_from_slice(&beak.as_array());
    for chunk in payload[3..].chunks_exact_mut(3) {
        chunk.copy_from_slice(&tail.as_array());
    }
    payload
}

/// Velocity + distance for both wheels. Zero ticks means run until told otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotorCommand {
    pub left_velocity: u8,
    pub left_ticks: u32,
    pub right_velocity: u8,
    pub right_ticks: u32,
}

impl MotorCommand {
    /// Continuous motion at the given -100..=100 % speeds
    pub fn continuous(left_speed: i32, right_speed: i32) -> Self {
        Self {
            left_velocity: convert_speed(left_speed),
            left_ticks: 0,
            right_velocity: convert_speed(right_speed),
            right_ticks: 0,
        }
    }

    /// All zero: motors off, no pending distance
    pub fn halt() -> Self {
        Self::default()
    }

    pub fn payload(&self) -> [u8; 9] {
        let l = self.left_ticks.to_be_bytes();
        let r = self.right_ticks.to_be_bytes();
        [
            0xFF,
            self.left_velocity,
            l[1],
            l[2],
            l[3],
            self.right_velocity,
            r[1],
            r[2],
            r[3],
        ]
    }
}

/// Straight-line travel direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveDirection {
    Forward,
    Backward,
}

impl MoveDirection {
    /// Signed speed to apply to both wheels, clamped to -100..=100
    pub fn signed_speed(self, speed: i32) -> i32 {
        let speed = speed.clamp(-100, 100);
        match self {
            MoveDirection::Forward => speed,
            MoveDirection::Backward => -speed,
        }
    }
}

impl FromStr for MoveDirection {
    type Err = FinchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "forward" => Ok(MoveDirection::Forward),
            "backward" => Ok(MoveDirection::Backward),
            _ => Err(FinchError::invalid_argument(
                "direction",
                s,
                "\"forward\" or \"backward\"",
            )),
        }
    }
}

/// Turn-in-place direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnDirection {
    Left,
    Right,
}

impl TurnDirection {
    /// (left, right) wheel speeds for the turn, clamped to -100..=100
    pub fn wheel_speeds(self, speed: i32) -> (i32, i32) {
        let speed = speed.clamp(-100, 100);
        match self {
            TurnDirection::Left => (-speed, speed),
            TurnDirection::Right => (speed, -speed),
        }
    }
}

impl FromStr for TurnDirection {
    type Err = FinchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(TurnDirection::Left),
            "right" => Ok(TurnDirection::Right),
            _ => Err(FinchError::invalid_argument(
                "direction",
                s,
                "\"left\" or \"right\"",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_to_byte_clamps() {
        assert_eq!(percent_to_byte(150), 255);
        assert_eq!(percent_to_byte(-10), 0);
        assert_eq!(percent_to_byte(0), 0);
        assert_eq!(percent_to_byte(100), 255);
        // 40% = 102.0
        assert_eq!(percent_to_byte(40), 102);
    }

    #[test]
    fn test_speed_zero() {
        assert_eq!(convert_speed(0), 0x80);
        assert_eq!(convert_speed(0) & 0x7F, 0);
    }

    #[test]
    fn test_speed_floor() {
        // 1..=8 scale to 0.36..2.88, which round to 0, 1, 2 or 3
        for speed in 2..=8 {
            let magnitude = convert_speed(speed) & 0x7F;
            assert_eq!(magnitude, 3, "speed {} gave {}", speed, magnitude);
        }
        // 0.36 rounds to zero, so no floor applies
        assert_eq!(convert_speed(1) & 0x7F, 0);
    }

    #[test]
    fn test_speed_monotonic() {
        let mut last = 0;
        for speed in 4..=100 {
            let magnitude = convert_speed(speed) & 0x7F;
            assert!(magnitude >= last, "speed {} dropped to {}", speed, magnitude);
            last = magnitude;
        }
        assert_eq!(last, 36);
    }

    #[test]
    fn test_speed_direction_bit() {
        assert_eq!(convert_speed(50), 0x80 | 18);
        assert_eq!(convert_speed(-50), 18);
        // clamped to the full range
        assert_eq!(convert_speed(250), 0x80 | 36);
        assert_eq!(convert_speed(-250), 36);
    }

    #[test]
    fn test_ticks() {
        assert_eq!(distance_to_ticks(10.0), 497);
        assert_eq!(distance_to_ticks(-5.0), 0);
        assert_eq!(distance_to_ticks(1e9), 4_970_000);
        assert_eq!(angle_to_ticks(90.0), 390);
        assert_eq!(angle_to_ticks(0.0), 0);
        // 0.1 degrees rounds down to zero ticks
        assert_eq!(angle_to_ticks(0.1), 0);
    }

    #[test]
    fn test_motor_payload_layout() {
        let cmd = MotorCommand {
            left_velocity: 0x92,
            left_ticks: 0x01_02_03,
            right_velocity: 0x12,
            right_ticks: 0x0A_0B_0C,
        };
        assert_eq!(
            cmd.payload(),
            [0xFF, 0x92, 0x01, 0x02, 0x03, 0x12, 0x0A, 0x0B, 0x0C]
        );
    }

    #[test]
    fn test_all_leds_payload() {
        let payload = all_leds_payload(Rgb::new(1, 2, 3), Rgb::new(7, 8, 9));
        assert_eq!(payload, [1, 2, 3, 7, 8, 9, 7, 8, 9, 7, 8, 9, 7, 8, 9]);
    }

    #[test]
    fn test_tail_ports() {
        assert_eq!(TailLed::from_port(1).unwrap(), TailLed::Single(1));
        assert_eq!(TailLed::from_port(5).unwrap(), TailLed::All);
        assert!(TailLed::from_port(0).is_err());
        assert!(TailLed::from_port(6).is_err());
    }

    #[test]
    fn test_direction_parsing() {
        assert_eq!("Forward".parse::<MoveDirection>().unwrap(), MoveDirection::Forward);
        assert_eq!("BACKWARD".parse::<MoveDirection>().unwrap(), MoveDirection::Backward);
        assert!("sideways".parse::<MoveDirection>().is_err());
        assert_eq!("LeFt".parse::<TurnDirection>().unwrap(), TurnDirection::Left);
        assert!("forward".parse::<TurnDirection>().is_err());
    }

    #[test]
    fn test_turn_wheel_speeds() {
        assert_eq!(TurnDirection::Left.wheel_speeds(50), (-50, 50));
        assert_eq!(TurnDirection::Right.wheel_speeds(50), (50, -50));
    }

    #[test]
    fn test_extreme_speeds_clamp_before_negation() {
        assert_eq!(MoveDirection::Backward.signed_speed(i32::MIN), 100);
        assert_eq!(MoveDirection::Backward.signed_speed(i32::MAX), -100);
        assert_eq!(MoveDirection::Forward.signed_speed(i32::MIN), -100);
        assert_eq!(TurnDirection::Left.wheel_speeds(i32::MIN), (100, -100));
        assert_eq!(TurnDirection::Right.wheel_speeds(i32::MAX), (100, -100));
        assert_eq!(convert_speed(MoveDirection::Backward.signed_speed(i32::MAX)), 36);
    }
}
