// Telemetry snapshot and sensor decoders
//
// Every exchange returns 16 bytes of sensor state:
// [firmware, -, distance msb, distance lsb, light L, light R, line L, line R,
//  battery, encoder L (3 bytes), encoder R (3 bytes), filler]
// Bit 7 of the left line byte is the motion-in-progress flag.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::actuator::{Rgb, percent_to_byte};
use super::protocol::{FRAME_LEN, FinchError};

const DISTANCE_CM_PER_COUNT: f64 = 0.0919;
const ENCODER_COUNTS_PER_ROTATION: f64 = 792.0;
const BATTERY_MV_PER_COUNT: f64 = 9.37;
const BATTERY_OFFSET: f64 = 320.0;

// Light sensors pick up the beak LED; these polynomials estimate how much.
// Terms: R, G, B, RG, RB, GB, RGB
const LIGHT_BLEED_LEFT: [f64; 7] = [
    1.06871493e-02,
    1.94526614e-02,
    6.12409825e-02,
    4.01343475e-04,
    4.25761981e-04,
    6.46091068e-04,
    -4.41056971e-06,
];
const LIGHT_BLEED_RIGHT: [f64; 7] = [
    6.40473070e-03,
    1.41015162e-02,
    5.05547817e-02,
    3.98301391e-04,
    4.41091223e-04,
    6.40756862e-04,
    -4.76971242e-06,
];

/// Which of the paired sensors (or wheels) to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl FromStr for Side {
    type Err = FinchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(Side::Left),
            "right" => Ok(Side::Right),
            _ => Err(FinchError::invalid_argument(
                "side",
                s,
                "\"left\" or \"right\"",
            )),
        }
    }
}

/// One full response frame plus the time it arrived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Snapshot {
    bytes: [u8; FRAME_LEN],
    received_at_ms: u64,
}

impl Snapshot {
    pub fn new(bytes: [u8; FRAME_LEN], received_at_ms: u64) -> Self {
        Self {
            bytes,
            received_at_ms,
        }
    }

    pub fn bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    pub fn received_at_ms(&self) -> u64 {
        self.received_at_ms
    }

    /// Age relative to `now_ms`; never negative
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.received_at_ms)
    }

    #[inline]
    pub fn firmware_version(&self) -> u8 {
        self.bytes[0]
    }

    #[inline]
    pub fn distance_raw(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }

    #[inline]
    pub fn light_raw(&self, side: Side) -> u8 {
        match side {
            Side::Left => self.bytes[4],
            Side::Right => self.bytes[5],
        }
    }

    /// Reflectance reading, low 7 bits only
    #[inline]
    pub fn line_raw(&self, side: Side) -> u8 {
        match side {
            Side::Left => self.bytes[6] & 0x7F,
            Side::Right => self.bytes[7] & 0x7F,
        }
    }

    /// True while a timed motor command is still running
    #[inline]
    pub fn is_moving(&self) -> bool {
        (self.bytes[6] & 0x80) != 0
    }

    #[inline]
    pub fn battery_raw(&self) -> u8 {
        self.bytes[8]
    }

    /// 24-bit big-endian rotation counter
    #[inline]
    pub fn encoder_raw(&self, side: Side) -> u32 {
        let start = match side {
            Side::Left => 9,
            Side::Right => 12,
        };
        let b = &self.bytes[start..start + 3];
        (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32
    }

    /// Obstacle distance in centimeters
    pub fn distance_cm(&self) -> u32 {
        (self.distance_raw() as f64 * DISTANCE_CM_PER_COUNT).round_ties_even() as u32
    }

    /// Line sensor brightness in percent. Raw values below 6 read above 100.
    pub fn line_percent(&self, side: Side) -> i32 {
        line_percent(self.line_raw(side))
    }

    /// Ambient light in percent, with the beak LED's contribution removed
    pub fn light_percent(&self, side: Side, beak: Rgb) -> u8 {
        let correction = light_bleed(side, beak).round_ties_even();
        let corrected = self.light_raw(side) as f64 - correction;
        corrected.clamp(0.0, 100.0).round_ties_even() as u8
    }

    /// Wheel rotations since the last counter reset, to one decimal
    pub fn encoder_rotations(&self, side: Side) -> f64 {
        let counts = sign_extend_24(self.encoder_raw(side)) as f64;
        (counts / ENCODER_COUNTS_PER_ROTATION * 10.0).round_ties_even() / 10.0
    }

    /// Battery voltage in millivolts. Behaviour gets erratic below ~3373 mV.
    pub fn battery_mv(&self) -> u32 {
        (BATTERY_MV_PER_COUNT * (self.battery_raw() as f64 + BATTERY_OFFSET)).round_ties_even()
            as u32
    }
}

/// Map a 7-bit reflectance value onto 0–100 %
pub fn line_percent(raw: u8) -> i32 {
    (100.0 - ((raw as f64 - 6.0) * 100.0 / 121.0)).round_ties_even() as i32
}

/// Interpret a 24-bit two's-complement counter as i32
pub fn sign_extend_24(raw: u32) -> i32 {
    let raw = raw & 0x00FF_FFFF;
    if raw & 0x0080_0000 != 0 {
        (raw | 0xFF00_0000) as i32
    } else {
        raw as i32
    }
}

/// Estimated beak LED bleed into one light sensor.
///
/// The stored beak bytes go through the percent mapping once more before
/// evaluation, so any channel above 100 saturates at 255.
fn light_bleed(side: Side, beak: Rgb) -> f64 {
    let r = percent_to_byte(beak.red as i32) as f64;
    let g = percent_to_byte(beak.green as i32) as f64;
    let b = percent_to_byte(beak.blue as i32) as f64;
    let k = match side {
        Side::Left => &LIGHT_BLEED_LEFT,
        Side::Right => &LIGHT_BLEED_RIGHT,
    };
    k[0] * r + k[1] * g + k[2] * b + k[3] * r * g + k[4] * r * b + k[5] * g * b + k[6] * r * g * b
}
