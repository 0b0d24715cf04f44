// Orientation and compass math in the Finch body frame
//
// The host board sits in the Finch tilted 40 degrees about its X axis, so raw
// accelerometer/magnetometer axes are negated and rotated before use.

use std::f64::consts::PI;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::protocol::FinchError;
use crate::config::ORIENTATION_THRESHOLD;

const MOUNT_ANGLE_DEG: f64 = 40.0;
/// milli-g to m/s^2
const MILLI_G_TO_MPS2: f64 = 0.00980665;

/// Three-axis reading in the Finch frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// `Strength` reports the X component, matching the robot's other libraries
    pub fn component(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X | Axis::Strength => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

/// Axis selector for accelerometer/magnetometer reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
    Strength,
}

impl FromStr for Axis {
    type Err = FinchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            "strength" => Ok(Axis::Strength),
            _ => Err(FinchError::invalid_argument(
                "dimension",
                s,
                "\"x\", \"y\", \"z\" or \"strength\"",
            )),
        }
    }
}

/// Which host sensor to read in the Finch frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Accelerometer,
    Magnetometer,
}

impl FromStr for SensorKind {
    type Err = FinchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accelerometer" => Ok(SensorKind::Accelerometer),
            "magnetometer" => Ok(SensorKind::Magnetometer),
            _ => Err(FinchError::invalid_argument(
                "type",
                s,
                "\"accelerometer\" or \"magnetometer\"",
            )),
        }
    }
}

/// Named poses, in reporting order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    BeakUp,
    BeakDown,
    TiltLeft,
    TiltRight,
    Level,
    UpsideDown,
    Shake,
}

impl Orientation {
    pub const ALL: [Orientation; 7] = [
        Orientation::BeakUp,
        Orientation::BeakDown,
        Orientation::TiltLeft,
        Orientation::TiltRight,
        Orientation::Level,
        Orientation::UpsideDown,
        Orientation::Shake,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Orientation::BeakUp => "beakup",
            Orientation::BeakDown => "beakdown",
            Orientation::TiltLeft => "tiltleft",
            Orientation::TiltRight => "tiltright",
            Orientation::Level => "level",
            Orientation::UpsideDown => "upsidedown",
            Orientation::Shake => "shake",
        }
    }

    /// Evaluate against a corrected accelerometer reading (milli-g)
    pub fn holds(self, accel: &Vector3, shaking: bool) -> bool {
        let t = ORIENTATION_THRESHOLD;
        match self {
            Orientation::BeakUp => accel.y > t,
            Orientation::BeakDown => accel.y < -t,
            Orientation::TiltLeft => accel.x < -t,
            Orientation::TiltRight => accel.x > t,
            Orientation::Level => accel.z < -t,
            Orientation::UpsideDown => accel.z > t,
            Orientation::Shake => shaking,
        }
    }
}

impl FromStr for Orientation {
    type Err = FinchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        Orientation::ALL
            .into_iter()
            .find(|o| o.label() == lower)
            .ok_or_else(|| {
                FinchError::invalid_argument(
                    "orientation",
                    s,
                    "\"beakup\", \"beakdown\", \"tiltleft\", \"tiltright\", \"level\", \"upsidedown\" or \"shake\"",
                )
            })
    }
}

/// All orientations that currently hold, in `Orientation::ALL` order
pub fn orientations(accel: &Vector3, shaking: bool) -> Vec<Orientation> {
    Orientation::ALL
        .into_iter()
        .filter(|o| o.holds(accel, shaking))
        .collect()
}

fn mount_rotation() -> (f64, f64) {
    let rad = MOUNT_ANGLE_DEG * PI / 180.0;
    (rad.sin(), rad.cos())
}

/// Host accelerometer sample (milli-g) rotated into the Finch frame
pub fn finch_acceleration(raw: [i32; 3]) -> Vector3 {
    let (sin, cos) = mount_rotation();
    let mb_y = -(raw[1] as f64);
    let mb_z = raw[2] as f64;
    Vector3 {
        x: -(raw[0] as f64),
        y: mb_y * cos - mb_z * sin,
        z: mb_y * sin + mb_z * cos,
    }
}

/// Host magnetometer sample rotated into the Finch frame
pub fn finch_magnetic_field(raw: [i32; 3]) -> Vector3 {
    let (sin, cos) = mount_rotation();
    let mb_y = -(raw[1] as f64);
    let mb_z = -(raw[2] as f64);
    Vector3 {
        x: -(raw[0] as f64),
        y: mb_y * cos + mb_z * sin,
        z: mb_z * cos - mb_y * sin,
    }
}

/// milli-g to m/s^2, rounded to one decimal
pub fn acceleration_mps2(milli_g: f64) -> f64 {
    (milli_g * MILLI_G_TO_MPS2 * 10.0).round_ties_even() / 10.0
}

/// Tilt-compensated heading in whole degrees, 0..360.
///
/// Returns `None` when the roll or pitch term divides by zero (board held
/// exactly on edge) or the result is otherwise not finite.
pub fn compass_heading(accel: &Vector3, mag: &Vector3) -> Option<u16> {
    let Vector3 {
        x: ax,
        y: ay,
        z: az,
    } = *accel;
    if az == 0.0 {
        return None;
    }
    let phi = (-ay / az).atan();

    let denom = ay * phi.sin() + az * phi.cos();
    if denom == 0.0 {
        return None;
    }
    let theta = (ax / denom).atan();

    let xp = mag.x;
    let yp = mag.y * phi.cos() - mag.z * phi.sin();
    let zp = mag.y * phi.sin() + mag.z * phi.cos();
    let xpp = xp * theta.cos() + zp * theta.sin();

    let heading = (180.0 + xpp.atan2(yp) * (180.0 / PI)).round_ties_even();
    if !heading.is_finite() {
        return None;
    }
    Some(((heading as i64 + 180).rem_euclid(360)) as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVEL: Vector3 = Vector3::new(0.0, 0.0, -1000.0);

    fn close(a: &Vector3, b: &Vector3) -> bool {
        (a.x - b.x).abs() < 1e-6 && (a.y - b.y).abs() < 1e-6 && (a.z - b.z).abs() < 1e-6
    }

    #[test]
    fn test_threshold_boundaries() {
        let up = Vector3::new(0.0, 801.0, 0.0);
        assert!(Orientation::BeakUp.holds(&up, false));
        assert!(!Orientation::BeakDown.holds(&up, false));

        let almost = Vector3::new(0.0, 799.0, 0.0);
        assert!(!Orientation::BeakUp.holds(&almost, false));
        assert!(!Orientation::BeakDown.holds(&almost, false));

        let exactly = Vector3::new(800.0, 0.0, 0.0);
        assert!(!Orientation::TiltRight.holds(&exactly, false));
    }

    #[test]
    fn test_orientations_order() {
        let accel = Vector3::new(-900.0, 900.0, -900.0);
        assert_eq!(
            orientations(&accel, true),
            vec![
                Orientation::BeakUp,
                Orientation::TiltLeft,
                Orientation::Level,
                Orientation::Shake
            ]
        );
        assert!(orientations(&Vector3::default(), false).is_empty());
    }

    #[test]
    fn test_acceleration_rotation() {
        // Board held so the Finch sits level: gravity along Finch -Z
        let accel = finch_acceleration([0, 643, -766]);
        assert!(accel.x.abs() < 1e-9);
        assert!(accel.y.abs() < 1.0, "y = {}", accel.y);
        assert!((accel.z + 1000.0).abs() < 1.0, "z = {}", accel.z);
        assert!(Orientation::Level.holds(&accel, false));

        let tilted = finch_acceleration([-900, 0, 0]);
        assert!(close(&tilted, &Vector3::new(900.0, 0.0, 0.0)));
    }

    #[test]
    fn test_magnetometer_rotation() {
        let (sin, cos) = mount_rotation();
        let mag = finch_magnetic_field([10, -100, 0]);
        assert!(close(&mag, &Vector3::new(-10.0, 100.0 * cos, -100.0 * sin)));
    }

    #[test]
    fn test_acceleration_units() {
        // 1000 milli-g = 9.80665 m/s^2 -> 9.8
        assert_eq!(acceleration_mps2(1000.0), 9.8);
        assert_eq!(acceleration_mps2(-1000.0), -9.8);
        assert_eq!(acceleration_mps2(0.0), 0.0);
    }

    #[test]
    fn test_compass_cardinal_points() {
        assert_eq!(compass_heading(&LEVEL, &Vector3::new(0.0, 30.0, 0.0)), Some(0));
        assert_eq!(compass_heading(&LEVEL, &Vector3::new(30.0, 0.0, 0.0)), Some(90));
        assert_eq!(compass_heading(&LEVEL, &Vector3::new(0.0, -30.0, 0.0)), Some(180));
        assert_eq!(compass_heading(&LEVEL, &Vector3::new(-30.0, 0.0, 0.0)), Some(270));
    }

    #[test]
    fn test_compass_degenerate_accel() {
        let on_edge = Vector3::new(0.0, 1000.0, 0.0);
        assert_eq!(compass_heading(&on_edge, &Vector3::new(0.0, 30.0, 0.0)), None);
    }

    #[test]
    fn test_parse_labels() {
        assert_eq!("BeakUp".parse::<Orientation>().unwrap(), Orientation::BeakUp);
        assert_eq!("upsidedown".parse::<Orientation>().unwrap(), Orientation::UpsideDown);
        assert!("sideways".parse::<Orientation>().is_err());
        assert_eq!("STRENGTH".parse::<Axis>().unwrap(), Axis::Strength);
        assert!("w".parse::<Axis>().is_err());
        assert!("gyro".parse::<SensorKind>().is_err());
    }
}
