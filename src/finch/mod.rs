// Finch robot driver layer
//
// Provides:
// - Host peripheral traits (SPI, control lines, clock, inertial sensor)
// - 16-byte SPI frame protocol with readiness gate and telemetry cache
// - Actuator encodings (LEDs, motors) and telemetry decoders
// - Orientation and compass math
// - High-level `Finch` driver API

pub mod actuator;
pub mod driver;
pub mod hal;
pub mod orientation;
pub mod protocol;
pub mod telemetry;

pub use actuator::{MoveDirection, Rgb, TurnDirection};
pub use driver::{DEFAULT_SPEED, Finch};
pub use orientation::{Axis, Orientation, SensorKind};
pub use protocol::{Delivery, FinchBus, FinchError, Opcode};
pub use telemetry::{Side, Snapshot};
