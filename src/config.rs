// Timing, bus and loop configuration
use std::time::Duration;

// Demo loop frequency
pub const LOOP_HZ: u64 = 100;

// SPI bus settings expected by the Finch (mode 0, 8-bit words)
pub const BUS_FREQUENCY_HZ: u32 = 1_000_000;

// Transport gate: how long a command waits for the bus before it is dropped
pub const GATE_RETRIES: u32 = 25;
pub const GATE_RETRY_INTERVAL: Duration = Duration::from_millis(10);

// Chip-select setup/hold around one exchange
pub const PRE_EXCHANGE_DELAY_US: u32 = 500;
pub const CS_SETTLE_DELAY_US: u32 = 4;
pub const POST_EXCHANGE_DELAY_US: u32 = 100;

// Telemetry older than this is refreshed with a poll before decoding
pub const TELEMETRY_MAX_AGE_MS: u64 = 10;

// Power-up sequence
pub const RESET_PULSE: Duration = Duration::from_millis(100);
pub const BOOT_WAIT: Duration = Duration::from_millis(2000);
pub const ENCODER_RESET_SETTLE: Duration = Duration::from_millis(100);

// Motion completion monitor
pub const MOTION_START_DELAY: Duration = Duration::from_millis(50);
pub const MOTION_POLL_INTERVAL: Duration = Duration::from_millis(30);
pub const MOTION_STOP_SETTLE: Duration = Duration::from_millis(100);

// Orientation threshold on corrected accelerometer axes (milli-g)
pub const ORIENTATION_THRESHOLD: f64 = 800.0;
