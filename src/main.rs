use std::path::PathBuf;
use std::time::{Duration, TryFromFloatSecsError};

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use finch_driver::finch::{Axis, DEFAULT_SPEED, MoveDirection, SensorKind, TurnDirection};
use finch_driver::messages::DemoConfig;
use finch_driver::runtime;
use finch_driver::sim::SimFinch;

/// Drive a Finch robot (simulated peripheral)
#[derive(Parser)]
#[command(name = "finch", version)]
struct Cli {
    /// JSON file with demo loop tunables
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Stop a demo loop after this many seconds (default: until Ctrl-C)
    #[arg(long, global = true)]
    seconds: Option<f64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow a dark line, stopping at obstacles
    LineFollow,
    /// Color the beak by the robot's pose
    Orientation,
    /// Print one sensor report as JSON
    Sensors,
    /// Drive straight and wait for the move to finish
    Move {
        /// "forward" or "backward"
        direction: String,
        /// Distance in cm
        distance: f64,
        #[arg(long, default_value_t = DEFAULT_SPEED)]
        speed: i32,
    },
    /// Turn in place and wait for the turn to finish
    Turn {
        /// "left" or "right"
        direction: String,
        /// Angle in degrees
        degrees: f64,
        #[arg(long, default_value_t = DEFAULT_SPEED)]
        speed: i32,
    },
    /// Read one accelerometer/magnetometer axis in the Finch frame
    Imu {
        /// "accelerometer" or "magnetometer"
        kind: String,
        /// "x", "y", "z" or "strength"
        axis: String,
    },
    /// Print the tilt-compensated compass heading
    Compass,
}

fn load_config(path: Option<&PathBuf>) -> Result<DemoConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(DemoConfig::default()),
    }
}

/// Demo run time from `--seconds`; negative, NaN or huge values are errors
fn run_duration(seconds: Option<f64>) -> Result<Option<Duration>, TryFromFloatSecsError> {
    seconds.map(Duration::try_from_secs_f64).transpose()
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli.config.as_ref())?;
    let duration = run_duration(cli.seconds)?;

    let sim = SimFinch::realtime();
    let mut finch = sim.driver();

    match cli.command {
        Command::LineFollow => {
            finch.start()?;
            runtime::run_line_follower(&mut finch, config, duration).await?;
        }
        Command::Orientation => {
            finch.start()?;
            runtime::run_orientation_lights(&mut finch, duration).await?;
        }
        Command::Sensors => {
            finch.start()?;
            let report = finch.sensors()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Move {
            direction,
            distance,
            speed,
        } => {
            // Reject bad arguments before the robot is touched
            let direction: MoveDirection = direction.parse()?;
            finch.start()?;
            finch.set_move(direction, distance, speed)?;
            println!("{}", serde_json::to_string_pretty(&finch.sensors()?)?);
        }
        Command::Turn {
            direction,
            degrees,
            speed,
        } => {
            let direction: TurnDirection = direction.parse()?;
            finch.start()?;
            finch.set_turn(direction, degrees, speed)?;
            println!("{}", serde_json::to_string_pretty(&finch.sensors()?)?);
        }
        Command::Imu { kind, axis } => {
            let kind: SensorKind = kind.parse()?;
            let axis: Axis = axis.parse()?;
            println!("{}", finch.inertial(kind, axis));
        }
        Command::Compass => {
            println!("{}", finch.compass()?);
        }
    }

    info!("Done");
    Ok(())
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Finch error: {}", e);
        std::process::exit(1);
    }
}
