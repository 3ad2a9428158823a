// wj -- command-line tool for exercising a WJ motion board against real
// hardware or the simulated board.
//
// Usage:
//   wj --port 0 info
//   wj --port 3 get vel --axis 1
//   wj --port 3 set vel --axis 1 500
//   wj --mock move --axis 2 1000
//   wj --config wj.toml status
//   wj --mock -v rotate --axis 1 90

mod config;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use config::FileConfig;
use wjmotion::rotator::Rotator;
use wjmotion::{AxisField, Board, BoardBuilder, DEFAULT_IO_LINES, PortId};
use wjmotion_test_harness::SimHandle;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// wj -- drive a WJ motion board from the command line.
#[derive(Debug, Parser)]
#[command(name = "wj", version, about)]
struct Cli {
    /// Vendor port number: 0 for the board's USB port, n for COMn.
    #[arg(long)]
    port: Option<i32>,

    /// Device path to use for the USB port instead of auto-detecting it.
    #[arg(long)]
    usb_path: Option<String>,

    /// Serial baud rate.
    #[arg(long)]
    baud: Option<u32>,

    /// Per-attempt reply timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Retries after a reply timeout.
    #[arg(long)]
    retries: Option<u32>,

    /// Number of digital I/O lines on the board.
    #[arg(long)]
    io_lines: Option<u8>,

    /// TOML file with default settings. Flags override it.
    #[arg(long, env = "WJ_CONFIG")]
    config: Option<PathBuf>,

    /// Use a simulated board instead of a serial port.
    #[arg(long)]
    mock: bool,

    /// Axis count of the simulated board (4 or 8).
    #[arg(long, default_value_t = 4, requires = "mock")]
    mock_axes: u8,

    /// More log output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print board info.
    Info,

    /// Query the axis count from the board.
    Axes,

    /// Read one axis parameter.
    Get {
        #[arg(value_enum)]
        field: GetField,
        #[arg(long, short)]
        axis: u8,
    },

    /// Write one axis parameter.
    Set {
        #[arg(value_enum)]
        field: SetField,
        #[arg(long, short)]
        axis: u8,
        #[arg(allow_negative_numbers = true)]
        value: i32,
    },

    /// Status and pulse counter of every axis.
    Status,

    /// Move an axis by relative pulses.
    Move {
        #[arg(long, short)]
        axis: u8,
        #[arg(allow_negative_numbers = true)]
        pulses: i32,
    },

    /// Run an axis at a signed velocity.
    MoveVel {
        #[arg(long, short)]
        axis: u8,
        #[arg(allow_negative_numbers = true)]
        velocity: i32,
    },

    /// Move every axis by relative pulses, one value per axis.
    MoveAll {
        #[arg(required = true, allow_negative_numbers = true)]
        pulses: Vec<i32>,
    },

    /// Run every axis at a velocity, one value per axis.
    MoveAllVel {
        #[arg(required = true, allow_negative_numbers = true)]
        velocities: Vec<i32>,
    },

    /// Stop an axis.
    Stop {
        #[arg(long, short)]
        axis: u8,
        /// Stop immediately instead of decelerating.
        #[arg(long)]
        emergency: bool,
    },

    /// Drive an axis to its home reference.
    Home {
        #[arg(long, short)]
        axis: u8,
        velocity: i32,
    },

    /// Reset an axis pulse counter.
    Zero {
        #[arg(long, short)]
        axis: u8,
    },

    /// Blink the indicator LED.
    Led,

    /// Restore factory defaults.
    Defaults,

    /// Digital I/O.
    Io {
        #[command(subcommand)]
        action: IoAction,
    },

    /// Move a rotation stage to an absolute angle and wait for it.
    Rotate {
        #[arg(long, short, default_value_t = 1)]
        axis: u8,
        degrees: f64,
    },

    /// Print the angle of a rotation stage.
    Angle {
        #[arg(long, short, default_value_t = 1)]
        axis: u8,
    },

    /// Print board events as they happen.
    Monitor {
        /// Duration in seconds.
        #[arg(long, default_value_t = 10)]
        duration: u64,
        /// Poll interval in milliseconds.
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,
    },
}

#[derive(Debug, Subcommand)]
enum IoAction {
    /// Drive an output line.
    Out { line: u8, level: Level },
    /// Read an input line.
    In { line: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Level {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GetField {
    Acc,
    Dec,
    Vel,
    Subdivision,
    Status,
    Pulses,
}

impl GetField {
    fn field(self) -> AxisField {
        match self {
            GetField::Acc => AxisField::Acceleration,
            GetField::Dec => AxisField::Deceleration,
            GetField::Vel => AxisField::Velocity,
            GetField::Subdivision => AxisField::Subdivision,
            GetField::Status => AxisField::Status,
            GetField::Pulses => AxisField::Pulses,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SetField {
    Acc,
    Dec,
    Vel,
    Subdivision,
    SlowStop,
    VelAcc,
    HomePulses,
}

impl SetField {
    fn field(self) -> AxisField {
        match self {
            SetField::Acc => AxisField::Acceleration,
            SetField::Dec => AxisField::Deceleration,
            SetField::Vel => AxisField::Velocity,
            SetField::Subdivision => AxisField::Subdivision,
            SetField::SlowStop => AxisField::SlowStopDeceleration,
            SetField::VelAcc => AxisField::VelocityAcceleration,
            SetField::HomePulses => AxisField::HomePulses,
        }
    }
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Connection settings after merging the config file and the flags.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    port: PortId,
    usb_path: Option<String>,
    baud_rate: Option<u32>,
    command_timeout: Option<Duration>,
    max_retries: Option<u32>,
    io_lines: u8,
}

impl Settings {
    fn merge(cli: &Cli, file: FileConfig) -> Result<Self> {
        let port = cli.port.or(file.port).unwrap_or(0);
        let port = PortId::from_vendor(port).context("invalid --port")?;
        Ok(Settings {
            port,
            usb_path: cli.usb_path.clone().or(file.usb_path),
            baud_rate: cli.baud.or(file.baud_rate),
            command_timeout: cli
                .timeout_ms
                .or(file.command_timeout_ms)
                .map(Duration::from_millis),
            max_retries: cli.retries.or(file.max_retries),
            io_lines: cli.io_lines.or(file.io_lines).unwrap_or(DEFAULT_IO_LINES),
        })
    }

    fn builder(&self) -> BoardBuilder {
        let mut builder = BoardBuilder::new().port(self.port).io_lines(self.io_lines);
        if let Some(path) = &self.usb_path {
            builder = builder.usb_path(path);
        }
        if let Some(baud) = self.baud_rate {
            builder = builder.baud_rate(baud);
        }
        if let Some(timeout) = self.command_timeout {
            builder = builder.command_timeout(timeout);
        }
        if let Some(n) = self.max_retries {
            builder = builder.max_retries(n);
        }
        builder
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

async fn open_board(cli: &Cli, settings: &Settings) -> Result<Board> {
    let builder = settings.builder();
    if cli.mock {
        let handle = SimHandle::new(cli.mock_axes, settings.io_lines);
        return builder
            .build_with_connector(&handle.connector())
            .await
            .context("opening simulated board");
    }
    builder
        .build()
        .await
        .with_context(|| format!("opening board on {}", settings.port))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_info(board: &Board) -> Result<()> {
    let info = board.info();
    println!("Port:       {}", info.port);
    println!("Axes:       {}", info.axis_count);
    println!("I/O lines:  {}", info.io_lines);
    println!("State:      {}", board.state());
    Ok(())
}

async fn cmd_get(board: &Board, field: GetField, axis: u8) -> Result<()> {
    let value = board.get_param(axis, field.field()).await?;
    if field == GetField::Status {
        let status = wjmotion::AxisStatus::from_raw(value);
        println!("axis {axis} status: {value:#06x} ({status:?})");
    } else {
        println!("axis {axis} {}: {value}", field.field());
    }
    Ok(())
}

async fn cmd_status(board: &Board) -> Result<()> {
    let status = board.get_axes_status().await?;
    let pulses = board.get_axes_pulses().await?;
    println!("{:>4}  {:>12}  {:<8}  STATUS", "AXIS", "PULSES", "STATE");
    for (i, (s, p)) in status.iter().zip(&pulses).enumerate() {
        let state = if s.is_faulted() {
            "fault"
        } else if s.is_moving() {
            "moving"
        } else {
            "idle"
        };
        println!("{:>4}  {:>12}  {:<8}  {:?}", i + 1, p, state, s);
    }
    Ok(())
}

async fn cmd_rotate(board: &Board, axis: u8, degrees: f64) -> Result<()> {
    let rotator = Rotator::new(board, axis)?;
    let start = Instant::now();
    let status = rotator.go_to_angle(degrees).await?;
    println!(
        "axis {axis} at {:.2} degrees ({:.1} s)",
        status.degrees,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn cmd_monitor(board: &Board, duration: u64, interval_ms: u64) -> Result<()> {
    let mut events = board.subscribe();
    let deadline = Instant::now() + Duration::from_secs(duration);
    let mut poll = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));

    println!("Monitoring board events for {duration} s...");
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => println!("[event] {event:?}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    println!("[warning] missed {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = poll.tick() => {
                // Polling refreshes the cache, which is what emits events.
                if let Err(e) = board.get_axes_status().await {
                    bail!("status poll failed: {e}");
                }
                board.get_axes_pulses().await?;
            }
            _ = tokio::time::sleep(remaining) => break,
        }
    }
    Ok(())
}

async fn run(cli: &Cli, board: &Board) -> Result<()> {
    match &cli.command {
        Command::Info => cmd_info(board).await,
        Command::Axes => {
            println!("{}", board.get_axes_num().await?);
            Ok(())
        }
        Command::Get { field, axis } => cmd_get(board, *field, *axis).await,
        Command::Set { field, axis, value } => {
            board.set_param(*axis, field.field(), *value).await?;
            println!("axis {axis} {} set to {value}", field.field());
            Ok(())
        }
        Command::Status => cmd_status(board).await,
        Command::Move { axis, pulses } => Ok(board.move_axis_pulses(*axis, *pulses).await?),
        Command::MoveVel { axis, velocity } => Ok(board.move_axis_vel(*axis, *velocity).await?),
        Command::MoveAll { pulses } => Ok(board.move_axes_pulses(pulses).await?),
        Command::MoveAllVel { velocities } => Ok(board.move_axes_vel(velocities).await?),
        Command::Stop { axis, emergency } => {
            if *emergency {
                board.emergency_stop(*axis).await?;
            } else {
                board.slow_stop(*axis).await?;
            }
            Ok(())
        }
        Command::Home { axis, velocity } => Ok(board.home(*axis, *velocity).await?),
        Command::Zero { axis } => Ok(board.set_axis_pulses_zero(*axis).await?),
        Command::Led => Ok(board.led_twinkle().await?),
        Command::Defaults => {
            board.restore_defaults().await?;
            println!("factory defaults restored");
            Ok(())
        }
        Command::Io { action } => match action {
            IoAction::Out { line, level } => {
                Ok(board.io_output(*line, *level == Level::High).await?)
            }
            IoAction::In { line } => {
                let high = board.io_input(*line).await?;
                println!("input {line}: {}", if high { "high" } else { "low" });
                Ok(())
            }
        },
        Command::Rotate { axis, degrees } => cmd_rotate(board, *axis, *degrees).await,
        Command::Angle { axis } => {
            let angle = Rotator::new(board, *axis)?.read_angle().await?;
            println!("axis {axis} at {angle:.2} degrees");
            Ok(())
        }
        Command::Monitor {
            duration,
            interval_ms,
        } => cmd_monitor(board, *duration, *interval_ms).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let settings = Settings::merge(&cli, file)?;
    tracing::debug!(?settings, "connection settings");

    let board = open_board(&cli, &settings).await?;
    let result = run(&cli, &board).await;
    board.close().await.ok();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("wj").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn parse_get() {
        let cli = parse(&["--port", "3", "get", "vel", "--axis", "2"]);
        assert_eq!(cli.port, Some(3));
        match cli.command {
            Command::Get { field, axis } => {
                assert_eq!(field, GetField::Vel);
                assert_eq!(axis, 2);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_negative_values() {
        let cli = parse(&["move", "-a", "1", "-500"]);
        assert!(matches!(
            cli.command,
            Command::Move {
                axis: 1,
                pulses: -500
            }
        ));
        let cli = parse(&["move-all", "10", "-20", "30", "-40"]);
        match cli.command {
            Command::MoveAll { pulses } => assert_eq!(pulses, vec![10, -20, 30, -40]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_set_only_fields() {
        let cli = parse(&["set", "slow-stop", "--axis", "4", "800"]);
        match cli.command {
            Command::Set { field, axis, value } => {
                assert_eq!(field.field(), AxisField::SlowStopDeceleration);
                assert_eq!(axis, 4);
                assert_eq!(value, 800);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parse_io_and_verbosity() {
        let cli = parse(&["-vv", "--mock", "io", "out", "3", "high"]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.mock);
        assert!(matches!(
            cli.command,
            Command::Io {
                action: IoAction::Out {
                    line: 3,
                    level: Level::High
                }
            }
        ));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(Cli::try_parse_from(["wj", "get", "speed", "--axis", "1"]).is_err());
        assert!(Cli::try_parse_from(["wj", "get", "vel"]).is_err());
        assert!(Cli::try_parse_from(["wj", "move-all"]).is_err());
        assert!(Cli::try_parse_from(["wj", "--mock-axes", "8", "info"]).is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let cli = parse(&["--baud", "9600", "--retries", "0", "info"]);
        let file = FileConfig {
            port: Some(2),
            baud_rate: Some(115_200),
            command_timeout_ms: Some(300),
            io_lines: Some(16),
            ..FileConfig::default()
        };
        let s = Settings::merge(&cli, file).unwrap();
        assert_eq!(s.port, PortId::Serial(2));
        assert_eq!(s.baud_rate, Some(9600));
        assert_eq!(s.max_retries, Some(0));
        assert_eq!(s.command_timeout, Some(Duration::from_millis(300)));
        assert_eq!(s.io_lines, 16);
    }

    #[test]
    fn defaults_without_config() {
        let s = Settings::merge(&parse(&["info"]), FileConfig::default()).unwrap();
        assert_eq!(s.port, PortId::Usb);
        assert_eq!(s.io_lines, DEFAULT_IO_LINES);
        assert!(Settings::merge(&parse(&["--port", "-2", "info"]), FileConfig::default()).is_err());
    }

    #[tokio::test]
    async fn mock_board_runs_commands() {
        let cli = parse(&["--mock", "--mock-axes", "8", "move-all", "1", "2", "3", "4", "5", "6", "7", "8"]);
        let settings = Settings::merge(&cli, FileConfig::default()).unwrap();
        let board = open_board(&cli, &settings).await.unwrap();
        assert_eq!(board.axis_count(), 8);
        run(&cli, &board).await.unwrap();
        assert_eq!(
            board.get_axes_pulses().await.unwrap(),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );

        let rotate = parse(&["--mock", "rotate", "--axis", "1", "180"]);
        run(&rotate, &board).await.unwrap();
        assert_eq!(board.get_axis_pulses(1).await.unwrap(), 25_002);
    }

    #[tokio::test]
    async fn mock_board_reports_validation_errors() {
        let cli = parse(&["--mock", "get", "acc", "--axis", "5"]);
        let settings = Settings::merge(&cli, FileConfig::default()).unwrap();
        let board = open_board(&cli, &settings).await.unwrap();
        let err = run(&cli, &board).await.unwrap_err();
        assert!(err.to_string().contains("axis 5"));
    }
}
