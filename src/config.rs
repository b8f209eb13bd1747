//! Command-line options, pin assignments and tuning constants.

use std::path::PathBuf;
use thiserror::Error;

/// Fixed BCM pin assignments for the car.
pub mod pins {
    use crate::hal::Pin;

    pub const LEFT_ENABLE: Pin = 17;
    pub const LEFT_IN1: Pin = 27;
    pub const LEFT_IN2: Pin = 22;
    pub const LEFT_ENCODER: Pin = 5;

    pub const RIGHT_ENABLE: Pin = 16;
    pub const RIGHT_IN1: Pin = 20;
    pub const RIGHT_IN2: Pin = 21;
    pub const RIGHT_ENCODER: Pin = 6;

    pub const SONAR_TRIGGER: Pin = 23;
    pub const SONAR_ECHO: Pin = 24;

    pub const HORN: Pin = 26;
    pub const BATTERY_SENSE: Pin = 19;
    pub const SCAN_BUTTON: Pin = 12;
}

/// Number of distance samples in the moving-average window.
pub const SONAR_WINDOW: usize = 2;
/// Holes per revolution in the encoder discs.
pub const ENCODER_HOLES: u32 = 21;
/// Proportional gain of the wheel-sync controller, applied as (KP * err) / 10.
pub const SPEED_KP: i32 = 5;
/// Distance below which an obstacle is considered present, in cm.
pub const MIN_CLEARANCE_CM: u32 = 50;
/// Target-speed change per press-release of the speed buttons.
pub const SPEED_STEP: i32 = 10;
/// Target speed at startup and after a remote rescan.
pub const DEFAULT_SPEED: i32 = 50;
/// Extra duty put on the outer wheel during a hard turn.
pub const HARD_TURN_BOOST: i32 = 30;

const DEFAULT_ALARM_FILE: &str = "sounds/police.wav";

#[derive(Debug, Error)]
#[error("usage: {program} [-r] [-b] [-e] [-s] [-f <alarm file>]")]
pub struct UsageError {
    program: String,
}

/// Parsed command-line options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Remote-only mode: no ranging, no autonomous driving.
    pub remote_only: bool,
    /// Gate startup on motor battery level and recheck it periodically.
    pub check_battery: bool,
    /// Enable the encoder-based wheel-sync controller.
    pub use_encoder: bool,
    /// Soft turns (stop + reverse the inner wheel) instead of hard turns.
    pub soft_turn: bool,
    /// Sound played on the alert button.
    pub alarm_file: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            remote_only: false,
            check_battery: false,
            use_encoder: false,
            soft_turn: false,
            alarm_file: PathBuf::from(DEFAULT_ALARM_FILE),
        }
    }
}

impl Options {
    /// Parse `argv` (program name first, as from `std::env::args`).
    pub fn parse<I: IntoIterator<Item = String>>(argv: I) -> Result<Options, UsageError> {
        let mut args = argv.into_iter();
        let program = args.next().unwrap_or_else(|| "robocar".into());
        let usage = || UsageError {
            program: program.clone(),
        };

        let mut opts = Options::default();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-r" => opts.remote_only = true,
                "-b" => opts.check_battery = true,
                "-e" => opts.use_encoder = true,
                "-s" => opts.soft_turn = true,
                "-f" => {
                    let file = args.next().ok_or_else(usage)?;
                    opts.alarm_file = PathBuf::from(file);
                }
                _ => return Err(usage()),
            }
        }
        Ok(opts)
    }
}
