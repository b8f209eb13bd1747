//! Hardware access layer seam.
//!
//! The control core only ever talks to pins through this trait. Edge
//! interrupts and periodic timers are not part of it: the embedding's
//! dispatch loop calls into the components (`ObstacleSensor::on_echo_edge`,
//! `Motor::record_pulse`, ...) with `(level, tick)` pairs, which keeps the
//! callback bodies plain method calls that any test can drive directly.

pub mod mock;

use std::time::Duration;
use thiserror::Error;

pub type Pin = u8;

/// Digital line level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Input pull configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pull {
    Floating,
    Up,
    Down,
}

#[derive(Debug, Error)]
pub enum HalError {
    #[error("hardware layer init failed: {0}")]
    Init(String),
    #[error("cannot configure pin {0}")]
    PinConfig(Pin),
    #[error("cannot read pin {0}")]
    Read(Pin),
}

/// Digital I/O, PWM and a wrapping microsecond clock.
///
/// Implementations must be callable from any thread; all methods are expected
/// to return promptly (no blocking beyond `sleep_us`).
pub trait Hal: Send + Sync {
    fn set_output(&self, pin: Pin) -> Result<(), HalError>;
    fn set_input(&self, pin: Pin, pull: Pull) -> Result<(), HalError>;

    fn write(&self, pin: Pin, level: Level);
    fn read(&self, pin: Pin) -> Result<Level, HalError>;

    fn set_pwm_frequency(&self, pin: Pin, hz: u32) -> Result<(), HalError>;
    fn set_pwm_range(&self, pin: Pin, range: u32) -> Result<(), HalError>;
    fn set_pwm_duty(&self, pin: Pin, duty: u32);

    /// Microsecond tick, wraps at u32::MAX like the underlying timers do.
    fn now_us(&self) -> u32;
    fn sleep_us(&self, us: u32);

    /// Return the pin to its unconfigured state.
    fn release(&self, pin: Pin);
}

/// Convenience for the handful of callers that think in `Duration`.
pub fn sleep(hal: &dyn Hal, d: Duration) {
    hal.sleep_us(d.as_micros().min(u32::MAX as u128) as u32);
}
