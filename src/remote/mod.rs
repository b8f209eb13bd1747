//! Remote-control command interpretation.
//!
//! The connectivity stack delivers `RemoteEvent`s (button bitmasks and
//! status messages); `CommandInterpreter` turns button transitions into
//! target-speed changes, drive commands, horn and alert requests. Feedback
//! toward the handset (LEDs, rumble) goes through the `RemoteLink` seam.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::audio::Audio;
use crate::config::{DEFAULT_SPEED, HARD_TURN_BOOST, SPEED_STEP};
use crate::hal::Level;
use crate::horn::Horn;
use crate::motor::{Direction, Motor};
use crate::workers::WorkerSet;
use thiserror::Error;

/// Button bits as delivered by the handset.
pub mod buttons {
    pub const REVERSE: u16 = 0x0004;
    pub const FORWARD: u16 = 0x0008;
    pub const SPEED_DOWN: u16 = 0x0010;
    pub const TURN_LEFT: u16 = 0x0100;
    pub const TURN_RIGHT: u16 = 0x0200;
    pub const HORN: u16 = 0x0400;
    pub const ALERT: u16 = 0x0800;
    pub const SPEED_UP: u16 = 0x1000;
}

/// Events pushed in by the connectivity stack's callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteEvent {
    /// Current bitmask of held buttons.
    Buttons(u16),
    /// Handset battery percentage from a status message.
    Battery(u8),
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("no remote controller found")]
    NotFound,
    #[error("remote connection failed: {0}")]
    Connection(String),
}

/// Seam to the remote-controller connectivity stack.
pub trait RemoteLink: Send + Sync {
    fn connect(&self, timeout: Duration) -> Result<(), RemoteError>;
    fn disconnect(&self);
    /// Light `count` LEDs on the handset (1-4), the speed-tier display.
    fn set_speed_leds(&self, count: u8);
    fn rumble(&self, on: bool);
    /// Drain the events the stack has queued since the last call. Links
    /// that never produce events can rely on the default.
    fn poll_events(&self) -> Vec<RemoteEvent> {
        Vec::new()
    }
}

/// Link for hosts without a connectivity stack: never connects.
pub struct NullLink;

impl RemoteLink for NullLink {
    fn connect(&self, _timeout: Duration) -> Result<(), RemoteError> {
        Err(RemoteError::NotFound)
    }
    fn disconnect(&self) {}
    fn set_speed_leds(&self, _count: u8) {}
    fn rumble(&self, _on: bool) {}
}

/// Bitmask of currently held buttons, shared with the supervisor.
#[derive(Default)]
pub struct ButtonState {
    bits: AtomicU16,
}

impl ButtonState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, bits: u16) {
        self.bits.store(bits, Ordering::Release);
    }

    pub fn held(&self, mask: u16) -> bool {
        self.bits.load(Ordering::Acquire) & mask != 0
    }
}

/// Operator-selected cruising speed, 0-100.
pub struct TargetSpeed {
    value: AtomicI32,
}

impl TargetSpeed {
    pub fn new(initial: i32) -> Self {
        TargetSpeed {
            value: AtomicI32::new(initial.clamp(0, 100)),
        }
    }

    pub fn get(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }

    /// Saturating adjust; returns the new value.
    pub fn bump(&self, delta: i32) -> i32 {
        self.value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some((v + delta).clamp(0, 100))
            })
            .map(|old| (old + delta).clamp(0, 100))
            .unwrap_or_else(|v| v)
    }

    pub fn reset(&self, value: i32) {
        self.value.store(value.clamp(0, 100), Ordering::Release);
    }

    /// LED count (1-4) representing the current speed tier.
    pub fn led_count(&self) -> u8 {
        (self.get() / 26) as u8 + 1
    }
}

/// Per-event interpreter for handset input.
pub struct CommandInterpreter {
    left: Arc<Motor>,
    right: Arc<Motor>,
    target: Arc<TargetSpeed>,
    buttons: Arc<ButtonState>,
    horn: Arc<Horn>,
    audio: Arc<Audio>,
    link: Arc<dyn RemoteLink>,
    workers: Arc<WorkerSet>,
    alarm_file: PathBuf,
    soft_turn: bool,
    previous: AtomicU16,
}

impl CommandInterpreter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: Arc<Motor>,
        right: Arc<Motor>,
        target: Arc<TargetSpeed>,
        buttons: Arc<ButtonState>,
        horn: Arc<Horn>,
        audio: Arc<Audio>,
        link: Arc<dyn RemoteLink>,
        workers: Arc<WorkerSet>,
        alarm_file: PathBuf,
        soft_turn: bool,
    ) -> Self {
        CommandInterpreter {
            left,
            right,
            target,
            buttons,
            horn,
            audio,
            link,
            workers,
            alarm_file,
            soft_turn,
            previous: AtomicU16::new(0),
        }
    }

    pub fn handle(&self, event: RemoteEvent) {
        match event {
            RemoteEvent::Buttons(bits) => self.handle_buttons(bits),
            RemoteEvent::Battery(pct) => {
                info!("remote battery at {}%", pct);
                self.link.set_speed_leds(self.target.led_count());
            }
        }
    }

    fn handle_buttons(&self, bits: u16) {
        self.buttons.store(bits);
        let prev = self.previous.load(Ordering::Acquire);
        let released = |mask: u16| prev & mask != 0 && bits & mask == 0;
        let pressed = |mask: u16| prev & mask == 0 && bits & mask != 0;

        // A completed press-release of the speed buttons moves the target
        // by one step and mirrors the tier on the handset LEDs.
        if released(buttons::SPEED_UP) {
            let v = self.target.bump(SPEED_STEP);
            info!("target speed up to {}", v);
            self.link.set_speed_leds(self.target.led_count());
        }
        if released(buttons::SPEED_DOWN) {
            let v = self.target.bump(-SPEED_STEP);
            info!("target speed down to {}", v);
            self.link.set_speed_leds(self.target.led_count());
        }

        let (vl, dl, vr, dr) = self.drive_targets(bits);
        self.left.set_speed(vl, dl);
        self.right.set_speed(vr, dr);

        if pressed(buttons::HORN) {
            self.horn.on();
        }
        if released(buttons::HORN) {
            self.horn.off();
        }

        if pressed(buttons::ALERT) {
            self.audio.play(self.alarm_file.clone(), &self.workers);
        }

        self.previous.store(bits, Ordering::Release);
    }

    /// Provisional (speed, direction) per side from the held buttons.
    fn drive_targets(&self, bits: u16) -> (i32, Direction, i32, Direction) {
        if bits & (buttons::FORWARD | buttons::REVERSE) == 0 {
            return (0, Direction::Forward, 0, Direction::Forward);
        }
        let dir = if bits & buttons::FORWARD != 0 {
            Direction::Forward
        } else {
            Direction::Backward
        };
        let v = self.target.get();
        let (mut vl, mut dl) = (v, dir);
        let (mut vr, mut dr) = (v, dir);

        // Soft turn spins the inner wheel backwards at 0 target (the sign
        // matters once the sync loop trims duty onto it); hard turn biases
        // the outer wheel and leaves the inner one alone.
        if bits & buttons::TURN_RIGHT != 0 {
            if self.soft_turn {
                vr = 0;
                dr = dr.opposite();
            } else {
                vl += HARD_TURN_BOOST;
            }
        }
        if bits & buttons::TURN_LEFT != 0 {
            if self.soft_turn {
                vl = 0;
                dl = dl.opposite();
            } else {
                vr += HARD_TURN_BOOST;
            }
        }
        (vl, dl, vr, dr)
    }
}

/// Debounced handler for the scan/shutdown push button (pull-up wiring:
/// the pin reads low while pressed).
pub struct ScanButton {
    left: Arc<Motor>,
    right: Arc<Motor>,
    target: Arc<TargetSpeed>,
    horn: Arc<Horn>,
    link: Arc<dyn RemoteLink>,
    connected: Arc<AtomicBool>,
    shutdown_requested: Arc<AtomicBool>,
    remote_only: bool,
    pressed_at_us: AtomicU32,
    pressed: AtomicBool,
}

/// Holding the button this long requests an orderly shutdown instead of a
/// remote rescan.
const LONG_PRESS_US: u32 = 2_000_000;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

impl ScanButton {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        left: Arc<Motor>,
        right: Arc<Motor>,
        target: Arc<TargetSpeed>,
        horn: Arc<Horn>,
        link: Arc<dyn RemoteLink>,
        connected: Arc<AtomicBool>,
        shutdown_requested: Arc<AtomicBool>,
        remote_only: bool,
    ) -> Self {
        ScanButton {
            left,
            right,
            target,
            horn,
            link,
            connected,
            shutdown_requested,
            remote_only,
            pressed_at_us: AtomicU32::new(0),
            pressed: AtomicBool::new(false),
        }
    }

    pub fn on_edge(&self, level: Level, tick_us: u32) {
        match level {
            Level::Low => {
                // button pressed
                self.pressed.store(true, Ordering::Release);
                self.pressed_at_us.store(tick_us, Ordering::Release);
            }
            Level::High => {
                // ignore a release without a matching press (spurious edge)
                if !self.pressed.swap(false, Ordering::AcqRel) {
                    return;
                }
                let held = tick_us.wrapping_sub(self.pressed_at_us.load(Ordering::Acquire));
                if held > LONG_PRESS_US {
                    info!("scan button held {} ms: requesting shutdown", held / 1000);
                    self.shutdown_requested.store(true, Ordering::Release);
                    return;
                }
                self.rescan();
            }
        }
    }

    /// Short press: park the car, reset the cruising speed and look for a
    /// handset again. Without one the car goes back to driving itself,
    /// unless remote-only mode forbids that.
    fn rescan(&self) {
        self.left.set_speed(0, Direction::Forward);
        self.right.set_speed(0, Direction::Forward);
        self.target.reset(DEFAULT_SPEED);

        // audible cue that the scan started
        self.horn.beep_blocking(5);

        match self.link.connect(CONNECT_TIMEOUT) {
            Ok(()) => {
                info!("remote controller connected");
                self.connected.store(true, Ordering::Release);
                self.link.rumble(true);
                self.link.set_speed_leds(self.target.led_count());
                self.link.rumble(false);
            }
            Err(e) => {
                warn!("{}; continuing without remote", e);
                self.connected.store(false, Ordering::Release);
                if !self.remote_only {
                    self.left.set_speed(self.target.get(), Direction::Forward);
                    self.right.set_speed(self.target.get(), Direction::Forward);
                }
            }
        }
    }
}
