//! Top-level avoidance state machine.
//!
//! The supervisor is the only blocking context in the core: it parks on the
//! obstacle channel, and on each signal decides whether an avoidance
//! maneuver is warranted, runs it, and hands control back to the operator's
//! intent. The latch is cleared here and only here, at the top of every
//! wait cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info};

use crate::config::MIN_CLEARANCE_CM;
use crate::hal::{self, Hal};
use crate::motor::{self, Direction, Motor};
use crate::remote::{buttons, ButtonState, TargetSpeed};
use crate::sonar::{ObstacleSensor, ObstacleSignal, ObstacleWait};

/// Maneuver timing. The spin pulse is a fixed duration per iteration, not
/// derived from speed or turn radius; tune it for the vehicle.
#[derive(Clone, Copy, Debug)]
pub struct AvoidanceTuning {
    pub clearance_cm: u32,
    /// Settle time after stopping, before each rotation pulse.
    pub pause: Duration,
    /// Length of one in-place rotation pulse.
    pub spin_pulse: Duration,
}

impl Default for AvoidanceTuning {
    fn default() -> Self {
        AvoidanceTuning {
            clearance_cm: MIN_CLEARANCE_CM,
            pause: Duration::from_secs(1),
            spin_pulse: Duration::from_millis(500),
        }
    }
}

pub struct Supervisor {
    hal: Arc<dyn Hal>,
    left: Arc<Motor>,
    right: Arc<Motor>,
    sensor: Arc<ObstacleSensor>,
    wait: ObstacleWait,
    target: Arc<TargetSpeed>,
    buttons: Arc<ButtonState>,
    remote_connected: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    tuning: AvoidanceTuning,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        hal: Arc<dyn Hal>,
        left: Arc<Motor>,
        right: Arc<Motor>,
        sensor: Arc<ObstacleSensor>,
        wait: ObstacleWait,
        target: Arc<TargetSpeed>,
        buttons: Arc<ButtonState>,
        remote_connected: Arc<AtomicBool>,
        tuning: AvoidanceTuning,
    ) -> Self {
        Supervisor {
            hal,
            left,
            right,
            sensor,
            wait,
            target,
            buttons,
            remote_connected,
            running: Arc::new(AtomicBool::new(true)),
            tuning,
        }
    }

    /// Flag checked between blocking sections; pair a store with
    /// `ObstacleGate::shutdown()` to actually wake the loop.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn start_background(self: Arc<Self>) -> JoinHandle<()> {
        thread::spawn(move || self.run())
    }

    /// Block on the obstacle channel and run avoidance maneuvers until
    /// shutdown. With avoidance disabled the sensor never signals and this
    /// simply parks until the shutdown wake-up.
    pub fn run(&self) {
        loop {
            self.wait.rearm();
            let signal = self.wait.wait();
            if signal == ObstacleSignal::Shutdown || !self.running.load(Ordering::Acquire) {
                break;
            }

            // Only avoid while the car is actually being driven forward.
            if !self.forward_intent() {
                debug!("obstacle signal ignored: no forward drive intent");
                continue;
            }

            self.avoid();
            if !self.running.load(Ordering::Acquire) {
                break;
            }

            // Clearance achieved (or the operator let go): resume if the
            // drive is still wanted, otherwise stay stopped.
            if self.forward_intent() {
                let v = self.target.get();
                self.left.set_speed(v, Direction::Forward);
                self.right.set_speed(v, Direction::Forward);
            }
        }
        debug!("supervisor stopped");
    }

    fn avoid(&self) {
        info!("obstacle at {} cm, starting avoidance", self.sensor.distance_cm());
        while self.sensor.distance_cm() < self.tuning.clearance_cm {
            self.left.stop();
            self.right.stop();
            hal::sleep(&*self.hal, self.tuning.pause);

            if !self.running.load(Ordering::Acquire) {
                return;
            }
            if !self.forward_intent() {
                debug!("avoidance aborted: forward drive released");
                return;
            }

            // Turn away: to the left if the operator is holding the left
            // turn button, to the right by default.
            let sign = if self.remote_connected.load(Ordering::Acquire)
                && self.buttons.held(buttons::TURN_LEFT)
            {
                -1
            } else {
                1
            };
            motor::rotate_in_place(&self.left, &self.right, sign);
            hal::sleep(&*self.hal, self.tuning.spin_pulse);
            self.left.stop();
            self.right.stop();
        }
    }

    /// Forward intent: an active remote session must hold the forward
    /// button; without a remote the car drives itself, so intent is a given.
    fn forward_intent(&self) -> bool {
        !self.remote_connected.load(Ordering::Acquire) || self.buttons.held(buttons::FORWARD)
    }
}
