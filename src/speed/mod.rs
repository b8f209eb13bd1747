//! Closed-loop wheel synchronization.
//!
//! A periodic tick reads both motors' pulse counters, derives rpm, and when
//! the car is meant to drive straight (both sides commanded at the same
//! nonzero speed) nudges the applied duties toward equal pulse counts with a
//! proportional-only correction.

use std::sync::{Arc, Mutex};

use log::{debug, warn};

use crate::config::{ENCODER_HOLES, SPEED_KP};
use crate::motor::{self, Motor};

/// Pulse-count differences within this band are left alone.
const PULSE_TOLERANCE: i32 = 1;

#[derive(Clone, Copy)]
struct Baseline {
    pulses: u32,
    tick_us: u32,
}

#[derive(Default)]
struct SideHistory {
    baseline: Option<Baseline>,
}

pub struct SpeedController {
    left: Arc<Motor>,
    right: Arc<Motor>,
    history: Mutex<(SideHistory, SideHistory)>,
    kp: i32,
}

impl SpeedController {
    pub fn new(left: Arc<Motor>, right: Arc<Motor>) -> Self {
        SpeedController {
            left,
            right,
            history: Mutex::new(Default::default()),
            kp: SPEED_KP,
        }
    }

    /// One control-loop pass. Invoked from a periodic worker every few
    /// hundred milliseconds.
    pub fn tick(&self) {
        let mut history = self.history.lock().unwrap();
        let lpulses = Self::measure(&self.left, &mut history.0);
        let rpulses = Self::measure(&self.right, &mut history.1);
        drop(history);

        if self.left.commanded_speed() > 0 && self.left.rpm() == 0 {
            warn!("left motor stalled");
        }
        if self.right.commanded_speed() > 0 && self.right.rpm() == 0 {
            warn!("right motor stalled");
        }

        // Correct only on straight-line intent: both sides commanded at the
        // same nonzero speed.
        let target = self.left.commanded_speed();
        if target != self.right.commanded_speed() || target == 0 {
            return;
        }
        let error = lpulses as i32 - rpulses as i32;
        if error.abs() <= PULSE_TOLERANCE {
            return;
        }
        let delta = (self.kp * error) / 10;
        debug!("wheel sync: error {} pulses, trimming duty by {}", error, delta);
        motor::trim_duties(&self.left, &self.right, delta);
    }

    /// Pulse delta since the previous tick; updates the motor's rpm. The
    /// first tick (or a tick with no elapsed time) reports the motor as
    /// stopped and just records the baseline.
    fn measure(motor: &Motor, history: &mut SideHistory) -> u32 {
        let pulses_now = motor.pulse_count();
        let tick_now = motor.last_pulse_us();

        let mut pulses = 0;
        match history.baseline {
            Some(prev) => {
                let elapsed = tick_now.wrapping_sub(prev.tick_us);
                if elapsed == 0 {
                    motor.set_rpm(0);
                } else {
                    pulses = pulses_now.wrapping_sub(prev.pulses);
                    let freq = (pulses as u64 * 1_000_000) / elapsed as u64;
                    // two edges per encoder hole
                    let rpm = freq * 60 / ENCODER_HOLES as u64 / 2;
                    motor.set_rpm(rpm as u32);
                }
            }
            None => motor.set_rpm(0),
        }
        history.baseline = Some(Baseline {
            pulses: pulses_now,
            tick_us: tick_now,
        });
        pulses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockHal;
    use crate::hal::Hal;
    use crate::motor::{Direction, MotorPins, Side};

    fn rig() -> (Arc<MockHal>, Arc<Motor>, Arc<Motor>, SpeedController) {
        let hal = Arc::new(MockHal::new());
        let left = Arc::new(Motor::new(
            Side::Left,
            MotorPins {
                enable: 17,
                in1: 27,
                in2: 22,
                encoder: 5,
            },
            hal.clone() as Arc<dyn Hal>,
        ));
        let right = Arc::new(Motor::new(
            Side::Right,
            MotorPins {
                enable: 16,
                in1: 20,
                in2: 21,
                encoder: 6,
            },
            hal.clone() as Arc<dyn Hal>,
        ));
        let ctl = SpeedController::new(left.clone(), right.clone());
        (hal, left, right, ctl)
    }

    fn pulse_n(motor: &Motor, n: u32, last_tick: u32) {
        for i in 1..=n {
            motor.record_pulse(last_tick / n * i);
        }
    }

    #[test]
    fn first_tick_reports_stopped_and_sets_baseline() {
        let (_hal, left, right, ctl) = rig();
        left.set_speed(50, Direction::Forward);
        right.set_speed(50, Direction::Forward);

        ctl.tick();
        assert_eq!(left.rpm(), 0);
        assert_eq!(right.rpm(), 0);
        // no correction from the baseline-only pass
        assert_eq!(left.duty(), 50);
        assert_eq!(right.duty(), 50);
    }

    #[test]
    fn proportional_trim_for_unequal_pulse_counts() {
        let (_hal, left, right, ctl) = rig();
        left.set_speed(50, Direction::Forward);
        right.set_speed(50, Direction::Forward);
        ctl.tick(); // baseline

        // 12 left pulses vs 9 right pulses over the same second
        pulse_n(&left, 12, 1_000_000);
        pulse_n(&right, 9, 1_000_000);
        ctl.tick();

        // error 3, kp 5: (5*3)/10 = 1 duty shifted
        assert_eq!(left.duty(), 49);
        assert_eq!(right.duty(), 51);
        // commanded speeds stay untouched, only the applied duty moves
        assert_eq!(left.commanded_speed(), 50);
        assert_eq!(right.commanded_speed(), 50);
    }

    #[test]
    fn rpm_derived_from_pulse_frequency() {
        let (_hal, left, _right, ctl) = rig();
        ctl.tick();
        pulse_n(&left, 42, 1_000_000);
        ctl.tick();
        // 42 pulses/s -> 42*60/21/2 = 60 rpm
        assert_eq!(left.rpm(), 60);
    }

    #[test]
    fn tolerance_band_leaves_duties_alone() {
        let (_hal, left, right, ctl) = rig();
        left.set_speed(50, Direction::Forward);
        right.set_speed(50, Direction::Forward);
        ctl.tick();

        pulse_n(&left, 10, 1_000_000);
        pulse_n(&right, 9, 1_000_000);
        ctl.tick();

        assert_eq!(left.duty(), 50);
        assert_eq!(right.duty(), 50);
    }

    #[test]
    fn no_correction_when_turning_or_stopped() {
        let (_hal, left, right, ctl) = rig();

        // stopped: both commanded 0
        ctl.tick();
        pulse_n(&left, 12, 1_000_000);
        pulse_n(&right, 2, 1_000_000);
        ctl.tick();
        assert_eq!(left.duty(), 0);
        assert_eq!(right.duty(), 0);

        // turning: unequal commanded speeds
        left.set_speed(80, Direction::Forward);
        right.set_speed(50, Direction::Forward);
        pulse_n(&left, 12, 3_000_000);
        pulse_n(&right, 2, 3_000_000);
        ctl.tick();
        assert_eq!(left.duty(), 80);
        assert_eq!(right.duty(), 50);
    }
}
