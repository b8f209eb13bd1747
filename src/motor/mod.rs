//! Drive motor actuation.
//!
//! Each `Motor` exclusively owns its direction pins, commanded speed and
//! applied PWM duty behind a mutex; the rotation counters written by the
//! encoder edge callbacks are atomics so the callbacks never block. Nothing
//! outside this module reaches into the fields.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::warn;

use crate::hal::{Hal, HalError, Level, Pin, Pull};

/// Direction of rotation as seen from the car.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    pub fn opposite(self) -> Direction {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }
}

/// Which side of the car the motor drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// BCM pins wired to one motor driver channel.
#[derive(Clone, Copy, Debug)]
pub struct MotorPins {
    pub enable: Pin,
    pub in1: Pin,
    pub in2: Pin,
    pub encoder: Pin,
}

struct DriveState {
    direction: Direction,
    speed: i32,
    duty: i32,
}

pub struct Motor {
    side: Side,
    pins: MotorPins,
    hal: Arc<dyn Hal>,
    state: Mutex<DriveState>,
    pulses: AtomicU32,
    last_pulse_us: AtomicU32,
    rpm: AtomicU32,
}

impl Motor {
    pub fn new(side: Side, pins: MotorPins, hal: Arc<dyn Hal>) -> Self {
        Motor {
            side,
            pins,
            hal,
            state: Mutex::new(DriveState {
                direction: Direction::Forward,
                speed: 0,
                duty: 0,
            }),
            pulses: AtomicU32::new(0),
            last_pulse_us: AtomicU32::new(0),
            rpm: AtomicU32::new(0),
        }
    }

    /// Configure the direction pins, the PWM channel (100 Hz, 0-100 range)
    /// and, when requested, the encoder input.
    pub fn setup(&self, use_encoder: bool) -> Result<(), HalError> {
        self.hal.set_output(self.pins.in1)?;
        self.hal.set_output(self.pins.in2)?;
        self.hal.set_pwm_frequency(self.pins.enable, 100)?;
        self.hal.set_pwm_range(self.pins.enable, 100)?;
        if use_encoder {
            self.hal.set_input(self.pins.encoder, Pull::Down)?;
        }
        Ok(())
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Command a speed and direction. Speed is clamped to [0,100]; a negative
    /// request is an input error, logged and coerced to 0. Re-commanding the
    /// current (speed, direction) pair performs no pin writes, so rapid
    /// repeated calls never toggle the direction pins.
    pub fn set_speed(&self, speed: i32, direction: Direction) {
        let mut v = speed;
        if v > 100 {
            v = 100;
        }
        if v < 0 {
            warn!("{:?} motor: requested speed {} < 0, using 0", self.side, speed);
            v = 0;
        }

        let mut st = self.state.lock().unwrap();
        if st.speed == v && st.direction == direction {
            return;
        }
        self.write_direction(&mut st, direction);
        st.speed = v;
        st.duty = v;
        self.hal.set_pwm_duty(self.pins.enable, v as u32);
    }

    /// Clear both direction pins and zero speed and duty.
    pub fn stop(&self) {
        let mut st = self.state.lock().unwrap();
        self.hal.write(self.pins.in1, Level::Low);
        self.hal.write(self.pins.in2, Level::Low);
        st.speed = 0;
        st.duty = 0;
        self.hal.set_pwm_duty(self.pins.enable, 0);
    }

    /// Encoder edge: bump the pulse counter and remember the tick.
    /// Called from the edge-dispatch context; never blocks.
    pub fn record_pulse(&self, tick_us: u32) {
        self.pulses.fetch_add(1, Ordering::Relaxed);
        self.last_pulse_us.store(tick_us, Ordering::Relaxed);
    }

    pub fn pulse_count(&self) -> u32 {
        self.pulses.load(Ordering::Relaxed)
    }

    pub fn last_pulse_us(&self) -> u32 {
        self.last_pulse_us.load(Ordering::Relaxed)
    }

    pub fn set_rpm(&self, rpm: u32) {
        self.rpm.store(rpm, Ordering::Relaxed);
    }

    pub fn rpm(&self) -> u32 {
        self.rpm.load(Ordering::Relaxed)
    }

    /// Currently commanded speed, 0-100.
    pub fn commanded_speed(&self) -> i32 {
        self.state.lock().unwrap().speed
    }

    /// Currently applied PWM duty, 0-100.
    pub fn duty(&self) -> i32 {
        self.state.lock().unwrap().duty
    }

    pub fn direction(&self) -> Direction {
        self.state.lock().unwrap().direction
    }

    /// Stop the motor and return its pins to an unconfigured state.
    pub fn release(&self) {
        self.stop();
        self.hal.release(self.pins.in1);
        self.hal.release(self.pins.in2);
        self.hal.release(self.pins.enable);
        self.hal.release(self.pins.encoder);
    }

    fn write_direction(&self, st: &mut DriveState, direction: Direction) {
        match direction {
            Direction::Forward => {
                self.hal.write(self.pins.in1, Level::Low);
                self.hal.write(self.pins.in2, Level::High);
            }
            Direction::Backward => {
                self.hal.write(self.pins.in1, Level::High);
                self.hal.write(self.pins.in2, Level::Low);
            }
        }
        st.direction = direction;
    }
}

/// Spin the car in place at full speed: sign > 0 clockwise (right motor
/// reverses), sign < 0 counter-clockwise.
pub fn rotate_in_place(left: &Motor, right: &Motor, sign: i32) {
    if sign > 0 {
        left.set_speed(100, Direction::Forward);
        right.set_speed(100, Direction::Backward);
    } else {
        left.set_speed(100, Direction::Backward);
        right.set_speed(100, Direction::Forward);
    }
}

/// Shift `delta` duty from the left motor to the right motor, clamped to
/// [0,100] on both sides and pushed to the PWM driver.
///
/// Both motor locks are held for the update; they are always acquired
/// left-then-right, which is the crate-wide order for anything locking both.
pub fn trim_duties(left: &Motor, right: &Motor, delta: i32) {
    debug_assert_eq!(left.side, Side::Left);
    debug_assert_eq!(right.side, Side::Right);

    let mut l = left.state.lock().unwrap();
    let mut r = right.state.lock().unwrap();
    l.duty = (l.duty - delta).clamp(0, 100);
    r.duty = (r.duty + delta).clamp(0, 100);
    left.hal.set_pwm_duty(left.pins.enable, l.duty as u32);
    right.hal.set_pwm_duty(right.pins.enable, r.duty as u32);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::{MockHal, PinOp};
    use rstest::rstest;

    const PINS: MotorPins = MotorPins {
        enable: 17,
        in1: 27,
        in2: 22,
        encoder: 5,
    };
    const RPINS: MotorPins = MotorPins {
        enable: 16,
        in1: 20,
        in2: 21,
        encoder: 6,
    };

    fn motor(hal: &Arc<MockHal>) -> Motor {
        Motor::new(Side::Left, PINS, hal.clone() as Arc<dyn Hal>)
    }

    #[rstest]
    #[case(150, 100)]
    #[case(101, 100)]
    #[case(100, 100)]
    #[case(42, 42)]
    #[case(0, 0)]
    #[case(-1, 0)]
    #[case(-50, 0)]
    fn speed_is_clamped(#[case] requested: i32, #[case] expected: i32) {
        let hal = Arc::new(MockHal::new());
        let m = motor(&hal);
        m.set_speed(requested, Direction::Forward);
        assert_eq!(m.commanded_speed(), expected);
        assert_eq!(m.duty(), expected);
    }

    #[test]
    fn repeated_set_speed_writes_nothing() {
        let hal = Arc::new(MockHal::new());
        let m = motor(&hal);

        m.set_speed(60, Direction::Forward);
        let after_first = hal.ops().len();
        assert!(after_first > 0);

        m.set_speed(60, Direction::Forward);
        assert_eq!(hal.ops().len(), after_first);
    }

    #[test]
    fn direction_pins_follow_direction() {
        let hal = Arc::new(MockHal::new());
        let m = motor(&hal);

        m.set_speed(50, Direction::Forward);
        assert_eq!(
            hal.ops(),
            vec![
                PinOp::Write(PINS.in1, Level::Low),
                PinOp::Write(PINS.in2, Level::High),
                PinOp::PwmDuty(PINS.enable, 50),
            ]
        );

        hal.clear_ops();
        m.set_speed(50, Direction::Backward);
        assert_eq!(
            hal.ops(),
            vec![
                PinOp::Write(PINS.in1, Level::High),
                PinOp::Write(PINS.in2, Level::Low),
                PinOp::PwmDuty(PINS.enable, 50),
            ]
        );
    }

    #[test]
    fn stop_zeroes_everything() {
        let hal = Arc::new(MockHal::new());
        let m = motor(&hal);
        m.set_speed(80, Direction::Backward);
        m.stop();

        assert_eq!(m.commanded_speed(), 0);
        assert_eq!(m.duty(), 0);
        let ops = hal.ops();
        assert_eq!(ops[ops.len() - 1], PinOp::PwmDuty(PINS.enable, 0));
        assert!(ops.contains(&PinOp::Write(PINS.in1, Level::Low)));
        assert!(ops.contains(&PinOp::Write(PINS.in2, Level::Low)));
    }

    #[test]
    fn rotate_in_place_opposes_the_motors() {
        let hal = Arc::new(MockHal::new());
        let left = Motor::new(Side::Left, PINS, hal.clone() as Arc<dyn Hal>);
        let right = Motor::new(Side::Right, RPINS, hal.clone() as Arc<dyn Hal>);

        rotate_in_place(&left, &right, 1);
        assert_eq!(left.direction(), Direction::Forward);
        assert_eq!(right.direction(), Direction::Backward);
        assert_eq!(left.commanded_speed(), 100);
        assert_eq!(right.commanded_speed(), 100);

        rotate_in_place(&left, &right, -1);
        assert_eq!(left.direction(), Direction::Backward);
        assert_eq!(right.direction(), Direction::Forward);
    }

    #[test]
    fn trim_duties_shifts_and_clamps() {
        let hal = Arc::new(MockHal::new());
        let left = Motor::new(Side::Left, PINS, hal.clone() as Arc<dyn Hal>);
        let right = Motor::new(Side::Right, RPINS, hal.clone() as Arc<dyn Hal>);
        left.set_speed(50, Direction::Forward);
        right.set_speed(50, Direction::Forward);

        trim_duties(&left, &right, 1);
        assert_eq!(left.duty(), 49);
        assert_eq!(right.duty(), 51);

        // large trims saturate instead of leaving the range
        trim_duties(&left, &right, 200);
        assert_eq!(left.duty(), 0);
        assert_eq!(right.duty(), 100);
    }

    #[test]
    fn pulses_accumulate() {
        let hal = Arc::new(MockHal::new());
        let m = motor(&hal);
        for i in 0..5 {
            m.record_pulse(1000 * i);
        }
        assert_eq!(m.pulse_count(), 5);
        assert_eq!(m.last_pulse_us(), 4000);
    }
}
