//! In-memory HAL used by the unit tests and by hosts without real GPIO.
//!
//! Records every observable pin operation so tests can assert on exactly
//! what was written, and runs a virtual microsecond clock: `sleep_us`
//! advances the clock by the full amount but only parks the thread briefly,
//! so code with second-long pauses still interleaves in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use super::{Hal, HalError, Level, Pin, Pull};

/// One observable side effect on a pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PinOp {
    Write(Pin, Level),
    PwmDuty(Pin, u32),
}

// Cap on how long sleep_us really parks the thread.
const REAL_SLEEP_CAP_US: u32 = 5_000;

#[derive(Default)]
pub struct MockHal {
    ops: Mutex<Vec<PinOp>>,
    inputs: Mutex<HashMap<Pin, Level>>,
    clock_us: AtomicU32,
}

impl MockHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// All pin operations recorded so far, in order.
    pub fn ops(&self) -> Vec<PinOp> {
        self.ops.lock().unwrap().clone()
    }

    /// Operations touching one pin (writes and PWM duty changes).
    pub fn ops_for(&self, pin: Pin) -> Vec<PinOp> {
        self.ops
            .lock()
            .unwrap()
            .iter()
            .filter(|op| match op {
                PinOp::Write(p, _) | PinOp::PwmDuty(p, _) => *p == pin,
            })
            .copied()
            .collect()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Set the level a subsequent `read` of `pin` will observe.
    pub fn set_input_level(&self, pin: Pin, level: Level) {
        self.inputs.lock().unwrap().insert(pin, level);
    }

    /// Advance the virtual clock without sleeping.
    pub fn advance_us(&self, us: u32) {
        self.clock_us.fetch_add(us, Ordering::SeqCst);
    }

    fn record(&self, op: PinOp) {
        self.ops.lock().unwrap().push(op);
    }
}

impl Hal for MockHal {
    fn set_output(&self, _pin: Pin) -> Result<(), HalError> {
        Ok(())
    }

    fn set_input(&self, _pin: Pin, _pull: Pull) -> Result<(), HalError> {
        Ok(())
    }

    fn write(&self, pin: Pin, level: Level) {
        self.record(PinOp::Write(pin, level));
    }

    fn read(&self, pin: Pin) -> Result<Level, HalError> {
        self.inputs
            .lock()
            .unwrap()
            .get(&pin)
            .copied()
            .ok_or(HalError::Read(pin))
    }

    fn set_pwm_frequency(&self, _pin: Pin, _hz: u32) -> Result<(), HalError> {
        Ok(())
    }

    fn set_pwm_range(&self, _pin: Pin, _range: u32) -> Result<(), HalError> {
        Ok(())
    }

    fn set_pwm_duty(&self, pin: Pin, duty: u32) {
        self.record(PinOp::PwmDuty(pin, duty));
    }

    fn now_us(&self) -> u32 {
        self.clock_us.load(Ordering::SeqCst)
    }

    fn sleep_us(&self, us: u32) {
        self.clock_us.fetch_add(us, Ordering::SeqCst);
        thread::sleep(Duration::from_micros(us.min(REAL_SLEEP_CAP_US) as u64));
    }

    fn release(&self, _pin: Pin) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_writes_in_order() {
        let hal = MockHal::new();
        hal.write(5, Level::High);
        hal.set_pwm_duty(5, 80);
        hal.write(6, Level::Low);

        assert_eq!(
            hal.ops(),
            vec![
                PinOp::Write(5, Level::High),
                PinOp::PwmDuty(5, 80),
                PinOp::Write(6, Level::Low),
            ]
        );
        assert_eq!(hal.ops_for(5).len(), 2);
    }

    #[test]
    fn read_requires_a_set_level() {
        let hal = MockHal::new();
        assert!(hal.read(19).is_err());
        hal.set_input_level(19, Level::High);
        assert_eq!(hal.read(19).unwrap(), Level::High);
    }

    #[test]
    fn sleep_advances_virtual_clock() {
        let hal = MockHal::new();
        let t0 = hal.now_us();
        hal.sleep_us(1_000_000);
        assert_eq!(hal.now_us().wrapping_sub(t0), 1_000_000);
    }
}
