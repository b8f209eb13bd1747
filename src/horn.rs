//! Horn output with counted activation.
//!
//! Several independent triggers may request the horn at once (button,
//! low-battery warning, timed beeps); the pin only goes high on the first
//! request and only drops low when the last one is released.

use std::sync::{Arc, Mutex};

use crate::hal::{Hal, Level, Pin};
use crate::workers::WorkerSet;

pub struct Horn {
    hal: Arc<dyn Hal>,
    pin: Pin,
    active: Mutex<u32>,
}

impl Horn {
    pub fn new(hal: Arc<dyn Hal>, pin: Pin) -> Self {
        Horn {
            hal,
            pin,
            active: Mutex::new(0),
        }
    }

    pub fn on(&self) {
        let mut n = self.active.lock().unwrap();
        if *n == 0 {
            self.hal.write(self.pin, Level::High);
        }
        *n += 1;
    }

    pub fn off(&self) {
        let mut n = self.active.lock().unwrap();
        if *n > 0 {
            *n -= 1;
        }
        if *n == 0 {
            self.hal.write(self.pin, Level::Low);
        }
    }

    /// Sound the horn for `tenths` of a second without blocking the caller.
    pub fn beep(self: &Arc<Self>, tenths: u32, workers: &WorkerSet) {
        if tenths == 0 {
            return;
        }
        let horn = Arc::clone(self);
        workers.spawn("horn-beep", move || {
            horn.beep_blocking(tenths);
        });
    }

    /// Sound the horn for `tenths` of a second in the calling thread.
    pub fn beep_blocking(&self, tenths: u32) {
        self.on();
        self.hal.sleep_us(tenths.saturating_mul(100_000));
        self.off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::{MockHal, PinOp};

    const PIN: Pin = 26;

    fn horn() -> (Arc<MockHal>, Horn) {
        let hal = Arc::new(MockHal::new());
        let h = Horn::new(hal.clone() as Arc<dyn Hal>, PIN);
        (hal, h)
    }

    #[test]
    fn single_request_toggles_the_pin() {
        let (hal, h) = horn();
        h.on();
        h.off();
        assert_eq!(
            hal.ops(),
            vec![PinOp::Write(PIN, Level::High), PinOp::Write(PIN, Level::Low)]
        );
    }

    #[test]
    fn overlapping_requests_never_silence_early() {
        let (hal, h) = horn();
        h.on();
        h.on();
        h.off();
        // one trigger still active: pin stays high
        assert_eq!(hal.ops(), vec![PinOp::Write(PIN, Level::High)]);
        h.off();
        assert_eq!(hal.ops().last(), Some(&PinOp::Write(PIN, Level::Low)));
    }

    #[test]
    fn unbalanced_off_is_harmless() {
        let (hal, h) = horn();
        h.off();
        h.on();
        assert_eq!(hal.ops().last(), Some(&PinOp::Write(PIN, Level::High)));
    }

    #[test]
    fn timed_beep_releases_the_horn() {
        let (hal, h) = horn();
        h.beep_blocking(2);
        assert_eq!(
            hal.ops(),
            vec![PinOp::Write(PIN, Level::High), PinOp::Write(PIN, Level::Low)]
        );
    }

    #[test]
    fn background_beep_runs_on_a_tracked_worker() {
        let (hal, h) = horn();
        let h = Arc::new(h);
        let workers = WorkerSet::new();
        h.beep(1, &workers);
        workers.join_all();
        assert_eq!(hal.ops().last(), Some(&PinOp::Write(PIN, Level::Low)));
    }
}
