//! Motor battery supervision.
//!
//! The sense pin oscillates while the motors spin up, so a single read is
//! worthless: the sampler takes three readings spaced apart and loops until
//! all three agree. Low power blocks startup when seen before driving and
//! only warns (audibly) when seen by the periodic recheck.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::hal::{self, Hal, Level, Pin};
use crate::horn::Horn;

const WARNING_BEEPS: u32 = 3;

pub struct PowerMonitor {
    hal: Arc<dyn Hal>,
    pin: Pin,
    horn: Arc<Horn>,
    good: AtomicBool,
    /// Spacing between the three debounce reads.
    settle: Duration,
}

impl PowerMonitor {
    pub fn new(hal: Arc<dyn Hal>, pin: Pin, horn: Arc<Horn>) -> Self {
        PowerMonitor {
            hal,
            pin,
            horn,
            good: AtomicBool::new(true),
            settle: Duration::from_millis(400),
        }
    }

    #[cfg(test)]
    fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Debounced sample: three consecutive equal readings spaced `settle`
    /// apart. A read error leaves the previous state untouched. Low power
    /// sounds the warning pattern; it never stops an in-progress drive.
    pub fn sample(&self) {
        let level = loop {
            let Ok(first) = self.hal.read(self.pin) else { return };
            hal::sleep(&*self.hal, self.settle);
            let Ok(second) = self.hal.read(self.pin) else { return };
            hal::sleep(&*self.hal, self.settle);
            let Ok(third) = self.hal.read(self.pin) else { return };
            if first == second && second == third {
                break first;
            }
        };

        let good = level == Level::High;
        self.good.store(good, Ordering::Release);
        if !good {
            warn!("motor battery is low");
            for _ in 0..WARNING_BEEPS {
                self.horn.beep_blocking(2);
                hal::sleep(&*self.hal, Duration::from_millis(200));
            }
        }
    }

    /// Last debounced verdict; defaults to good until a sample says
    /// otherwise.
    pub fn is_good(&self) -> bool {
        self.good.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::{MockHal, PinOp};

    const PIN: Pin = 19;
    const HORN_PIN: Pin = 26;

    fn monitor(level: Option<Level>) -> (Arc<MockHal>, PowerMonitor) {
        let hal = Arc::new(MockHal::new());
        if let Some(level) = level {
            hal.set_input_level(PIN, level);
        }
        let horn = Arc::new(Horn::new(hal.clone() as Arc<dyn Hal>, HORN_PIN));
        let m = PowerMonitor::new(hal.clone() as Arc<dyn Hal>, PIN, horn)
            .with_settle(Duration::from_millis(1));
        (hal, m)
    }

    #[test]
    fn stable_high_reads_as_good() {
        let (_hal, m) = monitor(Some(Level::High));
        m.sample();
        assert!(m.is_good());
    }

    #[test]
    fn stable_low_warns_and_beeps() {
        let (hal, m) = monitor(Some(Level::Low));
        m.sample();
        assert!(!m.is_good());
        // three beep on/off pairs on the horn pin
        let highs = hal
            .ops_for(HORN_PIN)
            .iter()
            .filter(|op| matches!(op, PinOp::Write(_, Level::High)))
            .count();
        assert_eq!(highs, 3);
    }

    #[test]
    fn read_error_keeps_previous_state() {
        let (_hal, m) = monitor(None);
        m.sample();
        assert!(m.is_good());
    }
}
