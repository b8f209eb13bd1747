//! Ultrasonic ranging and the one-shot obstacle signal.
//!
//! Two independent halves share one measurement state machine: a periodic
//! worker fires `trigger()` every ~60 ms, and the echo pin's edge events are
//! fed to `on_echo_edge()`. A completed measurement lands in a small moving
//! average window and, when it drops below the clearance threshold, raises
//! at most one obstacle signal until the supervisor re-arms the gate.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::config::SONAR_WINDOW;
use crate::hal::{Hal, HalError, Level, Pin, Pull};

/// Echoes shorter than this are electrical noise, longer ones are beyond the
/// sensor's range; both would corrupt the average and are discarded.
const ECHO_MIN_US: u32 = 50;
const ECHO_MAX_US: u32 = 30_000;

/// What a blocked supervisor wakes up to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObstacleSignal {
    Obstacle,
    Shutdown,
}

/// Sender half: sets the latch and delivers at most one signal per re-arm.
#[derive(Clone)]
pub struct ObstacleGate {
    latched: Arc<AtomicBool>,
    tx: SyncSender<ObstacleSignal>,
}

/// Receiver half, owned by the supervisor. Only it clears the latch.
pub struct ObstacleWait {
    latched: Arc<AtomicBool>,
    rx: Mutex<Receiver<ObstacleSignal>>,
}

/// Single-slot obstacle channel: a send is a no-op while the latch is set,
/// and the latch only drops when the waiter re-arms.
pub fn obstacle_channel() -> (ObstacleGate, ObstacleWait) {
    let latched = Arc::new(AtomicBool::new(false));
    let (tx, rx) = sync_channel(1);
    (
        ObstacleGate {
            latched: latched.clone(),
            tx,
        },
        ObstacleWait {
            latched,
            rx: Mutex::new(rx),
        },
    )
}

impl ObstacleGate {
    /// Deliver an obstacle signal unless one is already outstanding.
    /// Returns whether this call latched.
    pub fn raise(&self) -> bool {
        if self
            .latched
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.tx.try_send(ObstacleSignal::Obstacle);
            true
        } else {
            false
        }
    }

    /// Wake the waiter for orderly shutdown, bypassing the latch. If the slot
    /// already holds a signal the waiter is waking up anyway.
    pub fn shutdown(&self) {
        let _ = self.tx.try_send(ObstacleSignal::Shutdown);
    }

    pub fn is_latched(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }
}

impl ObstacleWait {
    /// Clear the latch so the next sub-threshold reading can signal again.
    pub fn rearm(&self) {
        self.latched.store(false, Ordering::Release);
    }

    /// Block until a signal arrives. A closed channel counts as shutdown.
    pub fn wait(&self) -> ObstacleSignal {
        self.rx
            .lock()
            .unwrap()
            .recv()
            .unwrap_or(ObstacleSignal::Shutdown)
    }
}

struct EchoState {
    start_us: u32,
    samples: [u32; SONAR_WINDOW],
    pos: usize,
    warmup: usize,
}

pub struct ObstacleSensor {
    hal: Arc<dyn Hal>,
    trigger_pin: Pin,
    echo_pin: Pin,
    min_clearance_cm: u32,
    avoidance_enabled: bool,
    distance_cm: AtomicU32,
    echo: Mutex<EchoState>,
    gate: ObstacleGate,
}

impl ObstacleSensor {
    pub fn new(
        hal: Arc<dyn Hal>,
        trigger_pin: Pin,
        echo_pin: Pin,
        min_clearance_cm: u32,
        avoidance_enabled: bool,
        gate: ObstacleGate,
    ) -> Self {
        ObstacleSensor {
            hal,
            trigger_pin,
            echo_pin,
            min_clearance_cm,
            avoidance_enabled,
            // Nothing measured yet reads as "no obstacle anywhere".
            distance_cm: AtomicU32::new(u32::MAX),
            echo: Mutex::new(EchoState {
                start_us: 0,
                samples: [0; SONAR_WINDOW],
                pos: 0,
                warmup: 0,
            }),
            gate,
        }
    }

    pub fn setup(&self) -> Result<(), HalError> {
        self.hal.set_output(self.trigger_pin)?;
        self.hal.write(self.trigger_pin, Level::Low);
        self.hal.set_input(self.echo_pin, Pull::Floating)?;
        Ok(())
    }

    /// Emit the 10 us trigger pulse. Called from a periodic worker.
    pub fn trigger(&self) {
        self.hal.write(self.trigger_pin, Level::High);
        self.hal.sleep_us(10);
        self.hal.write(self.trigger_pin, Level::Low);
    }

    /// Echo pin edge: rising starts the timing, falling completes one
    /// measurement. Runs on the edge-dispatch path, so it only updates owned
    /// state and posts the obstacle signal.
    pub fn on_echo_edge(&self, level: Level, tick_us: u32) {
        let mut echo = self.echo.lock().unwrap();
        match level {
            Level::High => {
                echo.start_us = tick_us;
            }
            Level::Low => {
                let elapsed = tick_us.wrapping_sub(echo.start_us);
                if !(ECHO_MIN_US..=ECHO_MAX_US).contains(&elapsed) {
                    debug!("sonar: discarding implausible echo of {} us", elapsed);
                    return;
                }
                // Round trip at ~340 m/s: cm = us * 17 / 1000.
                let d = elapsed * 17 / 1000;

                let pos = echo.pos;
                echo.samples[pos] = d;
                echo.pos = (pos + 1) % SONAR_WINDOW;

                // Until the window fills, report the raw sample; a stale zero
                // in the average would look like a phantom obstacle.
                let reported = if echo.warmup < SONAR_WINDOW {
                    echo.warmup += 1;
                    d
                } else {
                    echo.samples.iter().sum::<u32>() / SONAR_WINDOW as u32
                };
                drop(echo);

                self.distance_cm.store(reported, Ordering::Release);
                if self.avoidance_enabled && reported < self.min_clearance_cm {
                    self.gate.raise();
                }
            }
        }
    }

    /// Latest filtered distance in cm.
    pub fn distance_cm(&self) -> u32 {
        self.distance_cm.load(Ordering::Acquire)
    }

    pub fn release(&self) {
        self.hal.release(self.trigger_pin);
        self.hal.release(self.echo_pin);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::mock::MockHal;

    fn sensor(enabled: bool) -> (ObstacleSensor, ObstacleWait) {
        let (gate, wait) = obstacle_channel();
        let hal = Arc::new(MockHal::new());
        (
            ObstacleSensor::new(hal as Arc<dyn Hal>, 23, 24, 50, enabled, gate),
            wait,
        )
    }

    /// Feed one complete measurement of `cm` centimetres.
    fn feed(s: &ObstacleSensor, t0: u32, cm: u32) -> u32 {
        // invert cm = us * 17 / 1000, biased up so truncation lands on cm
        let us = (cm * 1000 + 999) / 17;
        s.on_echo_edge(Level::High, t0);
        s.on_echo_edge(Level::Low, t0.wrapping_add(us));
        t0 + 100_000
    }

    #[test]
    fn warmup_passes_constant_samples_through() {
        let (s, _wait) = sensor(false);
        let mut t = 0;
        for _ in 0..3 {
            t = feed(&s, t, 80);
            assert_eq!(s.distance_cm(), 80);
        }
    }

    #[test]
    fn reports_mean_after_warmup() {
        let (s, _wait) = sensor(false);
        let mut t = 0;
        t = feed(&s, t, 100);
        t = feed(&s, t, 100);
        t = feed(&s, t, 60); // window now [60, 100]
        assert_eq!(s.distance_cm(), 80);
        feed(&s, t, 60); // window now [60, 60]
        assert_eq!(s.distance_cm(), 60);
    }

    #[test]
    fn implausible_echoes_are_discarded() {
        let (s, _wait) = sensor(false);
        let mut t = 0;
        t = feed(&s, t, 80);
        t = feed(&s, t, 80);

        // 40 us round trip: below the plausible minimum
        s.on_echo_edge(Level::High, t);
        s.on_echo_edge(Level::Low, t + 40);
        assert_eq!(s.distance_cm(), 80);

        // 40 ms round trip: beyond the sensor's range
        s.on_echo_edge(Level::High, t + 1000);
        s.on_echo_edge(Level::Low, t + 1000 + 40_000);
        assert_eq!(s.distance_cm(), 80);
    }

    #[test]
    fn sub_threshold_distance_signals_once_until_rearmed() {
        let (s, wait) = sensor(true);
        let mut t = 0;
        t = feed(&s, t, 30);
        t = feed(&s, t, 30);
        t = feed(&s, t, 30);
        feed(&s, t, 30);

        // exactly one signal outstanding
        assert_eq!(wait.wait(), ObstacleSignal::Obstacle);
        assert!(wait.rx.lock().unwrap().try_recv().is_err());

        // re-arming enables exactly one more delivery
        wait.rearm();
        let t2 = feed(&s, 10_000_000, 20);
        feed(&s, t2, 20);
        assert_eq!(wait.wait(), ObstacleSignal::Obstacle);
        assert!(wait.rx.lock().unwrap().try_recv().is_err());
    }

    #[test]
    fn no_signal_when_avoidance_disabled() {
        let (s, wait) = sensor(false);
        let t = feed(&s, 0, 10);
        feed(&s, t, 10);
        assert!(wait.rx.lock().unwrap().try_recv().is_err());
    }

    #[test]
    fn no_signal_above_threshold() {
        let (s, wait) = sensor(true);
        feed(&s, 0, 90);
        assert!(wait.rx.lock().unwrap().try_recv().is_err());
    }

    #[test]
    fn shutdown_wakes_the_waiter() {
        let (gate, wait) = obstacle_channel();
        gate.shutdown();
        assert_eq!(wait.wait(), ObstacleSignal::Shutdown);
    }
}
