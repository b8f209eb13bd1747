//! Supervised worker threads.
//!
//! Fire-and-forget jobs (horn timing, audio playback) and periodic tickers
//! (sonar trigger, speed loop, battery poll) are spawned through one
//! `WorkerSet` so that shutdown can flip a single flag and join everything
//! instead of leaking detached threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{error, warn};

/// Sleep granularity while a periodic worker waits out its interval, so a
/// shutdown request is noticed promptly even across long intervals.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

pub struct WorkerSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
    #[cfg(test)]
    refuse: AtomicBool,
}

impl Default for WorkerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSet {
    pub fn new() -> Self {
        WorkerSet {
            handles: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            #[cfg(test)]
            refuse: AtomicBool::new(false),
        }
    }

    /// Make every subsequent spawn fail, as if thread creation ran out of
    /// resources.
    #[cfg(test)]
    pub(crate) fn refuse_spawns(&self) {
        self.refuse.store(true, Ordering::Release);
    }

    /// Spawn a tracked one-shot job. Returns whether the thread was created;
    /// failure is logged and the job dropped, it never escalates. Callers
    /// holding state for the job must release it on a dropped spawn.
    pub fn spawn<F>(&self, name: &str, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        #[cfg(test)]
        if self.refuse.load(Ordering::Acquire) {
            warn!("cannot spawn worker {}: refused; request dropped", name);
            return false;
        }
        let result = thread::Builder::new().name(name.to_string()).spawn(f);
        match result {
            Ok(handle) => {
                let mut handles = self.handles.lock().unwrap();
                reap_finished(&mut handles);
                handles.push(handle);
                true
            }
            Err(e) => {
                warn!("cannot spawn worker {}: {}; request dropped", name, e);
                false
            }
        }
    }

    /// Spawn a tracked worker that runs `f` every `interval` until shutdown
    /// is requested.
    pub fn spawn_periodic<F>(&self, name: &str, interval: Duration, f: F)
    where
        F: Fn() + Send + 'static,
    {
        let stop = Arc::clone(&self.shutdown);
        self.spawn(name, move || {
            while !stop.load(Ordering::Acquire) {
                f();
                let deadline = Instant::now() + interval;
                while Instant::now() < deadline {
                    if stop.load(Ordering::Acquire) {
                        return;
                    }
                    thread::sleep(SHUTDOWN_POLL.min(interval));
                }
            }
        });
    }

    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// Join every tracked worker spawned so far.
    pub fn join_all(&self) {
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            join_one(handle);
        }
    }
}

fn join_one(handle: JoinHandle<()>) {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    if handle.join().is_err() {
        error!("worker {} panicked", name);
    }
}

/// Join the workers that already ran to completion, so short-lived jobs don't
/// pile their handles up until shutdown.
fn reap_finished(handles: &mut Vec<JoinHandle<()>>) {
    let mut i = 0;
    while i < handles.len() {
        if handles[i].is_finished() {
            join_one(handles.swap_remove(i));
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn one_shot_job_runs_and_joins() {
        let set = WorkerSet::new();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        set.spawn("job", move || flag.store(true, Ordering::Release));
        set.join_all();
        assert!(ran.load(Ordering::Acquire));
    }

    #[test]
    fn periodic_worker_stops_on_shutdown() {
        let set = WorkerSet::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        set.spawn_periodic("ticker", Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        while ticks.load(Ordering::Relaxed) < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        set.request_shutdown();
        set.join_all();

        let after = ticks.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(10));
        assert_eq!(ticks.load(Ordering::Relaxed), after);
    }

    #[test]
    fn spawn_reports_whether_the_thread_was_created() {
        let set = WorkerSet::new();
        assert!(set.spawn("ok", || {}));
        set.refuse_spawns();
        assert!(!set.spawn("refused", || {}));
        set.join_all();
    }

    #[test]
    fn finished_handles_are_reaped_on_spawn() {
        let set = WorkerSet::new();
        set.spawn("quick", || {});
        while !set.handles.lock().unwrap()[0].is_finished() {
            thread::sleep(Duration::from_millis(1));
        }

        let release = Arc::new(AtomicBool::new(false));
        let gate = release.clone();
        set.spawn("held", move || {
            while !gate.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
        });
        // the finished quick job was reaped, only the held one remains
        assert_eq!(set.handles.lock().unwrap().len(), 1);

        release.store(true, Ordering::Release);
        set.join_all();
    }

    #[test]
    fn join_all_tolerates_an_empty_set() {
        let set = WorkerSet::new();
        set.join_all();
        set.request_shutdown();
        assert!(set.is_shutdown());
    }
}
