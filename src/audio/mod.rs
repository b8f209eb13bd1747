//! Alert-sound playback arbitration.
//!
//! Actual decoding and output belong to the host's audio subsystem behind
//! `AudioBackend`; this module owns the request semantics: a play request
//! while idle starts playback (blocking or on a tracked worker), a request
//! while busy cancels the in-progress playback instead of queueing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{error, info};
use thiserror::Error;

use crate::workers::WorkerSet;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio backend failed: {0}")]
    Backend(String),
}

/// Seam to the audio subsystem. `play` blocks until the sound finishes or
/// until the cooperative `cancel` flag is observed.
pub trait AudioBackend: Send + Sync {
    fn play(&self, file: &Path, cancel: &AtomicBool) -> Result<(), AudioError>;
}

/// Backend for hosts without an audio stack: logs and returns.
pub struct NullBackend;

impl AudioBackend for NullBackend {
    fn play(&self, file: &Path, _cancel: &AtomicBool) -> Result<(), AudioError> {
        info!("audio: would play {}", file.display());
        Ok(())
    }
}

pub struct Audio {
    backend: Arc<dyn AudioBackend>,
    playing: AtomicBool,
    cancel: AtomicBool,
}

impl Audio {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Audio {
            backend,
            playing: AtomicBool::new(false),
            cancel: AtomicBool::new(false),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    /// Non-blocking play request with toggle semantics: if a playback is in
    /// progress, ask it to stop instead of starting another. A dropped spawn
    /// drops the request; the player stays usable.
    pub fn play(self: &Arc<Self>, file: PathBuf, workers: &WorkerSet) {
        if !self.begin() {
            return;
        }
        let audio = Arc::clone(self);
        if !workers.spawn("audio-play", move || audio.run(&file)) {
            // nothing will run, hand the player back
            self.cancel.store(false, Ordering::Release);
            self.playing.store(false, Ordering::Release);
        }
    }

    /// Blocking variant: returns after the sound has played (or was
    /// cancelled). Same toggle semantics when already busy.
    pub fn play_blocking(&self, file: &Path) {
        if !self.begin() {
            return;
        }
        self.run(file);
    }

    /// Claim the player. Returns false when playback was already active, in
    /// which case the cancel flag has been raised instead.
    fn begin(&self) -> bool {
        if self.playing.swap(true, Ordering::AcqRel) {
            self.cancel.store(true, Ordering::Release);
            return false;
        }
        // a fresh playback must not inherit a stale cancellation
        self.cancel.store(false, Ordering::Release);
        true
    }

    fn run(&self, file: &Path) {
        if let Err(e) = self.backend.play(file, &self.cancel) {
            error!("audio playback of {} failed: {}", file.display(), e);
        }
        self.cancel.store(false, Ordering::Release);
        self.playing.store(false, Ordering::Release);
    }
}
