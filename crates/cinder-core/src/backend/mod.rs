//! Playback backends — one per loaded track.
//!
//! The transport talks to every backend through the same capability set.
//! Backends manage their own concurrency (all methods take `&self`) and
//! read the shared output gain; they never write it.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::Result;
use crate::models::{Track, TrackKind};

pub mod stream;
pub mod synth;

pub use stream::{NullStreamEngine, StreamBackend, StreamEngine};
pub use synth::SynthBackend;

/// Capability set shared by synth and stream playback.
pub trait Backend: Send + Sync {
    fn kind(&self) -> TrackKind;
    /// Begin or resume producing audio.
    fn start(&self) -> Result<()>;
    /// Pause output. The backend stays loaded.
    fn stop(&self) -> Result<()>;
    /// Jump to an absolute position in seconds.
    fn seek(&self, position_secs: f64);
    fn position(&self) -> f64;
    /// Native length, if the backend knows it.
    fn duration(&self) -> Option<f64>;
    fn is_finished(&self) -> bool;
    /// Final teardown. Later starts are cancelled.
    fn release(&self) -> Result<()>;
}

/// Builds the backend for a track about to become current.
pub trait BackendFactory: Send + Sync {
    fn create(&self, track: &Track, volume: &SharedVolume) -> Result<Arc<dyn Backend>>;
}

/// Output gain cell: written by the transport, read by audio callbacks.
#[derive(Clone, Debug)]
pub struct SharedVolume(Arc<AtomicU32>);

impl SharedVolume {
    pub fn new(gain: f32) -> Self {
        Self(Arc::new(AtomicU32::new(gain.clamp(0.0, 1.0).to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, gain: f32) {
        self.0.store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }
}
