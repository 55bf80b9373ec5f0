//! Stream backend — a decoding engine behind a PlayGate.
//!
//! The engine does the real work (decode, output, end-of-media). The
//! backend only guarantees that starts and stops reach it one at a time
//! and that nothing starts it after teardown.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::error::Result;
use crate::gate::PlayGate;
use crate::models::TrackKind;

/// A decoder plus output device for one locator.
///
/// `begin` may block while the source is opened; errors are plain strings
/// so engines can wrap whatever their decoder reports.
pub trait StreamEngine: Send + Sync {
    fn begin(&self) -> std::result::Result<(), String>;
    fn halt(&self) -> std::result::Result<(), String>;
    fn seek(&self, position_secs: f64);
    fn position(&self) -> f64;
    fn duration(&self) -> Option<f64>;
    /// Natural end of media reached.
    fn ended(&self) -> bool;
    fn release(&self);
}

pub struct StreamBackend {
    engine: Arc<dyn StreamEngine>,
    gate: PlayGate,
}

impl StreamBackend {
    pub fn new(engine: Arc<dyn StreamEngine>) -> Self {
        Self {
            engine,
            gate: PlayGate::new(),
        }
    }
}

impl Backend for StreamBackend {
    fn kind(&self) -> TrackKind {
        TrackKind::Stream
    }

    fn start(&self) -> Result<()> {
        self.gate.start(|| self.engine.begin())
    }

    fn stop(&self) -> Result<()> {
        self.gate.stop(|| self.engine.halt())
    }

    fn seek(&self, position_secs: f64) {
        self.engine.seek(position_secs.max(0.0));
    }

    fn position(&self) -> f64 {
        self.engine.position()
    }

    fn duration(&self) -> Option<f64> {
        self.engine.duration()
    }

    fn is_finished(&self) -> bool {
        self.engine.ended()
    }

    fn release(&self) -> Result<()> {
        self.gate.close(|| {
            let halted = self.engine.halt();
            self.engine.release();
            halted
        })
    }
}

/// Silent engine for headless transports: position follows the wall clock
/// while running, the length is never known and the media never ends.
#[derive(Default)]
pub struct NullStreamEngine {
    state: Mutex<NullState>,
}

#[derive(Default)]
struct NullState {
    offset: f64,
    since: Option<Instant>,
}

impl NullState {
    fn position(&self) -> f64 {
        self.offset + self.since.map_or(0.0, |t| t.elapsed().as_secs_f64())
    }
}

impl NullStreamEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamEngine for NullStreamEngine {
    fn begin(&self) -> std::result::Result<(), String> {
        let mut state = self.state.lock();
        if state.since.is_none() {
            state.since = Some(Instant::now());
        }
        Ok(())
    }

    fn halt(&self) -> std::result::Result<(), String> {
        let mut state = self.state.lock();
        state.offset = state.position();
        state.since = None;
        Ok(())
    }

    fn seek(&self, position_secs: f64) {
        let mut state = self.state.lock();
        state.offset = position_secs;
        if state.since.is_some() {
            state.since = Some(Instant::now());
        }
    }

    fn position(&self) -> f64 {
        self.state.lock().position()
    }

    fn duration(&self) -> Option<f64> {
        None
    }

    fn ended(&self) -> bool {
        false
    }

    fn release(&self) {}
}
