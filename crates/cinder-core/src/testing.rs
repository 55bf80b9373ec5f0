//! Deterministic fakes for unit and scenario tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::{
    Backend, BackendFactory, SharedVolume, StreamBackend, StreamEngine, SynthBackend,
};
use crate::clock::ManualClock;
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};
use crate::models::{Track, TrackKind, TrackSource};
use crate::voice::{ScheduledNote, VoiceSink};

// ---------------------------------------------------------------------------
// Voice sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    notes: Mutex<Vec<ScheduledNote>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notes(&self) -> Vec<ScheduledNote> {
        self.notes.lock().clone()
    }
}

impl VoiceSink for RecordingSink {
    fn schedule(&self, note: ScheduledNote) {
        self.notes.lock().push(note);
    }

    fn discard_after(&self, t: f64) {
        self.notes.lock().retain(|n| n.start < t);
    }
}

// ---------------------------------------------------------------------------
// Stream engine
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Script {
    running: bool,
    released: bool,
    ended: bool,
    position: f64,
    duration: Option<f64>,
}

/// Stream engine whose timing and failures are set by the test.
#[derive(Default)]
pub struct ScriptedEngine {
    delay: Duration,
    failure: Option<String>,
    begins: AtomicUsize,
    halts: AtomicUsize,
    script: Mutex<Script>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_duration(self, secs: f64) -> Self {
        self.set_duration(secs);
        self
    }

    /// Simulate the decoder learning the stream length mid-play.
    pub fn set_duration(&self, secs: f64) {
        self.script.lock().duration = Some(secs);
    }

    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn halts(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.script.lock().running
    }

    pub fn is_released(&self) -> bool {
        self.script.lock().released
    }

    pub fn set_position(&self, secs: f64) {
        self.script.lock().position = secs;
    }

    /// Simulate the decoder reaching end of media.
    pub fn finish(&self) {
        let mut script = self.script.lock();
        script.ended = true;
        script.running = false;
    }
}

impl StreamEngine for ScriptedEngine {
    fn begin(&self) -> std::result::Result<(), String> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if let Some(message) = &self.failure {
            return Err(message.clone());
        }
        let mut script = self.script.lock();
        script.running = true;
        script.ended = false;
        Ok(())
    }

    fn halt(&self) -> std::result::Result<(), String> {
        self.halts.fetch_add(1, Ordering::SeqCst);
        self.script.lock().running = false;
        Ok(())
    }

    fn seek(&self, position_secs: f64) {
        self.script.lock().position = position_secs;
    }

    fn position(&self) -> f64 {
        self.script.lock().position
    }

    fn duration(&self) -> Option<f64> {
        self.script.lock().duration
    }

    fn ended(&self) -> bool {
        self.script.lock().ended
    }

    fn release(&self) {
        let mut script = self.script.lock();
        script.running = false;
        script.released = true;
    }
}

// ---------------------------------------------------------------------------
// Backend factory
// ---------------------------------------------------------------------------

/// Counts backends that are producing audio (started, not yet stopped).
#[derive(Default)]
pub struct LiveCounter {
    live: AtomicUsize,
    max: AtomicUsize,
}

impl LiveCounter {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }

    fn up(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn down(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Tracked {
    inner: Arc<dyn Backend>,
    counter: Arc<LiveCounter>,
    active: Mutex<bool>,
}

impl Tracked {
    fn settle(&self) {
        let mut active = self.active.lock();
        if *active {
            *active = false;
            self.counter.down();
        }
    }
}

impl Backend for Tracked {
    fn kind(&self) -> TrackKind {
        self.inner.kind()
    }

    fn start(&self) -> Result<()> {
        self.inner.start()?;
        let mut active = self.active.lock();
        if !*active {
            *active = true;
            self.counter.up();
        }
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let result = self.inner.stop();
        self.settle();
        result
    }

    fn seek(&self, position_secs: f64) {
        self.inner.seek(position_secs)
    }

    fn position(&self) -> f64 {
        self.inner.position()
    }

    fn duration(&self) -> Option<f64> {
        self.inner.duration()
    }

    fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }

    fn release(&self) -> Result<()> {
        let result = self.inner.release();
        self.settle();
        result
    }
}

/// Factory building manual synth backends and scripted stream engines.
pub struct FakeBackends {
    pub clock: Arc<ManualClock>,
    pub sink: Arc<RecordingSink>,
    pub counter: Arc<LiveCounter>,
    config: TransportConfig,
    stream_delay: Duration,
    stream_duration: Option<f64>,
    failing_locators: Mutex<Vec<String>>,
    clock_down: AtomicBool,
    created: AtomicUsize,
    last_synth: Mutex<Option<Arc<SynthBackend>>>,
    last_engine: Mutex<Option<Arc<ScriptedEngine>>>,
}

impl FakeBackends {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            sink: Arc::new(RecordingSink::new()),
            counter: Arc::new(LiveCounter::default()),
            config: TransportConfig::default(),
            stream_delay: Duration::ZERO,
            stream_duration: None,
            failing_locators: Mutex::new(Vec::new()),
            clock_down: AtomicBool::new(false),
            created: AtomicUsize::new(0),
            last_synth: Mutex::new(None),
            last_engine: Mutex::new(None),
        }
    }

    pub fn with_stream_delay(mut self, delay: Duration) -> Self {
        self.stream_delay = delay;
        self
    }

    pub fn with_stream_duration(mut self, secs: f64) -> Self {
        self.stream_duration = Some(secs);
        self
    }

    pub fn fail_locator(&self, locator: &str) {
        self.failing_locators.lock().push(locator.to_string());
    }

    /// Make the next synth creations fail as if no audio device existed.
    pub fn set_clock_down(&self, down: bool) {
        self.clock_down.store(down, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Tick the most recent synth backend `n` times, advancing the clock one period each time.
    pub fn tick_synth(&self, n: usize) {
        let synth = self.last_synth.lock().clone();
        if let Some(synth) = synth {
            let period = self.config.scheduler_period().as_secs_f64();
            for _ in 0..n {
                synth.tick();
                self.clock.advance(period);
            }
        }
    }

    pub fn last_engine(&self) -> Option<Arc<ScriptedEngine>> {
        self.last_engine.lock().clone()
    }
}

impl BackendFactory for FakeBackends {
    fn create(&self, track: &Track, _volume: &SharedVolume) -> Result<Arc<dyn Backend>> {
        let inner: Arc<dyn Backend> = match &track.source {
            TrackSource::Synth { melody, waveform } => {
                if self.clock_down.load(Ordering::SeqCst) {
                    return Err(TransportError::ClockUnavailable("no output device".into()));
                }
                let synth = Arc::new(SynthBackend::manual(
                    melody.clone(),
                    *waveform,
                    track.duration_secs,
                    self.clock.clone(),
                    self.sink.clone(),
                    &self.config,
                ));
                *self.last_synth.lock() = Some(Arc::clone(&synth));
                synth
            }
            TrackSource::Stream { locator } => {
                let mut engine = if self.failing_locators.lock().contains(locator) {
                    ScriptedEngine::failing(&format!("cannot open {}", locator))
                } else {
                    ScriptedEngine::new()
                };
                engine = engine.with_delay(self.stream_delay);
                if let Some(d) = self.stream_duration {
                    engine = engine.with_duration(d);
                }
                let engine = Arc::new(engine);
                *self.last_engine.lock() = Some(Arc::clone(&engine));
                Arc::new(StreamBackend::new(engine))
            }
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(Tracked {
            inner,
            counter: Arc::clone(&self.counter),
            active: Mutex::new(false),
        }))
    }
}
