//! Synth backend — a lookahead scheduler driven by a ticker thread.
//!
//! Position is the scheduler's elapsed counter, not the clock: it advances
//! one period per tick while running and stops when the track's duration
//! is reached. Stopping drops notes that have not started yet; voices
//! already sounding finish their envelope in the output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::backend::Backend;
use crate::clock::Clock;
use crate::config::TransportConfig;
use crate::error::Result;
use crate::gate::PlayGate;
use crate::models::{Note, TrackKind, Waveform};
use crate::scheduler::LookaheadScheduler;
use crate::voice::VoiceSink;

struct SynthShared {
    scheduler: Mutex<LookaheadScheduler>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn VoiceSink>,
    running: AtomicBool,
}

impl SynthShared {
    /// One pass. Returns false once the track is exhausted.
    fn tick(&self) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let mut scheduler = self.scheduler.lock();
        scheduler.tick(self.clock.now(), self.sink.as_ref());
        if scheduler.is_finished() {
            self.running.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }
}

pub struct SynthBackend {
    shared: Arc<SynthShared>,
    gate: PlayGate,
    /// `None` in manual mode: the owner calls `tick()`.
    period: Option<Duration>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl SynthBackend {
    /// Backend with its own ticker thread, one tick per configured period.
    pub fn new(
        melody: Vec<Note>,
        waveform: Waveform,
        duration_secs: f64,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn VoiceSink>,
        config: &TransportConfig,
    ) -> Self {
        let mut backend = Self::manual(melody, waveform, duration_secs, clock, sink, config);
        backend.period = Some(config.scheduler_period());
        backend
    }

    /// Backend without a ticker. Nothing is scheduled until `tick()` is called.
    pub fn manual(
        melody: Vec<Note>,
        waveform: Waveform,
        duration_secs: f64,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn VoiceSink>,
        config: &TransportConfig,
    ) -> Self {
        let period = config.scheduler_period().as_secs_f64();
        let scheduler = LookaheadScheduler::new(
            melody,
            waveform,
            config.note_amplitude,
            duration_secs,
            period,
            config.lookahead_secs(),
        );
        Self {
            shared: Arc::new(SynthShared {
                scheduler: Mutex::new(scheduler),
                clock,
                sink,
                running: AtomicBool::new(false),
            }),
            gate: PlayGate::new(),
            period: None,
            ticker: Mutex::new(None),
        }
    }

    /// Run one scheduling pass if the backend is running.
    pub fn tick(&self) {
        self.shared.tick();
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn melody_cursor(&self) -> usize {
        self.shared.scheduler.lock().melody_cursor()
    }

    fn spawn_ticker(&self, period: Duration) {
        let mut ticker = self.ticker.lock();
        // A ticker that exited on its own (track finished) is joined first.
        if let Some(handle) = ticker.take() {
            let _ = handle.join();
        }
        let shared = Arc::clone(&self.shared);
        *ticker = Some(thread::spawn(move || {
            while shared.tick() {
                thread::sleep(period);
            }
        }));
    }

    fn halt(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.ticker.lock().take() {
            let _ = handle.join();
        }
        self.shared.sink.discard_after(self.shared.clock.now());
    }
}

impl Backend for SynthBackend {
    fn kind(&self) -> TrackKind {
        TrackKind::Synth
    }

    fn start(&self) -> Result<()> {
        self.gate.start(|| {
            if self.shared.running.load(Ordering::SeqCst) {
                return Ok(());
            }
            {
                let mut scheduler = self.shared.scheduler.lock();
                if scheduler.is_finished() {
                    return Ok(());
                }
                scheduler.resume_at(self.shared.clock.now());
            }
            self.shared.running.store(true, Ordering::SeqCst);
            if let Some(period) = self.period {
                self.spawn_ticker(period);
            }
            Ok(())
        })
    }

    fn stop(&self) -> Result<()> {
        self.gate.stop(|| {
            self.halt();
            Ok(())
        })
    }

    fn seek(&self, position_secs: f64) {
        let now = self.shared.clock.now();
        self.shared.sink.discard_after(now);
        self.shared.scheduler.lock().realign(now, position_secs);
    }

    fn position(&self) -> f64 {
        self.shared.scheduler.lock().elapsed()
    }

    fn duration(&self) -> Option<f64> {
        Some(self.shared.scheduler.lock().duration())
    }

    fn is_finished(&self) -> bool {
        self.shared.scheduler.lock().is_finished()
    }

    fn release(&self) -> Result<()> {
        self.gate.close(|| {
            self.halt();
            Ok(())
        })
    }
}

impl Drop for SynthBackend {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.ticker.lock().take() {
            let _ = handle.join();
        }
    }
}
