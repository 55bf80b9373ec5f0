//! Lookahead note scheduler.
//!
//! Each tick commits every note that starts within `lookahead` of the clock,
//! then advances the logical position by one tick period. The melody cursor
//! and the elapsed counter are independent: the cursor cycles through the
//! melody, the counter measures the track.

use crate::models::{Note, Waveform};
use crate::voice::{ScheduledNote, VoiceSink};

#[derive(Debug, Clone)]
pub struct LookaheadScheduler {
    melody: Vec<Note>,
    waveform: Waveform,
    amplitude: f32,
    duration: f64,
    period: f64,
    lookahead: f64,
    next_event_time: f64,
    melody_cursor: usize,
    elapsed: f64,
    finished: bool,
}

impl LookaheadScheduler {
    pub fn new(
        melody: Vec<Note>,
        waveform: Waveform,
        amplitude: f32,
        duration: f64,
        period: f64,
        lookahead: f64,
    ) -> Self {
        Self {
            melody,
            waveform,
            amplitude,
            duration: duration.max(0.0),
            period,
            lookahead,
            next_event_time: 0.0,
            melody_cursor: 0,
            elapsed: 0.0,
            finished: false,
        }
    }

    /// One scheduling pass at clock reading `now`. Returns the notes committed.
    pub fn tick(&mut self, now: f64, sink: &dyn VoiceSink) -> usize {
        if self.finished {
            return 0;
        }
        let mut committed = 0;
        if !self.melody.is_empty() {
            while self.next_event_time < now + self.lookahead {
                let note = self.melody[self.melody_cursor];
                // A zero-length step would never advance the loop.
                let step = note.duration_secs.max(1e-3);
                sink.schedule(ScheduledNote {
                    start: self.next_event_time,
                    duration: step,
                    frequency_hz: note.frequency_hz,
                    waveform: self.waveform,
                    amplitude: self.amplitude,
                });
                committed += 1;
                self.next_event_time += step;
                self.melody_cursor = (self.melody_cursor + 1) % self.melody.len();
            }
        }
        self.elapsed += self.period;
        if self.duration > 0.0 && self.elapsed >= self.duration {
            self.elapsed = self.duration;
            self.finished = true;
        }
        committed
    }

    /// Jump to `elapsed` with the melody restarted at `now`.
    pub fn realign(&mut self, now: f64, elapsed: f64) {
        self.melody_cursor = 0;
        self.next_event_time = now;
        self.elapsed = elapsed.clamp(0.0, self.duration);
        self.finished = false;
    }

    /// Continue after a pause. Elapsed time is kept; the melody restarts
    /// at `now`, since notes committed past the pause were discarded.
    pub fn resume_at(&mut self, now: f64) {
        self.melody_cursor = 0;
        self.next_event_time = now;
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn melody_cursor(&self) -> usize {
        self.melody_cursor
    }

    pub fn next_event_time(&self) -> f64 {
        self.next_event_time
    }
}
