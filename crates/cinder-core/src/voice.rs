//! Note voices — oscillators, envelopes and the mixer the synth output pulls from.
//!
//! The scheduler commits notes at absolute clock times; the mixer renders
//! every voice whose span overlaps the requested buffer. Phase is derived
//! from absolute time, so a buffer boundary never clicks.

use std::f32::consts::PI;

use parking_lot::Mutex;

use crate::models::Waveform;

/// Linear attack length. Shortened to half the note for very short notes.
pub const ATTACK_SECS: f64 = 0.05;
/// Envelope level reached at the end of the exponential decay.
pub const DECAY_FLOOR: f32 = 0.001;

/// One committed note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledNote {
    pub start: f64,
    pub duration: f64,
    pub frequency_hz: f32,
    pub waveform: Waveform,
    pub amplitude: f32,
}

impl ScheduledNote {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Where the scheduler commits notes.
pub trait VoiceSink: Send + Sync {
    fn schedule(&self, note: ScheduledNote);
    /// Drop notes that have not started by `t`. Sounding voices keep going.
    fn discard_after(&self, t: f64);
}

/// Sink for headless playback: notes are timed but never rendered.
pub struct NullSink;

impl VoiceSink for NullSink {
    fn schedule(&self, _note: ScheduledNote) {}
    fn discard_after(&self, _t: f64) {}
}

/// Envelope level `age` seconds into a note of length `duration`.
///
/// Linear rise to 1 over the attack, then exponential fall to
/// `DECAY_FLOOR` at the note end. Zero outside the note.
pub fn envelope(age: f64, duration: f64) -> f32 {
    if age < 0.0 || age >= duration || duration <= 0.0 {
        return 0.0;
    }
    let attack_end = ATTACK_SECS.min(duration / 2.0);
    if age < attack_end {
        return (age / attack_end) as f32;
    }
    let decay_len = duration - attack_end;
    let progress = ((age - attack_end) / decay_len) as f32;
    DECAY_FLOOR.powf(progress)
}

/// Oscillator output for `phase` in cycles (only the fractional part matters).
pub fn oscillate(waveform: Waveform, phase: f64) -> f32 {
    let p = phase.fract() as f32;
    match waveform {
        Waveform::Sine => (2.0 * PI * p).sin(),
        Waveform::Square => {
            if p < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Sawtooth => 2.0 * p - 1.0,
        Waveform::Triangle => 1.0 - 4.0 * (p - 0.5).abs(),
    }
}

/// Sum of committed voices, shared by the scheduler (writer) and the output callback (reader).
#[derive(Default)]
pub struct VoiceMixer {
    notes: Mutex<Vec<ScheduledNote>>,
}

impl VoiceMixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.notes.lock().len()
    }

    /// Mix into an interleaved buffer starting at clock time `start_time`.
    ///
    /// `out` is overwritten. Voices that end before the buffer does are
    /// retired afterwards.
    pub fn render(&self, out: &mut [f32], channels: u16, sample_rate: u32, start_time: f64) {
        let ch = channels.max(1) as usize;
        let rate = sample_rate.max(1) as f64;
        out.iter_mut().for_each(|s| *s = 0.0);

        let mut notes = self.notes.lock();
        let frames = out.len() / ch;
        let end_time = start_time + frames as f64 / rate;

        for note in notes.iter() {
            if note.start >= end_time || note.end() <= start_time {
                continue;
            }
            for (i, frame) in out.chunks_exact_mut(ch).enumerate() {
                let t = start_time + i as f64 / rate;
                let age = t - note.start;
                let level = envelope(age, note.duration);
                if level == 0.0 {
                    continue;
                }
                let value = note.amplitude
                    * level
                    * oscillate(note.waveform, note.frequency_hz as f64 * age);
                for sample in frame.iter_mut() {
                    *sample += value;
                }
            }
        }

        notes.retain(|n| n.end() > end_time);
    }
}

impl VoiceSink for VoiceMixer {
    fn schedule(&self, note: ScheduledNote) {
        self.notes.lock().push(note);
    }

    fn discard_after(&self, t: f64) {
        self.notes.lock().retain(|n| n.start < t);
    }
}
