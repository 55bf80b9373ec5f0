//! Transport state, intents and notifications.
//!
//! `Intent` is a tagged enum so the FFI and CLI can send one JSON value
//! per user action. `TransportState` is the snapshot handed to renderers.

use serde::{Deserialize, Serialize};

/// What happens when the current track reaches its end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Advance to the next track, wrapping to the first after the last.
    #[default]
    LoopQueue,
    /// Restart the current track.
    LoopTrack,
}

impl LoopMode {
    pub fn toggled(self) -> Self {
        match self {
            LoopMode::LoopQueue => LoopMode::LoopTrack,
            LoopMode::LoopTrack => LoopMode::LoopQueue,
        }
    }
}

/// Phase of the mute transition, exposed so a UI can draw the break/heal effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MutePhase {
    #[default]
    Idle,
    Breaking,
    Healing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportState {
    pub current_index: usize,
    pub track_id: String,
    pub is_playing: bool,
    pub loop_mode: LoopMode,
    pub volume: f32,
    pub muted: bool,
    pub pre_mute_volume: f32,
    pub mute_phase: MutePhase,
    pub current_time_secs: f64,
    pub duration_secs: f64,
    pub progress_percent: f64,
    pub drag_locked: bool,
    /// Set when the audio clock could not be created; plays fail fast until cleared.
    pub disabled: Option<String>,
}

impl TransportState {
    pub fn new(track_id: &str, duration_secs: f64, volume: f32) -> Self {
        let volume = volume.clamp(0.0, 1.0);
        Self {
            current_index: 0,
            track_id: track_id.to_string(),
            is_playing: false,
            loop_mode: LoopMode::default(),
            volume,
            muted: volume == 0.0,
            pre_mute_volume: volume,
            mute_phase: MutePhase::Idle,
            current_time_secs: 0.0,
            duration_secs: duration_secs.max(0.0),
            progress_percent: 0.0,
            drag_locked: false,
            disabled: None,
        }
    }

    /// Re-derive `progress_percent` from time and duration.
    pub fn recompute_progress(&mut self) {
        self.progress_percent = progress_percent(self.current_time_secs, self.duration_secs);
    }
}

/// `100 * time / duration`, or `0` while the duration is unknown.
pub fn progress_percent(current_secs: f64, duration_secs: f64) -> f64 {
    if duration_secs > 0.0 {
        (100.0 * current_secs / duration_secs).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// One user action, whatever input produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Intent {
    Play,
    Pause,
    Toggle,
    Next,
    Prev,
    SeekTo { percent: f64 },
    SeekBy { seconds: f64 },
    SetVolume { volume: f32 },
    AdjustVolume { delta: f32 },
    ToggleMute,
    SetLoopMode { mode: LoopMode },
    ToggleLoopMode,
    Select { index: usize },
    BeginSeekDrag,
    EndSeekDrag { percent: f64 },
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TransportEvent {
    TrackChanged { index: usize, track_id: String },
    TrackEnded { track_id: String },
    MuteChanged { muted: bool },
    /// A reportable failure, shown as a transient status message.
    Status { message: String },
}
