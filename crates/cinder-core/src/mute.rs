//! Mute transition state machine.
//!
//! ```text
//! Idle(unmuted) --toggle--> Breaking --D1--> Idle(muted) --toggle--> Healing --D2--> Idle(unmuted)
//! ```
//!
//! A toggle during Breaking or Healing restarts that phase's deadline. Only
//! `poll` moves the machine out of a transitional phase; there is one
//! deadline at a time, so a replaced deadline can never fire.

use crate::models::MutePhase;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle { muted: bool },
    Breaking { deadline: f64 },
    Healing { deadline: f64 },
}

/// Outcome of a phase expiring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MuteEvent {
    /// Breaking finished: volume is now 0.
    Muted,
    /// Healing finished: restore this volume.
    Restored { volume: f32 },
}

#[derive(Debug, Clone)]
pub struct MuteEnvelope {
    phase: Phase,
    pre_mute_volume: f32,
    break_secs: f64,
    heal_secs: f64,
}

impl MuteEnvelope {
    pub fn new(break_secs: f64, heal_secs: f64) -> Self {
        Self {
            phase: Phase::Idle { muted: false },
            pre_mute_volume: 0.0,
            break_secs: break_secs.max(0.0),
            heal_secs: heal_secs.max(0.0),
        }
    }

    /// Handle a mute/unmute request at time `now`.
    pub fn toggle(&mut self, now: f64, current_volume: f32) {
        self.phase = match self.phase {
            Phase::Idle { muted: false } => {
                self.pre_mute_volume = current_volume.clamp(0.0, 1.0);
                Phase::Breaking { deadline: now + self.break_secs }
            }
            Phase::Idle { muted: true } => Phase::Healing { deadline: now + self.heal_secs },
            Phase::Breaking { .. } => Phase::Breaking { deadline: now + self.break_secs },
            Phase::Healing { .. } => Phase::Healing { deadline: now + self.heal_secs },
        };
    }

    /// Advance past an expired deadline, if any.
    pub fn poll(&mut self, now: f64) -> Option<MuteEvent> {
        match self.phase {
            Phase::Breaking { deadline } if now >= deadline => {
                self.phase = Phase::Idle { muted: true };
                Some(MuteEvent::Muted)
            }
            Phase::Healing { deadline } if now >= deadline => {
                self.phase = Phase::Idle { muted: false };
                Some(MuteEvent::Restored {
                    volume: self.pre_mute_volume,
                })
            }
            _ => None,
        }
    }

    /// Jump straight to muted, as when the volume is dragged to zero.
    pub fn enter_muted(&mut self, pre_mute_volume: f32) {
        if let Phase::Idle { muted: false } = self.phase {
            self.pre_mute_volume = pre_mute_volume.clamp(0.0, 1.0);
            self.phase = Phase::Idle { muted: true };
        }
    }

    /// Jump straight to unmuted, as when a positive volume is set while muted.
    pub fn clear_muted(&mut self) {
        if let Phase::Idle { muted: true } = self.phase {
            self.phase = Phase::Idle { muted: false };
        }
    }

    pub fn is_transitional(&self) -> bool {
        !matches!(self.phase, Phase::Idle { .. })
    }

    pub fn phase(&self) -> MutePhase {
        match self.phase {
            Phase::Idle { .. } => MutePhase::Idle,
            Phase::Breaking { .. } => MutePhase::Breaking,
            Phase::Healing { .. } => MutePhase::Healing,
        }
    }

    pub fn pre_mute_volume(&self) -> f32 {
        self.pre_mute_volume
    }

    /// Whether the captured volume is frozen (muted or on the way there).
    pub fn holds_snapshot(&self) -> bool {
        !matches!(self.phase, Phase::Idle { muted: false })
    }

    /// Audible gain at `now`: fades out across Breaking, in across Healing.
    pub fn output_gain(&self, now: f64, volume: f32) -> f32 {
        match self.phase {
            Phase::Idle { .. } => volume,
            Phase::Breaking { deadline } => volume * remaining(deadline, now, self.break_secs),
            Phase::Healing { deadline } => {
                self.pre_mute_volume * (1.0 - remaining(deadline, now, self.heal_secs))
            }
        }
    }
}

fn remaining(deadline: f64, now: f64, span: f64) -> f32 {
    if span <= 0.0 {
        return 0.0;
    }
    ((deadline - now) / span).clamp(0.0, 1.0) as f32
}
