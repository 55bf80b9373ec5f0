//! Transport tuning knobs.
//!
//! Every field has a default, so a config file only names what it changes.
//! Invalid values fall back to the default with a warning instead of failing.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Synth scheduler tick period.
    pub scheduler_period_ms: u64,
    /// How far ahead of the clock notes are committed.
    pub lookahead_ms: u64,
    /// Progress sampler cadence.
    pub sampler_period_ms: u64,
    /// Length of the mute ("breaking") transition.
    pub break_ms: u64,
    /// Length of the unmute ("healing") transition.
    pub heal_ms: u64,
    pub initial_volume: f32,
    /// Peak amplitude of each synthesized note.
    pub note_amplitude: f32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            scheduler_period_ms: 25,
            lookahead_ms: 100,
            sampler_period_ms: 50,
            break_ms: 400,
            heal_ms: 600,
            initial_volume: 0.7,
            note_amplitude: 0.1,
        }
    }
}

impl TransportConfig {
    /// Build from JSON, keeping defaults for missing or invalid fields.
    pub fn from_value(v: &Value) -> Self {
        match serde_json::from_value::<TransportConfig>(v.clone()) {
            Ok(config) => config.validated(),
            Err(e) => {
                log::warn!("cinder: invalid transport config ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Read a JSON config file. A missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("cinder: cannot read config {}: {}", path.display(), e);
                return Self::default();
            }
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => Self::from_value(&v),
            Err(e) => {
                log::warn!("cinder: config {} is not JSON: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn validated(mut self) -> Self {
        let defaults = Self::default();
        for (name, value, fallback) in [
            ("scheduler_period_ms", &mut self.scheduler_period_ms, defaults.scheduler_period_ms),
            ("lookahead_ms", &mut self.lookahead_ms, defaults.lookahead_ms),
            ("sampler_period_ms", &mut self.sampler_period_ms, defaults.sampler_period_ms),
        ] {
            if *value == 0 {
                log::warn!("cinder: {} must be positive, using {}", name, fallback);
                *value = fallback;
            }
        }
        if !(0.0..=1.0).contains(&self.initial_volume) {
            log::warn!("cinder: initial_volume out of range, using {}", defaults.initial_volume);
            self.initial_volume = defaults.initial_volume;
        }
        if !(self.note_amplitude > 0.0 && self.note_amplitude <= 1.0) {
            log::warn!("cinder: note_amplitude out of range, using {}", defaults.note_amplitude);
            self.note_amplitude = defaults.note_amplitude;
        }
        self
    }

    pub fn scheduler_period(&self) -> Duration {
        Duration::from_millis(self.scheduler_period_ms)
    }

    pub fn sampler_period(&self) -> Duration {
        Duration::from_millis(self.sampler_period_ms)
    }

    pub fn lookahead_secs(&self) -> f64 {
        self.lookahead_ms as f64 / 1000.0
    }

    pub fn break_secs(&self) -> f64 {
        self.break_ms as f64 / 1000.0
    }

    pub fn heal_secs(&self) -> f64 {
        self.heal_ms as f64 / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config = TransportConfig::from_value(&serde_json::json!({"break_ms": 250}));
        assert_eq!(config.break_ms, 250);
        assert_eq!(config.heal_ms, 600);
        assert_eq!(config.scheduler_period_ms, 25);
    }

    #[test]
    fn zero_periods_fall_back() {
        let config = TransportConfig::from_value(&serde_json::json!({
            "scheduler_period_ms": 0,
            "initial_volume": 3.0
        }));
        assert_eq!(config.scheduler_period_ms, 25);
        assert_eq!(config.initial_volume, 0.7);
    }

    #[test]
    fn wrong_types_yield_defaults() {
        let config = TransportConfig::from_value(&serde_json::json!({"lookahead_ms": "soon"}));
        assert_eq!(config, TransportConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("cinder.json");
        std::fs::write(&path, r#"{"sampler_period_ms": 100}"#).unwrap();
        assert_eq!(TransportConfig::load(&path).sampler_period_ms, 100);
        assert_eq!(
            TransportConfig::load(&dir.path().join("missing.json")),
            TransportConfig::default()
        );
    }
}
