//! Track and melody types.
//!
//! A track never changes once built. Re-importing a file produces a new
//! track value; the playlist only ever grows.

use serde::{Deserialize, Serialize};

/// Oscillator shape used for every voice of a synth track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

/// One melody step: pitch and how long it holds before the next step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub frequency_hz: f32,
    pub duration_secs: f64,
}

impl Note {
    pub const fn new(frequency_hz: f32, duration_secs: f64) -> Self {
        Self {
            frequency_hz,
            duration_secs,
        }
    }
}

/// Which backend a track needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Synth,
    Stream,
}

/// Kind-specific payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TrackSource {
    /// Cyclic melody, replayed until the track's duration runs out.
    Synth { melody: Vec<Note>, waveform: Waveform },
    /// File path or `http(s)://` URI handed to the decoder.
    Stream { locator: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    /// Logical length in seconds. `0.0` means unknown until the decoder reports it.
    pub duration_secs: f64,
    pub source: TrackSource,
}

impl Track {
    pub fn synth(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        duration_secs: f64,
        melody: Vec<Note>,
        waveform: Waveform,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_secs: duration_secs.max(0.0),
            source: TrackSource::Synth { melody, waveform },
        }
    }

    pub fn stream(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        locator: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_secs: 0.0,
            source: TrackSource::Stream {
                locator: locator.into(),
            },
        }
    }

    /// Stream track for an ingested entry. The id is derived from the
    /// locator, so importing the same file twice yields the same id.
    pub fn from_entry(entry: TrackEntry) -> Self {
        let id = stable_id(&entry.locator);
        Self::stream(id, entry.title, entry.artist, entry.locator)
    }

    pub fn kind(&self) -> TrackKind {
        match self.source {
            TrackSource::Synth { .. } => TrackKind::Synth,
            TrackSource::Stream { .. } => TrackKind::Stream,
        }
    }
}

/// One ingested file: display strings plus the locator to decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackEntry {
    pub title: String,
    pub artist: String,
    pub locator: String,
}

/// `<sanitized file name>_<fnv1a of locator>`.
pub fn stable_id(locator: &str) -> String {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in locator.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    let name = locator.rsplit(['/', '\\']).next().unwrap_or(locator);
    let name: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{:016x}", name, hash)
}

/// The three built-in synth tracks the player boots with.
pub fn default_tracks() -> Vec<Track> {
    vec![
        Track::synth(
            "synth-1",
            "Neon Horizon",
            "Synth Wave",
            34.0,
            vec![
                Note::new(261.63, 0.4),
                Note::new(329.63, 0.4),
                Note::new(392.00, 0.4),
                Note::new(523.25, 0.8),
                Note::new(392.00, 0.4),
                Note::new(329.63, 0.4),
                Note::new(261.63, 1.2),
            ],
            Waveform::Sine,
        ),
        Track::synth(
            "synth-2",
            "Cyber Dust",
            "The Algorithm",
            42.0,
            vec![
                Note::new(110.00, 0.3),
                Note::new(110.00, 0.3),
                Note::new(220.00, 0.6),
                Note::new(164.81, 0.3),
                Note::new(196.00, 0.3),
                Note::new(146.83, 0.9),
            ],
            Waveform::Sawtooth,
        ),
        Track::synth(
            "synth-3",
            "Glass Heart",
            "Fractals",
            38.0,
            vec![
                Note::new(440.00, 0.5),
                Note::new(349.23, 0.5),
                Note::new(261.63, 1.0),
                Note::new(392.00, 0.5),
                Note::new(329.63, 1.0),
                Note::new(293.66, 1.0),
            ],
            Waveform::Triangle,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_tracks_start_with_unknown_duration() {
        let track = Track::stream("a", "Song", "Local Device", "/music/song.mp3");
        assert_eq!(track.kind(), TrackKind::Stream);
        assert_eq!(track.duration_secs, 0.0);
    }

    #[test]
    fn default_tracks_are_synths() {
        let tracks = default_tracks();
        assert_eq!(tracks.len(), 3);
        assert!(tracks.iter().all(|t| t.kind() == TrackKind::Synth));
        assert_eq!(tracks[0].duration_secs, 34.0);
    }

    #[test]
    fn entries_get_ids_from_their_locator() {
        let entry = TrackEntry {
            title: "Song".into(),
            artist: "Local Device".into(),
            locator: "/music/my song.mp3".into(),
        };
        let track = Track::from_entry(entry.clone());
        assert!(track.id.starts_with("my_song_mp3_"));
        assert_eq!(track, Track::from_entry(entry));
        assert_ne!(stable_id("/a/song.mp3"), stable_id("/b/song.mp3"));
    }

    #[test]
    fn track_json_uses_tagged_source() {
        let track = Track::stream("b", "Other", "Someone", "https://example.com/b.ogg");
        let v = serde_json::to_value(&track).unwrap();
        assert_eq!(v["source"]["kind"], "stream");
        assert_eq!(v["source"]["locator"], "https://example.com/b.ogg");
    }
}
