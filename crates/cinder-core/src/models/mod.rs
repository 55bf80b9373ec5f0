//! Cinder data models.
//!
//! Tracks are immutable values owned by the playlist. Transport state is a
//! plain struct owned by the controller and copied out as snapshots.

pub mod track;
pub mod transport;

pub use track::{default_tracks, stable_id, Note, Track, TrackEntry, TrackKind, TrackSource, Waveform};
pub use transport::{progress_percent, Intent, LoopMode, MutePhase, TransportEvent, TransportState};
