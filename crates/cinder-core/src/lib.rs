//! cinder-core — one playback transport over two kinds of audio.
//!
//! Synthesized tracks are sequenced note by note against an audio clock;
//! streamed tracks are decoded from files or URLs. Both sit behind the same
//! `Backend` capability set, so the control surface never branches on kind.
//!
//! # Architecture
//!
//! ```text
//! Layer 0: Models (tracks, transport state, intents, events)
//! Layer 1: Timing (clocks, lookahead scheduler, voice mixer, mute envelope)
//! Layer 2: Backends (synth, stream + play gate)
//! Layer 3: Transport (switching, seeking, volume, progress sampling)
//! Layer 4: Effects (cpal output, symphonia decode, file import)
//! ```

pub mod backend;
pub mod clock;
pub mod config;
pub mod effects;
pub mod error;
pub mod gate;
pub mod models;
pub mod mute;
pub mod sampler;
pub mod scheduler;
pub mod transport;
pub mod voice;

#[cfg(test)]
mod testing;

pub use config::TransportConfig;
pub use error::{Result, TransportError};
pub use models::*;
pub use transport::Transport;
