//! Effects — the code that touches devices, decoders and the filesystem.
//!
//! A backend factory decides which engines a transport plays through:
//! `NativeBackends` opens cpal outputs, `HeadlessBackends` keeps time
//! without producing sound.

use std::sync::Arc;

use crate::backend::{Backend, BackendFactory, NullStreamEngine, SharedVolume, StreamBackend, SynthBackend};
use crate::clock::{Clock, MonotonicClock};
use crate::config::TransportConfig;
use crate::error::Result;
use crate::models::{Track, TrackSource};
use crate::voice::NullSink;

/// Silent backends for hosts without audio (tests, servers, CI).
///
/// Synth tracks are still scheduled against a wall clock, so position,
/// end-of-track and looping behave as they would with a device.
pub struct HeadlessBackends {
    config: TransportConfig,
    clock: Arc<dyn Clock>,
}

impl HeadlessBackends {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            clock: Arc::new(MonotonicClock::new()),
        }
    }
}

impl BackendFactory for HeadlessBackends {
    fn create(&self, track: &Track, _volume: &SharedVolume) -> Result<Arc<dyn Backend>> {
        Ok(match &track.source {
            TrackSource::Synth { melody, waveform } => Arc::new(SynthBackend::new(
                melody.clone(),
                *waveform,
                track.duration_secs,
                Arc::clone(&self.clock),
                Arc::new(NullSink),
                &self.config,
            )),
            TrackSource::Stream { .. } => {
                Arc::new(StreamBackend::new(Arc::new(NullStreamEngine::new())))
            }
        })
    }
}

#[cfg(feature = "native")]
pub use native::NativeBackends;

#[cfg(feature = "native")]
mod native {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::audio::DecoderEngine;
    use super::output::SynthOutput;
    use crate::backend::{Backend, BackendFactory, SharedVolume, StreamBackend, SynthBackend};
    use crate::config::TransportConfig;
    use crate::error::{Result, TransportError};
    use crate::models::{Track, TrackSource};

    /// Backends playing through the default output device.
    ///
    /// Every synth track shares one output stream, opened on first use; its
    /// frame counter is the synth clock. Each stream track gets its own
    /// decoder and output stream.
    pub struct NativeBackends {
        config: TransportConfig,
        synth: Mutex<Option<Arc<SynthOutput>>>,
    }

    impl NativeBackends {
        pub fn new(config: TransportConfig) -> Self {
            Self {
                config,
                synth: Mutex::new(None),
            }
        }

        fn synth_output(&self, volume: &SharedVolume) -> Result<Arc<SynthOutput>> {
            let mut slot = self.synth.lock();
            if let Some(output) = slot.as_ref() {
                return Ok(Arc::clone(output));
            }
            let output = Arc::new(
                SynthOutput::open(volume.clone()).map_err(TransportError::ClockUnavailable)?,
            );
            *slot = Some(Arc::clone(&output));
            Ok(output)
        }
    }

    impl BackendFactory for NativeBackends {
        fn create(&self, track: &Track, volume: &SharedVolume) -> Result<Arc<dyn Backend>> {
            Ok(match &track.source {
                TrackSource::Synth { melody, waveform } => {
                    let output = self.synth_output(volume)?;
                    Arc::new(SynthBackend::new(
                        melody.clone(),
                        *waveform,
                        track.duration_secs,
                        output.clock(),
                        output.mixer(),
                        &self.config,
                    ))
                }
                TrackSource::Stream { locator } => Arc::new(StreamBackend::new(Arc::new(
                    DecoderEngine::new(locator, volume.clone()),
                ))),
            })
        }
    }
}

#[cfg(feature = "native")]
pub mod audio;
#[cfg(feature = "http")]
pub mod http;
pub mod import;
#[cfg(feature = "native")]
pub mod output;
