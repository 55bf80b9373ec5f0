//! Synth output — one cpal stream rendering the voice mixer.
//!
//! The stream lives on its own thread (cpal streams are not `Send`). Each
//! callback renders the mixer at the current frame clock reading, applies
//! the shared gain, then advances the clock by the frames written.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::backend::SharedVolume;
use crate::clock::{Clock, FrameClock};
use crate::voice::{VoiceMixer, VoiceSink};

/// How long `open` waits for the device before giving up.
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

pub struct SynthOutput {
    clock: Arc<FrameClock>,
    mixer: Arc<VoiceMixer>,
    stop: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl SynthOutput {
    /// Open the default output device. The error string names what failed.
    pub fn open(volume: SharedVolume) -> Result<Self, String> {
        let mixer = Arc::new(VoiceMixer::new());
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread_mixer = Arc::clone(&mixer);
        let thread_stop = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let stream = match build_stream(thread_mixer, volume) {
                Ok((stream, clock)) => {
                    let _ = ready_tx.send(Ok(clock));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            while !thread_stop.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(25));
            }
            drop(stream);
        });

        let clock = match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(clock)) => clock,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                return Err("output device did not respond".into());
            }
        };
        log::info!("cinder: synth output open at {} Hz", clock.sample_rate());

        Ok(Self {
            clock,
            mixer,
            stop,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn mixer(&self) -> Arc<dyn VoiceSink> {
        self.mixer.clone()
    }
}

impl Drop for SynthOutput {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

fn build_stream(
    mixer: Arc<VoiceMixer>,
    volume: SharedVolume,
) -> Result<(cpal::Stream, Arc<FrameClock>), Box<dyn std::error::Error>> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or("no output device")?;
    let default_cfg = device.default_output_config()?;
    if default_cfg.sample_format() != cpal::SampleFormat::F32 {
        return Err(format!(
            "device does not support f32 output (got {:?})",
            default_cfg.sample_format()
        )
        .into());
    }
    let config: cpal::StreamConfig = default_cfg.into();
    let channels = config.channels;
    let rate = config.sample_rate.0;

    let clock = Arc::new(FrameClock::new(rate));
    let cb_clock = Arc::clone(&clock);
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            mixer.render(data, channels, rate, cb_clock.now());
            let gain = volume.get();
            for s in data.iter_mut() {
                *s *= gain;
            }
            cb_clock.advance((data.len() / channels.max(1) as usize) as u64);
        },
        move |err| {
            log::error!("cinder: synth output error: {}", err);
        },
        None,
    )?;
    stream.play()?;
    Ok((stream, clock))
}
