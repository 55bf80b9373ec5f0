//! Stream decoding — symphonia into a sample queue, cpal out.
//!
//! 1. `begin` opens and probes the locator synchronously, so a bad file or
//!    codec fails the start instead of a background thread.
//! 2. The output thread opens the device and reports the rate it got.
//! 3. The decoder thread resamples to that rate and fills the queue.
//!
//! Position counts frames the device has actually consumed since the last
//! seek, so it tracks what is audible rather than what has been decoded.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::backend::{SharedVolume, StreamEngine};

type BoxError = Box<dyn std::error::Error>;

/// Seek sentinel. Zero is a real target (loop restarts seek there).
const NO_SEEK: u64 = u64::MAX;
const READY_TIMEOUT: Duration = Duration::from_secs(3);
/// ~2 s of 48 kHz stereo.
const QUEUE_CAPACITY: usize = 48_000 * 2 * 2;

/// Bounded FIFO between the decoder and the device callback.
struct SampleQueue {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl SampleQueue {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a whole chunk or nothing. An empty queue takes any chunk.
    fn push(&mut self, chunk: &[f32]) -> bool {
        if !self.samples.is_empty() && self.samples.len() + chunk.len() > self.capacity {
            return false;
        }
        self.samples.extend(chunk.iter().copied());
        true
    }

    /// Fill `out`, padding with silence. Returns the samples actually taken.
    fn pull(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.samples.len());
        for (slot, sample) in out.iter_mut().zip(self.samples.drain(..n)) {
            *slot = sample;
        }
        out[n..].fill(0.0);
        n
    }

    fn len(&self) -> usize {
        self.samples.len()
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Linear interpolation between neighbouring frames.
struct LinearResampler {
    step: f64,
    phase: f64,
    channels: usize,
}

impl LinearResampler {
    fn new(src_rate: u32, dst_rate: u32, channels: u16) -> Self {
        Self {
            step: src_rate.max(1) as f64 / dst_rate.max(1) as f64,
            phase: 0.0,
            channels: channels.max(1) as usize,
        }
    }

    fn is_needed(&self) -> bool {
        (self.step - 1.0).abs() > 0.001
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }

    fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if !self.is_needed() {
            return input.to_vec();
        }
        let ch = self.channels;
        let frames = input.len() / ch;
        let mut output = Vec::with_capacity((frames as f64 / self.step).ceil() as usize * ch);
        while (self.phase as usize) < frames {
            let i = self.phase as usize;
            let frac = (self.phase - i as f64) as f32;
            let j = (i + 1).min(frames - 1);
            for c in 0..ch {
                let a = input[i * ch + c];
                let b = input[j * ch + c];
                output.push(a + (b - a) * frac);
            }
            self.phase += self.step;
        }
        self.phase -= frames as f64;
        output
    }
}

/// Map interleaved frames between channel layouts: mono fans out, anything
/// to mono averages, otherwise channels are copied by position.
fn adapt_channels(src: &[f32], src_ch: u16, dst: &mut [f32], dst_ch: u16) {
    let sc = src_ch.max(1) as usize;
    let dc = dst_ch.max(1) as usize;
    for (frame, out) in dst.chunks_exact_mut(dc).enumerate() {
        let input = src.get(frame * sc..(frame + 1) * sc).unwrap_or(&[]);
        match (sc, dc) {
            (1, _) => out.fill(input.first().copied().unwrap_or(0.0)),
            (_, 1) => {
                out[0] = if input.is_empty() {
                    0.0
                } else {
                    input.iter().sum::<f32>() / input.len() as f32
                }
            }
            _ => {
                for (c, slot) in out.iter_mut().enumerate() {
                    *slot = input.get(c).copied().unwrap_or(0.0);
                }
            }
        }
    }
}

struct Playback {
    paused: AtomicBool,
    stop: AtomicBool,
    /// Decoder ran out of packets.
    eof: AtomicBool,
    /// EOF and the queue has drained: the listener heard the last sample.
    ended: AtomicBool,
    seek_ms: AtomicU64,
    /// Position at the last load or seek.
    base_ms: AtomicU64,
    /// Device frames consumed since `base_ms`.
    played_frames: AtomicU64,
    device_rate: AtomicU32,
    duration_ms: AtomicU64,
    queue: Mutex<SampleQueue>,
}

impl Playback {
    fn position(&self) -> f64 {
        let base = self.base_ms.load(Ordering::SeqCst) as f64 / 1000.0;
        let rate = self.device_rate.load(Ordering::SeqCst).max(1) as f64;
        base + self.played_frames.load(Ordering::SeqCst) as f64 / rate
    }
}

struct OpenSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    sample_rate: u32,
    channels: u16,
    duration_ms: u64,
}

/// Decoder + device output for one file path or URL.
pub struct DecoderEngine {
    locator: String,
    volume: SharedVolume,
    playback: Arc<Playback>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DecoderEngine {
    pub fn new(locator: &str, volume: SharedVolume) -> Self {
        Self {
            locator: locator.to_string(),
            volume,
            playback: Arc::new(Playback {
                paused: AtomicBool::new(false),
                stop: AtomicBool::new(false),
                eof: AtomicBool::new(false),
                ended: AtomicBool::new(false),
                seek_ms: AtomicU64::new(NO_SEEK),
                base_ms: AtomicU64::new(0),
                played_frames: AtomicU64::new(0),
                device_rate: AtomicU32::new(44_100),
                duration_ms: AtomicU64::new(0),
                queue: Mutex::new(SampleQueue::new(QUEUE_CAPACITY)),
            }),
            threads: Mutex::new(Vec::new()),
        }
    }

    fn join_all(&self, threads: &mut Vec<JoinHandle<()>>) {
        self.playback.stop.store(true, Ordering::SeqCst);
        for handle in threads.drain(..) {
            let _ = handle.join();
        }
    }

    fn load(&self, threads: &mut Vec<JoinHandle<()>>) -> Result<(), BoxError> {
        let source = open_source(&self.locator)?;
        let p = &self.playback;
        p.stop.store(false, Ordering::SeqCst);
        p.paused.store(false, Ordering::SeqCst);
        p.eof.store(false, Ordering::SeqCst);
        p.ended.store(false, Ordering::SeqCst);
        p.played_frames.store(0, Ordering::SeqCst);
        if p.seek_ms.load(Ordering::SeqCst) == NO_SEEK {
            p.base_ms.store(0, Ordering::SeqCst);
        }
        p.duration_ms.store(source.duration_ms, Ordering::SeqCst);
        p.queue.lock().clear();

        let (ready_tx, ready_rx) = mpsc::channel();
        let out = Arc::clone(p);
        let volume = self.volume.clone();
        let (channels, rate) = (source.channels, source.sample_rate);
        threads.push(thread::spawn(move || {
            output_loop(out, volume, channels, rate, ready_tx)
        }));

        let device_rate = match ready_rx.recv_timeout(READY_TIMEOUT) {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err("output device did not respond".into()),
        };
        p.device_rate.store(device_rate, Ordering::SeqCst);

        let dec = Arc::clone(p);
        threads.push(thread::spawn(move || {
            if let Err(e) = decode_loop(source, device_rate, &dec) {
                log::error!("cinder: decode error: {}", e);
            }
            dec.eof.store(true, Ordering::SeqCst);
        }));
        Ok(())
    }
}

impl StreamEngine for DecoderEngine {
    /// Resume if loaded, otherwise (re)load from the start or a pending seek.
    fn begin(&self) -> Result<(), String> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() && !self.playback.ended.load(Ordering::SeqCst) {
            self.playback.paused.store(false, Ordering::SeqCst);
            return Ok(());
        }
        self.join_all(&mut threads);
        self.load(&mut threads).map_err(|e| {
            self.join_all(&mut threads);
            format!("{}: {}", self.locator, e)
        })
    }

    fn halt(&self) -> Result<(), String> {
        self.playback.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn seek(&self, position_secs: f64) {
        let ms = (position_secs.max(0.0) * 1000.0).round() as u64;
        let p = &self.playback;
        p.seek_ms.store(ms, Ordering::SeqCst);
        p.base_ms.store(ms, Ordering::SeqCst);
        p.played_frames.store(0, Ordering::SeqCst);
    }

    fn position(&self) -> f64 {
        self.playback.position()
    }

    fn duration(&self) -> Option<f64> {
        let ms = self.playback.duration_ms.load(Ordering::SeqCst);
        (ms > 0).then(|| ms as f64 / 1000.0)
    }

    fn ended(&self) -> bool {
        self.playback.ended.load(Ordering::SeqCst)
    }

    fn release(&self) {
        let mut threads = self.threads.lock();
        self.join_all(&mut threads);
    }
}

impl Drop for DecoderEngine {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_stream(locator: &str) -> Result<(MediaSourceStream, Option<String>), BoxError> {
    #[cfg(feature = "http")]
    {
        if super::http::is_http_url(locator) {
            let mss = super::http::open_url(locator)?;
            return Ok((mss, super::http::extension_from_url(locator)));
        }
    }
    let path = Path::new(locator);
    let file = File::open(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    Ok((MediaSourceStream::new(Box::new(file), Default::default()), ext))
}

fn open_source(locator: &str) -> Result<OpenSource, BoxError> {
    let (mss, ext) = open_stream(locator)?;
    let mut hint = Hint::new();
    if let Some(ext) = ext.as_deref() {
        hint.with_extension(ext);
    }
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let format = probed.format;
    let track = format.default_track().ok_or("no default track")?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
    let channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(2);
    let duration_ms = track
        .codec_params
        .n_frames
        .map(|n| n * 1000 / sample_rate as u64)
        .unwrap_or(0);
    let decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    Ok(OpenSource {
        format,
        decoder,
        track_id,
        sample_rate,
        channels,
        duration_ms,
    })
}

fn decode_loop(source: OpenSource, device_rate: u32, playback: &Playback) -> Result<(), BoxError> {
    let OpenSource {
        mut format,
        mut decoder,
        track_id,
        sample_rate,
        channels,
        ..
    } = source;
    let mut resampler = LinearResampler::new(sample_rate, device_rate, channels);
    if resampler.is_needed() {
        log::info!("cinder: resampling {} Hz -> {} Hz", sample_rate, device_rate);
    }

    loop {
        if playback.stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        let seek_ms = playback.seek_ms.swap(NO_SEEK, Ordering::SeqCst);
        if seek_ms != NO_SEEK {
            let time = Time::new(seek_ms / 1000, (seek_ms % 1000) as f64 / 1000.0);
            let target = SeekTo::Time {
                time,
                track_id: Some(track_id),
            };
            match format.seek(SeekMode::Accurate, target) {
                Ok(_) => {
                    decoder.reset();
                    resampler.reset();
                    playback.queue.lock().clear();
                    playback.base_ms.store(seek_ms, Ordering::SeqCst);
                    playback.played_frames.store(0, Ordering::SeqCst);
                }
                Err(e) => log::warn!("cinder: seek to {} ms failed: {}", seek_ms, e),
            }
        }

        if playback.paused.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(10));
            continue;
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("cinder: skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let spec = *decoded.spec();
        let mut buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        let samples = resampler.process(buf.samples());

        // Back-pressure: wait for room, but give way to stops and seeks.
        loop {
            if playback.stop.load(Ordering::SeqCst) {
                return Ok(());
            }
            if playback.seek_ms.load(Ordering::SeqCst) != NO_SEEK {
                break;
            }
            if playback.queue.lock().push(&samples) {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

fn output_loop(
    playback: Arc<Playback>,
    volume: SharedVolume,
    source_channels: u16,
    source_rate: u32,
    ready: mpsc::Sender<Result<u32, String>>,
) {
    let stream = match build_output(&playback, volume, source_channels, source_rate) {
        Ok((stream, rate)) => {
            let _ = ready.send(Ok(rate));
            stream
        }
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    loop {
        if playback.stop.load(Ordering::SeqCst) {
            break;
        }
        if playback.eof.load(Ordering::SeqCst) && playback.queue.lock().len() == 0 {
            playback.ended.store(true, Ordering::SeqCst);
            log::debug!("cinder: stream drained");
            break;
        }
        thread::sleep(Duration::from_millis(25));
    }
    drop(stream);
}

/// Open the device at the track's rate when it supports it, else at its default.
fn build_output(
    playback: &Arc<Playback>,
    volume: SharedVolume,
    source_channels: u16,
    source_rate: u32,
) -> Result<(cpal::Stream, u32), BoxError> {
    let host = cpal::default_host();
    let device = host.default_output_device().ok_or("no output device")?;

    let native_rate_ok = device
        .supported_output_configs()
        .map(|mut configs| {
            configs.any(|range| {
                range.sample_format() == cpal::SampleFormat::F32
                    && range.channels() >= source_channels
                    && range.min_sample_rate().0 <= source_rate
                    && range.max_sample_rate().0 >= source_rate
            })
        })
        .unwrap_or(false);

    let config: cpal::StreamConfig = if native_rate_ok {
        cpal::StreamConfig {
            channels: source_channels,
            sample_rate: cpal::SampleRate(source_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    } else {
        let default_cfg = device.default_output_config()?;
        if default_cfg.sample_format() != cpal::SampleFormat::F32 {
            return Err(format!(
                "device does not support f32 output (got {:?})",
                default_cfg.sample_format()
            )
            .into());
        }
        default_cfg.into()
    };
    let out_channels = config.channels;
    let rate = config.sample_rate.0;

    let cb = Arc::clone(playback);
    let mut scratch: Vec<f32> = Vec::new();
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            if cb.paused.load(Ordering::SeqCst) {
                data.fill(0.0);
                return;
            }
            let frames = if source_channels == out_channels {
                cb.queue.lock().pull(data) / out_channels.max(1) as usize
            } else {
                let wanted = data.len() / out_channels.max(1) as usize;
                scratch.resize(wanted * source_channels as usize, 0.0);
                let taken = cb.queue.lock().pull(&mut scratch);
                adapt_channels(&scratch, source_channels, data, out_channels);
                taken / source_channels.max(1) as usize
            };
            cb.played_frames.fetch_add(frames as u64, Ordering::SeqCst);
            let gain = volume.get();
            for s in data.iter_mut() {
                *s *= gain;
            }
        },
        move |err| {
            log::error!("cinder: stream output error: {}", err);
        },
        None,
    )?;
    stream.play()?;
    Ok((stream, rate))
}
