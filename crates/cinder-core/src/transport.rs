//! Transport controller — one control surface over synth and stream playback.
//!
//! Owns the playlist cursor, loop mode, volume and mute envelope, and the
//! single active backend. Cloning a `Transport` yields another handle to the
//! same controller.
//!
//! Lock order is `switch` → `active` → `state`. No backend call is made
//! while `state` is held; backends serialize their own start/stop through
//! their PlayGate.

use std::ops::Range;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{Backend, BackendFactory, SharedVolume};
use crate::clock::{Clock, MonotonicClock};
use crate::config::TransportConfig;
use crate::effects::HeadlessBackends;
use crate::error::{Result, TransportError};
use crate::models::{Intent, LoopMode, Track, TrackEntry, TransportEvent, TransportState};
use crate::mute::{MuteEnvelope, MuteEvent};
use crate::sampler::ProgressSampler;

#[derive(Clone)]
pub struct Transport {
    shared: Arc<Shared>,
}

struct Shared {
    config: TransportConfig,
    factory: Arc<dyn BackendFactory>,
    /// Drives mute deadlines. Independent of any backend's clock.
    clock: Arc<dyn Clock>,
    volume: SharedVolume,
    switch: Mutex<()>,
    active: Mutex<Option<Arc<dyn Backend>>>,
    state: Mutex<Inner>,
    subscribers: Mutex<Vec<Sender<TransportEvent>>>,
    sampler: Mutex<Option<ProgressSampler>>,
}

struct Inner {
    playlist: Vec<Track>,
    state: TransportState,
    mute: MuteEnvelope,
    /// Bumped by every pause; a start that observes a newer epoch lost the race.
    play_epoch: u64,
}

impl Inner {
    fn load(&mut self, index: usize) {
        let track = &self.playlist[index];
        self.state.current_index = index;
        self.state.track_id = track.id.clone();
        self.state.duration_secs = track.duration_secs;
        self.state.current_time_secs = 0.0;
        self.state.recompute_progress();
    }

    fn sync_mute(&mut self) {
        self.state.mute_phase = self.mute.phase();
        self.state.pre_mute_volume = if self.mute.holds_snapshot() {
            self.mute.pre_mute_volume()
        } else {
            self.state.volume
        };
    }

    fn poll_mute(&mut self, now: f64, events: &mut Vec<TransportEvent>) {
        match self.mute.poll(now) {
            Some(MuteEvent::Muted) => {
                self.state.volume = 0.0;
                self.state.muted = true;
                events.push(TransportEvent::MuteChanged { muted: true });
            }
            Some(MuteEvent::Restored { volume }) => {
                self.state.volume = volume;
                if volume > 0.0 {
                    self.state.muted = false;
                    events.push(TransportEvent::MuteChanged { muted: false });
                } else {
                    // Nothing audible to restore.
                    self.mute.enter_muted(0.0);
                }
            }
            None => {}
        }
        self.sync_mute();
    }
}

impl Transport {
    /// Build a transport over `playlist`. Nothing plays until `play()`.
    pub fn new(
        playlist: Vec<Track>,
        factory: Arc<dyn BackendFactory>,
        clock: Arc<dyn Clock>,
        config: TransportConfig,
    ) -> Result<Self> {
        let first = playlist.first().ok_or(TransportError::EmptyPlaylist)?;
        let state = TransportState::new(&first.id, first.duration_secs, config.initial_volume);
        let mut mute = MuteEnvelope::new(config.break_secs(), config.heal_secs());
        if state.muted {
            mute.enter_muted(0.0);
        }
        let volume = SharedVolume::new(state.volume);
        log::info!("cinder: transport ready with {} tracks", playlist.len());
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                factory,
                clock,
                volume,
                switch: Mutex::new(()),
                active: Mutex::new(None),
                state: Mutex::new(Inner {
                    playlist,
                    state,
                    mute,
                    play_epoch: 0,
                }),
                subscribers: Mutex::new(Vec::new()),
                sampler: Mutex::new(None),
            }),
        })
    }

    /// Transport that keeps time but produces no sound.
    pub fn headless(playlist: Vec<Track>, config: TransportConfig) -> Result<Self> {
        let factory = Arc::new(HeadlessBackends::new(config.clone()));
        Self::new(playlist, factory, Arc::new(MonotonicClock::new()), config)
    }

    /// Transport playing through the default output device.
    #[cfg(feature = "native")]
    pub fn native(playlist: Vec<Track>, config: TransportConfig) -> Result<Self> {
        let factory = Arc::new(crate::effects::NativeBackends::new(config.clone()));
        Self::new(playlist, factory, Arc::new(MonotonicClock::new()), config)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the progress sampler. Idempotent.
    pub fn start(&self) {
        let mut sampler = self.shared.sampler.lock();
        if sampler.is_some() {
            return;
        }
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        *sampler = Some(ProgressSampler::spawn(
            self.shared.config.sampler_period(),
            move || match weak.upgrade() {
                Some(shared) => {
                    Transport { shared }.sample();
                    true
                }
                None => false,
            },
        ));
    }

    /// Stop the sampler and tear down the active backend. Safe to call twice.
    pub fn shutdown(&self) {
        let sampler = self.shared.sampler.lock().take();
        if let Some(sampler) = sampler {
            sampler.stop();
        }
        let _switch = self.shared.switch.lock();
        {
            let mut inner = self.shared.state.lock();
            inner.play_epoch += 1;
            inner.state.is_playing = false;
        }
        let backend = self.shared.active.lock().take();
        if let Some(backend) = backend {
            if let Err(e) = backend.release() {
                self.report(&e);
            }
        }
    }

    /// Clear the disabled state once the host's audio device is back.
    pub fn recover_audio(&self) {
        let mut inner = self.shared.state.lock();
        if inner.state.disabled.take().is_some() {
            log::info!("cinder: audio recovery requested, plays re-enabled");
        }
    }

    // -----------------------------------------------------------------------
    // Play / pause
    // -----------------------------------------------------------------------

    pub fn play(&self) -> Result<()> {
        let _switch = self.shared.switch.lock();
        self.play_locked()
    }

    pub fn pause(&self) -> Result<()> {
        {
            let mut inner = self.shared.state.lock();
            inner.play_epoch += 1;
            inner.state.is_playing = false;
        }
        let backend = self.shared.active.lock().clone();
        if let Some(backend) = backend {
            if let Err(e) = backend.stop() {
                self.report(&e);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn toggle(&self) -> Result<()> {
        if self.shared.state.lock().state.is_playing {
            self.pause()
        } else {
            self.play()
        }
    }

    fn play_locked(&self) -> Result<()> {
        let epoch = {
            let inner = self.shared.state.lock();
            if inner.state.is_playing {
                return Ok(());
            }
            if let Some(reason) = &inner.state.disabled {
                return Err(TransportError::ClockUnavailable(reason.clone()));
            }
            inner.play_epoch
        };
        let backend = self.ensure_backend()?;
        self.run_start(&backend, epoch)
    }

    /// Start `backend`, publishing `is_playing` only if no pause came in meanwhile.
    fn run_start(&self, backend: &Arc<dyn Backend>, epoch: u64) -> Result<()> {
        match backend.start() {
            Ok(()) => {
                let superseded = {
                    let mut inner = self.shared.state.lock();
                    if inner.play_epoch == epoch {
                        inner.state.is_playing = true;
                        false
                    } else {
                        true
                    }
                };
                if superseded {
                    // A pause raced this start and may have missed the backend.
                    if let Err(e) = backend.stop() {
                        self.report(&e);
                    }
                }
                Ok(())
            }
            Err(TransportError::BackendCancelled) => {
                log::debug!("cinder: start superseded before it began");
                Ok(())
            }
            Err(e) => {
                self.shared.state.lock().state.is_playing = false;
                self.report(&e);
                Err(e)
            }
        }
    }

    fn ensure_backend(&self) -> Result<Arc<dyn Backend>> {
        let mut active = self.shared.active.lock();
        if let Some(backend) = active.as_ref() {
            return Ok(Arc::clone(backend));
        }
        let (track, resume_at) = {
            let inner = self.shared.state.lock();
            (
                inner.playlist[inner.state.current_index].clone(),
                inner.state.current_time_secs,
            )
        };
        let backend = self.create_backend(&track)?;
        if resume_at > 0.0 {
            backend.seek(resume_at);
        }
        *active = Some(Arc::clone(&backend));
        Ok(backend)
    }

    fn create_backend(&self, track: &Track) -> Result<Arc<dyn Backend>> {
        match self.shared.factory.create(track, &self.shared.volume) {
            Ok(backend) => Ok(backend),
            Err(TransportError::ClockUnavailable(reason)) => {
                log::error!("cinder: audio clock unavailable, playback disabled: {}", reason);
                self.shared.state.lock().state.disabled = Some(reason.clone());
                let e = TransportError::ClockUnavailable(reason);
                self.report(&e);
                Err(e)
            }
            Err(e) => {
                self.report(&e);
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Track switching
    // -----------------------------------------------------------------------

    pub fn next(&self) -> Result<()> {
        let _switch = self.shared.switch.lock();
        let (index, len) = self.cursor();
        self.switch_locked((index + 1) % len)
    }

    pub fn prev(&self) -> Result<()> {
        let _switch = self.shared.switch.lock();
        let (index, len) = self.cursor();
        self.switch_locked((index + len - 1) % len)
    }

    /// Jump to `index` with the same semantics as `next()`.
    pub fn select(&self, index: usize) -> Result<()> {
        let _switch = self.shared.switch.lock();
        let (_, len) = self.cursor();
        if index >= len {
            let e = TransportError::IndexOutOfRange(index);
            self.report(&e);
            return Err(e);
        }
        self.switch_locked(index)
    }

    /// Handle the current track reaching its end according to the loop mode.
    pub fn on_track_end(&self) -> Result<()> {
        let _switch = self.shared.switch.lock();
        self.end_of_track_locked()
    }

    fn cursor(&self) -> (usize, usize) {
        let inner = self.shared.state.lock();
        (inner.state.current_index, inner.playlist.len())
    }

    /// Tear down the current backend, then build and start one for `index`.
    ///
    /// On failure the cursor goes back to where it was and the transport is
    /// left paused with no backend loaded.
    fn switch_locked(&self, index: usize) -> Result<()> {
        let (previous, track, epoch) = {
            let mut inner = self.shared.state.lock();
            // A switch is a play request: it fails fast like `play` while disabled.
            if let Some(reason) = &inner.state.disabled {
                return Err(TransportError::ClockUnavailable(reason.clone()));
            }
            let previous = inner.state.current_index;
            inner.load(index);
            (previous, inner.playlist[index].clone(), inner.play_epoch)
        };

        let old = self.shared.active.lock().take();
        if let Some(old) = old {
            if let Err(e) = old.release() {
                self.report(&e);
            }
        }

        let backend = match self.create_backend(&track) {
            Ok(backend) => backend,
            Err(e) => {
                self.restore(previous);
                return Err(e);
            }
        };
        *self.shared.active.lock() = Some(Arc::clone(&backend));

        match self.run_start(&backend, epoch) {
            Ok(()) => {
                log::info!("cinder: now on track {} ({})", index, track.title);
                self.emit(TransportEvent::TrackChanged {
                    index,
                    track_id: track.id,
                });
                Ok(())
            }
            Err(e) => {
                self.shared.active.lock().take();
                if let Err(release) = backend.release() {
                    log::warn!("cinder: release after failed start: {}", release);
                }
                self.restore(previous);
                Err(e)
            }
        }
    }

    fn restore(&self, index: usize) {
        let mut inner = self.shared.state.lock();
        inner.load(index);
        inner.state.is_playing = false;
    }

    fn end_of_track_locked(&self) -> Result<()> {
        let (mode, track_id, index, len) = {
            let inner = self.shared.state.lock();
            (
                inner.state.loop_mode,
                inner.state.track_id.clone(),
                inner.state.current_index,
                inner.playlist.len(),
            )
        };
        self.emit(TransportEvent::TrackEnded { track_id });

        match mode {
            LoopMode::LoopTrack => {
                let backend = self.shared.active.lock().clone();
                let epoch = {
                    let mut inner = self.shared.state.lock();
                    inner.state.current_time_secs = 0.0;
                    inner.state.recompute_progress();
                    inner.play_epoch
                };
                match backend {
                    Some(backend) => {
                        backend.seek(0.0);
                        self.run_start(&backend, epoch)
                    }
                    None => {
                        self.shared.state.lock().state.is_playing = false;
                        self.play_locked()
                    }
                }
            }
            LoopMode::LoopQueue => self.switch_locked((index + 1) % len),
        }
    }

    /// End-of-track seen by the sampler. Ignored if `observed` is no longer current.
    fn finish_observed(&self, observed: &Arc<dyn Backend>) {
        let _switch = self.shared.switch.lock();
        let current = self.shared.active.lock().clone();
        let still_current = current
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, observed));
        if !still_current || !self.shared.state.lock().state.is_playing {
            return;
        }
        if let Err(e) = self.end_of_track_locked() {
            log::debug!("cinder: end-of-track handling failed: {}", e);
        }
    }

    // -----------------------------------------------------------------------
    // Seeking
    // -----------------------------------------------------------------------

    /// Seek to a percentage of the current track.
    pub fn seek_to(&self, percent: f64) {
        let percent = if percent.is_finite() {
            percent.clamp(0.0, 100.0)
        } else {
            0.0
        };
        let backend = self.shared.active.lock().clone();
        let native = backend
            .as_ref()
            .and_then(|b| b.duration())
            .filter(|d| *d > 0.0);
        let duration = {
            let mut inner = self.shared.state.lock();
            if let Some(d) = native {
                inner.state.duration_secs = d;
            }
            inner.state.duration_secs
        };
        self.apply_seek(percent / 100.0 * duration, backend);
    }

    /// Seek relative to the current time, clamped to the track.
    pub fn seek_by(&self, delta_secs: f64) {
        if !delta_secs.is_finite() {
            return;
        }
        let backend = self.shared.active.lock().clone();
        let target = self.shared.state.lock().state.current_time_secs + delta_secs;
        self.apply_seek(target, backend);
    }

    fn apply_seek(&self, target: f64, backend: Option<Arc<dyn Backend>>) {
        let target = {
            let mut inner = self.shared.state.lock();
            let target = target.clamp(0.0, inner.state.duration_secs.max(0.0));
            inner.state.current_time_secs = target;
            inner.state.recompute_progress();
            target
        };
        if let Some(backend) = backend {
            backend.seek(target);
        }
    }

    /// Freeze sampler writes while the user drags the seek bar.
    pub fn begin_seek_drag(&self) {
        self.shared.state.lock().state.drag_locked = true;
    }

    /// Commit the dragged position and release the lock.
    pub fn end_seek_drag(&self, percent: f64) {
        self.seek_to(percent);
        self.shared.state.lock().state.drag_locked = false;
    }

    // -----------------------------------------------------------------------
    // Volume and mute
    // -----------------------------------------------------------------------

    pub fn set_volume(&self, volume: f32) {
        if !volume.is_finite() {
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        let now = self.shared.clock.now();
        let mut events = Vec::new();
        {
            let mut inner = self.shared.state.lock();
            let previous = inner.state.volume;
            inner.state.volume = volume;
            // Mid-transition writes leave the envelope and its snapshot alone.
            if !inner.mute.is_transitional() {
                if volume == 0.0 && !inner.state.muted {
                    inner.mute.enter_muted(previous);
                    inner.state.muted = true;
                    events.push(TransportEvent::MuteChanged { muted: true });
                } else if volume > 0.0 && inner.state.muted {
                    inner.mute.clear_muted();
                    inner.state.muted = false;
                    events.push(TransportEvent::MuteChanged { muted: false });
                }
            }
            inner.sync_mute();
            self.publish_gain(&inner, now);
        }
        self.emit_all(events);
    }

    /// Keyboard volume step. While muted it unmutes instead.
    pub fn adjust_volume(&self, delta: f32) {
        let (muted, volume) = {
            let inner = self.shared.state.lock();
            (inner.state.muted, inner.state.volume)
        };
        if muted {
            self.toggle_mute();
        } else {
            self.set_volume(round1(volume + delta));
        }
    }

    pub fn toggle_mute(&self) {
        let now = self.shared.clock.now();
        let mut inner = self.shared.state.lock();
        let volume = inner.state.volume;
        inner.mute.toggle(now, volume);
        inner.sync_mute();
        log::debug!("cinder: mute phase now {:?}", inner.state.mute_phase);
        self.publish_gain(&inner, now);
    }

    fn publish_gain(&self, inner: &Inner, now: f64) {
        self.shared
            .volume
            .set(inner.mute.output_gain(now, inner.state.volume));
    }

    // -----------------------------------------------------------------------
    // Loop mode
    // -----------------------------------------------------------------------

    pub fn set_loop_mode(&self, mode: LoopMode) {
        self.shared.state.lock().state.loop_mode = mode;
    }

    pub fn toggle_loop_mode(&self) -> LoopMode {
        let mut inner = self.shared.state.lock();
        inner.state.loop_mode = inner.state.loop_mode.toggled();
        inner.state.loop_mode
    }

    // -----------------------------------------------------------------------
    // Sampling
    // -----------------------------------------------------------------------

    /// One progress pass: expire mute deadlines, copy backend position into
    /// the state and handle end-of-track.
    pub fn sample(&self) {
        let now = self.shared.clock.now();
        let mut events = Vec::new();
        {
            let mut inner = self.shared.state.lock();
            inner.poll_mute(now, &mut events);
            self.publish_gain(&inner, now);
        }
        self.emit_all(events);

        let ended = {
            let active = self.shared.active.lock();
            let Some(backend) = active.as_ref() else {
                return;
            };
            let position = backend.position();
            let native = backend.duration().filter(|d| *d > 0.0);
            let finished = backend.is_finished();

            let mut inner = self.shared.state.lock();
            if let Some(d) = native {
                if !inner.state.drag_locked && inner.state.duration_secs != d {
                    inner.state.duration_secs = d;
                    inner.state.recompute_progress();
                }
            }
            if inner.state.is_playing && !inner.state.drag_locked {
                let duration = inner.state.duration_secs;
                inner.state.current_time_secs = if duration > 0.0 {
                    position.clamp(0.0, duration)
                } else {
                    position.max(0.0)
                };
                inner.state.recompute_progress();
            }
            (inner.state.is_playing && finished).then(|| Arc::clone(backend))
        };

        if let Some(backend) = ended {
            self.finish_observed(&backend);
        }
    }

    // -----------------------------------------------------------------------
    // Intents, playlist, events
    // -----------------------------------------------------------------------

    /// Route one user intent to its operation.
    pub fn dispatch(&self, intent: Intent) -> Result<()> {
        match intent {
            Intent::Play => self.play(),
            Intent::Pause => self.pause(),
            Intent::Toggle => self.toggle(),
            Intent::Next => self.next(),
            Intent::Prev => self.prev(),
            Intent::Select { index } => self.select(index),
            Intent::SeekTo { percent } => {
                self.seek_to(percent);
                Ok(())
            }
            Intent::SeekBy { seconds } => {
                self.seek_by(seconds);
                Ok(())
            }
            Intent::SetVolume { volume } => {
                self.set_volume(volume);
                Ok(())
            }
            Intent::AdjustVolume { delta } => {
                self.adjust_volume(delta);
                Ok(())
            }
            Intent::ToggleMute => {
                self.toggle_mute();
                Ok(())
            }
            Intent::SetLoopMode { mode } => {
                self.set_loop_mode(mode);
                Ok(())
            }
            Intent::ToggleLoopMode => {
                self.toggle_loop_mode();
                Ok(())
            }
            Intent::BeginSeekDrag => {
                self.begin_seek_drag();
                Ok(())
            }
            Intent::EndSeekDrag { percent } => {
                self.end_seek_drag(percent);
                Ok(())
            }
        }
    }

    /// Append tracks to the playlist. Returns the indices they landed at.
    pub fn append_tracks(&self, tracks: Vec<Track>) -> Range<usize> {
        let mut inner = self.shared.state.lock();
        let start = inner.playlist.len();
        inner.playlist.extend(tracks);
        let end = inner.playlist.len();
        log::info!("cinder: appended {} tracks", end - start);
        start..end
    }

    /// Ingest `(title, artist, locator)` entries as stream tracks.
    pub fn append_entries(&self, entries: Vec<TrackEntry>) -> Range<usize> {
        self.append_tracks(entries.into_iter().map(Track::from_entry).collect())
    }

    pub fn state(&self) -> TransportState {
        self.shared.state.lock().state.clone()
    }

    pub fn playlist(&self) -> Vec<Track> {
        self.shared.state.lock().playlist.clone()
    }

    pub fn current_track(&self) -> Track {
        let inner = self.shared.state.lock();
        inner.playlist[inner.state.current_index].clone()
    }

    /// Gain the audio outputs currently apply.
    pub fn output_gain(&self) -> f32 {
        self.shared.volume.get()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        let (tx, rx) = mpsc::channel();
        self.shared.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: TransportEvent) {
        self.shared
            .subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn emit_all(&self, events: Vec<TransportEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Log a failure and surface it as a status message. Cancellations stay silent.
    fn report(&self, e: &TransportError) {
        if !e.is_reportable() {
            return;
        }
        log::warn!("cinder: {}", e);
        self.emit(TransportEvent::Status {
            message: e.to_string(),
        });
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(backend) = self.active.get_mut().take() {
            if let Err(e) = backend.release() {
                log::warn!("cinder: release on drop failed: {}", e);
            }
        }
    }
}

fn round1(v: f32) -> f32 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StreamEngine;
    use crate::clock::ManualClock;
    use crate::models::{default_tracks, MutePhase, Note, Waveform};
    use crate::testing::FakeBackends;
    use std::thread;
    use std::time::Duration;

    fn rig_with(fakes: FakeBackends, clock: Arc<ManualClock>, tracks: Vec<Track>)
        -> (Arc<FakeBackends>, Arc<ManualClock>, Transport)
    {
        let fakes = Arc::new(fakes);
        let transport = Transport::new(
            tracks,
            fakes.clone(),
            clock.clone(),
            TransportConfig::default(),
        )
        .unwrap();
        (fakes, clock, transport)
    }

    fn rig(tracks: Vec<Track>) -> (Arc<FakeBackends>, Arc<ManualClock>, Transport) {
        let clock = Arc::new(ManualClock::new());
        rig_with(FakeBackends::new(clock.clone()), clock, tracks)
    }

    fn synth(id: &str, duration: f64) -> Track {
        Track::synth(
            id,
            id,
            "Test",
            duration,
            vec![Note::new(440.0, 0.5), Note::new(220.0, 0.5)],
            Waveform::Sine,
        )
    }

    fn drain(rx: &Receiver<TransportEvent>) -> Vec<TransportEvent> {
        rx.try_iter().collect()
    }

    #[test]
    fn empty_playlist_is_rejected() {
        let clock = Arc::new(ManualClock::new());
        let fakes = Arc::new(FakeBackends::new(clock.clone()));
        let result = Transport::new(vec![], fakes, clock, TransportConfig::default());
        assert_eq!(result.err(), Some(TransportError::EmptyPlaylist));
    }

    #[test]
    fn play_is_idempotent_and_resume_reuses_backend() {
        let (fakes, _clock, transport) = rig(default_tracks());
        transport.play().unwrap();
        transport.play().unwrap();
        assert!(transport.state().is_playing);
        assert_eq!(fakes.created(), 1);

        transport.pause().unwrap();
        assert!(!transport.state().is_playing);
        assert_eq!(fakes.counter.live(), 0);

        transport.toggle().unwrap();
        assert!(transport.state().is_playing);
        assert_eq!(fakes.created(), 1);
    }

    #[test]
    fn next_and_prev_wrap_both_ways() {
        let (fakes, _clock, transport) = rig(default_tracks());
        let rx = transport.subscribe();

        transport.prev().unwrap();
        assert_eq!(transport.state().current_index, 2);
        assert!(transport.state().is_playing);

        transport.next().unwrap();
        assert_eq!(transport.state().current_index, 0);
        assert_eq!(transport.state().track_id, "synth-1");

        let changes: Vec<usize> = drain(&rx)
            .into_iter()
            .filter_map(|e| match e {
                TransportEvent::TrackChanged { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(changes, vec![2, 0]);
        assert_eq!(fakes.counter.live(), 1);
        assert_eq!(fakes.counter.max(), 1);
    }

    #[test]
    fn switch_resets_time() {
        let (fakes, _clock, transport) = rig(default_tracks());
        transport.play().unwrap();
        fakes.tick_synth(40);
        transport.sample();
        assert!(transport.state().current_time_secs > 0.9);

        transport.next().unwrap();
        let state = transport.state();
        assert_eq!(state.current_time_secs, 0.0);
        assert_eq!(state.duration_secs, 42.0);
    }

    #[test]
    fn seek_to_half_of_forty_seconds() {
        let (_fakes, _clock, transport) = rig(vec![synth("a", 40.0)]);
        transport.play().unwrap();
        transport.seek_to(50.0);
        let state = transport.state();
        assert!((state.current_time_secs - 20.0).abs() < 0.01);
        assert_eq!(state.progress_percent, 50.0);
    }

    #[test]
    fn seek_by_clamps_to_track() {
        let (_fakes, _clock, transport) = rig(vec![synth("a", 30.0)]);
        transport.seek_by(-5.0);
        assert_eq!(transport.state().current_time_secs, 0.0);
        transport.seek_by(45.0);
        assert_eq!(transport.state().current_time_secs, 30.0);
        assert_eq!(transport.state().progress_percent, 100.0);
    }

    #[test]
    fn paused_seek_carries_into_new_backend() {
        let (fakes, _clock, transport) = rig(vec![synth("a", 40.0)]);
        transport.seek_to(25.0);
        transport.play().unwrap();
        transport.sample();
        assert_eq!(transport.state().current_time_secs, 10.0);
        assert_eq!(fakes.created(), 1);
    }

    #[test]
    fn drag_lock_blocks_sampler_writes() {
        let (fakes, _clock, transport) = rig(vec![synth("a", 40.0)]);
        transport.play().unwrap();
        transport.begin_seek_drag();
        fakes.tick_synth(40);
        transport.sample();
        assert_eq!(transport.state().current_time_secs, 0.0);

        transport.end_seek_drag(25.0);
        let state = transport.state();
        assert!(!state.drag_locked);
        assert_eq!(state.current_time_secs, 10.0);
    }

    #[test]
    fn zero_volume_mutes_and_positive_volume_unmutes() {
        let (_fakes, _clock, transport) = rig(default_tracks());
        let rx = transport.subscribe();
        transport.set_volume(0.0);
        let state = transport.state();
        assert!(state.muted);
        assert_eq!(state.pre_mute_volume, 0.7);
        assert_eq!(state.mute_phase, MutePhase::Idle);

        transport.set_volume(0.4);
        assert!(!transport.state().muted);
        assert_eq!(transport.output_gain(), 0.4);
        assert_eq!(
            drain(&rx),
            vec![
                TransportEvent::MuteChanged { muted: true },
                TransportEvent::MuteChanged { muted: false },
            ]
        );
    }

    #[test]
    fn rapid_mute_toggles_restart_breaking() {
        let (_fakes, clock, transport) = rig(default_tracks());
        transport.toggle_mute();
        clock.advance(0.2);
        transport.toggle_mute();
        // Past the first deadline, before the restarted one.
        clock.advance(0.3);
        transport.sample();
        let state = transport.state();
        assert_eq!(state.mute_phase, MutePhase::Breaking);
        assert!(!state.muted);
        assert_eq!(state.volume, 0.7);

        clock.advance(0.15);
        transport.sample();
        let state = transport.state();
        assert!(state.muted);
        assert_eq!(state.volume, 0.0);
    }

    #[test]
    fn unmute_restores_captured_volume() {
        let (_fakes, clock, transport) = rig(default_tracks());
        transport.set_volume(0.35);
        transport.toggle_mute();
        clock.advance(0.4);
        transport.sample();
        assert_eq!(transport.state().volume, 0.0);

        transport.toggle_mute();
        assert_eq!(transport.state().mute_phase, MutePhase::Healing);
        // Writes during healing do not change what gets restored.
        transport.set_volume(0.9);
        clock.advance(0.6);
        transport.sample();
        let state = transport.state();
        assert!(!state.muted);
        assert_eq!(state.volume, 0.35);
        assert_eq!(state.mute_phase, MutePhase::Idle);
    }

    #[test]
    fn output_gain_fades_during_breaking() {
        let (_fakes, clock, transport) = rig(default_tracks());
        transport.set_volume(0.8);
        transport.toggle_mute();
        clock.advance(0.2);
        transport.sample();
        assert!((transport.output_gain() - 0.4).abs() < 1e-4);
        // The published volume only jumps at expiry.
        assert_eq!(transport.state().volume, 0.8);
    }

    #[test]
    fn adjust_volume_rounds_and_unmutes() {
        let (_fakes, _clock, transport) = rig(default_tracks());
        transport.adjust_volume(0.1);
        assert_eq!(transport.state().volume, 0.8);
        transport.adjust_volume(-0.25);
        assert_eq!(transport.state().volume, 0.6);

        transport.set_volume(0.0);
        transport.adjust_volume(0.1);
        assert_eq!(transport.state().mute_phase, MutePhase::Healing);
    }

    #[test]
    fn loop_track_restarts_same_track() {
        let (fakes, _clock, transport) = rig(vec![synth("a", 0.1), synth("b", 10.0)]);
        let rx = transport.subscribe();
        transport.set_loop_mode(LoopMode::LoopTrack);
        transport.play().unwrap();
        fakes.tick_synth(10);
        transport.sample();

        let state = transport.state();
        assert_eq!(state.current_index, 0);
        assert_eq!(state.current_time_secs, 0.0);
        assert!(state.is_playing);
        assert_eq!(fakes.created(), 1);
        assert!(drain(&rx).contains(&TransportEvent::TrackEnded {
            track_id: "a".into()
        }));
    }

    #[test]
    fn loop_queue_wraps_from_last_track() {
        let tracks = vec![
            synth("a", 10.0),
            Track::stream("b", "B", "Local Device", "/music/b.mp3"),
        ];
        let (fakes, _clock, transport) = rig(tracks);
        transport.select(1).unwrap();
        fakes.last_engine().unwrap().finish();
        transport.sample();

        let state = transport.state();
        assert_eq!(state.current_index, 0);
        assert!(state.is_playing);
    }

    #[test]
    fn failed_start_keeps_cursor_and_reports() {
        let tracks = vec![
            synth("a", 10.0),
            Track::stream("b", "B", "Local Device", "/missing.mp3"),
        ];
        let (fakes, _clock, transport) = rig(tracks);
        fakes.fail_locator("/missing.mp3");
        let rx = transport.subscribe();

        transport.play().unwrap();
        let err = transport.next().unwrap_err();
        assert!(matches!(err, TransportError::BackendStartFailed(_)));

        let state = transport.state();
        assert_eq!(state.current_index, 0);
        assert_eq!(state.track_id, "a");
        assert!(!state.is_playing);
        assert_eq!(fakes.counter.live(), 0);
        assert!(drain(&rx)
            .iter()
            .any(|e| matches!(e, TransportEvent::Status { .. })));
    }

    #[test]
    fn select_rejects_bad_index() {
        let (_fakes, _clock, transport) = rig(default_tracks());
        assert_eq!(transport.select(7), Err(TransportError::IndexOutOfRange(7)));
        assert_eq!(transport.state().current_index, 0);
    }

    #[test]
    fn unavailable_clock_disables_until_recovered() {
        let (fakes, _clock, transport) = rig(default_tracks());
        fakes.set_clock_down(true);
        assert!(matches!(
            transport.play(),
            Err(TransportError::ClockUnavailable(_))
        ));
        assert!(transport.state().disabled.is_some());

        // Fails fast: no second creation attempt.
        fakes.set_clock_down(false);
        assert!(matches!(
            transport.play(),
            Err(TransportError::ClockUnavailable(_))
        ));
        assert_eq!(fakes.created(), 0);

        transport.recover_audio();
        transport.play().unwrap();
        assert!(transport.state().is_playing);
    }

    #[test]
    fn switches_fail_fast_while_disabled() {
        let (fakes, _clock, transport) = rig(default_tracks());
        fakes.set_clock_down(true);
        assert!(transport.play().is_err());
        fakes.set_clock_down(false);

        for result in [transport.next(), transport.prev(), transport.select(2)] {
            assert!(matches!(result, Err(TransportError::ClockUnavailable(_))));
        }
        let state = transport.state();
        assert_eq!(state.current_index, 0);
        assert!(!state.is_playing);
        assert_eq!(fakes.created(), 0);

        transport.recover_audio();
        transport.next().unwrap();
        assert_eq!(transport.state().current_index, 1);
        assert_eq!(fakes.created(), 1);
    }

    #[test]
    fn late_duration_updates_progress_while_paused() {
        let (fakes, _clock, transport) =
            rig(vec![Track::stream("s", "S", "Local Device", "/music/s.flac")]);
        transport.play().unwrap();
        let engine = fakes.last_engine().unwrap();
        engine.set_position(50.0);
        transport.sample();
        assert_eq!(transport.state().current_time_secs, 50.0);
        assert_eq!(transport.state().progress_percent, 0.0);

        transport.pause().unwrap();
        engine.set_duration(200.0);
        transport.sample();
        let state = transport.state();
        assert_eq!(state.duration_secs, 200.0);
        assert_eq!(state.progress_percent, 25.0);

        // Drag lock freezes everything the sampler would write.
        transport.begin_seek_drag();
        engine.set_duration(400.0);
        transport.sample();
        assert_eq!(transport.state().duration_secs, 200.0);
        assert_eq!(transport.state().progress_percent, 25.0);
    }

    #[test]
    fn pause_during_slow_start_wins() {
        let clock = Arc::new(ManualClock::new());
        let fakes = FakeBackends::new(clock.clone()).with_stream_delay(Duration::from_millis(100));
        let tracks = vec![Track::stream("s", "S", "Local Device", "/music/s.ogg")];
        let (fakes, _clock, transport) = rig_with(fakes, clock, tracks);

        let player = {
            let transport = transport.clone();
            thread::spawn(move || transport.play())
        };
        thread::sleep(Duration::from_millis(30));
        transport.pause().unwrap();
        player.join().unwrap().unwrap();

        assert!(!transport.state().is_playing);
        assert!(!fakes.last_engine().unwrap().is_running());
        assert_eq!(fakes.counter.live(), 0);
    }

    #[test]
    fn stream_duration_comes_from_decoder() {
        let clock = Arc::new(ManualClock::new());
        let fakes = FakeBackends::new(clock.clone()).with_stream_duration(200.0);
        let tracks = vec![Track::stream("s", "S", "Local Device", "/music/s.flac")];
        let (fakes, _clock, transport) = rig_with(fakes, clock, tracks);

        transport.play().unwrap();
        fakes.last_engine().unwrap().set_position(50.0);
        transport.sample();
        let state = transport.state();
        assert_eq!(state.duration_secs, 200.0);
        assert_eq!(state.progress_percent, 25.0);

        transport.seek_to(50.0);
        assert_eq!(fakes.last_engine().unwrap().position(), 100.0);
    }

    #[test]
    fn dispatch_routes_json_intents() {
        let (_fakes, _clock, transport) = rig(default_tracks());
        let intent: Intent = serde_json::from_str(r#"{"action":"toggle_loop_mode"}"#).unwrap();
        transport.dispatch(intent).unwrap();
        assert_eq!(transport.state().loop_mode, LoopMode::LoopTrack);

        transport
            .dispatch(Intent::SetVolume { volume: 0.25 })
            .unwrap();
        assert_eq!(transport.state().volume, 0.25);
        transport.dispatch(Intent::Select { index: 1 }).unwrap();
        assert_eq!(transport.state().current_index, 1);
    }

    #[test]
    fn append_returns_new_indices() {
        let (_fakes, _clock, transport) = rig(default_tracks());
        let range = transport.append_tracks(vec![
            Track::stream("x", "X", "Local Device", "/x.mp3"),
            Track::stream("y", "Y", "Local Device", "/y.mp3"),
        ]);
        assert_eq!(range, 3..5);
        assert_eq!(transport.playlist().len(), 5);
        transport.select(4).unwrap();
        assert_eq!(transport.current_track().id, "y");
    }

    #[test]
    fn appended_entries_become_stream_tracks() {
        let (_fakes, _clock, transport) = rig(default_tracks());
        let range = transport.append_entries(vec![TrackEntry {
            title: "Imported".into(),
            artist: "Local Device".into(),
            locator: "/music/imported.flac".into(),
        }]);
        assert_eq!(range, 3..4);
        let track = &transport.playlist()[3];
        assert_eq!(track.kind(), crate::models::TrackKind::Stream);
        assert_eq!(track.title, "Imported");
    }

    #[test]
    fn shutdown_releases_backend_and_is_idempotent() {
        let (fakes, _clock, transport) = rig(default_tracks());
        transport.start();
        transport.start();
        transport.play().unwrap();
        transport.shutdown();
        transport.shutdown();
        assert!(!transport.state().is_playing);
        assert_eq!(fakes.counter.live(), 0);
    }
}
