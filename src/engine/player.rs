//! Software-path output player.
//!
//! A `Player` owns at most one native handle and at most one playback thread. Control calls
//! may come from any thread; they serialize on `Shared::inner`, which guards the handle,
//! the negotiated format and state transitions. The playback thread copies the handle out
//! under that lock and performs the blocking write without it.

use atomic_float::AtomicF32;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use super::config::PlayerConfig;
use super::error::PlayerError;
use super::events::{EventBus, PlayerEvent};
use super::playback::{self, Buffers};
use super::state::PlayerState;
use crate::hal::pcm::{AccessMode, Direction, HwParams, OpenMode, PcmHandle};
use crate::hal::traits::{PcmBinding, SampleSource};
use crate::hal::types::{AudioFormat, AudioOutputFormat, SampleFormat};
use crate::resilience::CancelToken;

/// What the device was actually configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub encoding: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputSpec {
    pub fn frame_bytes(&self) -> usize {
        self.encoding.bytes_per_sample() * self.channels as usize
    }
}

pub(crate) struct PlaybackThread {
    join: JoinHandle<Buffers>,
    done: Receiver<()>,
    cancel: Arc<CancelToken>,
    id: ThreadId,
}

pub(crate) struct Inner {
    pub(crate) state: PlayerState,
    pub(crate) device_id: String,
    pub(crate) handle: Option<PcmHandle>,
    pub(crate) format: Option<AudioFormat>,
    pub(crate) requested_output: Option<AudioOutputFormat>,
    pub(crate) output: Option<OutputSpec>,
    pub(crate) latency: Duration,
    pub(crate) buffers: Option<Buffers>,
    thread: Option<PlaybackThread>,
}

impl Inner {
    /// Move to `target`, announcing real changes; invalid moves are refused
    pub(crate) fn transition(&mut self, target: PlayerState, events: &EventBus) -> bool {
        if self.state == target {
            return true;
        }
        if !self.state.can_transition_to(&target) {
            tracing::warn!(from = self.state.name(), to = target.name(), "refused state transition");
            return false;
        }
        tracing::debug!(device = %self.device_id, from = self.state.name(), to = target.name(), "player state");
        self.state = target;
        events.emit(PlayerEvent::StateChanged(target));
        true
    }

    fn close_handle(&mut self, binding: &dyn PcmBinding) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = binding.close(handle) {
                tracing::debug!(device = %self.device_id, error = %e, "close failed");
            }
        }
    }
}

pub(crate) struct Shared {
    pub(crate) binding: Arc<dyn PcmBinding>,
    pub(crate) config: PlayerConfig,
    pub(crate) events: EventBus,
    pub(crate) source: Mutex<Option<Box<dyn SampleSource>>>,
    pub(crate) volume: AtomicF32,
    pub(crate) muted: AtomicBool,
    pub(crate) paused: AtomicBool,
    pub(crate) disposed: AtomicBool,
    inner: Mutex<Inner>,
}

impl Shared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report a failure: state goes to Error and subscribers get the message
    pub(crate) fn fail(&self, inner: &mut Inner, error: &PlayerError) {
        tracing::error!(device = %inner.device_id, error = %error, "player failed");
        inner.transition(PlayerState::Error, &self.events);
        self.events.emit(PlayerEvent::ErrorOccurred {
            message: error.to_string(),
            cause: std::error::Error::source(error).map(|s| s.to_string()),
        });
    }
}

/// Open `device_id` and negotiate `spec`; the handle is closed again if negotiation fails
pub(crate) fn open_configured(
    binding: &dyn PcmBinding,
    device_id: &str,
    spec: &OutputSpec,
    config: &PlayerConfig,
) -> Result<PcmHandle, PlayerError> {
    let handle = binding
        .open(device_id, Direction::Playback, OpenMode::Blocking)
        .map_err(|e| PlayerError::pcm("open", device_id, e))?;

    let params = HwParams {
        format: spec.encoding,
        access: AccessMode::RwInterleaved,
        channels: spec.channels,
        rate_hz: spec.sample_rate,
        allow_resample: config.allow_resample,
        latency_us: config.latency_target_ms.saturating_mul(1000),
    };
    if let Err(e) = binding.set_params(handle, &params) {
        if let Err(close) = binding.close(handle) {
            tracing::debug!(device = device_id, error = %close, "close after failed negotiation");
        }
        return Err(PlayerError::pcm("configure", device_id, e));
    }
    Ok(handle)
}

/// Plays samples pulled from a [`SampleSource`] on one output device
pub struct Player {
    shared: Arc<Shared>,
}

impl Player {
    pub fn new(binding: Arc<dyn PcmBinding>, device_id: impl Into<String>, config: PlayerConfig) -> Self {
        let shared = Shared {
            binding,
            config,
            events: EventBus::new(),
            source: Mutex::new(None),
            volume: AtomicF32::new(1.0),
            muted: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                state: PlayerState::Uninitialized,
                device_id: device_id.into(),
                handle: None,
                format: None,
                requested_output: None,
                output: None,
                latency: Duration::ZERO,
                buffers: None,
                thread: None,
            }),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn subscribe(&self) -> Receiver<PlayerEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> PlayerState {
        self.shared.lock().state
    }

    pub fn device_id(&self) -> String {
        self.shared.lock().device_id.clone()
    }

    /// Format of the attached source, once initialized
    pub fn format(&self) -> Option<AudioFormat> {
        self.shared.lock().format
    }

    /// Encoding, rate and channels negotiated with the device
    pub fn output_spec(&self) -> Option<OutputSpec> {
        self.shared.lock().output
    }

    /// Buffer latency plus startup fill, as measured at the last initialize
    pub fn output_latency(&self) -> Duration {
        self.shared.lock().latency
    }

    /// Identity of the running playback thread, if any
    pub fn playback_thread_id(&self) -> Option<ThreadId> {
        self.shared.lock().thread.as_ref().map(|t| t.id)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    pub fn attach_source(&self, source: Box<dyn SampleSource>) {
        *self.shared.source.lock().unwrap_or_else(PoisonError::into_inner) = Some(source);
    }

    pub fn detach_source(&self) -> Option<Box<dyn SampleSource>> {
        self.shared.source.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume.load(Ordering::Relaxed)
    }

    /// Software gain in [0, 1]; out-of-range values are clamped
    pub fn set_volume(&self, volume: f32) {
        if volume.is_nan() {
            tracing::warn!("ignoring NaN volume");
            return;
        }
        self.shared.volume.store(volume.clamp(0.0, 1.0), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    fn ensure_live(&self) -> Result<(), PlayerError> {
        if self.is_disposed() {
            return Err(PlayerError::Disposed);
        }
        Ok(())
    }

    /// Open and configure the device for `format`, leaving the player Stopped.
    ///
    /// An `output` override replaces the rate and bit depth written to the device; the
    /// channel count always follows `format`.
    pub fn initialize(&self, format: AudioFormat, output: Option<AudioOutputFormat>) -> Result<(), PlayerError> {
        self.ensure_live()?;
        self.stop()?;

        let mut inner = self.shared.lock();
        match self.configure(&mut inner, format, output) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shared.fail(&mut inner, &e);
                Err(e)
            }
        }
    }

    fn configure(
        &self,
        inner: &mut Inner,
        format: AudioFormat,
        output: Option<AudioOutputFormat>,
    ) -> Result<(), PlayerError> {
        let binding = self.shared.binding.as_ref();
        let config = &self.shared.config;

        inner.close_handle(binding);
        inner.output = None;
        inner.buffers = None;

        if format.sample_rate == 0 || format.channels == 0 {
            return Err(PlayerError::InvalidConfig(format!(
                "unsupported format: {} Hz, {} channels",
                format.sample_rate, format.channels
            )));
        }

        let encoding = match output {
            Some(o) => SampleFormat::from_bit_depth(o.bit_depth).ok_or_else(|| {
                PlayerError::InvalidConfig(format!("unsupported output bit depth {}", o.bit_depth))
            })?,
            None => config.output_format,
        };
        let sample_rate = output
            .map(|o| o.sample_rate)
            .filter(|rate| *rate > 0)
            .unwrap_or(format.sample_rate);
        if let Some(o) = output {
            if o.channels != 0 && o.channels != format.channels {
                tracing::warn!(
                    requested = o.channels,
                    channels = format.channels,
                    "output channel override ignored"
                );
            }
        }

        let spec = OutputSpec {
            encoding,
            sample_rate,
            channels: format.channels,
        };
        let handle = open_configured(binding, &inner.device_id, &spec, config)?;
        inner.handle = Some(handle);

        let buffer_latency = match binding.buffer_params(handle) {
            Ok(params) => {
                // Nearest-rate negotiation may grant something else
                let granted = if params.rate_hz > 0 { params.rate_hz } else { sample_rate };
                if granted != sample_rate {
                    tracing::warn!(device = %inner.device_id, requested = sample_rate, granted, "device runs at a different rate");
                }
                Duration::from_micros(params.buffer_frames.saturating_mul(1_000_000) / granted as u64)
            }
            Err(e) => {
                tracing::warn!(device = %inner.device_id, error = %e, "buffer size unavailable, assuming target latency");
                config.latency_target()
            }
        };

        inner.format = Some(format);
        inner.requested_output = output;
        inner.output = Some(spec);
        inner.latency = buffer_latency + config.startup_fill();
        inner.buffers = Some(Buffers::new(config.quantum_frames, &spec));

        tracing::info!(
            device = %inner.device_id,
            rate = sample_rate,
            channels = format.channels,
            encoding = ?encoding,
            latency_ms = inner.latency.as_millis() as u64,
            "output initialized"
        );
        inner.transition(PlayerState::Stopped, &self.shared.events);
        Ok(())
    }

    /// Start or resume playback
    pub fn play(&self) -> Result<(), PlayerError> {
        self.ensure_live()?;
        let mut inner = self.shared.lock();

        match inner.state {
            PlayerState::Playing => return Ok(()),
            PlayerState::Paused => {
                self.shared.paused.store(false, Ordering::Release);
                inner.transition(PlayerState::Playing, &self.shared.events);
                return Ok(());
            }
            PlayerState::Uninitialized => return Err(PlayerError::NotInitialized),
            PlayerState::Error => {
                return Err(PlayerError::InvalidState {
                    action: "play",
                    state: PlayerState::Error,
                })
            }
            PlayerState::Stopped => {}
        }

        let Some(spec) = inner.output else {
            return Err(PlayerError::NotInitialized);
        };
        let handle = match inner.handle {
            Some(handle) => handle,
            None => {
                // A stop interrupted reconnection after the lost handle was closed
                tracing::info!(device = %inner.device_id, "reopening device");
                match open_configured(self.shared.binding.as_ref(), &inner.device_id, &spec, &self.shared.config) {
                    Ok(handle) => {
                        inner.handle = Some(handle);
                        handle
                    }
                    Err(error) => {
                        self.shared.fail(&mut inner, &error);
                        return Err(error);
                    }
                }
            }
        };

        if let Err(e) = self.shared.binding.prepare(handle) {
            let error = PlayerError::pcm("prepare", &inner.device_id, e);
            self.shared.fail(&mut inner, &error);
            return Err(error);
        }

        let buffers = inner
            .buffers
            .take()
            .filter(|b| b.fits(self.shared.config.quantum_frames, &spec))
            .unwrap_or_else(|| Buffers::new(self.shared.config.quantum_frames, &spec));
        let cancel = Arc::new(CancelToken::new());
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);

        let shared = self.shared.clone();
        let token = cancel.clone();
        let spawned = thread::Builder::new()
            .name("roomsink-playback".to_string())
            .spawn(move || {
                // Dropped on exit, unwinding included
                let _done = done_tx;
                playback::run(shared, token, buffers)
            });
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                let error = PlayerError::ThreadSpawn(e);
                self.shared.fail(&mut inner, &error);
                return Err(error);
            }
        };

        inner.thread = Some(PlaybackThread {
            id: join.thread().id(),
            join,
            done: done_rx,
            cancel,
        });
        self.shared.paused.store(false, Ordering::Release);
        inner.transition(PlayerState::Playing, &self.shared.events);
        Ok(())
    }

    /// Keep the thread and device, stop pulling samples
    pub fn pause(&self) -> Result<(), PlayerError> {
        self.ensure_live()?;
        let mut inner = self.shared.lock();
        match inner.state {
            PlayerState::Paused => Ok(()),
            PlayerState::Playing => {
                self.shared.paused.store(true, Ordering::Release);
                inner.transition(PlayerState::Paused, &self.shared.events);
                Ok(())
            }
            state => Err(PlayerError::InvalidState { action: "pause", state }),
        }
    }

    /// Stop playback and join the playback thread. Safe to call in any state.
    pub fn stop(&self) -> Result<(), PlayerError> {
        let thread = {
            let mut inner = self.shared.lock();
            let thread = inner.thread.take();
            if let Some(thread) = &thread {
                thread.cancel.cancel();
                // Unblocks a write stuck waiting for buffer space
                if let Some(handle) = inner.handle {
                    if let Err(e) = self.shared.binding.drop_frames(handle) {
                        tracing::debug!(device = %inner.device_id, error = %e, "drop failed");
                    }
                }
            }
            thread
        };

        if let Some(thread) = thread {
            let buffers = self.join(thread);
            let mut inner = self.shared.lock();
            if inner.buffers.is_none() {
                inner.buffers = buffers;
            }
        }

        self.shared.paused.store(false, Ordering::Release);
        let mut inner = self.shared.lock();
        if inner.state.is_active() {
            inner.transition(PlayerState::Stopped, &self.shared.events);
        }
        Ok(())
    }

    fn join(&self, thread: PlaybackThread) -> Option<Buffers> {
        let timeout = self.shared.config.stop_join_timeout();
        match thread.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => match thread.join.join() {
                Ok(buffers) => Some(buffers),
                Err(_) => {
                    tracing::error!("playback thread panicked");
                    None
                }
            },
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "playback thread did not exit in time, detaching"
                );
                None
            }
        }
    }

    /// Move playback to another device, keeping source, format, volume and play state.
    ///
    /// On failure the previous device is reopened and its play state restored before the
    /// error is returned.
    pub fn switch_device(&self, device_id: &str) -> Result<(), PlayerError> {
        self.ensure_live()?;
        let (previous, was_playing, was_paused, format, output) = {
            let inner = self.shared.lock();
            (
                inner.device_id.clone(),
                inner.state == PlayerState::Playing,
                inner.state == PlayerState::Paused,
                inner.format,
                inner.requested_output,
            )
        };
        tracing::info!(from = %previous, to = device_id, "switching output device");

        self.stop()?;
        {
            let mut inner = self.shared.lock();
            inner.close_handle(self.shared.binding.as_ref());
            inner.device_id = device_id.to_string();
        }

        let Some(format) = format else {
            return Ok(());
        };

        match self.initialize(format, output) {
            Ok(()) => {
                self.restore_play_state(was_playing, was_paused)?;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(from = %previous, to = device_id, error = %e, "switch failed, restoring previous device");
                self.shared.lock().device_id = previous.clone();
                match self.initialize(format, output) {
                    Ok(()) => {
                        if let Err(restore) = self.restore_play_state(was_playing, was_paused) {
                            tracing::error!(device = %previous, error = %restore, "could not resume previous device");
                        }
                    }
                    Err(restore) => {
                        tracing::error!(device = %previous, error = %restore, "could not reopen previous device");
                    }
                }
                Err(e)
            }
        }
    }

    fn restore_play_state(&self, was_playing: bool, was_paused: bool) -> Result<(), PlayerError> {
        if was_playing || was_paused {
            self.play()?;
        }
        if was_paused {
            self.pause()?;
        }
        Ok(())
    }

    /// Stop, release the device and refuse further use
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.stop() {
            tracing::debug!(error = %e, "stop during dispose failed");
        }
        let mut inner = self.shared.lock();
        inner.close_handle(self.shared.binding.as_ref());
        inner.buffers = None;
        drop(inner);
        self.shared.source.lock().unwrap_or_else(PoisonError::into_inner).take();
        tracing::debug!("player disposed");
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.dispose();
    }
}
