//! The playback thread: pull, scale, encode, write, recover.

use std::sync::atomic::Ordering;
use std::sync::{Arc, PoisonError};

use super::error::PlayerError;
use super::events::PlayerEvent;
use super::player::{open_configured, OutputSpec, Shared};
use crate::hal::format_converter::{apply_gain, encode_into, encoded_len};
use crate::hal::pcm::{PcmError, PcmErrorKind, PcmHandle};
use crate::resilience::CancelToken;

/// Sample and byte buffers sized for one write quantum
pub(crate) struct Buffers {
    pub(crate) samples: Vec<f32>,
    pub(crate) bytes: Vec<u8>,
}

impl Buffers {
    pub(crate) fn new(quantum_frames: usize, spec: &OutputSpec) -> Self {
        let samples = quantum_frames * spec.channels as usize;
        Self {
            samples: vec![0.0; samples],
            bytes: vec![0; encoded_len(samples, spec.encoding)],
        }
    }

    pub(crate) fn fits(&self, quantum_frames: usize, spec: &OutputSpec) -> bool {
        let samples = quantum_frames * spec.channels as usize;
        self.samples.len() == samples && self.bytes.len() == encoded_len(samples, spec.encoding)
    }
}

/// Outcome of handling one failed write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recovery {
    /// Device usable again; retry the remaining frames
    Handled,
    Failed,
}

enum Reconnect {
    Restored,
    Cancelled,
    Exhausted { attempts: u32 },
}

/// Thread body; returns the buffers so the next run can reuse them
pub(crate) fn run(shared: Arc<Shared>, cancel: Arc<CancelToken>, mut buffers: Buffers) -> Buffers {
    shared.config.thread_priority.apply_to_current_thread();
    tracing::debug!("playback thread started");

    let config = &shared.config;
    let mut failures: u32 = 0;

    while !cancel.is_cancelled() {
        if shared.paused.load(Ordering::Acquire) {
            cancel.sleep(config.pause_poll());
            continue;
        }

        let (handle, spec) = {
            let inner = shared.lock();
            (inner.handle, inner.output)
        };
        let Some(spec) = spec else {
            cancel.sleep(config.idle_poll());
            continue;
        };
        let Some(handle) = handle else {
            match reconnect(&shared, &cancel, &spec) {
                Reconnect::Restored => {
                    failures = 0;
                    continue;
                }
                Reconnect::Cancelled => break,
                Reconnect::Exhausted { attempts } => {
                    give_up(&shared, &cancel, attempts);
                    break;
                }
            }
        };
        if !buffers.fits(config.quantum_frames, &spec) {
            buffers = Buffers::new(config.quantum_frames, &spec);
        }

        let read = {
            let mut source = shared.source.lock().unwrap_or_else(PoisonError::into_inner);
            source.as_mut().map(|s| s.read(&mut buffers.samples))
        };
        let channels = spec.channels as usize;
        let frames = match read {
            None => {
                cancel.sleep(config.idle_poll());
                continue;
            }
            Some(read) => read.min(buffers.samples.len()) / channels,
        };
        if frames == 0 {
            cancel.sleep(config.starved_poll());
            continue;
        }

        let samples = &mut buffers.samples[..frames * channels];
        apply_gain(
            samples,
            shared.volume.load(Ordering::Relaxed),
            shared.muted.load(Ordering::Relaxed),
        );
        let len = encode_into(samples, spec.encoding, &mut buffers.bytes);

        let frame_bytes = spec.frame_bytes();
        let mut written = 0;
        while written < frames && !cancel.is_cancelled() {
            let chunk = &buffers.bytes[written * frame_bytes..len];
            match shared.binding.write_interleaved(handle, chunk, frames - written) {
                Ok(accepted) => {
                    failures = 0;
                    written += accepted;
                    if accepted == 0 {
                        cancel.sleep(config.starved_poll());
                    }
                }
                Err(_) if cancel.is_cancelled() => break,
                Err(error) => match recover(&shared, &cancel, handle, error) {
                    Recovery::Handled => {}
                    Recovery::Failed => {
                        failures += 1;
                        tracing::warn!(failures, code = error.code(), "write failed");
                        if failures >= config.failure_threshold {
                            tracing::warn!(failures, "too many write failures, reopening device");
                            failures = 0;
                            invalidate(&shared, handle);
                        }
                        break;
                    }
                },
            }
        }
    }

    tracing::debug!("playback thread exiting");
    buffers
}

/// Per-write recovery for transient device conditions
fn recover(shared: &Shared, cancel: &CancelToken, handle: PcmHandle, error: PcmError) -> Recovery {
    let binding = shared.binding.as_ref();
    match error.kind() {
        PcmErrorKind::WouldBlock => {
            cancel.sleep(shared.config.starved_poll());
            Recovery::Handled
        }
        PcmErrorKind::Underrun => {
            tracing::debug!("underrun");
            match binding.recover(handle, error, true) {
                Ok(()) => Recovery::Handled,
                Err(e) => {
                    tracing::warn!(code = e.code(), error = %e, "underrun recovery failed");
                    Recovery::Failed
                }
            }
        }
        PcmErrorKind::Suspended => {
            tracing::info!("device suspended, resuming");
            let resumed = loop {
                match binding.resume(handle) {
                    Err(e) if e.kind() == PcmErrorKind::WouldBlock => {
                        if cancel.sleep(shared.config.starved_poll()) {
                            return Recovery::Handled;
                        }
                    }
                    other => break other,
                }
            };
            if resumed.is_ok() {
                return Recovery::Handled;
            }
            match binding.recover(handle, error, true) {
                Ok(()) => Recovery::Handled,
                Err(e) => {
                    tracing::warn!(code = e.code(), error = %e, "resume failed");
                    Recovery::Failed
                }
            }
        }
        PcmErrorKind::DeviceGone | PcmErrorKind::Other => {
            let outcome = binding.recover(handle, error, true);
            tracing::warn!(
                code = error.code(),
                error = %binding.error_message(error.code()),
                recovered = outcome.is_ok(),
                "write error"
            );
            if outcome.is_ok() {
                Recovery::Handled
            } else {
                Recovery::Failed
            }
        }
    }
}

/// Close a dead handle so the loop reconnects on its next pass
fn invalidate(shared: &Shared, handle: PcmHandle) {
    let mut inner = shared.lock();
    if inner.handle == Some(handle) {
        inner.handle = None;
        if let Err(e) = shared.binding.close(handle) {
            tracing::debug!(device = %inner.device_id, error = %e, "close of lost device failed");
        }
    }
}

fn reconnect(shared: &Shared, cancel: &CancelToken, spec: &OutputSpec) -> Reconnect {
    let device_id = shared.lock().device_id.clone();
    let policy = shared.config.reconnect;

    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() || shared.disposed.load(Ordering::Acquire) {
            return Reconnect::Cancelled;
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::warn!(device = %device_id, attempt, delay_ms = delay.as_millis() as u64, "device lost, reconnecting");
        shared.events.emit(PlayerEvent::Reconnecting { attempt, delay });
        if cancel.sleep(delay) {
            return Reconnect::Cancelled;
        }

        let handle = match open_configured(shared.binding.as_ref(), &device_id, spec, &shared.config) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::debug!(device = %device_id, attempt, error = %e, "reconnect attempt failed");
                continue;
            }
        };
        if let Err(e) = shared.binding.prepare(handle) {
            tracing::debug!(device = %device_id, attempt, error = %e, "prepare after reopen failed");
            if let Err(e) = shared.binding.close(handle) {
                tracing::debug!(device = %device_id, error = %e, "close after failed prepare");
            }
            continue;
        }

        let mut inner = shared.lock();
        if cancel.is_cancelled() || inner.device_id != device_id {
            drop(inner);
            if let Err(e) = shared.binding.close(handle) {
                tracing::debug!(device = %device_id, error = %e, "close of abandoned reconnect failed");
            }
            return Reconnect::Cancelled;
        }
        inner.handle = Some(handle);
        tracing::info!(device = %device_id, attempt, "device reconnected");
        return Reconnect::Restored;
    }

    Reconnect::Exhausted {
        attempts: policy.max_attempts,
    }
}

fn give_up(shared: &Shared, cancel: &CancelToken, attempts: u32) {
    let mut inner = shared.lock();
    if cancel.is_cancelled() {
        return;
    }
    let error = PlayerError::ReconnectExhausted {
        device: inner.device_id.clone(),
        attempts,
    };
    shared.fail(&mut inner, &error);
}
