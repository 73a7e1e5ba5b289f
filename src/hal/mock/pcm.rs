//! In-memory `PcmBinding` with scriptable failure sequences.

use std::collections::{HashMap, HashSet, VecDeque};
use std::num::NonZeroU64;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::hal::pcm::{
    BufferParams, Direction, HwParams, OpenMode, PcmError, PcmHandle, EBADFD, EINVAL,
};
use crate::hal::traits::PcmBinding;

const ENOENT: i32 = 2;

/// One recorded call against the binding
#[derive(Debug, Clone, PartialEq)]
pub enum PcmCall {
    Open(String),
    SetParams(HwParams),
    BufferParams,
    Write { frames: usize },
    Prepare,
    Drain,
    Drop,
    Resume,
    Recover(i32),
    Close,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    open: HashMap<u64, String>,
    dropped: HashSet<u64>,
    params: HashMap<u64, HwParams>,

    unknown_devices: HashSet<String>,
    lost: bool,
    blocking: bool,
    write_failures: VecDeque<PcmError>,
    recover_failures: VecDeque<PcmError>,
    resume_results: VecDeque<PcmError>,
    set_params_failure: Option<PcmError>,
    buffer_params_failure: Option<PcmError>,
    buffer_frames: Option<u64>,
    granted_rate: Option<u32>,
    max_frames_per_write: Option<usize>,

    calls: Vec<PcmCall>,
    opened: Vec<String>,
    closes: usize,
    writes: usize,
    frames_written: usize,
    write_threads: Vec<ThreadId>,
    last_write: Vec<u8>,
}

/// Fake device driver for tests and the demo binary's dry-run mode.
///
/// Writes succeed by default and take a short, configurable amount of time so a playback
/// thread paces itself instead of spinning.
pub struct MockPcm {
    state: Mutex<MockState>,
    released: Condvar,
    write_delay: Duration,
}

impl MockPcm {
    pub fn new() -> Self {
        Self::with_write_delay(Duration::from_micros(200))
    }

    pub fn with_write_delay(write_delay: Duration) -> Self {
        Self {
            state: Mutex::new(MockState {
                next_id: 1,
                ..Default::default()
            }),
            released: Condvar::new(),
            write_delay,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opening this id fails as if it did not exist
    pub fn add_unknown_device(&self, name: &str) {
        self.lock().unknown_devices.insert(name.to_string());
    }

    /// Device disappears: writes, recovery and reopen all fail until restored
    pub fn lose_device(&self) {
        self.lock().lost = true;
    }

    pub fn restore_device(&self) {
        self.lock().lost = false;
    }

    /// The next `count` writes fail with `error`
    pub fn fail_next_writes(&self, count: usize, error: PcmError) {
        let mut state = self.lock();
        state.write_failures.extend(std::iter::repeat(error).take(count));
    }

    /// The next `count` recover calls fail with `error`
    pub fn fail_next_recovers(&self, count: usize, error: PcmError) {
        let mut state = self.lock();
        state.recover_failures.extend(std::iter::repeat(error).take(count));
    }

    /// Suspend on the next write; resume answers "try again" `busy_resumes` times
    pub fn suspend_next_write(&self, busy_resumes: usize) {
        let mut state = self.lock();
        state.write_failures.push_back(PcmError::suspended());
        state
            .resume_results
            .extend(std::iter::repeat(PcmError::would_block()).take(busy_resumes));
    }

    /// Resume fails outright after `busy_resumes` "try again" answers
    pub fn fail_resume(&self, busy_resumes: usize, error: PcmError) {
        let mut state = self.lock();
        state
            .resume_results
            .extend(std::iter::repeat(PcmError::would_block()).take(busy_resumes));
        state.resume_results.push_back(error);
    }

    pub fn fail_set_params(&self, error: Option<PcmError>) {
        self.lock().set_params_failure = error;
    }

    pub fn fail_buffer_params(&self, error: Option<PcmError>) {
        self.lock().buffer_params_failure = error;
    }

    /// Buffer size reported after negotiation; defaults to the latency request
    pub fn set_buffer_frames(&self, frames: u64) {
        self.lock().buffer_frames = Some(frames);
    }

    /// Report a negotiated rate other than the requested one
    pub fn grant_rate(&self, rate_hz: Option<u32>) {
        self.lock().granted_rate = rate_hz;
    }

    /// Accept at most this many frames per write
    pub fn limit_frames_per_write(&self, frames: Option<usize>) {
        self.lock().max_frames_per_write = frames;
    }

    /// Writes block until the handle is dropped or closed
    pub fn block_writes(&self, blocking: bool) {
        self.lock().blocking = blocking;
        self.released.notify_all();
    }

    pub fn calls(&self) -> Vec<PcmCall> {
        self.lock().calls.clone()
    }

    /// Device names passed to successful opens, in order
    pub fn opened(&self) -> Vec<String> {
        self.lock().opened.clone()
    }

    pub fn open_count(&self) -> usize {
        self.lock().opened.len()
    }

    pub fn close_count(&self) -> usize {
        self.lock().closes
    }

    pub fn open_handles(&self) -> usize {
        self.lock().open.len()
    }

    /// Successful writes
    pub fn write_count(&self) -> usize {
        self.lock().writes
    }

    /// Write attempts, failed ones included
    pub fn write_attempts(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, PcmCall::Write { .. }))
            .count()
    }

    pub fn frames_written(&self) -> usize {
        self.lock().frames_written
    }

    /// Distinct threads that issued writes, in first-seen order
    pub fn write_threads(&self) -> Vec<ThreadId> {
        self.lock().write_threads.clone()
    }

    /// Bytes accepted by the most recent successful write
    pub fn last_write(&self) -> Vec<u8> {
        self.lock().last_write.clone()
    }

    /// Parameters applied to the most recently configured handle
    pub fn last_params(&self) -> Option<HwParams> {
        self.lock().calls.iter().rev().find_map(|c| match c {
            PcmCall::SetParams(p) => Some(*p),
            _ => None,
        })
    }

    fn check_open(state: &MockState, handle: PcmHandle) -> Result<(), PcmError> {
        if state.open.contains_key(&handle.raw()) {
            Ok(())
        } else {
            Err(PcmError::from_code(EBADFD))
        }
    }
}

impl Default for MockPcm {
    fn default() -> Self {
        Self::new()
    }
}

impl PcmBinding for MockPcm {
    fn open(&self, name: &str, direction: Direction, _mode: OpenMode) -> Result<PcmHandle, PcmError> {
        let mut state = self.lock();
        state.calls.push(PcmCall::Open(name.to_string()));
        if direction != Direction::Playback {
            return Err(PcmError::from_code(EINVAL));
        }
        if state.unknown_devices.contains(name) {
            return Err(PcmError::from_code(ENOENT));
        }
        if state.lost {
            return Err(PcmError::device_gone());
        }

        let id = state.next_id;
        state.next_id += 1;
        state.open.insert(id, name.to_string());
        state.opened.push(name.to_string());
        let raw = NonZeroU64::new(id).ok_or_else(|| PcmError::from_code(EINVAL))?;
        Ok(PcmHandle::from_raw(raw))
    }

    fn set_params(&self, handle: PcmHandle, params: &HwParams) -> Result<(), PcmError> {
        let mut state = self.lock();
        state.calls.push(PcmCall::SetParams(*params));
        Self::check_open(&state, handle)?;
        if let Some(error) = state.set_params_failure {
            return Err(error);
        }
        state.params.insert(handle.raw(), *params);
        Ok(())
    }

    fn buffer_params(&self, handle: PcmHandle) -> Result<BufferParams, PcmError> {
        let mut state = self.lock();
        state.calls.push(PcmCall::BufferParams);
        Self::check_open(&state, handle)?;
        if let Some(error) = state.buffer_params_failure {
            return Err(error);
        }
        let (rate_hz, latency_us) = state
            .params
            .get(&handle.raw())
            .map(|p| (p.rate_hz, p.latency_us))
            .unwrap_or((0, 0));
        let rate_hz = state.granted_rate.unwrap_or(rate_hz);
        let requested = rate_hz as u64 * latency_us as u64 / 1_000_000;
        let buffer_frames = state.buffer_frames.unwrap_or(requested);
        Ok(BufferParams {
            buffer_frames,
            period_frames: buffer_frames / 4,
            rate_hz,
        })
    }

    fn write_interleaved(&self, handle: PcmHandle, buffer: &[u8], frames: usize) -> Result<usize, PcmError> {
        {
            let mut state = self.lock();
            state.calls.push(PcmCall::Write { frames });
            let current = thread::current().id();
            if !state.write_threads.contains(&current) {
                state.write_threads.push(current);
            }
            Self::check_open(&state, handle)?;
            if let Some(error) = state.write_failures.pop_front() {
                return Err(error);
            }
            if state.lost {
                return Err(PcmError::device_gone());
            }

            while state.blocking
                && state.open.contains_key(&handle.raw())
                && !state.dropped.contains(&handle.raw())
            {
                state = self.released.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            if state.dropped.contains(&handle.raw()) || !state.open.contains_key(&handle.raw()) {
                return Err(PcmError::from_code(EBADFD));
            }
        }

        if !self.write_delay.is_zero() {
            thread::sleep(self.write_delay);
        }

        let mut state = self.lock();
        let accepted = state.max_frames_per_write.map_or(frames, |max| frames.min(max));
        let bytes = if frames == 0 { 0 } else { buffer.len() / frames * accepted };
        state.writes += 1;
        state.frames_written += accepted;
        state.last_write = buffer[..bytes.min(buffer.len())].to_vec();
        Ok(accepted)
    }

    fn prepare(&self, handle: PcmHandle) -> Result<(), PcmError> {
        let mut state = self.lock();
        state.calls.push(PcmCall::Prepare);
        Self::check_open(&state, handle)?;
        if state.lost {
            return Err(PcmError::device_gone());
        }
        state.dropped.remove(&handle.raw());
        Ok(())
    }

    fn drain(&self, handle: PcmHandle) -> Result<(), PcmError> {
        let mut state = self.lock();
        state.calls.push(PcmCall::Drain);
        Self::check_open(&state, handle)
    }

    fn drop_frames(&self, handle: PcmHandle) -> Result<(), PcmError> {
        let mut state = self.lock();
        state.calls.push(PcmCall::Drop);
        Self::check_open(&state, handle)?;
        state.dropped.insert(handle.raw());
        drop(state);
        self.released.notify_all();
        Ok(())
    }

    fn resume(&self, handle: PcmHandle) -> Result<(), PcmError> {
        let mut state = self.lock();
        state.calls.push(PcmCall::Resume);
        Self::check_open(&state, handle)?;
        match state.resume_results.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn recover(&self, handle: PcmHandle, error: PcmError, _silent: bool) -> Result<(), PcmError> {
        let mut state = self.lock();
        state.calls.push(PcmCall::Recover(error.code()));
        Self::check_open(&state, handle)?;
        if let Some(failure) = state.recover_failures.pop_front() {
            return Err(failure);
        }
        if state.lost {
            return Err(PcmError::device_gone());
        }
        state.dropped.remove(&handle.raw());
        Ok(())
    }

    fn close(&self, handle: PcmHandle) -> Result<(), PcmError> {
        let mut state = self.lock();
        state.calls.push(PcmCall::Close);
        if state.open.remove(&handle.raw()).is_none() {
            return Err(PcmError::from_code(EBADFD));
        }
        state.params.remove(&handle.raw());
        state.dropped.remove(&handle.raw());
        state.closes += 1;
        drop(state);
        self.released.notify_all();
        Ok(())
    }
}
