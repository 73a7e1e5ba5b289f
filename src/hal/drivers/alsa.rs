use alsa::pcm::{Access, Format, PCM};
use alsa::ValueOr;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::hal::pcm::{
    AccessMode, BufferParams, Direction, HwParams, OpenMode, PcmError, PcmHandle, EBADFD, EINVAL,
};
use crate::hal::traits::PcmBinding;
use crate::hal::types::SampleFormat;

struct SharedPcm(PCM);

// SAFETY: libasound serializes calls on one PCM with its internal per-handle lock
// (thread-safe builds are the default since alsa-lib 1.1.2), and releases it while a
// blocking write waits for space, so `drop_frames` may run concurrently with `writei`.
unsafe impl Sync for SharedPcm {}

/// Production binding over libasound
pub struct AlsaBinding {
    handles: Mutex<HashMap<u64, Arc<SharedPcm>>>,
    next_id: AtomicU64,
}

impl AlsaBinding {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn pcm(&self, handle: PcmHandle) -> Result<Arc<SharedPcm>, PcmError> {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.raw())
            .cloned()
            .ok_or_else(|| PcmError::from_code(EBADFD))
    }
}

impl Default for AlsaBinding {
    fn default() -> Self {
        Self::new()
    }
}

fn translate(e: alsa::Error) -> PcmError {
    PcmError::from_code(e.errno())
}

fn alsa_format(format: SampleFormat) -> Format {
    match format {
        SampleFormat::S16LE => Format::S16LE,
        SampleFormat::S24LE => Format::S243LE,
        SampleFormat::S32LE => Format::S32LE,
        SampleFormat::F32LE => Format::FloatLE,
        SampleFormat::F64LE => Format::Float64LE,
    }
}

impl PcmBinding for AlsaBinding {
    fn open(&self, name: &str, direction: Direction, mode: OpenMode) -> Result<PcmHandle, PcmError> {
        let dir = match direction {
            Direction::Playback => alsa::Direction::Playback,
            Direction::Capture => alsa::Direction::Capture,
        };
        let pcm = PCM::new(name, dir, mode == OpenMode::NonBlocking).map_err(translate)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let raw = NonZeroU64::new(id).ok_or_else(|| PcmError::from_code(EINVAL))?;
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(SharedPcm(pcm)));
        Ok(PcmHandle::from_raw(raw))
    }

    fn set_params(&self, handle: PcmHandle, params: &HwParams) -> Result<(), PcmError> {
        let shared = self.pcm(handle)?;
        let pcm = &shared.0;
        {
            let hwp = alsa::pcm::HwParams::any(pcm).map_err(translate)?;
            let access = match params.access {
                AccessMode::RwInterleaved => Access::RWInterleaved,
                AccessMode::RwNonInterleaved => Access::RWNonInterleaved,
            };
            hwp.set_access(access).map_err(translate)?;
            hwp.set_format(alsa_format(params.format)).map_err(translate)?;
            hwp.set_channels(params.channels as u32).map_err(translate)?;
            hwp.set_rate_resample(params.allow_resample).map_err(translate)?;
            hwp.set_rate(params.rate_hz, ValueOr::Nearest).map_err(translate)?;
            hwp.set_buffer_time_near(params.latency_us, ValueOr::Nearest)
                .map_err(translate)?;
            hwp.set_period_time_near(params.latency_us / 4, ValueOr::Nearest)
                .map_err(translate)?;
            pcm.hw_params(&hwp).map_err(translate)?;
        }

        // Start once the buffer is mostly full, wake per period
        let current = pcm.hw_params_current().map_err(translate)?;
        let buffer = current.get_buffer_size().map_err(translate)?;
        let period = current.get_period_size().map_err(translate)?;
        let swp = pcm.sw_params_current().map_err(translate)?;
        swp.set_start_threshold(buffer - period).map_err(translate)?;
        swp.set_avail_min(period).map_err(translate)?;
        pcm.sw_params(&swp).map_err(translate)?;
        Ok(())
    }

    fn buffer_params(&self, handle: PcmHandle) -> Result<BufferParams, PcmError> {
        let shared = self.pcm(handle)?;
        let current = shared.0.hw_params_current().map_err(translate)?;
        Ok(BufferParams {
            buffer_frames: current.get_buffer_size().map_err(translate)?.max(0) as u64,
            period_frames: current.get_period_size().map_err(translate)?.max(0) as u64,
            rate_hz: current.get_rate().map_err(translate)?,
        })
    }

    fn write_interleaved(&self, handle: PcmHandle, buffer: &[u8], _frames: usize) -> Result<usize, PcmError> {
        let shared = self.pcm(handle)?;
        let io = shared.0.io_bytes();
        io.writei(buffer).map_err(translate)
    }

    fn prepare(&self, handle: PcmHandle) -> Result<(), PcmError> {
        self.pcm(handle)?.0.prepare().map_err(translate)
    }

    fn drain(&self, handle: PcmHandle) -> Result<(), PcmError> {
        self.pcm(handle)?.0.drain().map_err(translate)
    }

    fn drop_frames(&self, handle: PcmHandle) -> Result<(), PcmError> {
        self.pcm(handle)?.0.drop().map_err(translate)
    }

    fn resume(&self, handle: PcmHandle) -> Result<(), PcmError> {
        self.pcm(handle)?.0.resume().map_err(translate)
    }

    fn recover(&self, handle: PcmHandle, error: PcmError, silent: bool) -> Result<(), PcmError> {
        self.pcm(handle)?.0.recover(error.code(), silent).map_err(translate)
    }

    fn close(&self, handle: PcmHandle) -> Result<(), PcmError> {
        // snd_pcm_close runs when the last in-flight user releases the handle
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.raw())
            .map(|_| ())
            .ok_or_else(|| PcmError::from_code(EBADFD))
    }
}
