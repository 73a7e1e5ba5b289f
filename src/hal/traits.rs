use async_trait::async_trait;

use super::pcm::{BufferParams, Direction, HwParams, OpenMode, PcmError, PcmHandle};
use super::types::AudioDevice;
use crate::engine::{Player, PlayerError};

/// Narrow boundary over the OS interleaved-PCM API.
///
/// Implementations only marshal calls and translate status codes. Every method may be
/// called from any thread; `drop_frames` in particular is issued by the control plane while the
/// playback thread can be blocked inside `write_interleaved` on the same handle.
pub trait PcmBinding: Send + Sync {
    /// Open a device by its identifier, passed through unmodified
    fn open(&self, name: &str, direction: Direction, mode: OpenMode) -> Result<PcmHandle, PcmError>;

    /// Negotiate format, access, channels, rate and latency in one call
    fn set_params(&self, handle: PcmHandle, params: &HwParams) -> Result<(), PcmError>;

    /// Buffer geometry actually granted, which often differs from the latency target
    fn buffer_params(&self, handle: PcmHandle) -> Result<BufferParams, PcmError>;

    /// Write `frames` interleaved frames; returns frames accepted
    fn write_interleaved(&self, handle: PcmHandle, buffer: &[u8], frames: usize) -> Result<usize, PcmError>;

    fn prepare(&self, handle: PcmHandle) -> Result<(), PcmError>;

    /// Block until pending frames have played
    fn drain(&self, handle: PcmHandle) -> Result<(), PcmError>;

    /// Discard pending frames immediately (`snd_pcm_drop`)
    fn drop_frames(&self, handle: PcmHandle) -> Result<(), PcmError>;

    /// Resume after suspend; `WouldBlock` means try again
    fn resume(&self, handle: PcmHandle) -> Result<(), PcmError>;

    /// Generic recovery for underrun and suspend conditions
    fn recover(&self, handle: PcmHandle, error: PcmError, silent: bool) -> Result<(), PcmError>;

    fn close(&self, handle: PcmHandle) -> Result<(), PcmError>;

    fn error_message(&self, code: i32) -> String {
        super::pcm::describe(code)
    }
}

/// Upstream producer of interleaved float samples.
///
/// Returning zero is a valid "nothing ready yet" answer, not an error.
pub trait SampleSource: Send {
    fn read(&mut self, buffer: &mut [f32]) -> usize;
}

/// Source backed by a closure, see [`from_fn`]
pub struct FromFn<F>(F);

/// Wrap a closure filling the buffer and returning the number of samples written
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: FnMut(&mut [f32]) -> usize + Send,
{
    FromFn(f)
}

impl<F> SampleSource for FromFn<F>
where
    F: FnMut(&mut [f32]) -> usize + Send,
{
    fn read(&mut self, buffer: &mut [f32]) -> usize {
        (self.0)(buffer)
    }
}

/// Runs external tools (device listing, mixer control) with a bounded wait
#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Captured stdout, or `None` on spawn failure, non-zero exit or timeout
    async fn run(&self, program: &str, args: &[&str]) -> Option<String>;

    /// Contents of a small system file such as `/proc/asound/cards`
    async fn read_file(&self, path: &str) -> Option<String>;
}

/// Output backend: device discovery, hardware mixer access and player construction
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Backend identifier, e.g. "alsa"
    fn backend_id(&self) -> &str;

    async fn output_devices(&self) -> Vec<AudioDevice>;

    async fn device(&self, id: &str) -> Option<AudioDevice>;

    async fn default_device(&self) -> Option<AudioDevice>;

    /// Empty or absent ids are valid and mean the default device
    async fn validate_device(&self, id: Option<&str>) -> Result<(), String>;

    fn refresh_devices(&self);

    /// Set the card mixer to `percent`; false when the device has no usable mixer
    async fn set_hardware_volume(&self, device_id: &str, percent: u8) -> bool;

    /// Player bound to `device_id`, or to the default device when absent
    async fn create_player(&self, device_id: Option<&str>) -> Result<Player, PlayerError>;
}
