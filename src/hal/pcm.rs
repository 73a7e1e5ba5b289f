//! Vocabulary shared by every `PcmBinding` implementation.
//!
//! Status codes follow the native convention: negative errno values, e.g. `-EPIPE` for an
//! underrun. `PcmError` keeps the raw code so nothing is lost in translation and adds a
//! classification the playback loop dispatches on.

use serde::{Deserialize, Serialize};
use std::num::NonZeroU64;
use thiserror::Error;

use super::types::SampleFormat;

pub const EIO: i32 = 5;
pub const EAGAIN: i32 = 11;
pub const EBUSY: i32 = 16;
pub const ENODEV: i32 = 19;
pub const EINVAL: i32 = 22;
pub const EPIPE: i32 = 32;
pub const EBADFD: i32 = 77;
pub const ESTRPIPE: i32 = 86;

/// Opaque token for one open native device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PcmHandle(NonZeroU64);

impl PcmHandle {
    pub fn from_raw(raw: NonZeroU64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Playback,
    Capture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OpenMode {
    #[default]
    Blocking,
    NonBlocking,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccessMode {
    #[default]
    RwInterleaved,
    RwNonInterleaved,
}

/// Parameters negotiated in one `set_params` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwParams {
    pub format: SampleFormat,
    pub access: AccessMode,
    pub channels: u16,
    pub rate_hz: u32,
    pub allow_resample: bool,
    pub latency_us: u32,
}

/// Buffer geometry the device actually accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferParams {
    pub buffer_frames: u64,
    pub period_frames: u64,
    /// Rate the device runs at, which can differ from the request
    pub rate_hz: u32,
}

/// How the playback loop should react to a failed call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmErrorKind {
    /// Buffer ran dry (`-EPIPE`)
    Underrun,
    /// Subsystem suspended the device (`-ESTRPIPE`)
    Suspended,
    /// Non-blocking "try again" (`-EAGAIN`)
    WouldBlock,
    /// Handle invalidated or device unplugged
    DeviceGone,
    Other,
}

/// Negative status code returned by the native subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{} (code {code})", describe(*code))]
pub struct PcmError {
    code: i32,
}

impl PcmError {
    /// Accepts either sign; the stored code is always negative
    pub fn from_code(code: i32) -> Self {
        Self { code: -code.abs() }
    }

    pub fn underrun() -> Self {
        Self::from_code(EPIPE)
    }

    pub fn suspended() -> Self {
        Self::from_code(ESTRPIPE)
    }

    pub fn would_block() -> Self {
        Self::from_code(EAGAIN)
    }

    pub fn device_gone() -> Self {
        Self::from_code(ENODEV)
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn kind(&self) -> PcmErrorKind {
        match -self.code {
            EPIPE => PcmErrorKind::Underrun,
            ESTRPIPE => PcmErrorKind::Suspended,
            EAGAIN => PcmErrorKind::WouldBlock,
            ENODEV | EBADFD | EIO => PcmErrorKind::DeviceGone,
            _ => PcmErrorKind::Other,
        }
    }

    pub fn message(&self) -> String {
        describe(self.code)
    }
}

/// Human readable text for a native status code
pub fn describe(code: i32) -> String {
    match -code.abs() {
        c if c == -EPIPE => "Broken pipe (buffer underrun)".to_string(),
        c if c == -ESTRPIPE => "Streams pipe error (device suspended)".to_string(),
        c if c == -EBADFD => "File descriptor in bad state".to_string(),
        0 => "Success".to_string(),
        c => std::io::Error::from_raw_os_error(-c).to_string(),
    }
}
