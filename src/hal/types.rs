use serde::{Deserialize, Serialize};

/// Physical sample encoding written to the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleFormat {
    S16LE, // 16-bit signed
    S24LE, // 24-bit signed, packed into 3 bytes
    S32LE, // 32-bit signed
    F32LE, // 32-bit float
    F64LE, // 64-bit float
}

impl Default for SampleFormat {
    /// Integer output: several sinks (HDMI in particular) reject float PCM
    fn default() -> Self {
        SampleFormat::S32LE
    }
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::S16LE => 2,
            SampleFormat::S24LE => 3,
            SampleFormat::S32LE => 4,
            SampleFormat::F32LE => 4,
            SampleFormat::F64LE => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, SampleFormat::F32LE | SampleFormat::F64LE)
    }

    /// Integer encoding for an output bit depth override
    pub fn from_bit_depth(bits: u16) -> Option<Self> {
        match bits {
            16 => Some(SampleFormat::S16LE),
            24 => Some(SampleFormat::S24LE),
            32 => Some(SampleFormat::S32LE),
            _ => None,
        }
    }
}

/// Format negotiated with the upstream sample producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self { sample_rate, channels }
    }
}

/// Optional override of the physical output format (e.g. 192 kHz / 24-bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioOutputFormat {
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
}

/// Attributes that survive card renumbering across reboots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StableIdentifiers {
    pub serial: Option<String>,
    /// USB bus path, e.g. `001/005`
    pub bus_path: Option<String>,
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub long_name: Option<String>,
}

impl StableIdentifiers {
    /// True when the device can be re-identified after renumbering
    pub fn is_durable(&self) -> bool {
        self.bus_path.is_some()
            || self.serial.is_some()
            || (self.vendor_id.is_some() && self.product_id.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.serial.is_none()
            && self.bus_path.is_none()
            && self.vendor_id.is_none()
            && self.product_id.is_none()
            && self.long_name.is_none()
    }
}

/// Device capabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub can_output: bool,
    pub supported_formats: Vec<SampleFormat>,
    pub supported_sample_rates: Vec<u32>,
    pub max_channels: u16,
}

/// Addressable output endpoint, recomputed on every enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDevice {
    pub index: usize,
    pub id: String,
    pub display_name: String,
    pub max_channels: u16,
    pub default_sample_rate: u32,
    pub low_latency_ms: f64,
    pub high_latency_ms: f64,
    pub is_default: bool,
    pub capabilities: Option<DeviceCapabilities>,
    pub stable_identifiers: Option<StableIdentifiers>,
    pub alias: Option<String>,
    pub hidden: bool,
    pub channel_map: Option<Vec<String>>,
    pub sample_format: Option<SampleFormat>,
    pub card_index: Option<u32>,
}

impl AudioDevice {
    pub fn new(index: usize, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            index,
            id: id.into(),
            display_name: display_name.into(),
            max_channels: 2,
            default_sample_rate: 48000,
            low_latency_ms: 0.0,
            high_latency_ms: 0.0,
            is_default: false,
            capabilities: None,
            stable_identifiers: None,
            alias: None,
            hidden: false,
            channel_map: None,
            sample_format: None,
            card_index: None,
        }
    }

    /// Addressed straight to a card's hardware port
    pub fn is_direct_hardware(&self) -> bool {
        is_hardware_id(&self.id)
    }
}

/// `hw:` and `plughw:` identifiers reach a card mixer; everything else is software-defined
pub fn is_hardware_id(id: &str) -> bool {
    let id = id.trim().to_ascii_lowercase();
    id.starts_with("hw:") || id.starts_with("plughw:")
}
