pub mod backend;
pub mod drivers;
pub mod enumerator;
pub mod format_converter;
pub mod mock;
pub mod pcm;
pub mod tools;
pub mod traits;
pub mod types;

pub use backend::AlsaBackend;
pub use enumerator::DeviceEnumerator;
pub use pcm::{PcmError, PcmErrorKind, PcmHandle};
pub use tools::{SystemToolRunner, ToolConfig};
pub use traits::{from_fn, AudioBackend, PcmBinding, SampleSource, ToolRunner};
pub use types::{
    AudioDevice, AudioFormat, AudioOutputFormat, DeviceCapabilities, SampleFormat,
    StableIdentifiers,
};

#[cfg(feature = "alsa")]
pub use drivers::AlsaBinding;
