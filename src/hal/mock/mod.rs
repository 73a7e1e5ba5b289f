pub mod audio;
pub mod pcm;
pub mod tools;

pub use audio::{ConstantSource, SineSource, StarvedSource};
pub use pcm::{MockPcm, PcmCall};
pub use tools::ScriptedToolRunner;
