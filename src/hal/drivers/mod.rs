#[cfg(feature = "alsa")]
pub mod alsa;

#[cfg(feature = "alsa")]
pub use self::alsa::AlsaBinding;
