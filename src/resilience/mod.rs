pub mod cancel;
pub mod policy;

pub use cancel::CancelToken;
pub use policy::ReconnectPolicy;
