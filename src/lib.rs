//! VRChat-style humanoid avatar → VRM 0.x converter.

pub mod convert;
pub mod correction;
pub mod error;
pub mod logging;
pub mod project;
pub mod rig;
pub mod texture;

pub use error::ConversionError;
pub use logging::{LogLevel, init_logging, send_log};
