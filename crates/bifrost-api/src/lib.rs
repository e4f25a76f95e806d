// bifrost-api: Wire-level clients for LED effect controllers

pub mod backoff;
pub mod error;
pub mod pixelblaze;

pub use backoff::ReconnectConfig;
pub use error::Error;
pub use pixelblaze::{DeviceState, PixelblazeClient};
