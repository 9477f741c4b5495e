//! Alsavo Pro UDP protocol client.
//!
//! Talks to the pump's controller over its proprietary datagram protocol:
//! 16-byte big-endian framing, a challenge-response handshake derived from
//! the device password, and a status+config snapshot query. Each operation
//! is a complete connect-authenticate-act-disconnect cycle.
//!
//! # Example
//!
//! ```ignore
//! use alsavoctl::alsavo::AlsavoPro;
//!
//! let mut pump = AlsavoPro::new("192.168.1.50", 1194, 12345678, "0123");
//! pump.update().await?;
//! println!("water in: {:.1} C", pump.water_in_temperature());
//! ```

mod client;
mod error;
pub mod protocol;
mod session;
mod transport;

#[cfg(test)]
mod tests;

pub use client::{AlsavoPro, OperatingMode, PowerMode, ERR_NO_WATER_FLUX, ERR_WATER_TEMP_TOO_LOW};
pub use error::{AlsavoError, Result};
pub use protocol::QueryResponse;
