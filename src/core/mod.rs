//! Core types for the Insteon PLM stack
//!
//! Addresses, commands, engine versions, configuration and the crate error.

pub mod error;
pub mod serde;
pub mod types;

pub use self::error::{Error, NakError, Result};
pub use self::types::{Address, Command, Config, EngineVersion};

/// Default serial device of the PLM
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// The PLM talks 19200 8N1
pub const DEFAULT_BAUD_RATE: u32 = 19200;

/// Largest hop count the 2-bit TTL field can carry
pub const MAX_HOPS: u8 = 3;
