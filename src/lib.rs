//! Insteon PLM: talk to Insteon devices through a serial power-line modem
//!
//! The modem is a single shared serial stream. This library frames its
//! packets, serializes requests so that only one device conversation is in
//! flight at a time, routes unsolicited traffic to subscribers and manages
//! the link databases stored in each device.
pub mod core;
pub mod device;
pub mod network;
pub mod protocol;
pub mod util;

// Re-export commonly used items
pub use crate::core::{Address, Command, Config, EngineVersion, Error, NakError, Result};
pub use crate::device::{Database, Device, DeviceInfo, Linkable, LinkDb, MemDatabase};
pub use crate::network::{Connection, Modem, Subscription};
pub use crate::protocol::{LinkRecord, Matcher, Message};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
