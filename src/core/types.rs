use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::{Error, Result};

/// A 3-byte Insteon device address, printed as `xx.xx.xx`
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 3]);

impl Address {
    /// Creates an address from its three octets
    pub const fn new(a: u8, b: u8, c: u8) -> Self {
        Address([a, b, c])
    }

    /// Reads an address from the first three bytes of `buf`
    pub fn from_slice(buf: &[u8]) -> Result<Self> {
        if buf.len() < 3 {
            return Err(Error::BufferTooShort { need: 3, got: buf.len() });
        }
        Ok(Address([buf[0], buf[1], buf[2]]))
    }

    /// True for the all-zero address
    pub fn is_zero(&self) -> bool {
        self.0 == [0, 0, 0]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:02x}.{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Accepts `aa.bb.cc`, `aa:bb:cc`, `aa bb cc` or `aabbcc`
    fn from_str(s: &str) -> Result<Self> {
        let digits: String = s
            .chars()
            .filter(|c| !matches!(c, '.' | ':' | ' '))
            .collect();
        if digits.len() != 6 {
            return Err(Error::protocol(format!("invalid address {s:?}")));
        }
        let mut out = [0u8; 3];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|e| Error::protocol(format!("invalid address {s:?}: {e}")))?;
        }
        Ok(Address(out))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Command code of a message.
///
/// Byte 0 distinguishes standard (0x00) from extended (0x01) commands, since
/// the same cmd1/cmd2 pair means different things in the two message sizes.
/// Bytes 1 and 2 are cmd1 and cmd2 as they appear on the wire.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Command(pub [u8; 3]);

impl Command {
    /// A standard-length command
    pub const fn standard(cmd1: u8, cmd2: u8) -> Self {
        Command([0x00, cmd1, cmd2])
    }

    /// An extended-length command
    pub const fn extended(cmd1: u8, cmd2: u8) -> Self {
        Command([0x01, cmd1, cmd2])
    }

    /// Returns a copy with cmd2 replaced by `value`.
    ///
    /// cmd2 carries small parameters such as a dim level or a group number,
    /// while class and cmd1 keep identifying the command.
    pub const fn sub_command(self, value: u8) -> Self {
        Command([self.0[0], self.0[1], value])
    }

    pub const fn cmd1(&self) -> u8 {
        self.0[1]
    }

    pub const fn cmd2(&self) -> u8 {
        self.0[2]
    }

    pub const fn is_extended(&self) -> bool {
        self.0[0] != 0
    }

    /// True when both commands share class and cmd1, ignoring cmd2
    pub fn same_kind(&self, other: &Command) -> bool {
        self.0[..2] == other.0[..2]
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}.{:02x}.{:02x}", self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Insteon engine (firmware generation) of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineVersion {
    I1,
    I2,
    /// I2CS devices require checksums on extended messages and must be
    /// linked to the modem before they answer most commands
    I2Cs,
}

impl EngineVersion {
    /// Maps the cmd2 value of a Get Engine Version ack
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x00 => Ok(EngineVersion::I1),
            0x01 => Ok(EngineVersion::I2),
            0x02 => Ok(EngineVersion::I2Cs),
            other => Err(Error::protocol(format!("unknown engine version 0x{other:02x}"))),
        }
    }

    pub fn requires_checksum(&self) -> bool {
        matches!(self, EngineVersion::I2Cs)
    }
}

/// Configuration for the modem and the connections built on it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial device path of the PLM
    pub port: String,
    /// Serial baud rate
    pub baud_rate: u32,
    /// How long a write waits for the modem echo, and then again for the
    /// device ack.
    ///
    /// The wait restarts once the echo arrives, so a message write can take
    /// up to twice this long before failing with `AckTimeout`.
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub ack_timeout: Duration,
    /// How long a read waits for each response message
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub read_timeout: Duration,
    /// Age after which a cached link database is read again
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub link_db_max_age: Duration,
    /// Hop count used for outbound messages
    pub max_hops: u8,
    /// Capacity of each subscriber's channel
    pub subscriber_buffer: usize,
    /// Drop retransmitted copies of unsolicited messages
    pub dedup: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: super::DEFAULT_PORT.to_string(),
            baud_rate: super::DEFAULT_BAUD_RATE,
            ack_timeout: Duration::from_secs(3),
            read_timeout: Duration::from_secs(5),
            link_db_max_age: Duration::from_secs(5 * 60),
            max_hops: super::MAX_HOPS,
            subscriber_buffer: 16,
            dedup: true,
        }
    }
}

impl Config {
    /// Parses a JSON configuration document; missing fields take defaults
    pub fn from_json(doc: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(doc)
            .map_err(|e| Error::config(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.ack_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(Error::config("timeouts must be non-zero"));
        }
        if self.subscriber_buffer == 0 {
            return Err(Error::config("subscriber_buffer must be at least 1"));
        }
        if self.max_hops > super::MAX_HOPS {
            return Err(Error::config(format!(
                "max_hops {} exceeds {}",
                self.max_hops,
                super::MAX_HOPS
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let addr = Address::new(0x0a, 0xb1, 0xff);
        assert_eq!(addr.to_string(), "0a.b1.ff");
        assert_eq!("0a.b1.ff".parse::<Address>().unwrap(), addr);
        assert_eq!("0AB1FF".parse::<Address>().unwrap(), addr);
        assert!("0a.b1".parse::<Address>().is_err());
        assert!("zz.b1.ff".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_from_short_slice() {
        assert!(matches!(
            Address::from_slice(&[1, 2]),
            Err(Error::BufferTooShort { need: 3, got: 2 })
        ));
    }

    #[test]
    fn test_sub_command_keeps_identity() {
        let on = Command::standard(0x11, 0xff);
        let dim = on.sub_command(0x80);
        assert_eq!(dim.cmd1(), 0x11);
        assert_eq!(dim.cmd2(), 0x80);
        assert!(dim.same_kind(&on));
        assert!(!dim.same_kind(&Command::extended(0x11, 0x80)));
    }

    #[test]
    fn test_config_defaults_and_json() {
        let config = Config::from_json(r#"{"port": "/dev/ttyUSB1", "ack_timeout": 1.5}"#).unwrap();
        assert_eq!(config.port, "/dev/ttyUSB1");
        assert_eq!(config.ack_timeout, Duration::from_millis(1500));
        assert_eq!(config.baud_rate, 19200);
        assert_eq!(config.link_db_max_age, Config::default().link_db_max_age);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::from_json(r#"{"max_hops": 4}"#).is_err());
        assert!(Config::from_json(r#"{"read_timeout": 0}"#).is_err());
        assert!(Config::default().validate().is_ok());
    }
}
