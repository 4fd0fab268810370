use std::io;
use std::panic::Location;
use thiserror::Error;

use super::types::EngineVersion;
use crate::protocol::Message;

/// Semantic reasons a device gives when it NAKs a direct message
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NakError {
    #[error("device does not recognize the command")]
    UnknownCommand,

    #[error("no load detected")]
    NoLoadDetected,

    #[error("not in the device's all-link database")]
    NotLinked,

    #[error("illegal value in command")]
    IllegalValue,

    #[error("incorrect checksum")]
    IncorrectChecksum,

    #[error("pre nak, database search took too long")]
    PreNak,
}

/// Custom error types for the Insteon PLM stack
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("buffer too short: need {need} bytes, got {got}")]
    BufferTooShort { need: usize, got: usize },

    #[error("unknown PLM command byte 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("timed out waiting for ack")]
    AckTimeout,

    #[error("timed out waiting for response")]
    ReadTimeout,

    #[error("modem NAK'd command 0x{0:02x}")]
    ModemNak(u8),

    #[error("device NAK: {0}")]
    Nak(NakError),

    #[error("unexpected response code 0x{code:02x} at {location}")]
    UnexpectedResponse {
        code: u8,
        location: &'static Location<'static>,
    },

    #[error("link index {index} is past the end of the table ({len} records)")]
    InvalidIndex { index: usize, len: usize },

    #[error("connection closed")]
    Closed,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol(msg.into())
    }

    /// Creates a new transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Error::Transport(msg.into())
    }

    /// Creates a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Creates an unexpected response error recording the caller's location
    #[track_caller]
    pub fn unexpected(code: u8) -> Self {
        Error::UnexpectedResponse {
            code,
            location: Location::caller(),
        }
    }

    /// Translates a NAK message into the semantic error for the engine version.
    ///
    /// The NAK reason is carried in cmd2 and its meaning differs between
    /// I2CS devices and older engines.
    #[track_caller]
    pub fn from_nak(engine: EngineVersion, nak: &Message) -> Self {
        let code = nak.command.cmd2();
        let reason = match (engine, code) {
            (EngineVersion::I2Cs, 0xfb) => Some(NakError::IllegalValue),
            (EngineVersion::I2Cs, 0xfc) => Some(NakError::PreNak),
            (EngineVersion::I2Cs, 0xfd) => Some(NakError::IncorrectChecksum),
            (EngineVersion::I1 | EngineVersion::I2, 0xfd) => Some(NakError::UnknownCommand),
            (_, 0xfe) => Some(NakError::NoLoadDetected),
            (_, 0xff) => Some(NakError::NotLinked),
            _ => None,
        };
        match reason {
            Some(reason) => Error::Nak(reason),
            None => Error::unexpected(code),
        }
    }

    /// True for the two "nobody answered" errors
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::AckTimeout | Error::ReadTimeout)
    }

    /// True when resending the same request could reasonably succeed
    pub fn is_retryable(&self) -> bool {
        self.is_timeout()
            || matches!(self, Error::ModemNak(_) | Error::Nak(NakError::PreNak))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Address, Command};
    use crate::protocol::{Flags, MessageType};

    fn nak(cmd2: u8) -> Message {
        Message::standard(
            Address([1, 2, 3]),
            Address([4, 5, 6]),
            Flags::new(MessageType::DirectNak, false, 3, 3),
            Command::standard(0x11, cmd2),
        )
    }

    #[test]
    fn test_error_creation() {
        let err = Error::protocol("test error");
        assert!(matches!(err, Error::Protocol(_)));
        assert_eq!(err.to_string(), "Protocol error: test error");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "test");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_nak_translation_i2cs() {
        let cases = [
            (0xfb, NakError::IllegalValue),
            (0xfc, NakError::PreNak),
            (0xfd, NakError::IncorrectChecksum),
            (0xfe, NakError::NoLoadDetected),
            (0xff, NakError::NotLinked),
        ];
        for (code, want) in cases {
            match Error::from_nak(EngineVersion::I2Cs, &nak(code)) {
                Error::Nak(got) => assert_eq!(got, want, "code 0x{code:02x}"),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_nak_translation_i2() {
        assert!(matches!(
            Error::from_nak(EngineVersion::I2, &nak(0xfd)),
            Error::Nak(NakError::UnknownCommand)
        ));
        assert!(matches!(
            Error::from_nak(EngineVersion::I1, &nak(0xff)),
            Error::Nak(NakError::NotLinked)
        ));
    }

    #[test]
    fn test_unexpected_records_location() {
        let err = Error::from_nak(EngineVersion::I2, &nak(0x42));
        match err {
            Error::UnexpectedResponse { code, location } => {
                assert_eq!(code, 0x42);
                assert!(location.file().ends_with("error.rs"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_retryable() {
        assert!(Error::AckTimeout.is_retryable());
        assert!(Error::ModemNak(0x62).is_retryable());
        assert!(!Error::Nak(NakError::NotLinked).is_retryable());
        assert!(!Error::Closed.is_timeout());
    }
}
