use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::core::{Address, Command, Error, Result, MAX_HOPS};
use super::link::LinkRequest;
use super::commands;

/// Wire length of a standard message
pub const STANDARD_MSG_LEN: usize = 9;

/// Wire length of an extended message
pub const EXTENDED_MSG_LEN: usize = 23;

/// Length of the extended user data, checksum included
pub const PAYLOAD_LEN: usize = 14;

/// The eight message types carried in the top three flag bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Direct,
    DirectAck,
    AllLinkCleanup,
    CleanupAck,
    Broadcast,
    DirectNak,
    AllLinkBroadcast,
    CleanupNak,
}

impl MessageType {
    fn bits(self) -> u8 {
        match self {
            MessageType::Direct => 0b000,
            MessageType::DirectAck => 0b001,
            MessageType::AllLinkCleanup => 0b010,
            MessageType::CleanupAck => 0b011,
            MessageType::Broadcast => 0b100,
            MessageType::DirectNak => 0b101,
            MessageType::AllLinkBroadcast => 0b110,
            MessageType::CleanupNak => 0b111,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            0b000 => MessageType::Direct,
            0b001 => MessageType::DirectAck,
            0b010 => MessageType::AllLinkCleanup,
            0b011 => MessageType::CleanupAck,
            0b100 => MessageType::Broadcast,
            0b101 => MessageType::DirectNak,
            0b110 => MessageType::AllLinkBroadcast,
            _ => MessageType::CleanupNak,
        }
    }
}

/// Message flags byte.
///
/// Layout: bits 7-5 message type, bit 4 extended, bits 3-2 hops left (TTL),
/// bits 1-0 max hops.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(pub u8);

impl Flags {
    pub const STANDARD_DIRECT: Flags = Flags(0x0f);
    pub const EXTENDED_DIRECT: Flags = Flags(0x1f);

    /// Builds a flags byte; a TTL above `max_ttl` is clamped to it
    pub fn new(kind: MessageType, extended: bool, ttl: u8, max_ttl: u8) -> Self {
        let max_ttl = max_ttl.min(MAX_HOPS);
        let ttl = ttl.min(max_ttl);
        Flags(kind.bits() << 5 | (extended as u8) << 4 | ttl << 2 | max_ttl)
    }

    /// Direct message flags originating from the host with full TTL
    pub fn direct(extended: bool, hops: u8) -> Self {
        Flags::new(MessageType::Direct, extended, hops, hops)
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_bits(self.0 >> 5)
    }

    pub fn is_extended(&self) -> bool {
        self.0 & 0x10 != 0
    }

    pub fn ttl(&self) -> u8 {
        (self.0 >> 2) & 0x03
    }

    pub fn max_ttl(&self) -> u8 {
        self.0 & 0x03
    }

    pub fn is_ack(&self) -> bool {
        self.message_type() == MessageType::DirectAck
    }

    pub fn is_nak(&self) -> bool {
        self.message_type() == MessageType::DirectNak
    }

    pub fn is_direct(&self) -> bool {
        self.message_type() == MessageType::Direct
    }

    pub fn is_broadcast(&self) -> bool {
        self.message_type() == MessageType::Broadcast
    }

    /// All-link broadcasts, cleanups and their acks/naks
    pub fn is_all_link(&self) -> bool {
        matches!(
            self.message_type(),
            MessageType::AllLinkBroadcast
                | MessageType::AllLinkCleanup
                | MessageType::CleanupAck
                | MessageType::CleanupNak
        )
    }

    /// Same flags with the hops-left field replaced
    pub fn with_ttl(self, ttl: u8) -> Self {
        Flags::new(self.message_type(), self.is_extended(), ttl, self.max_ttl())
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} {} {}:{}",
            self.message_type(),
            if self.is_extended() { "ext" } else { "std" },
            self.ttl(),
            self.max_ttl()
        )
    }
}

/// An Insteon message as it travels over the power line
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Message {
    pub src: Address,
    pub dst: Address,
    pub flags: Flags,
    pub command: Command,
    /// Extended user data; exactly [`PAYLOAD_LEN`] bytes when the flags say
    /// extended, empty otherwise
    pub payload: Vec<u8>,
}

impl Message {
    /// A standard message with no payload
    pub fn standard(src: Address, dst: Address, flags: Flags, command: Command) -> Self {
        Message {
            src,
            dst,
            flags,
            command,
            payload: Vec::new(),
        }
    }

    /// An extended message; the payload is zero-padded or truncated to
    /// [`PAYLOAD_LEN`]
    pub fn extended(src: Address, dst: Address, flags: Flags, command: Command, payload: &[u8]) -> Self {
        let mut buf = vec![0u8; PAYLOAD_LEN];
        let n = payload.len().min(PAYLOAD_LEN);
        buf[..n].copy_from_slice(&payload[..n]);
        Message {
            src,
            dst,
            flags,
            command,
            payload: buf,
        }
    }

    pub fn is_extended(&self) -> bool {
        self.flags.is_extended()
    }

    pub fn is_ack(&self) -> bool {
        self.flags.is_ack()
    }

    pub fn is_nak(&self) -> bool {
        self.flags.is_nak()
    }

    /// Wire length implied by the flags
    pub fn wire_len(&self) -> usize {
        if self.is_extended() {
            EXTENDED_MSG_LEN
        } else {
            STANDARD_MSG_LEN
        }
    }

    /// Decodes a message from its wire layout
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < STANDARD_MSG_LEN {
            return Err(Error::BufferTooShort {
                need: STANDARD_MSG_LEN,
                got: buf.len(),
            });
        }
        let flags = Flags(buf[6]);
        if flags.is_extended() && buf.len() < EXTENDED_MSG_LEN {
            return Err(Error::BufferTooShort {
                need: EXTENDED_MSG_LEN,
                got: buf.len(),
            });
        }

        let command = if flags.is_extended() {
            Command::extended(buf[7], buf[8])
        } else {
            Command::standard(buf[7], buf[8])
        };
        let payload = if flags.is_extended() {
            buf[STANDARD_MSG_LEN..EXTENDED_MSG_LEN].to_vec()
        } else {
            Vec::new()
        };

        Ok(Message {
            src: Address::from_slice(&buf[0..3])?,
            dst: Address::from_slice(&buf[3..6])?,
            flags,
            command,
            payload,
        })
    }

    /// Appends the wire layout of the message to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_slice(&self.src.0);
        dst.put_slice(&self.dst.0);
        dst.put_u8(self.flags.0);
        dst.put_u8(self.command.cmd1());
        dst.put_u8(self.command.cmd2());
        if self.is_extended() {
            let mut payload = [0u8; PAYLOAD_LEN];
            let n = self.payload.len().min(PAYLOAD_LEN);
            payload[..n].copy_from_slice(&self.payload[..n]);
            dst.put_slice(&payload);
        }
    }

    /// Encodes the message into a fresh buffer
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut buf);
        buf.to_vec()
    }

    /// Stores the I2CS checksum in the last payload byte
    pub fn set_checksum(&mut self) {
        if !self.is_extended() {
            return;
        }
        self.payload.resize(PAYLOAD_LEN, 0);
        self.payload[PAYLOAD_LEN - 1] = checksum(self.command, &self.payload);
    }

    /// Decodes the payload as a link database request, if this is one
    pub fn link_request(&self) -> Option<LinkRequest> {
        if !self.is_extended() || !self.command.same_kind(&commands::READ_WRITE_ALDB) {
            return None;
        }
        LinkRequest::from_payload(&self.payload).ok()
    }

    /// Two messages are duplicates when they are the same logical message
    /// observed on different hops: everything matches except the TTL.
    pub fn is_duplicate_of(&self, other: &Message) -> bool {
        self.src == other.src
            && self.dst == other.dst
            && self.command == other.command
            && self.flags.message_type() == other.flags.message_type()
            && self.flags.is_extended() == other.flags.is_extended()
            && self.flags.max_ttl() == other.flags.max_ttl()
            && self.flags.ttl() != other.flags.ttl()
            && self.payload == other.payload
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} {:?} {}", self.src, self.dst, self.flags, self.command)?;
        if self.is_extended() {
            write!(f, " [")?;
            for (i, b) in self.payload.iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write!(f, "{b:02x}")?;
            }
            write!(f, "]")?;
        }
        Ok(())
    }
}

/// I2CS extended-message checksum: two's complement of the sum of cmd1,
/// cmd2 and the first 13 payload bytes.
pub fn checksum(command: Command, payload: &[u8]) -> u8 {
    let sum = payload
        .iter()
        .take(PAYLOAD_LEN - 1)
        .fold(command.cmd1().wrapping_add(command.cmd2()), |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}
