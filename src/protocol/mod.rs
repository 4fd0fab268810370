//! Protocol implementation module
//!
//! This module defines Insteon messages, PLM packets and their framing,
//! all-link database records and the matchers used to route traffic.

pub mod codec;
pub mod commands;
pub mod link;
pub mod matcher;
pub mod message;
pub mod packet;

pub use self::codec::{PacketCodec, PacketReader, PacketWriter};
pub use self::commands::CommandTable;
pub use self::link::{LinkId, LinkRecord, LinkRequest, LinkRequestType, RecordControlFlags};
pub use self::matcher::Matcher;
pub use self::message::{checksum, Flags, Message, MessageType};
pub use self::packet::{ModemInfo, Packet, PlmCommand};
