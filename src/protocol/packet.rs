use std::fmt;

use crate::core::{Address, Error, Result};
use super::message::{Flags, Message, PAYLOAD_LEN};

/// Every packet on the serial line starts with this byte
pub const SYNC: u8 = 0x02;

/// Modem accepted a host command
pub const ACK: u8 = 0x06;

/// Modem refused a host command (usually busy)
pub const NAK: u8 = 0x15;

/// PLM command byte
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlmCommand(pub u8);

impl PlmCommand {
    pub const STANDARD_MESSAGE_RECEIVED: PlmCommand = PlmCommand(0x50);
    pub const EXTENDED_MESSAGE_RECEIVED: PlmCommand = PlmCommand(0x51);
    pub const X10_MESSAGE_RECEIVED: PlmCommand = PlmCommand(0x52);
    pub const ALL_LINKING_COMPLETED: PlmCommand = PlmCommand(0x53);
    pub const BUTTON_EVENT_REPORT: PlmCommand = PlmCommand(0x54);
    pub const USER_RESET_DETECTED: PlmCommand = PlmCommand(0x55);
    pub const ALL_LINK_CLEANUP_FAILURE: PlmCommand = PlmCommand(0x56);
    pub const ALL_LINK_RECORD_RESPONSE: PlmCommand = PlmCommand(0x57);
    pub const ALL_LINK_CLEANUP_STATUS: PlmCommand = PlmCommand(0x58);

    pub const GET_INFO: PlmCommand = PlmCommand(0x60);
    pub const SEND_ALL_LINK: PlmCommand = PlmCommand(0x61);
    pub const SEND_INSTEON_MESSAGE: PlmCommand = PlmCommand(0x62);
    pub const SEND_X10: PlmCommand = PlmCommand(0x63);
    pub const START_ALL_LINKING: PlmCommand = PlmCommand(0x64);
    pub const CANCEL_ALL_LINKING: PlmCommand = PlmCommand(0x65);
    pub const SET_DEVICE_CATEGORY: PlmCommand = PlmCommand(0x66);
    pub const RESET: PlmCommand = PlmCommand(0x67);
    pub const SET_ACK_BYTE: PlmCommand = PlmCommand(0x68);
    pub const GET_FIRST_ALL_LINK: PlmCommand = PlmCommand(0x69);
    pub const GET_NEXT_ALL_LINK: PlmCommand = PlmCommand(0x6a);
    pub const SET_CONFIG: PlmCommand = PlmCommand(0x6b);
    pub const GET_ALL_LINK_FOR_SENDER: PlmCommand = PlmCommand(0x6c);
    pub const LED_ON: PlmCommand = PlmCommand(0x6d);
    pub const LED_OFF: PlmCommand = PlmCommand(0x6e);
    pub const MANAGE_ALL_LINK_RECORD: PlmCommand = PlmCommand(0x6f);
    pub const SET_NAK_BYTE: PlmCommand = PlmCommand(0x70);
    pub const SET_ACK_TWO_BYTES: PlmCommand = PlmCommand(0x71);
    pub const RF_SLEEP: PlmCommand = PlmCommand(0x72);
    pub const GET_CONFIG: PlmCommand = PlmCommand(0x73);

    /// Fixed body length of a packet received from the modem, not counting
    /// sync, command byte or trailing ack byte. `None` for unknown commands.
    pub fn body_len(&self) -> Option<usize> {
        let len = match self.0 {
            0x50 => 9,
            0x51 => 23,
            0x52 => 2,
            0x53 => 8,
            0x54 => 1,
            0x55 => 0,
            0x56 => 5,
            0x57 => 8,
            0x58 => 1,
            0x60 => 6,
            0x61 => 3,
            // standard length; extended sends carry PAYLOAD_LEN more
            0x62 => 6,
            0x63 => 2,
            0x64 => 2,
            0x65 => 0,
            0x66 => 3,
            0x67 => 0,
            0x68 => 1,
            0x69 => 0,
            0x6a => 0,
            0x6b => 1,
            0x6c => 0,
            0x6d => 0,
            0x6e => 0,
            0x6f => 9,
            0x70 => 1,
            0x71 => 2,
            0x72 => 2,
            0x73 => 3,
            _ => return None,
        };
        Some(len)
    }

    /// Host commands are echoed back with an ack/nak byte appended
    pub fn is_host_command(&self) -> bool {
        (0x60..=0x7f).contains(&self.0)
    }
}

impl fmt::Debug for PlmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlmCommand(0x{:02x})", self.0)
    }
}

/// A framed PLM packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub command: PlmCommand,
    /// Body bytes between the command byte and the ack byte
    pub payload: Vec<u8>,
    /// Modem ack/nak for echoed host commands; `None` otherwise
    pub ack: Option<u8>,
}

impl Packet {
    pub fn new(command: PlmCommand, payload: Vec<u8>) -> Self {
        Packet {
            command,
            payload,
            ack: None,
        }
    }

    /// Wraps a message for the modem to transmit.
    ///
    /// The modem fills in its own address as source, so it is left off.
    pub fn send_message(msg: &Message) -> Self {
        let bytes = msg.to_bytes();
        Packet::new(PlmCommand::SEND_INSTEON_MESSAGE, bytes[3..].to_vec())
    }

    pub fn is_ack(&self) -> bool {
        self.ack == Some(ACK)
    }

    pub fn is_nak(&self) -> bool {
        self.ack == Some(NAK)
    }

    /// True for packets that carry an Insteon message
    pub fn carries_message(&self) -> bool {
        matches!(
            self.command,
            PlmCommand::STANDARD_MESSAGE_RECEIVED
                | PlmCommand::EXTENDED_MESSAGE_RECEIVED
                | PlmCommand::SEND_INSTEON_MESSAGE
        )
    }

    /// Decodes the Insteon message carried by the packet.
    ///
    /// Echoes of sent messages lack the source address, so three
    /// placeholder bytes are inserted in front of the body.
    pub fn message(&self) -> Result<Message> {
        match self.command {
            PlmCommand::STANDARD_MESSAGE_RECEIVED | PlmCommand::EXTENDED_MESSAGE_RECEIVED => {
                Message::from_bytes(&self.payload)
            }
            PlmCommand::SEND_INSTEON_MESSAGE => {
                let mut buf = Vec::with_capacity(3 + self.payload.len());
                buf.extend_from_slice(&Address::default().0);
                buf.extend_from_slice(&self.payload);
                Message::from_bytes(&buf)
            }
            other => Err(Error::protocol(format!("{other:?} does not carry a message"))),
        }
    }

    /// Length of the body the framer must read for this command, given the
    /// bytes of the fixed body read so far
    pub(crate) fn extra_len(command: PlmCommand, body: &[u8]) -> usize {
        if command == PlmCommand::SEND_INSTEON_MESSAGE && body.len() > 3 && Flags(body[3]).is_extended() {
            PAYLOAD_LEN
        } else {
            0
        }
    }
}

/// Information returned by Get IM Info
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModemInfo {
    pub address: Address,
    pub category: u8,
    pub subcategory: u8,
    pub firmware: u8,
}

impl ModemInfo {
    pub fn from_packet(packet: &Packet) -> Result<Self> {
        if packet.command != PlmCommand::GET_INFO {
            return Err(Error::protocol(format!("{:?} is not an info response", packet.command)));
        }
        if packet.payload.len() < 6 {
            return Err(Error::BufferTooShort {
                need: 6,
                got: packet.payload.len(),
            });
        }
        Ok(ModemInfo {
            address: Address::from_slice(&packet.payload)?,
            category: packet.payload[3],
            subcategory: packet.payload[4],
            firmware: packet.payload[5],
        })
    }
}
