//! All-link database records and the extended payload used to read and
//! write them one slot at a time.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::core::{Address, Error, Result};

/// Size of one record on the wire and in device memory
pub const RECORD_SIZE: usize = 8;

/// Memory address of the first record; later records descend from here
pub const BASE_ADDRESS: u16 = 0x0fff;

/// Record slots between the base address and the bottom of memory
pub const MAX_RECORDS: usize = (BASE_ADDRESS as usize + 1) / RECORD_SIZE;

/// Memory address of the record slot at `index`
pub fn mem_address(index: usize) -> u16 {
    BASE_ADDRESS.wrapping_sub((index * RECORD_SIZE) as u16)
}

/// Record control flags.
///
/// Bit 7 set means the record is in use, bit 6 set means the device is the
/// controller, and bit 1 clear marks the high-water mark (last record).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordControlFlags(pub u8);

impl RecordControlFlags {
    /// In-use controller record
    pub const CONTROLLER: RecordControlFlags = RecordControlFlags(0xe2);
    /// In-use responder record
    pub const RESPONDER: RecordControlFlags = RecordControlFlags(0xa2);
    /// Deleted record that still lies below the high-water mark
    pub const AVAILABLE: RecordControlFlags = RecordControlFlags(0x02);

    pub fn in_use(&self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn available(&self) -> bool {
        !self.in_use()
    }

    pub fn controller(&self) -> bool {
        self.0 & 0x40 != 0
    }

    pub fn responder(&self) -> bool {
        !self.controller()
    }

    pub fn last_record(&self) -> bool {
        self.0 & 0x02 == 0
    }

    pub fn set_in_use(&mut self) {
        self.0 |= 0x80;
    }

    pub fn set_available(&mut self) {
        self.0 &= !0x80;
    }

    pub fn set_controller(&mut self) {
        self.0 |= 0x40;
    }

    pub fn set_responder(&mut self) {
        self.0 &= !0x40;
    }

    pub fn set_last_record(&mut self, last: bool) {
        if last {
            self.0 &= !0x02;
        } else {
            self.0 |= 0x02;
        }
    }
}

impl fmt::Debug for RecordControlFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let usage = if self.in_use() { "A" } else { "U" };
        let role = if self.controller() { "C" } else { "R" };
        write!(f, "{usage}{role} 0x{:02x}", self.0)
    }
}

/// Identity of a record; data bytes are not part of it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkId {
    pub in_use: bool,
    pub controller: bool,
    pub group: u8,
    pub address: Address,
}

/// One all-link database record
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LinkRecord {
    pub flags: RecordControlFlags,
    pub group: u8,
    pub address: Address,
    /// Application data, e.g. on-level and ramp rate for responders
    pub data: [u8; 3],
}

impl LinkRecord {
    /// An in-use controller record for `group` pointing at `address`
    pub fn controller(group: u8, address: Address, data: [u8; 3]) -> Self {
        LinkRecord {
            flags: RecordControlFlags::CONTROLLER,
            group,
            address,
            data,
        }
    }

    /// An in-use responder record for `group` pointing at `address`
    pub fn responder(group: u8, address: Address, data: [u8; 3]) -> Self {
        LinkRecord {
            flags: RecordControlFlags::RESPONDER,
            group,
            address,
            data,
        }
    }

    /// The all-zero record that marks the end of the table
    pub fn terminator() -> Self {
        LinkRecord::default()
    }

    pub fn id(&self) -> LinkId {
        LinkId {
            in_use: self.flags.in_use(),
            controller: self.flags.controller(),
            group: self.group,
            address: self.address,
        }
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < RECORD_SIZE {
            return Err(Error::BufferTooShort {
                need: RECORD_SIZE,
                got: buf.len(),
            });
        }
        Ok(LinkRecord {
            flags: RecordControlFlags(buf[0]),
            group: buf[1],
            address: Address::from_slice(&buf[2..5])?,
            data: [buf[5], buf[6], buf[7]],
        })
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let a = self.address.0;
        [self.flags.0, self.group, a[0], a[1], a[2], self.data[0], self.data[1], self.data[2]]
    }
}

impl PartialEq for LinkRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for LinkRecord {}

impl Hash for LinkRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

/// Kind of a link database request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRequestType {
    ReadLink,
    LinkResponse,
    WriteLink,
}

impl LinkRequestType {
    fn to_byte(self) -> u8 {
        match self {
            LinkRequestType::ReadLink => 0x00,
            LinkRequestType::LinkResponse => 0x01,
            LinkRequestType::WriteLink => 0x02,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x00 => Ok(LinkRequestType::ReadLink),
            0x01 => Ok(LinkRequestType::LinkResponse),
            0x02 => Ok(LinkRequestType::WriteLink),
            other => Err(Error::protocol(format!("unknown link request type 0x{other:02x}"))),
        }
    }
}

/// Payload of the read/write ALDB extended command.
///
/// Layout: `reserved | type | mem hi | mem lo | count | record(8)`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkRequest {
    pub kind: LinkRequestType,
    pub mem_address: u16,
    /// Records to read for `ReadLink` (0 means all), bytes to write for
    /// `WriteLink`
    pub num_records: u8,
    pub link: Option<LinkRecord>,
}

impl LinkRequest {
    /// Request to stream the whole table
    pub fn read_all() -> Self {
        LinkRequest {
            kind: LinkRequestType::ReadLink,
            mem_address: 0,
            num_records: 0,
            link: None,
        }
    }

    /// Request to read `count` records starting at `mem_address`
    pub fn read(mem_address: u16, count: u8) -> Self {
        LinkRequest {
            kind: LinkRequestType::ReadLink,
            mem_address,
            num_records: count,
            link: None,
        }
    }

    /// Request to write `link` at the slot `index`
    pub fn write(index: usize, link: LinkRecord) -> Self {
        LinkRequest {
            kind: LinkRequestType::WriteLink,
            mem_address: mem_address(index),
            num_records: RECORD_SIZE as u8,
            link: Some(link),
        }
    }

    pub fn from_payload(buf: &[u8]) -> Result<Self> {
        if buf.len() < 5 {
            return Err(Error::BufferTooShort { need: 5, got: buf.len() });
        }
        let kind = LinkRequestType::from_byte(buf[1])?;
        let link = match kind {
            LinkRequestType::ReadLink => None,
            _ => Some(LinkRecord::from_bytes(&buf[5..])?),
        };
        Ok(LinkRequest {
            kind,
            mem_address: u16::from_be_bytes([buf[2], buf[3]]),
            num_records: buf[4],
            link,
        })
    }

    /// The 13 meaningful payload bytes; the caller adds the checksum byte
    pub fn to_payload(&self) -> Vec<u8> {
        let mem = self.mem_address.to_be_bytes();
        let mut buf = vec![0x00, self.kind.to_byte(), mem[0], mem[1], self.num_records];
        match &self.link {
            Some(link) => buf.extend_from_slice(&link.to_bytes()),
            None => buf.extend_from_slice(&[0u8; RECORD_SIZE]),
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_addresses_descend() {
        assert_eq!(mem_address(0), 0x0fff);
        assert_eq!(mem_address(1), 0x0ff7);
        assert_eq!(mem_address(10), 0x0fff - 80);
    }

    #[test]
    fn test_flags() {
        let mut flags = RecordControlFlags::CONTROLLER;
        assert!(flags.in_use() && flags.controller() && !flags.last_record());
        flags.set_available();
        assert!(flags.available());
        flags.set_responder();
        assert!(flags.responder());
        flags.set_last_record(true);
        assert!(flags.last_record());
        assert_eq!(flags.0, 0x20);
        assert!(LinkRecord::terminator().flags.last_record());
    }

    #[test]
    fn test_identity_ignores_data() {
        let a = LinkRecord::responder(1, Address::new(1, 2, 3), [0xff, 0x1c, 0x01]);
        let b = LinkRecord::responder(1, Address::new(1, 2, 3), [0x00, 0x00, 0x00]);
        let c = LinkRecord::controller(1, Address::new(1, 2, 3), [0xff, 0x1c, 0x01]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn test_record_bytes() {
        let rec = LinkRecord::controller(0x01, Address::new(0x0a, 0x0b, 0x0c), [3, 28, 1]);
        let bytes = rec.to_bytes();
        assert_eq!(bytes, [0xe2, 0x01, 0x0a, 0x0b, 0x0c, 3, 28, 1]);
        let back = LinkRecord::from_bytes(&bytes).unwrap();
        assert_eq!(back.flags, rec.flags);
        assert_eq!(back.data, rec.data);
    }

    #[test]
    fn test_write_request_payload() {
        let rec = LinkRecord::responder(0x02, Address::new(1, 2, 3), [0, 0, 0]);
        let payload = LinkRequest::write(1, rec).to_payload();
        assert_eq!(payload[..5], [0x00, 0x02, 0x0f, 0xf7, 0x08]);
        assert_eq!(payload[5..], rec.to_bytes());
    }

    #[test]
    fn test_response_payload() {
        let payload = [0x00, 0x01, 0x0f, 0xef, 0x00, 0xa2, 0x01, 1, 2, 3, 4, 5, 6, 0x00];
        let req = LinkRequest::from_payload(&payload).unwrap();
        assert_eq!(req.kind, LinkRequestType::LinkResponse);
        assert_eq!(req.mem_address, 0x0fef);
        let link = req.link.unwrap();
        assert_eq!(link.address, Address::new(1, 2, 3));
        assert_eq!(link.data, [4, 5, 6]);
    }

    #[test]
    fn test_bad_request_type() {
        assert!(LinkRequest::from_payload(&[0, 9, 0, 0, 0]).is_err());
    }
}
