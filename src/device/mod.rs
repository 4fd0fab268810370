//! Devices on the Insteon network
//!
//! A [`Device`] is a connection plus the mirror of its link database. Link
//! management is exposed through the [`Linkable`] capability.

mod linkdb;

pub use self::linkdb::{LinkCache, LinkDb};

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{Address, EngineVersion, Error, NakError, Result};
use crate::network::{Connection, Modem};
use crate::protocol::commands::{
    ENTER_LINKING_MODE, EXIT_LINKING_MODE, EXTENDED_ENTER_LINKING_MODE, GET_ENGINE_VERSION,
    ID_REQUEST, LIGHT_OFF, LIGHT_ON, PING, SET_BUTTON_PRESSED_CONTROLLER,
    SET_BUTTON_PRESSED_RESPONDER, STATUS_REQUEST,
};
use crate::protocol::{LinkRecord, Matcher};
use crate::util::retry;

/// Attempts made when querying the engine version
const ENGINE_QUERY_ATTEMPTS: usize = 3;

/// Device category and subcategory from the product data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevCat(pub u8, pub u8);

impl DevCat {
    pub fn category(&self) -> u8 {
        self.0
    }

    pub fn subcategory(&self) -> u8 {
        self.1
    }
}

/// What is known about a device without asking it again
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub address: Address,
    pub engine_version: EngineVersion,
    pub dev_cat: Option<DevCat>,
    pub firmware: Option<u8>,
}

impl DeviceInfo {
    pub fn new(address: Address, engine_version: EngineVersion) -> Self {
        DeviceInfo {
            address,
            engine_version,
            dev_cat: None,
            firmware: None,
        }
    }
}

/// Lookup of previously learned device information
pub trait Database {
    fn get(&self, address: &Address) -> Option<DeviceInfo>;
    fn put(&mut self, info: DeviceInfo);
}

/// Database kept in memory only
#[derive(Debug, Clone, Default)]
pub struct MemDatabase {
    devices: HashMap<Address, DeviceInfo>,
}

impl MemDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl Database for MemDatabase {
    fn get(&self, address: &Address) -> Option<DeviceInfo> {
        self.devices.get(address).cloned()
    }

    fn put(&mut self, info: DeviceInfo) {
        self.devices.insert(info.address, info);
    }
}

/// Link database management
#[allow(async_fn_in_trait)]
pub trait Linkable {
    /// Current records, read from the device when the mirror is stale
    async fn links(&mut self) -> Result<Vec<LinkRecord>>;
    /// Adds records, reusing deleted slots first
    async fn add_links(&mut self, links: &[LinkRecord]) -> Result<()>;
    /// Adds missing records and rewrites the flags of existing ones
    async fn update_links(&mut self, links: &[LinkRecord]) -> Result<()>;
    /// Replaces the whole table
    async fn write_links(&mut self, links: &[LinkRecord]) -> Result<()>;
    /// Marks matching records as deleted
    async fn remove_links(&mut self, links: &[LinkRecord]) -> Result<()>;
}

/// A device reached through the modem
pub struct Device {
    conn: Connection,
    linkdb: LinkDb,
}

impl Device {
    pub fn new(conn: Connection) -> Self {
        let linkdb = LinkDb::new(conn.clone());
        Device { conn, linkdb }
    }

    /// Connects to `address`, taking its engine version from `db` or, when
    /// unknown, asking the device and recording the answer
    pub async fn open<D: Database>(modem: &Modem, address: Address, db: &mut D) -> Result<Self> {
        if let Some(info) = db.get(&address) {
            debug!(addr = %address, engine = ?info.engine_version, "Device known");
            return Ok(Device::new(modem.connect(address, info.engine_version)));
        }

        let mut device = Device::new(modem.connect(address, EngineVersion::I2));
        let engine = device.engine_version().await?;
        device.set_engine_version(engine);
        db.put(DeviceInfo::new(address, engine));
        info!(addr = %address, ?engine, "Device added");
        Ok(device)
    }

    pub fn address(&self) -> Address {
        self.conn.address()
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn linkdb(&mut self) -> &mut LinkDb {
        &mut self.linkdb
    }

    /// Changes how messages to this device are framed. The link database
    /// mirror starts over.
    pub fn set_engine_version(&mut self, engine: EngineVersion) {
        self.conn.set_engine_version(engine);
        self.linkdb = LinkDb::new(self.conn.clone());
    }

    pub async fn ping(&self) -> Result<()> {
        self.conn.send(PING, &[]).await.map(|_| ())
    }

    /// Asks the device for its engine version.
    ///
    /// I2CS devices that are not linked to the modem answer with a
    /// "not linked" nak, which identifies them as well.
    pub async fn engine_version(&self) -> Result<EngineVersion> {
        let ack = retry(ENGINE_QUERY_ATTEMPTS, || self.conn.send(GET_ENGINE_VERSION, &[])).await;
        match ack {
            Ok(ack) => EngineVersion::from_byte(ack.command.cmd2()),
            Err(Error::Nak(NakError::NotLinked)) => Ok(EngineVersion::I2Cs),
            Err(e) => Err(e),
        }
    }

    /// Requests product data; the device answers with a set-button
    /// broadcast whose destination carries category, subcategory and
    /// firmware
    pub async fn id_request(&self) -> Result<DeviceInfo> {
        let reply = self
            .conn
            .request(
                ID_REQUEST,
                &[],
                Matcher::or([
                    Matcher::command(SET_BUTTON_PRESSED_RESPONDER),
                    Matcher::command(SET_BUTTON_PRESSED_CONTROLLER),
                ]),
            )
            .await?;
        let [category, subcategory, firmware] = reply.dst.0;
        Ok(DeviceInfo {
            address: self.address(),
            engine_version: self.conn.engine_version(),
            dev_cat: Some(DevCat(category, subcategory)),
            firmware: Some(firmware),
        })
    }

    pub async fn turn_on(&self, level: u8) -> Result<()> {
        self.conn.send(LIGHT_ON.sub_command(level), &[]).await.map(|_| ())
    }

    pub async fn turn_off(&self) -> Result<()> {
        self.conn.send(LIGHT_OFF, &[]).await.map(|_| ())
    }

    /// Current on-level, carried in cmd2 of the status ack
    pub async fn status(&self) -> Result<u8> {
        let ack = self.conn.send(STATUS_REQUEST, &[]).await?;
        Ok(ack.command.cmd2())
    }

    /// Puts the device in linking mode for `group`; I2CS devices need the
    /// extended form of the command
    pub async fn enter_linking_mode(&self, group: u8) -> Result<()> {
        let command = if self.conn.engine_version() == EngineVersion::I2Cs {
            EXTENDED_ENTER_LINKING_MODE.sub_command(group)
        } else {
            ENTER_LINKING_MODE.sub_command(group)
        };
        self.conn.send(command, &[]).await.map(|_| ())
    }

    pub async fn exit_linking_mode(&self) -> Result<()> {
        self.conn.send(EXIT_LINKING_MODE, &[]).await.map(|_| ())
    }
}

impl Linkable for Device {
    async fn links(&mut self) -> Result<Vec<LinkRecord>> {
        Ok(self.linkdb.links().await?.to_vec())
    }

    async fn add_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        self.linkdb.add_links(links).await
    }

    async fn update_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        self.linkdb.update_links(links).await
    }

    async fn write_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        self.linkdb.write_links(links).await
    }

    async fn remove_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        self.linkdb.remove_links(links).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_database() {
        let mut db = MemDatabase::new();
        let addr = Address::new(0x01, 0x02, 0x03);
        assert!(db.get(&addr).is_none());

        db.put(DeviceInfo::new(addr, EngineVersion::I2Cs));
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(&addr).unwrap().engine_version, EngineVersion::I2Cs);

        let mut info = DeviceInfo::new(addr, EngineVersion::I2);
        info.dev_cat = Some(DevCat(0x01, 0x20));
        db.put(info.clone());
        assert_eq!(db.len(), 1);
        assert_eq!(db.get(&addr), Some(info));
    }

    #[test]
    fn test_device_info_json() {
        let mut info = DeviceInfo::new(Address::new(0xaa, 0xbb, 0xcc), EngineVersion::I2Cs);
        info.dev_cat = Some(DevCat(0x02, 0x2a));
        info.firmware = Some(0x45);

        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"aa.bb.cc\""));
        let back: DeviceInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
