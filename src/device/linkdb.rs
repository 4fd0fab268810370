//! Local mirror of a device's all-link database.
//!
//! The table is read in full by streaming every record from the device and
//! kept until it is older than the configured maximum age. Writes go to the
//! device one record at a time and are applied to the mirror only after the
//! device acknowledged them.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::core::{Error, Result};
use crate::network::Connection;
use crate::protocol::commands::READ_WRITE_ALDB;
use crate::protocol::link::{mem_address, MAX_RECORDS};
use crate::protocol::{LinkId, LinkRecord, LinkRequest, LinkRequestType, Matcher};

/// Ordered records plus an identity index
#[derive(Debug, Clone, Default)]
pub struct LinkCache {
    links: Vec<LinkRecord>,
    index: HashMap<LinkId, usize>,
}

impl LinkCache {
    pub fn new(links: Vec<LinkRecord>) -> Self {
        let mut cache = LinkCache {
            links,
            index: HashMap::new(),
        };
        cache.reindex();
        cache
    }

    pub fn links(&self) -> &[LinkRecord] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Slot holding a record with this identity
    pub fn position(&self, id: &LinkId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// First deleted slot at or after `from`
    pub fn next_available(&self, from: usize) -> Option<usize> {
        self.links
            .iter()
            .enumerate()
            .skip(from)
            .find(|(_, link)| link.flags.available())
            .map(|(i, _)| i)
    }

    /// Writes must land inside the table or directly behind it
    pub fn check_index(&self, index: usize) -> Result<()> {
        if index > self.links.len() {
            return Err(Error::InvalidIndex {
                index,
                len: self.links.len(),
            });
        }
        Ok(())
    }

    /// Applies a record the device accepted at `index`.
    ///
    /// A last-record marker cuts the table off at `index`.
    pub fn apply_write(&mut self, index: usize, link: LinkRecord) -> Result<()> {
        self.check_index(index)?;
        if link.flags.last_record() {
            self.links.truncate(index);
        } else if index == self.links.len() {
            self.links.push(link);
        } else {
            self.links[index] = link;
        }
        self.reindex();
        Ok(())
    }

    fn replace(&mut self, links: Vec<LinkRecord>) {
        self.links = links;
        self.reindex();
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, link) in self.links.iter().enumerate() {
            self.index.entry(link.id()).or_insert(i);
        }
    }
}

/// Records collected while streaming the table from the device
#[derive(Debug, Default)]
struct TableRead {
    records: Vec<LinkRecord>,
    last_mem: Option<u16>,
}

impl TableRead {
    /// Takes one response; returns true once the end of the table was seen.
    ///
    /// A response repeating the memory address of the one before it is a
    /// retransmission and is skipped.
    fn accept(&mut self, response: &LinkRequest) -> bool {
        if response.kind != LinkRequestType::LinkResponse {
            return false;
        }
        if self.last_mem == Some(response.mem_address) {
            debug!(mem = response.mem_address, "Skipping repeated link response");
            return false;
        }
        let Some(link) = response.link else {
            return false;
        };
        self.last_mem = Some(response.mem_address);
        if link.flags.last_record() {
            return true;
        }
        self.records.push(link);
        false
    }
}

/// All-link database of one device
pub struct LinkDb {
    conn: Connection,
    cache: LinkCache,
    refreshed: Option<Instant>,
    max_age: Duration,
    read_timeout: Duration,
}

impl LinkDb {
    /// Creates an empty, stale mirror using the modem's configured ages
    pub fn new(conn: Connection) -> Self {
        let config = conn.modem().config();
        let max_age = config.link_db_max_age;
        let read_timeout = config.read_timeout;
        LinkDb {
            conn,
            cache: LinkCache::default(),
            refreshed: None,
            max_age,
            read_timeout,
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// The mirror as it is, without touching the network
    pub fn cached(&self) -> &[LinkRecord] {
        self.cache.links()
    }

    /// True when the mirror was never read or is older than the maximum age
    pub fn is_stale(&self) -> bool {
        match self.refreshed {
            Some(at) => at.elapsed() >= self.max_age,
            None => true,
        }
    }

    /// Forces the next access to read the table again
    pub fn expire(&mut self) {
        self.refreshed = None;
    }

    /// The device's records, reading them first if the mirror is stale
    pub async fn links(&mut self) -> Result<&[LinkRecord]> {
        self.refresh().await?;
        Ok(self.cache.links())
    }

    /// Reads the whole table unless the mirror is still fresh
    pub async fn refresh(&mut self) -> Result<()> {
        if !self.is_stale() {
            return Ok(());
        }

        let addr = self.conn.address();
        debug!(addr = %addr, "Reading link database");
        // Records stream in faster than they are consumed here, and the
        // multiplexer drops on a full buffer, so leave room for a full table
        // sent twice
        let mut responses = self.conn.subscribe_with_capacity(
            Matcher::command(READ_WRITE_ALDB) & Matcher::Extended & !Matcher::AckOrNak,
            MAX_RECORDS * 2,
        );
        self.conn
            .send(READ_WRITE_ALDB, &LinkRequest::read_all().to_payload())
            .await?;

        let mut read = TableRead::default();
        let result = loop {
            let msg = match responses.recv_timeout(self.read_timeout).await {
                Ok(msg) => msg,
                Err(e) => break Err(e),
            };
            if let Some(response) = msg.link_request() {
                if read.accept(&response) {
                    break Ok(());
                }
            }
        };

        // Keep what was read even on failure; the timestamp stays unset so
        // the next access reads again
        self.cache.replace(read.records);
        result?;
        self.refreshed = Some(Instant::now());
        info!(addr = %addr, records = self.cache.len(), "Link database read");
        Ok(())
    }

    /// Writes one record at slot `index` and mirrors it locally
    pub async fn write_link(&mut self, index: usize, link: LinkRecord) -> Result<()> {
        self.cache.check_index(index)?;
        debug!(
            addr = %self.conn.address(),
            index,
            mem = mem_address(index),
            flags = ?link.flags,
            "Writing link"
        );
        self.conn
            .send(READ_WRITE_ALDB, &LinkRequest::write(index, link).to_payload())
            .await?;
        self.cache.apply_write(index, link)
    }

    /// Replaces the whole table with `links` followed by a terminator
    pub async fn write_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        for (index, link) in links.iter().enumerate() {
            let mut link = *link;
            link.flags.set_last_record(false);
            self.write_link(index, link).await?;
        }
        self.write_link(links.len(), LinkRecord::terminator()).await?;
        self.refreshed = Some(Instant::now());
        Ok(())
    }

    /// Adds `links`, reusing deleted slots before growing the table.
    ///
    /// A table that grew gets a fresh terminator, so records left behind an
    /// earlier, shorter rewrite are not read back.
    pub async fn add_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        self.refresh().await?;
        let start_len = self.cache.len();
        let mut from = 0;
        for link in links {
            let mut link = *link;
            link.flags.set_last_record(false);
            let index = self
                .cache
                .next_available(from)
                .unwrap_or_else(|| self.cache.len());
            self.write_link(index, link).await?;
            from = index + 1;
        }

        if self.cache.len() > start_len {
            self.write_link(self.cache.len(), LinkRecord::terminator()).await?;
        }
        Ok(())
    }

    /// Makes sure every record in `links` exists with the given flags.
    ///
    /// Existing records only have their flags rewritten, and only when they
    /// differ. New records take deleted slots first, then extend the table,
    /// in which case a fresh terminator follows them.
    pub async fn update_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        self.refresh().await?;

        let mut pending = Vec::new();
        for link in links {
            let mut link = *link;
            link.flags.set_last_record(false);
            match self.cache.position(&link.id()) {
                Some(index) => {
                    let mut existing = self.cache.links()[index];
                    if existing.flags != link.flags {
                        existing.flags = link.flags;
                        self.write_link(index, existing).await?;
                    }
                }
                None => pending.push(link),
            }
        }

        let start_len = self.cache.len();
        for link in pending {
            if self.cache.position(&link.id()).is_some() {
                continue;
            }
            let index = self
                .cache
                .next_available(0)
                .unwrap_or_else(|| self.cache.len());
            self.write_link(index, link).await?;
        }

        if self.cache.len() > start_len {
            self.write_link(self.cache.len(), LinkRecord::terminator()).await?;
        }
        Ok(())
    }

    /// Marks the records matching `links` as deleted
    pub async fn remove_links(&mut self, links: &[LinkRecord]) -> Result<()> {
        self.refresh().await?;
        for link in links {
            if let Some(index) = self.cache.position(&link.id()) {
                let mut tombstone = self.cache.links()[index];
                tombstone.flags.set_available();
                tombstone.flags.set_last_record(false);
                self.write_link(index, tombstone).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Address;
    use crate::protocol::RecordControlFlags;

    fn responder(n: u8) -> LinkRecord {
        LinkRecord::responder(1, Address::new(n, n, n), [0xff, 0x1f, 0x01])
    }

    fn response(index: usize, link: LinkRecord) -> LinkRequest {
        LinkRequest {
            kind: LinkRequestType::LinkResponse,
            mem_address: mem_address(index),
            num_records: 0,
            link: Some(link),
        }
    }

    #[test]
    fn test_table_read_skips_repeated_address() {
        let mut read = TableRead::default();
        assert!(!read.accept(&response(0, responder(1))));
        assert!(!read.accept(&response(0, responder(1))));
        assert!(!read.accept(&response(1, responder(2))));
        assert!(read.accept(&response(2, LinkRecord::terminator())));
        assert_eq!(read.records.len(), 2);
    }

    #[test]
    fn test_table_read_keeps_equal_records_at_different_addresses() {
        let mut read = TableRead::default();
        read.accept(&response(0, responder(1)));
        read.accept(&response(1, responder(1)));
        assert_eq!(read.records.len(), 2);
    }

    #[test]
    fn test_table_read_ignores_requests() {
        let mut read = TableRead::default();
        assert!(!read.accept(&LinkRequest::read_all()));
        assert!(read.records.is_empty());
    }

    #[test]
    fn test_write_last_record_truncates() {
        let mut cache = LinkCache::new(vec![responder(1), responder(2), responder(3)]);
        cache.apply_write(1, LinkRecord::terminator()).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.position(&responder(2).id()).is_none());
    }

    #[test]
    fn test_write_at_end_appends() {
        let mut cache = LinkCache::new(vec![responder(1)]);
        cache.apply_write(1, responder(2)).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.position(&responder(2).id()), Some(1));
    }

    #[test]
    fn test_write_in_place_overwrites() {
        let mut cache = LinkCache::new(vec![responder(1), responder(2)]);
        cache.apply_write(0, responder(3)).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(cache.position(&responder(1).id()).is_none());
        assert_eq!(cache.position(&responder(3).id()), Some(0));
    }

    #[test]
    fn test_sparse_write_rejected() {
        let mut cache = LinkCache::new(vec![responder(1)]);
        assert!(matches!(
            cache.apply_write(2, responder(2)),
            Err(Error::InvalidIndex { index: 2, len: 1 })
        ));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_next_available() {
        let mut deleted = responder(2);
        deleted.flags = RecordControlFlags::AVAILABLE;
        let cache = LinkCache::new(vec![responder(1), deleted, responder(3), deleted]);
        assert_eq!(cache.next_available(0), Some(1));
        assert_eq!(cache.next_available(2), Some(3));
        assert_eq!(cache.next_available(4), None);
    }
}
