//! Modem access and connection multiplexing
//!
//! A single task owns the serial transport. Every write from every
//! connection goes through its FIFO queue, and everything the modem reports
//! that is not an answer to the request in flight is fanned out to
//! subscribers.

mod connection;
mod mux;
pub mod serial;

pub use self::connection::{Connection, Subscription};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::core::{Address, Config, EngineVersion, Error, Result, MAX_HOPS};
use crate::protocol::{Matcher, Message, ModemInfo, Packet, PlmCommand};
use crate::util::{propagation_delay, DuplicateFilter};
use self::mux::{Control, Multiplexer, Request};

/// Handle to a running power-line modem.
///
/// Cheap to clone; all clones talk to the same multiplexer task.
#[derive(Clone)]
pub struct Modem {
    control: mpsc::UnboundedSender<Control>,
    config: Arc<Config>,
    next_id: Arc<AtomicU64>,
}

impl Modem {
    /// Starts the reader and multiplexer tasks on `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T>(transport: T, config: &Config) -> Result<Self>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        config.validate()?;
        let (reader, writer) = tokio::io::split(transport);
        let (control, control_rx) = mpsc::unbounded_channel();
        let dedup = config
            .dedup
            .then(|| DuplicateFilter::new(propagation_delay(MAX_HOPS, true)));
        let mux = Multiplexer::new(reader, writer, control_rx, config.ack_timeout, dedup);
        tokio::spawn(mux.run());

        Ok(Modem {
            control,
            config: Arc::new(config.clone()),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Opens the serial port named in the configuration
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        let transport = serial::open(&config.port, config.baud_rate)?;
        Modem::new(transport, config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns a connection to the device at `address`
    pub fn connect(&self, address: Address, engine: EngineVersion) -> Connection {
        Connection::new(self.clone(), address, engine)
    }

    /// Sends a host command and returns the modem's echo of it
    pub async fn write_packet(&self, packet: Packet) -> Result<Packet> {
        let (reply, rx) = oneshot::channel();
        self.submit(Request::Command { packet, reply })?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Queries the modem's own address, category and firmware
    pub async fn info(&self) -> Result<ModemInfo> {
        let echo = self.write_packet(Packet::new(PlmCommand::GET_INFO, Vec::new())).await?;
        ModemInfo::from_packet(&echo)
    }

    pub(crate) async fn write_message(&self, message: Message) -> Result<Message> {
        let (reply, rx) = oneshot::channel();
        self.submit(Request::Message { message, reply })?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Subscribes to unsolicited messages from any device
    pub fn subscribe(&self, matcher: Matcher) -> Subscription {
        self.subscribe_with_capacity(matcher, self.config.subscriber_buffer)
    }

    /// Like [`Modem::subscribe`] with a buffer of `capacity` messages, for
    /// readers expecting a burst larger than the configured buffer
    pub fn subscribe_with_capacity(&self, matcher: Matcher, capacity: usize) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(capacity.max(1));
        // If the modem is closed the sender is dropped and rx reports closed
        let _ = self.control.send(Control::Subscribe { id, matcher, tx });
        Subscription::new(id, rx, self.control.clone())
    }

    /// Stops the modem tasks; pending writes fail with `Closed`
    pub fn close(&self) {
        let _ = self.control.send(Control::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }

    fn submit(&self, request: Request) -> Result<()> {
        self.control
            .send(Control::Write(request))
            .map_err(|_| Error::Closed)
    }
}
