use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::{Address, Command, EngineVersion, Error, Result};
use crate::protocol::{Flags, Matcher, Message};
use super::mux::Control;
use super::Modem;

/// A registration for unsolicited messages.
///
/// Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Message>,
    control: mpsc::UnboundedSender<Control>,
    registered: bool,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        rx: mpsc::Receiver<Message>,
        control: mpsc::UnboundedSender<Control>,
    ) -> Self {
        Subscription {
            id,
            rx,
            control,
            registered: true,
        }
    }

    /// Next matching message; `None` once unsubscribed or the modem closed
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Next matching message, waiting at most `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(msg),
            Ok(None) => Err(Error::Closed),
            Err(_) => Err(Error::ReadTimeout),
        }
    }

    /// Removes the registration. Calling it again does nothing.
    pub fn unsubscribe(&mut self) {
        if !self.registered {
            return;
        }
        self.registered = false;
        self.rx.close();
        // The modem may already be gone, which unsubscribes too
        let _ = self.control.send(Control::Unsubscribe(self.id));
    }
}

impl Stream for Subscription {
    type Item = Message;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Message>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Request/response access to one device through the shared modem
#[derive(Clone)]
pub struct Connection {
    modem: Modem,
    address: Address,
    engine: EngineVersion,
}

impl Connection {
    pub(crate) fn new(modem: Modem, address: Address, engine: EngineVersion) -> Self {
        Connection {
            modem,
            address,
            engine,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn engine_version(&self) -> EngineVersion {
        self.engine
    }

    pub fn set_engine_version(&mut self, engine: EngineVersion) {
        self.engine = engine;
    }

    pub fn modem(&self) -> &Modem {
        &self.modem
    }

    /// Sends `msg` to this device and waits for its ack or nak.
    ///
    /// The destination is set to this device and extended messages to I2CS
    /// devices get their checksum. A nak is returned as a message, not an
    /// error; see [`Connection::send`] for the translating variant.
    pub async fn write(&self, mut msg: Message) -> Result<Message> {
        msg.dst = self.address;
        if msg.is_extended() && self.engine.requires_checksum() {
            msg.set_checksum();
        }
        debug!(addr = %self.address, command = %msg.command, "Writing message");
        self.modem.write_message(msg).await
    }

    /// Sends a direct command and translates a nak into an error
    pub async fn send(&self, command: Command, payload: &[u8]) -> Result<Message> {
        let flags = Flags::direct(command.is_extended(), self.modem.config().max_hops);
        let msg = if command.is_extended() {
            Message::extended(Address::default(), self.address, flags, command, payload)
        } else {
            Message::standard(Address::default(), self.address, flags, command)
        };

        let ack = self.write(msg).await?;
        if ack.is_nak() {
            return Err(Error::from_nak(self.engine, &ack));
        }
        Ok(ack)
    }

    /// Subscribes to messages from this device that also match `matcher`
    pub fn subscribe(&self, matcher: Matcher) -> Subscription {
        self.modem.subscribe(Matcher::src(self.address) & matcher)
    }

    /// Subscribes with room for `capacity` messages
    pub fn subscribe_with_capacity(&self, matcher: Matcher, capacity: usize) -> Subscription {
        self.modem
            .subscribe_with_capacity(Matcher::src(self.address) & matcher, capacity)
    }

    /// Waits for the next message from this device matching `matcher`
    pub async fn read(&self, matcher: Matcher, timeout: Duration) -> Result<Message> {
        let mut sub = self.subscribe(matcher);
        sub.recv_timeout(timeout).await
    }

    /// Sends a command and waits for the response message it triggers.
    ///
    /// The subscription is in place before the command goes out so a fast
    /// response cannot be missed.
    pub async fn request(&self, command: Command, payload: &[u8], response: Matcher) -> Result<Message> {
        let mut sub = self.subscribe(response);
        self.send(command, payload).await?;
        sub.recv_timeout(self.modem.config().read_timeout).await
    }
}
