use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, trace, warn};

use crate::core::{Error, Result};
use crate::protocol::commands::STATUS_REQUEST;
use crate::protocol::{Matcher, Message, Packet, PacketReader, PacketWriter};
use crate::util::DuplicateFilter;

/// Depth of the reader -> multiplexer packet channel
const PACKET_CHANNEL_DEPTH: usize = 64;

/// A queued request and the channel its answer goes back on
pub(crate) enum Request {
    /// Host command, answered by the modem echo
    Command {
        packet: Packet,
        reply: oneshot::Sender<Result<Packet>>,
    },
    /// Direct message, answered by the device ack or nak
    Message {
        message: Message,
        reply: oneshot::Sender<Result<Message>>,
    },
}

impl Request {
    fn packet(&self) -> Packet {
        match self {
            Request::Command { packet, .. } => packet.clone(),
            Request::Message { message, .. } => Packet::send_message(message),
        }
    }

    fn fail(self, err: Error) {
        // The caller may have given up; nobody to tell then
        match self {
            Request::Command { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Request::Message { reply, .. } => {
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Checks an ack against the sent message.
    ///
    /// The wire has no correlation id, so source address and cmd1 are
    /// compared. Status request acks carry the ALDB delta in cmd1.
    fn accepts(&self, ack: &Message) -> bool {
        match self {
            Request::Message { message, .. } => {
                ack.src == message.dst
                    && (message.command.same_kind(&STATUS_REQUEST)
                        || ack.command.cmd1() == message.command.cmd1())
            }
            Request::Command { .. } => false,
        }
    }
}

/// Messages from handles to the multiplexer task
pub(crate) enum Control {
    Write(Request),
    Subscribe {
        id: u64,
        matcher: Matcher,
        tx: mpsc::Sender<Message>,
    },
    Unsubscribe(u64),
    Close,
}

enum Stage {
    AwaitEcho,
    AwaitAck,
}

struct InFlight {
    request: Request,
    sent: Packet,
    stage: Stage,
    deadline: Instant,
}

struct Subscriber {
    id: u64,
    matcher: Matcher,
    tx: mpsc::Sender<Message>,
}

/// Owns the transport and serializes every conversation with the modem.
///
/// Exactly one request is in flight at a time: the next queued request is
/// not transmitted until the current one got its ack or timed out.
pub(crate) struct Multiplexer<W> {
    writer: PacketWriter<W>,
    control: mpsc::UnboundedReceiver<Control>,
    packets: mpsc::Receiver<Result<Packet>>,
    reader: JoinHandle<()>,
    queue: VecDeque<Request>,
    in_flight: Option<InFlight>,
    subscribers: Vec<Subscriber>,
    dedup: Option<DuplicateFilter>,
    ack_timeout: Duration,
}

impl<W: AsyncWrite + Unpin> Multiplexer<W> {
    pub(crate) fn new<R>(
        reader: R,
        writer: W,
        control: mpsc::UnboundedReceiver<Control>,
        ack_timeout: Duration,
        dedup: Option<DuplicateFilter>,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, packets) = mpsc::channel(PACKET_CHANNEL_DEPTH);
        let reader = tokio::spawn(read_loop(PacketReader::new(reader), tx));
        Multiplexer {
            writer: PacketWriter::new(writer),
            control,
            packets,
            reader,
            queue: VecDeque::new(),
            in_flight: None,
            subscribers: Vec::new(),
            dedup,
            ack_timeout,
        }
    }

    /// Runs until closed or until the transport fails
    pub(crate) async fn run(mut self) {
        loop {
            if self.in_flight.is_none() {
                self.start_next().await;
            }
            let deadline = self.in_flight.as_ref().map(|f| f.deadline);

            tokio::select! {
                control = self.control.recv() => match control {
                    Some(Control::Close) | None => break,
                    Some(control) => self.handle_control(control),
                },
                packet = self.packets.recv() => match packet {
                    Some(Ok(packet)) => self.handle_packet(packet),
                    Some(Err(e)) => {
                        warn!(error = %e, "Transport failed, closing modem");
                        break;
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.expire();
                }
            }
        }
        self.shutdown().await;
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Write(request) => {
                self.queue.push_back(request);
                trace!(queued = self.queue.len(), "Write queued");
            }
            Control::Subscribe { id, matcher, tx } => {
                debug!(id, ?matcher, "Subscriber added");
                self.subscribers.push(Subscriber { id, matcher, tx });
            }
            Control::Unsubscribe(id) => {
                // Dropping the sender closes the subscriber's channel
                self.subscribers.retain(|s| s.id != id);
                debug!(id, "Subscriber removed");
            }
            Control::Close => {}
        }
    }

    /// Transmits the next queued request, if any
    async fn start_next(&mut self) {
        while let Some(request) = self.queue.pop_front() {
            let sent = request.packet();
            match self.writer.write_packet(&sent).await {
                Ok(()) => {
                    debug!(command = ?sent.command, "Packet sent, awaiting echo");
                    self.in_flight = Some(InFlight {
                        request,
                        sent,
                        stage: Stage::AwaitEcho,
                        deadline: Instant::now() + self.ack_timeout,
                    });
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to write packet");
                    request.fail(e);
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        if packet.command.is_host_command() {
            self.handle_echo(packet);
            return;
        }
        if !packet.carries_message() {
            debug!(command = ?packet.command, "Ignoring unsolicited modem packet");
            return;
        }

        let msg = match packet.message() {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Undecodable message packet");
                return;
            }
        };
        if msg.is_ack() || msg.is_nak() {
            self.handle_ack(msg);
        } else {
            self.dispatch(msg);
        }
    }

    /// The echo repeats what was sent; queries such as Get IM Info append
    /// their answer to it
    fn handle_echo(&mut self, packet: Packet) {
        let matches = matches!(
            &self.in_flight,
            Some(InFlight { sent, stage: Stage::AwaitEcho, .. })
                if sent.command == packet.command && packet.payload.starts_with(&sent.payload)
        );
        if !matches {
            debug!(command = ?packet.command, "Dropping echo with no waiter");
            return;
        }

        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        if packet.is_nak() {
            debug!(command = ?packet.command, "Modem NAK");
            in_flight.request.fail(Error::ModemNak(packet.command.0));
            return;
        }

        match in_flight.request {
            Request::Command { reply, .. } => {
                let _ = reply.send(Ok(packet));
            }
            request @ Request::Message { .. } => {
                trace!("Echo received, awaiting device ack");
                // The device gets a full timeout of its own; the echo wait
                // does not eat into it
                self.in_flight = Some(InFlight {
                    request,
                    sent: in_flight.sent,
                    stage: Stage::AwaitAck,
                    deadline: Instant::now() + self.ack_timeout,
                });
            }
        }
    }

    fn handle_ack(&mut self, ack: Message) {
        let matches = matches!(
            &self.in_flight,
            Some(InFlight { request, stage: Stage::AwaitAck, .. }) if request.accepts(&ack)
        );
        if !matches {
            debug!(src = %ack.src, command = %ack.command, "Dropping ack with no waiter");
            return;
        }

        if let Some(InFlight {
            request: Request::Message { reply, .. },
            ..
        }) = self.in_flight.take()
        {
            debug!(src = %ack.src, nak = ack.is_nak(), "Ack received");
            let _ = reply.send(Ok(ack));
        }
    }

    /// Copies an unsolicited message to every matching subscriber
    fn dispatch(&mut self, msg: Message) {
        if let Some(filter) = self.dedup.as_mut() {
            if filter.is_duplicate(&msg) {
                trace!(src = %msg.src, command = %msg.command, "Dropping relayed duplicate");
                return;
            }
        }

        self.subscribers.retain(|sub| {
            if !sub.matcher.matches(&msg) {
                return true;
            }
            match sub.tx.try_send(msg.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(id = sub.id, src = %msg.src, "Subscriber buffer full, dropping message");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    fn expire(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            warn!(command = ?in_flight.sent.command, "Timed out waiting for ack");
            in_flight.request.fail(Error::AckTimeout);
        }
    }

    async fn shutdown(&mut self) {
        if let Some(in_flight) = self.in_flight.take() {
            in_flight.request.fail(Error::Closed);
        }
        for request in self.queue.drain(..) {
            request.fail(Error::Closed);
        }
        self.subscribers.clear();
        self.reader.abort();
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "Transport shutdown failed");
        }
        debug!("Multiplexer stopped");
    }
}

/// Frames packets off the transport and feeds them to the multiplexer.
/// Framing errors are skipped; I/O errors end the loop.
async fn read_loop<R: AsyncRead + Unpin>(mut reader: PacketReader<R>, tx: mpsc::Sender<Result<Packet>>) {
    loop {
        match reader.read_packet().await {
            Ok(packet) => {
                if tx.send(Ok(packet)).await.is_err() {
                    break;
                }
            }
            Err(Error::Io(e)) => {
                let _ = tx.send(Err(Error::Io(e))).await;
                break;
            }
            Err(e) => warn!(error = %e, "Framing error, resynchronizing"),
        }
    }
}
