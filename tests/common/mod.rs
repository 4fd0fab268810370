//! Simulated power-line modem with devices behind it.
//!
//! The fake sits on the far end of an in-memory duplex pipe. It reads host
//! packets in one task and answers them in another, so that anything the
//! host transmits early shows up in the event log ahead of the answer to
//! the previous request.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::codec::Encoder;

use insteon_plm::core::{Address, Command, Config};
use insteon_plm::protocol::commands::READ_WRITE_ALDB;
use insteon_plm::protocol::link::mem_address;
use insteon_plm::protocol::{
    Flags, LinkRecord, LinkRequest, LinkRequestType, Message, MessageType, Packet, PacketCodec,
    PlmCommand,
};

pub const MODEM: Address = Address::new(0x44, 0x85, 0x11);

const ACK: u8 = 0x06;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Short timeouts so failure paths finish quickly
pub fn test_config() -> Config {
    Config {
        ack_timeout: Duration::from_secs(1),
        read_timeout: Duration::from_secs(1),
        ..Config::default()
    }
}

pub fn responder(n: u8) -> LinkRecord {
    LinkRecord::responder(1, Address::new(n, n, n), [0xff, 0x1f, 0x01])
}

pub fn controller(n: u8) -> LinkRecord {
    LinkRecord::controller(1, Address::new(n, n, n), [0x03, 0x00, 0x00])
}

/// A device answering on the simulated power line
#[derive(Debug, Clone)]
pub struct FakeDevice {
    pub address: Address,
    /// cmd2 of the engine version ack
    pub engine: u8,
    /// Category, subcategory and firmware sent after an ID request
    pub product: [u8; 3],
    /// Link memory in slot order. Reads stop at the first last-record entry
    /// and anything behind it stays in memory, as on a real device. A
    /// missing terminator is implied at the end.
    pub aldb: Vec<LinkRecord>,
    /// Never answers
    pub silent: bool,
    /// Sends every link response twice
    pub repeat_link_responses: bool,
    /// Delay before the modem echoes a message to this device
    pub echo_delay: Duration,
    pub ack_delay: Duration,
    /// Link writes after this many successful ones are refused
    pub fail_writes_after: Option<usize>,
    /// Nak sub-code returned for every command instead of an ack
    pub nak: Option<u8>,
    pub level: u8,
}

impl FakeDevice {
    pub fn new(address: Address) -> Self {
        FakeDevice {
            address,
            engine: 0x02,
            product: [0x01, 0x20, 0x45],
            aldb: Vec::new(),
            silent: false,
            repeat_link_responses: false,
            echo_delay: Duration::ZERO,
            ack_delay: Duration::ZERO,
            fail_writes_after: None,
            nak: None,
            level: 0,
        }
    }

    pub fn with_links(mut self, links: Vec<LinkRecord>) -> Self {
        self.aldb = links;
        self
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    /// A message the host asked the modem to send
    Received(Message),
    /// The device ack went out for a message from the host
    Acked(Address),
}

#[derive(Default)]
struct State {
    devices: HashMap<Address, FakeDevice>,
    events: Vec<Event>,
    aldb_reads: usize,
    aldb_writes: usize,
}

#[derive(Clone)]
pub struct FakePlm {
    state: Arc<Mutex<State>>,
    writer: Arc<tokio::sync::Mutex<WriteHalf<DuplexStream>>>,
}

impl FakePlm {
    /// Starts the fake; the returned stream is the host side of the pipe
    pub fn start(devices: Vec<FakeDevice>) -> (FakePlm, DuplexStream) {
        init_tracing();
        let (host, plm) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(plm);

        let mut state = State::default();
        for device in devices {
            state.devices.insert(device.address, device);
        }
        let fake = FakePlm {
            state: Arc::new(Mutex::new(state)),
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(read_host(reader, fake.clone(), tx));
        tokio::spawn(fake.clone().respond(rx));
        (fake, host)
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    /// Messages the host sent to `address`, in order
    pub fn received(&self, address: Address) -> Vec<Message> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Received(msg) if msg.dst == address => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn aldb_reads(&self) -> usize {
        self.state.lock().unwrap().aldb_reads
    }

    pub fn aldb_writes(&self) -> usize {
        self.state.lock().unwrap().aldb_writes
    }

    pub fn aldb(&self, address: Address) -> Vec<LinkRecord> {
        self.state
            .lock()
            .unwrap()
            .devices
            .get(&address)
            .map(|d| d.aldb.clone())
            .unwrap_or_default()
    }

    /// The records a read would return: memory up to the first terminator
    pub fn links(&self, address: Address) -> Vec<LinkRecord> {
        self.aldb(address)
            .into_iter()
            .take_while(|link| !link.flags.last_record())
            .collect()
    }

    pub fn level(&self, address: Address) -> u8 {
        self.state.lock().unwrap().devices.get(&address).map_or(0, |d| d.level)
    }

    /// Delivers `msg` to the host as if it had been received off the line
    pub async fn inject(&self, msg: &Message) {
        let command = if msg.is_extended() {
            PlmCommand::EXTENDED_MESSAGE_RECEIVED
        } else {
            PlmCommand::STANDARD_MESSAGE_RECEIVED
        };
        self.send_packet(&Packet::new(command, msg.to_bytes())).await;
    }

    /// Writes raw bytes to the host
    pub async fn inject_raw(&self, bytes: &[u8]) {
        let mut writer = self.writer.lock().await;
        let _ = writer.write_all(bytes).await;
    }

    async fn send_packet(&self, packet: &Packet) {
        let mut buf = BytesMut::new();
        let _ = PacketCodec::new().encode(packet, &mut buf);
        self.inject_raw(&buf).await;
    }

    fn push_event(&self, event: Event) {
        self.state.lock().unwrap().events.push(event);
    }

    async fn respond(self, mut rx: mpsc::UnboundedReceiver<(u8, Vec<u8>)>) {
        while let Some((command, body)) = rx.recv().await {
            match PlmCommand(command) {
                PlmCommand::GET_INFO => {
                    let mut payload = MODEM.0.to_vec();
                    payload.extend_from_slice(&[0x03, 0x15, 0x9b]);
                    self.echo(PlmCommand::GET_INFO, payload).await;
                }
                PlmCommand::SEND_INSTEON_MESSAGE => {
                    let delay = self.echo_delay(&body);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    self.echo(PlmCommand::SEND_INSTEON_MESSAGE, body.clone()).await;
                    if let Some(msg) = host_message(&body) {
                        self.answer(msg).await;
                    }
                }
                other => {
                    let mut packet = Packet::new(other, body);
                    packet.ack = Some(0x15);
                    self.send_packet(&packet).await;
                }
            }
        }
    }

    fn echo_delay(&self, body: &[u8]) -> Duration {
        let Some(dst) = body.get(..3) else {
            return Duration::ZERO;
        };
        let dst = Address::new(dst[0], dst[1], dst[2]);
        let state = self.state.lock().unwrap();
        state.devices.get(&dst).map_or(Duration::ZERO, |d| d.echo_delay)
    }

    async fn echo(&self, command: PlmCommand, payload: Vec<u8>) {
        let mut packet = Packet::new(command, payload);
        packet.ack = Some(ACK);
        self.send_packet(&packet).await;
    }

    async fn answer(&self, msg: Message) {
        let device = {
            let state = self.state.lock().unwrap();
            state.devices.get(&msg.dst).cloned()
        };
        let Some(device) = device else {
            return;
        };
        if device.silent {
            return;
        }
        if !device.ack_delay.is_zero() {
            tokio::time::sleep(device.ack_delay).await;
        }

        let cmd1 = msg.command.cmd1();
        let nak = device.nak.or_else(|| self.refused_write(&device, &msg));
        if let Some(code) = nak {
            let nak = reply(&device, MessageType::DirectNak, Command::standard(cmd1, code));
            self.push_event(Event::Acked(device.address));
            self.inject(&nak).await;
            return;
        }

        let mut follow_up = Vec::new();
        let cmd2 = match cmd1 {
            0x0d => device.engine,
            0x10 => {
                let [cat, subcat, firmware] = device.product;
                follow_up.push(Message::standard(
                    device.address,
                    Address::new(cat, subcat, firmware),
                    Flags::new(MessageType::Broadcast, false, 3, 3),
                    Command::standard(0x01, 0x00),
                ));
                msg.command.cmd2()
            }
            0x11 => {
                self.update(device.address, |d| d.level = msg.command.cmd2());
                msg.command.cmd2()
            }
            0x13 => {
                self.update(device.address, |d| d.level = 0);
                0x00
            }
            0x19 => device.level,
            0x2f => {
                follow_up = self.link_request(&device, &msg);
                msg.command.cmd2()
            }
            _ => msg.command.cmd2(),
        };
        // Status acks carry the database delta in cmd1
        let ack_cmd1 = if cmd1 == 0x19 { 0x00 } else { cmd1 };

        let ack = reply(&device, MessageType::DirectAck, Command::standard(ack_cmd1, cmd2));
        self.push_event(Event::Acked(device.address));
        self.inject(&ack).await;
        for msg in follow_up {
            self.inject(&msg).await;
        }
    }

    fn update(&self, address: Address, f: impl FnOnce(&mut FakeDevice)) {
        if let Some(device) = self.state.lock().unwrap().devices.get_mut(&address) {
            f(device);
        }
    }

    /// Illegal-value nak for a link write past the configured fault point
    fn refused_write(&self, device: &FakeDevice, msg: &Message) -> Option<u8> {
        let limit = device.fail_writes_after?;
        let request = LinkRequest::from_payload(&msg.payload).ok()?;
        if msg.command.cmd1() != 0x2f || request.kind != LinkRequestType::WriteLink {
            return None;
        }
        (self.aldb_writes() >= limit).then_some(0xfb)
    }

    /// Applies a link database request and returns the responses to stream
    fn link_request(&self, device: &FakeDevice, msg: &Message) -> Vec<Message> {
        let Ok(request) = LinkRequest::from_payload(&msg.payload) else {
            return Vec::new();
        };
        match request.kind {
            LinkRequestType::ReadLink => {
                self.state.lock().unwrap().aldb_reads += 1;
                let mut records: Vec<LinkRecord> = Vec::new();
                for link in &device.aldb {
                    records.push(*link);
                    if link.flags.last_record() {
                        break;
                    }
                }
                if records.last().map_or(true, |l| !l.flags.last_record()) {
                    records.push(LinkRecord::terminator());
                }

                let mut responses = Vec::new();
                for (index, link) in records.into_iter().enumerate() {
                    let response = LinkRequest {
                        kind: LinkRequestType::LinkResponse,
                        mem_address: mem_address(index),
                        num_records: 0,
                        link: Some(link),
                    };
                    let msg = Message::extended(
                        device.address,
                        MODEM,
                        Flags::new(MessageType::Direct, true, 3, 3),
                        READ_WRITE_ALDB,
                        &response.to_payload(),
                    );
                    if device.repeat_link_responses {
                        responses.push(msg.clone());
                    }
                    responses.push(msg);
                }
                responses
            }
            LinkRequestType::WriteLink => {
                let index = usize::from(0x0fff - request.mem_address) / 8;
                let mut state = self.state.lock().unwrap();
                state.aldb_writes += 1;
                if let (Some(device), Some(link)) = (state.devices.get_mut(&device.address), request.link) {
                    // Slots never written before read back as terminators
                    if index >= device.aldb.len() {
                        device.aldb.resize(index + 1, LinkRecord::terminator());
                    }
                    device.aldb[index] = link;
                }
                Vec::new()
            }
            LinkRequestType::LinkResponse => Vec::new(),
        }
    }
}

fn reply(device: &FakeDevice, kind: MessageType, command: Command) -> Message {
    Message::standard(device.address, MODEM, Flags::new(kind, false, 3, 3), command)
}

/// The modem sends with its own address as source
fn host_message(body: &[u8]) -> Option<Message> {
    let mut buf = MODEM.0.to_vec();
    buf.extend_from_slice(body);
    Message::from_bytes(&buf).ok()
}

/// Splits host bytes into `(command, body)` pairs
async fn read_host(
    mut reader: ReadHalf<DuplexStream>,
    fake: FakePlm,
    tx: mpsc::UnboundedSender<(u8, Vec<u8>)>,
) {
    loop {
        let Ok(sync) = reader.read_u8().await else {
            return;
        };
        if sync != 0x02 {
            continue;
        }
        let Ok(command) = reader.read_u8().await else {
            return;
        };
        // Host commands carry less than the modem's answer to them
        let mut body = match command {
            0x60 => Vec::new(),
            0x62 => vec![0u8; 6],
            _ => continue,
        };
        if reader.read_exact(&mut body).await.is_err() {
            return;
        }
        if command == 0x62 && Flags(body[3]).is_extended() {
            let mut payload = vec![0u8; 14];
            if reader.read_exact(&mut payload).await.is_err() {
                return;
            }
            body.extend_from_slice(&payload);
        }
        if command == 0x62 {
            if let Some(msg) = host_message(&body) {
                fake.push_event(Event::Received(msg));
            }
        }
        if tx.send((command, body)).is_err() {
            return;
        }
    }
}
