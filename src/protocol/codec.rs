use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::core::{Error, Result};
use super::packet::{Packet, PlmCommand, SYNC};

/// Codec framing the PLM serial byte stream into packets
#[derive(Clone, Default)]
pub struct PacketCodec;

impl PacketCodec {
    /// Creates a new packet codec
    pub fn new() -> Self {
        PacketCodec
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        // Skip anything in front of the next sync byte
        match src.iter().position(|b| *b == SYNC) {
            Some(0) => {}
            Some(skip) => {
                debug!(skipped = skip, "Lost sync, dropping bytes");
                src.advance(skip);
            }
            None => {
                if !src.is_empty() {
                    debug!(skipped = src.len(), "Lost sync, dropping bytes");
                    src.clear();
                }
                return Ok(None);
            }
        }

        if src.len() < 2 {
            return Ok(None);
        }

        let command = PlmCommand(src[1]);
        let body_len = match command.body_len() {
            Some(len) => len,
            None => {
                // Drop the sync byte so the next decode rescans from here
                src.advance(1);
                return Err(Error::UnknownCommand(command.0));
            }
        };

        let mut frame_len = 2 + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }
        let body_len = body_len + Packet::extra_len(command, &src[2..frame_len]);
        frame_len = 2 + body_len;
        if command.is_host_command() {
            frame_len += 1;
        }
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let packet = Packet {
            command,
            payload: frame[2..2 + body_len].to_vec(),
            ack: command.is_host_command().then(|| frame[frame_len - 1]),
        };
        trace!(?packet, "Decoded packet");
        Ok(Some(packet))
    }
}

impl Encoder<&Packet> for PacketCodec {
    type Error = Error;

    fn encode(&mut self, item: &Packet, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        dst.reserve(3 + item.payload.len());
        dst.put_u8(SYNC);
        dst.put_u8(item.command.0);
        dst.put_slice(&item.payload);
        if let Some(ack) = item.ack {
            dst.put_u8(ack);
        }
        Ok(())
    }
}

/// Reads packets from the modem side of the serial stream
pub struct PacketReader<R> {
    inner: R,
    codec: PacketCodec,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(inner: R) -> Self {
        PacketReader {
            inner,
            codec: PacketCodec::new(),
            buffer: BytesMut::with_capacity(256),
        }
    }

    /// Reads the next packet.
    ///
    /// Framing errors consume the offending sync byte before they are
    /// returned, so calling again resumes with the following bytes.
    pub async fn read_packet(&mut self) -> Result<Packet> {
        loop {
            if let Some(packet) = self.codec.decode(&mut self.buffer)? {
                return Ok(packet);
            }
            if self.inner.read_buf(&mut self.buffer).await? == 0 {
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
        }
    }
}

/// Writes framed packets to the serial stream
pub struct PacketWriter<W> {
    inner: W,
    codec: PacketCodec,
    buffer: BytesMut,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(inner: W) -> Self {
        PacketWriter {
            inner,
            codec: PacketCodec::new(),
            buffer: BytesMut::with_capacity(32),
        }
    }

    /// Frames the packet and hands it to the stream in one buffer
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        self.buffer.clear();
        self.codec.encode(packet, &mut self.buffer)?;
        self.inner.write_all(&self.buffer).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
