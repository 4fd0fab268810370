//! Serial port transport
//!
//! `serialport` is blocking, so two blocking tasks pump bytes between the
//! port and one end of an in-memory duplex pipe; the other end is handed
//! to the modem.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::core::{Error, Result};

const PIPE_CAPACITY: usize = 1024;
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Opens the PLM serial port (8N1) as an async byte stream
pub fn open(path: &str, baud_rate: u32) -> Result<DuplexStream> {
    let mut port_rx = serialport::new(path, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(|e| Error::transport(format!("Failed to open {path}: {e}")))?;
    let mut port_tx = port_rx
        .try_clone()
        .map_err(|e| Error::transport(format!("Failed to clone {path}: {e}")))?;

    let (local, remote) = tokio::io::duplex(PIPE_CAPACITY);
    let (mut pipe_rx, mut pipe_tx) = tokio::io::split(remote);
    let closed = Arc::new(AtomicBool::new(false));
    let handle = Handle::current();

    let reader_closed = closed.clone();
    let reader_handle = handle.clone();
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 256];
        while !reader_closed.load(Ordering::Relaxed) {
            match port_rx.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    if reader_handle.block_on(pipe_tx.write_all(&buf[..n])).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => {
                    warn!(error = %e, "Serial read failed");
                    break;
                }
            }
        }
        debug!("Serial reader stopped");
    });

    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 256];
        loop {
            match handle.block_on(pipe_rx.read(&mut buf)) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if let Err(e) = port_tx.write_all(&buf[..n]).and_then(|_| port_tx.flush()) {
                        warn!(error = %e, "Serial write failed");
                        break;
                    }
                }
            }
        }
        closed.store(true, Ordering::Relaxed);
        debug!("Serial writer stopped");
    });

    debug!(path, baud_rate, "Serial port open");
    Ok(local)
}
