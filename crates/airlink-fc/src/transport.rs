use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use mavlink::common::MavMessage;
use mavlink::error::{MessageReadError, MessageWriteError};
use mavlink::{MavConnection, MavHeader};
use thiserror::Error;
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("cannot open serial device {dev}: {source}")]
    Device {
        dev: String,
        source: tokio_serial::Error,
    },
    #[error("mavlink connect {url} failed: {source}")]
    Link { url: String, source: io::Error },
}

#[derive(Debug, Error)]
pub enum ReadError {
    /// No complete frame arrived within the port poll interval.
    #[error("read timed out")]
    Timeout,
    /// A frame arrived but did not decode; the stream itself is fine.
    #[error("bad frame: {0}")]
    Frame(String),
    #[error("link closed: {0}")]
    Closed(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("link closed")]
    Closed,
    #[error("serial write failed: {0}")]
    Io(#[from] io::Error),
}

/// One whole MAVLink message per call in either direction; callers never see
/// a partially decoded or partially written frame.
pub trait Transport: Send + Sync {
    /// Blocking read of the next decoded message. `Timeout` means try again.
    fn read_message(&self) -> Result<(MavHeader, MavMessage), ReadError>;

    /// Blocking serialize-and-send with per-connection sequence numbering.
    fn write_message(&self, msg: &MavMessage) -> Result<usize, WriteError>;

    /// Idempotent; callable from any thread. Later reads and writes fail
    /// with `Closed`.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Serial MAVLink connection.
///
/// Duplex note: the underlying connection keeps independent read-side and
/// write-side locks, so a blocked read does not hold up a pending write.
/// Each side still moves whole messages at a time.
pub struct SerialTransport {
    conn: Box<dyn MavConnection<MavMessage> + Sync + Send>,
    header: Mutex<MavHeader>,
    closed: AtomicBool,
    dev: String,
}

impl SerialTransport {
    /// Opens `dev` at `baud`. The device is probed with tokio-serial first so
    /// a bad path, missing permission or unusable rate fails with the serial
    /// layer's error instead of a generic connect failure.
    pub fn open(dev: &str, baud: u32, sys_id: u8, comp_id: u8) -> Result<Self, ConnectionError> {
        let probe = tokio_serial::new(dev, baud)
            .open_native_async()
            .map_err(|source| ConnectionError::Device {
                dev: dev.to_string(),
                source,
            })?;
        drop(probe);

        let url = format!("serial:{}:{}", dev, baud);
        let conn =
            mavlink::connect::<MavMessage>(&url).map_err(|source| ConnectionError::Link {
                url: url.clone(),
                source,
            })?;
        info!(dev, baud, "serial link open");

        Ok(Self {
            conn,
            header: Mutex::new(MavHeader {
                system_id: sys_id,
                component_id: comp_id,
                sequence: 0,
            }),
            closed: AtomicBool::new(false),
            dev: dev.to_string(),
        })
    }
}

impl Transport for SerialTransport {
    fn read_message(&self) -> Result<(MavHeader, MavMessage), ReadError> {
        if self.is_closed() {
            return Err(ReadError::Closed("closed locally".into()));
        }
        match self.conn.recv() {
            Ok(pair) => Ok(pair),
            Err(MessageReadError::Io(e))
                if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
            {
                Err(ReadError::Timeout)
            }
            Err(MessageReadError::Io(e)) => {
                // serial errors other than a timeout mean the port is gone
                self.closed.store(true, Ordering::Release);
                Err(ReadError::Closed(e.to_string()))
            }
            Err(other) => Err(ReadError::Frame(other.to_string())),
        }
    }

    fn write_message(&self, msg: &MavMessage) -> Result<usize, WriteError> {
        if self.is_closed() {
            return Err(WriteError::Closed);
        }
        let header = {
            let mut h = self.header.lock().unwrap();
            h.sequence = h.sequence.wrapping_add(1);
            *h
        };
        match self.conn.send(&header, msg) {
            Ok(n) => Ok(n),
            Err(MessageWriteError::Io(e)) => Err(WriteError::Io(e)),
        }
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(dev = %self.dev, "serial link closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
