//! Framed connection to Core
//!
//! Wraps a TCP stream with:
//! - Frame encoding/decoding
//! - Timeouts on connect, reads and writes
//! - Detection of peers closing mid-frame

use bytes::{Bytes, BytesMut};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::client::{ClientError, ClientResult};
use crate::protocol::{encode_frame, Frame, FrameDecoder, FramingError, MessageType, HEADER_SIZE};

/// Read buffer growth per read
const READ_CHUNK: usize = 4096;

/// Connection errors
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Cannot connect to Core at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Timeout {op} {addr} after {after:?}")]
    Timeout {
        addr: String,
        op: &'static str,
        after: Duration,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection closed")]
    Closed,
}

/// Unexpected bytes or message flow from Core
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Unexpected message type: {got} (expected {expected})")]
    UnexpectedType { expected: MessageType, got: u8 },

    #[error("Incomplete {part}: received {received} of {expected} bytes")]
    Incomplete {
        part: &'static str,
        expected: usize,
        received: usize,
    },
}

/// Sort an I/O failure into connectivity loss or an unexpected condition
pub(crate) fn classify_io(err: io::Error) -> ClientError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::TimedOut
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::AddrNotAvailable => ConnectionError::Io(err).into(),
        _ => ClientError::Unexpected(err.to_string()),
    }
}

/// Write one complete frame, bounded by `timeout`
pub(crate) async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &[u8],
    addr: &str,
    timeout: Duration,
) -> ClientResult<()> {
    match tokio::time::timeout(timeout, writer.write_all(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(classify_io(e)),
        Err(_) => Err(ConnectionError::Timeout {
            addr: addr.to_string(),
            op: "writing to",
            after: timeout,
        }
        .into()),
    }
}

/// The read side of a connection: socket half, decoder and buffered bytes
pub struct FrameReader {
    reader: OwnedReadHalf,
    decoder: FrameDecoder,
    read_buf: BytesMut,
}

impl FrameReader {
    fn new(reader: OwnedReadHalf) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Read more bytes into the buffer; returns 0 when the peer closed.
    ///
    /// Cancel safe: if dropped inside `select!`, no data has been read.
    pub async fn fill(&mut self) -> io::Result<usize> {
        self.read_buf.reserve(READ_CHUNK);
        self.reader.read_buf(&mut self.read_buf).await
    }

    /// Next complete frame already buffered, if any
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FramingError> {
        self.decoder.decode(&mut self.read_buf)
    }

    /// What was missing when the peer closed
    pub fn eof_error(&self) -> ProtocolError {
        match self.decoder.pending_payload() {
            Some(expected) => ProtocolError::Incomplete {
                part: "payload",
                expected,
                received: self.read_buf.len(),
            },
            None => ProtocolError::Incomplete {
                part: "header",
                expected: HEADER_SIZE,
                received: self.read_buf.len(),
            },
        }
    }

    /// Receive exactly one frame, accumulating partial reads
    pub async fn recv(&mut self, addr: &str, timeout: Duration) -> ClientResult<Frame> {
        loop {
            if let Some(frame) = self.next_frame()? {
                return Ok(frame);
            }

            let n = match tokio::time::timeout(timeout, self.fill()).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(classify_io(e)),
                Err(_) => {
                    return Err(ConnectionError::Timeout {
                        addr: addr.to_string(),
                        op: "reading from",
                        after: timeout,
                    }
                    .into())
                }
            };

            if n == 0 {
                return Err(self.eof_error().into());
            }
        }
    }
}

/// Represents one TCP connection to Core
pub struct Connection {
    /// Remote peer address
    remote_addr: String,
    /// Read side with its decoder
    reader: FrameReader,
    /// Write side
    writer: OwnedWriteHalf,
    /// Bound on every read and write
    io_timeout: Duration,
}

impl Connection {
    /// Connect to `addr`, bounding the connect and all later I/O by `timeout`
    pub async fn connect(addr: &str, timeout: Duration) -> ClientResult<Self> {
        tracing::debug!("Connecting to Core at {}", addr);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ConnectionError::Connect {
                    addr: addr.to_string(),
                    source: e,
                }
                .into())
            }
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    addr: addr.to_string(),
                    op: "connecting to",
                    after: timeout,
                }
                .into())
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
        }

        Ok(Self::new(stream, addr, timeout))
    }

    /// Wrap an established TCP stream
    pub fn new(stream: TcpStream, remote_addr: impl Into<String>, io_timeout: Duration) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            remote_addr: remote_addr.into(),
            reader: FrameReader::new(reader),
            writer,
            io_timeout,
        }
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Send header and payload as a single write
    pub async fn send(&mut self, msg_type: MessageType, payload: &[u8]) -> ClientResult<()> {
        let frame = encode_frame(msg_type, payload)?;
        write_frame(&mut self.writer, &frame, &self.remote_addr, self.io_timeout).await
    }

    /// Receive one frame
    pub async fn recv(&mut self) -> ClientResult<Frame> {
        self.reader.recv(&self.remote_addr, self.io_timeout).await
    }

    /// Send a request and return the payload of the expected response
    pub async fn exchange(
        &mut self,
        request: MessageType,
        payload: &[u8],
        expected: MessageType,
    ) -> ClientResult<Bytes> {
        self.send(request, payload).await?;

        let frame = self.recv().await?;
        if frame.header.msg_type != u8::from(expected) {
            return Err(ProtocolError::UnexpectedType {
                expected,
                got: frame.header.msg_type,
            }
            .into());
        }

        Ok(frame.payload)
    }

    /// Split into halves for a connection that outlives its first exchange
    pub fn into_parts(self) -> (FrameReader, OwnedWriteHalf) {
        (self.reader, self.writer)
    }
}
