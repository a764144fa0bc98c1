//! Established bidirectional channels handed to the streamer
//!
//! The calling layer performs the handshake (WebSocket upgrade, TCP accept,
//! ...) and passes the result in as a [`Transport`]: a receive half owned by
//! the connection's reader task and a send half owned by its writer task.
//!
//! Two implementations ship with the crate:
//!
//! - [`channel`] - in-memory pair for embedding and tests
//! - [`lines`] - newline-delimited text frames over any async byte stream

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{Result, StreamError};
use crate::protocol::OutboundMessage;

/// A single message on the channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One JSON document
    Text(String),
    /// Orderly close from either side
    Close,
}

/// Receive half of a transport
#[async_trait]
pub trait FrameSource: Send {
    /// Next inbound frame; `None` once the peer is gone
    async fn recv(&mut self) -> Option<Result<Frame>>;
}

/// Send half of a transport
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Release the channel; further sends fail
    async fn close(&mut self) -> Result<()>;
}

/// An established channel plus the peer address
pub struct Transport {
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
    remote_addr: String,
}

impl Transport {
    pub fn new(
        source: impl FrameSource + 'static,
        sink: impl FrameSink + 'static,
        remote_addr: impl Into<String>,
    ) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
            remote_addr: remote_addr.into(),
        }
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Send one message and close, used when rejecting a channel
    pub async fn reject(mut self, message: &OutboundMessage) -> Result<()> {
        let text = message.encode()?;
        let sent = self.sink.send(Frame::Text(text)).await;
        let closed = self.sink.close().await;
        sent.and(closed)
    }

    /// Close without sending anything
    pub async fn close(mut self) -> Result<()> {
        self.sink.close().await
    }

    /// Split into receive half, send half and peer address
    pub fn into_parts(self) -> (Box<dyn FrameSource>, Box<dyn FrameSink>, String) {
        (self.source, self.sink, self.remote_addr)
    }
}

// ============================================================================
// In-memory channel
// ============================================================================

/// Create an in-memory transport and the client end driving it
pub fn channel(remote_addr: impl Into<String>, buffer: usize) -> (Transport, ClientHandle) {
    let (client_tx, server_rx) = mpsc::channel(buffer);
    let (server_tx, client_rx) = mpsc::channel(buffer);

    let transport = Transport::new(
        ChannelSource { rx: server_rx },
        ChannelSink { tx: Some(server_tx) },
        remote_addr,
    );
    let client = ClientHandle {
        tx: client_tx,
        rx: client_rx,
    };

    (transport, client)
}

struct ChannelSource {
    rx: mpsc::Receiver<Frame>,
}

#[async_trait]
impl FrameSource for ChannelSource {
    async fn recv(&mut self) -> Option<Result<Frame>> {
        self.rx.recv().await.map(Ok)
    }
}

struct ChannelSink {
    tx: Option<mpsc::Sender<Frame>>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| StreamError::transport("channel already closed"))?;
        tx.send(frame)
            .await
            .map_err(|_| StreamError::transport("peer dropped"))
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            // best effort, the peer may already be gone or not reading
            let _ = tx.try_send(Frame::Close);
        }
        Ok(())
    }
}

/// Client end of an in-memory transport
#[derive(Debug)]
pub struct ClientHandle {
    tx: mpsc::Sender<Frame>,
    rx: mpsc::Receiver<Frame>,
}

impl ClientHandle {
    pub async fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .send(Frame::Text(text.into()))
            .await
            .map_err(|_| StreamError::transport("server side dropped"))
    }

    pub async fn send_json<T: Serialize>(&self, value: &T) -> Result<()> {
        self.send_text(serde_json::to_string(value)?).await
    }

    /// Next raw frame; `None` once the server released the channel
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next decoded envelope; `None` on close
    pub async fn recv_message(&mut self) -> Option<OutboundMessage> {
        match self.rx.recv().await? {
            Frame::Text(text) => serde_json::from_str(&text).ok(),
            Frame::Close => None,
        }
    }

    /// Non-blocking receive of a decoded envelope
    pub fn try_recv_message(&mut self) -> Option<OutboundMessage> {
        match self.rx.try_recv().ok()? {
            Frame::Text(text) => serde_json::from_str(&text).ok(),
            Frame::Close => None,
        }
    }

    /// Send a close frame and drop the client end
    pub async fn close(self) {
        let _ = self.tx.send(Frame::Close).await;
    }
}

// ============================================================================
// Newline-delimited text over a byte stream
// ============================================================================

/// Wrap a byte stream so each line is one text frame
///
/// Lines longer than `max_frame_size` bytes end the connection with a
/// transport error. Blank lines and lines that are not valid UTF-8 are
/// skipped.
pub fn lines<R, W>(
    reader: R,
    writer: W,
    remote_addr: impl Into<String>,
    max_frame_size: usize,
) -> Transport
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let remote_addr = remote_addr.into();
    Transport::new(
        LinesSource {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max_frame_size,
            remote_addr: remote_addr.clone(),
        },
        LinesSink {
            writer,
            closed: false,
        },
        remote_addr,
    )
}

struct LinesSource<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_frame_size: usize,
    remote_addr: String,
}

#[async_trait]
impl<R> FrameSource for LinesSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn recv(&mut self) -> Option<Result<Frame>> {
        let limit = self.max_frame_size as u64 + 1;

        loop {
            self.buf.clear();
            let read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await;

            let n = match read {
                Ok(0) => return None,
                Ok(n) => n,
                Err(e) => return Some(Err(StreamError::transport(e))),
            };

            if !self.buf.ends_with(b"\n") && n as u64 >= limit {
                return Some(Err(StreamError::transport(format!(
                    "frame exceeds {} bytes",
                    self.max_frame_size
                ))));
            }

            let mut end = self.buf.len();
            while end > 0 && matches!(self.buf[end - 1], b'\r' | b'\n') {
                end -= 1;
            }
            if end == 0 {
                continue;
            }

            match std::str::from_utf8(&self.buf[..end]) {
                Ok(line) => return Some(Ok(Frame::Text(line.to_string()))),
                Err(e) => {
                    warn!(
                        remote_addr = %self.remote_addr,
                        error = %e,
                        "skipping line that is not valid UTF-8"
                    );
                }
            }
        }
    }
}

struct LinesSink<W> {
    writer: W,
    closed: bool,
}

#[async_trait]
impl<W> FrameSink for LinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.closed {
            return Err(StreamError::transport("stream already closed"));
        }
        match frame {
            Frame::Text(text) => {
                self.writer
                    .write_all(text.as_bytes())
                    .await
                    .map_err(StreamError::transport)?;
                self.writer
                    .write_all(b"\n")
                    .await
                    .map_err(StreamError::transport)?;
                self.writer.flush().await.map_err(StreamError::transport)
            }
            Frame::Close => self.close().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await.map_err(StreamError::transport)
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
