//! Transport collaborator contract and the axum WebSocket adapter.
//!
//! A [`Transport`] is an already-established, message-framed, bidirectional
//! connection. The hub never handles handshakes, framing or masking; it only
//! needs to receive one message, send one message, and close with a code.
//!
//! A transport is split once into a reader half and a writer half. The
//! connection's read loop exclusively owns the reader and the write loop
//! exclusively owns the writer, so no per-transport lock is needed.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};

/// Normal closure (RFC 6455 §7.4.1).
pub const CLOSE_NORMAL: u16 = 1000;

/// Endpoint going away, e.g. server shutdown.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// Close frame carried no status code (RFC 6455 §7.4.1). Never sent on the
/// wire.
pub const CLOSE_NO_STATUS: u16 = 1005;

/// Errors raised by a transport half. Always fatal to the loop that sees it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed by either side.
    #[error("connection closed")]
    Closed,

    /// The underlying socket failed.
    #[error("{0}")]
    Backend(String),
}

/// One unit read from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A data message (text or binary) to be decoded as an envelope.
    Payload(Vec<u8>),
    /// A protocol-level control frame with no application payload. Counts as
    /// inbound activity.
    Control,
    /// The peer started the closing handshake with this status code.
    Close(u16),
}

/// Receiving half of a transport.
#[async_trait]
pub trait TransportReader: Send + 'static {
    /// Blocks until the next message arrives.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the connection ended without
    /// a close frame, or [`TransportError::Backend`] on socket failure.
    async fn recv(&mut self) -> Result<Received, TransportError>;
}

/// Sending half of a transport.
#[async_trait]
pub trait TransportWriter: Send + 'static {
    /// Sends one text message.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the message could not be written.
    async fn send(&mut self, payload: String) -> Result<(), TransportError>;

    /// Sends a close frame with the given code and reason. After the peer
    /// closed first this completes the closing handshake.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the frame could not be written.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// A bidirectional transport that can be split into independent halves.
pub trait Transport: Send + 'static {
    /// Receiving half.
    type Reader: TransportReader;
    /// Sending half.
    type Writer: TransportWriter;

    /// Consumes the transport and returns its two halves.
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// Adapter over an upgraded axum [`WebSocket`].
///
/// The WebSocket layer queues the reply to a peer close frame but only
/// writes it on the next flush, so the reply goes out through
/// [`TransportWriter::close`].
#[derive(Debug)]
pub struct AxumTransport {
    socket: WebSocket,
}

impl AxumTransport {
    /// Wraps an upgraded socket.
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

impl Transport for AxumTransport {
    type Reader = AxumReader;
    type Writer = AxumWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        let (sink, stream) = self.socket.split();
        (AxumReader { stream }, AxumWriter { sink })
    }
}

/// Reader half of [`AxumTransport`].
#[derive(Debug)]
pub struct AxumReader {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl TransportReader for AxumReader {
    async fn recv(&mut self) -> Result<Received, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => {
                Ok(Received::Payload(text.as_str().as_bytes().to_vec()))
            }
            Some(Ok(Message::Binary(bytes))) => Ok(Received::Payload(bytes.to_vec())),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(Received::Control),
            Some(Ok(Message::Close(frame))) => {
                let code = frame.as_ref().map_or(CLOSE_NO_STATUS, |frame| frame.code);
                if let Some(frame) = frame {
                    tracing::debug!(code, reason = frame.reason.as_str(), "peer closed connection");
                }
                Ok(Received::Close(code))
            }
            Some(Err(err)) => Err(TransportError::Backend(err.to_string())),
            None => Err(TransportError::Closed),
        }
    }
}

/// Writer half of [`AxumTransport`].
#[derive(Debug)]
pub struct AxumWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl TransportWriter for AxumWriter {
    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::text(payload))
            .await
            .map_err(|err| TransportError::Backend(err.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = (code != CLOSE_NO_STATUS).then(|| CloseFrame {
            code,
            reason: reason.to_owned().into(),
        });
        let sent = self.sink.send(Message::Close(frame)).await;
        // Writes the queued reply when the peer closed first.
        let flushed = self.sink.flush().await;
        match (sent, flushed) {
            (Ok(()), _) | (_, Ok(())) => Ok(()),
            (Err(err), Err(_)) => Err(TransportError::Backend(err.to_string())),
        }
    }
}
