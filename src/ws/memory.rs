//! In-process transport pair.
//!
//! [`pair`] returns a [`MemoryTransport`] to hand to the hub and a
//! [`MemoryPeer`] that plays the remote client. Useful for embedding the hub
//! behind a non-WebSocket carrier and for driving connections in tests
//! without sockets.

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::transport::{Received, Transport, TransportError, TransportReader, TransportWriter};

/// Frame observed by the peer side of a memory transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerFrame {
    /// Text message written by the hub.
    Text(String),
    /// Close frame written by the hub.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Hub-side end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryTransport {
    inbound: mpsc::UnboundedReceiver<Received>,
    outbound: mpsc::UnboundedSender<PeerFrame>,
}

/// Remote end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    to_hub: Option<mpsc::UnboundedSender<Received>>,
    from_hub: mpsc::UnboundedReceiver<PeerFrame>,
}

/// Creates a connected transport/peer pair.
#[must_use]
pub fn pair() -> (MemoryTransport, MemoryPeer) {
    let (to_hub, inbound) = mpsc::unbounded_channel();
    let (outbound, from_hub) = mpsc::unbounded_channel();
    (
        MemoryTransport { inbound, outbound },
        MemoryPeer {
            to_hub: Some(to_hub),
            from_hub,
        },
    )
}

impl MemoryPeer {
    /// Sends a text payload to the hub. Returns `false` once the hub side is
    /// gone or the peer hung up.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.push(Received::Payload(text.into().into_bytes()))
    }

    /// Sends a protocol-level control frame to the hub.
    pub fn send_control(&self) -> bool {
        self.push(Received::Control)
    }

    /// Starts the closing handshake from the peer side.
    pub fn send_close(&self, code: u16) -> bool {
        self.push(Received::Close(code))
    }

    /// Drops the peer's sending side; the hub's next receive fails with
    /// [`TransportError::Closed`].
    pub fn hang_up(&mut self) {
        self.to_hub = None;
    }

    /// Waits for the next frame written by the hub. `None` once the hub side
    /// has been dropped and every frame was consumed.
    pub async fn recv(&mut self) -> Option<PeerFrame> {
        self.from_hub.recv().await
    }

    /// Returns an already-written frame without waiting.
    pub fn try_recv(&mut self) -> Option<PeerFrame> {
        self.from_hub.try_recv().ok()
    }

    fn push(&self, received: Received) -> bool {
        self.to_hub
            .as_ref()
            .is_some_and(|tx| tx.send(received).is_ok())
    }
}

impl Transport for MemoryTransport {
    type Reader = MemoryReader;
    type Writer = MemoryWriter;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (
            MemoryReader {
                inbound: self.inbound,
            },
            MemoryWriter {
                outbound: self.outbound,
                closed: false,
            },
        )
    }
}

/// Reader half of [`MemoryTransport`].
#[derive(Debug)]
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<Received>,
}

#[async_trait]
impl TransportReader for MemoryReader {
    async fn recv(&mut self) -> Result<Received, TransportError> {
        self.inbound.recv().await.ok_or(TransportError::Closed)
    }
}

/// Writer half of [`MemoryTransport`]. Refuses writes after a close frame.
#[derive(Debug)]
pub struct MemoryWriter {
    outbound: mpsc::UnboundedSender<PeerFrame>,
    closed: bool,
}

impl MemoryWriter {
    fn write(&mut self, frame: PeerFrame) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }
}

#[async_trait]
impl TransportWriter for MemoryWriter {
    async fn send(&mut self, payload: String) -> Result<(), TransportError> {
        self.write(PeerFrame::Text(payload))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let result = self.write(PeerFrame::Close {
            code,
            reason: reason.to_owned(),
        });
        self.closed = true;
        result
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_flow_both_ways() {
        let (transport, mut peer) = pair();
        let (mut reader, mut writer) = transport.split();

        assert!(peer.send_text("hello"));
        assert_eq!(
            reader.recv().await,
            Ok(Received::Payload(b"hello".to_vec()))
        );

        tokio_test::assert_ok!(writer.send("world".to_string()).await);
        assert_eq!(peer.recv().await, Some(PeerFrame::Text("world".to_string())));
    }

    #[tokio::test]
    async fn hang_up_closes_reader() {
        let (transport, mut peer) = pair();
        let (mut reader, _writer) = transport.split();
        peer.hang_up();
        assert_eq!(reader.recv().await, Err(TransportError::Closed));
        assert!(!peer.send_text("late"));
    }

    #[tokio::test]
    async fn writes_after_close_are_refused() {
        let (transport, mut peer) = pair();
        let (_reader, mut writer) = transport.split();
        tokio_test::assert_ok!(writer.close(1000, "bye").await);
        assert_eq!(writer.send("late".to_string()).await, Err(TransportError::Closed));

        let Some(PeerFrame::Close { code, reason }) = peer.recv().await else {
            panic!("expected close frame");
        };
        assert_eq!(code, 1000);
        assert_eq!(reason, "bye");
        assert!(peer.try_recv().is_none());
    }
}
