//! Message handler contract and the built-in handlers.
//!
//! A handler is invoked once per accepted non-heartbeat inbound envelope, on
//! its own task. The read loop does not wait for it to finish, so handlers
//! must not assume that their completion gates further reads.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;

use super::connection::ConnectionHandle;
use super::registry::{LiveSet, fan_out};
use crate::domain::{ConnectionId, Envelope};
use crate::error::HubError;

/// Per-message context handed to a [`MessageHandler`].
#[derive(Debug, Clone)]
pub struct MessageContext {
    origin: ConnectionHandle,
}

impl MessageContext {
    /// Creates a context for a message received on `origin`.
    #[must_use]
    pub fn new(origin: ConnectionHandle) -> Self {
        Self { origin }
    }

    /// Connection the message was received on.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.origin.id()
    }

    /// Sends an envelope back to the originating connection.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Encode`] if the envelope cannot be serialized, or
    /// the error of [`ConnectionHandle::send`].
    pub async fn reply(&self, envelope: &Envelope) -> Result<(), HubError> {
        let payload = envelope
            .encode()
            .map_err(|err| HubError::Encode(err.to_string()))?;
        self.origin.send(payload).await
    }
}

/// Callback invoked for application messages.
#[async_trait]
pub trait MessageHandler: Send + Sync + fmt::Debug + 'static {
    /// Handles one decoded envelope.
    async fn handle(&self, ctx: MessageContext, envelope: Envelope);
}

/// Handler that only logs what it receives. Used when nothing else is
/// configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl MessageHandler for LoggingHandler {
    async fn handle(&self, ctx: MessageContext, envelope: Envelope) {
        tracing::debug!(
            conn_id = %ctx.connection_id(),
            kind = %envelope.kind,
            method = envelope.method.as_deref().unwrap_or_default(),
            uid = %envelope.uid,
            "message received"
        );
    }
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F> {
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

/// Wraps `f` as a [`MessageHandler`].
///
/// ```
/// use beacon_hub::ws::message_handler::handler_fn;
///
/// let handler = handler_fn(|ctx, envelope| async move {
///     let _ = ctx.reply(&envelope).await;
/// });
/// # let _ = handler;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(MessageContext, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(MessageContext, Envelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, ctx: MessageContext, envelope: Envelope) {
        (self.f)(ctx, envelope).await;
    }
}

/// Fan-out handler: re-serializes every envelope and forwards it to all
/// registered connections.
///
/// The sender receives its own message unless `include_sender` is `false`.
#[derive(Debug, Clone)]
pub struct BroadcastHandler {
    live: LiveSet,
    include_sender: bool,
}

impl BroadcastHandler {
    /// Creates a handler forwarding to every member of `live`.
    #[must_use]
    pub fn new(live: LiveSet, include_sender: bool) -> Self {
        Self {
            live,
            include_sender,
        }
    }
}

#[async_trait]
impl MessageHandler for BroadcastHandler {
    async fn handle(&self, ctx: MessageContext, envelope: Envelope) {
        let payload = match envelope.encode() {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(conn_id = %ctx.connection_id(), error = %err, "failed to encode envelope for broadcast");
                return;
            }
        };
        let exclude = (!self.include_sender).then(|| ctx.connection_id());
        let delivered = fan_out(&self.live, &payload, exclude).await;
        tracing::debug!(
            conn_id = %ctx.connection_id(),
            uid = %envelope.uid,
            delivered,
            "broadcast message"
        );
    }
}
