//! Registry of live connections.
//!
//! [`ConnectionRegistry`] owns the default configuration applied to every new
//! connection and the live set of running connections. Configuration setters
//! take `&mut self`, so they can only run before the registry is shared
//! behind an `Arc`; each accepted connection receives an immutable copy.
//!
//! # Concurrency
//!
//! - The live set is the only state shared across connections.
//! - Registration and deregistration take the write lock.
//! - Broadcasts copy the matching handles under the read lock and send after
//!   releasing it, so fan-out never blocks registration churn for long.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Notify, RwLock};

use super::connection::{Connection, ConnectionHandle, ConnectionLimits, ConnectionSettings};
use super::message_handler::{BroadcastHandler, LoggingHandler, MessageHandler};
use super::transport::Transport;
use crate::config::{HubConfig, HubMode};
use crate::domain::{ConnectionId, Envelope, HeartbeatConfig};
use crate::error::HubError;

/// Lock-guarded map of live connections, shared with broadcast handlers.
pub type LiveSet = Arc<RwLock<HashMap<ConnectionId, ConnectionHandle>>>;

/// Sends `payload` to every member of `live` except `exclude`.
///
/// Returns the number of connections the payload was enqueued on.
pub async fn fan_out(live: &LiveSet, payload: &str, exclude: Option<ConnectionId>) -> usize {
    let targets: Vec<ConnectionHandle> = {
        let map = live.read().await;
        map.values()
            .filter(|handle| Some(handle.id()) != exclude)
            .cloned()
            .collect()
    };

    let results = join_all(targets.iter().map(|handle| handle.send(payload))).await;
    let mut delivered = 0;
    for (handle, result) in targets.iter().zip(results) {
        match result {
            Ok(()) => delivered += 1,
            Err(err) => {
                tracing::debug!(conn_id = %handle.id(), error = %err, "broadcast skipped connection");
            }
        }
    }
    delivered
}

/// How application messages are handled.
#[derive(Clone)]
pub enum HandlerMode {
    /// Every connection uses the given handler.
    Custom(Arc<dyn MessageHandler>),
    /// Messages are forwarded to every registered connection.
    Broadcast {
        /// Whether the sender receives its own message.
        include_sender: bool,
    },
}

impl fmt::Debug for HandlerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(handler) => f.debug_tuple("Custom").field(handler).finish(),
            Self::Broadcast { include_sender } => f
                .debug_struct("Broadcast")
                .field("include_sender", include_sender)
                .finish(),
        }
    }
}

impl Default for HandlerMode {
    fn default() -> Self {
        Self::Custom(Arc::new(LoggingHandler))
    }
}

/// Process-wide tracker of live connections and their default configuration.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    live: LiveSet,
    heartbeat: HeartbeatConfig,
    limits: ConnectionLimits,
    mode: HandlerMode,
    emptied: Notify,
}

impl ConnectionRegistry {
    /// Creates a registry with default heartbeat periods, default limits and
    /// the logging handler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry configured from [`HubConfig`].
    #[must_use]
    pub fn from_config(config: &HubConfig) -> Self {
        let mut registry = Self::new();
        registry.set_ping_period(config.ping_period);
        registry.set_pong_period(config.pong_period);
        registry.set_limits(ConnectionLimits {
            outbound_capacity: config.outbound_capacity,
            handler_concurrency: config.handler_concurrency,
            dispatch_capacity: config.dispatch_capacity,
            send_timeout: config.send_timeout,
        });
        if config.mode == HubMode::Broadcast {
            registry.set_broadcast(config.broadcast_include_sender);
        }
        registry
    }

    /// Sets the silence interval before a ping is sent.
    pub fn set_ping_period(&mut self, period: Duration) {
        self.heartbeat.ping_period = period;
    }

    /// Sets the pong deadline. Values not exceeding the ping period are
    /// corrected to twice the ping period when a connection is accepted.
    pub fn set_pong_period(&mut self, period: Duration) {
        self.heartbeat.pong_period = period;
    }

    /// Installs the handler invoked for application messages.
    pub fn set_message_handler(&mut self, handler: Arc<dyn MessageHandler>) {
        self.mode = HandlerMode::Custom(handler);
    }

    /// Switches to fan-out mode.
    pub fn set_broadcast(&mut self, include_sender: bool) {
        self.mode = HandlerMode::Broadcast { include_sender };
    }

    /// Sets queue and dispatch limits for new connections.
    pub fn set_limits(&mut self, limits: ConnectionLimits) {
        self.limits = limits;
    }

    /// Heartbeat periods the next accepted connection will run with.
    #[must_use]
    pub fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat.normalized()
    }

    /// Current handler mode.
    #[must_use]
    pub const fn mode(&self) -> &HandlerMode {
        &self.mode
    }

    /// Shared live set, e.g. for custom broadcast handlers.
    #[must_use]
    pub fn live_set(&self) -> LiveSet {
        Arc::clone(&self.live)
    }

    fn settings(&self) -> ConnectionSettings {
        ConnectionSettings::new(self.heartbeat, self.limits)
    }

    fn effective_handler(&self) -> Arc<dyn MessageHandler> {
        match &self.mode {
            HandlerMode::Custom(handler) => Arc::clone(handler),
            HandlerMode::Broadcast { include_sender } => {
                Arc::new(BroadcastHandler::new(self.live_set(), *include_sender))
            }
        }
    }

    /// Runs a connection over `transport` until it terminates.
    ///
    /// The connection is registered once its loops are running and
    /// deregistered after both have exited.
    pub async fn accept<T: Transport>(&self, transport: T) -> ConnectionId {
        let connection = Connection::new(transport, self.settings(), self.effective_handler());
        let id = connection.id();
        let running = connection.start();

        self.register(running.handle().clone()).await;
        let live = self.len().await;
        tracing::info!(conn_id = %id, live, "connection registered");

        let reason = running.wait().await;

        self.deregister(id).await;
        let live = self.len().await;
        tracing::info!(conn_id = %id, ?reason, live, "connection deregistered");
        id
    }

    /// Adds a running connection to the live set.
    pub async fn register(&self, handle: ConnectionHandle) {
        self.live.write().await.insert(handle.id(), handle);
    }

    /// Removes a connection from the live set. Returns `false` if it was not
    /// registered.
    pub async fn deregister(&self, id: ConnectionId) -> bool {
        let mut live = self.live.write().await;
        let removed = live.remove(&id).is_some();
        if live.is_empty() {
            self.emptied.notify_waiters();
        }
        removed
    }

    /// Resolves once no connection is registered.
    pub async fn drained(&self) {
        loop {
            let emptied = self.emptied.notified();
            tokio::pin!(emptied);
            emptied.as_mut().enable();
            if self.is_empty().await {
                return;
            }
            emptied.await;
        }
    }

    /// Returns `true` if `id` is currently registered.
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.live.read().await.contains_key(&id)
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.live.read().await.len()
    }

    /// Returns `true` if no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.live.read().await.is_empty()
    }

    /// Ids of all registered connections.
    pub async fn connection_ids(&self) -> Vec<ConnectionId> {
        self.live.read().await.keys().copied().collect()
    }

    /// Sends a server-originated envelope to every registered connection
    /// except `exclude`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Encode`] if the envelope cannot be serialized.
    pub async fn broadcast(
        &self,
        envelope: &Envelope,
        exclude: Option<ConnectionId>,
    ) -> Result<usize, HubError> {
        let payload = envelope
            .encode()
            .map_err(|err| HubError::Encode(err.to_string()))?;
        Ok(fan_out(&self.live, &payload, exclude).await)
    }

    /// Asks every registered connection to close. Each one deregisters
    /// itself once its loops have exited.
    pub async fn shutdown(&self) -> usize {
        let handles: Vec<ConnectionHandle> = self.live.read().await.values().cloned().collect();
        let closing = handles.iter().filter(|handle| handle.close()).count();
        tracing::info!(closing, "closing all connections");
        closing
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::domain::envelope::PING_FRAME;
    use crate::ws::memory::{self, MemoryPeer, PeerFrame};
    use crate::ws::message_handler::handler_fn;
    use crate::ws::transport::CLOSE_GOING_AWAY;

    fn spawn_accept(
        registry: &Arc<ConnectionRegistry>,
    ) -> (JoinHandle<ConnectionId>, MemoryPeer) {
        let (transport, peer) = memory::pair();
        let registry = Arc::clone(registry);
        let task = tokio::spawn(async move { registry.accept(transport).await });
        (task, peer)
    }

    async fn wait_for_len(registry: &ConnectionRegistry, expected: usize) {
        while registry.len().await != expected {
            tokio::task::yield_now().await;
        }
    }

    async fn next_text(peer: &mut MemoryPeer) -> String {
        loop {
            match peer.recv().await {
                Some(PeerFrame::Text(text)) if text == PING_FRAME => {}
                Some(PeerFrame::Text(text)) => return text,
                other => panic!("unexpected frame: {other:?}"),
            }
        }
    }

    #[test]
    fn invalid_pong_period_is_corrected() {
        let mut registry = ConnectionRegistry::new();
        registry.set_ping_period(Duration::from_secs(5));
        registry.set_pong_period(Duration::from_secs(3));
        let heartbeat = registry.heartbeat();
        assert_eq!(heartbeat.ping_period, Duration::from_secs(5));
        assert!(heartbeat.pong_period >= Duration::from_secs(10));
    }

    #[test]
    fn default_mode_is_custom() {
        let registry = ConnectionRegistry::new();
        assert!(matches!(registry.mode(), HandlerMode::Custom(_)));
    }

    #[tokio::test]
    async fn register_and_deregister() {
        let registry = Arc::new(ConnectionRegistry::new());
        assert!(registry.is_empty().await);

        let (task, mut peer) = spawn_accept(&registry);
        wait_for_len(&registry, 1).await;
        let ids = registry.connection_ids().await;
        let Some(id) = ids.first().copied() else {
            panic!("connection not registered");
        };
        assert!(registry.contains(id).await);

        peer.hang_up();
        let Ok(finished) = task.await else {
            panic!("accept task failed");
        };
        assert_eq!(finished, id);
        assert!(!registry.contains(id).await);
        assert!(registry.is_empty().await);
        assert!(!registry.deregister(id).await);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection_including_sender() {
        let mut registry = ConnectionRegistry::new();
        registry.set_broadcast(true);
        let registry = Arc::new(registry);

        let (_a_task, mut a) = spawn_accept(&registry);
        let (_b_task, mut b) = spawn_accept(&registry);
        let (_c_task, mut c) = spawn_accept(&registry);
        wait_for_len(&registry, 3).await;

        let raw = r#"{"msg":"normal","method":"greet","uid":"1","params":"hi"}"#;
        assert!(a.send_text(raw));

        for peer in [&mut a, &mut b, &mut c] {
            assert_eq!(next_text(peer).await, raw);
        }
        for peer in [&mut a, &mut b, &mut c] {
            assert!(peer.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn broadcast_can_exclude_sender() {
        let mut registry = ConnectionRegistry::new();
        registry.set_broadcast(false);
        let registry = Arc::new(registry);

        let (_a_task, mut a) = spawn_accept(&registry);
        let (_b_task, mut b) = spawn_accept(&registry);
        wait_for_len(&registry, 2).await;

        let raw = r#"{"msg":"normal","method":"greet","uid":"2","params":null}"#;
        assert!(a.send_text(raw));
        assert_eq!(next_text(&mut b).await, raw);

        // Let any stray forward land before checking the sender.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(a.try_recv().is_none());
    }

    #[tokio::test]
    async fn custom_handler_can_reply() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        let mut registry = ConnectionRegistry::new();
        registry.set_message_handler(Arc::new(handler_fn(move |ctx, envelope| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(ctx.connection_id());
                let _ = ctx.reply(&envelope).await;
            }
        })));
        let registry = Arc::new(registry);

        let (_task, mut peer) = spawn_accept(&registry);
        wait_for_len(&registry, 1).await;

        assert!(peer.send_text(r#"{"msg":"echo","uid":"9"}"#));
        assert_eq!(next_text(&mut peer).await, r#"{"msg":"echo","uid":"9","params":null}"#);

        let Some(origin) = seen_rx.recv().await else {
            panic!("handler not invoked");
        };
        assert!(registry.contains(origin).await);
    }

    #[tokio::test]
    async fn server_broadcast_counts_deliveries() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (_a_task, mut a) = spawn_accept(&registry);
        let (_b_task, mut b) = spawn_accept(&registry);
        wait_for_len(&registry, 2).await;

        let envelope = Envelope::normal("notice", "srv-1", json!({"text": "maintenance"}));
        let Ok(delivered) = registry.broadcast(&envelope, None).await else {
            panic!("broadcast failed");
        };
        assert_eq!(delivered, 2);

        let Ok(expected) = envelope.encode() else {
            panic!("encode failed");
        };
        assert_eq!(next_text(&mut a).await, expected);
        assert_eq!(next_text(&mut b).await, expected);
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (a_task, mut a) = spawn_accept(&registry);
        let (b_task, mut b) = spawn_accept(&registry);
        wait_for_len(&registry, 2).await;

        assert_eq!(registry.shutdown().await, 2);
        for peer in [&mut a, &mut b] {
            let Some(PeerFrame::Close { code, .. }) = peer.recv().await else {
                panic!("expected close frame");
            };
            assert_eq!(code, CLOSE_GOING_AWAY);
        }

        assert!(a_task.await.is_ok());
        assert!(b_task.await.is_ok());
        assert!(registry.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn drained_waits_for_last_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        tokio_test::assert_ready!(tokio_test::task::spawn(registry.drained()).poll());

        let (task, mut peer) = spawn_accept(&registry);
        wait_for_len(&registry, 1).await;

        let mut drained = tokio_test::task::spawn(registry.drained());
        tokio_test::assert_pending!(drained.poll());

        peer.hang_up();
        assert!(task.await.is_ok());
        assert!(drained.is_woken());
        tokio_test::assert_ready!(drained.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_connection_uses_corrected_pong_period() {
        let mut registry = ConnectionRegistry::new();
        registry.set_ping_period(Duration::from_secs(5));
        registry.set_pong_period(Duration::from_secs(3));
        let registry = Arc::new(registry);

        let (task, mut peer) = spawn_accept(&registry);
        assert_eq!(peer.recv().await, Some(PeerFrame::Text(PING_FRAME.to_string())));
        let pinged = tokio::time::Instant::now();

        let Some(PeerFrame::Close { .. }) = peer.recv().await else {
            panic!("expected close frame");
        };
        assert!(pinged.elapsed() >= Duration::from_secs(10));
        assert!(task.await.is_ok());
    }
}
