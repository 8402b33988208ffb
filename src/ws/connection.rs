//! Connection actor.
//!
//! Each accepted transport is driven by two tasks:
//!
//! - the **read loop** receives frames, swallows pongs, drops malformed
//!   envelopes and queues everything else for dispatch without ever waiting
//!   on a handler;
//! - the **dispatcher** drains that queue onto a capped number of spawned
//!   handler tasks;
//! - the **write loop** owns the [`Heartbeat`] state machine and multiplexes
//!   heartbeat deadlines, liveness reports from the read loop, and the
//!   outbound queue.
//!
//! Whichever loop exits first raises the shared stop signal so the other one
//! follows promptly. The connection is finished once both loops are joined.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until, timeout};

use super::message_handler::{MessageContext, MessageHandler};
use super::transport::{
    CLOSE_GOING_AWAY, CLOSE_NORMAL, Received, Transport, TransportReader, TransportWriter,
};
use crate::domain::envelope::PING_FRAME;
use crate::domain::{
    ConnectionId, Envelope, Heartbeat, HeartbeatAction, HeartbeatConfig, Inbound, LivenessEvent,
};
use crate::error::HubError;

/// Default depth of the per-connection outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Default cap on in-flight handler tasks per connection.
pub const DEFAULT_HANDLER_CONCURRENCY: usize = 16;

/// Default depth of the per-connection queue of messages awaiting a handler.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 256;

/// Default time [`ConnectionHandle::send`] waits on a full queue.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(1);

/// Reason sent with the close frame after a liveness timeout.
pub const HEARTBEAT_CLOSE_REASON: &str = "no heartbeat detected";

/// Reason sent with the close frame on server shutdown.
pub const SHUTDOWN_CLOSE_REASON: &str = "server shutting down";

const LIVENESS_CAPACITY: usize = 8;
const CLOSE_DEADLINE: Duration = Duration::from_secs(1);

/// Queue and dispatch limits applied to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Depth of the outbound queue.
    pub outbound_capacity: usize,
    /// Maximum number of handler tasks running at once.
    pub handler_concurrency: usize,
    /// Messages held while every handler slot is busy. Further messages are
    /// dropped.
    pub dispatch_capacity: usize,
    /// How long `send` waits for room in the outbound queue.
    pub send_timeout: Duration,
}

impl ConnectionLimits {
    /// Returns limits with every capacity at least one.
    #[must_use]
    pub fn normalized(self) -> Self {
        Self {
            outbound_capacity: self.outbound_capacity.max(1),
            handler_concurrency: self.handler_concurrency.max(1),
            dispatch_capacity: self.dispatch_capacity.max(1),
            send_timeout: self.send_timeout,
        }
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            handler_concurrency: DEFAULT_HANDLER_CONCURRENCY,
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Immutable per-connection settings, captured when the transport is
/// accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionSettings {
    heartbeat: HeartbeatConfig,
    limits: ConnectionLimits,
}

impl ConnectionSettings {
    /// Normalizes and freezes the given heartbeat and limits.
    #[must_use]
    pub fn new(heartbeat: HeartbeatConfig, limits: ConnectionLimits) -> Self {
        Self {
            heartbeat: heartbeat.normalized(),
            limits: limits.normalized(),
        }
    }

    /// Effective heartbeat periods.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    /// Effective queue and dispatch limits.
    #[must_use]
    pub const fn limits(&self) -> ConnectionLimits {
        self.limits
    }
}

/// Why a connection stopped. Only the first reason is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The transport failed or ended without a close frame.
    ReadClosed,
    /// The peer sent a close frame with this code. The write loop echoes it.
    PeerClosed(u16),
    /// Writing a heartbeat ping failed.
    WriteFailed,
    /// No traffic arrived within the pong period after a ping.
    HeartbeatTimeout,
    /// The server asked the connection to go away.
    Shutdown,
}

type StopSignal = watch::Sender<Option<StopReason>>;

/// Records `reason` unless another reason was recorded first.
fn raise(stop: &StopSignal, reason: StopReason) -> bool {
    stop.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    })
}

async fn stopped(rx: &mut watch::Receiver<Option<StopReason>>) -> Option<StopReason> {
    match rx.wait_for(Option::is_some).await {
        Ok(reason) => *reason,
        Err(_) => None,
    }
}

/// Cloneable reference to a running connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
    stop: Arc<StopSignal>,
    send_timeout: Duration,
}

impl ConnectionHandle {
    /// Identity of the connection.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueues a text payload for the write loop.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ConnectionClosed`] immediately once the connection
    /// is stopping, or [`HubError::SendTimeout`] if the outbound queue stays
    /// full for the configured send timeout.
    pub async fn send(&self, payload: impl Into<String>) -> Result<(), HubError> {
        if self.is_closed() {
            return Err(HubError::ConnectionClosed(self.id));
        }
        match self
            .outbound
            .send_timeout(payload.into(), self.send_timeout)
            .await
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Closed(_)) => Err(HubError::ConnectionClosed(self.id)),
            Err(SendTimeoutError::Timeout(_)) => Err(HubError::SendTimeout(self.id)),
        }
    }

    /// Asks the connection to close with a going-away frame. Returns `false`
    /// if it was already stopping.
    pub fn close(&self) -> bool {
        raise(&self.stop, StopReason::Shutdown)
    }

    /// Returns `true` once either loop has begun shutting down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.stop.borrow().is_some()
    }

    /// First recorded stop reason, if any.
    #[must_use]
    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop.borrow()
    }
}

/// A connection actor that has not been started yet.
#[derive(Debug)]
pub struct Connection<T> {
    id: ConnectionId,
    transport: T,
    settings: ConnectionSettings,
    handler: Arc<dyn MessageHandler>,
}

impl<T: Transport> Connection<T> {
    /// Takes exclusive ownership of `transport`.
    #[must_use]
    pub fn new(
        transport: T,
        settings: ConnectionSettings,
        handler: Arc<dyn MessageHandler>,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            transport,
            settings,
            handler,
        }
    }

    /// Identity the connection will run under.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Spawns the read and write loops.
    #[must_use]
    pub fn start(self) -> RunningConnection {
        let limits = self.settings.limits();
        let (reader, writer) = self.transport.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(limits.outbound_capacity);
        let (liveness_tx, liveness_rx) = mpsc::channel(LIVENESS_CAPACITY);
        let (dispatch_tx, dispatch_rx) = mpsc::channel(limits.dispatch_capacity);
        let (stop, _) = watch::channel(None);
        let stop = Arc::new(stop);

        let handle = ConnectionHandle {
            id: self.id,
            outbound: outbound_tx,
            stop: Arc::clone(&stop),
            send_timeout: limits.send_timeout,
        };

        let read_side = ReadSide {
            handle: handle.clone(),
            liveness: liveness_tx,
            dispatch: dispatch_tx,
        };
        let dispatcher = Dispatcher {
            handle: handle.clone(),
            handler: self.handler,
            queue: dispatch_rx,
            permits: Arc::new(Semaphore::new(limits.handler_concurrency)),
        };
        let write_side = WriteSide {
            id: self.id,
            heartbeat: Heartbeat::new(self.settings.heartbeat(), Instant::now()),
            outbound: outbound_rx,
            liveness: liveness_rx,
            stop,
        };

        tracing::debug!(conn_id = %self.id, "connection started");
        RunningConnection {
            handle,
            read: tokio::spawn(read_side.run(reader)),
            write: tokio::spawn(write_side.run(writer)),
            dispatch: tokio::spawn(dispatcher.run()),
        }
    }
}

/// A started connection whose loops are running.
#[derive(Debug)]
pub struct RunningConnection {
    handle: ConnectionHandle,
    read: JoinHandle<()>,
    write: JoinHandle<()>,
    dispatch: JoinHandle<()>,
}

impl RunningConnection {
    /// Handle used to send to or close this connection.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Waits until both loops and the dispatcher have exited and returns the
    /// stop reason. Handler tasks already spawned may still be running.
    pub async fn wait(self) -> Option<StopReason> {
        let id = self.handle.id();
        let (read, write, dispatch) = tokio::join!(self.read, self.write, self.dispatch);
        for (task, result) in [("read", read), ("write", write), ("dispatch", dispatch)] {
            if let Err(err) = result {
                tracing::error!(conn_id = %id, task, error = %err, "connection task aborted");
            }
        }
        let reason = self.handle.stop_reason();
        tracing::debug!(conn_id = %id, ?reason, "connection finished");
        reason
    }
}

struct ReadSide {
    handle: ConnectionHandle,
    liveness: mpsc::Sender<LivenessEvent>,
    dispatch: mpsc::Sender<Envelope>,
}

impl ReadSide {
    async fn run<R: TransportReader>(self, mut reader: R) {
        let id = self.handle.id();
        let mut stop_rx = self.handle.stop.subscribe();

        let reason = loop {
            let received = tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break StopReason::ReadClosed,
                received = reader.recv() => received,
            };

            let payload = match received {
                Ok(Received::Payload(payload)) => payload,
                Ok(Received::Control) => {
                    self.report(LivenessEvent::Activity);
                    continue;
                }
                Ok(Received::Close(code)) => {
                    tracing::debug!(conn_id = %id, code, "peer sent close frame");
                    break StopReason::PeerClosed(code);
                }
                Err(err) => {
                    tracing::debug!(conn_id = %id, error = %err, "read loop ended");
                    break StopReason::ReadClosed;
                }
            };

            let envelope = match Inbound::parse(&payload) {
                Ok(Inbound::Pong) => {
                    self.report(LivenessEvent::Pong);
                    continue;
                }
                Ok(Inbound::Message(envelope)) => {
                    self.report(LivenessEvent::Activity);
                    envelope
                }
                Err(err) => {
                    self.report(LivenessEvent::Activity);
                    tracing::warn!(conn_id = %id, error = %err, "dropping invalid message");
                    continue;
                }
            };

            match self.dispatch.try_send(envelope) {
                Ok(()) => {}
                Err(TrySendError::Full(envelope)) => {
                    tracing::warn!(
                        conn_id = %id,
                        uid = %envelope.uid,
                        "handlers saturated, dropping message"
                    );
                }
                Err(TrySendError::Closed(_)) => break StopReason::ReadClosed,
            }
        };

        raise(&self.handle.stop, reason);
    }

    fn report(&self, event: LivenessEvent) {
        // A full channel already holds an equivalent pending report.
        if let Err(TrySendError::Full(_)) = self.liveness.try_send(event) {
            tracing::trace!(conn_id = %self.handle.id(), "liveness report coalesced");
        }
    }
}

struct Dispatcher {
    handle: ConnectionHandle,
    handler: Arc<dyn MessageHandler>,
    queue: mpsc::Receiver<Envelope>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    async fn run(mut self) {
        let mut stop_rx = self.handle.stop.subscribe();

        loop {
            let envelope = tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                envelope = self.queue.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let permit = tokio::select! {
                biased;
                _ = stopped(&mut stop_rx) => break,
                permit = Arc::clone(&self.permits).acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let handler = Arc::clone(&self.handler);
            let ctx = MessageContext::new(self.handle.clone());
            tokio::spawn(async move {
                handler.handle(ctx, envelope).await;
                drop(permit);
            });
        }

        let dropped = self.queue.len();
        if dropped > 0 {
            tracing::debug!(conn_id = %self.handle.id(), dropped, "discarding undispatched messages");
        }
    }
}

struct WriteSide {
    id: ConnectionId,
    heartbeat: Heartbeat,
    outbound: mpsc::Receiver<String>,
    liveness: mpsc::Receiver<LivenessEvent>,
    stop: Arc<StopSignal>,
}

impl WriteSide {
    async fn run<W: TransportWriter>(mut self, mut writer: W) {
        let id = self.id;
        let mut stop_rx = self.stop.subscribe();

        let reason = loop {
            let Some(deadline) = self.heartbeat.deadline() else {
                break StopReason::HeartbeatTimeout;
            };

            tokio::select! {
                biased;
                reason = stopped(&mut stop_rx) => {
                    match reason {
                        Some(StopReason::Shutdown) => {
                            close_transport(&mut writer, id, CLOSE_GOING_AWAY, SHUTDOWN_CLOSE_REASON).await;
                        }
                        Some(StopReason::PeerClosed(code)) => {
                            close_transport(&mut writer, id, code, "").await;
                        }
                        _ => {}
                    }
                    break reason.unwrap_or(StopReason::ReadClosed);
                }
                Some(event) = self.liveness.recv() => {
                    self.heartbeat.observe(event, Instant::now());
                }
                () = sleep_until(deadline) => match self.heartbeat.on_deadline(Instant::now()) {
                    HeartbeatAction::SendPing => {
                        if let Err(err) = writer.send(PING_FRAME.to_owned()).await {
                            tracing::warn!(conn_id = %id, error = %err, "failed to send ping");
                            break StopReason::WriteFailed;
                        }
                        tracing::trace!(conn_id = %id, "ping sent");
                        self.heartbeat.on_ping_sent(Instant::now());
                    }
                    HeartbeatAction::Close => {
                        tracing::info!(conn_id = %id, "no heartbeat from peer, closing connection");
                        close_transport(&mut writer, id, CLOSE_NORMAL, HEARTBEAT_CLOSE_REASON).await;
                        break StopReason::HeartbeatTimeout;
                    }
                    HeartbeatAction::Wait => {}
                },
                Some(payload) = self.outbound.recv() => {
                    if let Err(err) = writer.send(payload).await {
                        tracing::debug!(conn_id = %id, error = %err, "failed to write outbound message");
                    }
                }
            }
        };

        raise(&self.stop, reason);
    }
}

async fn close_transport<W: TransportWriter>(
    writer: &mut W,
    id: ConnectionId,
    code: u16,
    reason: &str,
) {
    match timeout(CLOSE_DEADLINE, writer.close(code, reason)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::debug!(conn_id = %id, error = %err, "failed to send close frame");
        }
        Err(_) => tracing::debug!(conn_id = %id, "close frame timed out"),
    }
}
