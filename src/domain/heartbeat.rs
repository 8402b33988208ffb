//! Application-level heartbeat state machine.
//!
//! The machine is owned by the connection's write loop. The read loop never
//! touches timers; it reports [`LivenessEvent`]s over a channel and the write
//! loop feeds them here. All transitions take the current instant as input so
//! the machine itself is pure and deterministic.
//!
//! ```text
//!   AwaitingPing ──deadline──▶ (send ping) ──▶ AwaitingPong ──deadline──▶ Closed
//!        ▲                                          │
//!        └────────────── activity / pong ───────────┘
//! ```

use std::time::Duration;

use tokio::time::Instant;

/// Default interval of silence after which a ping is sent.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(10);

/// Default time allowed for a pong after a ping was sent.
pub const DEFAULT_PONG_PERIOD: Duration = Duration::from_secs(15);

/// Ping and pong periods applied to one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Silence interval before a ping is sent.
    pub ping_period: Duration,
    /// Time to wait for a pong after a ping.
    pub pong_period: Duration,
}

impl HeartbeatConfig {
    /// Creates a config from raw periods. Use [`Self::normalized`] before
    /// handing it to a connection.
    #[must_use]
    pub const fn new(ping_period: Duration, pong_period: Duration) -> Self {
        Self {
            ping_period,
            pong_period,
        }
    }

    /// Returns a config where the pong period strictly exceeds the ping
    /// period.
    ///
    /// A zero ping period falls back to [`DEFAULT_PING_PERIOD`]. A pong period
    /// that does not exceed the ping period is corrected to twice the ping
    /// period.
    #[must_use]
    pub fn normalized(self) -> Self {
        let ping_period = if self.ping_period.is_zero() {
            DEFAULT_PING_PERIOD
        } else {
            self.ping_period
        };
        let pong_period = if self.pong_period <= ping_period {
            ping_period.saturating_mul(2)
        } else {
            self.pong_period
        };
        Self {
            ping_period,
            pong_period,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PING_PERIOD, DEFAULT_PONG_PERIOD)
    }
}

/// Inbound activity reported by the read loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessEvent {
    /// Any frame other than a pong was received.
    Activity,
    /// A pong envelope was received.
    Pong,
}

/// What the write loop must do when the current deadline elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Deadline not reached yet.
    Wait,
    /// Send a ping and then call [`Heartbeat::on_ping_sent`].
    SendPing,
    /// The peer is dead: close the transport.
    Close,
}

/// Current heartbeat state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    /// Waiting for silence to last until `deadline` before pinging.
    AwaitingPing {
        /// Instant at which a ping is due.
        deadline: Instant,
    },
    /// A ping was sent; a pong (or any traffic) is due by `deadline`.
    AwaitingPong {
        /// Instant at which the peer is declared dead.
        deadline: Instant,
    },
    /// The liveness timeout fired; no further transitions happen.
    Closed,
}

/// Single-owner heartbeat state machine.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    config: HeartbeatConfig,
    state: HeartbeatState,
}

impl Heartbeat {
    /// Starts in [`HeartbeatState::AwaitingPing`] with a full ping period.
    #[must_use]
    pub fn new(config: HeartbeatConfig, now: Instant) -> Self {
        Self {
            config,
            state: HeartbeatState::AwaitingPing {
                deadline: now + config.ping_period,
            },
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> HeartbeatState {
        self.state
    }

    /// Next instant at which the write loop must act, `None` once closed.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        match self.state {
            HeartbeatState::AwaitingPing { deadline }
            | HeartbeatState::AwaitingPong { deadline } => Some(deadline),
            HeartbeatState::Closed => None,
        }
    }

    /// Returns `true` once the liveness timeout has fired.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, HeartbeatState::Closed)
    }

    /// Records inbound traffic: the ping schedule restarts from `now` and any
    /// pending liveness timeout is cancelled.
    pub fn observe(&mut self, event: LivenessEvent, now: Instant) {
        if self.is_closed() {
            return;
        }
        if event == LivenessEvent::Pong {
            tracing::trace!("pong observed");
        }
        self.state = HeartbeatState::AwaitingPing {
            deadline: now + self.config.ping_period,
        };
    }

    /// Evaluates the current deadline.
    pub fn on_deadline(&mut self, now: Instant) -> HeartbeatAction {
        match self.state {
            HeartbeatState::AwaitingPing { deadline } if now >= deadline => {
                HeartbeatAction::SendPing
            }
            HeartbeatState::AwaitingPong { deadline } if now >= deadline => {
                self.state = HeartbeatState::Closed;
                HeartbeatAction::Close
            }
            _ => HeartbeatAction::Wait,
        }
    }

    /// Starts the pong timer after a ping went out.
    pub fn on_ping_sent(&mut self, now: Instant) {
        if self.is_closed() {
            return;
        }
        self.state = HeartbeatState::AwaitingPong {
            deadline: now + self.config.pong_period,
        };
    }
}
