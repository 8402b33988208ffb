//! Domain layer: connection identity, wire envelope, and heartbeat protocol.
//!
//! These types carry no I/O. The connection actor in [`crate::ws`] drives
//! them from its read and write loops.

pub mod connection_id;
pub mod envelope;
pub mod heartbeat;

pub use connection_id::ConnectionId;
pub use envelope::{Envelope, EnvelopeError, Inbound};
pub use heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig, LivenessEvent};
