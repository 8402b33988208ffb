//! WebSocket layer: transports, connection actors, handlers, registry.
//!
//! The upgrade endpoint hands each new socket to the [`ConnectionRegistry`],
//! which runs a [`connection::Connection`] over it until the peer goes away
//! or stops answering heartbeats.

pub mod connection;
pub mod handler;
pub mod memory;
pub mod message_handler;
pub mod registry;
pub mod transport;

pub use connection::{ConnectionHandle, ConnectionLimits, ConnectionSettings, StopReason};
pub use message_handler::{MessageContext, MessageHandler, handler_fn};
pub use registry::{ConnectionRegistry, HandlerMode};
pub use transport::{AxumTransport, Transport, TransportError};
