//! # beacon-hub
//!
//! Connection-liveness and fan-out layer for long-lived WebSocket push
//! connections.
//!
//! The hub sits above an already-established message transport. For every
//! accepted transport it runs a connection actor that detects silently-dead
//! peers with an application-level ping/pong heartbeat, and it tracks all
//! live connections in a registry that can broadcast to them as a group.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket)
//!     │
//!     ├── Upgrade handler (ws/handler)
//!     │
//!     ├── ConnectionRegistry (ws/registry)
//!     │      └── live set ── BroadcastHandler
//!     │
//!     ├── Connection actor (ws/connection)
//!     │      ├── read loop  ── MessageHandler (capped tasks)
//!     │      └── write loop ── Heartbeat FSM (domain/heartbeat)
//!     │
//!     └── Transport (ws/transport: axum adapter, ws/memory)
//! ```
//!
//! ## Wire format
//!
//! Text frames carrying `{"msg": ..., "method": ..., "uid": ..., "params": ...}`.
//! The server sends `{"msg":"ping"}` after a period of silence and
//! closes the connection when nothing (not even `{"msg":"pong"}`) arrives
//! within the pong period.

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod ws;
