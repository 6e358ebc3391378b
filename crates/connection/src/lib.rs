//! `gb-connection`: connection manager for the Godot editor bridge.
//!
//! Owns the single WebSocket to the editor addon, performs the versioned
//! handshake, correlates replies to outstanding commands, keeps the socket
//! alive, reconnects with back-off, and explains why it is disconnected.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  Connection (Arc<Inner>, cloneable handle)                 │
//! │                                                            │
//! │  send_command ──► PendingTable.register ──► writer task ──►│── ws ──► addon
//! │                         ▲                                  │
//! │                         │ resolve / reject / expire        │
//! │  reader task ◄──────────┴──────────── decode ◄─────────────│◄─ ws ─── addon
//! │       │                                                    │
//! │       ├─ Pong ──► KeepaliveMonitor                         │
//! │       └─ Close ─► DiagnosticsRecorder ─► ReconnectScheduler│
//! │                                                            │
//! │  EventBus ──► subscribe()                                  │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Connection flow
//!
//! 1. Dial `ws://{host}:{port}`
//! 2. Send `mcp_handshake { server_version }` and wait up to 5s
//! 3. Record addon/Godot/project identity; a mismatch or failure is an
//!    event, never a reason to refuse commands
//! 4. Main loop:
//!    - Text frames complete pending commands by id
//!    - Ping every 30s; no Pong within 10s drops the socket
//! 5. On close: fail every pending command, then retry on the
//!    1/2/4/8/16/30s ladder unless the close was requested

pub mod builder;
pub mod connection;
pub mod diagnostics;
pub mod events;
pub mod handshake;
pub mod keepalive;
pub mod log_limit;
pub mod pending;
pub mod reconnect;
pub mod timer;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::ConnectionBuilder;
pub use connection::Connection;
pub use diagnostics::{ConnectionDiagnostics, ConnectionState, DisconnectReason};
pub use events::ConnectionEvent;
pub use handshake::{HandshakeResult, HandshakeStatus};
pub use keepalive::KeepaliveConfig;
pub use log_limit::LogLimiter;
pub use reconnect::ReconnectBackoff;
pub use types::BridgeError;

pub use gb_protocol::{CLOSE_CODE_ALREADY_CONNECTED, DEFAULT_HOST, DEFAULT_PORT};
