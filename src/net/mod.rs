//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Networked listener:
//!     TCP accept (listener.rs, connection limits)
//!     → connection.rs (tracking for drain)
//!     → hyper auto (HTTP/1.1 + HTTP/2) → axum Router
//!
//! Self-listener:
//!     channel.rs (ChannelRegistry::for_name(service))
//!     → in_process.rs (InProcessListener::call)
//!     → axum Router (no socket)
//!
//! Listener States:
//!     Bound → Accepting → Draining → Terminated
//! ```
//!
//! # Design Decisions
//! - Sockets are bound while building so port conflicts fail initialize()
//! - Each connection and in-process call is tracked for graceful shutdown
//! - The `Transport` trait is the seam tests use to observe ordering

pub mod channel;
pub mod connection;
pub mod in_process;
pub mod listener;

pub use channel::{Channel, ChannelError, ChannelRegistry};
pub use connection::{ConnectionGuard, ConnectionTracker};
pub use in_process::{InProcessListener, InProcessState};
pub use listener::{Listener, ListenerError, NetworkListener, TcpTransport, Transport};
