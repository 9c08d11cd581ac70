//! Connection management
//!
//! This module handles:
//! * Transport (TCP with optional TLS upgrade, IPv4 resolution)
//! * Connection lifecycle (startup, auth, query execution)
//! * State machine enforcement
//! * The request queue and the worker task that owns the connection

mod conn;
mod queue;
mod state;
mod tls;
mod transport;
mod worker;

pub use conn::{Connection, ConnectionConfig, ConnectionConfigBuilder, DEFAULT_PORT};
pub use queue::{request_queue, PendingQuery, QueueHandle, ReplyReceiver, RequestQueue};
pub use state::ConnectionState;
pub use tls::{parse_server_name, SslMode, TlsConfig};
pub use transport::{resolve_ipv4, Transport};
pub use worker::{ConnectStatus, Worker};
