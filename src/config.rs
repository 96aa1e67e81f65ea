//! Server configuration.
//!
//! A [`ServerConfig`] is built once at startup (see `floe_server`) and shared
//! by reference with the connection manager and its collaborators.
use std::{net::SocketAddr, time::Duration};

pub const DEFAULT_PORT: u16 = 3306;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// Version string announced in the greeting.
    pub server_version: String,
    /// Admission limit on concurrently tracked connections.
    pub max_connections: usize,
    /// Connections idle for longer than this are reclaimed.
    pub idle_timeout: Duration,
    /// Period of the idle reclamation sweep.
    pub reclaim_interval: Duration,
    /// Send a "Too many connections" error before closing a rejected socket.
    pub notify_rejected: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            server_version: format!("8.0.0-floe-{}", env!("CARGO_PKG_VERSION")),
            max_connections: 151,
            idle_timeout: Duration::from_secs(300),
            reclaim_interval: Duration::from_secs(60),
            notify_rejected: true,
        }
    }
}
