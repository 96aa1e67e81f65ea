//! MySQL client/server protocol.
//!
//! This module implements the server side of the MySQL wire protocol (protocol
//! version 10 with the 4.1 handshake): packet framing, the opening handshake,
//! command decoding and dispatch, response encoding, and the per-connection
//! session state machine that ties them together.
//!
//! # Overview
//!
//! A connection goes through a fixed sequence of exchanges:
//!
//! ```text
//! server                               client
//!   | -- greeting (seq 0) ------------->  |
//!   | <------------ auth response (seq 1) |
//!   | -- OK / ERR (seq 2) ------------->  |
//!   | <------------------ command (seq 0) |
//!   | -- response packets (seq 1..) --->  |
//!   |               ...                   |
//! ```
//!
//! Every command restarts the sequence at 0 and every response continues the
//! sequence of the request that triggered it.
//!
//! # Key Components
//!
//! - [`codec`]: length-prefixed framing and the length-encoded integer helpers.
//! - [`handshake`]: server greeting, client auth response, authentication.
//! - [`request`]: decoding of command packets into [`Request`].
//! - [`dispatch`]: routing of a [`Request`] to its handler.
//! - [`response`]: OK, ERR, EOF and result-set encoding.
//! - [`session`]: the [`ProtocolSession`] state machine.
//! - [`server`]: TCP listener handing sockets to the connection manager.
//!
//! # See Also
//!
//! - [`connection`](crate::connection): admission control and connection tracking.
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod request;
pub mod response;
pub mod server;
pub mod session;
pub mod transport;

pub(crate) mod thread;

pub use codec::{Packet, PacketStream};
pub use error::{AuthError, CapacityError, ProtocolError, SessionError, TransportError};
pub use request::Request;
pub use response::Response;
pub use server::{Server, ShutdownSignal};
pub use session::{CloseReason, ProtocolSession, SessionPhase, SessionState};
pub use thread::PoolError;
pub use transport::{Closer, Transport};

pub const PROTOCOL_VERSION: u8 = 10;
pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";
pub const SEED_LEN: usize = 20;

pub const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
pub const CLIENT_FOUND_ROWS: u32 = 0x0000_0002;
pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
pub const CLIENT_ODBC: u32 = 0x0000_0040;
pub const CLIENT_IGNORE_SPACE: u32 = 0x0000_0100;
pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
pub const CLIENT_INTERACTIVE: u32 = 0x0000_0400;
pub const CLIENT_IGNORE_SIGPIPE: u32 = 0x0000_1000;
pub const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
pub const CLIENT_MULTI_RESULTS: u32 = 0x0002_0000;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 0x0020_0000;

/// Capabilities advertised in the greeting.
///
/// Without `CLIENT_DEPRECATE_EOF` result sets always end with classic EOF
/// packets; without `CLIENT_SSL` and `CLIENT_COMPRESS` the stream is never
/// upgraded.
pub const SERVER_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
    | CLIENT_FOUND_ROWS
    | CLIENT_LONG_FLAG
    | CLIENT_CONNECT_WITH_DB
    | CLIENT_ODBC
    | CLIENT_IGNORE_SPACE
    | CLIENT_PROTOCOL_41
    | CLIENT_INTERACTIVE
    | CLIENT_IGNORE_SIGPIPE
    | CLIENT_TRANSACTIONS
    | CLIENT_SECURE_CONNECTION
    | CLIENT_MULTI_RESULTS
    | CLIENT_PLUGIN_AUTH
    | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA;

/// utf8_general_ci
pub const UTF8_GENERAL_CI: u8 = 33;
/// binary
pub const BINARY_CHARSET: u16 = 63;

pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
