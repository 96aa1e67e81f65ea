//! Per-connection state machine.
//!
//! A [`ProtocolSession`] owns one transport for its whole life:
//!
//! ```text
//! New -> GreetingSent -> AwaitingAuth -> Authenticated -> CommandLoop
//!   \____________\______________\______________\_____________\__> Closed
//! ```
//!
//! Every failure either reaches the client as an error packet or ends the
//! session with the failure recorded on its connection record. The record is
//! removed when the session's [`ConnectionHandle`] drops.
use std::{fmt, sync::Arc};

use log::{debug, info, trace, warn};

use crate::{
    connection::ConnectionHandle,
    executor::QueryExecutor,
    users::UserDirectory,
};

use super::{
    NATIVE_PASSWORD_PLUGIN,
    codec::PacketStream,
    dispatch::{Outcome, dispatch},
    error::{SessionError, TransportError},
    handshake::{AuthInfo, Greeting, authenticate, encode_auth_switch},
    request::Request,
    response::{ErrPacket, Response},
    transport::Transport,
};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent `COM_QUIT`.
    Quit,
    /// The client closed the stream between packets.
    Disconnected,
    AuthFailed,
    /// The server is shutting down.
    Shutdown,
    /// The registry reclaimed the connection as idle.
    Reclaimed,
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Quit => write!(f, "quit"),
            CloseReason::Disconnected => write!(f, "client disconnected"),
            CloseReason::AuthFailed => write!(f, "authentication failed"),
            CloseReason::Shutdown => write!(f, "server shutdown"),
            CloseReason::Reclaimed => write!(f, "idle connection reclaimed"),
            CloseReason::Error(e) => write!(f, "error: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    New,
    GreetingSent,
    AwaitingAuth,
    Authenticated,
    CommandLoop,
    Closed(CloseReason),
}

/// What the session negotiated with its client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub authenticated: bool,
    pub username: Option<String>,
    pub database: Option<String>,
    pub capabilities: u32,
}

pub struct ProtocolSession<T: Transport> {
    stream: PacketStream<T>,
    handle: ConnectionHandle,
    state: SessionState,
    phase: SessionPhase,
    users: Arc<dyn UserDirectory>,
    executor: Arc<dyn QueryExecutor>,
    server_version: String,
}

impl<T: Transport> ProtocolSession<T> {
    pub fn new(
        transport: T,
        handle: ConnectionHandle,
        users: Arc<dyn UserDirectory>,
        executor: Arc<dyn QueryExecutor>,
        server_version: impl Into<String>,
    ) -> Self {
        Self {
            stream: PacketStream::new(transport),
            handle,
            state: SessionState::default(),
            phase: SessionPhase::New,
            users,
            executor,
            server_version: server_version.into(),
        }
    }

    pub fn id(&self) -> u32 {
        self.handle.id()
    }

    pub fn phase(&self) -> &SessionPhase {
        &self.phase
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    fn enter(&mut self, phase: SessionPhase) {
        trace!("(id={}) {:?} -> {:?}", self.id(), self.phase, phase);
        self.phase = phase;
    }

    /// Drives the connection to completion. Consumes the session, so the
    /// registry record is gone by the time this returns.
    pub fn run(mut self) -> CloseReason {
        let reason = match self.serve() {
            Ok(reason) => reason,
            Err(e) => self.fail(e),
        };

        let (bytes_in, bytes_out) = self.stream.take_traffic();
        self.handle.record_activity(bytes_in, bytes_out);
        info!("(id={}) session closed: {reason}", self.id());
        self.enter(SessionPhase::Closed(reason.clone()));
        reason
    }

    fn serve(&mut self) -> Result<CloseReason, SessionError> {
        match self.handshake()? {
            Some(reason) => Ok(reason),
            None => self.command_loop(),
        }
    }

    /// Greeting, handshake response, optional auth switch and the final OK.
    /// Returns a close reason when the client left before authenticating.
    fn handshake(&mut self) -> Result<Option<CloseReason>, SessionError> {
        let greeting = Greeting::new(self.id(), &self.server_version);
        self.stream.write_packet(&greeting.encode())?;
        self.enter(SessionPhase::GreetingSent);

        let Some(packet) = self.stream.read_packet()? else {
            return Ok(Some(self.disconnect_reason()));
        };
        self.enter(SessionPhase::AwaitingAuth);

        let mut info = AuthInfo::decode(packet.payload)?;
        if info.needs_auth_switch() {
            debug!(
                "(id={}) switching client from {:?} to {NATIVE_PASSWORD_PLUGIN}",
                self.id(),
                info.auth_plugin_name
            );
            self.stream
                .write_packet(&encode_auth_switch(NATIVE_PASSWORD_PLUGIN, &greeting.seed))?;
            let Some(reply) = self.stream.read_packet()? else {
                return Ok(Some(self.disconnect_reason()));
            };
            info.auth_response = reply.payload.to_vec();
            info.auth_plugin_name = Some(NATIVE_PASSWORD_PLUGIN.to_string());
        }

        authenticate(&info, &greeting.seed, self.users.as_ref())?;
        if let Some(database) = &info.database {
            self.executor.use_database(database)?;
        }

        self.state = SessionState {
            authenticated: true,
            username: Some(info.username.clone()),
            database: info.database.clone(),
            capabilities: info.capabilities,
        };
        self.handle
            .set_identity(&info.username, info.database.as_deref());
        self.enter(SessionPhase::Authenticated);
        info!("(id={}) user '{}' authenticated", self.id(), info.username);

        self.stream.write_packets(Response::ok().encode())?;
        self.flush_activity();
        Ok(None)
    }

    fn command_loop(&mut self) -> Result<CloseReason, SessionError> {
        self.enter(SessionPhase::CommandLoop);

        loop {
            if self.handle.is_shutting_down() {
                return Ok(CloseReason::Shutdown);
            }

            self.stream.reset_sequence();
            let Some(packet) = self.stream.read_packet()? else {
                return Ok(self.disconnect_reason());
            };
            // A command in flight counts as activity, however long it runs.
            self.flush_activity();

            let outcome = match Request::decode(packet.payload) {
                Ok(request) => self.handle_request(request),
                Err(e) => {
                    debug!("(id={}) rejected command: {e}", self.id());
                    Outcome::Reply(Response::error(&e))
                }
            };

            match outcome {
                Outcome::Quit => return Ok(CloseReason::Quit),
                Outcome::Reply(response) => self.stream.write_packets(response.encode())?,
            }
            self.flush_activity();
        }
    }

    fn handle_request(&mut self, request: Request) -> Outcome {
        trace!("(id={}) {} request", self.id(), request.name());
        let is_query = matches!(request, Request::Query(_));
        let database = self.state.database.clone();

        let outcome = dispatch(request, &mut self.state, self.executor.as_ref());

        if is_query {
            self.handle.record_query();
        }
        if self.state.database != database {
            self.handle.set_database(self.state.database.as_deref());
        }
        outcome
    }

    fn flush_activity(&mut self) {
        let (bytes_in, bytes_out) = self.stream.take_traffic();
        self.handle.record_activity(bytes_in, bytes_out);
    }

    /// A read that hit end-of-stream: either the client left or the server
    /// closed the socket under us.
    fn disconnect_reason(&self) -> CloseReason {
        if self.handle.is_shutting_down() {
            CloseReason::Shutdown
        } else if !self.handle.is_tracked() {
            CloseReason::Reclaimed
        } else {
            CloseReason::Disconnected
        }
    }

    /// Reports the failure to the client where it can still listen, then
    /// records it on the connection.
    fn fail(&mut self, error: SessionError) -> CloseReason {
        let (packet, reason) = match &error {
            SessionError::Auth(e) => {
                warn!("(id={}) {e}", self.id());
                (Some(ErrPacket::from(e)), CloseReason::AuthFailed)
            }
            SessionError::Database(e) => {
                warn!("(id={}) {e}", self.id());
                (Some(ErrPacket::from(e)), CloseReason::Error(e.to_string()))
            }
            SessionError::Transport(TransportError::Protocol(e)) => {
                warn!("(id={}) protocol error: {e}", self.id());
                (Some(ErrPacket::from(e)), CloseReason::Error(e.to_string()))
            }
            SessionError::Transport(TransportError::Io(e)) => {
                let reason = match self.disconnect_reason() {
                    CloseReason::Disconnected => CloseReason::Error(e.to_string()),
                    closed_by_server => closed_by_server,
                };
                debug!("(id={}) transport failed: {e}", self.id());
                (None, reason)
            }
        };

        if let Some(packet) = packet {
            if let Err(e) = self.stream.write_packet(&packet.encode()) {
                debug!("(id={}) could not deliver error packet: {e}", self.id());
            }
        }
        if !matches!(reason, CloseReason::Shutdown | CloseReason::Reclaimed) {
            self.handle.record_failure(&error.to_string());
        }
        reason
    }
}
