//! Opening exchange: server greeting, client auth response, authentication.
use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::{Rng, distributions::Alphanumeric, thread_rng};

use crate::users::UserDirectory;

use super::{
    CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH, CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA,
    CLIENT_PROTOCOL_41, CLIENT_SECURE_CONNECTION, NATIVE_PASSWORD_PLUGIN, PROTOCOL_VERSION,
    SEED_LEN, SERVER_CAPABILITIES, SERVER_STATUS_AUTOCOMMIT, UTF8_GENERAL_CI,
    codec::{read_lenenc_bytes, read_null_terminated, read_null_terminated_string, write_null_terminated_str},
    error::{AuthError, AuthFailure, ProtocolError},
};

/// Fixed part of a 4.1 auth response: capabilities, max packet size,
/// charset and 23 reserved bytes.
const AUTH_RESPONSE_FIXED_LEN: usize = 32;
const SEED_PART1_LEN: usize = 8;

/// Fresh authentication seed. Alphanumeric so the seed never contains the NUL
/// byte that terminates it on the wire.
pub fn generate_seed() -> [u8; SEED_LEN] {
    let mut seed = [0u8; SEED_LEN];
    for (slot, byte) in seed.iter_mut().zip(thread_rng().sample_iter(&Alphanumeric)) {
        *slot = byte;
    }
    seed
}

/// Initial handshake packet sent by the server.
#[derive(Debug, Clone)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub seed: [u8; SEED_LEN],
    pub capabilities: u32,
    pub character_set: u8,
    pub status_flags: u16,
    pub auth_plugin_name: String,
}

impl Greeting {
    pub fn new(connection_id: u32, server_version: &str) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            server_version: server_version.to_string(),
            connection_id,
            seed: generate_seed(),
            capabilities: SERVER_CAPABILITIES,
            character_set: UTF8_GENERAL_CI,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            auth_plugin_name: NATIVE_PASSWORD_PLUGIN.to_string(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.server_version.len());

        buf.put_u8(self.protocol_version);
        write_null_terminated_str(&mut buf, &self.server_version);
        buf.put_u32_le(self.connection_id);

        buf.put_slice(&self.seed[..SEED_PART1_LEN]);
        buf.put_u8(0);

        buf.put_u16_le((self.capabilities & 0xffff) as u16);
        buf.put_u8(self.character_set);
        buf.put_u16_le(self.status_flags);
        buf.put_u16_le((self.capabilities >> 16) as u16);

        // seed length including its NUL terminator
        buf.put_u8(SEED_LEN as u8 + 1);
        buf.put_bytes(0, 10);

        buf.put_slice(&self.seed[SEED_PART1_LEN..]);
        buf.put_u8(0);

        write_null_terminated_str(&mut buf, &self.auth_plugin_name);
        buf.freeze()
    }
}

/// Auth switch request (`0xFE`) asking the client to answer with another
/// plugin over the same seed.
pub fn encode_auth_switch(plugin: &str, seed: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + plugin.len() + seed.len() + 1);
    buf.put_u8(0xfe);
    write_null_terminated_str(&mut buf, plugin);
    buf.put_slice(seed);
    buf.put_u8(0);
    buf.freeze()
}

/// The client's handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthInfo {
    pub capabilities: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: Option<String>,
}

impl AuthInfo {
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        if payload.len() < AUTH_RESPONSE_FIXED_LEN {
            return Err(ProtocolError::Malformed(format!(
                "handshake response too short: {} bytes",
                payload.len()
            )));
        }

        let capabilities = payload.get_u32_le();
        if capabilities & CLIENT_PROTOCOL_41 == 0 {
            return Err(ProtocolError::UnsupportedClient);
        }
        let max_packet_size = payload.get_u32_le();
        let character_set = payload.get_u8();
        payload.advance(23);

        let username = read_null_terminated_string(&mut payload)?;

        let auth_response = if capabilities & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            read_lenenc_bytes(&mut payload)?.to_vec()
        } else if capabilities & CLIENT_SECURE_CONNECTION != 0 {
            if !payload.has_remaining() {
                return Err(ProtocolError::Malformed(
                    "missing auth response length".to_string(),
                ));
            }
            let len = payload.get_u8() as usize;
            if payload.remaining() < len {
                return Err(ProtocolError::Malformed(
                    "auth response exceeds packet".to_string(),
                ));
            }
            payload.split_to(len).to_vec()
        } else {
            read_null_terminated(&mut payload)?.to_vec()
        };

        let database = optional_string(&mut payload, capabilities & CLIENT_CONNECT_WITH_DB != 0)?
            .filter(|db| !db.is_empty());
        let auth_plugin_name = optional_string(&mut payload, capabilities & CLIENT_PLUGIN_AUTH != 0)?;

        Ok(Self {
            capabilities,
            max_packet_size,
            character_set,
            username,
            auth_response,
            database,
            auth_plugin_name,
        })
    }

    /// Whether the client expects an auth switch to the native plugin.
    pub fn needs_auth_switch(&self) -> bool {
        matches!(&self.auth_plugin_name, Some(plugin) if plugin != NATIVE_PASSWORD_PLUGIN)
    }
}

/// A field announced by a capability flag. Absent entirely means `None`;
/// present but unterminated is malformed.
fn optional_string(payload: &mut Bytes, announced: bool) -> Result<Option<String>, ProtocolError> {
    if !announced || !payload.has_remaining() {
        return Ok(None);
    }
    read_null_terminated_string(payload).map(Some)
}

/// Gates the session on the user directory.
pub fn authenticate(
    info: &AuthInfo,
    seed: &[u8],
    users: &dyn UserDirectory,
) -> Result<(), AuthError> {
    if !users.exists(&info.username) {
        return Err(AuthError::new(&info.username, AuthFailure::UnknownUser));
    }
    if !users.verify(&info.username, seed, &info.auth_response) {
        return Err(AuthError::new(&info.username, AuthFailure::BadCredentials));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use bytes::{BufMut, Bytes, BytesMut};

    use crate::protocol::{
        CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH, CLIENT_PROTOCOL_41, CLIENT_SECURE_CONNECTION,
        NATIVE_PASSWORD_PLUGIN,
    };

    /// Builds a handshake response the way a 4.1 client does.
    pub fn auth_response(username: &str, auth: &[u8], database: Option<&str>) -> Bytes {
        let mut capabilities = CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_PLUGIN_AUTH;
        if database.is_some() {
            capabilities |= CLIENT_CONNECT_WITH_DB;
        }

        let mut buf = BytesMut::new();
        buf.put_u32_le(capabilities);
        buf.put_u32_le(16 * 1024 * 1024);
        buf.put_u8(33);
        buf.put_bytes(0, 23);
        buf.put_slice(username.as_bytes());
        buf.put_u8(0);
        buf.put_u8(auth.len() as u8);
        buf.put_slice(auth);
        if let Some(database) = database {
            buf.put_slice(database.as_bytes());
            buf.put_u8(0);
        }
        buf.put_slice(NATIVE_PASSWORD_PLUGIN.as_bytes());
        buf.put_u8(0);
        buf.freeze()
    }
}
