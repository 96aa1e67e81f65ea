use bytes::{Buf, Bytes};

use super::{codec::read_null_terminated, error::ProtocolError};

pub const COM_QUIT: u8 = 0x01;
pub const COM_INIT_DB: u8 = 0x02;
pub const COM_QUERY: u8 = 0x03;
pub const COM_FIELD_LIST: u8 = 0x04;
pub const COM_PING: u8 = 0x0e;

/// A decoded command packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Quit,
    InitDb(String),
    Query(String),
    FieldList {
        table: String,
        wildcard: Option<String>,
    },
    Ping,
}

impl Request {
    pub fn decode(mut payload: Bytes) -> Result<Self, ProtocolError> {
        if !payload.has_remaining() {
            return Err(ProtocolError::EmptyCommand);
        }

        match payload.get_u8() {
            COM_QUIT => Ok(Request::Quit),
            COM_INIT_DB => Ok(Request::InitDb(utf8(payload, "database name")?)),
            COM_QUERY => Ok(Request::Query(utf8(payload, "query")?)),
            COM_FIELD_LIST => {
                // Old clients omit the terminator when no wildcard follows.
                let table = match read_null_terminated(&mut payload) {
                    Ok(table) => table,
                    Err(_) => payload.split_to(payload.len()),
                };
                let wildcard = if payload.has_remaining() {
                    Some(utf8(payload, "wildcard")?)
                } else {
                    None
                };
                Ok(Request::FieldList {
                    table: utf8(table, "table name")?,
                    wildcard,
                })
            }
            COM_PING => Ok(Request::Ping),
            other => Err(ProtocolError::UnsupportedCommand(other)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Request::Quit => "quit",
            Request::InitDb(_) => "init-db",
            Request::Query(_) => "query",
            Request::FieldList { .. } => "field-list",
            Request::Ping => "ping",
        }
    }
}

fn utf8(bytes: Bytes, field: &str) -> Result<String, ProtocolError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| ProtocolError::Malformed(format!("{field} is not valid UTF-8")))
}
