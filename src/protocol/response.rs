//! Response encoding.
//!
//! A [`Response`] encodes into the ordered list of payloads that answer one
//! command. The session writes them with consecutive sequence numbers.
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    executor::QueryError,
    result::{Column, TabularResult, Value},
};

use super::{
    BINARY_CHARSET, SERVER_STATUS_AUTOCOMMIT, UTF8_GENERAL_CI,
    codec::{write_lenenc_bytes, write_lenenc_int, write_lenenc_str},
    error::{AuthError, CapacityError, ProtocolError},
};

const OK_HEADER: u8 = 0x00;
const EOF_HEADER: u8 = 0xfe;
const ERR_HEADER: u8 = 0xff;
const NULL_VALUE: u8 = 0xfb;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: String,
}

impl Default for OkPacket {
    fn default() -> Self {
        Self {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
            info: String::new(),
        }
    }
}

impl OkPacket {
    pub fn affected(affected_rows: u64, last_insert_id: u64) -> Self {
        Self {
            affected_rows,
            last_insert_id,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(11 + self.info.len());
        buf.put_u8(OK_HEADER);
        write_lenenc_int(&mut buf, self.affected_rows);
        write_lenenc_int(&mut buf, self.last_insert_id);
        buf.put_u16_le(self.status_flags);
        buf.put_u16_le(self.warnings);
        buf.put_slice(self.info.as_bytes());
        buf.freeze()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub code: u16,
    pub sql_state: [u8; 5],
    pub message: String,
}

impl ErrPacket {
    /// SQL states that are not exactly five ASCII characters fall back to
    /// `HY000`.
    pub fn new(code: u16, sql_state: &str, message: impl Into<String>) -> Self {
        let sql_state = match <[u8; 5]>::try_from(sql_state.as_bytes()) {
            Ok(state) if state.is_ascii() => state,
            _ => *b"HY000",
        };
        Self {
            code,
            sql_state,
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(9 + self.message.len());
        buf.put_u8(ERR_HEADER);
        buf.put_u16_le(self.code);
        buf.put_u8(b'#');
        buf.put_slice(&self.sql_state);
        buf.put_slice(self.message.as_bytes());
        buf.freeze()
    }
}

impl From<&ProtocolError> for ErrPacket {
    fn from(value: &ProtocolError) -> Self {
        ErrPacket::new(value.code(), value.sql_state(), value.to_string())
    }
}

impl From<&AuthError> for ErrPacket {
    fn from(value: &AuthError) -> Self {
        ErrPacket::new(value.code(), value.sql_state(), value.to_string())
    }
}

impl From<&CapacityError> for ErrPacket {
    fn from(value: &CapacityError) -> Self {
        ErrPacket::new(value.code(), value.sql_state(), value.to_string())
    }
}

impl From<&QueryError> for ErrPacket {
    fn from(value: &QueryError) -> Self {
        ErrPacket::new(value.code, &value.sql_state, value.message.clone())
    }
}

pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl Default for EofPacket {
    fn default() -> Self {
        Self {
            warnings: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
        }
    }
}

impl EofPacket {
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(EOF_HEADER);
        buf.put_u16_le(self.warnings);
        buf.put_u16_le(self.status_flags);
        buf.freeze()
    }
}

/// Column definition (`Protocol::ColumnDefinition41`).
pub fn encode_column(column: &Column) -> Bytes {
    let mut buf = BytesMut::with_capacity(32 + 2 * column.name.len());

    write_lenenc_str(&mut buf, "def");
    write_lenenc_str(&mut buf, &column.schema);
    write_lenenc_str(&mut buf, &column.table);
    write_lenenc_str(&mut buf, &column.table);
    write_lenenc_str(&mut buf, &column.name);
    write_lenenc_str(&mut buf, &column.name);

    // length of the fixed-length fields that follow
    write_lenenc_int(&mut buf, 0x0c);
    let charset = if column.column_type.is_binary() {
        BINARY_CHARSET
    } else {
        UTF8_GENERAL_CI as u16
    };
    buf.put_u16_le(charset);
    buf.put_u32_le(column.length);
    buf.put_u8(column.column_type as u8);
    buf.put_u16_le(column.flags);
    buf.put_u8(column.decimals);
    buf.put_u16(0);

    buf.freeze()
}

/// Text-protocol row: one length-encoded string per value, `0xFB` for NULL.
pub fn encode_row(row: &[Value]) -> Bytes {
    let mut buf = BytesMut::new();
    for value in row {
        match value.to_text() {
            Some(text) => write_lenenc_bytes(&mut buf, &text),
            None => buf.put_u8(NULL_VALUE),
        }
    }
    buf.freeze()
}

/// Everything a command can be answered with.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Ok(OkPacket),
    Err(ErrPacket),
    ResultSet(TabularResult),
    /// `COM_FIELD_LIST` answer: column definitions then EOF.
    FieldList(Vec<Column>),
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok(OkPacket::default())
    }

    pub fn error(err: impl Into<ErrPacket>) -> Self {
        Response::Err(err.into())
    }

    pub fn encode(&self) -> Vec<Bytes> {
        match self {
            Response::Ok(ok) => vec![ok.encode()],
            Response::Err(err) => vec![err.encode()],
            // A result without columns has no result-set form on the wire.
            Response::ResultSet(result) if result.columns.is_empty() => {
                vec![OkPacket::default().encode()]
            }
            Response::ResultSet(result) => {
                let mut packets = Vec::with_capacity(result.columns.len() + result.rows.len() + 3);

                let mut count = BytesMut::with_capacity(9);
                write_lenenc_int(&mut count, result.columns.len() as u64);
                packets.push(count.freeze());

                packets.extend(result.columns.iter().map(encode_column));
                packets.push(EofPacket::default().encode());
                packets.extend(result.rows.iter().map(|row| encode_row(row)));
                packets.push(EofPacket::default().encode());
                packets
            }
            Response::FieldList(columns) => {
                let mut packets: Vec<Bytes> = columns.iter().map(encode_column).collect();
                packets.push(EofPacket::default().encode());
                packets
            }
        }
    }
}
