//! Packet framing.
//!
//! Every protocol packet is a 4-byte header followed by its payload:
//!
//! ```text
//! +---------+---------+---------+-----+------------------+
//! | len[0]  | len[1]  | len[2]  | seq | payload (len)    |
//! +---------+---------+---------+-----+------------------+
//! ```
//!
//! The length is a 3-byte little-endian integer, so one frame carries at most
//! [`MAX_PAYLOAD_LEN`] bytes. Larger payloads are split into consecutive
//! frames, all but the last of maximum length; a payload whose length is an
//! exact multiple of the maximum ends with an empty frame. Each frame consumes
//! one sequence number.
//!
//! This module also carries the length-encoded integer/string helpers shared
//! by the handshake and response encoders.
use std::io::{self, ErrorKind, Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;

use super::error::{ProtocolError, TransportError};

pub const MAX_PAYLOAD_LEN: usize = 0xff_ffff;
pub const HEADER_LEN: usize = 4;
/// Largest reassembled payload accepted from a client (64 MiB).
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// One logical packet: a reassembled payload and the sequence number of its
/// first frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    /// Number of frames the payload occupies on the wire.
    pub fn frames(&self) -> usize {
        self.payload.len() / MAX_PAYLOAD_LEN + 1
    }

    /// Sequence number following the last frame of this packet.
    pub fn next_sequence_id(&self) -> u8 {
        self.sequence_id.wrapping_add(self.frames() as u8)
    }

    /// Bytes this packet occupies on the wire, headers included.
    pub fn wire_len(&self) -> usize {
        self.payload.len() + self.frames() * HEADER_LEN
    }
}

/// Writes `payload` starting at sequence number `sequence_id`, splitting it
/// into as many frames as needed. Returns the next sequence number.
pub fn write_packet<W: Write>(writer: &mut W, payload: &[u8], sequence_id: u8) -> io::Result<u8> {
    let mut sequence_id = sequence_id;
    let mut rest = payload;

    loop {
        let len = rest.len().min(MAX_PAYLOAD_LEN);
        let (chunk, tail) = rest.split_at(len);

        let mut frame = BytesMut::with_capacity(HEADER_LEN + len);
        frame.put_uint_le(len as u64, 3);
        frame.put_u8(sequence_id);
        frame.put_slice(chunk);
        writer.write_all(&frame)?;
        trace!("wrote frame: len={len}, seq={sequence_id}");

        sequence_id = sequence_id.wrapping_add(1);
        rest = tail;
        if len < MAX_PAYLOAD_LEN {
            break;
        }
    }

    writer.flush()?;
    Ok(sequence_id)
}

/// Reads one logical packet whose first frame must carry `expected_seq`,
/// bounded by [`DEFAULT_MAX_PACKET_SIZE`].
///
/// Returns `Ok(None)` when the peer closed the stream cleanly before sending
/// any byte of a new packet.
pub fn read_packet<R: Read>(
    reader: &mut R,
    expected_seq: u8,
) -> Result<Option<Packet>, TransportError> {
    read_packet_bounded(reader, expected_seq, DEFAULT_MAX_PACKET_SIZE)
}

/// Like [`read_packet`], but a reassembled payload longer than `max_len` is
/// malformed. Buffers grow with the bytes actually received, never with the
/// length a header announces.
pub fn read_packet_bounded<R: Read>(
    reader: &mut R,
    expected_seq: u8,
    max_len: usize,
) -> Result<Option<Packet>, TransportError> {
    let mut payload = Vec::new();
    let mut sequence_id = expected_seq;
    let mut first = true;

    loop {
        let mut header = [0u8; HEADER_LEN];
        let read = read_full(reader, &mut header)?;
        if read == 0 && first {
            return Ok(None);
        }
        if read < HEADER_LEN {
            return Err(ProtocolError::Truncated {
                expected: HEADER_LEN,
                actual: read,
            }
            .into());
        }

        let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
        if header[3] != sequence_id {
            return Err(ProtocolError::SequenceMismatch {
                expected: sequence_id,
                actual: header[3],
            }
            .into());
        }
        if payload.len() + len > max_len {
            return Err(ProtocolError::Malformed(format!(
                "packet exceeds maximum size of {max_len} bytes"
            ))
            .into());
        }

        let read = reader.by_ref().take(len as u64).read_to_end(&mut payload)?;
        if read < len {
            return Err(ProtocolError::Truncated {
                expected: len,
                actual: read,
            }
            .into());
        }
        trace!("read frame: len={len}, seq={sequence_id}");

        sequence_id = sequence_id.wrapping_add(1);
        first = false;
        if len < MAX_PAYLOAD_LEN {
            break;
        }
    }

    Ok(Some(Packet::new(expected_seq, payload)))
}

/// Fills `buf` unless the stream ends first; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Send/receive sequence counters of one connection.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    pub recv: u8,
    pub send: u8,
}

/// A transport with sequence bookkeeping and traffic accounting.
pub struct PacketStream<T: Read + Write> {
    stream: T,
    sequence: Sequence,
    bytes_read: u64,
    bytes_written: u64,
    max_packet_size: usize,
}

impl<T: Read + Write> PacketStream<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            sequence: Sequence::default(),
            bytes_read: 0,
            bytes_written: 0,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    pub fn with_max_packet_size(mut self, max_packet_size: usize) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Starts a new exchange; the next packet read must carry sequence 0.
    pub fn reset_sequence(&mut self) {
        self.sequence = Sequence::default();
    }

    pub fn read_packet(&mut self) -> Result<Option<Packet>, TransportError> {
        let packet =
            read_packet_bounded(&mut self.stream, self.sequence.recv, self.max_packet_size)?;
        if let Some(packet) = &packet {
            let next = packet.next_sequence_id();
            self.sequence = Sequence {
                recv: next,
                send: next,
            };
            self.bytes_read += packet.wire_len() as u64;
        }
        Ok(packet)
    }

    pub fn write_packet(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let next = write_packet(&mut self.stream, payload, self.sequence.send)?;
        let frames = payload.len() / MAX_PAYLOAD_LEN + 1;
        self.bytes_written += (payload.len() + frames * HEADER_LEN) as u64;
        self.sequence = Sequence {
            recv: next,
            send: next,
        };
        Ok(())
    }

    pub fn write_packets<I, B>(&mut self, payloads: I) -> Result<(), TransportError>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        for payload in payloads {
            self.write_packet(payload.as_ref())?;
        }
        Ok(())
    }

    /// Returns `(bytes_read, bytes_written)` since the previous call.
    pub fn take_traffic(&mut self) -> (u64, u64) {
        let traffic = (self.bytes_read, self.bytes_written);
        self.bytes_read = 0;
        self.bytes_written = 0;
        traffic
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }
}

pub fn write_lenenc_int(buf: &mut BytesMut, value: u64) {
    if value < 251 {
        buf.put_u8(value as u8);
    } else if value < 1 << 16 {
        buf.put_u8(0xfc);
        buf.put_u16_le(value as u16);
    } else if value < 1 << 24 {
        buf.put_u8(0xfd);
        buf.put_uint_le(value, 3);
    } else {
        buf.put_u8(0xfe);
        buf.put_u64_le(value);
    }
}

pub fn write_lenenc_bytes(buf: &mut BytesMut, value: &[u8]) {
    write_lenenc_int(buf, value.len() as u64);
    buf.put_slice(value);
}

pub fn write_lenenc_str(buf: &mut BytesMut, value: &str) {
    write_lenenc_bytes(buf, value.as_bytes());
}

pub fn write_null_terminated_str(buf: &mut BytesMut, value: &str) {
    buf.put_slice(value.as_bytes());
    buf.put_u8(0);
}

pub fn read_lenenc_int(buf: &mut Bytes) -> Result<u64, ProtocolError> {
    if !buf.has_remaining() {
        return Err(ProtocolError::Malformed(
            "missing length-encoded integer".to_string(),
        ));
    }

    let width = match buf.get_u8() {
        first @ 0..=0xfa => return Ok(first as u64),
        0xfc => 2,
        0xfd => 3,
        0xfe => 8,
        first => {
            return Err(ProtocolError::Malformed(format!(
                "invalid length-encoded integer prefix 0x{first:02x}"
            )));
        }
    };

    if buf.remaining() < width {
        return Err(ProtocolError::Malformed(
            "truncated length-encoded integer".to_string(),
        ));
    }
    Ok(buf.get_uint_le(width))
}

pub fn read_lenenc_bytes(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    let len = read_lenenc_int(buf)? as usize;
    if buf.remaining() < len {
        return Err(ProtocolError::Malformed(format!(
            "length-encoded field of {len} bytes exceeds packet"
        )));
    }
    Ok(buf.split_to(len))
}

/// Reads up to (and consumes) the next NUL byte.
pub fn read_null_terminated(buf: &mut Bytes) -> Result<Bytes, ProtocolError> {
    match buf.iter().position(|b| *b == 0) {
        Some(end) => {
            let value = buf.split_to(end);
            buf.advance(1);
            Ok(value)
        }
        None => Err(ProtocolError::Malformed(
            "missing NUL terminator".to_string(),
        )),
    }
}

pub fn read_null_terminated_string(buf: &mut Bytes) -> Result<String, ProtocolError> {
    let value = read_null_terminated(buf)?;
    String::from_utf8(value.to_vec())
        .map_err(|_| ProtocolError::Malformed("string is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn packet_round_trip() {
        let mut wire = Vec::new();
        let next = write_packet(&mut wire, b"\x03SELECT 1", 7).unwrap();
        assert_eq!(next, 8);
        assert_eq!(&wire[..4], &[9, 0, 0, 7]);

        let packet = read_packet(&mut Cursor::new(wire), 7).unwrap().unwrap();
        assert_eq!(packet.sequence_id, 7);
        assert_eq!(&packet.payload[..], b"\x03SELECT 1");
    }

    #[test]
    fn empty_payload_is_one_frame() {
        let mut wire = Vec::new();
        write_packet(&mut wire, &[], 0).unwrap();
        assert_eq!(wire, vec![0, 0, 0, 0]);

        let packet = read_packet(&mut Cursor::new(wire), 0).unwrap().unwrap();
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn sequence_wraps_around() {
        let mut wire = Vec::new();
        let next = write_packet(&mut wire, b"x", 255).unwrap();
        assert_eq!(next, 0);
    }

    #[test]
    fn oversized_payload_is_split_and_reassembled() {
        let payload = vec![0xab; MAX_PAYLOAD_LEN + 10];
        let mut wire = Vec::new();
        let next = write_packet(&mut wire, &payload, 3).unwrap();
        assert_eq!(next, 5);
        assert_eq!(wire.len(), payload.len() + 2 * HEADER_LEN);
        assert_eq!(&wire[..4], &[0xff, 0xff, 0xff, 3]);
        assert_eq!(&wire[HEADER_LEN + MAX_PAYLOAD_LEN..][..4], &[10, 0, 0, 4]);

        let packet = read_packet(&mut Cursor::new(wire), 3).unwrap().unwrap();
        assert_eq!(packet.payload.len(), payload.len());
        assert_eq!(packet.frames(), 2);
        assert_eq!(packet.next_sequence_id(), 5);
    }

    #[test]
    fn exact_max_payload_ends_with_empty_frame() {
        let payload = vec![1u8; MAX_PAYLOAD_LEN];
        let mut wire = Vec::new();
        let next = write_packet(&mut wire, &payload, 0).unwrap();
        assert_eq!(next, 2);
        assert_eq!(&wire[wire.len() - 4..], &[0, 0, 0, 1]);
    }

    #[test]
    fn clean_eof_is_disconnect() {
        let packet = read_packet(&mut Cursor::new(Vec::new()), 0).unwrap();
        assert!(packet.is_none());
    }

    #[test]
    fn sequence_mismatch_is_protocol_error() {
        let wire = vec![1, 0, 0, 5, 0x0e];
        let err = read_packet(&mut Cursor::new(wire), 0).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::SequenceMismatch {
                expected: 0,
                actual: 5
            })
        ));
    }

    #[test]
    fn truncated_payload_is_protocol_error() {
        let wire = vec![9, 0, 0, 0, b'a', b'b'];
        let err = read_packet(&mut Cursor::new(wire), 0).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::Truncated {
                expected: 9,
                actual: 2
            })
        ));
    }

    #[test]
    fn truncated_header_is_protocol_error() {
        let err = read_packet(&mut Cursor::new(vec![1, 0]), 0).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::Truncated { actual: 2, .. })
        ));
    }

    #[test]
    fn oversized_announcement_is_rejected_before_reading() {
        let wire = vec![0xff, 0xff, 0xff, 0, b'a'];
        let err = read_packet_bounded(&mut Cursor::new(wire), 0, 1024).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn stalled_large_frame_buffers_only_what_arrived() {
        // Announces a full frame but delivers three bytes.
        let wire = vec![0xff, 0xff, 0xff, 0, 1, 2, 3];
        let err = read_packet(&mut Cursor::new(wire), 0).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::Truncated {
                expected: MAX_PAYLOAD_LEN,
                actual: 3
            })
        ));
    }

    #[test]
    fn stream_enforces_max_packet_size() {
        let mut wire = Vec::new();
        write_packet(&mut wire, &[0u8; 32], 0).unwrap();
        let mut stream = PacketStream::new(Cursor::new(wire)).with_max_packet_size(16);
        assert!(matches!(
            stream.read_packet().unwrap_err(),
            TransportError::Protocol(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn stream_tracks_sequence_and_traffic() {
        let mut wire = Vec::new();
        write_packet(&mut wire, b"\x0e", 0).unwrap();
        let mut stream = PacketStream::new(Cursor::new(wire));

        stream.read_packet().unwrap().unwrap();
        assert_eq!(stream.sequence(), Sequence { recv: 1, send: 1 });

        stream.write_packet(&[0x00, 0, 0, 2, 0, 0, 0]).unwrap();
        assert_eq!(stream.sequence(), Sequence { recv: 2, send: 2 });
        assert_eq!(stream.take_traffic(), (5, 11));
        assert_eq!(stream.take_traffic(), (0, 0));

        stream.reset_sequence();
        assert_eq!(stream.sequence(), Sequence::default());
    }

    #[test]
    fn lenenc_int_widths() {
        for (value, len) in [(250u64, 1), (251, 3), (65_536, 4), (1 << 24, 9)] {
            let mut buf = BytesMut::new();
            write_lenenc_int(&mut buf, value);
            assert_eq!(buf.len(), len);
            assert_eq!(read_lenenc_int(&mut buf.freeze()).unwrap(), value);
        }
    }

    #[test]
    #[should_panic(expected = "truncated length-encoded integer")]
    fn lenenc_int_truncated() {
        let mut buf = Bytes::from_static(&[0xfc, 0x01]);
        read_lenenc_int(&mut buf).unwrap();
    }

    #[test]
    #[should_panic(expected = "missing NUL terminator")]
    fn null_terminated_requires_terminator() {
        let mut buf = Bytes::from_static(b"root");
        read_null_terminated_string(&mut buf).unwrap();
    }
}
