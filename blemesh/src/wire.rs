//! Wire format serialization and deserialization.
//!
//! Fixed big-endian layout with cursor-based encoding. There are no varints
//! and no padding, so the frame size follows from the path, GPS and history
//! lengths alone.
//!
//! ## Discovery Frame
//!
//! ```text
//! message_type (1) || is_clusterhead (1) || sender_id (4) || ttl (1)
//! || path_len (2) || path_len × node_id (4)
//! || gps_available (1) || [x (8) || y (8) || z (8)]
//! ```
//!
//! Each coordinate is an IEEE-754 double written as two u32 words, high word
//! first.
//!
//! ## Election Frame
//!
//! A discovery frame followed by:
//!
//! ```text
//! class_id (2) || direct_connections (4) || pdsf (4) || score (8)
//! || hash (4) || history_count (2) || history_count × u32 (4)
//! ```
//!
//! Message type 1 is an announcement, type 2 a renouncement (same shape).

use alloc::vec::Vec;
use core::fmt;

use crate::packet::{DiscoveryPacket, ElectionData, ElectionPacket, Packet, PdsfHistory, Path};
use crate::types::{
    GpsLocation, MAX_PATH_LENGTH, MAX_PDSF_HISTORY, MSG_DISCOVERY, MSG_ELECTION, MSG_RENOUNCEMENT,
};

/// Fixed bytes of a discovery frame (no path, no GPS).
pub const DISCOVERY_HEADER_SIZE: usize = 10;
/// GPS block size (three doubles).
pub const GPS_SIZE: usize = 24;
/// Fixed bytes of the election extension (no history).
pub const ELECTION_HEADER_SIZE: usize = 24;

/// Decoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of buffer.
    UnexpectedEof,
    /// Trailing bytes after a complete frame.
    InvalidLength,
    /// Unknown message type byte.
    InvalidMessageType,
    /// Path or history count exceeds capacity.
    CapacityExceeded,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEof => write!(f, "unexpected end of buffer"),
            DecodeError::InvalidLength => write!(f, "trailing bytes after frame"),
            DecodeError::InvalidMessageType => write!(f, "invalid message type"),
            DecodeError::CapacityExceeded => write!(f, "count exceeds capacity"),
        }
    }
}

/// Encoding error types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EncodeError {
    /// Caller buffer cannot hold the frame.
    BufferTooSmall { needed: usize, available: usize },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::BufferTooSmall { needed, available } => {
                write!(f, "buffer too small: need {} bytes, have {}", needed, available)
            }
        }
    }
}

/// Zero-copy reader over a byte slice.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Create a new reader over a byte slice.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Returns the number of bytes remaining.
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    /// Returns true if there are no more bytes to read.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the current position.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.buf.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        Ok(v)
    }

    /// Read a fixed number of bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a u16 in big-endian format.
    pub fn read_u16_be(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    /// Read a u32 in big-endian format.
    pub fn read_u32_be(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Read a double stored as high word then low word.
    pub fn read_f64_split(&mut self) -> Result<f64, DecodeError> {
        let hi = self.read_u32_be()? as u64;
        let lo = self.read_u32_be()? as u64;
        Ok(f64::from_bits((hi << 32) | lo))
    }
}

/// Writer for encoding frames.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create a new empty writer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create a writer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Returns the current length of written data.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if no data has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Write a slice of bytes.
    pub fn write_bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Write a u16 in big-endian format.
    pub fn write_u16_be(&mut self, v: u16) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write a u32 in big-endian format.
    pub fn write_u32_be(&mut self, v: u32) {
        self.write_bytes(&v.to_be_bytes());
    }

    /// Write a double as high word then low word.
    pub fn write_f64_split(&mut self, v: f64) {
        let bits = v.to_bits();
        self.write_u32_be((bits >> 32) as u32);
        self.write_u32_be(bits as u32);
    }

    /// Finish writing and return the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Get the buffer as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// Trait for types that can be encoded to wire format.
pub trait Encode {
    /// Encode this value to the writer.
    fn encode(&self, w: &mut Writer);

    /// Encode and return the bytes.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.encode(&mut w);
        w.finish()
    }
}

/// Trait for types that can be decoded from wire format.
pub trait Decode: Sized {
    /// Decode a value from the reader.
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;

    /// Decode from a byte slice (strict: rejects trailing bytes).
    fn decode_from_slice(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        let result = Self::decode(&mut r)?;
        if !r.is_empty() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(result)
    }
}

fn encode_base(p: &DiscoveryPacket, message_type: u8, w: &mut Writer) {
    w.write_u8(message_type);
    w.write_u8(p.is_clusterhead_message as u8);
    w.write_u32_be(p.sender_id);
    w.write_u8(p.ttl);
    w.write_u16_be(p.path.len() as u16);
    for id in p.path.iter() {
        w.write_u32_be(*id);
    }
    match p.gps {
        Some(loc) => {
            w.write_u8(1);
            w.write_f64_split(loc.x);
            w.write_f64_split(loc.y);
            w.write_f64_split(loc.z);
        }
        None => w.write_u8(0),
    }
}

fn encode_election(e: &ElectionData, w: &mut Writer) {
    w.write_u16_be(e.class_id);
    w.write_u32_be(e.direct_connections);
    w.write_u32_be(e.pdsf);
    w.write_f64_split(e.score);
    w.write_u32_be(e.hash);
    w.write_u16_be(e.pdsf_history.len() as u16);
    for count in e.pdsf_history.iter() {
        w.write_u32_be(*count);
    }
}

/// Decode everything after the message type byte.
fn decode_base(r: &mut Reader<'_>) -> Result<DiscoveryPacket, DecodeError> {
    let is_clusterhead_message = r.read_u8()? == 1;
    let sender_id = r.read_u32_be()?;
    let ttl = r.read_u8()?;

    let path_len = r.read_u16_be()? as usize;
    if path_len > MAX_PATH_LENGTH {
        return Err(DecodeError::CapacityExceeded);
    }
    let mut path = Path::new();
    for _ in 0..path_len {
        path.try_push(r.read_u32_be()?)
            .map_err(|_| DecodeError::CapacityExceeded)?;
    }

    let gps = if r.read_u8()? == 1 {
        let x = r.read_f64_split()?;
        let y = r.read_f64_split()?;
        let z = r.read_f64_split()?;
        Some(GpsLocation::new(x, y, z))
    } else {
        None
    };

    Ok(DiscoveryPacket {
        sender_id,
        ttl,
        path,
        gps,
        is_clusterhead_message,
    })
}

fn decode_election(r: &mut Reader<'_>, is_renouncement: bool) -> Result<ElectionData, DecodeError> {
    let class_id = r.read_u16_be()?;
    let direct_connections = r.read_u32_be()?;
    let pdsf = r.read_u32_be()?;
    let score = r.read_f64_split()?;
    let hash = r.read_u32_be()?;

    let history_count = r.read_u16_be()? as usize;
    if history_count > MAX_PDSF_HISTORY {
        return Err(DecodeError::CapacityExceeded);
    }
    let mut pdsf_history = PdsfHistory::new();
    for _ in 0..history_count {
        pdsf_history
            .try_push(r.read_u32_be()?)
            .map_err(|_| DecodeError::CapacityExceeded)?;
    }

    Ok(ElectionData {
        class_id,
        direct_connections,
        pdsf,
        pdsf_history,
        score,
        hash,
        is_renouncement,
    })
}

impl Encode for Packet {
    fn encode(&self, w: &mut Writer) {
        encode_base(self.base(), self.message_type(), w);
        if let Packet::Election(p) = self {
            encode_election(&p.election, w);
        }
    }
}

impl Decode for Packet {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let message_type = r.read_u8()?;
        match message_type {
            MSG_DISCOVERY => Ok(Packet::Discovery(decode_base(r)?)),
            MSG_ELECTION | MSG_RENOUNCEMENT => {
                let base = decode_base(r)?;
                let election = decode_election(r, message_type == MSG_RENOUNCEMENT)?;
                Ok(Packet::Election(ElectionPacket { base, election }))
            }
            _ => Err(DecodeError::InvalidMessageType),
        }
    }
}

impl Packet {
    /// Exact number of bytes `encode` produces.
    pub fn encoded_len(&self) -> usize {
        let base = self.base();
        let mut len = DISCOVERY_HEADER_SIZE + 4 * base.path.len();
        if base.gps.is_some() {
            len += GPS_SIZE;
        }
        if let Packet::Election(p) = self {
            len += ELECTION_HEADER_SIZE + 4 * p.election.pdsf_history.len();
        }
        len
    }

    /// Serialize into a caller-provided buffer, returning the bytes written.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        let needed = self.encoded_len();
        if buf.len() < needed {
            return Err(EncodeError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }
        let mut w = Writer::with_capacity(needed);
        self.encode(&mut w);
        buf[..needed].copy_from_slice(w.as_slice());
        Ok(needed)
    }

    /// Decode one frame from the front of `data`, returning it and the bytes consumed.
    pub fn decode_prefix(data: &[u8]) -> Result<(Packet, usize), DecodeError> {
        let mut r = Reader::new(data);
        let packet = Packet::decode(&mut r)?;
        Ok((packet, r.position()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn beacon(sender: u32, path: &[u32], gps: Option<GpsLocation>) -> DiscoveryPacket {
        DiscoveryPacket {
            sender_id: sender,
            ttl: 7,
            path: Path::from_slice(path).unwrap(),
            gps,
            is_clusterhead_message: false,
        }
    }

    #[test]
    fn test_discovery_layout() {
        let p = Packet::Discovery(beacon(0x01020304, &[0x0A0B0C0D], None));
        let bytes = p.encode_to_vec();
        assert_eq!(
            bytes,
            vec![
                0x00, // type
                0x00, // clusterhead flag
                0x01, 0x02, 0x03, 0x04, // sender
                0x07, // ttl
                0x00, 0x01, // path_len
                0x0A, 0x0B, 0x0C, 0x0D, // path[0]
                0x00, // no gps
            ]
        );
        assert_eq!(bytes.len(), p.encoded_len());
    }

    #[test]
    fn test_gps_split_words() {
        let p = Packet::Discovery(beacon(1, &[], Some(GpsLocation::new(1.0, 0.0, -2.5))));
        let bytes = p.encode_to_vec();
        assert_eq!(bytes.len(), DISCOVERY_HEADER_SIZE + GPS_SIZE);
        // 1.0 = 0x3FF0_0000_0000_0000: high word first.
        assert_eq!(&bytes[10..18], &[0x3F, 0xF0, 0, 0, 0, 0, 0, 0]);
        let decoded = Packet::decode_from_slice(&bytes).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn test_discovery_roundtrip_full_path() {
        let path: Vec<u32> = (1..=MAX_PATH_LENGTH as u32).collect();
        let mut base = beacon(42, &path, Some(GpsLocation::new(10.5, -3.25, 100.0)));
        base.is_clusterhead_message = true;
        let p = Packet::Discovery(base);
        let decoded = Packet::decode_from_slice(&p.encode_to_vec()).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn test_election_roundtrip() {
        let election = ElectionData {
            class_id: 3,
            direct_connections: 12,
            pdsf: 13,
            pdsf_history: PdsfHistory::from_slice(&[12, 4]).unwrap(),
            score: 12.08,
            hash: 0xDEADBEEF,
            is_renouncement: false,
        };
        let p = Packet::upgrade(beacon(9, &[9, 4], None), election);
        let bytes = p.encode_to_vec();
        assert_eq!(bytes.len(), p.encoded_len());
        assert_eq!(bytes.len(), 10 + 8 + 24 + 8);
        assert_eq!(Packet::decode_from_slice(&bytes).unwrap(), p);
    }

    #[test]
    fn test_election_roundtrip_full_path_with_gps() {
        let path: Vec<u32> = (100..100 + MAX_PATH_LENGTH as u32).collect();
        let history: Vec<u32> = (0..MAX_PDSF_HISTORY as u32).map(|i| i * 3 + 1).collect();
        let mut base = beacon(100, &path, Some(GpsLocation::new(-71.5, 42.25, 12.0)));
        base.is_clusterhead_message = true;
        let election = ElectionData {
            class_id: 0xBEEF,
            direct_connections: 40,
            pdsf: 9_001,
            pdsf_history: PdsfHistory::from_slice(&history).unwrap(),
            score: 40.2667,
            hash: 0x0102_0304,
            is_renouncement: false,
        };
        let p = Packet::upgrade(base, election);
        let bytes = p.encode_to_vec();
        assert_eq!(
            bytes.len(),
            DISCOVERY_HEADER_SIZE
                + 4 * MAX_PATH_LENGTH
                + GPS_SIZE
                + ELECTION_HEADER_SIZE
                + 4 * MAX_PDSF_HISTORY
        );
        assert_eq!(bytes.len(), p.encoded_len());
        assert_eq!(bytes[0], MSG_ELECTION);

        let decoded = Packet::decode_from_slice(&bytes).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(decoded.base().path.len(), MAX_PATH_LENGTH);
        assert_eq!(decoded.base().gps, Some(GpsLocation::new(-71.5, 42.25, 12.0)));
    }

    #[test]
    fn test_election_roundtrip_empty_path() {
        let election = ElectionData {
            class_id: 1,
            direct_connections: 5,
            pdsf: 0,
            pdsf_history: PdsfHistory::new(),
            score: 5.0333,
            hash: 7,
            is_renouncement: false,
        };
        let p = Packet::upgrade(beacon(3, &[], None), election);
        let bytes = p.encode_to_vec();
        assert_eq!(bytes.len(), DISCOVERY_HEADER_SIZE + ELECTION_HEADER_SIZE);
        assert_eq!(bytes.len(), p.encoded_len());

        let decoded = Packet::decode_from_slice(&bytes).unwrap();
        assert_eq!(decoded, p);
        assert!(decoded.base().path.is_empty());
        assert!(decoded.base().gps.is_none());
    }

    #[test]
    fn test_renouncement_roundtrip() {
        let p = Packet::Election(ElectionPacket::renouncement(beacon(5, &[5], None)));
        let bytes = p.encode_to_vec();
        assert_eq!(bytes[0], MSG_RENOUNCEMENT);
        let decoded = Packet::decode_from_slice(&bytes).unwrap();
        assert!(decoded.is_renouncement());
        assert_eq!(decoded, p);
    }

    #[test]
    fn test_reject_oversized_path() {
        let mut w = Writer::new();
        w.write_u8(MSG_DISCOVERY);
        w.write_u8(0);
        w.write_u32_be(1);
        w.write_u8(5);
        w.write_u16_be(MAX_PATH_LENGTH as u16 + 1);
        for i in 0..=MAX_PATH_LENGTH as u32 {
            w.write_u32_be(i);
        }
        w.write_u8(0);
        assert_eq!(
            Packet::decode_from_slice(w.as_slice()),
            Err(DecodeError::CapacityExceeded)
        );
    }

    #[test]
    fn test_reject_oversized_history() {
        let p = Packet::upgrade(beacon(1, &[], None), ElectionData::default());
        let mut bytes = p.encode_to_vec();
        // history_count is the last u16 of an empty-history frame.
        let n = bytes.len();
        bytes[n - 2..].copy_from_slice(&(MAX_PDSF_HISTORY as u16 + 1).to_be_bytes());
        assert_eq!(
            Packet::decode_from_slice(&bytes),
            Err(DecodeError::CapacityExceeded)
        );
    }

    #[test]
    fn test_reject_truncated_and_unknown() {
        let p = Packet::Discovery(beacon(1, &[1, 2], Some(GpsLocation::new(1.0, 2.0, 3.0))));
        let bytes = p.encode_to_vec();
        for cut in 0..bytes.len() {
            assert_eq!(
                Packet::decode_from_slice(&bytes[..cut]),
                Err(DecodeError::UnexpectedEof),
                "cut at {}",
                cut
            );
        }

        let mut bad = bytes.clone();
        bad[0] = 7;
        assert_eq!(
            Packet::decode_from_slice(&bad),
            Err(DecodeError::InvalidMessageType)
        );
    }

    #[test]
    fn test_decode_prefix_and_trailing_bytes() {
        let p = Packet::Discovery(beacon(3, &[3], None));
        let mut bytes = p.encode_to_vec();
        let len = bytes.len();
        bytes.push(0xFF);

        let (decoded, used) = Packet::decode_prefix(&bytes).unwrap();
        assert_eq!(decoded, p);
        assert_eq!(used, len);
        assert_eq!(
            Packet::decode_from_slice(&bytes),
            Err(DecodeError::InvalidLength)
        );
    }

    #[test]
    fn test_encode_into_buffer() {
        let p = Packet::Discovery(beacon(3, &[3, 4, 5], None));
        let needed = p.encoded_len();

        let mut small = vec![0u8; needed - 1];
        assert_eq!(
            p.encode_into(&mut small),
            Err(EncodeError::BufferTooSmall {
                needed,
                available: needed - 1
            })
        );

        let mut buf = [0u8; 64];
        let written = p.encode_into(&mut buf).unwrap();
        assert_eq!(written, needed);
        assert_eq!(&buf[..written], p.encode_to_vec().as_slice());
    }

    #[test]
    fn test_clusterhead_flag_only_one_is_true() {
        let p = Packet::Discovery(beacon(1, &[], None));
        let mut bytes = p.encode_to_vec();
        bytes[1] = 2;
        let decoded = Packet::decode_from_slice(&bytes).unwrap();
        assert!(!decoded.base().is_clusterhead_message);
    }
}
