//! Packs and parses the on-disk packet envelope:
//! `magic || type || big_endian_u32(len(payload)) || payload`.
//!
//! The framer never interprets `payload`; that's the Codec State Machine's
//! job once it knows the packet type.

use crate::error::FramingError;
use crate::resync::PushbackReader;
use std::io::Read;

/// Fixed 13-byte tag beginning every packet. Long enough that it will not
/// randomly occur in ciphertext before the heat death of the universe.
pub const MAGIC: &[u8; 13] = b"__EncroCrypt2";

/// Upper bound on a packet's declared payload length (10 MiB). A declared
/// length above this is treated as corruption rather than trusted.
pub const PACKET_MAXLENGTH: u32 = 10 * 1024 * 1024;

/// Recognised packet types, plus a catch-all for anything else so that a
/// malformed or future type byte can still be framed and measured before
/// the Codec State Machine rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Key,
    Data,
    Unknown(u8),
}

impl PacketType {
    fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PacketType::Key,
            0x02 => PacketType::Data,
            other => PacketType::Unknown(other),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            PacketType::Key => 0x01,
            PacketType::Data => 0x02,
            PacketType::Unknown(b) => b,
        }
    }
}

/// Serialises one packet. Does not validate `payload.len()` against
/// [`PACKET_MAXLENGTH`]; callers in the Codec State Machine are responsible
/// for chunking input so that never happens.
pub fn pack(packet_type: PacketType, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() as u64 <= PACKET_MAXLENGTH as u64);

    let mut out = Vec::with_capacity(MAGIC.len() + 1 + 4 + payload.len());
    out.extend_from_slice(MAGIC);
    out.push(packet_type.to_byte());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// Parses one packet from `reader`, assuming the reader is positioned
/// exactly at the start of a packet (callers resynchronise first if not).
///
/// On [`FramingError::EmbeddedMagic`], the surplus tail starting at the
/// first embedded magic occurrence has already been pushed back onto
/// `reader`; the caller should simply retry parsing from the top.
pub fn read_packet<R: Read>(
    reader: &mut PushbackReader<R>,
) -> Result<(PacketType, Vec<u8>), FramingError> {
    let magic = reader.read(MAGIC.len())?;
    if magic.len() < MAGIC.len() {
        return Err(FramingError::Truncated {
            expected: MAGIC.len(),
            got: magic.len(),
        });
    }
    if magic.as_slice() != MAGIC.as_slice() {
        return Err(FramingError::ExpectedMagic);
    }

    let type_byte = reader.read(1)?;
    if type_byte.is_empty() {
        return Err(FramingError::Truncated {
            expected: 1,
            got: 0,
        });
    }
    let packet_type = PacketType::from_byte(type_byte[0]);

    let length_bytes = reader.read(4)?;
    if length_bytes.len() < 4 {
        return Err(FramingError::TruncatedLength {
            got: length_bytes.len(),
        });
    }
    let length = u32::from_be_bytes([
        length_bytes[0],
        length_bytes[1],
        length_bytes[2],
        length_bytes[3],
    ]);

    if length > PACKET_MAXLENGTH {
        return Err(FramingError::LengthTooLarge(length));
    }
    if length == 0 {
        return Err(FramingError::ZeroLength);
    }

    let payload = reader.read(length as usize)?;
    if payload.len() < length as usize {
        return Err(FramingError::Truncated {
            expected: length as usize,
            got: payload.len(),
        });
    }

    if let Some(pos) = find_subslice(&payload, MAGIC.as_slice()) {
        reader.push_back(payload[pos..].to_vec());
        return Err(FramingError::EmbeddedMagic);
    }

    Ok((packet_type, payload))
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
