//! Field record (tag-length-value) codec for the root block's structured
//! metadata.
//!
//! # Sub-format
//! Each record is `tag u8`, `length u16` (big-endian — this sub-format is
//! the only big-endian region of the file), then `length` value bytes.
//! A top-level sequence holds tags 1,2,3,7,8,9,10,11,12 in exactly that
//! order.  Tag 3 is a group marker: its value is always the three records
//! with tags 4, 5 and 6, nested inline.  Decoding stops once tag 12 has
//! been consumed; whatever follows (trailer byte, zero padding) belongs to
//! the enclosing metadata region, not to the sequence.
//!
//! Lengths are never trusted from the caller on the way out: encoding
//! recomputes every length from the encoded value immediately before the
//! three-byte prefix is written.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::header::eof_is_truncation;

/// The group-marker tag whose value nests tags 4–6.
pub const TAG_GROUP: u8 = 3;

/// The tag that terminates a top-level sequence.
pub const TAG_TERMINATOR: u8 = 12;

/// Byte written after the terminator record in the metadata region.
pub const SEQUENCE_TRAILER: u8 = 0xEB;

/// Required top-level tag order; tag 3 expands inline into [`GROUP_ORDER`].
const TOP_LEVEL_ORDER: [u8; 9] = [1, 2, 3, 7, 8, 9, 10, 11, 12];

/// Required order inside the tag-3 group.
const GROUP_ORDER: [u8; 3] = [4, 5, 6];

// ── Default certificate sequence constants ──────────────────────────────────

pub const DEFAULT_ISSUER: &str = "CN=CiscoSystems;OU=NCS_Kenton_ASA;O=CiscoSystems";
pub const DEFAULT_SERIAL: &str = "60A6A3E5";

/// The stock 256-byte signing-key blob carried in tag 11 when no other key
/// is supplied.
pub const DEFAULT_SIGNING_KEY: [u8; 256] = [
    0x87, 0x12, 0x7a, 0x60, 0xbd, 0x78, 0x89, 0x32, 0x8a, 0x60, 0xcf, 0x91, 0x1f, 0x47, 0x4b, 0xd1,
    0xf7, 0xb1, 0xe0, 0x09, 0x61, 0xb8, 0xb7, 0xa7, 0x1d, 0x9f, 0x6c, 0x80, 0x1b, 0xff, 0xa9, 0xd5,
    0x73, 0xa7, 0x57, 0x97, 0xa5, 0x23, 0x45, 0x30, 0xd7, 0x1b, 0xaa, 0xc9, 0xa7, 0xf4, 0xa4, 0x8c,
    0x88, 0xb7, 0xfe, 0x3c, 0xc2, 0x40, 0x91, 0x5a, 0xfb, 0x31, 0x30, 0xe5, 0xd0, 0xf0, 0x23, 0x65,
    0xfd, 0x7c, 0x63, 0x16, 0x66, 0x2f, 0x1b, 0x2f, 0xc5, 0x97, 0xfc, 0x5b, 0x44, 0xdd, 0xc2, 0x41,
    0xcb, 0xc6, 0x31, 0xc6, 0x6a, 0xf5, 0x2d, 0x77, 0x7e, 0x5c, 0x72, 0xd3, 0xd8, 0x5d, 0x3c, 0xa5,
    0x7b, 0xb1, 0xc9, 0xad, 0xe5, 0x3d, 0xfb, 0xaa, 0x81, 0x4e, 0x49, 0x67, 0xe7, 0xdd, 0x17, 0x7b,
    0x6f, 0xcb, 0x64, 0x67, 0x3f, 0x36, 0x74, 0x86, 0xc0, 0x31, 0x3a, 0x92, 0x10, 0x67, 0xb4, 0x4c,
    0x21, 0x38, 0x02, 0xd5, 0x04, 0x88, 0xa2, 0x81, 0x26, 0x0a, 0x9c, 0xde, 0xf9, 0x03, 0x6d, 0x3d,
    0x41, 0x0d, 0x07, 0x11, 0x17, 0x58, 0x92, 0xd6, 0xae, 0x78, 0xd6, 0xe1, 0x11, 0xb3, 0xe1, 0xb1,
    0x6d, 0xa5, 0xf8, 0xc8, 0xa7, 0x5c, 0x7f, 0x6c, 0x97, 0xa3, 0xd3, 0x59, 0x75, 0x7c, 0xca, 0x55,
    0xb7, 0x7f, 0x3a, 0xe2, 0x82, 0x4e, 0x37, 0x50, 0xa2, 0x96, 0xff, 0x03, 0x3f, 0xc5, 0xf5, 0xcd,
    0x7c, 0x90, 0xf4, 0x6d, 0xc6, 0x37, 0xf0, 0xd7, 0xfe, 0x71, 0x5b, 0x21, 0xd4, 0x1c, 0xa4, 0xf0,
    0xbd, 0x81, 0x66, 0x9e, 0x4a, 0x3e, 0x83, 0xf5, 0x25, 0x7d, 0x8e, 0x58, 0xea, 0xcf, 0xd4, 0x88,
    0xc5, 0xa5, 0x7d, 0x46, 0x9a, 0xbd, 0x32, 0xf1, 0xbb, 0x41, 0xd0, 0xc7, 0x18, 0x61, 0x94, 0x9b,
    0x96, 0x0b, 0x68, 0x14, 0x4c, 0xa9, 0x75, 0xe5, 0x19, 0xfa, 0x96, 0x64, 0x1f, 0x01, 0xee, 0xbd,
];

// ── Types ───────────────────────────────────────────────────────────────────

/// One tag-length-value record.  The length is not stored: it is always
/// recomputed from the value at encode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRecord {
    pub tag:   u8,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// Opaque bytes — every tag except the group marker.
    Opaque(Vec<u8>),
    /// The nested records of a tag-3 group.
    Group(Vec<FieldRecord>),
}

impl FieldRecord {
    pub fn opaque(tag: u8, value: impl Into<Vec<u8>>) -> Self {
        Self { tag, value: FieldValue::Opaque(value.into()) }
    }

    pub fn group(tag: u8, records: Vec<FieldRecord>) -> Self {
        Self { tag, value: FieldValue::Group(records) }
    }

    /// Opaque value bytes, or `None` for a group record.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            FieldValue::Opaque(b) => Some(b),
            FieldValue::Group(_)  => None,
        }
    }
}

// ── Decoding ────────────────────────────────────────────────────────────────

/// Decode a single record, treating its value as opaque bytes.
pub fn decode_one<R: Read>(reader: &mut R) -> Result<FieldRecord> {
    let (tag, length) = decode_prefix(reader)?;
    let value = read_value(reader, length)?;
    Ok(FieldRecord::opaque(tag, value))
}

/// Decode a full top-level sequence, enforcing the fixed tag order and the
/// tag-3 grouping rule.  Consumes up to and including the tag-12 record;
/// trailing bytes in the enclosing region are left unread.
pub fn decode_sequence<R: Read>(reader: &mut R) -> Result<Vec<FieldRecord>> {
    let mut records = Vec::with_capacity(TOP_LEVEL_ORDER.len());

    for expected in TOP_LEVEL_ORDER {
        let (tag, length) = decode_prefix(reader)?;
        if tag != expected {
            return Err(Error::UnexpectedFieldOrder { expected, found: tag });
        }

        if tag == TAG_GROUP {
            // The group's own declared length spans its nested records; the
            // records are read from the stream directly, so it is ignored.
            let mut inner = Vec::with_capacity(GROUP_ORDER.len());
            for inner_expected in GROUP_ORDER {
                let record = decode_one(reader)?;
                if record.tag != inner_expected {
                    return Err(Error::UnexpectedFieldOrder {
                        expected: inner_expected,
                        found:    record.tag,
                    });
                }
                inner.push(record);
            }
            records.push(FieldRecord::group(tag, inner));
        } else {
            records.push(FieldRecord::opaque(tag, read_value(reader, length)?));
        }
    }

    Ok(records)
}

fn decode_prefix<R: Read>(reader: &mut R) -> Result<(u8, u16)> {
    let tag = reader.read_u8().map_err(eof_is_truncation)?;
    let length = reader.read_u16::<BigEndian>().map_err(eof_is_truncation)?;
    Ok((tag, length))
}

fn read_value<R: Read>(reader: &mut R, length: u16) -> Result<Vec<u8>> {
    let mut value = vec![0u8; usize::from(length)];
    reader.read_exact(&mut value).map_err(eof_is_truncation)?;
    Ok(value)
}

// ── Encoding ────────────────────────────────────────────────────────────────

/// Encode a record sequence.  Group values are encoded recursively and
/// concatenated; each length prefix is computed from the bytes just encoded.
pub fn encode_sequence(records: &[FieldRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        let value = match &record.value {
            FieldValue::Opaque(bytes) => bytes.clone(),
            FieldValue::Group(inner)  => encode_sequence(inner)?,
        };
        if value.len() > usize::from(u16::MAX) {
            return Err(Error::OutOfRange(value.len() as u64));
        }
        out.write_u8(record.tag)?;
        out.write_u16::<BigEndian>(value.len() as u16)?;
        out.extend_from_slice(&value);
    }
    Ok(out)
}

// ── Default instance ────────────────────────────────────────────────────────

/// The fixed nine-slot certificate-like sequence carried by every default
/// root block, parameterized by serial number and signing key.  The flag
/// values and slot layout are domain constants, not derived data.
pub fn default_certificate_records(serial: &str, signing_key: &[u8]) -> Vec<FieldRecord> {
    vec![
        FieldRecord::opaque(1, [0x01, 0x01]),
        FieldRecord::opaque(2, [0x00, 0x00, 0x01, 0x8c]),
        FieldRecord::group(TAG_GROUP, vec![
            FieldRecord::opaque(4, DEFAULT_ISSUER.as_bytes()),
            FieldRecord::opaque(5, serial.as_bytes()),
            FieldRecord::opaque(6, DEFAULT_ISSUER.as_bytes()),
        ]),
        FieldRecord::opaque(7, [0x00]),
        FieldRecord::opaque(8, [0x01]),
        FieldRecord::opaque(9, [0x00]),
        FieldRecord::opaque(10, [0x01]),
        FieldRecord::opaque(11, signing_key),
        FieldRecord::opaque(TAG_TERMINATOR, *b"A"),
    ]
}
