//! Depth-first stream reader: bytes → block tree.
//!
//! # Reading modes
//! The default mode buffers every payload.  [`ParseOptions::defer_payloads`]
//! switches leaf payloads to [`Extent`] records (offset + length into the
//! source stream) so multi-hundred-megabyte images never sit in memory;
//! [`copy_extent`] streams such a payload out later.
//!
//! # Boot expansion
//! With [`ParseOptions::expand_boot`] set, a boot-leaf payload is treated as
//! a gzip stream holding a nested block tree.  On success the leaf is
//! *replaced* by a freshly constructed container wrapping the inner tree —
//! parsed nodes are never mutated in place — with the children flag raised
//! for downstream consumers.  The raised flag and the wrapped child exist
//! in memory only; the on-wire form remains the compressed leaf.  A payload
//! that will not gunzip is left as an opaque leaf and the failure is
//! swallowed (see [`expand_boot_payload`]).
//!
//! # Recursion
//! Nesting is capped at [`MAX_TREE_DEPTH`] so a malformed header chain
//! reports [`Error::MalformedTree`] instead of exhausting the call stack.
//! Observed real images nest 4–5 levels.

use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use flate2::read::GzDecoder;

use crate::block::{Block, Extent, Metadata, Payload};
use crate::error::{Error, Result};
use crate::field;
use crate::header::{eof_is_truncation, BlockHeader, SENTINEL, UUID_BOOT, UUID_MAIN_CONTAINER};

/// Maximum block nesting the parser will follow.
pub const MAX_TREE_DEPTH: usize = 16;

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ParseOptions {
    /// Expand compressed boot-leaf payloads into nested trees.
    pub expand_boot:    bool,
    /// Record leaf payloads as extents instead of buffering them.
    pub defer_payloads: bool,
    /// Nesting cap; deeper input is a [`Error::MalformedTree`].
    pub max_depth:      usize,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            expand_boot:    false,
            defer_payloads: false,
            max_depth:      MAX_TREE_DEPTH,
        }
    }
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Parse a whole image with default options: optional sentinel, then the
/// root block.
pub fn parse_root<R: Read + Seek>(reader: &mut R) -> Result<Block> {
    parse_root_with(reader, &ParseOptions::default())
}

/// Parse a whole image.  Works for both sentinel-prefixed and legacy
/// headerless layouts: when the first 16 bytes are not the sentinel the
/// stream is rewound and the root block is parsed from the original offset.
pub fn parse_root_with<R: Read + Seek>(reader: &mut R, options: &ParseOptions) -> Result<Block> {
    check_root_sentinel(reader)?;
    parse_block(reader, options)
}

/// Consume the 16-byte sentinel if present.  Returns whether it was found;
/// on a mismatch (or a stream shorter than the sentinel) the position is
/// rewound to where it was.
pub fn check_root_sentinel<R: Read + Seek>(reader: &mut R) -> Result<bool> {
    let start = reader.stream_position()?;
    let mut prefix = [0u8; SENTINEL.len()];
    match reader.read_exact(&mut prefix) {
        Ok(()) if prefix == SENTINEL => Ok(true),
        Ok(()) => {
            reader.seek(SeekFrom::Start(start))?;
            Ok(false)
        }
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            reader.seek(SeekFrom::Start(start))?;
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse one block (and, recursively, its descendants) from the current
/// stream position.
pub fn parse_block<R: Read + Seek>(reader: &mut R, options: &ParseOptions) -> Result<Block> {
    parse_at(reader, options, 0)
}

// ── Recursive core ──────────────────────────────────────────────────────────

fn parse_at<R: Read + Seek>(reader: &mut R, options: &ParseOptions, depth: usize) -> Result<Block> {
    if depth >= options.max_depth {
        return Err(Error::MalformedTree(format!(
            "blocks nested deeper than {} levels",
            options.max_depth
        )));
    }

    let header = BlockHeader::decode(reader)?;

    let metadata = if header.metadata_length() > 0 {
        let raw = read_vec(reader, header.metadata_length())?;
        if header.uuid() == UUID_MAIN_CONTAINER {
            let mut bytes = raw.as_slice();
            Some(Metadata::Structured(field::decode_sequence(&mut bytes)?))
        } else {
            Some(Metadata::Opaque(raw))
        }
    } else {
        None
    };

    let payload = if header.has_children() {
        let declared = header.data_length();
        let mut children = Vec::new();
        let mut consumed = 0u64;
        while consumed < declared {
            let child = parse_at(reader, options, depth + 1)?;
            consumed += child.header().encoded_span();
            children.push(child);
        }
        if consumed != declared {
            return Err(Error::ChildSizeMismatch { declared, consumed });
        }
        Payload::Children(children)
    } else if header.data_length() > 0 {
        let length = header.data_length();
        if options.expand_boot && header.uuid() == UUID_BOOT {
            let bytes = read_vec(reader, length)?;
            match expand_boot_payload(&bytes) {
                Ok(inner) => {
                    // Present the leaf as a container around the inner tree.
                    // The data length keeps its on-wire (compressed) value.
                    let mut expanded = header.clone();
                    expanded.set_has_children(true);
                    return Ok(Block::from_parts(
                        expanded,
                        metadata,
                        Payload::Children(vec![inner]),
                    ));
                }
                Err(Error::GenericFallback) => Payload::Opaque(bytes),
                Err(e) => return Err(e),
            }
        } else if options.defer_payloads {
            let offset = reader.stream_position()?;
            let end = reader.seek(SeekFrom::End(0))?;
            if offset + length > end {
                return Err(Error::TruncatedInput);
            }
            reader.seek(SeekFrom::Start(offset + length))?;
            Payload::Extent(Extent { offset, length })
        } else {
            Payload::Opaque(read_vec(reader, length)?)
        }
    } else {
        Payload::Opaque(Vec::new())
    };

    Ok(Block::from_parts(header, metadata, payload))
}

// ── Boot envelope expansion ─────────────────────────────────────────────────

/// Gunzip a boot-leaf payload and parse the result as a nested block tree.
///
/// A payload that is not a gzip stream — wrong magic, corrupt deflate data —
/// yields [`Error::GenericFallback`]; the two cases are deliberately not
/// distinguished, matching the format's permissive handling of boot leaves.
/// A payload that *does* gunzip but whose content is not a well-formed block
/// tree reports the structural error as usual.
pub fn expand_boot_payload(bytes: &[u8]) -> Result<Block> {
    let mut decoder = GzDecoder::new(bytes);
    let mut inner = Vec::new();
    if decoder.read_to_end(&mut inner).is_err() {
        return Err(Error::GenericFallback);
    }
    // Inner payloads are buffered: the decompressed image only lives as
    // long as this call, so extents into it would dangle.
    let options = ParseOptions {
        expand_boot:    false,
        defer_payloads: false,
        ..ParseOptions::default()
    };
    parse_block(&mut Cursor::new(inner), &options)
}

// ── Streaming extraction ────────────────────────────────────────────────────

/// Copy a deferred payload out of the source stream into `sink` without
/// buffering it whole.  Returns the number of bytes copied.
pub fn copy_extent<R, W>(reader: &mut R, extent: &Extent, sink: &mut W) -> Result<u64>
where
    R: Read + Seek,
    W: Write + ?Sized,
{
    reader.seek(SeekFrom::Start(extent.offset))?;
    let copied = std::io::copy(&mut reader.take(extent.length), sink)?;
    if copied != extent.length {
        return Err(Error::TruncatedInput);
    }
    Ok(copied)
}

fn read_vec<R: Read>(reader: &mut R, length: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; length as usize];
    reader.read_exact(&mut buf).map_err(eof_is_truncation)?;
    Ok(buf)
}
