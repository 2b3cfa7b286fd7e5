//! The in-memory block tree.
//!
//! A [`Block`] owns its metadata and children exclusively; there is no
//! sharing and no back-references.  Trees come from exactly two places:
//! the parser (immutable once built) and the builders in [`crate::builder`]
//! (assembled bottom-up, then written).  The mutators here are what keep
//! the header's scaled length fields consistent with the attached content —
//! the writer trusts them and never recomputes.

use std::fmt;
use std::io::Read;

use crate::error::Result;
use crate::field::{encode_sequence, FieldRecord, SEQUENCE_TRAILER};
use crate::header::{align_up, BlockHeader, BlockId};

// ── Metadata ────────────────────────────────────────────────────────────────

/// Metadata region content.  Structured metadata only ever occurs on the
/// main container; every other block carries opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metadata {
    Opaque(Vec<u8>),
    Structured(Vec<FieldRecord>),
}

impl Metadata {
    /// Unpadded byte length of this metadata once encoded.  The structured
    /// form counts the trailer byte written after the terminator record.
    pub fn encoded_len(&self) -> Result<u64> {
        match self {
            Metadata::Opaque(bytes) => Ok(bytes.len() as u64),
            Metadata::Structured(records) => {
                Ok(encode_sequence(records)?.len() as u64 + 1)
            }
        }
    }
}

// ── Payload ─────────────────────────────────────────────────────────────────

/// Byte range of a payload inside the stream it was parsed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
}

/// A build-side payload that is streamed from its source at write time
/// instead of being buffered.
pub struct PayloadStream {
    pub(crate) reader: Box<dyn Read>,
    pub length:        u64,
}

impl PayloadStream {
    pub fn new(reader: impl Read + 'static, length: u64) -> Self {
        Self { reader: Box::new(reader), length }
    }
}

impl fmt::Debug for PayloadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PayloadStream")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// What a block's data region holds.
#[derive(Debug)]
pub enum Payload {
    /// Buffered bytes.  An empty vector is "no payload".
    Opaque(Vec<u8>),
    /// Streamed from an external source at write time.
    Stream(PayloadStream),
    /// Located but not materialized — the parser's deferred form for
    /// large payloads.  Copy it out with [`crate::parser::copy_extent`].
    Extent(Extent),
    /// Nested child blocks, in wire order.
    Children(Vec<Block>),
}

// ── Block ───────────────────────────────────────────────────────────────────

/// One node of the container tree: header + optional metadata +
/// payload-or-children.
#[derive(Debug)]
pub struct Block {
    header:   BlockHeader,
    metadata: Option<Metadata>,
    payload:  Payload,
}

impl Block {
    /// An empty leaf with the given role and zeroed lengths.
    pub fn new(id: BlockId) -> Self {
        Self::with_uuid(id.uuid())
    }

    /// An empty leaf with an arbitrary (possibly unknown) UUID.
    pub fn with_uuid(uuid: uuid::Uuid) -> Self {
        Self {
            header:   BlockHeader::new(uuid),
            metadata: None,
            payload:  Payload::Opaque(Vec::new()),
        }
    }

    /// Assembly used by the parser, which has already-consistent header
    /// lengths straight off the wire.
    pub(crate) fn from_parts(
        header:   BlockHeader,
        metadata: Option<Metadata>,
        payload:  Payload,
    ) -> Self {
        Self { header, metadata, payload }
    }

    pub(crate) fn into_parts(self) -> (BlockHeader, Option<Metadata>, Payload) {
        (self.header, self.metadata, self.payload)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn header(&self) -> &BlockHeader {
        &self.header
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Child blocks, or an empty slice for a leaf.
    pub fn children(&self) -> &[Block] {
        match &self.payload {
            Payload::Children(children) => children,
            _ => &[],
        }
    }

    pub fn is_container(&self) -> bool {
        matches!(self.payload, Payload::Children(_))
    }

    // ── Mutators (length-invariant maintenance) ─────────────────────────────

    /// Attach metadata, storing its boundary-aligned length in the header.
    pub fn set_metadata(&mut self, metadata: Metadata) -> Result<()> {
        let aligned = align_up(metadata.encoded_len()?);
        self.header.set_metadata_length(aligned)?;
        self.metadata = Some(metadata);
        Ok(())
    }

    /// Attach a buffered payload, storing its aligned length in the header.
    pub fn set_payload(&mut self, bytes: Vec<u8>) -> Result<()> {
        self.header.set_data_length(align_up(bytes.len() as u64))?;
        self.header.set_has_children(false);
        self.payload = Payload::Opaque(bytes);
        Ok(())
    }

    /// Attach a payload that will be streamed from `reader` at write time.
    /// `length` is the exact number of bytes the reader will yield.
    pub fn set_payload_stream(
        &mut self,
        reader: impl Read + 'static,
        length: u64,
    ) -> Result<()> {
        self.header.set_data_length(align_up(length))?;
        self.header.set_has_children(false);
        self.payload = Payload::Stream(PayloadStream::new(reader, length));
        Ok(())
    }

    /// Attach children, storing the sum of their encoded spans as this
    /// block's data length and raising the children flag.
    pub fn set_children(&mut self, children: Vec<Block>) -> Result<()> {
        let total: u64 = children.iter().map(|c| c.header.encoded_span()).sum();
        self.header.set_data_length(total)?;
        self.header.set_has_children(true);
        self.payload = Payload::Children(children);
        Ok(())
    }

    // ── Traversal ───────────────────────────────────────────────────────────

    /// Depth-first pre-order walk over this block and all descendants,
    /// yielding `(depth, &Block)` with the receiver at depth 0.
    pub fn iter(&self) -> BlockIter<'_> {
        BlockIter { stack: vec![(0, self)] }
    }
}

/// Iterator behind [`Block::iter`].
pub struct BlockIter<'a> {
    stack: Vec<(usize, &'a Block)>,
}

impl<'a> Iterator for BlockIter<'a> {
    type Item = (usize, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, block) = self.stack.pop()?;
        for child in block.children().iter().rev() {
            self.stack.push((depth + 1, child));
        }
        Some((depth, block))
    }
}

/// Encoded records + trailer byte for a structured metadata region.  The
/// writer pads the result out to the declared aligned length.
pub(crate) fn structured_metadata_bytes(records: &[FieldRecord]) -> Result<Vec<u8>> {
    let mut bytes = encode_sequence(records)?;
    bytes.push(SEQUENCE_TRAILER);
    Ok(bytes)
}
