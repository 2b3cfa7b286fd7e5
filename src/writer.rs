//! Depth-first serializer: block tree → bytes.
//!
//! The writer trusts the header lengths precomputed by the [`Block`]
//! mutators — it never recomputes or verifies them.  What it does own is
//! boundary padding: every metadata and payload region is followed by zero
//! bytes up to the next 16-byte position.  Positions are tracked internally
//! by counting written bytes, so any `Write` sink works — including a gzip
//! encoder, which is how [`crate::builder::wrap_boot`] serializes an
//! envelope straight into compressed form.

use std::io::{self, Write};

use crate::block::{structured_metadata_bytes, Block, Metadata, Payload};
use crate::error::{Error, Result};
use crate::header::{ALIGNMENT, SENTINEL};

/// Write the 16-byte sentinel, then the whole tree.  Consumes the tree;
/// a block's lifetime ends when it is written.
pub fn write_root<W: Write>(sink: &mut W, tree: Block) -> Result<()> {
    sink.write_all(&SENTINEL)?;
    write_block(sink, tree)
}

/// Serialize one block and its descendants to `sink`.
pub fn write_block<W: Write>(sink: &mut W, block: Block) -> Result<()> {
    let mut counting = CountingWriter { inner: sink, position: 0 };
    write_block_inner(&mut counting, block)
}

fn write_block_inner<W: Write>(sink: &mut CountingWriter<W>, block: Block) -> Result<()> {
    let (header, metadata, payload) = block.into_parts();
    header.encode(sink)?;

    if let Some(metadata) = metadata {
        match metadata {
            Metadata::Opaque(bytes) => sink.write_all(&bytes)?,
            Metadata::Structured(records) => {
                sink.write_all(&structured_metadata_bytes(&records)?)?
            }
        }
        sink.pad_to_boundary()?;
    }

    match payload {
        Payload::Opaque(bytes) => {
            sink.write_all(&bytes)?;
            sink.pad_to_boundary()?;
        }
        Payload::Stream(mut stream) => {
            let copied = io::copy(&mut stream.reader, sink)?;
            if copied != stream.length {
                return Err(Error::MalformedTree(format!(
                    "payload stream yielded {copied} bytes, {} declared",
                    stream.length
                )));
            }
            sink.pad_to_boundary()?;
        }
        Payload::Extent(_) => {
            return Err(Error::MalformedTree(
                "deferred payload extent has no backing source to copy from".into(),
            ));
        }
        // Children carry their own padding; the parent's declared data
        // length is the sum of their spans, so nothing follows them.
        Payload::Children(children) => {
            for child in children {
                write_block_inner(sink, child)?;
            }
        }
    }

    Ok(())
}

// ── Counting sink ───────────────────────────────────────────────────────────

struct CountingWriter<'a, W: Write> {
    inner:    &'a mut W,
    position: u64,
}

impl<W: Write> CountingWriter<'_, W> {
    /// Zero-fill up to the next 16-byte boundary; no-op when aligned.
    fn pad_to_boundary(&mut self) -> io::Result<()> {
        const ZEROS: [u8; ALIGNMENT as usize] = [0; ALIGNMENT as usize];
        let rem = (self.position % ALIGNMENT) as usize;
        if rem != 0 {
            self.write_all(&ZEROS[rem..])?;
        }
        Ok(())
    }
}

impl<W: Write> Write for CountingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.position += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
