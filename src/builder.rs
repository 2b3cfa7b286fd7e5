//! Build-side assembly: the compressed boot envelope and the default
//! firmware tree.
//!
//! Both builders maintain the length invariants through the [`Block`]
//! mutators, bottom-up, so the finished tree can be handed to the writer
//! as-is.

use std::io::{Read, Seek, SeekFrom, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::block::{Block, Metadata};
use crate::error::Result;
use crate::field::default_certificate_records;
use crate::header::BlockId;
use crate::writer::write_block;

/// Wrap an arbitrary binary as the innermost boot image: a single
/// boot-ELF leaf with the binary as payload, serialized and gzipped into
/// `sink` in one streaming pass.  The result is what a boot leaf's payload
/// is expected to contain.
pub fn wrap_boot<W, R>(sink: &mut W, mut payload: R) -> Result<()>
where
    W: Write,
    R: Read + Seek + 'static,
{
    let length = stream_len(&mut payload)?;

    let mut envelope = Block::new(BlockId::BootElf);
    envelope.set_payload_stream(payload, length)?;

    let mut encoder = GzEncoder::new(sink, Compression::default());
    write_block(&mut encoder, envelope)?;
    encoder.finish()?;
    Ok(())
}

/// Assemble the fixed well-known tree shape, bottom-up:
///
/// ```text
/// main container            structured certificate metadata
/// └── firmware container    opaque metadata blob
///     ├── kernel-params     command line as opaque metadata, no payload
///     ├── rootfs            payload streamed from `rootfs`
///     └── boot              payload streamed from `kernel`
/// ```
///
/// `kernel` is expected to already be a compressed boot envelope as
/// produced by [`wrap_boot`].  Container lengths are computed as children
/// are attached.
pub fn build_default_tree<R1, R2>(
    serial:          &str,
    signing_key:     &[u8],
    metadata_blob:   Vec<u8>,
    kernel_options:  &str,
    mut rootfs:      R1,
    mut kernel:      R2,
) -> Result<Block>
where
    R1: Read + Seek + 'static,
    R2: Read + Seek + 'static,
{
    let rootfs_len = stream_len(&mut rootfs)?;
    let kernel_len = stream_len(&mut kernel)?;

    let mut kernel_params = Block::new(BlockId::KernelParams);
    kernel_params.set_metadata(Metadata::Opaque(kernel_options.as_bytes().to_vec()))?;

    let mut rootfs_leaf = Block::new(BlockId::RootFs);
    rootfs_leaf.set_payload_stream(rootfs, rootfs_len)?;

    let mut boot_leaf = Block::new(BlockId::Boot);
    boot_leaf.set_payload_stream(kernel, kernel_len)?;

    let mut firmware = Block::new(BlockId::FirmwareContainer);
    firmware.set_metadata(Metadata::Opaque(metadata_blob))?;
    firmware.set_children(vec![kernel_params, rootfs_leaf, boot_leaf])?;

    let mut root = Block::new(BlockId::MainContainer);
    root.set_metadata(Metadata::Structured(default_certificate_records(
        serial,
        signing_key,
    )))?;
    root.set_children(vec![firmware])?;

    Ok(root)
}

/// Bytes remaining from the current position to the end of the stream;
/// the position is restored afterwards.
fn stream_len<R: Read + Seek>(reader: &mut R) -> Result<u64> {
    let position = reader.stream_position()?;
    let end = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(position))?;
    Ok(end - position)
}
