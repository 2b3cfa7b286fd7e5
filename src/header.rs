//! Wire identity: the stream sentinel, frozen block-role UUIDs, and the
//! fixed 32-byte block header codec.
//!
//! # Identity rules
//! Every block carries a 16-byte UUID in its header.  The UUID is a role
//! discriminant, not a random identifier: the closed set of constants below
//! designates the container roles the format knows about.  Any other value
//! is treated as an opaque block and passed through untouched.
//!
//! # Scaled lengths
//! The header stores both lengths pre-scaled by 16:
//!   - metadata: `real = unit_byte × 16` (so at most 4080 bytes);
//!   - data:     `real = raw ÷ 16`, stored as `raw = real × 16`.
//! The setters insist on 16-byte-aligned real lengths.  Allowing an
//! unaligned value through would store a raw field that no longer inverts
//! to the length that was given.
//!
//! # Endianness
//! Header integers are little-endian.  The UUID is the canonical 16 bytes
//! as printed, unswapped.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Fixed 16-byte constant optionally prefixing a whole image stream.
/// Legacy images omit it and start directly at the root block header.
pub const SENTINEL: [u8; 16] = [
    0x7e, 0x15, 0xc2, 0x8a, 0x61, 0x0b, 0x4f, 0xd9,
    0x93, 0x70, 0x2e, 0x45, 0xb8, 0xa6, 0xdc, 0x04,
];

/// Encoded size of every block header.
pub const BLOCK_HEADER_SIZE: u64 = 32;

/// Every metadata and payload region is padded to this boundary.
pub const ALIGNMENT: u64 = 16;

/// Round `n` up to the next 16-byte boundary.
#[inline]
pub fn align_up(n: u64) -> u64 {
    (n + (ALIGNMENT - 1)) & !(ALIGNMENT - 1)
}

// ── Frozen block-role UUIDs ─────────────────────────────────────────────────
//
// These values are permanent.  A role UUID is never reused or renumbered;
// readers match on the exact bytes.

/// Root of every image: the main container.
/// UUID: 60d090eb-09f7-1a4a-9f30-9e45f7287490
pub const UUID_MAIN_CONTAINER: Uuid = Uuid::from_bytes([
    0x60, 0xd0, 0x90, 0xeb, 0x09, 0xf7, 0x1a, 0x4a,
    0x9f, 0x30, 0x9e, 0x45, 0xf7, 0x28, 0x74, 0x90,
]);

/// Firmware container grouping the kernel-params, rootfs and boot leaves.
/// UUID: 11e0d2cd-8e2c-4b53-9f47-2b0c66912bd1
pub const UUID_FIRMWARE_CONTAINER: Uuid = Uuid::from_bytes([
    0x11, 0xe0, 0xd2, 0xcd, 0x8e, 0x2c, 0x4b, 0x53,
    0x9f, 0x47, 0x2b, 0x0c, 0x66, 0x91, 0x2b, 0xd1,
]);

/// Kernel-parameters leaf — command line carried as opaque metadata.
/// UUID: 53f9c2ad-0a1e-4d8b-b3c7-94e56a7f1c08
pub const UUID_KERNEL_PARAMS: Uuid = Uuid::from_bytes([
    0x53, 0xf9, 0xc2, 0xad, 0x0a, 0x1e, 0x4d, 0x8b,
    0xb3, 0xc7, 0x94, 0xe5, 0x6a, 0x7f, 0x1c, 0x08,
]);

/// Root filesystem leaf.
/// UUID: 8a4c9e01-63d2-4f17-9b60-5dd13e84ab72
pub const UUID_ROOTFS: Uuid = Uuid::from_bytes([
    0x8a, 0x4c, 0x9e, 0x01, 0x63, 0xd2, 0x4f, 0x17,
    0x9b, 0x60, 0x5d, 0xd1, 0x3e, 0x84, 0xab, 0x72,
]);

/// Boot firmware leaf.  Its payload is a gzip stream holding a nested
/// block tree; the parser expands it transparently during extraction.
/// UUID: c76b4e52-2f9d-4a86-8d03-71afe2c95b40
pub const UUID_BOOT: Uuid = Uuid::from_bytes([
    0xc7, 0x6b, 0x4e, 0x52, 0x2f, 0x9d, 0x4a, 0x86,
    0x8d, 0x03, 0x71, 0xaf, 0xe2, 0xc9, 0x5b, 0x40,
]);

/// Inner boot-ELF leaf found inside the compressed boot envelope.
/// UUID: 3d258cfa-b1e4-4690-a6c1-0e85c7d2f913
pub const UUID_BOOT_ELF: Uuid = Uuid::from_bytes([
    0x3d, 0x25, 0x8c, 0xfa, 0xb1, 0xe4, 0x46, 0x90,
    0xa6, 0xc1, 0x0e, 0x85, 0xc7, 0xd2, 0xf9, 0x13,
]);

// ── BlockId ─────────────────────────────────────────────────────────────────

/// Runtime discriminant for the known block roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    MainContainer,
    FirmwareContainer,
    KernelParams,
    RootFs,
    Boot,
    BootElf,
}

impl BlockId {
    /// The frozen UUID written into the header for this role.
    #[inline]
    pub fn uuid(self) -> Uuid {
        match self {
            BlockId::MainContainer     => UUID_MAIN_CONTAINER,
            BlockId::FirmwareContainer => UUID_FIRMWARE_CONTAINER,
            BlockId::KernelParams      => UUID_KERNEL_PARAMS,
            BlockId::RootFs            => UUID_ROOTFS,
            BlockId::Boot              => UUID_BOOT,
            BlockId::BootElf           => UUID_BOOT_ELF,
        }
    }

    /// Resolve a UUID to a known role.  `None` means "opaque block".
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        match uuid {
            u if u == UUID_MAIN_CONTAINER     => Some(BlockId::MainContainer),
            u if u == UUID_FIRMWARE_CONTAINER => Some(BlockId::FirmwareContainer),
            u if u == UUID_KERNEL_PARAMS      => Some(BlockId::KernelParams),
            u if u == UUID_ROOTFS             => Some(BlockId::RootFs),
            u if u == UUID_BOOT               => Some(BlockId::Boot),
            u if u == UUID_BOOT_ELF           => Some(BlockId::BootElf),
            _                                 => None,
        }
    }

    /// Human-readable role name (for diagnostics only — never parsed).
    pub fn name(self) -> &'static str {
        match self {
            BlockId::MainContainer     => "main-container",
            BlockId::FirmwareContainer => "firmware-container",
            BlockId::KernelParams      => "kernel-params",
            BlockId::RootFs            => "rootfs",
            BlockId::Boot              => "boot",
            BlockId::BootElf           => "boot-elf",
        }
    }
}

// ── BlockHeader ─────────────────────────────────────────────────────────────

/// The fixed 32-byte header preceding every block.
///
/// Layout: `uuid[16]`, metadata-length unit byte, one reserved byte, scaled
/// data length (u32 LE), two reserved bytes, has-children flag byte, seven
/// reserved bytes.  Reserved bytes are preserved verbatim across a
/// decode/encode round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    uuid:          Uuid,
    meta_len_unit: u8,
    reserved1:     u8,
    data_len_raw:  u32,
    reserved2:     [u8; 2],
    has_children:  u8,
    reserved3:     [u8; 7],
}

impl BlockHeader {
    /// A zeroed header carrying the given role UUID.
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            meta_len_unit: 0,
            reserved1:     0,
            data_len_raw:  0,
            reserved2:     [0; 2],
            has_children:  0,
            reserved3:     [0; 7],
        }
    }

    /// Decode a header from the next 32 bytes of `reader`.
    ///
    /// No validation beyond length: garbage headers decode to garbage
    /// fields, and the surrounding parse fails when the declared lengths
    /// cannot be satisfied.
    pub fn decode<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw_uuid = [0u8; 16];
        reader.read_exact(&mut raw_uuid).map_err(eof_is_truncation)?;
        let meta_len_unit = reader.read_u8().map_err(eof_is_truncation)?;
        let reserved1 = reader.read_u8().map_err(eof_is_truncation)?;
        let data_len_raw = reader.read_u32::<LittleEndian>().map_err(eof_is_truncation)?;
        let mut reserved2 = [0u8; 2];
        reader.read_exact(&mut reserved2).map_err(eof_is_truncation)?;
        let has_children = reader.read_u8().map_err(eof_is_truncation)?;
        let mut reserved3 = [0u8; 7];
        reader.read_exact(&mut reserved3).map_err(eof_is_truncation)?;

        Ok(Self {
            uuid: Uuid::from_bytes(raw_uuid),
            meta_len_unit,
            reserved1,
            data_len_raw,
            reserved2,
            has_children,
            reserved3,
        })
    }

    /// Encode the header as its 32-byte wire form.
    pub fn encode<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.uuid.as_bytes())?;
        writer.write_u8(self.meta_len_unit)?;
        writer.write_u8(self.reserved1)?;
        writer.write_u32::<LittleEndian>(self.data_len_raw)?;
        writer.write_all(&self.reserved2)?;
        writer.write_u8(self.has_children)?;
        writer.write_all(&self.reserved3)?;
        Ok(())
    }

    #[inline]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn set_uuid(&mut self, uuid: Uuid) {
        self.uuid = uuid;
    }

    /// Resolved role, if this header carries one of the known UUIDs.
    pub fn block_id(&self) -> Option<BlockId> {
        BlockId::from_uuid(self.uuid)
    }

    /// Real metadata length in bytes (`unit_byte × 16`).
    #[inline]
    pub fn metadata_length(&self) -> u64 {
        u64::from(self.meta_len_unit) * ALIGNMENT
    }

    /// Store a real metadata length.  `n` must be 16-byte aligned and at
    /// most 4080 (the unit byte is a u8).
    pub fn set_metadata_length(&mut self, n: u64) -> Result<()> {
        if n % ALIGNMENT != 0 {
            return Err(Error::AlignmentViolation(n));
        }
        let unit = n / ALIGNMENT;
        if unit > u64::from(u8::MAX) {
            return Err(Error::OutOfRange(n));
        }
        self.meta_len_unit = unit as u8;
        Ok(())
    }

    /// Real data length in bytes (`raw ÷ 16`).  For a container this is the
    /// summed encoded size of its children, not a payload length.
    #[inline]
    pub fn data_length(&self) -> u64 {
        u64::from(self.data_len_raw) / ALIGNMENT
    }

    /// Store a real data length.  `n` must be 16-byte aligned and small
    /// enough that `n × 16` still fits the 32-bit raw field.
    pub fn set_data_length(&mut self, n: u64) -> Result<()> {
        if n % ALIGNMENT != 0 {
            return Err(Error::AlignmentViolation(n));
        }
        let raw = n
            .checked_mul(ALIGNMENT)
            .filter(|&raw| raw <= u64::from(u32::MAX))
            .ok_or(Error::OutOfRange(n))?;
        self.data_len_raw = raw as u32;
        Ok(())
    }

    #[inline]
    pub fn has_children(&self) -> bool {
        self.has_children == 1
    }

    pub fn set_has_children(&mut self, value: bool) {
        self.has_children = u8::from(value);
    }

    /// Full on-wire footprint of the block this header describes:
    /// header + metadata region + data region.  This is the quantity a
    /// parent container sums over its children.
    #[inline]
    pub fn encoded_span(&self) -> u64 {
        BLOCK_HEADER_SIZE + self.metadata_length() + self.data_length()
    }
}

/// The header codec reports a short read as a truncation, not a raw IO error.
pub(crate) fn eof_is_truncation(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::TruncatedInput
    } else {
        Error::Io(err)
    }
}
