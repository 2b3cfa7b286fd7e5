//! Recursive block container codec for ASA firmware images.
//!
//! An image is a tree of self-describing, length-prefixed blocks: each
//! block carries a role UUID, an optional metadata region, and either a
//! raw payload or nested child blocks whose encoded sizes sum exactly to
//! the declared data length.  Lengths are stored scaled by 16 and every
//! region is padded to a 16-byte boundary.  The root block's metadata is a
//! nested tag-length-value certificate sequence; a boot leaf's payload is
//! a gzip envelope hiding one more tree.
//!
//! ```no_run
//! use std::io::Cursor;
//! use asafw::{build_default_tree, parse_root, write_root, DEFAULT_SIGNING_KEY};
//!
//! let rootfs = std::fs::File::open("rootfs.img")?;
//! let kernel = std::fs::File::open("boot.gz")?;
//! let tree = build_default_tree(
//!     "60A6A3E5", &DEFAULT_SIGNING_KEY, vec![0u8; 256],
//!     "console=ttyS0", rootfs, kernel,
//! )?;
//!
//! let mut image = Vec::new();
//! write_root(&mut image, tree)?;
//! let reparsed = parse_root(&mut Cursor::new(image))?;
//! assert!(reparsed.is_container());
//! # Ok::<(), asafw::Error>(())
//! ```

pub mod block;
pub mod builder;
pub mod error;
pub mod field;
pub mod header;
pub mod parser;
pub mod writer;

pub use block::{Block, BlockIter, Extent, Metadata, Payload, PayloadStream};
pub use builder::{build_default_tree, wrap_boot};
pub use error::{Error, Result};
pub use field::{
    decode_one, decode_sequence, default_certificate_records, encode_sequence, FieldRecord,
    FieldValue, DEFAULT_ISSUER, DEFAULT_SERIAL, DEFAULT_SIGNING_KEY,
};
pub use header::{
    align_up, BlockHeader, BlockId, ALIGNMENT, BLOCK_HEADER_SIZE, SENTINEL, UUID_BOOT,
    UUID_BOOT_ELF, UUID_FIRMWARE_CONTAINER, UUID_KERNEL_PARAMS, UUID_MAIN_CONTAINER, UUID_ROOTFS,
};
pub use parser::{
    check_root_sentinel, copy_extent, expand_boot_payload, parse_block, parse_root,
    parse_root_with, ParseOptions, MAX_TREE_DEPTH,
};
pub use writer::{write_block, write_root};
