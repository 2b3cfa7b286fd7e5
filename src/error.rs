use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy shared by every layer of the codec.
///
/// All parse-time structural errors are fatal to the parse call that raised
/// them; no partial tree is ever returned.  [`Error::GenericFallback`] is the
/// one deliberate exception: it marks a boot payload that would not gunzip,
/// and the parser converts it into "leave the leaf opaque" instead of
/// propagating it.
#[derive(Error, Debug)]
pub enum Error {
    /// The stream ended before a declared length was satisfied.
    #[error("input truncated before a declared length was satisfied")]
    TruncatedInput,

    /// A field record tag broke the fixed ordering/grouping rule.
    #[error("field record tag {found} where tag {expected} was required")]
    UnexpectedFieldOrder { expected: u8, found: u8 },

    /// A length that must be 16-byte aligned was not.
    #[error("length {0} is not a multiple of 16")]
    AlignmentViolation(u64),

    /// A length does not fit its scaled header field.
    #[error("length {0} does not fit the scaled header field")]
    OutOfRange(u64),

    /// Children's encoded sizes do not sum to the parent's declared length.
    #[error("children span {consumed} bytes, parent declares {declared}")]
    ChildSizeMismatch { declared: u64, consumed: u64 },

    /// Nesting deeper than the recursion cap, or a tree invariant broken
    /// during write.
    #[error("malformed block tree: {0}")]
    MalformedTree(String),

    /// A boot payload that did not decode as a compressed envelope.
    /// "Not gzip" and "corrupt gzip" are deliberately not distinguished.
    #[error("payload is not a decodable boot envelope")]
    GenericFallback,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
