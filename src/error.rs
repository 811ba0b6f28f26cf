/// Error types for the prefixdb library
use std::fmt;

/// Result type alias for lookup engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for database operations
///
/// Structural errors (`Io`, `MetadataNotFound`, `InvalidMetadata`) are fatal
/// to `Reader::open`. Per-lookup errors (`AddressFamilyMismatch`,
/// `CorruptPointerCycle`, `InvalidDataFormat`, `OutOfRange`) are surfaced per
/// call and leave the handle usable for other addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// I/O errors (file missing, unreadable, mmap failure)
    Io(String),

    /// The metadata marker was not found anywhere in the file
    MetadataNotFound,

    /// Metadata decoded but is missing required fields or holds bad values
    InvalidMetadata(String),

    /// Queried an address family the database does not contain
    AddressFamilyMismatch(String),

    /// Pointer offsets in the data section form a loop
    CorruptPointerCycle,

    /// Malformed control byte, unknown type tag, or truncated value
    InvalidDataFormat(String),

    /// Read past the end of the mapped extent
    OutOfRange {
        /// Absolute byte offset of the attempted read
        offset: usize,
        /// Requested length in bytes
        length: usize,
        /// Total size of the byte source
        size: usize,
    },

    /// Operation on a handle that has been closed
    UseAfterClose,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::MetadataNotFound => write!(f, "metadata marker not found"),
            Error::InvalidMetadata(msg) => write!(f, "invalid metadata: {}", msg),
            Error::AddressFamilyMismatch(msg) => {
                write!(f, "address family mismatch: {}", msg)
            }
            Error::CorruptPointerCycle => write!(f, "pointer cycle in data section"),
            Error::InvalidDataFormat(msg) => write!(f, "invalid data format: {}", msg),
            Error::OutOfRange {
                offset,
                length,
                size,
            } => write!(
                f,
                "read of {} bytes at offset {} exceeds source size {}",
                length, offset, size
            ),
            Error::UseAfterClose => write!(f, "database handle is closed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}
