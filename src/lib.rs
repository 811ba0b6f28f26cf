//! Prefixdb - Read-Only IP Prefix Database Lookups
//!
//! Prefixdb answers longest-prefix-match queries against MaxMind DB format
//! files (`.mmdb`): given an IP address, it returns the structured record of
//! the most specific network containing it. The file is memory-mapped and
//! never loaded or modified, so opening a multi-gigabyte database costs
//! milliseconds and one handle serves any number of threads.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use prefixdb::{CacheStrategy, Reader};
//!
//! let db = Reader::open("GeoLite2-City.mmdb", CacheStrategy::default())?;
//!
//! if let Some(record) = db.resolve("81.2.69.142".parse()?)? {
//!     if let Some(country) = record.get("country") {
//!         println!("{}", country.to_json());
//!     }
//! }
//!
//! // No covering network is an ordinary outcome, not an error
//! assert!(db.resolve("10.0.0.1".parse()?)?.is_none());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Key Features
//!
//! - **Zero-Copy Loading**: memory-mapped files are ready for queries
//!   immediately; the OS page cache does the rest
//! - **Longest Prefix Match**: binary trie walk, one bit of the address per
//!   node, at most 32 or 128 steps per lookup
//! - **Rich Records**: maps, arrays, strings and the full numeric range up
//!   to `u128`, decoded into an owned tree with pointers resolved away
//! - **Decoded-Value Cache**: optional bounded LRU keyed by data offset, so
//!   hot records skip decoding entirely
//! - **Hardened Against Corrupt Files**: malformed input produces errors,
//!   never panics or unbounded recursion
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  Database File Format                │
//! ├──────────────────────────────────────┤
//! │  1. Search Tree (binary trie)        │
//! │  2. 16-byte separator                │
//! │  3. Data Section (shared records)    │
//! │  4. Metadata (marker + map)          │
//! └──────────────────────────────────────┘
//!          ↓ mmap() syscall
//! ┌──────────────────────────────────────┐
//! │  resolve(addr)                       │
//! │  tree walk → cache → decode          │
//! └──────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
/// Decoded-value cache keyed by data-section offset
pub mod cache;
/// Data section decoding
pub mod decoder;
/// Error types for database operations
pub mod error;
/// Metadata location and parsing
pub mod metadata;
/// Database handle and lookup facade
pub mod reader;
/// Byte sources: memory maps and owned buffers
pub mod source;
/// Search tree traversal
pub mod tree;

// Re-exports for consumers

/// Database handle
pub use crate::reader::Reader;

/// Decoded record value
pub use crate::decoder::DataValue;

pub use crate::cache::{CacheStrategy, DEFAULT_CACHE_CAPACITY};
pub use crate::error::{Error, Result};
pub use crate::metadata::{IpVersion, Metadata, RecordSize};

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library major version
pub const VERSION_MAJOR: u32 = 0;

/// Library minor version
pub const VERSION_MINOR: u32 = 1;

/// Library patch version
pub const VERSION_PATCH: u32 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(
            VERSION,
            format!("{}.{}.{}", VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
        );
    }
}
