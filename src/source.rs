//! Byte source backing a database handle.
//!
//! A database is a fixed-size, randomly-addressable byte range. The preferred
//! backing is a read-only memory mapping (zero-copy, OS page cache); a fully
//! buffered `Vec<u8>` variant covers in-memory databases and compressed
//! files that cannot be mapped directly. Both present identical bounds-checked
//! read semantics, so the rest of the engine is mapping-agnostic.
//!
//! The source is never mutated after open, which makes unsynchronized
//! concurrent reads from any number of threads safe.

use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read-only byte range backed by a memory map or an owned buffer.
pub enum ByteSource {
    /// Memory-mapped file
    Mapped(Mmap),
    /// Fully buffered copy
    Buffered(Vec<u8>),
}

impl ByteSource {
    /// Open a database file.
    ///
    /// Plain files are memory-mapped. Files ending in `.gz`
    /// (case-insensitive) are decompressed into a buffered source, since a
    /// compressed stream cannot be randomly addressed through a mapping.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Io(format!("failed to open {}: {}", path.display(), e)))?;

        let is_gzip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false);

        if is_gzip {
            let mut buffer = Vec::new();
            GzDecoder::new(file)
                .read_to_end(&mut buffer)
                .map_err(|e| Error::Io(format!("failed to decompress {}: {}", path.display(), e)))?;
            Ok(ByteSource::Buffered(buffer))
        } else {
            // SAFETY: the mapping is read-only and the engine treats the file
            // as immutable for the lifetime of the handle.
            let mmap = unsafe { Mmap::map(&file) }
                .map_err(|e| Error::Io(format!("failed to mmap {}: {}", path.display(), e)))?;
            Ok(ByteSource::Mapped(mmap))
        }
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        ByteSource::Buffered(data)
    }

    /// Total size of the source in bytes.
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    /// Whether the source is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The entire byte range.
    pub fn as_slice(&self) -> &[u8] {
        match self {
            ByteSource::Mapped(m) => &m[..],
            ByteSource::Buffered(v) => v.as_slice(),
        }
    }

    /// Bounds-checked read of `length` bytes at `offset`.
    pub fn read(&self, offset: usize, length: usize) -> Result<&[u8]> {
        let data = self.as_slice();
        let end = offset.checked_add(length).ok_or(Error::OutOfRange {
            offset,
            length,
            size: data.len(),
        })?;
        if end > data.len() {
            return Err(Error::OutOfRange {
                offset,
                length,
                size: data.len(),
            });
        }
        Ok(&data[offset..end])
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            ByteSource::Mapped(_) => "mapped",
            ByteSource::Buffered(_) => "buffered",
        };
        f.debug_struct("ByteSource")
            .field("kind", &kind)
            .field("size", &self.len())
            .finish()
    }
}
