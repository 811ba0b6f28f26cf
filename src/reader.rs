//! Database handle and lookup facade.
//!
//! `Reader` owns the byte source, the parsed metadata, and the decoded-value
//! cache, and composes tree walk -> cache -> decode into the single public
//! `resolve` operation. One open handle is shared freely across threads; the
//! only mutable state is the cache, which synchronizes internally.
//!
//! The handle is a two-state machine: Open until `close()`, then Closed.
//! Closing drops the mapping deterministically; later calls fail with
//! `UseAfterClose` and `close` itself is idempotent.

use crate::cache::{CacheStrategy, DataCache};
use crate::decoder::{DataValue, Decoder};
use crate::error::{Error, Result};
use crate::metadata::Metadata;
use crate::source::ByteSource;
use crate::tree::{Ipv4Root, TreeWalker};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, RwLock};

/// An open database handle.
///
/// # Examples
///
/// ```no_run
/// use prefixdb::{CacheStrategy, Reader};
///
/// let db = Reader::open("GeoLite2-City.mmdb", CacheStrategy::default())?;
/// if let Some(record) = db.resolve("81.2.69.142".parse()?)? {
///     println!("{}", record.to_json());
/// }
/// db.close();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Reader {
    inner: RwLock<Option<Inner>>,
}

struct Inner {
    source: ByteSource,
    metadata: Metadata,
    cache: DataCache,
    ipv4_root: Ipv4Root,
}

impl Reader {
    /// Open a database file.
    ///
    /// The file is memory-mapped (or decompressed into memory for `.gz`
    /// files), the metadata descriptor is parsed, and the IPv4 starting node
    /// is precomputed. Fails with `Io`, `MetadataNotFound` or
    /// `InvalidMetadata`; a failed open leaves nothing to clean up.
    pub fn open<P: AsRef<Path>>(path: P, cache: CacheStrategy) -> Result<Self> {
        Self::from_source(ByteSource::open(path)?, cache)
    }

    /// Open a database held in memory.
    pub fn open_bytes(data: Vec<u8>, cache: CacheStrategy) -> Result<Self> {
        Self::from_source(ByteSource::from_bytes(data), cache)
    }

    fn from_source(source: ByteSource, cache: CacheStrategy) -> Result<Self> {
        let metadata = Metadata::parse(source.as_slice())?;
        let ipv4_root = TreeWalker::new(source.as_slice(), &metadata).compute_ipv4_root()?;

        Ok(Self {
            inner: RwLock::new(Some(Inner {
                source,
                metadata,
                cache: DataCache::new(cache),
                ipv4_root,
            })),
        })
    }

    /// Resolve an address to its record.
    ///
    /// Returns `Ok(None)` when no network in the database covers the
    /// address; that is an ordinary outcome, not an error. Per-lookup errors
    /// do not invalidate the handle.
    pub fn resolve(&self, addr: IpAddr) -> Result<Option<Arc<DataValue>>> {
        Ok(self.resolve_with_prefix(addr)?.map(|(value, _)| value))
    }

    /// Resolve an address, also reporting the matched prefix length.
    ///
    /// The prefix length is relative to the queried family: at most 32 for
    /// IPv4 lookups even against an IPv6-tree database.
    pub fn resolve_with_prefix(&self, addr: IpAddr) -> Result<Option<(Arc<DataValue>, u8)>> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let inner = guard.as_ref().ok_or(Error::UseAfterClose)?;
        inner.resolve(addr)
    }

    /// The parsed metadata descriptor.
    pub fn metadata(&self) -> Result<Metadata> {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let inner = guard.as_ref().ok_or(Error::UseAfterClose)?;
        Ok(inner.metadata.clone())
    }

    /// Whether the handle is still open.
    pub fn is_open(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Close the handle, releasing the mapping. Idempotent; in-flight
    /// lookups on other threads finish first.
    pub fn close(&self) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard.take();
    }
}

impl Inner {
    fn resolve(&self, addr: IpAddr) -> Result<Option<(Arc<DataValue>, u8)>> {
        let walker = TreeWalker::new(self.source.as_slice(), &self.metadata)
            .with_ipv4_root(self.ipv4_root);

        let matched = match walker.locate(addr)? {
            Some(m) => m,
            None => return Ok(None),
        };

        if let Some(value) = self.cache.get(matched.data_offset) {
            return Ok(Some((value, matched.prefix_len)));
        }

        let data_section = self
            .source
            .read(
                self.metadata.data_section_start,
                self.source.len() - self.metadata.data_section_start,
            )?;
        let value = Arc::new(Decoder::new(data_section).decode(matched.data_offset)?);
        self.cache.put(matched.data_offset, Arc::clone(&value));

        Ok(Some((value, matched.prefix_len)))
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let guard = self.inner.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(inner) => f
                .debug_struct("Reader")
                .field("database_type", &inner.metadata.database_type)
                .field("node_count", &inner.metadata.node_count)
                .field("source", &inner.source)
                .finish(),
            None => f.debug_struct("Reader").field("state", &"closed").finish(),
        }
    }
}
