//! Metadata location and parsing.
//!
//! The tail of every database carries a fixed 14-byte marker followed by one
//! data-section-encoded map describing the file: IP version, record size,
//! node count, format version, build epoch. Only a small descriptor is kept
//! on the heap; the raw metadata stays in the byte source.
//!
//! The marker is guaranteed to sit near the end of the file, so the scan is
//! bounded to the trailing 128 KiB and only falls back to a full-file pass
//! when that window misses.

use crate::decoder::{DataValue, Decoder};
use crate::error::{Error, Result};
use memchr::memmem;
use serde::Serialize;
use std::collections::HashMap;

/// Metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Trailing window searched before falling back to a full scan.
const MARKER_SEARCH_WINDOW: usize = 128 * 1024;

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Size of a node row (two records) in bytes.
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Create from a bit width.
    pub fn from_bits(bits: u64) -> Result<Self> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(Error::InvalidMetadata(format!(
                "unsupported record size: {} bits",
                bits
            ))),
        }
    }
}

/// IP version of the search tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IpVersion {
    /// IPv4-only tree (32-bit walks)
    V4,
    /// IPv6 tree (128-bit walks, may embed IPv4 under ::/96)
    V6,
}

/// Parsed metadata descriptor. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size of the search tree
    pub record_size: RecordSize,
    /// IP version the tree was built for
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes (`node_count * row bytes`)
    pub search_tree_size: usize,
    /// Absolute offset of the data section (tree + 16-byte separator)
    pub data_section_start: usize,
    /// Binary format major version
    pub binary_format_major_version: u16,
    /// Binary format minor version
    pub binary_format_minor_version: u16,
    /// Database type label, e.g. "GeoLite2-City"
    pub database_type: String,
    /// Locale codes the database carries
    pub languages: Vec<String>,
    /// Database build time, seconds since the Unix epoch
    pub build_epoch: u64,
    /// Human-readable description per language
    pub description: HashMap<String, String>,
}

/// Find the metadata marker, returning the offset just past it.
///
/// When a file contains several marker byte sequences (possible if a stored
/// string happens to embed one), the last occurrence is the real metadata.
pub fn find_marker(data: &[u8]) -> Result<usize> {
    if data.len() < METADATA_MARKER.len() {
        return Err(Error::MetadataNotFound);
    }

    let window_start = data.len().saturating_sub(MARKER_SEARCH_WINDOW);
    if let Some(pos) = memmem::rfind(&data[window_start..], METADATA_MARKER) {
        return Ok(window_start + pos + METADATA_MARKER.len());
    }

    // Bounded window missed; scan the rest of the file once.
    match memmem::rfind(&data[..window_start + METADATA_MARKER.len() - 1], METADATA_MARKER) {
        Some(pos) => Ok(pos + METADATA_MARKER.len()),
        None => Err(Error::MetadataNotFound),
    }
}

impl Metadata {
    /// Locate and parse the metadata descriptor from a whole database image.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let metadata_start = find_marker(data)?;

        // The metadata map is encoded exactly like data-section values, so
        // the decoder bootstraps directly against the tail bytes. Pointers
        // inside metadata are relative to the metadata section itself.
        let decoder = Decoder::new(&data[metadata_start..]);
        let value = decoder
            .decode(0)
            .map_err(|e| Error::InvalidMetadata(format!("failed to decode metadata: {}", e)))?;

        let map = match value {
            DataValue::Map(_) => value,
            other => {
                return Err(Error::InvalidMetadata(format!(
                    "metadata is {:?}, expected a map",
                    other
                )))
            }
        };

        let node_count = required_uint(&map, "node_count")?;
        if node_count > u32::MAX as u64 {
            return Err(Error::InvalidMetadata(format!(
                "node_count {} exceeds u32",
                node_count
            )));
        }
        let record_size = RecordSize::from_bits(required_uint(&map, "record_size")?)?;

        let ip_version = match required_uint(&map, "ip_version")? {
            4 => IpVersion::V4,
            6 => IpVersion::V6,
            n => {
                return Err(Error::InvalidMetadata(format!(
                    "unsupported ip_version: {}",
                    n
                )))
            }
        };

        let search_tree_size = node_count as usize * record_size.node_bytes();
        let data_section_start = search_tree_size + 16;
        if data_section_start > data.len() {
            return Err(Error::InvalidMetadata(format!(
                "search tree of {} bytes does not fit in a {}-byte file",
                search_tree_size,
                data.len()
            )));
        }

        let binary_format_major_version =
            required_uint(&map, "binary_format_major_version")? as u16;
        let binary_format_minor_version =
            required_uint(&map, "binary_format_minor_version")? as u16;
        let build_epoch = required_uint(&map, "build_epoch")?;

        let database_type = match map.get("database_type") {
            Some(DataValue::String(s)) => s.clone(),
            Some(other) => {
                return Err(Error::InvalidMetadata(format!(
                    "database_type is {:?}, expected string",
                    other
                )))
            }
            None => {
                return Err(Error::InvalidMetadata(
                    "required field 'database_type' not found".to_string(),
                ))
            }
        };

        let languages = match map.get("languages") {
            Some(DataValue::Array(items)) => items
                .iter()
                .map(|item| match item {
                    DataValue::String(s) => Ok(s.clone()),
                    other => Err(Error::InvalidMetadata(format!(
                        "language entry is {:?}, expected string",
                        other
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };

        let description = match map.get("description") {
            Some(DataValue::Map(entries)) => entries
                .iter()
                .filter_map(|(lang, text)| {
                    text.as_str().map(|t| (lang.clone(), t.to_string()))
                })
                .collect(),
            _ => HashMap::new(),
        };

        Ok(Metadata {
            node_count: node_count as u32,
            record_size,
            ip_version,
            search_tree_size,
            data_section_start,
            binary_format_major_version,
            binary_format_minor_version,
            database_type,
            languages,
            build_epoch,
            description,
        })
    }
}

fn required_uint(map: &DataValue, key: &str) -> Result<u64> {
    match map.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            Error::InvalidMetadata(format!("field '{}' is not an unsigned integer", key))
        }),
        None => Err(Error::InvalidMetadata(format!(
            "required field '{}' not found",
            key
        ))),
    }
}
