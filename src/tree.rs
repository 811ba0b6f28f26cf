//! Search tree traversal.
//!
//! The search tree is a binary trie walked bit-by-bit over the address, most
//! significant bit first. Each node row packs two records (left for bit 0,
//! right for bit 1). A record value below `node_count` is the next node
//! index; equal to `node_count` means no covering network; above it encodes
//! a data-section offset, and reaching one terminates the walk (the longest
//! covering prefix has been found).
//!
//! Nodes are never materialized; rows are unpacked on the fly from the
//! mapped bytes.

use crate::error::{Error, Result};
use crate::metadata::{Metadata, RecordSize};
use std::net::{IpAddr, Ipv4Addr};

/// Result of a successful tree walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMatch {
    /// Offset into the data section (relative to data section start)
    pub data_offset: u32,
    /// Length of the matched network prefix, relative to the queried family
    pub prefix_len: u8,
}

/// Starting point for IPv4 walks, fixed per database.
///
/// IPv4 addresses in an IPv6 tree live under the `::/96` prefix, so the walk
/// over those 96 zero bits is done once at open and its outcome reused for
/// every IPv4 lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv4Root {
    /// Start IPv4 walks at this node
    Node(u32),
    /// The whole IPv4 space resolves to one record
    Data(u32),
    /// The tree has no IPv4 branch
    Absent,
}

/// Unpack a node row into its (left, right) records.
///
/// 24- and 32-bit rows are plain big-endian pairs; 28-bit rows share a
/// middle byte whose high nibble extends the left record and low nibble the
/// right.
pub fn split_node(row: &[u8], record_size: RecordSize) -> (u32, u32) {
    match record_size {
        RecordSize::Bits24 => {
            let left = (row[0] as u32) << 16 | (row[1] as u32) << 8 | row[2] as u32;
            let right = (row[3] as u32) << 16 | (row[4] as u32) << 8 | row[5] as u32;
            (left, right)
        }
        RecordSize::Bits28 => {
            let left = ((row[3] >> 4) as u32) << 24
                | (row[0] as u32) << 16
                | (row[1] as u32) << 8
                | row[2] as u32;
            let right = ((row[3] & 0x0F) as u32) << 24
                | (row[4] as u32) << 16
                | (row[5] as u32) << 8
                | row[6] as u32;
            (left, right)
        }
        RecordSize::Bits32 => {
            let left = u32::from_be_bytes([row[0], row[1], row[2], row[3]]);
            let right = u32::from_be_bytes([row[4], row[5], row[6], row[7]]);
            (left, right)
        }
    }
}

/// Walks the search tree of one database image.
pub struct TreeWalker<'a> {
    /// The search tree region of the file
    tree: &'a [u8],
    node_count: u32,
    record_size: RecordSize,
    ipv6: bool,
    ipv4_root: Ipv4Root,
}

impl<'a> TreeWalker<'a> {
    /// Create a walker over the full database image.
    ///
    /// For IPv6 databases the IPv4 root defaults to unresolved; callers that
    /// perform IPv4 lookups should install the result of
    /// [`TreeWalker::compute_ipv4_root`] via [`TreeWalker::with_ipv4_root`].
    pub fn new(data: &'a [u8], metadata: &Metadata) -> Self {
        let tree_end = metadata.search_tree_size.min(data.len());
        Self {
            tree: &data[..tree_end],
            node_count: metadata.node_count,
            record_size: metadata.record_size,
            ipv6: metadata.ip_version == crate::metadata::IpVersion::V6,
            ipv4_root: Ipv4Root::Node(0),
        }
    }

    /// Use a precomputed IPv4 starting point.
    pub fn with_ipv4_root(mut self, root: Ipv4Root) -> Self {
        self.ipv4_root = root;
        self
    }

    /// Walk the 96 zero bits of `::/96` to find where IPv4 lookups start.
    /// Meaningful only for IPv6 trees.
    pub fn compute_ipv4_root(&self) -> Result<Ipv4Root> {
        if !self.ipv6 {
            return Ok(Ipv4Root::Node(0));
        }
        let mut node = 0u32;
        for _ in 0..96 {
            if node >= self.node_count {
                return Ok(Ipv4Root::Absent);
            }
            let record = self.read_record(node, 0)?;
            if record == self.node_count {
                return Ok(Ipv4Root::Absent);
            } else if record < self.node_count {
                node = record;
            } else {
                return Ok(Ipv4Root::Data(self.data_offset(record)?));
            }
        }
        Ok(Ipv4Root::Node(node))
    }

    /// Resolve an address to a data-section offset, or `None` when no
    /// network in the database covers it.
    pub fn locate(&self, addr: IpAddr) -> Result<Option<TreeMatch>> {
        match addr {
            IpAddr::V4(v4) => self.locate_v4(v4),
            IpAddr::V6(v6) => {
                // ::ffff:a.b.c.d is the IPv4 address a.b.c.d in disguise.
                if let Some(v4) = v6.to_ipv4_mapped() {
                    return self.locate_v4(v4);
                }
                if !self.ipv6 {
                    return Err(Error::AddressFamilyMismatch(format!(
                        "cannot query IPv6 address {} against an IPv4-only database",
                        v6
                    )));
                }
                self.walk(0, u128::from_be_bytes(v6.octets()), 128)
            }
        }
    }

    fn locate_v4(&self, addr: Ipv4Addr) -> Result<Option<TreeMatch>> {
        let bits = u32::from_be_bytes(addr.octets()) as u128;
        if !self.ipv6 {
            return self.walk(0, bits, 32);
        }
        match self.ipv4_root {
            Ipv4Root::Absent => Ok(None),
            Ipv4Root::Data(data_offset) => Ok(Some(TreeMatch {
                data_offset,
                prefix_len: 0,
            })),
            Ipv4Root::Node(node) => self.walk(node, bits, 32),
        }
    }

    /// Walk `bit_count` bits (MSB first) starting at `start`.
    fn walk(&self, start: u32, bits: u128, bit_count: u32) -> Result<Option<TreeMatch>> {
        if self.node_count == 0 {
            return Ok(None);
        }

        let mut node = start;
        for depth in 0..bit_count {
            let bit = ((bits >> (bit_count - 1 - depth)) & 1) as u8;
            let record = self.read_record(node, bit)?;

            if record == self.node_count {
                return Ok(None);
            } else if record < self.node_count {
                node = record;
            } else {
                return Ok(Some(TreeMatch {
                    data_offset: self.data_offset(record)?,
                    prefix_len: (depth + 1) as u8,
                }));
            }
        }

        Ok(None)
    }

    /// Read one record of a node row. `side` 0 is left, 1 is right.
    fn read_record(&self, node: u32, side: u8) -> Result<u32> {
        if node >= self.node_count {
            return Err(Error::InvalidDataFormat(format!(
                "node index {} exceeds node count {}",
                node, self.node_count
            )));
        }

        let row_len = self.record_size.node_bytes();
        let row_start = node as usize * row_len;
        let row = self
            .tree
            .get(row_start..row_start + row_len)
            .ok_or_else(|| {
                Error::InvalidDataFormat(format!(
                    "node row at {} runs past search tree end {}",
                    row_start,
                    self.tree.len()
                ))
            })?;

        let (left, right) = split_node(row, self.record_size);
        Ok(if side == 0 { left } else { right })
    }

    /// Convert a data record value to a data-section-relative offset.
    ///
    /// Record values above `node_count` address the shared space right after
    /// the tree: subtract the node count and the 16-byte separator.
    fn data_offset(&self, record: u32) -> Result<u32> {
        record
            .checked_sub(self.node_count)
            .and_then(|v| v.checked_sub(16))
            .ok_or_else(|| {
                Error::InvalidDataFormat(format!(
                    "record {} is not a valid data pointer (node count {})",
                    record, self.node_count
                ))
            })
    }
}
