//! Shared test support: an in-memory database writer.
//!
//! Builds complete database images (search tree, separator, data section,
//! metadata) so tests can exercise lookups without fixture files on disk.
//! Networks must be inserted shortest prefix first; a later, more specific
//! network splits the covering record it lands inside.

#![allow(dead_code)]

use prefixdb::DataValue;
use std::collections::HashMap;
use std::net::IpAddr;

pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Write a control byte (plus extended-type and size-escape bytes) for a
/// value of `type_id` with the given size.
pub fn write_ctrl(type_id: u8, size: usize, out: &mut Vec<u8>) {
    let type_bits = if type_id <= 7 { type_id << 5 } else { 0 };

    if size < 29 {
        out.push(type_bits | size as u8);
    } else if size < 29 + 256 {
        out.push(type_bits | 29);
    } else if size < 29 + 256 + 65536 {
        out.push(type_bits | 30);
    } else {
        out.push(type_bits | 31);
    }

    if type_id > 7 {
        out.push(type_id - 7);
    }

    if size < 29 {
        // size carried in the control byte
    } else if size < 29 + 256 {
        out.push((size - 29) as u8);
    } else if size < 29 + 256 + 65536 {
        out.extend_from_slice(&((size - 29 - 256) as u16).to_be_bytes());
    } else {
        let v = size - 29 - 256 - 65536;
        out.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8]);
    }
}

fn minimal_be(value: u128) -> Vec<u8> {
    let bytes = value.to_be_bytes();
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// Encode one value in the data section wire format.
pub fn encode_value(value: &DataValue, out: &mut Vec<u8>) {
    match value {
        DataValue::String(s) => {
            write_ctrl(2, s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
        DataValue::Double(d) => {
            write_ctrl(3, 8, out);
            out.extend_from_slice(&d.to_be_bytes());
        }
        DataValue::Bytes(b) => {
            write_ctrl(4, b.len(), out);
            out.extend_from_slice(b);
        }
        DataValue::Uint16(n) => {
            let bytes = minimal_be(*n as u128);
            write_ctrl(5, bytes.len(), out);
            out.extend_from_slice(&bytes);
        }
        DataValue::Uint32(n) => {
            let bytes = minimal_be(*n as u128);
            write_ctrl(6, bytes.len(), out);
            out.extend_from_slice(&bytes);
        }
        DataValue::Map(entries) => {
            write_ctrl(7, entries.len(), out);
            for (key, val) in entries {
                write_ctrl(2, key.len(), out);
                out.extend_from_slice(key.as_bytes());
                encode_value(val, out);
            }
        }
        DataValue::Int32(n) => {
            // Full width keeps negative values unambiguous.
            write_ctrl(8, 4, out);
            out.extend_from_slice(&n.to_be_bytes());
        }
        DataValue::Uint64(n) => {
            let bytes = minimal_be(*n as u128);
            write_ctrl(9, bytes.len(), out);
            out.extend_from_slice(&bytes);
        }
        DataValue::Uint128(n) => {
            let bytes = minimal_be(*n);
            write_ctrl(10, bytes.len(), out);
            out.extend_from_slice(&bytes);
        }
        DataValue::Array(items) => {
            write_ctrl(11, items.len(), out);
            for item in items {
                encode_value(item, out);
            }
        }
        DataValue::Bool(b) => {
            write_ctrl(14, if *b { 1 } else { 0 }, out);
        }
        DataValue::Float(f) => {
            write_ctrl(15, 4, out);
            out.extend_from_slice(&f.to_be_bytes());
        }
    }
}

/// Encode a pointer to a data-section offset, using the smallest size class
/// that can carry it.
pub fn encode_pointer(offset: u32, out: &mut Vec<u8>) {
    if offset < 2048 {
        out.push(0x20 | ((offset >> 8) as u8 & 0x07));
        out.push(offset as u8);
    } else if offset < 526_336 {
        let v = offset - 2048;
        out.push(0x28 | ((v >> 16) as u8 & 0x07));
        out.extend_from_slice(&[(v >> 8) as u8, v as u8]);
    } else if (offset as u64) < 526_336 + (1 << 27) {
        let v = offset - 526_336;
        out.push(0x30 | ((v >> 24) as u8 & 0x07));
        out.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8]);
    } else {
        out.push(0x38);
        out.extend_from_slice(&offset.to_be_bytes());
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Record {
    Empty,
    Node(u32),
    Data(u32),
}

/// Builds complete database images in memory.
pub struct DatabaseWriter {
    ip_version: u8,
    record_size: u8,
    database_type: String,
    networks: Vec<(u128, u8, u32)>,
    data: Vec<u8>,
    dedup: HashMap<Vec<u8>, u32>,
}

impl DatabaseWriter {
    pub fn new(ip_version: u8) -> Self {
        assert!(ip_version == 4 || ip_version == 6);
        Self {
            ip_version,
            record_size: 24,
            database_type: "Test-DB".to_string(),
            networks: Vec::new(),
            data: Vec::new(),
            dedup: HashMap::new(),
        }
    }

    pub fn record_size(mut self, bits: u8) -> Self {
        assert!(bits == 24 || bits == 28 || bits == 32);
        self.record_size = bits;
        self
    }

    pub fn database_type(mut self, name: &str) -> Self {
        self.database_type = name.to_string();
        self
    }

    /// Insert a network in `addr/prefix` notation, encoding `value` into the
    /// data section. Identical values share one record.
    pub fn insert(&mut self, cidr: &str, value: &DataValue) -> u32 {
        let mut encoded = Vec::new();
        encode_value(value, &mut encoded);
        let offset = match self.dedup.get(&encoded) {
            Some(&off) => off,
            None => {
                let off = self.data.len() as u32;
                self.data.extend_from_slice(&encoded);
                self.dedup.insert(encoded, off);
                off
            }
        };
        self.insert_at_offset(cidr, offset);
        offset
    }

    /// Append raw pre-encoded bytes to the data section, returning their
    /// offset. Lets tests lay out pointers by hand.
    pub fn add_raw(&mut self, bytes: &[u8]) -> u32 {
        let off = self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        off
    }

    /// Point a network at an existing data-section offset.
    pub fn insert_at_offset(&mut self, cidr: &str, offset: u32) {
        let (addr, prefix) = parse_cidr(cidr);
        let (bits, prefix) = match (addr, self.ip_version) {
            (IpAddr::V4(v4), 4) => (u32::from_be_bytes(v4.octets()) as u128, prefix),
            // IPv4 networks sit under ::/96 in an IPv6 tree.
            (IpAddr::V4(v4), _) => (u32::from_be_bytes(v4.octets()) as u128, prefix + 96),
            (IpAddr::V6(v6), 6) => (u128::from_be_bytes(v6.octets()), prefix),
            (IpAddr::V6(_), _) => panic!("IPv6 network in an IPv4 database"),
        };
        self.networks.push((bits, prefix, offset));
    }

    fn total_bits(&self) -> u8 {
        if self.ip_version == 4 {
            32
        } else {
            128
        }
    }

    /// Assemble the full image: tree, separator, data section, metadata.
    pub fn build(&self) -> Vec<u8> {
        let mut nodes: Vec<[Record; 2]> = vec![[Record::Empty, Record::Empty]];
        let total = self.total_bits();

        for &(bits, prefix, offset) in &self.networks {
            assert!(prefix >= 1 && prefix <= total, "prefix out of range");
            let mut node = 0usize;
            for depth in 0..prefix {
                let bit = ((bits >> (total - 1 - depth)) & 1) as usize;
                if depth == prefix - 1 {
                    nodes[node][bit] = Record::Data(offset);
                } else {
                    node = match nodes[node][bit] {
                        Record::Node(n) => n as usize,
                        Record::Empty => {
                            let next = nodes.len();
                            nodes.push([Record::Empty, Record::Empty]);
                            nodes[node][bit] = Record::Node(next as u32);
                            next
                        }
                        // A covering network already terminates here; split
                        // it so both halves inherit its record.
                        Record::Data(d) => {
                            let next = nodes.len();
                            nodes.push([Record::Data(d), Record::Data(d)]);
                            nodes[node][bit] = Record::Node(next as u32);
                            next
                        }
                    };
                }
            }
        }

        let node_count = nodes.len() as u32;
        let resolve = |r: Record| -> u32 {
            match r {
                Record::Empty => node_count,
                Record::Node(n) => n,
                Record::Data(off) => node_count + 16 + off,
            }
        };

        let mut image = Vec::new();
        for row in &nodes {
            let (left, right) = (resolve(row[0]), resolve(row[1]));
            match self.record_size {
                24 => {
                    image.extend_from_slice(&left.to_be_bytes()[1..]);
                    image.extend_from_slice(&right.to_be_bytes()[1..]);
                }
                28 => {
                    image.extend_from_slice(&left.to_be_bytes()[1..]);
                    image.push((((left >> 24) as u8) << 4) | ((right >> 24) as u8 & 0x0F));
                    image.extend_from_slice(&right.to_be_bytes()[1..]);
                }
                _ => {
                    image.extend_from_slice(&left.to_be_bytes());
                    image.extend_from_slice(&right.to_be_bytes());
                }
            }
        }

        image.extend_from_slice(&[0u8; 16]);
        image.extend_from_slice(&self.data);
        image.extend_from_slice(METADATA_MARKER);

        let metadata = DataValue::Map(vec![
            (
                "binary_format_major_version".to_string(),
                DataValue::Uint16(2),
            ),
            (
                "binary_format_minor_version".to_string(),
                DataValue::Uint16(0),
            ),
            ("build_epoch".to_string(), DataValue::Uint64(1_700_000_000)),
            (
                "database_type".to_string(),
                DataValue::String(self.database_type.clone()),
            ),
            (
                "description".to_string(),
                DataValue::Map(vec![(
                    "en".to_string(),
                    DataValue::String("test fixture".to_string()),
                )]),
            ),
            (
                "ip_version".to_string(),
                DataValue::Uint16(self.ip_version as u16),
            ),
            (
                "languages".to_string(),
                DataValue::Array(vec![DataValue::String("en".to_string())]),
            ),
            ("node_count".to_string(), DataValue::Uint32(node_count)),
            (
                "record_size".to_string(),
                DataValue::Uint16(self.record_size as u16),
            ),
        ]);
        encode_value(&metadata, &mut image);

        image
    }
}

fn parse_cidr(cidr: &str) -> (IpAddr, u8) {
    let (addr, prefix) = cidr
        .split_once('/')
        .unwrap_or_else(|| panic!("bad network {:?}", cidr));
    (
        addr.parse().unwrap_or_else(|_| panic!("bad address {:?}", addr)),
        prefix
            .parse()
            .unwrap_or_else(|_| panic!("bad prefix {:?}", prefix)),
    )
}

/// A small map record, the shape real databases carry.
pub fn record(label: &str) -> DataValue {
    DataValue::Map(vec![(
        "label".to_string(),
        DataValue::String(label.to_string()),
    )])
}
