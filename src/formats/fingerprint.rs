//! Fixed-size format header written at the start of each output file.
//!
//! Layout (little-endian, 16 bytes):
//!
//!   magic:            u32 = 0x52504E47  // "RPNG" (road-prep network graph)
//!   version:          u16 = 1
//!   reserved:         u16 = 0
//!   node_record_size: u32
//!   edge_record_size: u32
//!
//! Carrying the record sizes lets a downstream reader reject files produced by
//! an incompatible build before misparsing a single record.

use std::io::{Read, Write};

use anyhow::Result;

use crate::records::{NodeRecord, Record, GRAPH_EDGE_SIZE};

const MAGIC: u32 = 0x5250_4E47;
const VERSION: u16 = 1;

pub const FINGERPRINT_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FingerPrint {
    magic: u32,
    version: u16,
    node_record_size: u32,
    edge_record_size: u32,
}

impl Default for FingerPrint {
    fn default() -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            node_record_size: NodeRecord::ENCODED_SIZE as u32,
            edge_record_size: GRAPH_EDGE_SIZE as u32,
        }
    }
}

impl FingerPrint {
    pub fn to_bytes(self) -> [u8; FINGERPRINT_SIZE] {
        let mut bytes = [0u8; FINGERPRINT_SIZE];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
        // bytes 6..8 reserved
        bytes[8..12].copy_from_slice(&self.node_record_size.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.edge_record_size.to_le_bytes());
        bytes
    }

    pub fn write_to<W: Write>(self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Read a fingerprint and check it against the current build.
    pub fn read_and_verify<R: Read>(reader: &mut R) -> Result<Self> {
        let mut bytes = [0u8; FINGERPRINT_SIZE];
        reader.read_exact(&mut bytes)?;

        let magic = u32::from_le_bytes(bytes[0..4].try_into()?);
        if magic != MAGIC {
            anyhow::bail!("invalid magic number: {:08x}", magic);
        }
        let version = u16::from_le_bytes(bytes[4..6].try_into()?);
        if version != VERSION {
            anyhow::bail!("unsupported format version: {}", version);
        }

        let fingerprint = Self {
            magic,
            version,
            node_record_size: u32::from_le_bytes(bytes[8..12].try_into()?),
            edge_record_size: u32::from_le_bytes(bytes[12..16].try_into()?),
        };
        if fingerprint != Self::default() {
            anyhow::bail!("fingerprint record sizes do not match this build");
        }
        Ok(fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_round_trip() {
        let bytes = FingerPrint::default().to_bytes();
        assert_eq!(bytes.len(), FINGERPRINT_SIZE);
        let parsed = FingerPrint::read_and_verify(&mut &bytes[..]).unwrap();
        assert_eq!(parsed, FingerPrint::default());
    }

    #[test]
    fn test_rejects_wrong_magic() {
        let mut bytes = FingerPrint::default().to_bytes();
        bytes[0] ^= 0xff;
        assert!(FingerPrint::read_and_verify(&mut &bytes[..]).is_err());
    }

    #[test]
    fn test_rejects_mismatched_record_size() {
        let mut bytes = FingerPrint::default().to_bytes();
        bytes[8] = bytes[8].wrapping_add(1);
        assert!(FingerPrint::read_and_verify(&mut &bytes[..]).is_err());
    }
}
