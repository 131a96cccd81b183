//! Street name index: a range table over clamped name lengths, the total
//! length, and the concatenated name bytes.
//!
//! Format (little-endian):
//!
//!   block_count:   u32
//!   sum_lengths:   u32
//!   block_offsets: u32 × block_count      // prefix-sum anchors
//!   diff_blocks:   [u8; 16] × block_count // per-entry length deltas
//!   total_length:  u32                    // == sum_lengths
//!   name bytes, concatenated              // total_length bytes, no separators
//!
//! The table layout is dictated by the downstream reader: entries are grouped
//! 17 per block, one absolute `u32` anchor for the block's first entry plus 16
//! `u8` deltas. The 17th entry's extent is recovered from the next anchor, so
//! a trailing anchor block is emitted whenever the last block closes exactly.
//! Name lengths are capped at 255 bytes, which is what keeps a delta in a u8.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::ops::Range;
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

const BLOCK_SIZE: usize = 16;

/// Longest name representable in the index; longer names are truncated.
pub const MAX_NAME_LENGTH: usize = 255;

/// Compact index mapping an entry id to a byte range within the name blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeTable {
    block_offsets: Vec<u32>,
    diff_blocks: Vec<[u8; BLOCK_SIZE]>,
    sum_lengths: u32,
}

impl RangeTable {
    /// Build a table from entry lengths. Lengths must already be clamped to
    /// [`MAX_NAME_LENGTH`].
    pub fn new(lengths: &[u32]) -> Self {
        let mut block_offsets = Vec::with_capacity(lengths.len() / (BLOCK_SIZE + 1) + 1);
        let mut diff_blocks = Vec::with_capacity(block_offsets.capacity());
        let mut block = [0u8; BLOCK_SIZE];
        let mut prefix: u32 = 0;

        for (i, &len) in lengths.iter().enumerate() {
            debug_assert!(len as usize <= MAX_NAME_LENGTH);
            let pos = i % (BLOCK_SIZE + 1);
            if pos == 0 {
                block_offsets.push(prefix);
            }
            if pos < BLOCK_SIZE {
                block[pos] = len as u8;
            } else {
                // 17th entry of the block: implicit, ends at the next anchor.
                diff_blocks.push(block);
                block = [0u8; BLOCK_SIZE];
            }
            prefix += len;
        }

        if lengths.len() % (BLOCK_SIZE + 1) == 0 {
            // Last block closed exactly (or table is empty): lookups of its
            // final entry read the following anchor.
            block_offsets.push(prefix);
            diff_blocks.push([0u8; BLOCK_SIZE]);
        } else {
            diff_blocks.push(block);
        }
        debug_assert_eq!(block_offsets.len(), diff_blocks.len());

        Self {
            block_offsets,
            diff_blocks,
            sum_lengths: prefix,
        }
    }

    /// Byte range of entry `index` within the blob. `index` must be within
    /// the table.
    pub fn lookup(&self, index: usize) -> Range<u32> {
        let block_idx = index / (BLOCK_SIZE + 1);
        let pos = index % (BLOCK_SIZE + 1);
        let block = &self.diff_blocks[block_idx];

        let mut begin = self.block_offsets[block_idx];
        for &delta in &block[..pos.min(BLOCK_SIZE)] {
            begin += delta as u32;
        }
        let end = if pos < BLOCK_SIZE {
            begin + block[pos] as u32
        } else {
            self.block_offsets[block_idx + 1]
        };
        begin..end
    }

    pub fn total_length(&self) -> u32 {
        self.sum_lengths
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&(self.diff_blocks.len() as u32).to_le_bytes())?;
        writer.write_all(&self.sum_lengths.to_le_bytes())?;
        for offset in &self.block_offsets {
            writer.write_all(&offset.to_le_bytes())?;
        }
        for block in &self.diff_blocks {
            writer.write_all(block)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let block_count = u32::from_le_bytes(word) as usize;
        reader.read_exact(&mut word)?;
        let sum_lengths = u32::from_le_bytes(word);

        let mut block_offsets = Vec::with_capacity(block_count);
        for _ in 0..block_count {
            reader.read_exact(&mut word)?;
            block_offsets.push(u32::from_le_bytes(word));
        }
        let mut diff_blocks = Vec::with_capacity(block_count);
        let mut block = [0u8; BLOCK_SIZE];
        for _ in 0..block_count {
            reader.read_exact(&mut block)?;
            diff_blocks.push(block);
        }

        Ok(Self {
            block_offsets,
            diff_blocks,
            sum_lengths,
        })
    }
}

/// Write the name index file. Returns the number of indexed names.
pub fn write<P: AsRef<Path>>(path: P, names: &[String]) -> Result<u32> {
    let lengths: Vec<u32> = names
        .iter()
        .map(|name| name.len().min(MAX_NAME_LENGTH) as u32)
        .collect();
    let table = RangeTable::new(&lengths);

    let file = File::create(path.as_ref())
        .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;
    let mut writer = BufWriter::new(file);
    table.write_to(&mut writer)?;

    writer.write_all(&table.total_length().to_le_bytes())?;
    for (name, &len) in names.iter().zip(&lengths) {
        writer.write_all(&name.as_bytes()[..len as usize])?;
    }
    writer.flush()?;

    debug!("indexed {} street names", names.len());
    Ok(names.len() as u32)
}

/// A name index read back from disk.
pub struct NameIndex {
    table: RangeTable,
    blob: Vec<u8>,
}

impl NameIndex {
    /// Bytes of entry `index`. The id must come from the matching graph file.
    pub fn get(&self, index: usize) -> &[u8] {
        let range = self.table.lookup(index);
        &self.blob[range.start as usize..range.end as usize]
    }
}

/// Read a name index file.
pub fn read<P: AsRef<Path>>(path: P) -> Result<NameIndex> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open {}", path.as_ref().display()))?;
    let mut reader = BufReader::new(file);
    let table = RangeTable::read_from(&mut reader)?;

    let mut word = [0u8; 4];
    reader.read_exact(&mut word)?;
    let total_length = u32::from_le_bytes(word);
    anyhow::ensure!(
        total_length == table.total_length(),
        "name blob length {} does not match range table total {}",
        total_length,
        table.total_length()
    );

    let mut blob = vec![0u8; total_length as usize];
    reader.read_exact(&mut blob)?;
    Ok(NameIndex { table, blob })
}
