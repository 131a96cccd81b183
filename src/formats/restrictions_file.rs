//! Restrictions file: fully resolved turn restrictions.
//!
//! Format (little-endian):
//!
//!   FingerPrint (16 bytes)
//!   restriction_count: u32               // back-patched after the scan
//!   TurnRestriction × restriction_count  // packed, 25 bytes each
//!
//! Only restrictions with both neighbor nodes resolved are written; the way-id
//! scratch fields of the in-flight records are not part of the format.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use super::fingerprint::FingerPrint;
use crate::extsort::SequenceReader;
use crate::records::{RestrictionRecord, TurnRestriction, TURN_RESTRICTION_SIZE};

/// Write the restrictions file. Returns the number of usable restrictions.
pub fn write<P: AsRef<Path>>(
    path: P,
    mut restrictions: SequenceReader<RestrictionRecord>,
) -> Result<u32> {
    let file = File::create(path.as_ref())
        .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;
    let mut writer = BufWriter::new(file);
    FingerPrint::default().write_to(&mut writer)?;

    let count_position = writer.stream_position()?;
    writer.write_all(&0u32.to_le_bytes())?;

    let mut count: u32 = 0;
    let mut buf = Vec::with_capacity(TURN_RESTRICTION_SIZE);
    while let Some(record) = restrictions.peek() {
        if record.restriction.is_resolved() {
            buf.clear();
            record.restriction.encode_into(&mut buf);
            writer.write_all(&buf)?;
            count += 1;
        }
        restrictions.advance()?;
    }

    writer.seek(SeekFrom::Start(count_position))?;
    writer.write_all(&count.to_le_bytes())?;
    writer.flush()?;

    debug!("wrote {} usable restrictions", count);
    Ok(count)
}

/// Read all restrictions back, verifying the fingerprint.
pub fn read_all<P: AsRef<Path>>(path: P) -> Result<Vec<TurnRestriction>> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open {}", path.as_ref().display()))?;
    let mut reader = BufReader::new(file);
    FingerPrint::read_and_verify(&mut reader)?;

    let mut count_bytes = [0u8; 4];
    reader.read_exact(&mut count_bytes)?;
    let count = u32::from_le_bytes(count_bytes);

    let mut restrictions = Vec::with_capacity(count as usize);
    let mut buf = vec![0u8; TURN_RESTRICTION_SIZE];
    for _ in 0..count {
        reader.read_exact(&mut buf)?;
        restrictions.push(TurnRestriction::decode_from(&buf)?);
    }
    Ok(restrictions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extsort::Sequence;
    use crate::records::SPECIAL_NODE_ID;
    use tempfile::NamedTempFile;

    #[test]
    fn test_unresolved_restrictions_are_filtered() {
        let mut restrictions: Sequence<RestrictionRecord> = Sequence::new();

        let mut resolved = RestrictionRecord::new(10, 5, 11, true);
        resolved.restriction.from_node = 4;
        resolved.restriction.to_node = 6;
        restrictions.push(resolved).unwrap();

        // from resolved, to not: must be dropped.
        let mut half = RestrictionRecord::new(12, 7, 13, false);
        half.restriction.from_node = 8;
        restrictions.push(half).unwrap();

        restrictions.push(RestrictionRecord::new(14, 9, 15, false)).unwrap();

        let tmpfile = NamedTempFile::new().unwrap();
        let count = write(tmpfile.path(), restrictions.reader().unwrap()).unwrap();
        assert_eq!(count, 1);

        let read_back = read_all(tmpfile.path()).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].from_node, 4);
        assert_eq!(read_back[0].via_node, 5);
        assert_eq!(read_back[0].to_node, 6);
        assert!(read_back[0].is_only);
        assert_ne!(read_back[0].from_node, SPECIAL_NODE_ID);
    }
}
