//! Graph file: referenced nodes followed by usable edges.
//!
//! Format (little-endian):
//!
//!   FingerPrint (16 bytes)
//!   node_count:  u32               // back-patched after the node merge
//!   NodeRecord × node_count        // packed, 18 bytes each, ascending by id
//!   edge_count:  u32               // back-patched after the edge scan
//!   GraphEdge × edge_count         // packed, 30 bytes each, target-sorted
//!
//! Both counts are written as placeholders first; the writer streams records
//! while counting, seeks back to overwrite the placeholder, and restores the
//! end position so the next section lands directly behind the previous one.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{Context, Result};
use log::debug;

use super::fingerprint::FingerPrint;
use crate::extsort::SequenceReader;
use crate::records::{GraphEdge, InternalEdge, NodeRecord, Record, GRAPH_EDGE_SIZE};

pub struct GraphFileWriter {
    writer: BufWriter<File>,
}

impl GraphFileWriter {
    /// Create the output file and write the fingerprint.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create {}", path.as_ref().display()))?;
        let mut writer = BufWriter::new(file);
        FingerPrint::default().write_to(&mut writer)?;
        Ok(Self { writer })
    }

    /// Merge-join the deduplicated used-node ids against the id-sorted node
    /// stream and write every match verbatim. Returns the written count, which
    /// is back-patched over the placeholder. Duplicate node records share an
    /// id with an already-written record and are skipped; the first wins.
    pub fn write_nodes(
        &mut self,
        mut used_ids: SequenceReader<u64>,
        mut nodes: SequenceReader<NodeRecord>,
    ) -> Result<u32> {
        let count_position = self.writer.stream_position()?;
        self.writer.write_all(&0u32.to_le_bytes())?;

        let mut count: u32 = 0;
        let mut buf = Vec::with_capacity(NodeRecord::ENCODED_SIZE);
        loop {
            let (Some(&id), Some(&node)) = (used_ids.peek(), nodes.peek()) else {
                break;
            };
            match id.cmp(&node.node_id) {
                Ordering::Less => used_ids.advance()?,
                Ordering::Greater => nodes.advance()?,
                Ordering::Equal => {
                    buf.clear();
                    node.encode(&mut buf);
                    self.writer.write_all(&buf)?;
                    count += 1;
                    used_ids.advance()?;
                    nodes.advance()?;
                }
            }
        }

        self.patch_count(count_position, count)?;
        debug!("wrote {} nodes", count);
        Ok(count)
    }

    /// Stream the resolved edge sequence and write the output payload of every
    /// edge that received a weight. Returns the written count.
    pub fn write_edges(&mut self, mut edges: SequenceReader<InternalEdge>) -> Result<u32> {
        let count_position = self.writer.stream_position()?;
        self.writer.write_all(&0u32.to_le_bytes())?;

        let mut count: u32 = 0;
        let mut buf = Vec::with_capacity(GRAPH_EDGE_SIZE);
        while let Some(edge) = edges.peek() {
            if edge.edge.weight > 0 {
                buf.clear();
                edge.edge.encode_into(&mut buf);
                self.writer.write_all(&buf)?;
                count += 1;
            }
            edges.advance()?;
        }

        self.patch_count(count_position, count)?;
        debug!("wrote {} edges", count);
        Ok(count)
    }

    /// Overwrite the placeholder at `position` and restore the end position.
    fn patch_count(&mut self, position: u64, count: u32) -> Result<()> {
        let end_position = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(position))?;
        self.writer.write_all(&count.to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(end_position))?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Decoded contents of a graph file.
pub struct GraphFile {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<GraphEdge>,
}

/// Read a graph file back, verifying the fingerprint.
pub fn read<P: AsRef<Path>>(path: P) -> Result<GraphFile> {
    let file = File::open(path.as_ref())
        .with_context(|| format!("Failed to open {}", path.as_ref().display()))?;
    let mut reader = BufReader::new(file);
    FingerPrint::read_and_verify(&mut reader)?;

    let node_count = read_u32(&mut reader)?;
    let mut nodes = Vec::with_capacity(node_count as usize);
    let mut buf = vec![0u8; NodeRecord::ENCODED_SIZE];
    for _ in 0..node_count {
        reader.read_exact(&mut buf)?;
        nodes.push(NodeRecord::decode(&buf)?);
    }

    let edge_count = read_u32(&mut reader)?;
    let mut edges = Vec::with_capacity(edge_count as usize);
    let mut buf = vec![0u8; GRAPH_EDGE_SIZE];
    for _ in 0..edge_count {
        reader.read_exact(&mut buf)?;
        edges.push(GraphEdge::decode_from(&buf)?);
    }

    Ok(GraphFile { nodes, edges })
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extsort::Sequence;
    use crate::formats::fingerprint::FINGERPRINT_SIZE;
    use crate::records::WeightInput;
    use tempfile::NamedTempFile;

    #[test]
    fn test_write_read_round_trip() {
        let mut used: Sequence<u64> = Sequence::new();
        for id in [1u64, 2, 4] {
            used.push(id).unwrap();
        }
        let mut nodes: Sequence<NodeRecord> = Sequence::new();
        for id in [1u64, 2, 3, 4] {
            nodes.push(NodeRecord::new(id, id as i32 * 1_000, 0)).unwrap();
        }
        let mut edges: Sequence<InternalEdge> = Sequence::new();
        let mut good = InternalEdge::new(1, 2, 0, WeightInput::speed(30.0));
        good.edge.weight = 17;
        edges.push(good).unwrap();
        edges
            .push(InternalEdge::new(2, 99, 0, WeightInput::speed(30.0)))
            .unwrap();

        let tmpfile = NamedTempFile::new().unwrap();
        let mut writer = GraphFileWriter::create(tmpfile.path()).unwrap();
        let node_count = writer
            .write_nodes(used.reader().unwrap(), nodes.reader().unwrap())
            .unwrap();
        let edge_count = writer.write_edges(edges.reader().unwrap()).unwrap();
        writer.finish().unwrap();

        assert_eq!(node_count, 3);
        assert_eq!(edge_count, 1);

        let graph = read(tmpfile.path()).unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.edges.len(), 1);
        // Node 3 exists but is not referenced.
        assert!(graph.nodes.iter().all(|n| n.node_id != 3));
        assert_eq!(graph.edges[0].weight, 17);

        let expected_len = FINGERPRINT_SIZE
            + 4
            + 3 * NodeRecord::ENCODED_SIZE
            + 4
            + GRAPH_EDGE_SIZE;
        assert_eq!(
            std::fs::metadata(tmpfile.path()).unwrap().len(),
            expected_len as u64
        );
    }

    #[test]
    fn test_counts_back_patched_for_empty_sections() {
        let used: Sequence<u64> = Sequence::new();
        let nodes: Sequence<NodeRecord> = Sequence::new();
        let edges: Sequence<InternalEdge> = Sequence::new();

        let tmpfile = NamedTempFile::new().unwrap();
        let mut writer = GraphFileWriter::create(tmpfile.path()).unwrap();
        writer
            .write_nodes(used.reader().unwrap(), nodes.reader().unwrap())
            .unwrap();
        writer.write_edges(edges.reader().unwrap()).unwrap();
        writer.finish().unwrap();

        let graph = read(tmpfile.path()).unwrap();
        assert!(graph.nodes.is_empty());
        assert!(graph.edges.is_empty());
    }

    #[test]
    fn test_duplicate_node_records_first_match_wins() {
        let mut used: Sequence<u64> = Sequence::new();
        used.push(5).unwrap();
        let mut nodes: Sequence<NodeRecord> = Sequence::new();
        nodes.push(NodeRecord::new(5, 111, 222)).unwrap();
        nodes.push(NodeRecord::new(5, 333, 444)).unwrap();
        let edges: Sequence<InternalEdge> = Sequence::new();

        let tmpfile = NamedTempFile::new().unwrap();
        let mut writer = GraphFileWriter::create(tmpfile.path()).unwrap();
        let node_count = writer
            .write_nodes(used.reader().unwrap(), nodes.reader().unwrap())
            .unwrap();
        writer.write_edges(edges.reader().unwrap()).unwrap();
        writer.finish().unwrap();

        assert_eq!(node_count, 1);
        let graph = read(tmpfile.path()).unwrap();
        assert_eq!((graph.nodes[0].lat, graph.nodes[0].lon), (111, 222));
    }
}
