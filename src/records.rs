//! Fixed-size record types shared by the preparation pipeline.
//!
//! Every record that passes through an external sequence is plain data with a
//! fixed byte encoding, so sequences can spill, sort, and merge them without
//! looking inside. Encodings are little-endian throughout.

use anyhow::Result;

/// Sentinel node id marking an unresolved or missing reference.
pub const SPECIAL_NODE_ID: u64 = u64::MAX;

/// Sentinel for a source coordinate that was never attached to an edge.
pub const COORD_UNSET: i32 = i32::MIN;

/// A record with a fixed-size byte encoding, suitable for external sorting.
pub trait Record: Clone + Send {
    /// Exact number of bytes `encode` appends and `decode` consumes.
    const ENCODED_SIZE: usize;

    /// Append exactly `ENCODED_SIZE` bytes to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Decode a record from the first `ENCODED_SIZE` bytes of `buf`.
    fn decode(buf: &[u8]) -> Result<Self>;
}

impl Record for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        anyhow::ensure!(buf.len() >= Self::ENCODED_SIZE, "id record too short");
        Ok(u64::from_le_bytes(buf[0..8].try_into()?))
    }
}

/// A parsed map node. Written verbatim to the graph file when referenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRecord {
    pub node_id: u64,
    /// Latitude in fixed-point micro-degrees.
    pub lat: i32,
    /// Longitude in fixed-point micro-degrees.
    pub lon: i32,
    pub barrier: bool,
    pub traffic_light: bool,
}

impl NodeRecord {
    pub fn new(node_id: u64, lat: i32, lon: i32) -> Self {
        Self {
            node_id,
            lat,
            lon,
            barrier: false,
            traffic_light: false,
        }
    }
}

impl Record for NodeRecord {
    const ENCODED_SIZE: usize = 18; // 8 + 4 + 4 + 1 + 1

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.node_id.to_le_bytes());
        buf.extend_from_slice(&self.lat.to_le_bytes());
        buf.extend_from_slice(&self.lon.to_le_bytes());
        buf.push(self.barrier as u8);
        buf.push(self.traffic_light as u8);
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        anyhow::ensure!(buf.len() >= Self::ENCODED_SIZE, "node record too short");
        Ok(Self {
            node_id: u64::from_le_bytes(buf[0..8].try_into()?),
            lat: i32::from_le_bytes(buf[8..12].try_into()?),
            lon: i32::from_le_bytes(buf[12..16].try_into()?),
            barrier: buf[16] != 0,
            traffic_light: buf[17] != 0,
        })
    }
}

/// How an edge's weight is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightKind {
    /// No descriptor was attached upstream. Fatal if it reaches weight computation.
    #[default]
    Invalid,
    /// Value is a speed in km/h.
    Speed,
    /// Value is the duration of this edge in seconds.
    EdgeDuration,
    /// Value is the per-edge share of a way-level duration, in seconds.
    WayDuration,
}

impl WeightKind {
    fn to_u8(self) -> u8 {
        match self {
            WeightKind::Invalid => 0,
            WeightKind::Speed => 1,
            WeightKind::EdgeDuration => 2,
            WeightKind::WayDuration => 3,
        }
    }

    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => WeightKind::Invalid,
            1 => WeightKind::Speed,
            2 => WeightKind::EdgeDuration,
            3 => WeightKind::WayDuration,
            _ => anyhow::bail!("invalid weight kind: {}", v),
        })
    }
}

/// Weight descriptor collected by the upstream extractor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WeightInput {
    pub kind: WeightKind,
    /// Speed in km/h or duration in seconds, depending on `kind`.
    pub value: f64,
}

impl WeightInput {
    pub fn speed(kmh: f64) -> Self {
        Self {
            kind: WeightKind::Speed,
            value: kmh,
        }
    }

    pub fn edge_duration(seconds: f64) -> Self {
        Self {
            kind: WeightKind::EdgeDuration,
            value: seconds,
        }
    }

    pub fn way_duration(seconds: f64) -> Self {
        Self {
            kind: WeightKind::WayDuration,
            value: seconds,
        }
    }
}

/// The edge payload written to the graph file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphEdge {
    pub source: u64,
    pub target: u64,
    pub name_id: u32,
    /// Travel cost in deciseconds. Zero until the resolver assigns it; edges
    /// still at zero when the writer runs are dropped.
    pub weight: i32,
    pub forward: bool,
    pub backward: bool,
    pub roundabout: bool,
    pub ignore_in_grid: bool,
    pub access_restricted: bool,
    pub travel_mode: u8,
}

pub const GRAPH_EDGE_SIZE: usize = 30; // 8 + 8 + 4 + 4 + 5 + 1

impl GraphEdge {
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.source.to_le_bytes());
        buf.extend_from_slice(&self.target.to_le_bytes());
        buf.extend_from_slice(&self.name_id.to_le_bytes());
        buf.extend_from_slice(&self.weight.to_le_bytes());
        buf.push(self.forward as u8);
        buf.push(self.backward as u8);
        buf.push(self.roundabout as u8);
        buf.push(self.ignore_in_grid as u8);
        buf.push(self.access_restricted as u8);
        buf.push(self.travel_mode);
    }

    pub(crate) fn decode_from(buf: &[u8]) -> Result<Self> {
        anyhow::ensure!(buf.len() >= GRAPH_EDGE_SIZE, "edge record too short");
        Ok(Self {
            source: u64::from_le_bytes(buf[0..8].try_into()?),
            target: u64::from_le_bytes(buf[8..16].try_into()?),
            name_id: u32::from_le_bytes(buf[16..20].try_into()?),
            weight: i32::from_le_bytes(buf[20..24].try_into()?),
            forward: buf[24] != 0,
            backward: buf[25] != 0,
            roundabout: buf[26] != 0,
            ignore_in_grid: buf[27] != 0,
            access_restricted: buf[28] != 0,
            travel_mode: buf[29],
        })
    }
}

/// An edge as it moves through the resolver: the output payload plus the
/// scratch fields the merge-join passes fill in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InternalEdge {
    pub edge: GraphEdge,
    pub weight_input: WeightInput,
    pub source_lat: i32,
    pub source_lon: i32,
}

impl InternalEdge {
    /// A freshly extracted edge: weight zero, source coordinate unset.
    pub fn new(source: u64, target: u64, name_id: u32, weight_input: WeightInput) -> Self {
        Self {
            edge: GraphEdge {
                source,
                target,
                name_id,
                weight: 0,
                forward: true,
                backward: true,
                roundabout: false,
                ignore_in_grid: false,
                access_restricted: false,
                travel_mode: 0,
            },
            weight_input,
            source_lat: COORD_UNSET,
            source_lon: COORD_UNSET,
        }
    }

    pub fn source_coord_set(&self) -> bool {
        self.source_lat != COORD_UNSET && self.source_lon != COORD_UNSET
    }
}

impl Record for InternalEdge {
    const ENCODED_SIZE: usize = GRAPH_EDGE_SIZE + 9 + 8; // payload + weight input + coord

    fn encode(&self, buf: &mut Vec<u8>) {
        self.edge.encode_into(buf);
        buf.push(self.weight_input.kind.to_u8());
        buf.extend_from_slice(&self.weight_input.value.to_le_bytes());
        buf.extend_from_slice(&self.source_lat.to_le_bytes());
        buf.extend_from_slice(&self.source_lon.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        anyhow::ensure!(buf.len() >= Self::ENCODED_SIZE, "edge record too short");
        let edge = GraphEdge::decode_from(buf)?;
        let o = GRAPH_EDGE_SIZE;
        Ok(Self {
            edge,
            weight_input: WeightInput {
                kind: WeightKind::from_u8(buf[o])?,
                value: f64::from_le_bytes(buf[o + 1..o + 9].try_into()?),
            },
            source_lat: i32::from_le_bytes(buf[o + 9..o + 13].try_into()?),
            source_lon: i32::from_le_bytes(buf[o + 13..o + 17].try_into()?),
        })
    }
}

/// First and last segment node ids of a way, keyed by way id. Lets the
/// restriction resolver translate a (way, via-node) pair into the neighbor
/// node adjacent to the via node along that way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WayEndpoints {
    pub way_id: u64,
    pub first_segment_source: u64,
    pub first_segment_target: u64,
    pub last_segment_source: u64,
    pub last_segment_target: u64,
}

impl Record for WayEndpoints {
    const ENCODED_SIZE: usize = 40;

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.way_id.to_le_bytes());
        buf.extend_from_slice(&self.first_segment_source.to_le_bytes());
        buf.extend_from_slice(&self.first_segment_target.to_le_bytes());
        buf.extend_from_slice(&self.last_segment_source.to_le_bytes());
        buf.extend_from_slice(&self.last_segment_target.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        anyhow::ensure!(buf.len() >= Self::ENCODED_SIZE, "way endpoints record too short");
        Ok(Self {
            way_id: u64::from_le_bytes(buf[0..8].try_into()?),
            first_segment_source: u64::from_le_bytes(buf[8..16].try_into()?),
            first_segment_target: u64::from_le_bytes(buf[16..24].try_into()?),
            last_segment_source: u64::from_le_bytes(buf[24..32].try_into()?),
            last_segment_target: u64::from_le_bytes(buf[32..40].try_into()?),
        })
    }
}

/// The turn restriction payload written to the restrictions file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnRestriction {
    pub from_node: u64,
    pub via_node: u64,
    pub to_node: u64,
    pub is_only: bool,
}

pub const TURN_RESTRICTION_SIZE: usize = 25; // 8 + 8 + 8 + 1

impl TurnRestriction {
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.from_node.to_le_bytes());
        buf.extend_from_slice(&self.via_node.to_le_bytes());
        buf.extend_from_slice(&self.to_node.to_le_bytes());
        buf.push(self.is_only as u8);
    }

    pub(crate) fn decode_from(buf: &[u8]) -> Result<Self> {
        anyhow::ensure!(buf.len() >= TURN_RESTRICTION_SIZE, "restriction record too short");
        Ok(Self {
            from_node: u64::from_le_bytes(buf[0..8].try_into()?),
            via_node: u64::from_le_bytes(buf[8..16].try_into()?),
            to_node: u64::from_le_bytes(buf[16..24].try_into()?),
            is_only: buf[24] != 0,
        })
    }

    /// Both neighbor nodes resolved, so the restriction is usable downstream.
    pub fn is_resolved(&self) -> bool {
        self.from_node != SPECIAL_NODE_ID && self.to_node != SPECIAL_NODE_ID
    }
}

/// A restriction together with the way-id scratch fields the resolver joins on.
/// Only the inner [`TurnRestriction`] is ever written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestrictionRecord {
    pub restriction: TurnRestriction,
    pub from_way: u64,
    pub to_way: u64,
}

impl RestrictionRecord {
    /// A freshly extracted restriction: ways and via known, neighbor nodes not.
    pub fn new(from_way: u64, via_node: u64, to_way: u64, is_only: bool) -> Self {
        Self {
            restriction: TurnRestriction {
                from_node: SPECIAL_NODE_ID,
                via_node,
                to_node: SPECIAL_NODE_ID,
                is_only,
            },
            from_way,
            to_way,
        }
    }
}

impl Record for RestrictionRecord {
    const ENCODED_SIZE: usize = TURN_RESTRICTION_SIZE + 16;

    fn encode(&self, buf: &mut Vec<u8>) {
        self.restriction.encode_into(buf);
        buf.extend_from_slice(&self.from_way.to_le_bytes());
        buf.extend_from_slice(&self.to_way.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        anyhow::ensure!(buf.len() >= Self::ENCODED_SIZE, "restriction record too short");
        let restriction = TurnRestriction::decode_from(buf)?;
        let o = TURN_RESTRICTION_SIZE;
        Ok(Self {
            restriction,
            from_way: u64::from_le_bytes(buf[o..o + 8].try_into()?),
            to_way: u64::from_le_bytes(buf[o + 8..o + 16].try_into()?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_sizes() {
        let mut buf = Vec::new();
        NodeRecord::new(1, 2, 3).encode(&mut buf);
        assert_eq!(buf.len(), NodeRecord::ENCODED_SIZE);

        buf.clear();
        InternalEdge::new(1, 2, 0, WeightInput::speed(30.0)).encode(&mut buf);
        assert_eq!(buf.len(), InternalEdge::ENCODED_SIZE);

        buf.clear();
        RestrictionRecord::new(10, 5, 11, false).encode(&mut buf);
        assert_eq!(buf.len(), RestrictionRecord::ENCODED_SIZE);

        buf.clear();
        let endpoints = WayEndpoints {
            way_id: 1,
            first_segment_source: 2,
            first_segment_target: 3,
            last_segment_source: 4,
            last_segment_target: 5,
        };
        endpoints.encode(&mut buf);
        assert_eq!(buf.len(), WayEndpoints::ENCODED_SIZE);
    }

    #[test]
    fn test_edge_codec_keeps_scratch_fields() {
        let mut edge = InternalEdge::new(7, 9, 3, WeightInput::edge_duration(5.0));
        edge.source_lat = 51_500_000;
        edge.source_lon = -100_000;
        edge.edge.forward = false;
        edge.edge.travel_mode = 2;

        let mut buf = Vec::new();
        edge.encode(&mut buf);
        let decoded = InternalEdge::decode(&buf).unwrap();
        assert_eq!(decoded, edge);
    }

    #[test]
    fn test_new_edge_is_unresolved() {
        let edge = InternalEdge::new(1, 2, 0, WeightInput::speed(50.0));
        assert!(!edge.source_coord_set());
        assert_eq!(edge.edge.weight, 0);
    }

    #[test]
    fn test_new_restriction_is_unresolved() {
        let r = RestrictionRecord::new(10, 5, 11, true);
        assert!(!r.restriction.is_resolved());
        assert_eq!(r.restriction.via_node, 5);
        assert!(r.restriction.is_only);
    }

    #[test]
    fn test_weight_kind_rejects_garbage() {
        assert!(WeightKind::from_u8(9).is_err());
    }
}
