//! Edge resolution: attach source coordinates, then compute traversal weights.
//!
//! Both steps are merge-joins between the edge stream and the node stream
//! (sorted by id). The edge stream is sorted by source for the first pass and
//! by target for the second; the node stream is reused as-is.

use std::cmp::Ordering;
use std::time::Instant;

use anyhow::Result;
use log::{debug, info};

use crate::extsort::Sequence;
use crate::geo::approx_distance;
use crate::records::{InternalEdge, NodeRecord, WeightKind};

/// Resolve coordinates and weights for every edge whose endpoints exist in the
/// node stream. Edges with a dangling endpoint keep weight zero and are
/// dropped by the writer. Requires `nodes` to be sorted by node id.
pub fn resolve_edges(
    edges: &mut Sequence<InternalEdge>,
    nodes: &Sequence<NodeRecord>,
    mem_budget: usize,
) -> Result<()> {
    let start = Instant::now();
    attach_source_coords(edges, nodes, mem_budget)?;
    compute_weights(edges, nodes, mem_budget)?;
    info!(
        "resolved {} edges in {:.2}s",
        edges.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// Sort edges by source id and copy the matching node's coordinate into each
/// edge. The node cursor is held on a match: consecutive edges can share a
/// source node.
fn attach_source_coords(
    edges: &mut Sequence<InternalEdge>,
    nodes: &Sequence<NodeRecord>,
    mem_budget: usize,
) -> Result<()> {
    edges.sort_by(mem_budget, |a, b| a.edge.source.cmp(&b.edge.source))?;

    let mut out = Sequence::new();
    let mut node_cursor = nodes.reader()?;
    let mut edge_cursor = edges.reader()?;

    loop {
        let (Some(&node), Some(&edge)) = (node_cursor.peek(), edge_cursor.peek()) else {
            break;
        };
        match edge.edge.source.cmp(&node.node_id) {
            Ordering::Less => {
                // Source id not present in the node stream.
                out.push(edge)?;
                edge_cursor.advance()?;
            }
            Ordering::Greater => node_cursor.advance()?,
            Ordering::Equal => {
                let mut edge = edge;
                edge.source_lat = node.lat;
                edge.source_lon = node.lon;
                out.push(edge)?;
                edge_cursor.advance()?;
            }
        }
    }
    while let Some(&edge) = edge_cursor.peek() {
        out.push(edge)?;
        edge_cursor.advance()?;
    }

    debug_assert_eq!(out.len(), edges.len());
    *edges = out;
    Ok(())
}

/// Sort edges by target id and assign each matched edge its weight in
/// deciseconds. Edges whose source coordinate was never attached are passed
/// over; they keep weight zero and fall out at write time.
fn compute_weights(
    edges: &mut Sequence<InternalEdge>,
    nodes: &Sequence<NodeRecord>,
    mem_budget: usize,
) -> Result<()> {
    edges.sort_by(mem_budget, |a, b| a.edge.target.cmp(&b.edge.target))?;

    let mut out = Sequence::new();
    let mut node_cursor = nodes.reader()?;
    let mut edge_cursor = edges.reader()?;
    let mut dangling = 0u64;

    loop {
        let (Some(&node), Some(&edge)) = (node_cursor.peek(), edge_cursor.peek()) else {
            break;
        };
        match edge.edge.target.cmp(&node.node_id) {
            Ordering::Less => {
                // TODO: decide whether a dangling target should abort the run
                // instead of silently dropping the edge.
                dangling += 1;
                out.push(edge)?;
                edge_cursor.advance()?;
            }
            Ordering::Greater => node_cursor.advance()?,
            Ordering::Equal => {
                let mut edge = edge;
                if edge.source_coord_set() {
                    edge.edge.weight = edge_weight(&edge, &node)?;
                }
                out.push(edge)?;
                edge_cursor.advance()?;
            }
        }
    }
    while let Some(&edge) = edge_cursor.peek() {
        dangling += 1;
        out.push(edge)?;
        edge_cursor.advance()?;
    }

    if dangling > 0 {
        debug!("{} edges reference a missing target node", dangling);
    }
    debug_assert_eq!(out.len(), edges.len());
    *edges = out;
    Ok(())
}

/// Weight of a matched edge in deciseconds, never below 1.
fn edge_weight(edge: &InternalEdge, target: &NodeRecord) -> Result<i32> {
    let raw = match edge.weight_input.kind {
        WeightKind::EdgeDuration | WeightKind::WayDuration => edge.weight_input.value * 10.0,
        WeightKind::Speed => {
            debug_assert!(edge.weight_input.value > 0.0, "non-positive speed");
            let distance = approx_distance(
                edge.source_lat,
                edge.source_lon,
                target.lat,
                target.lon,
            );
            (distance * 10.0) / (edge.weight_input.value / 3.6)
        }
        WeightKind::Invalid => anyhow::bail!(
            "edge {} -> {} carries no weight descriptor",
            edge.edge.source,
            edge.edge.target
        ),
    };
    Ok(((raw + 0.5).floor() as i32).max(1))
}
