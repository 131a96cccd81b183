//! Node preparation: dedup the referenced-node ids and order the node stream.

use anyhow::Result;
use log::{debug, info};
use std::time::Instant;

use crate::extsort::Sequence;
use crate::records::NodeRecord;

/// Sort `used_node_ids` ascending and collapse duplicates, then sort
/// `all_nodes` by node id. After this the two streams can be merge-joined by
/// the graph file writer.
pub fn prepare_nodes(
    used_node_ids: &mut Sequence<u64>,
    all_nodes: &mut Sequence<NodeRecord>,
    mem_budget: usize,
) -> Result<()> {
    let start = Instant::now();
    used_node_ids.sort_by(mem_budget, |a, b| a.cmp(b))?;
    let before = used_node_ids.len();
    used_node_ids.dedup()?;
    debug!(
        "deduplicated used node ids: {} -> {}",
        before,
        used_node_ids.len()
    );

    all_nodes.sort_by(mem_budget, |a, b| a.node_id.cmp(&b.node_id))?;
    info!(
        "prepared {} nodes ({} referenced) in {:.2}s",
        all_nodes.len(),
        used_node_ids.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
