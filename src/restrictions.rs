//! Turn restriction resolution.
//!
//! Restrictions arrive referencing ways; the downstream graph builder wants
//! concrete neighbor nodes around the via node. Each side (`from`, `to`) is
//! resolved by one merge-join pass against the per-way endpoint records: the
//! via node sits at one end of the referenced way, and the node adjacent to it
//! along that way is the other node of that end's segment.

use std::cmp::Ordering;
use std::time::Instant;

use anyhow::Result;
use log::{debug, info};

use crate::extsort::Sequence;
use crate::records::{RestrictionRecord, WayEndpoints};

/// Resolve the `from` and `to` neighbor nodes of every restriction that
/// references a known way. Restrictions whose way or via node cannot be
/// matched keep their sentinel node ids and are dropped by the writer.
pub fn resolve_restrictions(
    restrictions: &mut Sequence<RestrictionRecord>,
    way_endpoints: &mut Sequence<WayEndpoints>,
    mem_budget: usize,
) -> Result<()> {
    let start = Instant::now();
    way_endpoints.sort_by(mem_budget, |a, b| a.way_id.cmp(&b.way_id))?;

    resolve_pass(
        restrictions,
        way_endpoints,
        mem_budget,
        |r| r.from_way,
        |r, node| r.restriction.from_node = node,
    )?;
    resolve_pass(
        restrictions,
        way_endpoints,
        mem_budget,
        |r| r.to_way,
        |r, node| r.restriction.to_node = node,
    )?;

    info!(
        "resolved {} restrictions against {} ways in {:.2}s",
        restrictions.len(),
        way_endpoints.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

/// One side of the resolution: sort restrictions by the referenced way id and
/// walk both sorted streams. On a way match the via node picks the segment:
/// via at the way's first source resolves to the first target, via at the
/// way's last target resolves to the last source. The endpoint cursor is held
/// on a match so consecutive restrictions sharing a way all see it.
fn resolve_pass(
    restrictions: &mut Sequence<RestrictionRecord>,
    way_endpoints: &Sequence<WayEndpoints>,
    mem_budget: usize,
    way_of: fn(&RestrictionRecord) -> u64,
    set_node: fn(&mut RestrictionRecord, u64),
) -> Result<()> {
    restrictions.sort_by(mem_budget, move |a, b| way_of(a).cmp(&way_of(b)))?;

    let mut resolved = Sequence::new();
    let mut endpoints = way_endpoints.reader()?;
    let mut pending = restrictions.reader()?;
    let mut matched = 0u64;

    loop {
        let (Some(&way), Some(&record)) = (endpoints.peek(), pending.peek()) else {
            break;
        };
        match way.way_id.cmp(&way_of(&record)) {
            Ordering::Less => endpoints.advance()?,
            Ordering::Greater => {
                // No endpoint record for this way; carried through unresolved.
                resolved.push(record)?;
                pending.advance()?;
            }
            Ordering::Equal => {
                let mut record = record;
                let via = record.restriction.via_node;
                if via == way.first_segment_source {
                    set_node(&mut record, way.first_segment_target);
                    matched += 1;
                } else if via == way.last_segment_target {
                    set_node(&mut record, way.last_segment_source);
                    matched += 1;
                }
                resolved.push(record)?;
                pending.advance()?;
            }
        }
    }
    while let Some(&record) = pending.peek() {
        resolved.push(record)?;
        pending.advance()?;
    }

    debug_assert_eq!(resolved.len(), restrictions.len());
    debug!("resolved {} of {} restriction sides", matched, resolved.len());
    *restrictions = resolved;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::SPECIAL_NODE_ID;

    fn endpoints(way_id: u64, fs: u64, ft: u64, ls: u64, lt: u64) -> WayEndpoints {
        WayEndpoints {
            way_id,
            first_segment_source: fs,
            first_segment_target: ft,
            last_segment_source: ls,
            last_segment_target: lt,
        }
    }

    fn collect(restrictions: &Sequence<RestrictionRecord>) -> Vec<RestrictionRecord> {
        let mut reader = restrictions.reader().unwrap();
        let mut out = Vec::new();
        while let Some(&r) = reader.peek() {
            out.push(r);
            reader.advance().unwrap();
        }
        out
    }

    #[test]
    fn test_via_on_first_segment_resolves_to_first_target() {
        let mut ways = Sequence::new();
        ways.push(endpoints(10, 100, 101, 102, 103)).unwrap();
        let mut restrictions = Sequence::new();
        restrictions.push(RestrictionRecord::new(10, 100, 11, false)).unwrap();

        resolve_restrictions(&mut restrictions, &mut ways, 1024).unwrap();

        let resolved = collect(&restrictions);
        assert_eq!(resolved[0].restriction.from_node, 101);
    }

    #[test]
    fn test_via_on_last_segment_resolves_to_last_source() {
        let mut ways = Sequence::new();
        ways.push(endpoints(10, 100, 101, 102, 103)).unwrap();
        let mut restrictions = Sequence::new();
        restrictions.push(RestrictionRecord::new(10, 103, 11, false)).unwrap();

        resolve_restrictions(&mut restrictions, &mut ways, 1024).unwrap();

        let resolved = collect(&restrictions);
        assert_eq!(resolved[0].restriction.from_node, 102);
    }

    #[test]
    fn test_via_matching_neither_end_stays_unresolved() {
        let mut ways = Sequence::new();
        ways.push(endpoints(10, 100, 101, 102, 103)).unwrap();
        let mut restrictions = Sequence::new();
        // Via node 555 is interior to way 10, not an endpoint.
        restrictions.push(RestrictionRecord::new(10, 555, 11, false)).unwrap();

        resolve_restrictions(&mut restrictions, &mut ways, 1024).unwrap();

        let resolved = collect(&restrictions);
        assert_eq!(resolved[0].restriction.from_node, SPECIAL_NODE_ID);
    }

    #[test]
    fn test_unknown_way_stays_unresolved() {
        let mut ways = Sequence::new();
        ways.push(endpoints(10, 100, 101, 102, 103)).unwrap();
        let mut restrictions = Sequence::new();
        restrictions.push(RestrictionRecord::new(99, 100, 11, false)).unwrap();

        resolve_restrictions(&mut restrictions, &mut ways, 1024).unwrap();

        let resolved = collect(&restrictions);
        assert_eq!(resolved[0].restriction.from_node, SPECIAL_NODE_ID);
        assert_eq!(resolved[0].restriction.to_node, SPECIAL_NODE_ID);
    }

    #[test]
    fn test_consecutive_restrictions_share_one_way() {
        let mut ways = Sequence::new();
        ways.push(endpoints(10, 100, 101, 102, 103)).unwrap();
        let mut restrictions = Sequence::new();
        restrictions.push(RestrictionRecord::new(10, 100, 11, false)).unwrap();
        restrictions.push(RestrictionRecord::new(10, 103, 12, true)).unwrap();
        restrictions.push(RestrictionRecord::new(10, 100, 13, false)).unwrap();

        resolve_restrictions(&mut restrictions, &mut ways, 1024).unwrap();

        let from_nodes: Vec<u64> = collect(&restrictions)
            .iter()
            .map(|r| r.restriction.from_node)
            .collect();
        assert!(from_nodes.contains(&101));
        assert!(from_nodes.contains(&102));
        assert_eq!(from_nodes.iter().filter(|&&n| n == 101).count(), 2);
    }

    #[test]
    fn test_both_sides_resolve_independently() {
        let mut ways = Sequence::new();
        ways.push(endpoints(10, 100, 101, 102, 103)).unwrap();
        ways.push(endpoints(11, 103, 104, 105, 106)).unwrap();
        let mut restrictions = Sequence::new();
        // from way 10 via 103 -> 102; to way 11 via 103 -> 104.
        restrictions.push(RestrictionRecord::new(10, 103, 11, false)).unwrap();

        resolve_restrictions(&mut restrictions, &mut ways, 1024).unwrap();

        let resolved = collect(&restrictions);
        assert_eq!(resolved[0].restriction.from_node, 102);
        assert_eq!(resolved[0].restriction.to_node, 104);
        assert!(resolved[0].restriction.is_resolved());
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let mut ways = Sequence::new();
        ways.push(endpoints(10, 100, 101, 102, 103)).unwrap();
        ways.push(endpoints(11, 103, 104, 105, 106)).unwrap();
        let mut restrictions = Sequence::new();
        restrictions.push(RestrictionRecord::new(10, 100, 11, false)).unwrap();
        restrictions.push(RestrictionRecord::new(11, 106, 10, true)).unwrap();
        restrictions.push(RestrictionRecord::new(77, 1, 78, false)).unwrap();

        resolve_restrictions(&mut restrictions, &mut ways, 1024).unwrap();
        let mut first: Vec<_> = collect(&restrictions);
        first.sort_by_key(|r| (r.from_way, r.to_way));

        resolve_restrictions(&mut restrictions, &mut ways, 1024).unwrap();
        let mut second: Vec<_> = collect(&restrictions);
        second.sort_by_key(|r| (r.from_way, r.to_way));

        assert_eq!(first, second);
    }
}
