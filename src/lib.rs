//! osm-prep: external-memory preparation of extracted road data.
//!
//! Takes the unsorted streams an upstream map extractor collects (referenced
//! node ids, nodes, edges, turn restrictions, per-way endpoint records) and
//! turns them into the binary artifacts a routing-graph builder consumes:
//!
//! - a graph file: referenced nodes + weighted edges, count-prefixed
//! - a restrictions file: turn restrictions with resolved neighbor nodes
//! - a name index: range table + concatenated street name bytes
//!
//! Every working set is treated as larger than memory: sequences spill to
//! disk, sorts are external merge sorts under a configured budget, and all
//! joins are merge-joins over sorted streams. The orchestration is strictly
//! serial; only the in-memory run sorts use worker threads.

pub mod containers;
pub mod edges;
pub mod extsort;
pub mod formats;
pub mod geo;
pub mod nodes;
pub mod records;
pub mod restrictions;

pub use containers::{NameTable, PrepareConfig, PrepareContainers, PrepareSummary};
pub use records::{
    InternalEdge, NodeRecord, RestrictionRecord, TurnRestriction, WayEndpoints, WeightInput,
    WeightKind, SPECIAL_NODE_ID,
};
