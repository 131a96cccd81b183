//! Container layer: collects the extractor's streams and runs the pipeline.
//!
//! The upstream extractor appends nodes, edges, restrictions, way endpoints,
//! and referenced-node ids while it parses the raw map; names are interned
//! into an in-memory table. [`PrepareContainers::prepare_data`] then executes
//! the sort/merge passes and serializes the three output files.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use log::info;

use crate::edges::resolve_edges;
use crate::extsort::Sequence;
use crate::formats::{graph_file::GraphFileWriter, names_file, restrictions_file};
use crate::nodes::prepare_nodes;
use crate::records::{InternalEdge, NodeRecord, RestrictionRecord, WayEndpoints};
use crate::restrictions::resolve_restrictions;

/// Default RAM budget for external sorts: 1 GiB, matching a machine that can
/// comfortably hold one sort run while the OS caches the merge inputs.
pub const DEFAULT_MEM_BUDGET: usize = 1024 * 1024 * 1024;

/// Where the pipeline writes and how much memory its sorts may use.
#[derive(Debug, Clone)]
pub struct PrepareConfig {
    pub graph_path: PathBuf,
    pub restrictions_path: PathBuf,
    pub names_path: PathBuf,
    /// Process-wide budget for external sorts. Only one sort runs at a time,
    /// so the budget is not partitioned.
    pub mem_budget: usize,
}

impl PrepareConfig {
    pub fn new<P: Into<PathBuf>>(graph: P, restrictions: P, names: P) -> Self {
        Self {
            graph_path: graph.into(),
            restrictions_path: restrictions.into(),
            names_path: names.into(),
            mem_budget: DEFAULT_MEM_BUDGET,
        }
    }

    pub fn with_mem_budget(mut self, bytes: usize) -> Self {
        self.mem_budget = bytes;
        self
    }
}

/// Counts of the records that made it into the output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrepareSummary {
    pub node_count: u32,
    pub edge_count: u32,
    pub restriction_count: u32,
    pub name_count: u32,
}

/// Insertion-ordered string table. Index 0 is reserved for the empty string,
/// so an edge without a name resolves to it for free.
pub struct NameTable {
    list: Vec<String>,
    index: HashMap<String, u32>,
}

impl NameTable {
    fn new() -> Self {
        let mut table = Self {
            list: Vec::new(),
            index: HashMap::new(),
        };
        table.intern("");
        table
    }

    /// Index of `name`, interning it on first sight.
    pub fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.list.len() as u32;
        self.list.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    fn as_slice(&self) -> &[String] {
        &self.list
    }
}

/// Owns the five external sequences plus the name table.
pub struct PrepareContainers {
    used_node_ids: Sequence<u64>,
    all_nodes: Sequence<NodeRecord>,
    all_edges: Sequence<InternalEdge>,
    restrictions: Sequence<RestrictionRecord>,
    way_endpoints: Sequence<WayEndpoints>,
    names: NameTable,
}

impl Default for PrepareContainers {
    fn default() -> Self {
        Self::new()
    }
}

impl PrepareContainers {
    pub fn new() -> Self {
        Self {
            used_node_ids: Sequence::new(),
            all_nodes: Sequence::new(),
            all_edges: Sequence::new(),
            restrictions: Sequence::new(),
            way_endpoints: Sequence::new(),
            names: NameTable::new(),
        }
    }

    pub fn append_node(&mut self, node: NodeRecord) -> Result<()> {
        self.all_nodes.push(node)
    }

    /// Record that some way references this node. May be called repeatedly
    /// with the same id; duplicates are collapsed during preparation.
    pub fn append_used_node_id(&mut self, node_id: u64) -> Result<()> {
        self.used_node_ids.push(node_id)
    }

    pub fn append_edge(&mut self, edge: InternalEdge) -> Result<()> {
        self.all_edges.push(edge)
    }

    pub fn append_restriction(&mut self, restriction: RestrictionRecord) -> Result<()> {
        self.restrictions.push(restriction)
    }

    pub fn append_way_endpoints(&mut self, endpoints: WayEndpoints) -> Result<()> {
        self.way_endpoints.push(endpoints)
    }

    /// Intern a street name, returning its stable index.
    pub fn intern_name(&mut self, name: &str) -> u32 {
        self.names.intern(name)
    }

    /// Run the preparation pipeline and write the three output files.
    ///
    /// Consumes the containers: each sequence is sorted and scanned in place
    /// and is of no further use afterwards. On error the partially written
    /// output files are left behind.
    pub fn prepare_data(mut self, config: &PrepareConfig) -> Result<PrepareSummary> {
        let start = Instant::now();
        info!(
            "preparing {} nodes, {} edges, {} restrictions",
            self.all_nodes.len(),
            self.all_edges.len(),
            self.restrictions.len()
        );

        resolve_restrictions(
            &mut self.restrictions,
            &mut self.way_endpoints,
            config.mem_budget,
        )?;
        let restriction_count =
            restrictions_file::write(&config.restrictions_path, self.restrictions.reader()?)
                .context("Failed to write restrictions file")?;

        let mut graph = GraphFileWriter::create(&config.graph_path)?;

        prepare_nodes(
            &mut self.used_node_ids,
            &mut self.all_nodes,
            config.mem_budget,
        )?;
        let node_count =
            graph.write_nodes(self.used_node_ids.reader()?, self.all_nodes.reader()?)?;

        resolve_edges(&mut self.all_edges, &self.all_nodes, config.mem_budget)?;
        let edge_count = graph.write_edges(self.all_edges.reader()?)?;
        graph.finish()?;

        let name_count = names_file::write(&config.names_path, self.names.as_slice())
            .context("Failed to write name index")?;

        info!(
            "preparation finished in {:.2}s: {} nodes, {} edges, {} restrictions usable",
            start.elapsed().as_secs_f64(),
            node_count,
            edge_count,
            restriction_count
        );
        Ok(PrepareSummary {
            node_count,
            edge_count,
            restriction_count,
            name_count,
        })
    }
}
