use anyhow::Result;
use serde::Serialize;
use std::io::Write;

use crate::tree::{BipartiteGraph, NetworkTree, TreeStatistics};

/// Machine-readable summary of a tree
#[derive(Debug, Serialize)]
pub struct TreeSnapshot {
    pub subnets: Vec<String>,
    pub trunk_size: usize,
    pub incomplete_trunk: bool,
    pub statistics: TreeStatistics,
    pub bipartite: BipartiteGraph,
}

impl TreeSnapshot {
    pub fn new(tree: &NetworkTree) -> Self {
        Self {
            subnets: tree.subnets().iter().map(|s| s.network.to_string()).collect(),
            trunk_size: tree.trunk_size(),
            incomplete_trunk: tree.has_incomplete_trunk(),
            statistics: tree.statistics(),
            bipartite: tree.to_bipartite(),
        }
    }
}

/// Export the tree summary and bipartite graph as JSON
pub fn export_json<W: Write>(tree: &NetworkTree, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, &TreeSnapshot::new(tree))?;
    Ok(())
}
