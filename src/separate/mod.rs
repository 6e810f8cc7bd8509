//! Vertex separation of distributed graphs.
//!
//! A [`VdGraph`] pairs a distributed graph with a part array: 0 and 1 for the
//! two separated parts, 2 for the separator. No arc may join parts 0 and 1.

pub mod level;
pub mod multilevel;

use log::debug;

use crate::algs::communicator::Communicator;
use crate::config::{Context, SeparatorStrategy};
use crate::dgraph::{DistGraph, allgather_gnums};
use crate::graph::{Gnum, Graph, gn};
use crate::graph_error::{DgraphError, try_vec};

/// Separator part.
pub const SEPARATOR: u8 = 2;

/// Distributed graph under separation.
#[derive(Debug)]
pub struct VdGraph<'g, C: Communicator> {
    pub graph: &'g DistGraph<C>,
    /// Part of every local and ghost vertex.
    pub parts: Vec<u8>,
    /// Local separator vertices.
    pub frontier: Vec<usize>,
    pub comp_loc_size: [Gnum; 3],
    pub comp_glb_size: [Gnum; 3],
    pub comp_glb_load: [Gnum; 3],
    /// Load imbalance between parts 0 and 1.
    pub comp_glb_load_dlt: Gnum,
}

impl<'g, C: Communicator> VdGraph<'g, C> {
    /// Collective: every vertex in part 0.
    pub fn new(graph: &'g DistGraph<C>) -> Result<Self, DgraphError> {
        let total = graph.vertex_count() + graph.ghost().ghost_count();
        let n = gn(graph.vertex_count());
        Ok(Self {
            graph,
            parts: try_vec("separation parts", total, 0u8)?,
            frontier: Vec::new(),
            comp_loc_size: [n, 0, 0],
            comp_glb_size: [graph.vertex_count_global(), 0, 0],
            comp_glb_load: [graph.vert_load_global(), 0, 0],
            comp_glb_load_dlt: graph.vert_load_global(),
        })
    }

    /// Collective: install the parts of the local vertices, refresh ghosts,
    /// frontier and statistics.
    pub fn set_parts(&mut self, local: &[u8]) -> Result<(), DgraphError> {
        const OP: &str = "vdgraph_set_parts";
        let g = self.graph;
        let n = g.vertex_count();
        if local.len() != n {
            return Err(DgraphError::InvalidParameter(format!(
                "{} parts for {n} vertices",
                local.len()
            )));
        }
        self.parts[..n].copy_from_slice(local);
        g.halo_sync(&mut self.parts)?;
        self.frontier = (0..n).filter(|&v| self.parts[v] == SEPARATOR).collect();
        let mut stats = [0 as Gnum; 6];
        for v in 0..n {
            let p = usize::from(self.parts[v].min(SEPARATOR));
            stats[p] += 1;
            stats[3 + p] += g.vload(v);
        }
        self.comp_loc_size = [stats[0], stats[1], stats[2]];
        let all = allgather_gnums(g.comm(), OP, 1, &stats)?;
        let mut sums = [0 as Gnum; 6];
        for row in &all {
            if row.len() != 6 {
                return Err(DgraphError::internal(OP, 2));
            }
            for (s, r) in sums.iter_mut().zip(row) {
                *s += r;
            }
        }
        self.comp_glb_size = [sums[0], sums[1], sums[2]];
        self.comp_glb_load = [sums[3], sums[4], sums[5]];
        self.comp_glb_load_dlt = (sums[3] - sums[4]).abs();
        Ok(())
    }

    /// Parts of the local vertices.
    pub fn local_parts(&self) -> &[u8] {
        &self.parts[..self.graph.vertex_count()]
    }

    /// Either non-separator part is empty: nothing to dissect.
    pub fn is_leaf(&self) -> bool {
        self.comp_glb_size[0] == 0 || self.comp_glb_size[1] == 0
    }

    /// No local arc joins parts 0 and 1 (ghost parts must be current).
    pub fn check_local(&self) -> Result<(), DgraphError> {
        let g = self.graph;
        for v in 0..g.vertex_count() {
            let pv = self.parts[v];
            if pv > SEPARATOR {
                return Err(DgraphError::InvalidParameter(format!("vertex {}: part {pv}", g.global_of(v))));
            }
            if pv == SEPARATOR {
                continue;
            }
            for e in g.edge_range(v) {
                let pw = self.parts[g.edge_gst(e)];
                if pw != SEPARATOR && pw != pv {
                    return Err(DgraphError::InvalidParameter(format!(
                        "arc ({}, {}) joins both parts",
                        g.global_of(v),
                        g.edges[e]
                    )));
                }
            }
        }
        Ok(())
    }

    /// Collective: centralized copy of graph, parts and frontier on every process.
    pub fn gather_all(&self) -> Result<VGraph, DgraphError> {
        const OP: &str = "vdgraph_gather_all";
        let graph = self.graph.gather_all()?;
        let comm = self.graph.comm();
        let parts: Vec<u8> = comm
            .allgather(self.local_parts())
            .map_err(|e| DgraphError::comm(OP, 1, e))?
            .concat();
        if parts.len() != graph.vertex_count() {
            return Err(DgraphError::internal(OP, 2));
        }
        let vgraph = VGraph::new(graph, parts);
        if vgraph.comp_size != [self.comp_glb_size[0], self.comp_glb_size[1]] {
            return Err(DgraphError::internal(OP, 3));
        }
        Ok(vgraph)
    }
}

/// Centralized graph under separation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VGraph {
    pub graph: Graph,
    pub parts: Vec<u8>,
    /// Separator vertices in ascending order.
    pub frontier: Vec<usize>,
    pub comp_load: [Gnum; 3],
    pub comp_load_dlt: Gnum,
    pub comp_size: [Gnum; 2],
}

impl VGraph {
    pub fn new(graph: Graph, parts: Vec<u8>) -> Self {
        let mut comp_load = [0 as Gnum; 3];
        let mut comp_size = [0 as Gnum; 2];
        let mut frontier = Vec::new();
        for (v, &p) in parts.iter().enumerate() {
            let p = usize::from(p.min(SEPARATOR));
            comp_load[p] += graph.vload(v);
            if p < 2 {
                comp_size[p] += 1;
            } else {
                frontier.push(v);
            }
        }
        Self {
            graph,
            parts,
            frontier,
            comp_load,
            comp_load_dlt: (comp_load[0] - comp_load[1]).abs(),
            comp_size,
        }
    }
}

/// Collective: separate `vd` with `strategy`; `level` salts random seeds.
pub fn separate<C: Communicator>(
    vd: &mut VdGraph<'_, C>,
    strategy: &SeparatorStrategy,
    ctx: &Context,
    level: u64,
) -> Result<(), DgraphError> {
    let parts = match strategy {
        SeparatorStrategy::Direct(params) => multilevel::direct(vd.graph, params)?,
        SeparatorStrategy::Multilevel {
            coarsen,
            coarse_target,
            level: lp,
            thin_passes,
        } => multilevel::multilevel(
            vd.graph,
            &multilevel::MultilevelParams {
                coarsen,
                coarse_target: *coarse_target,
                level: lp,
                thin_passes: *thin_passes,
            },
            ctx,
            level,
        )?,
    };
    vd.set_parts(&parts)?;
    debug!(
        "separate: rank {}: sizes {:?}, loads {:?}",
        vd.graph.rank(),
        vd.comp_glb_size,
        vd.comp_glb_load
    );
    Ok(())
}
