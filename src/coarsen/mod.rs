//! Distributed coarsening: match vertices across process boundaries, then
//! collapse every matched pair into one coarse vertex.
//!
//! ```text
//! fine DistGraph ──match_graph──▶ DistMatching ──build_coarse──▶ Coarsening
//!                  (matching +                    (numbering, links,
//!                   sync_ptop)                     adjacency merge)
//! ```

pub mod build;
pub mod matching;
pub mod sync_ptop;

use log::debug;
use serde::{Deserialize, Serialize};

pub use build::{Coarsening, build_coarse};
pub use matching::{DistMatching, Mate, MatchingState, match_graph};

use crate::algs::communicator::Communicator;
use crate::config::{CoarsenParams, Context};
use crate::dgraph::DistGraph;
use crate::graph::Gnum;
use crate::graph_error::{CommResultExt, DgraphError};

/// A coarse vertex: two fine global vertices, equal for a singleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Multinode {
    pub vert: [Gnum; 2],
}

impl Multinode {
    #[inline]
    pub fn new(first: Gnum, second: Gnum) -> Self {
        Self { vert: [first, second] }
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        self.vert[0] == self.vert[1]
    }
}

/// Upper bound on the number of coarse vertices this process can create:
/// every multinode has its first vertex here.
pub fn coarse_vertex_max<C: Communicator>(graph: &DistGraph<C>) -> usize {
    graph.vertex_count()
}

/// Collective: one coarsening step.
///
/// Returns `None` when the graph is already below `params.min_vertices`, or
/// when the matching would keep more than `params.max_ratio` of the vertices.
pub fn coarsen<C: Communicator>(
    graph: &DistGraph<C>,
    params: &CoarsenParams,
    ctx: &Context,
    level: u64,
) -> Result<Option<Coarsening<C>>, DgraphError> {
    const OP: &str = "coarsen";
    let fine = graph.vertex_count_global();
    if fine < params.min_vertices {
        return Ok(None);
    }
    let matching = match_graph(graph, params, ctx, level)?;
    let coarse = graph
        .comm()
        .allreduce_sum(matching.multinodes.len() as i64)
        .at(OP, 1)?;
    if coarse as f64 > params.max_ratio * fine as f64 {
        debug!("{OP}: level {level}: {fine} -> {coarse} vertices, ratio not met");
        return Ok(None);
    }
    debug!("{OP}: level {level}: {fine} -> {coarse} vertices");
    build_coarse(graph, matching).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;

    #[test]
    fn grid_coarsens_and_conserves_loads() {
        let out = ThreadComm::run(4, |comm| {
            let g = DistGraph::build_grid_3d(comm, [4, 4, 4]).unwrap();
            let params = CoarsenParams {
                max_ratio: 1.0,
                ..CoarsenParams::default()
            };
            let c = coarsen(&g, &params, &Context::default(), 0).unwrap().unwrap();
            c.coarse.check().unwrap();
            let pairs = c.multinodes.iter().filter(|m| !m.is_singleton()).count() as i64;
            let pairs = g.comm().allreduce_sum(pairs).unwrap();
            (
                c.coarse.vertex_count_global(),
                pairs,
                c.coarse.vert_load_global(),
                c.coarse.edge_load_global() + c.collapsed_edge_load,
                g.edge_load_global(),
            )
        });
        for (coarse, pairs, vload, eload, fine_eload) in out {
            assert_eq!(coarse as i64, 64 - pairs);
            assert_eq!(vload, 64);
            assert_eq!(eload, fine_eload);
        }
    }

    #[test]
    fn small_graph_is_not_coarsened() {
        let out = ThreadComm::run(2, |comm| {
            let g = DistGraph::build_grid_3d(comm, [2, 2, 1]).unwrap();
            coarsen(&g, &CoarsenParams::default(), &Context::default(), 0)
                .unwrap()
                .is_none()
        });
        assert_eq!(out, vec![true, true]);
    }

    #[test]
    fn projection_returns_coarse_values_to_members() {
        let out = ThreadComm::run(3, |comm| {
            let g = DistGraph::build_grid_3d(comm, [6, 3, 2]).unwrap();
            let params = CoarsenParams {
                max_ratio: 1.0,
                ..CoarsenParams::default()
            };
            let c = coarsen(&g, &params, &Context::default(), 0).unwrap().unwrap();
            let ids: Vec<Gnum> = (0..c.coarse.vertex_count()).map(|v| c.coarse.global_of(v)).collect();
            let back = c.project(&g, &ids).unwrap();
            back == c.fine_to_coarse[..g.vertex_count()]
        });
        assert!(out.into_iter().all(|ok| ok));
    }
}
