//! Direct and multilevel separation of distributed graphs.

use log::{debug, trace};

use super::{SEPARATOR, level};
use crate::algs::communicator::Communicator;
use crate::coarsen::coarsen;
use crate::config::{CoarsenParams, Context, LevelParams};
use crate::dgraph::DistGraph;
use crate::graph::Gnum;
use crate::graph_error::{CommResultExt, DgraphError, try_vec};

/// Borrowed view of [`crate::config::SeparatorStrategy::Multilevel`].
#[derive(Debug, Clone, Copy)]
pub struct MultilevelParams<'a> {
    pub coarsen: &'a CoarsenParams,
    pub coarse_target: Gnum,
    pub level: &'a LevelParams,
    pub thin_passes: usize,
}

/// Collective: gather the whole graph everywhere and separate it with the
/// level-structure heuristic. Every process computes the same parts and
/// keeps its own slice.
pub fn direct<C: Communicator>(graph: &DistGraph<C>, params: &LevelParams) -> Result<Vec<u8>, DgraphError> {
    let whole = graph.gather_all()?;
    let parts = level::separate(&whole, params);
    let base = graph.base() as usize;
    parts
        .get(base..base + graph.vertex_count())
        .map(<[u8]>::to_vec)
        .ok_or_else(|| DgraphError::internal("separate_direct", 1))
}

/// Collective: coarsen while worthwhile, separate the coarsest graph
/// directly, then project back level by level with thinning.
pub fn multilevel<C: Communicator>(
    graph: &DistGraph<C>,
    params: &MultilevelParams<'_>,
    ctx: &Context,
    depth: u64,
) -> Result<Vec<u8>, DgraphError> {
    if graph.vertex_count_global() <= params.coarse_target {
        return direct(graph, params.level);
    }
    let Some(c) = coarsen(graph, params.coarsen, ctx, depth)? else {
        debug!("separate_multilevel: depth {depth}: coarsening stalled");
        return direct(graph, params.level);
    };
    let coarse_parts = multilevel(&c.coarse, params, ctx, depth + 1)?;
    let n = graph.vertex_count();
    let mut parts = try_vec("projected parts", n + graph.ghost().ghost_count(), 0u8)?;
    parts[..n].copy_from_slice(&c.project(graph, &coarse_parts)?);
    drop(c);
    thin(graph, &mut parts, params.thin_passes)?;
    parts.truncate(n);
    Ok(parts)
}

/// Collective: move separator vertices that touch only one side into it.
///
/// Each sweep moves towards one side only, so that simultaneous moves on
/// different processes never join the two parts. Returns the global number
/// of moved vertices.
pub fn thin<C: Communicator>(graph: &DistGraph<C>, parts: &mut [u8], passes: usize) -> Result<i64, DgraphError> {
    const OP: &str = "separate_thin";
    let comm = graph.comm();
    let n = graph.vertex_count();
    let mut total = 0;
    for _ in 0..passes {
        let mut loads = [0 as Gnum; 2];
        for v in 0..n {
            if let p @ (0 | 1) = parts[v] {
                loads[p as usize] += graph.vload(v);
            }
        }
        let l0 = comm.allreduce_sum(loads[0] as i64).at(OP, 1)?;
        let l1 = comm.allreduce_sum(loads[1] as i64).at(OP, 2)?;
        let order: [u8; 2] = if l0 <= l1 { [0, 1] } else { [1, 0] };
        let mut moved = 0i64;
        for to in order {
            graph.halo_sync(parts)?;
            let other = 1 - to;
            for v in 0..n {
                if parts[v] != SEPARATOR {
                    continue;
                }
                if graph.edge_range(v).all(|e| parts[graph.edge_gst(e)] != other) {
                    parts[v] = to;
                    moved += 1;
                }
            }
        }
        let moved = comm.allreduce_sum(moved).at(OP, 3)?;
        trace!("{OP}: rank {}: {moved} vertices left the separator", graph.rank());
        total += moved;
        if moved == 0 {
            break;
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;

    #[test]
    fn thinning_keeps_separation_across_processes() {
        // path 0..7 over two ranks; separator {2, 3, 4}
        let out = ThreadComm::run(2, |comm| {
            let g = DistGraph::build_grid_3d(comm, [8, 1, 1]).unwrap();
            let n = g.vertex_count();
            let mut parts = vec![0u8; n + g.ghost().ghost_count()];
            for v in 0..n {
                parts[v] = match g.global_of(v) {
                    0..=1 => 0,
                    2..=4 => 2,
                    _ => 1,
                };
            }
            let moved = thin(&g, &mut parts, 3).unwrap();
            g.halo_sync(&mut parts).unwrap();
            let crossing = (0..n).any(|v| {
                g.edge_range(v)
                    .any(|e| parts[v] + parts[g.edge_gst(e)] == 1)
            });
            (moved, crossing, parts[..n].to_vec())
        });
        assert!(out.iter().all(|o| !o.1));
        assert_eq!(out[0].0, 2);
        let seps = out.iter().flat_map(|o| o.2.iter()).filter(|&&p| p == SEPARATOR).count();
        assert_eq!(seps, 1);
    }
}
