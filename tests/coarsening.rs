mod util;
use util::*;

use dgraph_nd::algs::communicator::{Communicator, ThreadComm};
use dgraph_nd::coarsen::{MatchingState, build_coarse, coarsen, match_graph};
use dgraph_nd::config::{CoarsenParams, Context};
use dgraph_nd::dgraph::DistGraph;
use dgraph_nd::graph::Gnum;

fn accept_all() -> CoarsenParams {
    CoarsenParams {
        max_ratio: 1.0,
        ..CoarsenParams::default()
    }
}

#[test]
fn grid_4x4x4_on_four_processes() {
    let out = ThreadComm::run(4, |comm| {
        let g = DistGraph::build_grid_3d(comm, [4, 4, 4]).unwrap();
        let c = coarsen(&g, &accept_all(), &Context::default(), 0).unwrap().unwrap();
        c.coarse.check().unwrap();
        let pairs = c.multinodes.iter().filter(|m| !m.is_singleton()).count() as i64;
        let pairs = g.comm().allreduce_sum(pairs).unwrap();
        (c.coarse.vertex_count_global(), pairs)
    });
    for (coarse, pairs) in out {
        assert!(pairs > 0);
        assert_eq!(coarse as i64, 64 - pairs);
    }
}

#[test]
fn loads_are_conserved_on_weighted_graphs() {
    let g0 = random_graph(60, 0.08, 7);
    let total_vload = g0.vert_load_sum;
    let total_eload = g0.edge_load_sum;
    for deterministic in [true, false] {
        let out = ThreadComm::run(3, |comm| {
            let g = distribute(comm, &g0);
            let ctx = Context {
                deterministic,
                ..Context::default()
            };
            let c = coarsen(&g, &accept_all(), &ctx, 0).unwrap().unwrap();
            c.coarse.check().unwrap();
            (
                c.coarse.vert_load_global(),
                c.coarse.edge_load_global() + c.collapsed_edge_load,
            )
        });
        for (vload, eload) in out {
            assert_eq!(vload, total_vload);
            assert_eq!(eload, total_eload);
        }
    }
}

#[test]
fn matching_is_idempotent_when_fully_prematched() {
    let out = ThreadComm::run(3, |comm| {
        let g = DistGraph::build_grid_3d(comm, [5, 4, 2]).unwrap();
        let params = CoarsenParams::default();
        let ctx = Context::default();
        let first = match_graph(&g, &params, &ctx, 0).unwrap();
        let mut again = MatchingState::with_initial(&g, &first.mates).unwrap();
        again.run(&g, &params, &ctx, 1).unwrap();
        let again = again.finish(&g).unwrap();
        let a = build_coarse(&g, first.clone()).unwrap();
        let b = build_coarse(&g, first.clone()).unwrap();
        (
            first.mates == again.mates,
            first.multinodes.len() == again.multinodes.len(),
            a.coarse.to_local_csr() == b.coarse.to_local_csr(),
            a.fine_to_coarse == b.fine_to_coarse,
        )
    });
    assert!(out.iter().all(|&(m, n, csr, map)| m && n && csr && map));
}

#[test]
fn deterministic_runs_repeat() {
    let g0 = random_graph(80, 0.06, 3);
    let run = || {
        ThreadComm::run(4, |comm| {
            let g = distribute(comm, &g0);
            let c = coarsen(&g, &accept_all(), &Context::default(), 0).unwrap().unwrap();
            (c.fine_to_coarse, c.coarse.to_local_csr())
        })
    };
    assert_eq!(run(), run());
}

#[test]
fn repeated_coarsening_shrinks_to_a_handful() {
    let out = ThreadComm::run(4, |comm| {
        let mut g = DistGraph::build_grid_3d(comm, [8, 8, 4]).unwrap();
        let params = CoarsenParams {
            min_vertices: 8,
            ..CoarsenParams::default()
        };
        let mut sizes: Vec<Gnum> = vec![g.vertex_count_global()];
        let mut level = 0;
        while let Some(c) = coarsen(&g, &params, &Context::default(), level).unwrap() {
            c.coarse.check().unwrap();
            assert_eq!(c.coarse.vert_load_global(), 256);
            g = c.coarse;
            sizes.push(g.vertex_count_global());
            level += 1;
        }
        sizes
    });
    let sizes = &out[0];
    assert!(sizes.len() > 2, "{sizes:?}");
    assert!(sizes.windows(2).all(|w| w[1] < w[0]));
    assert!(out.iter().all(|s| s == sizes));
}
