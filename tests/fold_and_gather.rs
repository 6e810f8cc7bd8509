mod util;
use util::*;

use dgraph_nd::algs::communicator::ThreadComm;
use dgraph_nd::config::Context;
use dgraph_nd::dgraph::DistGraph;
use dgraph_nd::dgraph::fold::{FoldedGraph, fold_dup, fold_halves};
use dgraph_nd::graph::Gnum;

fn labels_of(f: &FoldedGraph<ThreadComm>) -> Vec<Gnum> {
    match f {
        FoldedGraph::Centralized(g) => (0..g.vertex_count()).map(|v| g.label(v)).collect(),
        FoldedGraph::Distributed(g) => (0..g.vertex_count()).map(|v| g.label(v)).collect(),
    }
}

#[test]
fn folded_halves_partition_the_vertex_set() {
    for size in [2, 3, 5] {
        let out = ThreadComm::run(size, |comm| {
            let g = DistGraph::build_grid_3d(comm, [6, 3, 2]).unwrap();
            let n = g.vertex_count();
            let even: Vec<usize> = (0..n).filter(|&v| g.global_of(v) % 2 == 0).collect();
            let odd: Vec<usize> = (0..n).filter(|&v| g.global_of(v) % 2 == 1).collect();
            let lower = g.induce_list(&even).unwrap();
            let upper = g.induce_list(&odd).unwrap();
            let folded = fold_dup(&lower, &upper, &Context::default()).unwrap();
            if let FoldedGraph::Distributed(d) = &folded {
                d.check().unwrap();
            }
            let half = usize::from(!fold_halves(size)[0].contains(&g.rank()));
            (half, folded.vertex_count_global(), labels_of(&folded))
        });
        let mut lower: Vec<Gnum> = out.iter().filter(|o| o.0 == 0).flat_map(|o| o.2.clone()).collect();
        let mut upper: Vec<Gnum> = out.iter().filter(|o| o.0 == 1).flat_map(|o| o.2.clone()).collect();
        lower.sort_unstable();
        upper.sort_unstable();
        // a one-process half holds the whole centralized graph
        if fold_halves(size)[1].len() == 1 {
            assert_eq!(upper.len(), 18);
        }
        lower.dedup();
        upper.dedup();
        assert!(lower.iter().all(|l| l % 2 == 0) && lower.len() == 18, "size {size}");
        assert!(upper.iter().all(|l| l % 2 == 1) && upper.len() == 18, "size {size}");
        assert!(out.iter().all(|o| o.1 == 18));
    }
}

#[test]
fn threaded_fold_matches_sequential_fold() {
    let g0 = random_graph(40, 0.1, 11);
    let fold = |threads: bool| {
        ThreadComm::run(4, |comm| {
            let g = distribute(comm, &g0);
            let ctx = Context {
                fold_threads: threads,
                ..Context::default()
            };
            match fold_dup(&g, &g, &ctx).unwrap() {
                FoldedGraph::Distributed(d) => d.to_local_csr(),
                FoldedGraph::Centralized(_) => unreachable!(),
            }
        })
    };
    assert_eq!(fold(false), fold(true));
}

#[test]
fn gather_rebuilds_the_scattered_graph() {
    let g0 = random_graph(30, 0.15, 5);
    let out = ThreadComm::run(3, |comm| {
        let g = distribute(comm, &g0);
        g.check().unwrap();
        let root = g.gather(1).unwrap();
        let all = g.gather_all().unwrap();
        (root, all)
    });
    assert!(out[0].0.is_none() && out[2].0.is_none());
    let back = out[1].0.clone().unwrap();
    assert_eq!(back.edges, g0.edges);
    assert_eq!(back.vert_load, g0.vert_load);
    assert_eq!(back.edge_load, g0.edge_load);
    assert!(out.iter().all(|o| o.1.vert_index == g0.vert_index));
}

#[test]
fn halo_sync_fills_ghosts_with_owner_values() {
    let out = ThreadComm::run(4, |comm| {
        let g = DistGraph::build_grid_3d(comm, [4, 4, 2]).unwrap();
        let n = g.vertex_count();
        let mut vals = vec![-1 as Gnum; n + g.ghost().ghost_count()];
        for v in 0..n {
            vals[v] = 10 * g.global_of(v);
        }
        g.halo_sync(&mut vals).unwrap();
        (n..vals.len()).all(|i| vals[i] == 10 * g.global_of_gst(i))
    });
    assert!(out.into_iter().all(|ok| ok));
}
