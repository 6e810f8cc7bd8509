#![allow(dead_code)]

use dgraph_nd::algs::communicator::Communicator;
use dgraph_nd::dgraph::DistGraph;
use dgraph_nd::dgraph::gather::{Distribution, scatter};
use dgraph_nd::graph::{Gnum, Graph};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Erdos-Renyi graph with loads in `1..=3`.
pub fn random_graph(n: usize, p: f64, seed: u64) -> Graph {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut edges = Vec::new();
    for u in 0..n {
        for v in (u + 1)..n {
            if rng.r#gen::<f64>() < p {
                edges.push((u, v));
            }
        }
    }
    let g = Graph::from_edge_list(n, &edges).unwrap();
    let vload: Vec<Gnum> = (0..n).map(|_| rng.gen_range(1..=3)).collect();
    let mut eload = vec![0; g.arc_count()];
    for v in 0..n {
        for e in g.edge_range(v) {
            let w = g.edges[e] as usize;
            eload[e] = 1 + ((v.min(w) + 3 * v.max(w)) % 4) as Gnum;
        }
    }
    Graph::new(g.vert_index, g.edges, Some(vload), Some(eload)).unwrap()
}

/// Distribute `graph` from rank 0 over `comm` in balanced slices.
pub fn distribute<C: Communicator>(comm: C, graph: &Graph) -> DistGraph<C> {
    let root = (comm.rank() == 0).then_some(graph);
    scatter(comm, 0, root, Distribution::Balanced).unwrap()
}

pub fn assert_permutation(p: &[Gnum]) {
    let mut sorted = p.to_vec();
    sorted.sort_unstable();
    let want: Vec<Gnum> = (0..p.len() as Gnum).collect();
    assert_eq!(sorted, want, "not a permutation");
}
