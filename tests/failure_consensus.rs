//! A failure on one process inside a collective step fails it on every
//! process, and nobody is left waiting on a message.

use dgraph_nd::DgraphError;
use dgraph_nd::algs::communicator::{Communicator, ThreadComm};
use dgraph_nd::coarsen::{DistMatching, MatchingState, Multinode, build_coarse};
use dgraph_nd::dgraph::DistGraph;
use dgraph_nd::graph::Gnum;

fn is_remote(e: &DgraphError) -> bool {
    matches!(e, DgraphError::RemoteFailure { .. })
}

#[test]
fn inconsistent_matching_fails_coarse_build_everywhere() {
    // path 0-1 | 2-3; rank 0 pairs 1 with 3, rank 1 keeps 3 for itself
    // without creating its multinode.
    let out = ThreadComm::run(2, |comm| {
        let g = DistGraph::build_grid_3d(comm, [4, 1, 1]).unwrap();
        let m = if g.rank() == 0 {
            DistMatching {
                mates: vec![0, 3],
                multinodes: vec![Multinode::new(0, 0), Multinode::new(1, 3)],
            }
        } else {
            DistMatching {
                mates: vec![2, 3],
                multinodes: vec![Multinode::new(2, 2)],
            }
        };
        build_coarse(&g, m).unwrap_err()
    });
    assert!(is_remote(&out[0]), "{:?}", out[0]);
    assert!(matches!(out[1], DgraphError::Internal { op: "coarsen_build", .. }), "{:?}", out[1]);
}

#[test]
fn one_sided_initial_pair_fails_everywhere() {
    let out = ThreadComm::run(2, |comm| {
        let g = DistGraph::build_grid_3d(comm, [2, 2, 1]).unwrap();
        let init: Vec<Gnum> = (0..g.vertex_count())
            .map(|v| if g.global_of(v) == 0 { 2 } else { g.global_of(v) })
            .collect();
        MatchingState::with_initial(&g, &init).unwrap_err()
    });
    assert!(matches!(out[0], DgraphError::InvalidParameter(_)));
    assert!(is_remote(&out[1]));
}

#[test]
fn fold_without_sub_communicator_fails_everywhere() {
    // receivers 0 and 1; rank 0 forgets its half's communicator
    let out = ThreadComm::run(4, |comm| {
        let g = DistGraph::build_grid_3d(comm.clone(), [4, 4, 2]).unwrap();
        let sub = comm.split((comm.rank() < 2).then_some(0), comm.rank()).unwrap();
        let sub = if comm.rank() == 0 { None } else { sub };
        g.fold(0, sub).unwrap_err()
    });
    assert!(matches!(out[0], DgraphError::InvalidParameter(_)));
    assert!(out[1..].iter().all(is_remote));
}
