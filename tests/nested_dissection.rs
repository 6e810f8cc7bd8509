mod util;
use util::*;

use dgraph_nd::algs::communicator::ThreadComm;
use dgraph_nd::config::{Context, LevelParams, NdParams, OrderStrategy, SeparatorStrategy};
use dgraph_nd::dgraph::DistGraph;
use dgraph_nd::graph::Gnum;
use dgraph_nd::graph::grid::build_grid_3d;
use dgraph_nd::order::rcm::rcm;
use dgraph_nd::order::{CblkKind, Ordering, SequentialOrderer, order_nd};

fn order_grid(size: usize, dims: [usize; 3], params: &NdParams, ctx: &Context) -> Ordering {
    let out = ThreadComm::run(size, |comm| {
        let g = DistGraph::build_grid_3d(comm, dims).unwrap();
        let local = order_nd(&g, params, ctx).unwrap();
        local.gather(g.comm(), 0).unwrap()
    });
    out.into_iter().next().flatten().unwrap()
}

/// Every arc between two tree nodes' vertex ranges must go through an
/// ancestor: vertices ordered before a separator never touch the other part.
fn assert_separators_split(ord: &Ordering, dims: [usize; 3]) {
    let g = build_grid_3d(dims[0], dims[1], dims[2]).unwrap();
    for (i, node) in ord.tree.iter().enumerate() {
        if node.kind != (CblkKind::Dissection { children: 3 }) {
            continue;
        }
        let kids: Vec<_> = ord.tree.iter().filter(|t| t.parent == Some(i)).collect();
        let part = |slot: u8| kids.iter().find(|k| k.slot == slot).map(|k| k.offset..k.offset + k.count);
        let (Some(a), Some(b)) = (part(0), part(1)) else {
            panic!("node {i} lacks a part");
        };
        for v in 0..g.vertex_count() {
            let pv = ord.perm[v];
            if !a.contains(&pv) {
                continue;
            }
            for &w in g.neighbors(v) {
                assert!(!b.contains(&ord.perm[w as usize]), "arc {v}-{w} skips the separator");
            }
        }
    }
}

#[test]
fn ordering_is_complete_with_separators_last() {
    for size in [2, 3, 4] {
        let dims = [8, 6, 4];
        let ord = order_grid(size, dims, &NdParams::default(), &Context::default());
        assert_permutation(&ord.perm);
        for (v, &p) in ord.perm.iter().enumerate() {
            assert_eq!(ord.inverse[p as usize], v as Gnum);
        }
        ord.check_tree().unwrap();
        let root = &ord.tree[0];
        assert_eq!((root.offset, root.count, root.parent), (0, 192, None));
        assert!(matches!(root.kind, CblkKind::Dissection { .. }));
        for node in &ord.tree {
            if let Some(p) = node.parent {
                let parent = &ord.tree[p];
                if node.slot == 2 {
                    assert_eq!(node.offset + node.count, parent.offset + parent.count);
                }
            }
        }
        assert_separators_split(&ord, dims);
    }
}

#[test]
fn direct_strategy_orders_every_vertex() {
    let params = NdParams {
        separator: SeparatorStrategy::Direct(LevelParams::default()),
        leaf_size: 4,
        ..NdParams::default()
    };
    let ord = order_grid(4, [5, 5, 3], &params, &Context::default());
    assert_permutation(&ord.perm);
    ord.check_tree().unwrap();
    assert_separators_split(&ord, [5, 5, 3]);
}

#[test]
fn deterministic_mode_is_reproducible() {
    let ctx = Context::default();
    let params = NdParams::default();
    let a = order_grid(4, [10, 6, 4], &params, &ctx);
    let b = order_grid(4, [10, 6, 4], &params, &ctx);
    assert_eq!(a, b);
}

#[test]
fn threaded_folds_give_the_same_ordering() {
    let params = NdParams::default();
    let plain = order_grid(4, [8, 8, 3], &params, &Context::default());
    let threaded = order_grid(
        4,
        [8, 8, 3],
        &params,
        &Context {
            fold_threads: true,
            ..Context::default()
        },
    );
    assert_eq!(plain, threaded);
}

#[test]
fn single_process_equals_the_sequential_ordering() {
    for strategy in [OrderStrategy::Rcm, OrderStrategy::Natural] {
        let params = NdParams {
            leaf: strategy,
            ..NdParams::default()
        };
        let ord = order_grid(1, [6, 5, 4], &params, &Context::default());
        let g = build_grid_3d(6, 5, 4).unwrap();
        let want: Vec<Gnum> = strategy.order(&g).into_iter().map(|v| v as Gnum).collect();
        assert_eq!(ord.inverse, want);
        assert_eq!(ord.tree.len(), 1);
    }
    let g = build_grid_3d(6, 5, 4).unwrap();
    assert_eq!(OrderStrategy::Rcm.order(&g), rcm(&g));
}

#[test]
fn weighted_random_graph_on_odd_group() {
    let g0 = random_graph(120, 0.04, 21);
    let out = ThreadComm::run(5, |comm| {
        let g = distribute(comm, &g0);
        let params = NdParams {
            leaf_size: 6,
            ..NdParams::default()
        };
        let ctx = Context {
            deterministic: false,
            ..Context::default()
        };
        order_nd(&g, &params, &ctx).unwrap().gather(g.comm(), 0).unwrap()
    });
    let ord = out[0].clone().unwrap();
    assert_permutation(&ord.perm);
    ord.check_tree().unwrap();
}
