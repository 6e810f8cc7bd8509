//! Parallel nested dissection.
//!
//! A process group separates its graph, orders the separator right away on
//! the group root, then folds each part onto one half of the group and
//! recurses. Separators take the highest numbers of their node range, the
//! larger part goes to the lower half of the group with the lower offset.
//! Groups of one process, and halves that fold onto one process, finish with
//! a sequential ordering.

use log::debug;

use super::{CblkId, CblkKind, DistOrder, NodePlace, SequentialOrderer};
use crate::algs::communicator::Communicator;
use crate::algs::wire::{decode_gnums, encode_gnums};
use crate::config::{Context, NdParams};
use crate::dgraph::DistGraph;
use crate::dgraph::fold::{FoldedGraph, fold_dup, fold_halves};
use crate::graph::gn;
use crate::graph_error::{CommResultExt, DgraphError, WireResultExt};
use crate::separate::{SEPARATOR, VdGraph, separate};

const OP: &str = "order_nd";

/// Collective: nested-dissection ordering of `graph`. Every process returns
/// its share; [`DistOrder::gather`] on the same communicator assembles it.
pub fn order_nd<C: Communicator>(
    graph: &DistGraph<C>,
    params: &NdParams,
    ctx: &Context,
) -> Result<DistOrder, DgraphError> {
    let n = graph.vertex_count_global();
    let mut order = DistOrder::new(graph.rank(), n);
    nd_node(graph, NodePlace::root(n), params, ctx, &mut order, 0)?;
    debug!(
        "{OP}: rank {}: {} nodes, {} leaves",
        graph.rank(),
        order.nodes().len(),
        order.leaves().len()
    );
    Ok(order)
}

/// Collective: id allocated by the group root, known to the whole group.
fn group_id<C: Communicator>(comm: &C, order: &mut DistOrder) -> Result<CblkId, DgraphError> {
    let mine = if comm.rank() == 0 {
        let id = order.new_id();
        encode_gnums(&[gn(id.proc), gn(id.index)])
    } else {
        Vec::new()
    };
    let got = decode_gnums(&comm.broadcast(0, &mine).at(OP, 1)?).decoded(OP)?;
    match got[..] {
        [p, i] if p >= 0 && i >= 0 => Ok(CblkId {
            proc: p as usize,
            index: i as usize,
        }),
        _ => Err(DgraphError::internal(OP, 2)),
    }
}

/// Collective: gather to the group root and order sequentially there.
fn gathered_leaf<C: Communicator>(
    graph: &DistGraph<C>,
    place: NodePlace,
    strategy: &impl SequentialOrderer,
    order: &mut DistOrder,
) -> Result<(), DgraphError> {
    if let Some(whole) = graph.gather(0)? {
        order.order_sequential(&whole, place, strategy)?;
    }
    Ok(())
}

fn nd_node<C: Communicator>(
    graph: &DistGraph<C>,
    place: NodePlace,
    params: &NdParams,
    ctx: &Context,
    order: &mut DistOrder,
    depth: u64,
) -> Result<(), DgraphError> {
    let n = graph.vertex_count_global();
    if n != place.count {
        return Err(DgraphError::internal(OP, 3));
    }
    if graph.size() == 1 || n <= params.leaf_size {
        return gathered_leaf(graph, place, &params.leaf, order);
    }

    let mut vd = VdGraph::new(graph)?;
    separate(&mut vd, &params.separator, ctx, depth << 8)?;
    if vd.is_leaf() {
        debug!("{OP}: depth {depth}: no separator for {n} vertices");
        return gathered_leaf(graph, place, &params.leaf, order);
    }
    let [size0, size1, sep] = vd.comp_glb_size;
    if size0 + size1 + sep != n {
        return Err(DgraphError::internal(OP, 4));
    }

    let id = group_id(graph.comm(), order)?;
    if graph.rank() == 0 {
        let children = if sep > 0 { 3 } else { 2 };
        order.push_node(id, place, CblkKind::Dissection { children });
    }
    debug!(
        "{OP}: depth {depth}: {} processes, parts {size0}/{size1}, separator {sep}",
        graph.size()
    );

    if sep > 0 {
        let sep_graph = graph.induce_list(&vd.frontier)?;
        let sep_place = NodePlace {
            parent: Some(id),
            slot: SEPARATOR,
            offset: place.offset + n - sep,
            count: sep,
        };
        gathered_leaf(&sep_graph, sep_place, &params.separator_order, order)?;
    }

    let (big, small) = if size0 >= size1 { (0u8, 1u8) } else { (1, 0) };
    let big_size = vd.comp_glb_size[usize::from(big)];
    let lower = graph.induce_part(vd.local_parts(), big)?;
    let upper = graph.induce_part(vd.local_parts(), small)?;
    drop(vd);

    let child = if fold_halves(graph.size())[0].contains(&graph.rank()) {
        NodePlace {
            parent: Some(id),
            slot: 0,
            offset: place.offset,
            count: big_size,
        }
    } else {
        NodePlace {
            parent: Some(id),
            slot: 1,
            offset: place.offset + big_size,
            count: n - big_size - sep,
        }
    };
    let folded = fold_dup(&lower, &upper, ctx)?;
    drop(lower);
    drop(upper);
    match folded {
        FoldedGraph::Centralized(g) => {
            order.order_sequential(&g, child, &params.leaf)?;
        }
        FoldedGraph::Distributed(g) => nd_node(&g, child, params, ctx, order, depth + 1)?,
    }
    Ok(())
}
