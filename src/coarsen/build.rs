//! Construction of the coarse distributed graph from a finished matching.

use bytemuck::Pod;
use hashbrown::HashMap;
use log::debug;

use super::Multinode;
use super::matching::DistMatching;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{GnumReader, GnumWriter, WireCoarseLink, decode_records, encode_records};
use crate::debug_invariants::DebugInvariants;
use crate::dgraph::exchange::exchange_with;
use crate::dgraph::{DistGraph, LocalCsr, agree, allgather_gnums};
use crate::graph::{Gnum, gn};
use crate::graph_error::{CommResultExt, DgraphError, WireResultExt, try_vec, try_with_capacity};

const OP: &str = "coarsen_build";
const PROJECT_OP: &str = "coarsen_project";

/// A coarse graph together with the way back to its fine graph.
#[derive(Debug)]
pub struct Coarsening<C: Communicator> {
    pub coarse: DistGraph<C>,
    /// Fine vertices of every local coarse vertex, in local coarse order.
    pub multinodes: Vec<Multinode>,
    /// Coarse global number of every fine local and ghost vertex.
    pub fine_to_coarse: Vec<Gnum>,
    /// Global mate of every fine local vertex.
    pub fine_mates: Vec<Gnum>,
    /// Global load of the fine arcs that became internal to a multinode.
    pub collapsed_edge_load: Gnum,
}

/// Adjacency of a non-creating vertex as seen by its creator:
/// `[coarse, vload, degree, (coarse end, load)*]` per record.
struct Shipped {
    vload: Gnum,
    arcs: Vec<(Gnum, Gnum)>,
}

fn neighbour_slot<C: Communicator>(fine: &DistGraph<C>, g: Gnum) -> Result<usize, DgraphError> {
    fine.ghost()
        .neighbor_index(fine.owner_of(g))
        .ok_or_else(|| DgraphError::internal(OP, 1))
}

/// Coarse adjacency of the local multinodes, merging the shipped halves,
/// with the load of the arcs that became internal.
fn merge_multinodes<C: Communicator>(
    fine: &DistGraph<C>,
    multinodes: &[Multinode],
    coarse_of: &[Gnum],
    base: Gnum,
    got: &[Vec<u8>],
) -> Result<(LocalCsr, Gnum), DgraphError> {
    let k = multinodes.len();
    let mut shipped: Vec<Option<Shipped>> = (0..k).map(|_| None).collect();
    for bytes in got {
        let mut r = GnumReader::new(bytes);
        while !r.is_empty() {
            let c = r.next_gnum().decoded(OP)?;
            let vload = r.next_gnum().decoded(OP)?;
            let deg = r.next_len().decoded(OP)?;
            let mut arcs = try_with_capacity("shipped adjacency", deg)?;
            for _ in 0..deg {
                arcs.push((r.next_gnum().decoded(OP)?, r.next_gnum().decoded(OP)?));
            }
            let slot = usize::try_from(c - base)
                .ok()
                .filter(|&s| s < k)
                .ok_or_else(|| DgraphError::internal(OP, 8))?;
            shipped[slot] = Some(Shipped { vload, arcs });
        }
    }

    let mut vert_index = Vec::with_capacity(k + 1);
    vert_index.push(0);
    let mut edges = Vec::new();
    let mut edge_load = Vec::new();
    let mut vert_load = Vec::with_capacity(k);
    let mut collapsed: Gnum = 0;
    let mut row: HashMap<Gnum, usize> = HashMap::new();
    for (i, mn) in multinodes.iter().enumerate() {
        let id = base + gn(i);
        row.clear();
        let mut vload = 0;
        let mut add = |end: Gnum, load: Gnum, edges: &mut Vec<Gnum>, edge_load: &mut Vec<Gnum>| {
            if end == id {
                collapsed += load;
            } else if let Some(&pos) = row.get(&end) {
                edge_load[pos] += load;
            } else {
                row.insert(end, edges.len());
                edges.push(end);
                edge_load.push(load);
            }
        };
        let mut members = vec![mn.vert[0]];
        if !mn.is_singleton() {
            members.push(mn.vert[1]);
        }
        for g in members {
            if let Some(v) = fine.local_of(g) {
                vload += fine.vload(v);
                for e in fine.edge_range(v) {
                    add(coarse_of[fine.edge_gst(e)], fine.eload(e), &mut edges, &mut edge_load);
                }
            } else {
                let s = shipped[i].take().ok_or_else(|| DgraphError::internal(OP, 9))?;
                vload += s.vload;
                for (end, load) in s.arcs {
                    add(end, load, &mut edges, &mut edge_load);
                }
            }
        }
        vert_load.push(vload);
        vert_index.push(edges.len());
    }
    let csr = LocalCsr::compact(&vert_index, edges, Some(vert_load), Some(edge_load));
    Ok((csr, collapsed))
}

/// Collective: build the coarse graph of `fine` under `matching`.
pub fn build_coarse<C: Communicator>(
    fine: &DistGraph<C>,
    matching: DistMatching,
) -> Result<Coarsening<C>, DgraphError> {
    let comm = fine.comm();
    let n = fine.vertex_count();
    let nbrs = fine.ghost().neighbors();
    let DistMatching { mates, multinodes } = matching;
    let k = multinodes.len();

    let counts = allgather_gnums(comm, OP, 2, &[gn(k)])?;
    let base: Gnum = counts[..comm.rank()].iter().map(|c| c[0]).sum();

    // Number local members; tell owners of remote mates their number.
    let mut coarse_of = try_vec("fine to coarse map", n + fine.ghost().ghost_count(), -1 as Gnum)?;
    let mut links: Vec<Vec<WireCoarseLink>> = vec![Vec::new(); nbrs.len()];
    let mut numbered = Ok(());
    for (i, mn) in multinodes.iter().enumerate() {
        let id = base + gn(i);
        let Some(a) = fine.local_of(mn.vert[0]) else {
            numbered = Err(DgraphError::internal(OP, 3));
            break;
        };
        coarse_of[a] = id;
        match fine.local_of(mn.vert[1]) {
            Some(b) => coarse_of[b] = id,
            None => match neighbour_slot(fine, mn.vert[1]) {
                Ok(slot) => links[slot].push(WireCoarseLink::new(mn.vert[1], id)),
                Err(e) => {
                    numbered = Err(e);
                    break;
                }
            },
        }
    }
    agree(comm, OP, numbered)?;
    let payloads: Vec<Vec<u8>> = links.iter().map(|l| encode_records(l).to_vec()).collect();
    let got = exchange_with(comm, OP, 4, CommTag::COARSEN_MULT, nbrs, &payloads)?;
    let linked = got.iter().try_for_each(|bytes| -> Result<(), DgraphError> {
        for link in decode_records::<WireCoarseLink>(bytes).decoded(OP)? {
            let v = fine
                .local_of(link.fine().decoded(OP)?)
                .ok_or_else(|| DgraphError::internal(OP, 5))?;
            coarse_of[v] = link.coarse().decoded(OP)?;
        }
        Ok(())
    });
    let complete = linked.and_then(|()| {
        if coarse_of[..n].iter().any(|&c| c < 0) {
            Err(DgraphError::internal(OP, 6))
        } else {
            Ok(())
        }
    });
    agree(comm, OP, complete)?;
    fine.halo_sync(&mut coarse_of)?;

    // Non-creating sides ship their adjacency to the creator.
    let mine = base..base + gn(k);
    let mut adj: Vec<GnumWriter> = (0..nbrs.len()).map(|_| GnumWriter::default()).collect();
    let packed = (0..n).try_for_each(|v| -> Result<(), DgraphError> {
        if mine.contains(&coarse_of[v]) {
            return Ok(());
        }
        let w = &mut adj[neighbour_slot(fine, mates[v])?];
        w.put(coarse_of[v]);
        w.put(fine.vload(v));
        w.put(gn(fine.degree(v)));
        for e in fine.edge_range(v) {
            w.put(coarse_of[fine.edge_gst(e)]);
            w.put(fine.eload(e));
        }
        Ok(())
    });
    agree(comm, OP, packed)?;
    let payloads: Vec<Vec<u8>> = adj.into_iter().map(GnumWriter::into_bytes).collect();
    let got = exchange_with(comm, OP, 7, CommTag::COARSEN_ADJ, nbrs, &payloads)?;
    let merged = merge_multinodes(fine, &multinodes, &coarse_of, base, &got);
    let (csr, collapsed) = agree(comm, OP, merged)?;
    let collapsed_edge_load = comm.allreduce_sum(collapsed as i64).at(OP, 10)? as Gnum;

    let coarse = DistGraph::build(comm.clone(), csr)?;
    coarse.debug_assert_invariants();
    debug!(
        "{OP}: rank {}: {} fine -> {} coarse vertices, collapsed load {}",
        comm.rank(),
        n,
        k,
        collapsed_edge_load
    );
    Ok(Coarsening {
        coarse,
        multinodes,
        fine_to_coarse: coarse_of,
        fine_mates: mates,
        collapsed_edge_load,
    })
}

impl<C: Communicator> Coarsening<C> {
    /// Collective over the fine graph: per-coarse-vertex values carried back
    /// to every fine local vertex of `fine`.
    pub fn project<T: Pod>(&self, fine: &DistGraph<C>, coarse_vals: &[T]) -> Result<Vec<T>, DgraphError> {
        let comm = fine.comm();
        let k = self.coarse.vertex_count();
        let sized = if coarse_vals.len() < k {
            Err(DgraphError::InvalidParameter(format!(
                "projection needs {k} coarse values, got {}",
                coarse_vals.len()
            )))
        } else {
            Ok(())
        };
        agree(comm, PROJECT_OP, sized)?;
        let nbrs = fine.ghost().neighbors();

        let mut out = try_vec("projected values", fine.vertex_count(), T::zeroed())?;
        for (v, slot) in out.iter_mut().enumerate() {
            if let Some(c) = self.local_coarse(self.fine_to_coarse[v]) {
                *slot = coarse_vals[c];
            }
        }
        let mut payloads: Vec<Vec<T>> = vec![Vec::new(); nbrs.len()];
        let bucketed = self
            .multinodes
            .iter()
            .enumerate()
            .filter(|(_, mn)| !mn.is_singleton() && fine.local_of(mn.vert[1]).is_none())
            .try_for_each(|(i, mn)| -> Result<(), DgraphError> {
                payloads[neighbour_slot(fine, mn.vert[1])?].push(coarse_vals[i]);
                Ok(())
            });
        agree(comm, PROJECT_OP, bucketed)?;
        let bufs: Vec<Vec<u8>> = payloads.iter().map(|p| encode_records(p).to_vec()).collect();
        let got = exchange_with(comm, PROJECT_OP, 1, CommTag::PROJECT, nbrs, &bufs)?;
        agree(comm, PROJECT_OP, self.receive_projected(fine, &got, &mut out))?;
        Ok(out)
    }

    /// Local index of coarse vertex `c`, if this process holds it.
    fn local_coarse(&self, c: Gnum) -> Option<usize> {
        let base = self.coarse.base();
        usize::try_from(c - base)
            .ok()
            .filter(|&i| i < self.coarse.vertex_count())
    }

    /// Fill the vertices whose multinode lives elsewhere. Creators send in
    /// coarse number order; our receivers are sorted the same way.
    fn receive_projected<T: Pod>(&self, fine: &DistGraph<C>, got: &[Vec<u8>], out: &mut [T]) -> Result<(), DgraphError> {
        let mut waiting: Vec<Vec<usize>> = vec![Vec::new(); fine.ghost().neighbors().len()];
        for v in 0..fine.vertex_count() {
            if self.local_coarse(self.fine_to_coarse[v]).is_none() {
                waiting[neighbour_slot(fine, self.fine_mates[v])?].push(v);
            }
        }
        for (list, bytes) in waiting.iter_mut().zip(got) {
            list.sort_unstable_by_key(|&v| self.fine_to_coarse[v]);
            let vals: Vec<T> = decode_records(bytes).decoded(PROJECT_OP)?;
            if vals.len() != list.len() {
                return Err(DgraphError::internal(PROJECT_OP, 2));
            }
            for (&v, val) in list.iter().zip(vals) {
                out[v] = val;
            }
        }
        Ok(())
    }
}
