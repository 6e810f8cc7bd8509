//! Ghost vertices: compact indices for remote arc ends and the neighbour
//! communication layout derived from them.
//!
//! Ghosts are sorted by global number, hence grouped by owner. For every
//! neighbour process `p`, `send_lists[i]` holds the local vertices adjacent to
//! `p` (increasing global number) and `recv_ranges[i]` the ghost indices owned
//! by `p`; on a symmetric graph the two sides list the same vertices in the
//! same order, which is what [`GhostData::halo_sync`] relies on.

use std::ops::Range;

use bytemuck::Pod;
use once_cell::sync::OnceCell;

use super::exchange::exchange_with;
use super::owner_in;
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{decode_records, encode_records};
use crate::graph::{Gnum, gn};
use crate::graph_error::{DgraphError, GraphCheckError, WireResultExt};

#[derive(Debug, Clone, Default)]
pub struct GhostData {
    /// Local-or-ghost end index of every arc slot (`usize::MAX` outside ranges).
    pub(crate) edge_gst: Vec<usize>,
    /// Global number of every ghost, increasing.
    pub(crate) ghost_glb: Vec<Gnum>,
    /// Neighbour ranks, increasing.
    pub(crate) neighbors: Vec<usize>,
    pub(crate) recv_ranges: Vec<Range<usize>>,
    pub(crate) send_lists: Vec<Vec<usize>>,
    /// Index of the first neighbour whose rank is above ours.
    pub(crate) ngb_next: usize,
    owners: Vec<OnceCell<usize>>,
}

impl GhostData {
    pub(crate) fn build(
        vert_start: &[usize],
        vert_end: &[usize],
        edges: &[Gnum],
        proc_vrttab: &[Gnum],
        rank: usize,
    ) -> Result<Self, GraphCheckError> {
        let n = vert_start.len();
        let base = proc_vrttab[rank];
        let end = proc_vrttab[rank + 1];
        let glb = proc_vrttab.last().copied().unwrap_or(0);

        let mut ghost_glb = Vec::new();
        for v in 0..n {
            for &w in &edges[vert_start[v]..vert_end[v]] {
                if w < 0 || w >= glb {
                    return Err(GraphCheckError::InvalidEdgeEnd {
                        vertex: base + gn(v),
                        end: w,
                    });
                }
                if w < base || w >= end {
                    ghost_glb.push(w);
                }
            }
        }
        ghost_glb.sort_unstable();
        ghost_glb.dedup();

        let mut neighbors: Vec<usize> = Vec::new();
        let mut recv_ranges: Vec<Range<usize>> = Vec::new();
        for (i, &g) in ghost_glb.iter().enumerate() {
            let p = owner_in(proc_vrttab, g);
            if neighbors.last() == Some(&p) {
                if let Some(r) = recv_ranges.last_mut() {
                    r.end = i + 1;
                }
            } else {
                neighbors.push(p);
                recv_ranges.push(i..i + 1);
            }
        }

        let mut edge_gst = vec![usize::MAX; edges.len()];
        let mut send_lists = vec![Vec::new(); neighbors.len()];
        for v in 0..n {
            for e in vert_start[v]..vert_end[v] {
                let w = edges[e];
                if w >= base && w < end {
                    edge_gst[e] = (w - base) as usize;
                    continue;
                }
                let gi = ghost_glb.partition_point(|&x| x < w);
                edge_gst[e] = n + gi;
                let ni = recv_ranges.partition_point(|r| r.end <= gi);
                let list = &mut send_lists[ni];
                if list.last() != Some(&v) {
                    list.push(v);
                }
            }
        }
        let ngb_next = neighbors.partition_point(|&p| p < rank);
        let owners = ghost_glb.iter().map(|_| OnceCell::new()).collect();
        Ok(Self {
            edge_gst,
            ghost_glb,
            neighbors,
            recv_ranges,
            send_lists,
            ngb_next,
            owners,
        })
    }

    #[inline]
    pub fn ghost_count(&self) -> usize {
        self.ghost_glb.len()
    }

    #[inline]
    pub fn ghost_globals(&self) -> &[Gnum] {
        &self.ghost_glb
    }

    #[inline]
    pub fn neighbors(&self) -> &[usize] {
        &self.neighbors
    }

    #[inline]
    pub fn first_upper_neighbor(&self) -> usize {
        self.ngb_next
    }

    /// Ghost indices (0-based) owned by neighbour `i`.
    #[inline]
    pub fn recv_range(&self, i: usize) -> Range<usize> {
        self.recv_ranges[i].clone()
    }

    /// Local vertices adjacent to neighbour `i`.
    #[inline]
    pub fn send_list(&self, i: usize) -> &[usize] {
        &self.send_lists[i]
    }

    /// Position of rank `p` in the neighbour list.
    #[inline]
    pub fn neighbor_index(&self, p: usize) -> Option<usize> {
        self.neighbors.binary_search(&p).ok()
    }

    /// Owner of ghost `g` (0-based ghost index), resolved once then memoised.
    #[inline]
    pub(crate) fn owner(&self, g: usize, proc_vrttab: &[Gnum]) -> usize {
        *self.owners[g].get_or_init(|| owner_in(proc_vrttab, self.ghost_glb[g]))
    }

    /// Ghost index of global number `w`, if `w` is a ghost here.
    #[inline]
    pub fn ghost_index(&self, w: Gnum) -> Option<usize> {
        self.ghost_glb.binary_search(&w).ok()
    }

    pub(crate) fn halo_sync<C: Communicator, T: Pod>(
        &self,
        comm: &C,
        n: usize,
        data: &mut [T],
    ) -> Result<(), DgraphError> {
        const OP: &str = "halo_sync";
        if data.len() < n + self.ghost_count() {
            return Err(DgraphError::InvalidParameter(format!(
                "halo array holds {} values, {} needed",
                data.len(),
                n + self.ghost_count()
            )));
        }
        let payloads: Vec<Vec<u8>> = self
            .send_lists
            .iter()
            .map(|list| {
                let packed: Vec<T> = list.iter().map(|&v| data[v]).collect();
                encode_records(&packed).to_vec()
            })
            .collect();
        let got = exchange_with(comm, OP, 1, CommTag::HALO, &self.neighbors, &payloads)?;
        for (i, bytes) in got.iter().enumerate() {
            let vals: Vec<T> = decode_records(bytes).decoded(OP)?;
            let r = &self.recv_ranges[i];
            if vals.len() != r.len() {
                return Err(DgraphError::internal(OP, 2));
            }
            data[n + r.start..n + r.end].copy_from_slice(&vals);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ghosts_are_grouped_by_owner() {
        // rank 1 of [0, 2, 4, 6]: vertices 2, 3
        let vert_start = [0, 3];
        let vert_end = [3, 5];
        let edges = [0, 3, 5, 2, 1];
        let gd = GhostData::build(&vert_start, &vert_end, &edges, &[0, 2, 4, 6], 1).unwrap();
        assert_eq!(gd.ghost_glb, vec![0, 1, 5]);
        assert_eq!(gd.neighbors, vec![0, 2]);
        assert_eq!(gd.recv_ranges, vec![0..2, 2..3]);
        assert_eq!(gd.send_lists, vec![vec![0, 1], vec![0]]);
        assert_eq!(gd.edge_gst, vec![2, 1, 4, 0, 3]);
        assert_eq!(gd.ngb_next, 1);
        assert_eq!(gd.owner(2, &[0, 2, 4, 6]), 2);
    }

    #[test]
    fn out_of_range_end_is_reported() {
        let err = GhostData::build(&[0], &[1], &[9], &[0, 1, 2], 0).unwrap_err();
        assert_eq!(err, GraphCheckError::InvalidEdgeEnd { vertex: 0, end: 9 });
    }
}
