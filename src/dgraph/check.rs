//! Consistency checker for distributed graphs.
//!
//! The check runs in three collective stages: local structure, cross-process
//! arc symmetry (every cross arc is verified by the owner of its far end),
//! then the declared global sums. A failure on any process makes every
//! process fail, the others with [`GraphCheckError::Remote`].

use hashbrown::HashSet;
use log::trace;

use super::exchange::alltoallv;
use super::{DistGraph, allgather_gnums, consensus_check};
use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::wire::{GnumReader, GnumWriter};
use crate::graph::check::check_len;
use crate::graph::{Gnum, gn};
use crate::graph_error::{DgraphError, GraphCheckError, WireResultExt};

const OP: &str = "dgraph_check";

impl<C: Communicator> DistGraph<C> {
    /// Collective: verify every structural invariant of the distributed graph.
    pub fn check(&self) -> Result<(), DgraphError> {
        consensus_check(self.comm(), OP, self.check_local().map_err(DgraphError::from))?;
        let cross = self.check_cross_arcs();
        consensus_check(self.comm(), OP, cross)?;
        let sums = self.check_global_sums();
        consensus_check(self.comm(), OP, sums)?;
        trace!("{OP}: rank {} consistent", self.rank());
        Ok(())
    }

    /// Checks that need no communication.
    pub fn check_local(&self) -> Result<(), GraphCheckError> {
        let n = self.vertex_count();
        let size = self.size();
        let rank = self.rank();
        if self.proc_vrttab.len() != size + 1 || self.proc_cnttab.len() != size || self.proc_vrttab[0] != 0 {
            return Err(GraphCheckError::ProcessTable);
        }
        for p in 0..size {
            if self.proc_vrttab[p + 1] - self.proc_vrttab[p] != self.proc_cnttab[p] || self.proc_cnttab[p] < 0 {
                return Err(GraphCheckError::ProcessTable);
            }
        }
        if self.proc_cnttab[rank] != gn(n) || self.vert_glb != self.proc_vrttab[size] {
            return Err(GraphCheckError::InvalidVertexCount);
        }
        check_len("vert_end", n, self.vert_end.len())?;
        if let Some(l) = &self.vert_load {
            check_len("vert_load", n, l.len())?;
        }
        if let Some(l) = &self.edge_load {
            check_len("edge_load", self.edges.len(), l.len())?;
        }
        if let Some(l) = &self.labels {
            check_len("labels", n, l.len())?;
        }
        check_len("edge_gst", self.edges.len(), self.ghost.edge_gst.len())?;

        let mut degrees = 0usize;
        let mut seen: HashSet<Gnum> = HashSet::new();
        let mut vload: Gnum = 0;
        for v in 0..n {
            let (s, e) = (self.vert_start[v], self.vert_end[v]);
            if s > e || e > self.edges.len() {
                return Err(GraphCheckError::NonMonotonicCsr { vertex: self.global_of(v) });
            }
            degrees += e - s;
            let vl = self.vload(v);
            if vl < 0 {
                return Err(GraphCheckError::NegativeVertexLoad { vertex: self.global_of(v) });
            }
            vload = vload.checked_add(vl).ok_or(GraphCheckError::VertexLoadOverflow)?;
            seen.clear();
            let gv = self.global_of(v);
            for arc in s..e {
                let w = self.edges[arc];
                if w < 0 || w >= self.vert_glb {
                    return Err(GraphCheckError::InvalidEdgeEnd { vertex: gv, end: w });
                }
                if w == gv {
                    return Err(GraphCheckError::SelfLoop { vertex: gv });
                }
                if self.eload(arc) < 0 {
                    return Err(GraphCheckError::NegativeEdgeLoad { vertex: gv });
                }
                if !seen.insert(w) {
                    return Err(GraphCheckError::DuplicateArc { src: gv, dst: w });
                }
                if self.global_of_gst(self.ghost.edge_gst[arc]) != w {
                    return Err(GraphCheckError::InvalidEdgeEnd { vertex: gv, end: w });
                }
                if let Some(lw) = self.local_of(w) {
                    let back = self.edge_range(lw).find(|&f| self.edges[f] == gv);
                    match back {
                        Some(f) if self.eload(f) == self.eload(arc) => {}
                        _ => return Err(GraphCheckError::AsymmetricArc { src: gv, dst: w }),
                    }
                }
            }
        }
        if degrees != self.arc_count {
            return Err(GraphCheckError::EdgeCountMismatch {
                declared: gn(self.arc_count),
                found: gn(degrees),
            });
        }
        if vload != self.vert_load_loc {
            return Err(GraphCheckError::VertexLoadSumMismatch {
                declared: self.vert_load_loc,
                found: vload,
            });
        }
        Ok(())
    }

    /// Cross arcs `(src, dst, load)` from our vertices to neighbour `i`, or
    /// the mirror image of the arcs neighbour `i` should have sent us.
    fn cross_triples(&self, i: usize, mirrored: bool) -> Vec<(Gnum, Gnum, Gnum)> {
        let n = self.vertex_count();
        let r = self.ghost.recv_range(i);
        let mut out = Vec::new();
        for &v in self.ghost.send_list(i) {
            for arc in self.edge_range(v) {
                let gst = self.ghost.edge_gst[arc];
                if gst >= n && r.contains(&(gst - n)) {
                    let (gv, w) = (self.global_of(v), self.edges[arc]);
                    out.push(if mirrored { (w, gv, self.eload(arc)) } else { (gv, w, self.eload(arc)) });
                }
            }
        }
        out.sort_unstable();
        out
    }

    fn check_cross_arcs(&self) -> Result<(), DgraphError> {
        // Every pair talks, so one-sided adjacency cannot leave a peer waiting.
        let size = self.size();
        let triples_for = |p: usize, mirrored: bool| {
            self.ghost
                .neighbor_index(p)
                .map(|i| self.cross_triples(i, mirrored))
                .unwrap_or_default()
        };
        let payloads: Vec<Vec<u8>> = (0..size)
            .map(|p| {
                let triples = triples_for(p, false);
                let mut w = GnumWriter::with_capacity(3 * triples.len());
                for (s, d, l) in triples {
                    w.put(s);
                    w.put(d);
                    w.put(l);
                }
                w.into_bytes()
            })
            .collect();
        let got = alltoallv(self.comm(), OP, 1, CommTag::CHECK, payloads)?;
        for (p, bytes) in got.iter().enumerate() {
            if p == self.rank() {
                continue;
            }
            let mut rd = GnumReader::new(bytes);
            let mut theirs = Vec::new();
            while !rd.is_empty() {
                let s = rd.next_gnum().decoded(OP)?;
                let d = rd.next_gnum().decoded(OP)?;
                let l = rd.next_gnum().decoded(OP)?;
                theirs.push((s, d, l));
            }
            let ours = triples_for(p, true);
            if theirs != ours {
                let bad = theirs
                    .iter()
                    .zip(&ours)
                    .find(|(a, b)| a != b)
                    .map(|(a, _)| *a)
                    .or_else(|| theirs.get(ours.len()).copied())
                    .or_else(|| ours.get(theirs.len()).map(|&(s, d, l)| (d, s, l)))
                    .unwrap_or((-1, -1, 0));
                return Err(GraphCheckError::AsymmetricArc { src: bad.0, dst: bad.1 }.into());
            }
        }
        Ok(())
    }

    fn check_global_sums(&self) -> Result<(), DgraphError> {
        let eload = (0..self.vertex_count())
            .flat_map(|v| self.edge_range(v))
            .try_fold(0 as Gnum, |acc, e| acc.checked_add(self.eload(e)))
            .ok_or(GraphCheckError::EdgeLoadOverflow);
        let eload = consensus_check(self.comm(), OP, eload.map_err(DgraphError::from))?;
        let dmax = (0..self.vertex_count()).map(|v| self.degree(v)).max().unwrap_or(0);
        let all = allgather_gnums(
            self.comm(),
            OP,
            2,
            &[gn(self.arc_count), self.vert_load_loc, eload, gn(dmax)],
        )?;
        let mut sums = [0 as Gnum; 3];
        let mut found_dmax = 0;
        for row in &all {
            let &[a, vl, el, d] = row.as_slice() else {
                return Err(DgraphError::internal(OP, 3));
            };
            sums[0] = sums[0].checked_add(a).ok_or(GraphCheckError::EdgeLoadOverflow)?;
            sums[1] = sums[1].checked_add(vl).ok_or(GraphCheckError::VertexLoadOverflow)?;
            sums[2] = sums[2].checked_add(el).ok_or(GraphCheckError::EdgeLoadOverflow)?;
            found_dmax = found_dmax.max(d);
        }
        if sums[0] != self.arc_glb {
            return Err(GraphCheckError::EdgeCountMismatch {
                declared: self.arc_glb,
                found: sums[0],
            }
            .into());
        }
        if sums[1] != self.vert_load_glb {
            return Err(GraphCheckError::VertexLoadSumMismatch {
                declared: self.vert_load_glb,
                found: sums[1],
            }
            .into());
        }
        if sums[2] != self.edge_load_glb {
            return Err(GraphCheckError::EdgeLoadSumMismatch {
                declared: self.edge_load_glb,
                found: sums[2],
            }
            .into());
        }
        if found_dmax != self.degree_max_glb {
            return Err(GraphCheckError::MaxDegreeMismatch {
                declared: self.degree_max_glb,
                found: found_dmax,
            }
            .into());
        }
        Ok(())
    }
}
