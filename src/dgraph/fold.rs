//! Folding: moving a distributed graph onto one half of its process group.
//!
//! The group of `p` processes is cut in two halves, `[0, ⌈p/2⌉)` and
//! `[⌈p/2⌉, p)`. Folding onto a half keeps every vertex already held by a
//! process of that half and deals the vertices of the other half out to the
//! receivers with a deficit, so that the receivers end up as close as
//! possible to an even share. The plan is computed identically on every
//! process from the process vertex counts; a receiver lays out its own
//! vertices first, then the incoming slots in sender order, which fixes the
//! new global numbering without any negotiation.

use std::ops::Range;

use log::debug;

use super::exchange::ship;
use super::gather::{Shard, concat, csr_into_graph};
use super::{DistGraph, agree, balanced_range};
use crate::algs::communicator::{CommTag, Communicator};
use crate::config::Context;
use crate::graph::{Gnum, Graph, gn};
use crate::graph_error::{DgraphError, try_vec};

/// Result of a fold: a half of one process gets a centralized graph.
#[derive(Debug)]
pub enum FoldedGraph<C: Communicator> {
    Centralized(Graph),
    Distributed(DistGraph<C>),
}

impl<C: Communicator> FoldedGraph<C> {
    pub fn vertex_count_global(&self) -> Gnum {
        match self {
            FoldedGraph::Centralized(g) => gn(g.vertex_count()),
            FoldedGraph::Distributed(g) => g.vertex_count_global(),
        }
    }
}

/// One communication slot of a fold plan.
///
/// While balancing, `vertnbr` is a receiver's signed deficit (positive when
/// it can take vertices) and `procnum` the receiver; in a finished plan it is
/// the number of vertices moved and `procnum` the peer on the other end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldCommData {
    pub vertnbr: Gnum,
    pub procnum: usize,
}

/// The two halves of a group of `size` processes; the lower one is the larger.
pub fn fold_halves(size: usize) -> [Range<usize>; 2] {
    let h = size.div_ceil(2);
    [0..h, h..size]
}

/// Redistribution plan of a fold onto `receivers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldPlan {
    receivers: Range<usize>,
    counts: Vec<Gnum>,
    /// `(sender, receiver, count)`, by sender then receiver.
    slots: Vec<(usize, usize, Gnum)>,
    new_vrttab: Vec<Gnum>,
}

impl FoldPlan {
    /// Plan from the local vertex count of every process.
    pub fn compute(counts: &[Gnum], receivers: Range<usize>) -> Result<Self, DgraphError> {
        const OP: &str = "fold_plan";
        if receivers.is_empty() || receivers.end > counts.len() {
            return Err(DgraphError::InvalidParameter(format!(
                "cannot fold {} processes onto {receivers:?}",
                counts.len()
            )));
        }
        let total: Gnum = counts.iter().sum();
        let nr = receivers.len();
        let balance: Vec<FoldCommData> = receivers
            .clone()
            .enumerate()
            .map(|(j, r)| FoldCommData {
                vertnbr: gn(balanced_range(total as usize, nr, j).len()) - counts[r],
                procnum: r,
            })
            .collect();

        let mut slots = Vec::new();
        let mut takers = balance.iter().copied().filter(|d| d.vertnbr > 0);
        let mut cur = takers.next();
        for s in (0..counts.len()).filter(|p| !receivers.contains(p)) {
            let mut left = counts[s];
            while left > 0 {
                let Some(mut d) = cur else {
                    return Err(DgraphError::internal(OP, 1));
                };
                let take = left.min(d.vertnbr);
                slots.push((s, d.procnum, take));
                left -= take;
                d.vertnbr -= take;
                cur = if d.vertnbr == 0 { takers.next() } else { Some(d) };
            }
        }

        let mut new_vrttab = Vec::with_capacity(nr + 1);
        new_vrttab.push(0);
        for r in receivers.clone() {
            let incoming: Gnum = slots.iter().filter(|s| s.1 == r).map(|s| s.2).sum();
            let last = new_vrttab.last().copied().unwrap_or(0);
            new_vrttab.push(last + counts[r] + incoming);
        }
        Ok(Self {
            receivers,
            counts: counts.to_vec(),
            slots,
            new_vrttab,
        })
    }

    pub fn receivers(&self) -> Range<usize> {
        self.receivers.clone()
    }

    /// Slots sent by `p`: vertex count and receiver, in local vertex order.
    pub fn sends(&self, p: usize) -> Vec<FoldCommData> {
        self.slots
            .iter()
            .filter(|s| s.0 == p)
            .map(|&(_, r, c)| FoldCommData { vertnbr: c, procnum: r })
            .collect()
    }

    /// Slots received by `r`: vertex count and sender, in sender order.
    pub fn recvs(&self, r: usize) -> Vec<FoldCommData> {
        self.slots
            .iter()
            .filter(|s| s.1 == r)
            .map(|&(s, _, c)| FoldCommData { vertnbr: c, procnum: s })
            .collect()
    }

    /// Local vertex count of receiver `r` after the fold.
    pub fn new_count(&self, r: usize) -> Gnum {
        let j = r - self.receivers.start;
        self.new_vrttab[j + 1] - self.new_vrttab[j]
    }

    /// Global numbers in the folded graph of the local vertices of `p`.
    pub fn new_ids(&self, p: usize) -> Vec<Gnum> {
        let n = self.counts[p] as usize;
        if self.receivers.contains(&p) {
            let base = self.new_vrttab[p - self.receivers.start];
            return (0..n).map(|i| base + gn(i)).collect();
        }
        let mut out = Vec::with_capacity(n);
        for &(s, r, c) in self.slots.iter().filter(|s| s.0 == p) {
            let earlier: Gnum = self
                .slots
                .iter()
                .filter(|t| t.1 == r && t.0 < s)
                .map(|t| t.2)
                .sum();
            let start = self.new_vrttab[r - self.receivers.start] + self.counts[r] + earlier;
            out.extend((0..c).map(|k| start + k));
        }
        out
    }
}

impl<C: Communicator> DistGraph<C> {
    /// Collective: fold onto half `part` (0 or 1) of the process group.
    ///
    /// Processes of the target half pass the communicator of their half as
    /// `sub` (unused when the half is a single process) and get the folded
    /// graph; the others pass `None` and get `None`.
    pub fn fold(&self, part: usize, sub: Option<C>) -> Result<Option<FoldedGraph<C>>, DgraphError> {
        self.fold_with(self.comm(), part, sub)
    }

    /// As [`DistGraph::fold`], with all traffic on `comm`.
    pub(crate) fn fold_with(
        &self,
        comm: &C,
        part: usize,
        sub: Option<C>,
    ) -> Result<Option<FoldedGraph<C>>, DgraphError> {
        const OP: &str = "dgraph_fold";
        let size = comm.size();
        if size < 2 || part > 1 {
            return Err(DgraphError::InvalidParameter(format!(
                "cannot fold a group of {size} processes onto half {part}"
            )));
        }
        let receivers = fold_halves(size)[part].clone();
        let me = comm.rank();
        let n = self.vertex_count();
        let receiving = receivers.contains(&me);
        let prepared = FoldPlan::compute(&self.proc_cnttab, receivers.clone()).and_then(|plan| {
            if receiving && receivers.len() > 1 {
                let sub = sub
                    .as_ref()
                    .ok_or_else(|| DgraphError::InvalidParameter("fold target without sub-communicator".into()))?;
                if sub.size() != receivers.len() || sub.rank() != me - receivers.start {
                    return Err(DgraphError::InvalidParameter(format!(
                        "sub-communicator rank {} of {} does not match fold half {receivers:?}",
                        sub.rank(),
                        sub.size()
                    )));
                }
            }
            let new_glb = try_vec("fold numbering", n + self.ghost.ghost_count(), -1 as Gnum)?;
            Ok((plan, new_glb))
        });
        let (plan, mut new_glb) = agree(comm, OP, prepared)?;
        new_glb[..n].copy_from_slice(&plan.new_ids(me));
        self.ghost.halo_sync(comm, n, &mut new_glb)?;

        let encode = |range: Range<usize>| {
            let mut shard = Shard {
                degrees: Vec::with_capacity(range.len()),
                ends: Vec::new(),
                vloads: self.vert_load.as_ref().map(|_| Vec::with_capacity(range.len())),
                eloads: self.edge_load.as_ref().map(|_| Vec::new()),
                labels: Some(Vec::with_capacity(range.len())),
            };
            for v in range {
                shard.degrees.push(gn(self.degree(v)));
                for e in self.edge_range(v) {
                    shard.ends.push(new_glb[self.edge_gst(e)]);
                    if let Some(el) = shard.eloads.as_mut() {
                        el.push(self.eload(e));
                    }
                }
                if let Some(vl) = shard.vloads.as_mut() {
                    vl.push(self.vload(v));
                }
                if let Some(lb) = shard.labels.as_mut() {
                    lb.push(self.label(v));
                }
            }
            shard
        };

        let mut outgoing = Vec::new();
        let mut senders = Vec::new();
        if receiving {
            senders = plan.recvs(me).iter().map(|d| d.procnum).collect();
        } else {
            let mut off = 0usize;
            for d in plan.sends(me) {
                let c = d.vertnbr as usize;
                outgoing.push((d.procnum, encode(off..off + c).encode()));
                off += c;
            }
        }
        let got = ship(comm, OP, 1, CommTag::FOLD, &outgoing, &senders)?;
        let decoded = if receiving {
            let mut shards = Vec::with_capacity(1 + got.len());
            shards.push(encode(0..n));
            got.iter()
                .try_for_each(|bytes| Shard::decode(bytes, OP).map(|s| shards.push(s)))
                .map(|()| Some(concat(shards)))
        } else {
            Ok(None)
        };
        let Some(csr) = agree(comm, OP, decoded)? else {
            debug!("{OP}: rank {me} shipped {n} vertices to half {part}");
            return Ok(None);
        };
        debug!(
            "{OP}: rank {me} holds {} vertices after fold onto half {part} ({} slots in)",
            csr.vertex_count(),
            got.len()
        );
        if receivers.len() == 1 {
            return Ok(Some(FoldedGraph::Centralized(csr_into_graph(csr)?)));
        }
        let sub = sub.ok_or_else(|| DgraphError::internal(OP, 2))?;
        Ok(Some(FoldedGraph::Distributed(DistGraph::build(sub, csr)?)))
    }
}

/// Collective: fold `lower` onto the lower half and `upper` onto the upper
/// half of the group; each process gets the graph of its own half.
///
/// Both graphs must live on the same communicator. With
/// `ctx.fold_threads` (and a backend that allows it) the two folds run
/// concurrently, the upper one on a duplicate communicator; the result is
/// identical either way.
pub fn fold_dup<C: Communicator>(
    lower: &DistGraph<C>,
    upper: &DistGraph<C>,
    ctx: &Context,
) -> Result<FoldedGraph<C>, DgraphError> {
    const OP: &str = "dgraph_fold_dup";
    let comm = lower.comm();
    let me = comm.rank();
    let half = usize::from(!fold_halves(comm.size())[0].contains(&me));
    let sub = comm
        .split(Some(half as u32), me)
        .map_err(|e| DgraphError::comm(OP, 1, e))?;
    let (sub0, sub1) = if half == 0 { (sub, None) } else { (None, sub) };

    let (r0, r1) = if ctx.fold_threads && comm.supports_threads() {
        let dup = comm.duplicate().map_err(|e| DgraphError::comm(OP, 2, e))?;
        std::thread::scope(|s| {
            let h = s.spawn(|| upper.fold_with(&dup, 1, sub1));
            let r0 = lower.fold_with(comm, 0, sub0);
            let r1 = h.join().unwrap_or_else(|_| Err(DgraphError::internal(OP, 3)));
            (r0, r1)
        })
    } else {
        (lower.fold_with(comm, 0, sub0), upper.fold_with(comm, 1, sub1))
    };
    // fail together if either fold failed
    let (mine, other) = if half == 0 { (r0, r1) } else { (r1, r0) };
    let folded = other.and(mine).and_then(|f| f.ok_or_else(|| DgraphError::internal(OP, 4)));
    agree(comm, OP, folded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;

    #[test]
    fn halves_favour_the_lower_side() {
        assert_eq!(fold_halves(5), [0..3, 3..5]);
        assert_eq!(fold_halves(2), [0..1, 1..2]);
    }

    #[test]
    fn plan_balances_receivers() {
        let plan = FoldPlan::compute(&[4, 1, 3, 4], 0..2).unwrap();
        // total 12, target 6 each: rank 0 needs 2, rank 1 needs 5
        assert_eq!(plan.sends(2), vec![FoldCommData { vertnbr: 2, procnum: 0 }, FoldCommData { vertnbr: 1, procnum: 1 }]);
        assert_eq!(plan.sends(3), vec![FoldCommData { vertnbr: 4, procnum: 1 }]);
        assert_eq!(plan.new_count(0), 6);
        assert_eq!(plan.new_count(1), 6);
        assert_eq!(plan.new_ids(2), vec![4, 5, 7]);
        assert_eq!(plan.new_ids(3), vec![8, 9, 10, 11]);
    }

    #[test]
    fn oversized_receiver_keeps_its_vertices() {
        let plan = FoldPlan::compute(&[10, 0, 2], 0..2).unwrap();
        assert_eq!(plan.new_count(0), 10);
        assert_eq!(plan.new_count(1), 2);
    }

    #[test]
    fn fold_partitions_the_vertex_set() {
        for threads in [false, true] {
            let out = ThreadComm::run(4, |comm| {
                let g = DistGraph::build_grid_3d(comm, [4, 4, 2]).unwrap();
                let ctx = Context {
                    fold_threads: threads,
                    ..Context::default()
                };
                let folded = fold_dup(&g, &g, &ctx).unwrap();
                match folded {
                    FoldedGraph::Distributed(f) => {
                        f.check().unwrap();
                        let mut labels: Vec<Gnum> = (0..f.vertex_count()).map(|v| f.label(v)).collect();
                        labels.sort_unstable();
                        (f.vertex_count_global(), labels)
                    }
                    FoldedGraph::Centralized(_) => unreachable!(),
                }
            });
            for (vg, _) in &out {
                assert_eq!(*vg, 32);
            }
            let mut lower: Vec<Gnum> = out[0].1.iter().chain(&out[1].1).copied().collect();
            lower.sort_unstable();
            assert_eq!(lower, (0..32).collect::<Vec<Gnum>>());
        }
    }

    #[test]
    fn two_process_fold_centralizes() {
        let out = ThreadComm::run(2, |comm| {
            let g = DistGraph::build_grid_3d(comm, [3, 3, 1]).unwrap();
            match fold_dup(&g, &g, &Context::default()).unwrap() {
                FoldedGraph::Centralized(c) => {
                    c.check().unwrap();
                    c.vertex_count()
                }
                FoldedGraph::Distributed(_) => 0,
            }
        });
        assert_eq!(out, vec![9, 9]);
    }

    #[test]
    fn bad_upper_graph_on_one_rank_fails_both_halves() {
        for threads in [false, true] {
            let out = ThreadComm::run(4, |comm| {
                let lower = DistGraph::build_grid_3d(comm.clone(), [4, 4, 2]).unwrap();
                let mut upper = DistGraph::build_grid_3d(comm, [4, 4, 2]).unwrap();
                if upper.rank() == 2 {
                    upper.proc_cnttab.pop();
                }
                let ctx = Context {
                    fold_threads: threads,
                    ..Context::default()
                };
                fold_dup(&lower, &upper, &ctx).unwrap_err()
            });
            assert!(matches!(out[2], DgraphError::InvalidParameter(_)), "{:?}", out[2]);
            for r in [0, 1, 3] {
                assert!(matches!(out[r], DgraphError::RemoteFailure { .. }), "{:?}", out[r]);
            }
        }
    }
}
