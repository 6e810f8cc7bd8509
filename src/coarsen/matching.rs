//! Heavy-edge matching of a distributed graph.
//!
//! Each pass first settles what can be settled without communication: a
//! queued vertex whose heaviest free neighbour is local is matched at once,
//! one without any free neighbour becomes a singleton, and one whose best
//! candidate is a ghost either sends a request this pass or stays free so that
//! it can accept requests from other processes. The requests are then
//! negotiated by [`super::sync_ptop`]. Vertices still undecided after the last
//! pass become singletons.

use std::collections::VecDeque;

use log::{debug, trace};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::Multinode;
use super::sync_ptop::sync_ptop;
use crate::algs::communicator::Communicator;
use crate::config::{CoarsenParams, Context};
use crate::dgraph::DistGraph;
use crate::graph::Gnum;
use crate::graph_error::{CommResultExt, DgraphError, try_vec};

/// Matching state of one local or ghost vertex.
///
/// Ghost entries are only ever `Free` (as far as we know) or `Matched`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mate {
    Free,
    /// A request went out along this arc and awaits its answer.
    Pending(usize),
    /// Mated with this global vertex; a vertex matched with itself is a singleton.
    Matched(Gnum),
}

/// Pure symmetric choice of the vertex whose owner creates the multinode of
/// a cross-process pair.
#[inline]
pub(crate) fn creator_of(a: Gnum, b: Gnum) -> Gnum {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    if (lo ^ hi) & 1 == 0 { lo } else { hi }
}

/// Working state of one matching run.
#[derive(Debug)]
pub struct MatchingState {
    /// Local vertices first, then ghosts.
    pub(crate) mates: Vec<Mate>,
    /// Local vertices that still have to be decided.
    pub(crate) queue: VecDeque<usize>,
    /// Multinodes created on this process; the first vertex is always local.
    pub(crate) multinodes: Vec<Multinode>,
}

impl MatchingState {
    /// Everything free, every local vertex queued.
    pub fn new<C: Communicator>(graph: &DistGraph<C>) -> Result<Self, DgraphError> {
        let n = graph.vertex_count();
        let mates = try_vec("matching mates", n + graph.ghost().ghost_count(), Mate::Free)?;
        Ok(Self {
            mates,
            queue: (0..n).collect(),
            multinodes: Vec::new(),
        })
    }

    /// Collective: resume from a partial matching given as one global mate
    /// per local vertex (`-1` when free, the vertex itself for a singleton).
    ///
    /// Pairs must be consistent across processes. Local pairs are recorded
    /// once; cross pairs are recorded by the side [`creator_of`] designates.
    pub fn with_initial<C: Communicator>(graph: &DistGraph<C>, initial: &[Gnum]) -> Result<Self, DgraphError> {
        const OP: &str = "match_init";
        let n = graph.vertex_count();
        let total = n + graph.ghost().ghost_count();
        if initial.len() != n {
            return Err(DgraphError::InvalidParameter(format!(
                "initial matching holds {} entries for {n} vertices",
                initial.len()
            )));
        }
        let mut raw = try_vec("matching mates", total, -1 as Gnum)?;
        raw[..n].copy_from_slice(initial);
        graph.halo_sync(&mut raw)?;

        let valid = (0..n).try_for_each(|v| {
            let m = raw[v];
            let gv = graph.global_of(v);
            let ok = m < 0 || m == gv || graph.neighbors(v).contains(&m);
            let mirrored = match graph.local_of(m) {
                Some(w) => raw[w] == gv,
                None if m < 0 => true,
                None => graph.ghost().ghost_index(m).is_some_and(|g| raw[n + g] == gv),
            };
            if ok && mirrored {
                Ok(())
            } else {
                Err(DgraphError::InvalidParameter(format!("vertex {gv}: inconsistent initial mate {m}")))
            }
        });
        crate::dgraph::agree(graph.comm(), OP, valid)?;

        let mut st = Self {
            mates: raw
                .iter()
                .map(|&m| if m < 0 { Mate::Free } else { Mate::Matched(m) })
                .collect(),
            queue: VecDeque::new(),
            multinodes: Vec::new(),
        };
        for v in 0..n {
            let gv = graph.global_of(v);
            match st.mates[v] {
                Mate::Free => st.queue.push_back(v),
                Mate::Matched(m) => {
                    let record = match graph.local_of(m) {
                        Some(_) => gv <= m,
                        None => creator_of(gv, m) == gv,
                    };
                    if record {
                        st.multinodes.push(Multinode::new(gv, m));
                    }
                }
                Mate::Pending(_) => return Err(DgraphError::internal(OP, 1)),
            }
        }
        Ok(st)
    }

    /// Number of local vertices already decided.
    pub fn matched_count(&self, n: usize) -> usize {
        self.mates[..n]
            .iter()
            .filter(|m| matches!(m, Mate::Matched(_)))
            .count()
    }

    fn singleton(&mut self, v: usize, gv: Gnum) {
        self.mates[v] = Mate::Matched(gv);
        self.multinodes.push(Multinode::new(gv, gv));
    }

    /// Settle the queue without communication. Returns the number of
    /// requests issued.
    fn local_phase<C: Communicator>(
        &mut self,
        graph: &DistGraph<C>,
        rng: &mut SmallRng,
        request_probability: f64,
    ) -> usize {
        let n = graph.vertex_count();
        let mut requests = 0;
        for qi in 0..self.queue.len() {
            let v = self.queue[qi];
            if self.mates[v] != Mate::Free {
                continue;
            }
            let gv = graph.global_of(v);
            // heaviest free neighbour, local ones first on equal loads
            let mut best: Option<(usize, Gnum, bool)> = None;
            for e in graph.edge_range(v) {
                let w = graph.edge_gst(e);
                if self.mates[w] != Mate::Free {
                    continue;
                }
                let load = graph.eload(e);
                let local = w < n;
                let better = match best {
                    None => true,
                    Some((_, bl, blocal)) => load > bl || (load == bl && local && !blocal),
                };
                if better {
                    best = Some((e, load, local));
                }
            }
            match best {
                None => self.singleton(v, gv),
                Some((e, _, true)) => {
                    let w = graph.edge_gst(e);
                    let gw = graph.global_of(w);
                    self.mates[v] = Mate::Matched(gw);
                    self.mates[w] = Mate::Matched(gv);
                    self.multinodes.push(Multinode::new(gv, gw));
                }
                Some((e, _, false)) => {
                    if rng.gen_bool(request_probability) {
                        self.mates[v] = Mate::Pending(e);
                        requests += 1;
                    }
                }
            }
        }
        requests
    }

    /// Drop decided vertices from the queue; unanswered requests become free.
    fn requeue(&mut self) {
        let mates = &mut self.mates;
        self.queue.retain(|&v| match mates[v] {
            Mate::Matched(_) => false,
            Mate::Pending(_) => {
                mates[v] = Mate::Free;
                true
            }
            Mate::Free => true,
        });
    }

    /// Collective: run request/reply passes until nothing is left to decide
    /// anywhere or the pass budget is spent, then make singletons of the rest.
    pub fn run<C: Communicator>(
        &mut self,
        graph: &DistGraph<C>,
        params: &CoarsenParams,
        ctx: &Context,
        level: u64,
    ) -> Result<(), DgraphError> {
        const OP: &str = "match";
        if !(0.0..=1.0).contains(&params.request_probability) {
            return Err(DgraphError::InvalidParameter(format!(
                "request probability {} not in [0, 1]",
                params.request_probability
            )));
        }
        let mut rng = SmallRng::seed_from_u64(ctx.seed_for(graph.rank(), level));
        if !ctx.deterministic {
            self.queue.make_contiguous().shuffle(&mut rng);
        }
        for pass in 0..params.passes {
            let left = graph.comm().allreduce_max(self.queue.len() as i64).at(OP, 1)?;
            if left == 0 {
                break;
            }
            let requests = self.local_phase(graph, &mut rng, params.request_probability);
            let stats = sync_ptop(graph, self, ctx)?;
            self.requeue();
            trace!(
                "{OP}: rank {} pass {pass}: {requests} requests, {} accepted, {} refused, {} queued",
                graph.rank(),
                stats.matched,
                stats.refused,
                self.queue.len()
            );
        }
        let n = graph.vertex_count();
        while let Some(v) = self.queue.pop_front() {
            if self.mates[v] == Mate::Free {
                self.singleton(v, graph.global_of(v));
            }
        }
        if self.matched_count(n) != n {
            return Err(DgraphError::internal(OP, 2));
        }
        Ok(())
    }

    /// Finished matching; fails if some local vertex is still undecided.
    pub fn finish<C: Communicator>(self, graph: &DistGraph<C>) -> Result<DistMatching, DgraphError> {
        let n = graph.vertex_count();
        let mates = self.mates[..n]
            .iter()
            .map(|m| match *m {
                Mate::Matched(g) => Ok(g),
                _ => Err(DgraphError::internal("match_finish", 1)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(DistMatching {
            mates,
            multinodes: self.multinodes,
        })
    }
}

/// A complete matching of the local vertices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistMatching {
    /// Global mate of every local vertex (itself for singletons).
    pub mates: Vec<Gnum>,
    /// Multinodes this process is responsible for; first entry local.
    pub multinodes: Vec<Multinode>,
}

impl DistMatching {
    /// Local vertices matched with a vertex other than themselves.
    pub fn paired_count<C: Communicator>(&self, graph: &DistGraph<C>) -> usize {
        (0..self.mates.len())
            .filter(|&v| self.mates[v] != graph.global_of(v))
            .count()
    }
}

/// Collective: compute a maximal matching of `graph`.
pub fn match_graph<C: Communicator>(
    graph: &DistGraph<C>,
    params: &CoarsenParams,
    ctx: &Context,
    level: u64,
) -> Result<DistMatching, DgraphError> {
    let mut st = MatchingState::new(graph)?;
    st.run(graph, params, ctx, level)?;
    let m = st.finish(graph)?;
    debug!(
        "match: rank {}: {} local vertices, {} multinodes",
        graph.rank(),
        graph.vertex_count(),
        m.multinodes.len()
    );
    Ok(m)
}
