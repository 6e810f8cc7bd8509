//! Distributed graph: one process-local shard of a global graph plus ghosts.
//!
//! Each process owns a contiguous range of global vertex numbers, given by
//! the process vertex table `proc_vrttab` (`size + 1` sorted start offsets).
//! Local arcs store *global* end numbers; the ghost extension
//! ([`ghost::GhostData`]) maps them to compact local-or-ghost indices.

pub mod check;
pub(crate) mod exchange;
pub mod fold;
pub mod gather;
pub mod ghost;
pub mod induce;

use std::ops::Range;

use log::debug;

use crate::algs::communicator::Communicator;
use crate::algs::wire::{decode_gnums, encode_gnums};
use crate::graph::grid::grid_3d_neighbors;
use crate::graph::{Gnum, gn};
use crate::graph_error::{CommResultExt, DgraphError, GraphCheckError, WireResultExt};

pub use ghost::GhostData;

/// Local arrays handed to [`DistGraph::build`].
///
/// Vertex `v` owns arcs `edges[vert_start[v]..vert_end[v]]`; ends are global
/// vertex numbers. `arc_count` is the declared number of local arcs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalCsr {
    pub vert_start: Vec<usize>,
    pub vert_end: Vec<usize>,
    pub edges: Vec<Gnum>,
    pub arc_count: usize,
    pub vert_load: Option<Vec<Gnum>>,
    pub edge_load: Option<Vec<Gnum>>,
    pub labels: Option<Vec<Gnum>>,
}

impl LocalCsr {
    /// Arrays from a compact index (`vert_index.len() == n + 1`).
    pub fn compact(
        vert_index: &[usize],
        edges: Vec<Gnum>,
        vert_load: Option<Vec<Gnum>>,
        edge_load: Option<Vec<Gnum>>,
    ) -> Self {
        let n = vert_index.len().saturating_sub(1);
        Self {
            vert_start: vert_index[..n].to_vec(),
            vert_end: vert_index.get(1..).map(<[usize]>::to_vec).unwrap_or_default(),
            arc_count: vert_index.last().copied().unwrap_or(0),
            edges,
            vert_load,
            edge_load,
            labels: None,
        }
    }

    pub fn with_labels(mut self, labels: Vec<Gnum>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.vert_start.len()
    }

    /// Local verification pass: array lengths, CSR monotonicity, and the
    /// declared arc count against the degree sum. No communication.
    pub fn verify(&self) -> Result<(), GraphCheckError> {
        let n = self.vertex_count();
        if self.vert_end.len() != n {
            return Err(GraphCheckError::ArrayLength {
                array: "vert_end",
                expected: n,
                found: self.vert_end.len(),
            });
        }
        let mut degrees = 0usize;
        for v in 0..n {
            let (s, e) = (self.vert_start[v], self.vert_end[v]);
            if s > e || e > self.edges.len() {
                return Err(GraphCheckError::NonMonotonicCsr { vertex: gn(v) });
            }
            degrees += e - s;
        }
        if degrees != self.arc_count {
            return Err(GraphCheckError::EdgeCountMismatch {
                declared: gn(self.arc_count),
                found: gn(degrees),
            });
        }
        if let Some(l) = &self.vert_load {
            crate::graph::check::check_len("vert_load", n, l.len())?;
        }
        if let Some(l) = &self.edge_load {
            crate::graph::check::check_len("edge_load", self.edges.len(), l.len())?;
        }
        if let Some(l) = &self.labels {
            crate::graph::check::check_len("labels", n, l.len())?;
        }
        Ok(())
    }
}

/// Process-local shard of a distributed graph.
#[derive(Debug)]
pub struct DistGraph<C: Communicator> {
    comm: C,
    pub(crate) vert_start: Vec<usize>,
    pub(crate) vert_end: Vec<usize>,
    pub(crate) edges: Vec<Gnum>,
    pub(crate) arc_count: usize,
    pub(crate) vert_load: Option<Vec<Gnum>>,
    pub(crate) edge_load: Option<Vec<Gnum>>,
    pub(crate) labels: Option<Vec<Gnum>>,
    pub(crate) vert_glb: Gnum,
    pub(crate) arc_glb: Gnum,
    pub(crate) vert_load_loc: Gnum,
    pub(crate) vert_load_glb: Gnum,
    pub(crate) edge_load_glb: Gnum,
    pub(crate) degree_max_glb: Gnum,
    pub(crate) proc_vrttab: Vec<Gnum>,
    pub(crate) proc_cnttab: Vec<Gnum>,
    pub(crate) ghost: GhostData,
}

/// Turn a local result into a group-wide one: if any process failed, every
/// process fails. Must be called by all processes of `comm`.
pub(crate) fn agree<C: Communicator, T>(
    comm: &C,
    op: &'static str,
    local: Result<T, DgraphError>,
) -> Result<T, DgraphError> {
    let any = comm.allreduce_max(i64::from(local.is_err())).at(op, 0)?;
    match local {
        Err(e) => Err(e),
        Ok(_) if any != 0 => Err(DgraphError::RemoteFailure { op }),
        Ok(v) => Ok(v),
    }
}

/// All-gather a short vector of graph numbers from every process.
pub(crate) fn allgather_gnums<C: Communicator>(
    comm: &C,
    op: &'static str,
    site: u32,
    values: &[Gnum],
) -> Result<Vec<Vec<Gnum>>, DgraphError> {
    comm.allgather(&encode_gnums(values))
        .at(op, site)?
        .iter()
        .map(|b| decode_gnums(b).decoded(op))
        .collect()
}

impl<C: Communicator> DistGraph<C> {
    /// Collective: build the distributed graph from each process's local arrays.
    ///
    /// Fails with [`DgraphError::InconsistentGraph`] on every process when the
    /// arrays of any process are malformed (the failing process reports its
    /// own diagnosis, the others [`GraphCheckError::Remote`]).
    pub fn build(comm: C, local: LocalCsr) -> Result<Self, DgraphError> {
        const OP: &str = "dgraph_build";
        let verified = local.verify().map_err(DgraphError::from);
        consensus_check(&comm, OP, verified)?;

        let n = local.vertex_count();
        let vload_loc = crate::graph::load_sum(local.vert_load.as_deref(), n, true);
        let eload_loc = local
            .edge_load
            .as_ref()
            .map(|el| {
                (0..n)
                    .flat_map(|v| local.vert_start[v]..local.vert_end[v])
                    .try_fold(0 as Gnum, |acc, e| acc.checked_add(el[e]))
                    .ok_or(GraphCheckError::EdgeLoadOverflow)
            })
            .unwrap_or(Ok(gn(local.arc_count)));
        let degree_max = (0..n)
            .map(|v| local.vert_end[v] - local.vert_start[v])
            .max()
            .unwrap_or(0);
        let sums = vload_loc.and_then(|vl| eload_loc.map(|el| (vl, el)));
        let (vload_loc, eload_loc) = consensus_check(&comm, OP, sums.map_err(DgraphError::from))?;

        let all = allgather_gnums(
            &comm,
            OP,
            1,
            &[gn(n), gn(local.arc_count), vload_loc, eload_loc, gn(degree_max)],
        )?;
        let size = comm.size();
        let mut proc_vrttab: Vec<Gnum> = Vec::with_capacity(size + 1);
        let mut proc_cnttab = Vec::with_capacity(size);
        proc_vrttab.push(0);
        let (mut arc_glb, mut vload_glb, mut eload_glb, mut dmax) = (0 as Gnum, 0 as Gnum, 0 as Gnum, 0 as Gnum);
        for (p, row) in all.iter().enumerate() {
            let &[cnt, arcs, vl, el, dg] = row.as_slice() else {
                return Err(DgraphError::internal(OP, 2));
            };
            proc_cnttab.push(cnt);
            proc_vrttab.push(
                proc_vrttab[p]
                    .checked_add(cnt)
                    .ok_or(GraphCheckError::InvalidVertexCount)?,
            );
            arc_glb = arc_glb.checked_add(arcs).ok_or(GraphCheckError::InvalidEdgeCount)?;
            vload_glb = vload_glb.checked_add(vl).ok_or(GraphCheckError::VertexLoadOverflow)?;
            eload_glb = eload_glb.checked_add(el).ok_or(GraphCheckError::EdgeLoadOverflow)?;
            dmax = dmax.max(dg);
        }

        let rank = comm.rank();
        let ghost = GhostData::build(
            &local.vert_start,
            &local.vert_end,
            &local.edges,
            &proc_vrttab,
            rank,
        );
        let ghost = consensus_check(&comm, OP, ghost.map_err(DgraphError::from))?;

        debug!(
            "{OP}: rank {rank}: {n} vertices, {} arcs, {} ghosts, {} neighbours",
            local.arc_count,
            ghost.ghost_count(),
            ghost.neighbors.len()
        );

        Ok(Self {
            comm,
            vert_start: local.vert_start,
            vert_end: local.vert_end,
            edges: local.edges,
            arc_count: local.arc_count,
            vert_load: local.vert_load,
            edge_load: local.edge_load,
            labels: local.labels,
            vert_glb: proc_vrttab[size],
            arc_glb,
            vert_load_loc: vload_loc,
            vert_load_glb: vload_glb,
            edge_load_glb: eload_glb,
            degree_max_glb: dmax,
            proc_vrttab,
            proc_cnttab,
            ghost,
        })
    }

    /// Collective: the `dx × dy × dz` grid, vertices dealt out in contiguous
    /// slices (the first `n % size` processes get one extra vertex).
    pub fn build_grid_3d(comm: C, dims: [usize; 3]) -> Result<Self, DgraphError> {
        let total: usize = dims.iter().product();
        let range = balanced_range(total, comm.size(), comm.rank());
        let mut vert_index = Vec::with_capacity(range.len() + 1);
        vert_index.push(0);
        let mut edges = Vec::with_capacity(6 * range.len());
        for g in range {
            edges.extend(grid_3d_neighbors(g, dims));
            vert_index.push(edges.len());
        }
        Self::build(comm, LocalCsr::compact(&vert_index, edges, None, None))
    }

    #[inline]
    pub fn comm(&self) -> &C {
        &self.comm
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.comm.size()
    }

    /// Number of local vertices.
    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vert_start.len()
    }

    #[inline]
    pub fn vertex_count_global(&self) -> Gnum {
        self.vert_glb
    }

    /// Number of local arcs.
    #[inline]
    pub fn arc_count(&self) -> usize {
        self.arc_count
    }

    #[inline]
    pub fn arc_count_global(&self) -> Gnum {
        self.arc_glb
    }

    #[inline]
    pub fn vert_load_local(&self) -> Gnum {
        self.vert_load_loc
    }

    #[inline]
    pub fn vert_load_global(&self) -> Gnum {
        self.vert_load_glb
    }

    #[inline]
    pub fn edge_load_global(&self) -> Gnum {
        self.edge_load_glb
    }

    #[inline]
    pub fn degree_max_global(&self) -> Gnum {
        self.degree_max_glb
    }

    /// Global number of the first local vertex.
    #[inline]
    pub fn base(&self) -> Gnum {
        self.proc_vrttab[self.rank()]
    }

    #[inline]
    pub fn proc_vrttab(&self) -> &[Gnum] {
        &self.proc_vrttab
    }

    #[inline]
    pub fn proc_cnttab(&self) -> &[Gnum] {
        &self.proc_cnttab
    }

    #[inline]
    pub fn ghost(&self) -> &GhostData {
        &self.ghost
    }

    #[inline]
    pub fn global_of(&self, v: usize) -> Gnum {
        self.base() + gn(v)
    }

    /// Local index of a global number owned by this process.
    #[inline]
    pub fn local_of(&self, g: Gnum) -> Option<usize> {
        let base = self.base();
        (g >= base && g < base + gn(self.vertex_count())).then(|| (g - base) as usize)
    }

    /// Global number of a local-or-ghost index.
    #[inline]
    pub fn global_of_gst(&self, i: usize) -> Gnum {
        let n = self.vertex_count();
        if i < n {
            self.global_of(i)
        } else {
            self.ghost.ghost_glb[i - n]
        }
    }

    #[inline]
    pub fn edge_range(&self, v: usize) -> Range<usize> {
        self.vert_start[v]..self.vert_end[v]
    }

    #[inline]
    pub fn degree(&self, v: usize) -> usize {
        self.vert_end[v] - self.vert_start[v]
    }

    /// Global end numbers of the arcs of `v`.
    #[inline]
    pub fn neighbors(&self, v: usize) -> &[Gnum] {
        &self.edges[self.edge_range(v)]
    }

    /// Local-or-ghost end index of arc `e`.
    #[inline]
    pub fn edge_gst(&self, e: usize) -> usize {
        self.ghost.edge_gst[e]
    }

    #[inline]
    pub fn vload(&self, v: usize) -> Gnum {
        self.vert_load.as_ref().map_or(1, |l| l[v])
    }

    #[inline]
    pub fn eload(&self, e: usize) -> Gnum {
        self.edge_load.as_ref().map_or(1, |l| l[e])
    }

    #[inline]
    pub fn has_vert_load(&self) -> bool {
        self.vert_load.is_some()
    }

    #[inline]
    pub fn has_edge_load(&self) -> bool {
        self.edge_load.is_some()
    }

    /// Original number of local vertex `v`, its global number when unlabelled.
    #[inline]
    pub fn label(&self, v: usize) -> Gnum {
        self.labels.as_ref().map_or_else(|| self.global_of(v), |l| l[v])
    }

    /// Owner rank of a global vertex number (binary search over `proc_vrttab`).
    #[inline]
    pub fn owner_of(&self, g: Gnum) -> usize {
        owner_in(&self.proc_vrttab, g)
    }

    /// Owner rank of ghost `gst` (an index `>= vertex_count()`), memoised.
    #[inline]
    pub fn ghost_owner(&self, gst: usize) -> usize {
        let g = gst - self.vertex_count();
        self.ghost.owner(g, &self.proc_vrttab)
    }

    /// Compact copy of the local arrays, ends still global.
    pub fn to_local_csr(&self) -> LocalCsr {
        let n = self.vertex_count();
        let mut vert_index = Vec::with_capacity(n + 1);
        vert_index.push(0);
        let mut edges = Vec::with_capacity(self.arc_count);
        let mut edge_load = self.edge_load.as_ref().map(|_| Vec::with_capacity(self.arc_count));
        for v in 0..n {
            for e in self.edge_range(v) {
                edges.push(self.edges[e]);
                if let Some(el) = edge_load.as_mut() {
                    el.push(self.eload(e));
                }
            }
            vert_index.push(edges.len());
        }
        let mut csr = LocalCsr::compact(&vert_index, edges, self.vert_load.clone(), edge_load);
        csr.labels = self.labels.clone();
        csr
    }

    /// Collective: exchange one value per vertex so that ghost slots
    /// `data[vertex_count()..]` hold their owners' values.
    pub fn halo_sync<T: bytemuck::Pod>(&self, data: &mut [T]) -> Result<(), DgraphError> {
        self.ghost.halo_sync(&self.comm, self.vertex_count(), data)
    }
}

/// Owner of `g` in a process vertex table; empty processes are skipped.
#[inline]
pub(crate) fn owner_in(proc_vrttab: &[Gnum], g: Gnum) -> usize {
    proc_vrttab.partition_point(|&s| s <= g).saturating_sub(1)
}

/// Index range of process `rank` when `n` items are dealt evenly to `size` processes.
pub fn balanced_range(n: usize, size: usize, rank: usize) -> Range<usize> {
    let q = n / size;
    let r = n % size;
    let start = rank * q + rank.min(r);
    start..start + q + usize::from(rank < r)
}

/// Like [`agree`], but remote failures surface as [`GraphCheckError::Remote`].
pub(crate) fn consensus_check<C: Communicator, T>(
    comm: &C,
    op: &'static str,
    local: Result<T, DgraphError>,
) -> Result<T, DgraphError> {
    match agree(comm, op, local) {
        Err(DgraphError::RemoteFailure { .. }) => Err(GraphCheckError::Remote.into()),
        other => other,
    }
}
