//! Centralized (single-process) graph in compact CSR form.
//!
//! A [`Graph`] is what a process group of size one works on: it is produced
//! by folding onto a single process, by gathering a distributed graph, or by
//! the grid builders, and it is what the sequential orderings consume.

pub mod check;
pub mod grid;

use std::ops::Range;

use crate::graph_error::{DgraphError, GraphCheckError};

/// Graph number: vertex and edge numbers and loads.
#[cfg(not(feature = "gnum32"))]
pub type Gnum = i64;
/// Graph number: vertex and edge numbers and loads.
#[cfg(feature = "gnum32")]
pub type Gnum = i32;

/// Index to graph number.
#[inline]
pub(crate) fn gn(i: usize) -> Gnum {
    i as Gnum
}

/// Sum of an optional load array, `count` when absent.
pub(crate) fn load_sum(loads: Option<&[Gnum]>, count: usize, vertex_loads: bool) -> Result<Gnum, GraphCheckError> {
    let overflow = if vertex_loads {
        GraphCheckError::VertexLoadOverflow
    } else {
        GraphCheckError::EdgeLoadOverflow
    };
    match loads {
        None => Gnum::try_from(count).map_err(|_| overflow),
        Some(l) => l
            .iter()
            .try_fold(0 as Gnum, |acc, &x| acc.checked_add(x))
            .ok_or(overflow),
    }
}

/// Compact CSR graph; vertex `v` has arcs `edges[vert_index[v]..vert_index[v + 1]]`
/// whose ends are local vertex indices. Every edge is stored as two arcs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph {
    pub vert_index: Vec<usize>,
    pub edges: Vec<Gnum>,
    pub vert_load: Option<Vec<Gnum>>,
    pub edge_load: Option<Vec<Gnum>>,
    /// Original vertex numbers carried through folds and inductions.
    pub labels: Option<Vec<Gnum>>,
    pub vert_load_sum: Gnum,
    pub edge_load_sum: Gnum,
    pub degree_max: Gnum,
}

impl Default for Graph {
    fn default() -> Self {
        Self {
            vert_index: vec![0],
            edges: Vec::new(),
            vert_load: None,
            edge_load: None,
            labels: None,
            vert_load_sum: 0,
            edge_load_sum: 0,
            degree_max: 0,
        }
    }
}

impl Graph {
    /// Build a graph and compute its load sums and maximum degree.
    ///
    /// Only the array shapes are validated here; call [`Graph::check`] for
    /// the full structural verification.
    pub fn new(
        vert_index: Vec<usize>,
        edges: Vec<Gnum>,
        vert_load: Option<Vec<Gnum>>,
        edge_load: Option<Vec<Gnum>>,
    ) -> Result<Self, DgraphError> {
        if vert_index.is_empty() || vert_index[0] != 0 {
            return Err(GraphCheckError::InvalidVertexCount.into());
        }
        let n = vert_index.len() - 1;
        for v in 0..n {
            if vert_index[v] > vert_index[v + 1] {
                return Err(GraphCheckError::NonMonotonicCsr { vertex: gn(v) }.into());
            }
        }
        let arcs = vert_index[n];
        if edges.len() != arcs {
            return Err(GraphCheckError::ArrayLength {
                array: "edges",
                expected: arcs,
                found: edges.len(),
            }
            .into());
        }
        if let Some(l) = &vert_load {
            if l.len() != n {
                return Err(GraphCheckError::ArrayLength {
                    array: "vert_load",
                    expected: n,
                    found: l.len(),
                }
                .into());
            }
        }
        if let Some(l) = &edge_load {
            if l.len() != arcs {
                return Err(GraphCheckError::ArrayLength {
                    array: "edge_load",
                    expected: arcs,
                    found: l.len(),
                }
                .into());
            }
        }
        let vert_load_sum = load_sum(vert_load.as_deref(), n, true)?;
        let edge_load_sum = load_sum(edge_load.as_deref(), arcs, false)?;
        let degree_max = (0..n)
            .map(|v| vert_index[v + 1] - vert_index[v])
            .max()
            .unwrap_or(0);
        Ok(Self {
            vert_index,
            edges,
            vert_load,
            edge_load,
            labels: None,
            vert_load_sum,
            edge_load_sum,
            degree_max: gn(degree_max),
        })
    }

    /// Attach original vertex numbers.
    pub fn with_labels(mut self, labels: Vec<Gnum>) -> Result<Self, DgraphError> {
        if labels.len() != self.vertex_count() {
            return Err(GraphCheckError::ArrayLength {
                array: "labels",
                expected: self.vertex_count(),
                found: labels.len(),
            }
            .into());
        }
        self.labels = Some(labels);
        Ok(self)
    }

    #[inline]
    pub fn vertex_count(&self) -> usize {
        self.vert_index.len().saturating_sub(1)
    }

    /// Number of arcs (twice the number of edges).
    #[inline]
    pub fn arc_count(&self) -> usize {
        self.vert_index.last().copied().unwrap_or(0)
    }

    #[inline]
    pub fn edge_range(&self, v: usize) -> Range<usize> {
        self.vert_index[v]..self.vert_index[v + 1]
    }

    #[inline]
    pub fn neighbors(&self, v: usize) -> &[Gnum] {
        &self.edges[self.edge_range(v)]
    }

    #[inline]
    pub fn degree(&self, v: usize) -> usize {
        self.vert_index[v + 1] - self.vert_index[v]
    }

    #[inline]
    pub fn vload(&self, v: usize) -> Gnum {
        self.vert_load.as_ref().map_or(1, |l| l[v])
    }

    #[inline]
    pub fn eload(&self, e: usize) -> Gnum {
        self.edge_load.as_ref().map_or(1, |l| l[e])
    }

    /// Original number of `v`, or `v` itself when no labels are attached.
    #[inline]
    pub fn label(&self, v: usize) -> Gnum {
        self.labels.as_ref().map_or(gn(v), |l| l[v])
    }

    /// Subgraph induced by `keep` (local indices, in the order they will be
    /// renumbered). Labels follow their vertices.
    pub fn induce(&self, keep: &[usize]) -> Result<Graph, DgraphError> {
        let mut new_of = vec![-1 as Gnum; self.vertex_count()];
        for (i, &v) in keep.iter().enumerate() {
            new_of[v] = gn(i);
        }
        let mut vert_index = Vec::with_capacity(keep.len() + 1);
        vert_index.push(0);
        let mut edges = Vec::new();
        let mut edge_load = self.edge_load.as_ref().map(|_| Vec::new());
        for &v in keep {
            for e in self.edge_range(v) {
                let w = new_of[self.edges[e] as usize];
                if w >= 0 {
                    edges.push(w);
                    if let Some(el) = edge_load.as_mut() {
                        el.push(self.eload(e));
                    }
                }
            }
            vert_index.push(edges.len());
        }
        let vert_load = self
            .vert_load
            .as_ref()
            .map(|l| keep.iter().map(|&v| l[v]).collect());
        let labels = keep.iter().map(|&v| self.label(v)).collect();
        Graph::new(vert_index, edges, vert_load, edge_load)?.with_labels(labels)
    }

    /// Build from an undirected edge list; both arcs are emitted, ends sorted.
    pub fn from_edge_list(n: usize, edges: &[(usize, usize)]) -> Result<Graph, DgraphError> {
        let mut adj = vec![Vec::new(); n];
        for &(u, v) in edges {
            if u >= n || v >= n {
                return Err(GraphCheckError::InvalidEdgeEnd {
                    vertex: gn(u),
                    end: gn(v),
                }
                .into());
            }
            adj[u].push(gn(v));
            adj[v].push(gn(u));
        }
        let mut vert_index = Vec::with_capacity(n + 1);
        vert_index.push(0);
        let mut flat = Vec::new();
        for mut a in adj {
            a.sort_unstable();
            flat.extend(a);
            vert_index.push(flat.len());
        }
        Graph::new(vert_index, flat, None, None)
    }
}
