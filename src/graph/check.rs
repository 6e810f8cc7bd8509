//! Consistency checker for centralized graphs.

use hashbrown::HashSet;
use rayon::prelude::*;

use super::{Gnum, Graph, gn, load_sum};
use crate::graph_error::GraphCheckError;

impl Graph {
    /// Verify every structural invariant and return the first violation found.
    ///
    /// Checks, in order: vertex and edge counts, CSR monotonicity, arc ends,
    /// loops, non-negative loads, duplicate arcs, arc symmetry with equal
    /// loads, overflow-free load sums, and the declared sums and maximum degree.
    pub fn check(&self) -> Result<(), GraphCheckError> {
        if self.vert_index.is_empty() || self.vert_index[0] != 0 {
            return Err(GraphCheckError::InvalidVertexCount);
        }
        let n = self.vertex_count();
        let arcs = self.arc_count();
        if self.edges.len() < arcs || arcs % 2 != 0 {
            return Err(GraphCheckError::InvalidEdgeCount);
        }
        for v in 0..n {
            if self.vert_index[v] > self.vert_index[v + 1] {
                return Err(GraphCheckError::NonMonotonicCsr { vertex: gn(v) });
            }
        }
        if let Some(l) = &self.vert_load {
            check_len("vert_load", n, l.len())?;
        }
        if let Some(l) = &self.edge_load {
            check_len("edge_load", arcs, l.len())?;
        }
        if let Some(l) = &self.labels {
            check_len("labels", n, l.len())?;
        }

        if let Some(err) = (0..n).into_par_iter().find_map_first(|v| self.check_vertex(v).err()) {
            return Err(err);
        }
        let degree_max = (0..n).into_par_iter().map(|v| self.degree(v)).max().unwrap_or(0);

        let vsum = load_sum(self.vert_load.as_deref(), n, true)?;
        let esum = load_sum(self.edge_load.as_ref().map(|l| &l[..arcs]), arcs, false)?;
        if vsum != self.vert_load_sum {
            return Err(GraphCheckError::VertexLoadSumMismatch {
                declared: self.vert_load_sum,
                found: vsum,
            });
        }
        if esum != self.edge_load_sum {
            return Err(GraphCheckError::EdgeLoadSumMismatch {
                declared: self.edge_load_sum,
                found: esum,
            });
        }
        if gn(degree_max) != self.degree_max {
            return Err(GraphCheckError::MaxDegreeMismatch {
                declared: self.degree_max,
                found: gn(degree_max),
            });
        }
        Ok(())
    }

    /// Loads, arc ends, loops, duplicates and symmetry around `v`.
    fn check_vertex(&self, v: usize) -> Result<(), GraphCheckError> {
        let n = self.vertex_count();
        if self.vload(v) < 0 {
            return Err(GraphCheckError::NegativeVertexLoad { vertex: gn(v) });
        }
        let mut seen: HashSet<Gnum> = HashSet::with_capacity(self.degree(v));
        for e in self.edge_range(v) {
            let w = self.edges[e];
            if w < 0 || w >= gn(n) {
                return Err(GraphCheckError::InvalidEdgeEnd {
                    vertex: gn(v),
                    end: w,
                });
            }
            if w == gn(v) {
                return Err(GraphCheckError::SelfLoop { vertex: gn(v) });
            }
            if self.eload(e) < 0 {
                return Err(GraphCheckError::NegativeEdgeLoad { vertex: gn(v) });
            }
            if !seen.insert(w) {
                return Err(GraphCheckError::DuplicateArc { src: gn(v), dst: w });
            }
            let back = self.edge_range(w as usize).find(|&f| self.edges[f] == gn(v));
            match back {
                Some(f) if self.eload(f) == self.eload(e) => {}
                _ => return Err(GraphCheckError::AsymmetricArc { src: gn(v), dst: w }),
            }
        }
        Ok(())
    }
}

pub(crate) fn check_len(array: &'static str, expected: usize, found: usize) -> Result<(), GraphCheckError> {
    if found == expected {
        Ok(())
    } else {
        Err(GraphCheckError::ArrayLength {
            array,
            expected,
            found,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle() -> Graph {
        Graph::from_edge_list(3, &[(0, 1), (1, 2), (2, 0)]).unwrap()
    }

    #[test]
    fn triangle_is_consistent() {
        triangle().check().unwrap();
    }

    #[test]
    fn self_loop_is_reported() {
        let g = Graph::new(vec![0, 1, 2], vec![0, 0], None, None).unwrap();
        assert_eq!(g.check(), Err(GraphCheckError::SelfLoop { vertex: 0 }));
    }

    #[test]
    fn unequal_arc_loads_are_reported() {
        let mut g = triangle();
        let mut el = vec![1; g.arc_count()];
        el[0] = 5;
        g.edge_load_sum = el.iter().sum();
        g.edge_load = Some(el);
        assert!(matches!(g.check(), Err(GraphCheckError::AsymmetricArc { src: 0, .. })));
    }

    #[test]
    fn duplicate_arc_is_reported() {
        let g = Graph::new(vec![0, 2, 4], vec![1, 1, 0, 0], None, None).unwrap();
        assert_eq!(g.check(), Err(GraphCheckError::DuplicateArc { src: 0, dst: 1 }));
    }

    #[test]
    fn stale_declared_sums_are_reported() {
        let mut g = triangle();
        g.vert_load_sum = 7;
        assert!(matches!(
            g.check(),
            Err(GraphCheckError::VertexLoadSumMismatch { declared: 7, found: 3 })
        ));
        let mut g = triangle();
        g.degree_max = 1;
        assert!(matches!(g.check(), Err(GraphCheckError::MaxDegreeMismatch { .. })));
    }

    #[test]
    fn negative_vertex_load_is_reported() {
        let mut g = triangle();
        g.vert_load = Some(vec![1, -1, 1]);
        g.vert_load_sum = 1;
        assert_eq!(g.check(), Err(GraphCheckError::NegativeVertexLoad { vertex: 1 }));
    }
}
