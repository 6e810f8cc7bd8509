//! Induced subgraphs on the same communicator.

use log::debug;

use super::{DistGraph, LocalCsr, agree, allgather_gnums};
use crate::algs::communicator::Communicator;
use crate::graph::{Gnum, gn};
use crate::graph_error::{DgraphError, try_vec};

impl<C: Communicator> DistGraph<C> {
    /// Collective: subgraph induced by the local vertices in `keep` (kept in
    /// that order). Arcs to removed vertices are dropped; loads and labels
    /// follow their vertices.
    pub fn induce_list(&self, keep: &[usize]) -> Result<DistGraph<C>, DgraphError> {
        self.induce_list_with(self.comm(), keep)
    }

    /// Collective: subgraph induced by the local vertices whose `parts` entry
    /// equals `part`.
    pub fn induce_part(&self, parts: &[u8], part: u8) -> Result<DistGraph<C>, DgraphError> {
        let keep: Vec<usize> = (0..self.vertex_count()).filter(|&v| parts[v] == part).collect();
        self.induce_list(&keep)
    }

    /// As [`DistGraph::induce_list`], with all traffic on `comm` (a duplicate
    /// of the graph's communicator).
    pub(crate) fn induce_list_with(&self, comm: &C, keep: &[usize]) -> Result<DistGraph<C>, DgraphError> {
        const OP: &str = "dgraph_induce_list";
        let n = self.vertex_count();
        let total = n + self.ghost.ghost_count();
        let mut new_glb = try_vec("induce numbering", total, -1 as Gnum)?;

        let valid = keep.iter().try_for_each(|&v| {
            if v >= n || new_glb[v] >= 0 {
                Err(DgraphError::InvalidParameter(format!("induce list entry {v} invalid or repeated")))
            } else {
                new_glb[v] = 0;
                Ok(())
            }
        });
        agree(comm, OP, valid)?;

        let counts = allgather_gnums(comm, OP, 1, &[gn(keep.len())])?;
        let base: Gnum = counts[..comm.rank()].iter().map(|c| c[0]).sum();
        for (i, &v) in keep.iter().enumerate() {
            new_glb[v] = base + gn(i);
        }
        self.ghost.halo_sync(comm, n, &mut new_glb)?;

        let mut vert_index = Vec::with_capacity(keep.len() + 1);
        vert_index.push(0);
        let mut edges = Vec::new();
        let mut edge_load = self.edge_load.as_ref().map(|_| Vec::new());
        for &v in keep {
            for e in self.edge_range(v) {
                let w = new_glb[self.edge_gst(e)];
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
        debug!(
            "{OP}: rank {}: kept {} of {} vertices, {} arcs",
            comm.rank(),
            keep.len(),
            n,
            edges.len()
        );
        let csr = LocalCsr::compact(&vert_index, edges, vert_load, edge_load).with_labels(labels);
        DistGraph::build(comm.clone(), csr)
    }
}

#[cfg(test)]
mod tests {
    use crate::algs::communicator::ThreadComm;
    use crate::dgraph::DistGraph;

    #[test]
    fn induced_path_half() {
        let out = ThreadComm::run(2, |comm| {
            // path 0-1-2-3-4-5, keep even globals
            let g = DistGraph::build_grid_3d(comm, [6, 1, 1]).unwrap();
            let keep: Vec<usize> = (0..g.vertex_count()).filter(|&v| g.global_of(v) % 2 == 0).collect();
            let sub = g.induce_list(&keep).unwrap();
            sub.check().unwrap();
            let labels: Vec<_> = (0..sub.vertex_count()).map(|v| sub.label(v)).collect();
            (sub.vertex_count_global(), sub.arc_count_global(), labels)
        });
        assert_eq!(out[0].0, 3);
        assert_eq!(out[0].1, 0);
        assert_eq!(out[0].2, vec![0, 2]);
        assert_eq!(out[1].2, vec![4]);
    }

    #[test]
    fn induced_keeps_cross_arcs() {
        let out = ThreadComm::run(2, |comm| {
            let g = DistGraph::build_grid_3d(comm, [4, 1, 1]).unwrap();
            let keep: Vec<usize> = (0..g.vertex_count()).filter(|&v| g.global_of(v) >= 1).collect();
            let sub = g.induce_list(&keep).unwrap();
            sub.check().unwrap();
            sub.arc_count_global()
        });
        assert_eq!(out, vec![4, 4]);
    }
}
