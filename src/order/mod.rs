//! Distributed orderings: column-block tree plus per-leaf vertex lists.
//!
//! Each process records the nodes and leaves it computed. Node identifiers
//! pair the rank (in the communicator the ordering started on) of the
//! process that created the node with a per-process counter, so they are
//! unique without coordination. [`DistOrder::gather`] assembles the
//! permutation, its inverse and the tree on one process.

pub mod nested;
pub mod rcm;

use hashbrown::HashMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

pub use nested::order_nd;

use crate::algs::communicator::Communicator;
use crate::algs::wire::{GnumReader, GnumWriter};
use crate::config::OrderStrategy;
use crate::graph::{Gnum, Graph, gn};
use crate::graph_error::{CommResultExt, DgraphError, WireResultExt, try_vec};

/// Identifier of an ordering node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CblkId {
    pub proc: usize,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CblkKind {
    /// Vertices numbered by a sequential ordering.
    Leaf,
    /// Nested-dissection node with two parts and, when `children == 3`, a separator.
    Dissection { children: u8 },
}

/// One column block of the elimination tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cblk {
    pub id: CblkId,
    pub parent: Option<CblkId>,
    /// Position under the parent: 0 and 1 for the parts, 2 for the separator.
    pub slot: u8,
    /// First ordering number of the block.
    pub offset: Gnum,
    pub count: Gnum,
    pub kind: CblkKind,
}

/// Where a node goes in the tree and in the numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodePlace {
    pub parent: Option<CblkId>,
    pub slot: u8,
    pub offset: Gnum,
    pub count: Gnum,
}

impl NodePlace {
    pub fn root(count: Gnum) -> Self {
        Self {
            parent: None,
            slot: 0,
            offset: 0,
            count,
        }
    }
}

/// Vertices of a leaf, by original number, in elimination order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafOrder {
    pub offset: Gnum,
    pub vertices: Vec<Gnum>,
}

/// Sequential ordering used for leaves, separators and single-process groups.
pub trait SequentialOrderer {
    /// Local vertices of `graph` in elimination order.
    fn order(&self, graph: &Graph) -> Vec<usize>;
}

impl SequentialOrderer for OrderStrategy {
    fn order(&self, graph: &Graph) -> Vec<usize> {
        match self {
            OrderStrategy::Rcm => rcm::rcm(graph),
            OrderStrategy::Natural => (0..graph.vertex_count()).collect(),
        }
    }
}

/// This process's share of a distributed ordering.
#[derive(Debug, Clone, Default)]
pub struct DistOrder {
    proc: usize,
    next: usize,
    vertex_count: Gnum,
    nodes: Vec<Cblk>,
    leaves: Vec<LeafOrder>,
}

impl DistOrder {
    /// Empty ordering of `vertex_count` vertices, owned by process `proc`.
    pub fn new(proc: usize, vertex_count: Gnum) -> Self {
        Self {
            proc,
            vertex_count,
            ..Self::default()
        }
    }

    pub fn vertex_count(&self) -> Gnum {
        self.vertex_count
    }

    pub fn nodes(&self) -> &[Cblk] {
        &self.nodes
    }

    pub fn leaves(&self) -> &[LeafOrder] {
        &self.leaves
    }

    pub(crate) fn new_id(&mut self) -> CblkId {
        let id = CblkId {
            proc: self.proc,
            index: self.next,
        };
        self.next += 1;
        id
    }

    pub(crate) fn push_node(&mut self, id: CblkId, place: NodePlace, kind: CblkKind) {
        self.nodes.push(Cblk {
            id,
            parent: place.parent,
            slot: place.slot,
            offset: place.offset,
            count: place.count,
            kind,
        });
    }

    /// Order `graph` sequentially as leaf `place`; vertices are recorded by label.
    pub fn order_sequential(
        &mut self,
        graph: &Graph,
        place: NodePlace,
        strategy: &impl SequentialOrderer,
    ) -> Result<CblkId, DgraphError> {
        if gn(graph.vertex_count()) != place.count {
            return Err(DgraphError::InvalidParameter(format!(
                "leaf of {} vertices for a block of {}",
                graph.vertex_count(),
                place.count
            )));
        }
        let id = self.new_id();
        let vertices = strategy.order(graph).into_iter().map(|v| graph.label(v)).collect();
        self.push_node(id, place, CblkKind::Leaf);
        self.leaves.push(LeafOrder {
            offset: place.offset,
            vertices,
        });
        Ok(id)
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = GnumWriter::default();
        w.put(gn(self.nodes.len()));
        for c in &self.nodes {
            w.put(gn(c.id.proc));
            w.put(gn(c.id.index));
            match c.parent {
                Some(p) => w.put_all(&[1, gn(p.proc), gn(p.index)]),
                None => w.put_all(&[0, 0, 0]),
            }
            w.put(Gnum::from(c.slot));
            w.put(c.offset);
            w.put(c.count);
            w.put(match c.kind {
                CblkKind::Leaf => 0,
                CblkKind::Dissection { children } => Gnum::from(children),
            });
        }
        w.put(gn(self.leaves.len()));
        for l in &self.leaves {
            w.put(l.offset);
            w.put(gn(l.vertices.len()));
            w.put_all(&l.vertices);
        }
        w.into_bytes()
    }

    fn decode(bytes: &[u8], nodes: &mut Vec<Cblk>, leaves: &mut Vec<LeafOrder>) -> Result<(), DgraphError> {
        const OP: &str = "dorder_gather";
        let mut r = GnumReader::new(bytes);
        let bad = || DgraphError::internal(OP, 2);
        let small = |g: Gnum| usize::try_from(g).map_err(|_| bad());
        for _ in 0..r.next_len().decoded(OP)? {
            let mut f = [0 as Gnum; 9];
            for x in &mut f {
                *x = r.next_gnum().decoded(OP)?;
            }
            nodes.push(Cblk {
                id: CblkId {
                    proc: small(f[0])?,
                    index: small(f[1])?,
                },
                parent: (f[2] != 0)
                    .then(|| Ok::<_, DgraphError>(CblkId {
                        proc: small(f[3])?,
                        index: small(f[4])?,
                    }))
                    .transpose()?,
                slot: u8::try_from(f[5]).map_err(|_| bad())?,
                offset: f[6],
                count: f[7],
                kind: match f[8] {
                    0 => CblkKind::Leaf,
                    c @ (2 | 3) => CblkKind::Dissection { children: c as u8 },
                    _ => return Err(bad()),
                },
            });
        }
        for _ in 0..r.next_len().decoded(OP)? {
            let offset = r.next_gnum().decoded(OP)?;
            let len = r.next_len().decoded(OP)?;
            let mut vertices = Vec::new();
            r.read_into(len, &mut vertices).decoded(OP)?;
            leaves.push(LeafOrder { offset, vertices });
        }
        Ok(())
    }

    /// Collective over the communicator the ordering was computed on: the
    /// complete ordering on `root`, `None` elsewhere.
    pub fn gather<C: Communicator>(&self, comm: &C, root: usize) -> Result<Option<Ordering>, DgraphError> {
        const OP: &str = "dorder_gather";
        let Some(all) = comm.gather(root, &self.encode()).at(OP, 1)? else {
            return Ok(None);
        };
        let mut nodes = Vec::new();
        let mut leaves = Vec::new();
        for bytes in &all {
            Self::decode(bytes, &mut nodes, &mut leaves)?;
        }
        Ordering::assemble(self.vertex_count, nodes, leaves).map(Some)
    }
}

/// Node of a gathered elimination tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeNode {
    pub offset: Gnum,
    pub count: Gnum,
    /// Index of the parent in [`Ordering::tree`].
    pub parent: Option<usize>,
    pub slot: u8,
    pub kind: CblkKind,
}

/// A complete ordering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    /// Ordering number of every vertex.
    pub perm: Vec<Gnum>,
    /// Vertex of every ordering number.
    pub inverse: Vec<Gnum>,
    /// Nodes sorted by offset, parents before children.
    pub tree: Vec<TreeNode>,
}

impl Ordering {
    fn assemble(n: Gnum, mut nodes: Vec<Cblk>, leaves: Vec<LeafOrder>) -> Result<Ordering, DgraphError> {
        const OP: &str = "dorder_assemble";
        let len = usize::try_from(n).map_err(|_| DgraphError::internal(OP, 1))?;
        let mut perm = try_vec("ordering", len, -1 as Gnum)?;
        let mut inverse = try_vec("inverse ordering", len, -1 as Gnum)?;
        for leaf in &leaves {
            for (i, &v) in leaf.vertices.iter().enumerate() {
                let pos = leaf.offset + gn(i);
                let (Ok(vi), Ok(pi)) = (usize::try_from(v), usize::try_from(pos)) else {
                    return Err(DgraphError::internal(OP, 2));
                };
                if vi >= len || pi >= len || perm[vi] >= 0 || inverse[pi] >= 0 {
                    return Err(DgraphError::internal(OP, 3));
                }
                perm[vi] = pos;
                inverse[pi] = v;
            }
        }
        if perm.iter().any(|&p| p < 0) {
            return Err(DgraphError::internal(OP, 4));
        }
        if nodes.iter().map(|c| c.id).duplicates().next().is_some() {
            return Err(DgraphError::internal(OP, 6));
        }
        nodes.sort_by_key(|c| (c.offset, std::cmp::Reverse(c.count), c.id));
        let index: HashMap<CblkId, usize> = nodes.iter().enumerate().map(|(i, c)| (c.id, i)).collect();
        let tree = nodes
            .iter()
            .map(|c| -> Result<TreeNode, DgraphError> {
                let parent = match c.parent {
                    Some(p) => Some(*index.get(&p).ok_or_else(|| DgraphError::internal(OP, 5))?),
                    None => None,
                };
                Ok(TreeNode {
                    offset: c.offset,
                    count: c.count,
                    parent,
                    slot: c.slot,
                    kind: c.kind,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Ordering { perm, inverse, tree })
    }

    /// Every child range lies inside its parent's, separators at the top end.
    pub fn check_tree(&self) -> Result<(), DgraphError> {
        const OP: &str = "dorder_check";
        for node in &self.tree {
            let Some(p) = node.parent else { continue };
            let parent = self.tree.get(p).ok_or_else(|| DgraphError::internal(OP, 1))?;
            let inside = node.offset >= parent.offset && node.offset + node.count <= parent.offset + parent.count;
            let top = node.slot != 2 || node.offset + node.count == parent.offset + parent.count;
            if !inside || !top {
                return Err(DgraphError::internal(OP, 2));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::ThreadComm;
    use crate::graph::grid::build_grid_3d;

    #[test]
    fn sequential_leaf_records_labels() {
        let g = build_grid_3d(4, 1, 1).unwrap().with_labels(vec![10, 11, 12, 13]).unwrap();
        let mut o = DistOrder::new(0, 14);
        o.order_sequential(&g, NodePlace::root(4), &OrderStrategy::Natural).unwrap();
        assert_eq!(o.leaves()[0].vertices, vec![10, 11, 12, 13]);
        assert!(o.order_sequential(&g, NodePlace::root(5), &OrderStrategy::Natural).is_err());
    }

    #[test]
    fn gather_assembles_split_leaves() {
        let out = ThreadComm::run(2, |comm| {
            let mut o = DistOrder::new(comm.rank(), 4);
            let root = CblkId { proc: 0, index: 0 };
            if comm.rank() == 0 {
                let id = o.new_id();
                o.push_node(id, NodePlace::root(4), CblkKind::Dissection { children: 2 });
                let g = build_grid_3d(2, 1, 1).unwrap().with_labels(vec![3, 1]).unwrap();
                let place = NodePlace { parent: Some(root), slot: 0, offset: 0, count: 2 };
                o.order_sequential(&g, place, &OrderStrategy::Natural).unwrap();
            } else {
                let g = build_grid_3d(2, 1, 1).unwrap().with_labels(vec![0, 2]).unwrap();
                let place = NodePlace { parent: Some(root), slot: 1, offset: 2, count: 2 };
                o.order_sequential(&g, place, &OrderStrategy::Natural).unwrap();
            }
            o.gather(&comm, 0).unwrap()
        });
        let ord = out[0].clone().unwrap();
        assert!(out[1].is_none());
        assert_eq!(ord.inverse, vec![3, 1, 0, 2]);
        assert_eq!(ord.perm, vec![2, 1, 3, 0]);
        assert_eq!(ord.tree.len(), 3);
        assert_eq!(ord.tree[0].parent, None);
        assert!(ord.tree[1..].iter().all(|t| t.parent == Some(0)));
        ord.check_tree().unwrap();
    }
}
