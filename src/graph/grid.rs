//! 3D grid graphs with 6-neighbour connectivity.
//!
//! Vertex `(x, y, z)` is numbered `x + dx * (y + dy * z)`.

use super::{Gnum, Graph, gn};
use crate::graph_error::DgraphError;

/// Neighbours of grid vertex `v`, in increasing order.
pub fn grid_3d_neighbors(v: usize, dims: [usize; 3]) -> impl Iterator<Item = Gnum> {
    let [dx, dy, dz] = dims;
    let x = v % dx;
    let y = (v / dx) % dy;
    let z = v / (dx * dy);
    let plane = dx * dy;
    [
        (z > 0).then(|| v - plane),
        (y > 0).then(|| v - dx),
        (x > 0).then(|| v - 1),
        (x + 1 < dx).then(|| v + 1),
        (y + 1 < dy).then(|| v + dx),
        (z + 1 < dz).then(|| v + plane),
    ]
    .into_iter()
    .flatten()
    .map(gn)
}

/// Build the full `dx × dy × dz` grid as a centralized graph.
pub fn build_grid_3d(dx: usize, dy: usize, dz: usize) -> Result<Graph, DgraphError> {
    if dx == 0 || dy == 0 || dz == 0 {
        return Graph::new(vec![0], Vec::new(), None, None);
    }
    let n = dx * dy * dz;
    let mut vert_index = Vec::with_capacity(n + 1);
    vert_index.push(0);
    let mut edges = Vec::with_capacity(6 * n);
    for v in 0..n {
        edges.extend(grid_3d_neighbors(v, [dx, dy, dz]));
        vert_index.push(edges.len());
    }
    Graph::new(vert_index, edges, None, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corner_and_center_degrees() {
        let g = build_grid_3d(3, 3, 3).unwrap();
        g.check().unwrap();
        assert_eq!(g.degree(0), 3);
        assert_eq!(g.degree(13), 6);
        assert_eq!(g.arc_count(), 2 * 54);
    }

    #[test]
    fn flat_grid_is_a_path() {
        let g = build_grid_3d(4, 1, 1).unwrap();
        assert_eq!(g.neighbors(1), &[0, 2]);
        assert_eq!(g.degree_max, 2);
    }
}
