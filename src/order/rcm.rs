//! Reverse Cuthill-McKee ordering of centralized graphs.
//!
//! Frontier formulation: every breadth-first frontier is labelled in one go,
//! the next frontier is made of the unlabelled neighbours, each keyed by the
//! smallest label among its parents, sorted by (parent label, degree). Each
//! connected component starts from its own pseudo-peripheral root.

use hashbrown::HashMap;

use crate::graph::Graph;
use crate::separate::level::pseudo_peripheral;

/// Root refinement passes per component.
const ROOT_PASSES: usize = 8;

/// Vertices of `graph` in reverse Cuthill-McKee order.
pub fn rcm(graph: &Graph) -> Vec<usize> {
    let n = graph.vertex_count();
    let mut labels = vec![-1isize; n];
    let mut nv = 0isize;
    for start in 0..n {
        if labels[start] != -1 {
            continue;
        }
        if graph.degree(start) == 0 {
            labels[start] = nv;
            nv += 1;
            continue;
        }
        let root = pseudo_peripheral(graph, start, ROOT_PASSES);
        let mut frontier = vec![root];
        labels[root] = -2;
        while !frontier.is_empty() {
            for &v in &frontier {
                labels[v] = nv;
                nv += 1;
            }
            // unlabelled neighbours with their smallest parent label
            let mut parent: HashMap<usize, isize> = HashMap::new();
            for &u in &frontier {
                for &w in graph.neighbors(u) {
                    let w = w as usize;
                    if labels[w] == -1 {
                        parent
                            .entry(w)
                            .and_modify(|l| *l = (*l).min(labels[u]))
                            .or_insert(labels[u]);
                    }
                }
            }
            let mut next: Vec<(isize, usize, usize)> = parent
                .into_iter()
                .map(|(w, l)| (l, graph.degree(w), w))
                .collect();
            next.sort_unstable();
            frontier = next.into_iter().map(|t| t.2).collect();
            for &v in &frontier {
                labels[v] = -2;
            }
        }
    }
    let mut by_label: Vec<(isize, usize)> = labels.iter().enumerate().map(|(v, &l)| (l, v)).collect();
    by_label.sort_unstable_by_key(|&(l, _)| std::cmp::Reverse(l));
    by_label.into_iter().map(|(_, v)| v).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::grid::build_grid_3d;

    fn is_permutation(order: &[usize], n: usize) -> bool {
        let mut sorted = order.to_vec();
        sorted.sort_unstable();
        sorted == (0..n).collect::<Vec<_>>()
    }

    fn bandwidth(g: &Graph, order: &[usize]) -> usize {
        let mut pos = vec![0; order.len()];
        for (i, &v) in order.iter().enumerate() {
            pos[v] = i;
        }
        (0..g.vertex_count())
            .flat_map(|v| g.neighbors(v).iter().map(move |&w| (v, w as usize)))
            .map(|(v, w)| pos[v].abs_diff(pos[w]))
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn line_graph_is_reversed_from_an_end() {
        let g = build_grid_3d(5, 1, 1).unwrap();
        let order = rcm(&g);
        assert!(order == vec![0, 1, 2, 3, 4] || order == vec![4, 3, 2, 1, 0]);
    }

    #[test]
    fn empty_graph() {
        assert!(rcm(&Graph::default()).is_empty());
    }

    #[test]
    fn star_and_isolated_vertices() {
        let g = Graph::from_edge_list(7, &[(0, 1), (0, 2), (0, 3), (0, 4)]).unwrap();
        let order = rcm(&g);
        assert!(is_permutation(&order, 7));
    }

    #[test]
    fn scrambled_path_gets_unit_bandwidth() {
        let p = [5, 2, 7, 0, 3, 6, 1, 4];
        let edges: Vec<(usize, usize)> = p.windows(2).map(|w| (w[0], w[1])).collect();
        let g = Graph::from_edge_list(8, &edges).unwrap();
        let order = rcm(&g);
        assert!(is_permutation(&order, 8));
        assert_eq!(bandwidth(&g, &order), 1);
    }

    #[test]
    fn grid_order_is_a_permutation() {
        let g = build_grid_3d(6, 6, 2).unwrap();
        let order = rcm(&g);
        assert!(is_permutation(&order, 72));
        assert!(bandwidth(&g, &order) <= 36);
    }
}
