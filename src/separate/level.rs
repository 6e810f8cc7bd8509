//! Level-structure vertex separator for centralized graphs.
//!
//! A breadth-first level structure is grown from a pseudo-peripheral root;
//! the level that best balances the loads on either side becomes the
//! separator. Disconnected graphs are split along components instead, with an
//! empty separator.

use std::collections::VecDeque;

use crate::config::LevelParams;
use crate::graph::{Gnum, Graph};

const UNSEEN: usize = usize::MAX;

/// Breadth-first levels from `root`; returns visit order and height.
/// Vertices not reachable keep `UNSEEN`.
pub(crate) fn bfs_levels(graph: &Graph, root: usize, level: &mut [usize]) -> (Vec<usize>, usize) {
    level.fill(UNSEEN);
    let mut order = Vec::new();
    let mut queue = VecDeque::from([root]);
    level[root] = 0;
    let mut height = 0;
    while let Some(v) = queue.pop_front() {
        order.push(v);
        height = height.max(level[v]);
        for &w in graph.neighbors(v) {
            let w = w as usize;
            if level[w] == UNSEEN {
                level[w] = level[v] + 1;
                queue.push_back(w);
            }
        }
    }
    (order, height)
}

/// Pseudo-peripheral vertex of the component of `start`: repeatedly jump to
/// a minimum-degree vertex of the deepest level while the height grows.
pub(crate) fn pseudo_peripheral(graph: &Graph, start: usize, passes: usize) -> usize {
    let mut level = vec![UNSEEN; graph.vertex_count()];
    let mut root = start;
    let (mut order, mut height) = bfs_levels(graph, root, &mut level);
    for _ in 0..passes {
        let Some(cand) = order
            .iter()
            .copied()
            .filter(|&v| level[v] == height)
            .min_by_key(|&v| graph.degree(v))
        else {
            break;
        };
        let (o, h) = bfs_levels(graph, cand, &mut level);
        if h <= height {
            break;
        }
        root = cand;
        order = o;
        height = h;
    }
    root
}

/// Connected components, numbered in order of their smallest vertex.
fn components(graph: &Graph) -> (Vec<usize>, usize) {
    let n = graph.vertex_count();
    let mut comp = vec![UNSEEN; n];
    let mut count = 0;
    let mut stack = Vec::new();
    for s in 0..n {
        if comp[s] != UNSEEN {
            continue;
        }
        comp[s] = count;
        stack.push(s);
        while let Some(v) = stack.pop() {
            for &w in graph.neighbors(v) {
                let w = w as usize;
                if comp[w] == UNSEEN {
                    comp[w] = count;
                    stack.push(w);
                }
            }
        }
        count += 1;
    }
    (comp, count)
}

/// Move separator vertices that touch only one side into that side, or into
/// the lighter side when they touch neither. Loads are kept up to date.
pub(crate) fn thin(graph: &Graph, parts: &mut [u8], loads: &mut [Gnum; 3]) -> usize {
    let mut moved = 0;
    loop {
        let mut changed = false;
        for s in 0..graph.vertex_count() {
            if parts[s] != 2 {
                continue;
            }
            let mut touches = [false; 2];
            for &w in graph.neighbors(s) {
                match parts[w as usize] {
                    p @ (0 | 1) => touches[p as usize] = true,
                    _ => {}
                }
            }
            let to = match touches {
                [true, true] => continue,
                [false, false] => u8::from(loads[1] < loads[0]),
                [true, false] => 0,
                [false, true] => 1,
            };
            let vl = graph.vload(s);
            parts[s] = to;
            loads[2] -= vl;
            loads[to as usize] += vl;
            moved += 1;
            changed = true;
        }
        if !changed {
            return moved;
        }
    }
}

/// Part of every vertex: 0, 1, or 2 for the separator. Returns all zeros
/// when the graph cannot be split into two non-empty parts.
pub fn separate(graph: &Graph, params: &LevelParams) -> Vec<u8> {
    let n = graph.vertex_count();
    let mut parts = vec![0u8; n];
    if n < 2 {
        return parts;
    }
    let total = graph.vert_load_sum;

    let (comp, ncomp) = components(graph);
    if ncomp > 1 {
        let mut comp_load = vec![0 as Gnum; ncomp];
        for v in 0..n {
            comp_load[comp[v]] += graph.vload(v);
        }
        let mut side = vec![1u8; ncomp];
        let mut acc = 0;
        for c in 0..ncomp - 1 {
            if 2 * acc < total {
                side[c] = 0;
                acc += comp_load[c];
            }
        }
        for v in 0..n {
            parts[v] = side[comp[v]];
        }
        return parts;
    }

    let start = (0..n).min_by_key(|&v| graph.degree(v)).unwrap_or(0);
    let root = pseudo_peripheral(graph, start, params.root_passes);
    let mut level = vec![UNSEEN; n];
    let (_, height) = bfs_levels(graph, root, &mut level);
    if height < 2 {
        return parts;
    }
    let mut level_load = vec![0 as Gnum; height + 1];
    for v in 0..n {
        level_load[level[v]] += graph.vload(v);
    }
    // Separator level in 1..height keeps both sides non-empty.
    let mut below = level_load[0];
    let mut best = (Gnum::MAX, 1);
    for l in 1..height {
        let above = total - below - level_load[l];
        let dlt = (below - above).abs();
        if dlt < best.0 {
            best = (dlt, l);
        }
        below += level_load[l];
    }
    let sep = best.1;
    let mut loads = [0 as Gnum; 3];
    for v in 0..n {
        parts[v] = match level[v].cmp(&sep) {
            std::cmp::Ordering::Less => 0,
            std::cmp::Ordering::Equal => 2,
            std::cmp::Ordering::Greater => 1,
        };
        loads[parts[v] as usize] += graph.vload(v);
    }
    if params.thin {
        thin(graph, &mut parts, &mut loads);
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::grid::build_grid_3d;

    fn assert_separates(g: &Graph, parts: &[u8]) {
        for v in 0..g.vertex_count() {
            for &w in g.neighbors(v) {
                let pair = (parts[v], parts[w as usize]);
                assert!(pair != (0, 1) && pair != (1, 0), "arc {v}-{w} crosses");
            }
        }
    }

    #[test]
    fn path_splits_in_the_middle() {
        let g = build_grid_3d(7, 1, 1).unwrap();
        let parts = separate(&g, &LevelParams::default());
        assert_eq!(parts, vec![0, 0, 0, 2, 1, 1, 1]);
    }

    #[test]
    fn grid_separator_is_a_plane() {
        let g = build_grid_3d(5, 5, 5).unwrap();
        let parts = separate(&g, &LevelParams::default());
        assert_separates(&g, &parts);
        let count = |p| parts.iter().filter(|&&x| x == p).count();
        assert!(count(0) > 0 && count(1) > 0);
        assert!(count(2) < 40, "separator too large: {}", count(2));
    }

    #[test]
    fn disconnected_graph_splits_along_components() {
        let g = Graph::from_edge_list(6, &[(0, 1), (1, 2), (3, 4), (4, 5)]).unwrap();
        let parts = separate(&g, &LevelParams::default());
        assert_eq!(parts, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn clique_is_a_leaf() {
        let g = Graph::from_edge_list(3, &[(0, 1), (1, 2), (0, 2)]).unwrap();
        assert_eq!(separate(&g, &LevelParams::default()), vec![0, 0, 0]);
    }

    #[test]
    fn thinning_releases_one_sided_vertices() {
        // star centre 0 with leaves 1..4; everything in the separator but leaf 1
        let g = Graph::from_edge_list(5, &[(0, 1), (0, 2), (0, 3), (0, 4)]).unwrap();
        let mut parts = vec![2, 0, 2, 2, 2];
        let mut loads = [1, 0, 4];
        thin(&g, &mut parts, &mut loads);
        assert_separates(&g, &parts);
        assert_eq!(loads.iter().sum::<Gnum>(), 5);
        assert!(parts.iter().filter(|&&p| p == 2).count() <= 1);
    }
}
