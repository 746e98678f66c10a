/// Agent k-D tree: rebuilt every tick, used for bounded nearest-neighbor
/// queries during ORCA line construction.
///
/// Generalizes the point-median `KDNode::{Leaf, Branch}` shape used
/// elsewhere in this crate's ancestry to a bbox-annotated range tree, since
/// neighbor queries here need bbox-distance pruning rather than a simple
/// axis comparison at each branch.

use crate::config::MAX_LEAF_SIZE;
use crate::vecmath::Vec2;

struct Node {
    begin: usize,
    end: usize,
    left: usize,
    right: usize,
    is_leaf: bool,
    min: Vec2,
    max: Vec2,
}

/// Flat array of `2N` nodes over a permuted array of agent ids, rebuilt
/// from scratch every tick.
pub struct AgentKdTree {
    indices: Vec<u32>,
    nodes: Vec<Node>,
}

impl AgentKdTree {
    /// Build a tree over `positions`, indexed by agent id (i.e.
    /// `positions[id]` is agent `id`'s current position).
    pub fn build(positions: &[Vec2]) -> Self {
        let n = positions.len();
        let mut indices: Vec<u32> = (0..n as u32).collect();

        if n == 0 {
            return Self { indices, nodes: Vec::new() };
        }

        let mut nodes = Vec::with_capacity(2 * n);
        for _ in 0..2 * n {
            nodes.push(Node {
                begin: 0,
                end: 0,
                left: 0,
                right: 0,
                is_leaf: false,
                min: Vec2::ZERO,
                max: Vec2::ZERO,
            });
        }

        Self::build_recursive(0, &mut indices, positions, 0, n, &mut nodes);
        Self { indices, nodes }
    }

    fn build_recursive(
        node_index: usize,
        indices: &mut [u32],
        positions: &[Vec2],
        begin: usize,
        end: usize,
        nodes: &mut [Node],
    ) {
        let mut min = positions[indices[begin] as usize];
        let mut max = min;
        for &id in &indices[begin + 1..end] {
            let p = positions[id as usize];
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }

        nodes[node_index].begin = begin;
        nodes[node_index].end = end;
        nodes[node_index].min = min;
        nodes[node_index].max = max;

        if end - begin <= MAX_LEAF_SIZE {
            nodes[node_index].is_leaf = true;
            return;
        }

        let axis_x = (max.x - min.x) > (max.y - min.y);
        let split = if axis_x { 0.5 * (min.x + max.x) } else { 0.5 * (min.y + max.y) };
        let axis_value = |id: u32| {
            let p = positions[id as usize];
            if axis_x { p.x } else { p.y }
        };

        let mut lo = begin;
        let mut hi = end;
        while lo < hi {
            while lo < hi && axis_value(indices[lo]) < split {
                lo += 1;
            }
            while hi > lo && axis_value(indices[hi - 1]) >= split {
                hi -= 1;
            }
            if lo < hi {
                indices.swap(lo, hi - 1);
                lo += 1;
                hi -= 1;
            }
        }

        let mut left_size = lo - begin;
        if left_size == 0 {
            left_size = 1;
        } else if left_size == end - begin {
            left_size = end - begin - 1;
        }

        let left_node = node_index + 1;
        let right_node = node_index + 2 * left_size;
        nodes[node_index].left = left_node;
        nodes[node_index].right = right_node;

        Self::build_recursive(left_node, indices, positions, begin, begin + left_size, nodes);
        Self::build_recursive(right_node, indices, positions, begin + left_size, end, nodes);
    }

    /// Visit every agent within the (possibly shrinking) squared range of
    /// `query_pos`, excluding `exclude_id`. `on_candidate(id, dist_sq,
    /// &mut range_sq)` is the caller's bounded-neighbor-list insertion
    /// logic; it may tighten `range_sq` once its list is full.
    pub fn query_agent_neighbors(
        &self,
        positions: &[Vec2],
        query_pos: Vec2,
        exclude_id: u32,
        range_sq: &mut f32,
        on_candidate: &mut dyn FnMut(u32, f32, &mut f32),
    ) {
        if self.nodes.is_empty() {
            return;
        }
        self.query_node(0, positions, query_pos, exclude_id, range_sq, on_candidate);
    }

    fn query_node(
        &self,
        node_index: usize,
        positions: &[Vec2],
        query_pos: Vec2,
        exclude_id: u32,
        range_sq: &mut f32,
        on_candidate: &mut dyn FnMut(u32, f32, &mut f32),
    ) {
        let node = &self.nodes[node_index];

        if node.is_leaf {
            for &id in &self.indices[node.begin..node.end] {
                if id == exclude_id {
                    continue;
                }
                let d = positions[id as usize].distance_sq(query_pos);
                if d < *range_sq {
                    on_candidate(id, d, range_sq);
                }
            }
            return;
        }

        let left = &self.nodes[node.left];
        let right = &self.nodes[node.right];
        let dist_left = bbox_dist_sq(query_pos, left.min, left.max);
        let dist_right = bbox_dist_sq(query_pos, right.min, right.max);

        if dist_left < dist_right {
            if dist_left < *range_sq {
                self.query_node(node.left, positions, query_pos, exclude_id, range_sq, on_candidate);
            }
            if dist_right < *range_sq {
                self.query_node(node.right, positions, query_pos, exclude_id, range_sq, on_candidate);
            }
        } else {
            if dist_right < *range_sq {
                self.query_node(node.right, positions, query_pos, exclude_id, range_sq, on_candidate);
            }
            if dist_left < *range_sq {
                self.query_node(node.left, positions, query_pos, exclude_id, range_sq, on_candidate);
            }
        }
    }
}

#[inline]
fn bbox_dist_sq(p: Vec2, min: Vec2, max: Vec2) -> f32 {
    let dx = (min.x - p.x).max(0.0).max(p.x - max.x);
    let dy = (min.y - p.y).max(0.0).max(p.y - max.y);
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearest_within_range() {
        let positions = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(-1.0, 0.0),
        ];
        let tree = AgentKdTree::build(&positions);

        let mut range_sq = 100.0_f32;
        let mut found = Vec::new();
        tree.query_agent_neighbors(&positions, Vec2::new(0.0, 0.0), 0, &mut range_sq, &mut |id, d, _| {
            found.push((id, d));
        });

        found.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        assert_eq!(found.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![1, 3, 2]);
    }

    #[test]
    fn respects_shrinking_range() {
        let positions = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(3.0, 0.0),
        ];
        let tree = AgentKdTree::build(&positions);

        // Bound the found set to exactly 1 neighbor by shrinking range_sq
        // to the first accepted candidate's distance.
        let mut range_sq = 100.0_f32;
        let mut found = Vec::new();
        tree.query_agent_neighbors(&positions, Vec2::new(0.0, 0.0), 0, &mut range_sq, &mut |id, d, range| {
            if found.is_empty() {
                found.push((id, d));
                *range = d;
            }
        });

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, 1);
    }

    #[test]
    fn handles_many_agents_without_panicking() {
        let positions: Vec<Vec2> = (0..500).map(|i| Vec2::new(i as f32, (i * 7 % 13) as f32)).collect();
        let tree = AgentKdTree::build(&positions);
        let mut range_sq = f32::MAX;
        let mut count = 0;
        tree.query_agent_neighbors(&positions, Vec2::new(250.0, 5.0), 250, &mut range_sq, &mut |_, _, _| {
            count += 1;
        });
        assert_eq!(count, 499);
    }
}
