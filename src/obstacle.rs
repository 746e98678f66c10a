/// Obstacle polygon chain + binary space partition
///
/// Obstacle vertices live in a single append-only arena (`Vec<ObstacleVertex>`)
/// linked by `u32` indices instead of pointers, so the binary space partition
/// built over them in [`ObstacleSet::process`] can splice in new "split"
/// vertices without invalidating anything a caller is holding on to; every
/// reference collapses to an id comparison.

use crate::config::EPSILON;
use crate::vecmath::{dist_sq_point_segment, left_of, sqr, Vec2};

/// One node of a doubly-linked obstacle polygon chain.
#[derive(Debug, Clone, Copy)]
pub struct ObstacleVertex {
    pub point: Vec2,
    /// Unit direction of the outgoing edge, from this vertex to `next`.
    pub direction: Vec2,
    /// True iff the polygon is non-reflex at this vertex. Unconditionally
    /// true for 2-vertex degenerate "line" obstacles and for vertices
    /// inserted while splitting an edge during BSP construction.
    pub convex: bool,
    pub id: u32,
    pub previous: u32,
    pub next: u32,
}

/// One node of the obstacle binary space partition: a splitting edge
/// (represented by its first vertex id; `next` on that vertex gives the
/// second) plus the subtrees strictly left/right of its line.
#[derive(Debug)]
struct BspNode {
    splitter: u32,
    left: Option<Box<BspNode>>,
    right: Option<Box<BspNode>>,
}

/// Obstacle vertex arena plus the BSP tree built over it.
#[derive(Debug, Default)]
pub struct ObstacleSet {
    vertices: Vec<ObstacleVertex>,
    bsp_root: Option<Box<BspNode>>,
    processed: bool,
}

impl ObstacleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.vertices.clear();
        self.bsp_root = None;
        self.processed = false;
    }

    pub fn vertex(&self, id: u32) -> Option<&ObstacleVertex> {
        self.vertices.get(id as usize)
    }

    pub fn vertex_mut(&mut self, id: u32) -> Option<&mut ObstacleVertex> {
        self.vertices.get_mut(id as usize)
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn next_vertex_no(&self, id: u32) -> Option<u32> {
        self.vertex(id).map(|v| v.next)
    }

    pub fn prev_vertex_no(&self, id: u32) -> Option<u32> {
        self.vertex(id).map(|v| v.previous)
    }

    /// Append a polygon (or a 2-vertex degenerate "line" obstacle) as a new
    /// cycle in the chain. Returns the id of the first inserted vertex, or
    /// `None` if fewer than 2 vertices were supplied.
    pub fn add_obstacle(&mut self, verts: &[Vec2]) -> Option<u32> {
        if verts.len() < 2 {
            return None;
        }

        let n = verts.len();
        let base = self.vertices.len() as u32;

        for (i, &point) in verts.iter().enumerate() {
            let next_point = verts[(i + 1) % n];
            let direction = (next_point - point).normalize();
            let convex = if n == 2 {
                true
            } else {
                let prev_point = verts[(i + n - 1) % n];
                left_of(prev_point, point, next_point) >= 0.0
            };

            self.vertices.push(ObstacleVertex {
                point,
                direction,
                convex,
                id: base + i as u32,
                previous: base + ((i + n - 1) % n) as u32,
                next: base + ((i + 1) % n) as u32,
            });
        }

        Some(base)
    }

    /// Rebuild the BSP tree from the current vertex chain. May append new
    /// split vertices to the arena; existing ids remain valid.
    pub fn process(&mut self) {
        let edges: Vec<u32> = (0..self.vertices.len() as u32).collect();
        tracing::debug!(edge_count = edges.len(), "building obstacle BSP");
        self.bsp_root = Self::build(&mut self.vertices, edges);
        self.processed = true;
        tracing::debug!(
            vertex_count = self.vertices.len(),
            "obstacle BSP built (includes split vertices)"
        );
    }

    pub fn is_processed(&self) -> bool {
        self.processed
    }

    fn build(vertices: &mut Vec<ObstacleVertex>, edges: Vec<u32>) -> Option<Box<BspNode>> {
        if edges.is_empty() {
            return None;
        }

        let splitter = Self::pick_splitter(vertices, &edges);

        let i1 = splitter;
        let i2 = vertices[i1 as usize].next;
        let p1 = vertices[i1 as usize].point;
        let p2 = vertices[i2 as usize].point;
        let dir = vertices[i1 as usize].direction;

        let mut left_edges = Vec::new();
        let mut right_edges = Vec::new();

        for edge_id in edges {
            if edge_id == splitter {
                continue;
            }

            let j1 = edge_id;
            let j2 = vertices[j1 as usize].next;
            let q1 = vertices[j1 as usize].point;
            let q2 = vertices[j2 as usize].point;

            let l1 = left_of(p1, p2, q1);
            let l2 = left_of(p1, p2, q2);

            if l1 >= -EPSILON && l2 >= -EPSILON {
                left_edges.push(j1);
            } else if l1 <= EPSILON && l2 <= EPSILON {
                right_edges.push(j1);
            } else {
                let denom = dir.det(q1 - q2);
                let t = dir.det(q1 - p1) / denom;
                let split_point = q1 + (q2 - q1).scale(t);

                let new_id = vertices.len() as u32;
                vertices.push(ObstacleVertex {
                    point: split_point,
                    direction: vertices[j1 as usize].direction,
                    convex: true,
                    id: new_id,
                    previous: j1,
                    next: j2,
                });
                vertices[j1 as usize].next = new_id;
                vertices[j2 as usize].previous = new_id;

                if l1 >= 0.0 {
                    left_edges.push(j1);
                    right_edges.push(new_id);
                } else {
                    right_edges.push(j1);
                    left_edges.push(new_id);
                }
            }
        }

        Some(Box::new(BspNode {
            splitter,
            left: Self::build(vertices, left_edges),
            right: Self::build(vertices, right_edges),
        }))
    }

    /// Pick the edge minimizing `(max(L, R), min(L, R))` lexicographically,
    /// where `L`/`R` count how many of the remaining edges fall strictly
    /// left/right of each candidate's line (straddling edges count toward
    /// both). Abandons a candidate as soon as it can no longer beat the
    /// best found so far.
    fn pick_splitter(vertices: &[ObstacleVertex], edges: &[u32]) -> u32 {
        let mut best_id = edges[0];
        let mut best_key = (usize::MAX, usize::MAX);

        for &candidate in edges {
            let i1 = candidate;
            let i2 = vertices[i1 as usize].next;
            let p1 = vertices[i1 as usize].point;
            let p2 = vertices[i2 as usize].point;

            let mut left_count = 0usize;
            let mut right_count = 0usize;
            let mut abandoned = false;

            for &other in edges {
                if other == candidate {
                    continue;
                }
                let j1 = other;
                let j2 = vertices[j1 as usize].next;
                let q1 = vertices[j1 as usize].point;
                let q2 = vertices[j2 as usize].point;

                let l1 = left_of(p1, p2, q1);
                let l2 = left_of(p1, p2, q2);

                if l1 >= -EPSILON && l2 >= -EPSILON {
                    left_count += 1;
                } else if l1 <= EPSILON && l2 <= EPSILON {
                    right_count += 1;
                } else {
                    left_count += 1;
                    right_count += 1;
                }

                let running = (left_count.max(right_count), left_count.min(right_count));
                if running.0 > best_key.0 || (running.0 == best_key.0 && running.1 > best_key.1) {
                    abandoned = true;
                    break;
                }
            }

            if abandoned {
                continue;
            }

            let key = (left_count.max(right_count), left_count.min(right_count));
            if key < best_key {
                best_key = key;
                best_id = candidate;
            }
        }

        best_id
    }

    /// Whether the closed segment `q1`-`q2` clears every obstacle edge by
    /// at least `radius`. Only meaningful after [`ObstacleSet::process`]
    /// has run.
    pub fn query_visibility(&self, q1: Vec2, q2: Vec2, radius: f32) -> bool {
        Self::query_visibility_node(&self.vertices, self.bsp_root.as_deref(), q1, q2, radius)
    }

    fn query_visibility_node(
        vertices: &[ObstacleVertex],
        node: Option<&BspNode>,
        q1: Vec2,
        q2: Vec2,
        radius: f32,
    ) -> bool {
        let Some(node) = node else { return true };

        let o1 = vertices[node.splitter as usize].point;
        let o2 = vertices[vertices[node.splitter as usize].next as usize].point;

        let q1_left = left_of(o1, o2, q1);
        let q2_left = left_of(o1, o2, q2);
        let inv_len_sq = 1.0 / (o2 - o1).abs_sq();

        if q1_left >= 0.0 && q2_left >= 0.0 {
            Self::query_visibility_node(vertices, node.left.as_deref(), q1, q2, radius)
                && ((sqr(q1_left) * inv_len_sq >= sqr(radius) && sqr(q2_left) * inv_len_sq >= sqr(radius))
                    || Self::query_visibility_node(vertices, node.right.as_deref(), q1, q2, radius))
        } else if q1_left <= 0.0 && q2_left <= 0.0 {
            Self::query_visibility_node(vertices, node.right.as_deref(), q1, q2, radius)
                && ((sqr(q1_left) * inv_len_sq >= sqr(radius) && sqr(q2_left) * inv_len_sq >= sqr(radius))
                    || Self::query_visibility_node(vertices, node.left.as_deref(), q1, q2, radius))
        } else if q1_left >= 0.0 && q2_left <= 0.0 {
            // q1q2 straddles the splitter line with q1 on the left: the
            // segment passes around the splitter's own edge, not through it.
            Self::query_visibility_node(vertices, node.left.as_deref(), q1, q2, radius)
                && Self::query_visibility_node(vertices, node.right.as_deref(), q1, q2, radius)
        } else {
            // q1 right, q2 left: the splitter edge itself may lie between
            // q1 and q2.
            let p1_left = left_of(q1, q2, o1);
            let p2_left = left_of(q1, q2, o2);
            let inv_len_sq_q = 1.0 / (q2 - q1).abs_sq();

            p1_left * p2_left >= 0.0
                && sqr(p1_left) * inv_len_sq_q >= sqr(radius)
                && sqr(p2_left) * inv_len_sq_q >= sqr(radius)
                && Self::query_visibility_node(vertices, node.left.as_deref(), q1, q2, radius)
                && Self::query_visibility_node(vertices, node.right.as_deref(), q1, q2, radius)
        }
    }

    /// Visit every obstacle edge whose squared point-to-segment distance
    /// from `position` is below `range_sq`, which is fixed for the whole
    /// query and never shrunk (unlike the agent k-D tree's bounded query,
    /// the obstacle-neighbor list has no size cap).
    pub fn query_obstacle_neighbors(
        &self,
        position: Vec2,
        range_sq: f32,
        on_candidate: &mut dyn FnMut(u32, f32),
    ) {
        Self::query_obstacle_node(&self.vertices, self.bsp_root.as_deref(), position, range_sq, on_candidate);
    }

    fn query_obstacle_node(
        vertices: &[ObstacleVertex],
        node: Option<&BspNode>,
        position: Vec2,
        range_sq: f32,
        on_candidate: &mut dyn FnMut(u32, f32),
    ) {
        let Some(node) = node else { return };

        let e1 = vertices[node.splitter as usize].point;
        let e2 = vertices[vertices[node.splitter as usize].next as usize].point;

        let agent_left_of_line = left_of(e1, e2, position);
        let near = if agent_left_of_line >= 0.0 { &node.left } else { &node.right };
        Self::query_obstacle_node(vertices, near.as_deref(), position, range_sq, on_candidate);

        let dist_sq_line = sqr(agent_left_of_line) / (e2 - e1).abs_sq();
        if dist_sq_line < range_sq {
            if agent_left_of_line < 0.0 {
                on_candidate(node.splitter, dist_sq_point_segment(e1, e2, position));
            }
            let far = if agent_left_of_line >= 0.0 { &node.right } else { &node.left };
            Self::query_obstacle_node(vertices, far.as_deref(), position, range_sq, on_candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_obstacle_rejects_degenerate_input() {
        let mut obstacles = ObstacleSet::new();
        assert_eq!(obstacles.add_obstacle(&[Vec2::new(0.0, 0.0)]), None);
    }

    #[test]
    fn add_obstacle_forms_a_cycle() {
        let mut obstacles = ObstacleSet::new();
        let verts = [
            Vec2::new(-5.0, -5.0),
            Vec2::new(-5.0, 5.0),
            Vec2::new(5.0, 5.0),
            Vec2::new(5.0, -5.0),
        ];
        let first = obstacles.add_obstacle(&verts).unwrap();
        for i in 0..4u32 {
            let v = obstacles.vertex(first + i).unwrap();
            assert_eq!(v.next, first + (i + 1) % 4);
            assert_eq!(v.previous, first + (i + 3) % 4);
            assert!(v.convex);
        }
    }

    #[test]
    fn two_vertex_obstacle_is_unconditionally_convex() {
        let mut obstacles = ObstacleSet::new();
        let first = obstacles
            .add_obstacle(&[Vec2::new(5.0, -1.0), Vec2::new(5.0, 1.0)])
            .unwrap();
        assert!(obstacles.vertex(first).unwrap().convex);
        assert!(obstacles.vertex(first + 1).unwrap().convex);
    }

    #[test]
    fn visibility_blocked_by_square_but_clear_above_it() {
        let mut obstacles = ObstacleSet::new();
        obstacles
            .add_obstacle(&[
                Vec2::new(-5.0, -5.0),
                Vec2::new(-5.0, 5.0),
                Vec2::new(5.0, 5.0),
                Vec2::new(5.0, -5.0),
            ])
            .unwrap();
        obstacles.process();

        assert!(!obstacles.query_visibility(Vec2::new(-10.0, 0.0), Vec2::new(10.0, 0.0), 0.0));
        assert!(obstacles.query_visibility(Vec2::new(-10.0, 10.0), Vec2::new(10.0, 10.0), 0.0));
    }

    #[test]
    fn chain_integrity_survives_bsp_splits() {
        let mut obstacles = ObstacleSet::new();
        obstacles
            .add_obstacle(&[
                Vec2::new(-5.0, -5.0),
                Vec2::new(-5.0, 5.0),
                Vec2::new(5.0, 5.0),
                Vec2::new(5.0, -5.0),
            ])
            .unwrap();
        obstacles.process();

        for id in 0..obstacles.vertex_count() as u32 {
            let v = *obstacles.vertex(id).unwrap();
            let next = *obstacles.vertex(v.next).unwrap();
            assert_eq!(next.previous, id);
        }
    }

    #[test]
    fn obstacle_neighbor_query_finds_nearby_edges_only() {
        let mut obstacles = ObstacleSet::new();
        obstacles
            .add_obstacle(&[
                Vec2::new(-5.0, -5.0),
                Vec2::new(-5.0, 5.0),
                Vec2::new(5.0, 5.0),
                Vec2::new(5.0, -5.0),
            ])
            .unwrap();
        obstacles.process();

        let mut hits = Vec::new();
        obstacles.query_obstacle_neighbors(Vec2::new(0.0, 6.0), 4.0, &mut |id, d| {
            hits.push((id, d));
        });

        // Only the top edge (y = 5) is within range 2.0 of (0, 6); the
        // other three sides are each 9+ units away and must not appear.
        assert!(!hits.is_empty());
        for (id, d) in &hits {
            let v = obstacles.vertex(*id).unwrap();
            assert!((v.point.y - 5.0).abs() < 1e-3 || obstacles.vertex(v.next).unwrap().point.y == 5.0);
            assert!(*d <= 4.0);
        }
    }
}
