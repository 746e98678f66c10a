/// Per-agent state and the ORCA half-plane construction that turns a set of
/// nearby agents and obstacle edges into a feasible-velocity query, solved
/// by [`crate::linear_program`].
///
/// Generalizes the brute-force sampled-velocity solver this crate's
/// ancestry used (`Agent::compute_new_velocity` scanning candidate angles
/// and penalizing time-to-collision) into the reciprocal half-plane
/// construction the rest of this module documents.

use crate::config::{AgentDefaults, EPSILON};
use crate::kdtree::AgentKdTree;
use crate::linear_program::{lp2, lp3, Line};
use crate::obstacle::ObstacleSet;
use crate::vecmath::{sqr, Vec2};

/// A distance-keyed neighbor list, kept in ascending order by insertion
/// sort. `cap` is `Some(max_neighbors)` for the agent-neighbor list and
/// `None` for the (unbounded) obstacle-neighbor list.
#[derive(Debug, Clone, Default)]
struct NeighborList {
    entries: Vec<(f32, u32)>,
    cap: Option<usize>,
}

impl NeighborList {
    fn new(cap: Option<usize>) -> Self {
        Self { entries: Vec::new(), cap }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn iter(&self) -> impl Iterator<Item = (f32, u32)> + '_ {
        self.entries.iter().copied()
    }

    /// Insert `item` keyed by `key`. Returns the new furthest retained key
    /// once the list has just reached its cap, so the caller can shrink
    /// its search range; returns `None` when there's no cap or the list
    /// isn't full yet.
    fn insert(&mut self, key: f32, item: u32) -> Option<f32> {
        if let Some(cap) = self.cap {
            if self.entries.len() >= cap && key >= self.entries.last().unwrap().0 {
                return None;
            }
        }

        let pos = self.entries.partition_point(|&(k, _)| k < key);
        self.entries.insert(pos, (key, item));

        if let Some(cap) = self.cap {
            if self.entries.len() > cap {
                self.entries.pop();
            }
            if self.entries.len() == cap {
                return Some(self.entries.last().unwrap().0);
            }
        }

        None
    }
}

/// One simulated agent: its current kinematic state, the tuning parameters
/// that shape its ORCA half-planes, and the working state rebuilt every
/// tick (neighbor lists, ORCA lines, solved velocity).
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: u32,
    pub position: Vec2,
    pub velocity: Vec2,
    pub pref_velocity: Vec2,
    pub new_velocity: Vec2,

    pub radius: f32,
    pub max_speed: f32,
    pub neighbor_dist: f32,
    pub max_neighbors: usize,
    pub time_horizon: f32,
    pub time_horizon_obst: f32,

    agent_neighbors: NeighborList,
    obstacle_neighbors: NeighborList,
    pub orca_lines: Vec<Line>,
}

impl Agent {
    pub fn new(id: u32, defaults: &AgentDefaults) -> Self {
        Self {
            id,
            position: Vec2::ZERO,
            velocity: defaults.velocity,
            pref_velocity: Vec2::ZERO,
            new_velocity: Vec2::ZERO,
            radius: defaults.radius,
            max_speed: defaults.max_speed,
            neighbor_dist: defaults.neighbor_dist,
            max_neighbors: defaults.max_neighbors,
            time_horizon: defaults.time_horizon,
            time_horizon_obst: defaults.time_horizon_obst,
            agent_neighbors: NeighborList::new(Some(defaults.max_neighbors)),
            obstacle_neighbors: NeighborList::new(None),
            orca_lines: Vec::new(),
        }
    }

    pub fn agent_neighbor_count(&self) -> usize {
        self.agent_neighbors.len()
    }

    pub fn obstacle_neighbor_count(&self) -> usize {
        self.obstacle_neighbors.len()
    }

    /// Rebuild the obstacle-edge neighbor list from the obstacle BSP. The
    /// search range is fixed for the whole query and never shrinks.
    pub fn compute_obstacle_neighbors(&mut self, obstacles: &ObstacleSet) {
        let position = self.position;
        let range_sq = sqr(self.time_horizon_obst * self.max_speed + self.radius);

        self.obstacle_neighbors.clear();
        let list = &mut self.obstacle_neighbors;
        obstacles.query_obstacle_neighbors(position, range_sq, &mut |id, d| {
            list.insert(d, id);
        });
    }

    /// Rebuild the agent neighbor list from the agent k-D tree, shrinking
    /// the search range once the list reaches `max_neighbors`.
    pub fn compute_agent_neighbors(&mut self, positions: &[Vec2], tree: &AgentKdTree) {
        let position = self.position;
        let id = self.id;
        let mut range_sq = sqr(self.neighbor_dist);

        self.agent_neighbors.clear();
        let list = &mut self.agent_neighbors;
        tree.query_agent_neighbors(positions, position, id, &mut range_sq, &mut |other_id, d, range| {
            if let Some(new_range) = list.insert(d, other_id) {
                *range = new_range;
            }
        });
    }

    /// Construct this tick's ORCA half-planes from the already-computed
    /// neighbor lists and solve for `new_velocity`. `before`/`after` are
    /// the other agents split around this agent's own index (so `self`
    /// isn't borrowed twice); an agent's id is also its index into the
    /// combined sequence.
    pub fn compute_new_velocity(
        &mut self,
        self_index: usize,
        before: &[Agent],
        after: &[Agent],
        obstacles: &ObstacleSet,
        time_step: f32,
    ) {
        self.orca_lines.clear();
        let inv_time_horizon_obst = 1.0 / self.time_horizon_obst;

        let obstacle_neighbors: Vec<(f32, u32)> = self.obstacle_neighbors.iter().collect();

        for (_, obstacle1_id) in obstacle_neighbors {
            let mut obstacle1 = *obstacles.vertex(obstacle1_id).expect("neighbor vertex id must be valid");
            let mut obstacle2 = *obstacles.vertex(obstacle1.next).expect("chain must be closed");

            let relative_position1 = obstacle1.point - self.position;
            let relative_position2 = obstacle2.point - self.position;

            let already_covered = self.orca_lines.iter().any(|line| {
                (relative_position1.scale(inv_time_horizon_obst) - line.point).det(line.direction)
                    - inv_time_horizon_obst * self.radius
                    >= -EPSILON
                    && (relative_position2.scale(inv_time_horizon_obst) - line.point).det(line.direction)
                        - inv_time_horizon_obst * self.radius
                        >= -EPSILON
            });

            if already_covered {
                continue;
            }

            let dist_sq1 = relative_position1.abs_sq();
            let dist_sq2 = relative_position2.abs_sq();

            let radius = self.radius;
            let radius_sq = sqr(radius);

            let obstacle_vector = obstacle2.point - obstacle1.point;
            let s = (-relative_position1).dot(obstacle_vector) / obstacle_vector.abs_sq();
            let dist_sq_line = (-relative_position1 - obstacle_vector.scale(s)).abs_sq();

            let mut line = Line { point: Vec2::ZERO, direction: Vec2::ZERO };

            if s < 0.0 && dist_sq1 <= radius_sq {
                if obstacle1.convex {
                    line.direction = Vec2::new(-relative_position1.y, relative_position1.x).normalize();
                    self.orca_lines.push(line);
                }
                continue;
            } else if s > 1.0 && dist_sq2 <= radius_sq {
                if obstacle2.convex && relative_position2.det(obstacle2.direction) >= 0.0 {
                    line.direction = Vec2::new(-relative_position2.y, relative_position2.x).normalize();
                    self.orca_lines.push(line);
                }
                continue;
            } else if (0.0..1.0).contains(&s) && dist_sq_line <= radius_sq {
                line.direction = -obstacle1.direction;
                self.orca_lines.push(line);
                continue;
            }

            let mut left_leg_direction;
            let mut right_leg_direction;

            if s < 0.0 && dist_sq_line <= radius_sq {
                if !obstacle1.convex {
                    continue;
                }
                obstacle2 = obstacle1;

                let leg1 = (dist_sq1 - radius_sq).sqrt();
                left_leg_direction = Vec2::new(
                    relative_position1.x * leg1 - relative_position1.y * radius,
                    relative_position1.x * radius + relative_position1.y * leg1,
                )
                .scale(1.0 / dist_sq1);
                right_leg_direction = Vec2::new(
                    relative_position1.x * leg1 + relative_position1.y * radius,
                    -relative_position1.x * radius + relative_position1.y * leg1,
                )
                .scale(1.0 / dist_sq1);
            } else if s > 1.0 && dist_sq_line <= radius_sq {
                if !obstacle2.convex {
                    continue;
                }
                obstacle1 = obstacle2;

                let leg2 = (dist_sq2 - radius_sq).sqrt();
                left_leg_direction = Vec2::new(
                    relative_position2.x * leg2 - relative_position2.y * radius,
                    relative_position2.x * radius + relative_position2.y * leg2,
                )
                .scale(1.0 / dist_sq2);
                right_leg_direction = Vec2::new(
                    relative_position2.x * leg2 + relative_position2.y * radius,
                    -relative_position2.x * radius + relative_position2.y * leg2,
                )
                .scale(1.0 / dist_sq2);
            } else if obstacle1.convex {
                let leg1 = (dist_sq1 - radius_sq).sqrt();
                left_leg_direction = Vec2::new(
                    relative_position1.x * leg1 - relative_position1.y * radius,
                    relative_position1.x * radius + relative_position1.y * leg1,
                )
                .scale(1.0 / dist_sq1);
                right_leg_direction = Vec2::ZERO;
                if obstacle2.convex {
                    let leg2 = (dist_sq2 - radius_sq).sqrt();
                    right_leg_direction = Vec2::new(
                        relative_position2.x * leg2 + relative_position2.y * radius,
                        -relative_position2.x * radius + relative_position2.y * leg2,
                    )
                    .scale(1.0 / dist_sq2);
                } else {
                    right_leg_direction = obstacle1.direction;
                }
            } else {
                left_leg_direction = -obstacle1.direction;
                right_leg_direction = if obstacle2.convex {
                    let leg2 = (dist_sq2 - radius_sq).sqrt();
                    Vec2::new(
                        relative_position2.x * leg2 + relative_position2.y * radius,
                        -relative_position2.x * radius + relative_position2.y * leg2,
                    )
                    .scale(1.0 / dist_sq2)
                } else {
                    obstacle1.direction
                };
            }

            let left_neighbor = *obstacles.vertex(obstacle1.previous).expect("chain must be closed");

            let mut is_left_leg_foreign = false;
            let mut is_right_leg_foreign = false;

            if obstacle1.convex && left_leg_direction.det(-left_neighbor.direction) >= 0.0 {
                left_leg_direction = -left_neighbor.direction;
                is_left_leg_foreign = true;
            }

            if obstacle2.convex && right_leg_direction.det(obstacle2.direction) <= 0.0 {
                right_leg_direction = obstacle2.direction;
                is_right_leg_foreign = true;
            }

            let left_cut_off = (obstacle1.point - self.position).scale(inv_time_horizon_obst);
            let right_cut_off = (obstacle2.point - self.position).scale(inv_time_horizon_obst);
            let cut_off_vector = right_cut_off - left_cut_off;

            let same_obstacle = obstacle1.id == obstacle2.id;
            let t = if same_obstacle {
                0.5
            } else {
                (self.velocity - left_cut_off).dot(cut_off_vector) / cut_off_vector.abs_sq()
            };
            let t_left = (self.velocity - left_cut_off).dot(left_leg_direction);
            let t_right = (self.velocity - right_cut_off).dot(right_leg_direction);

            if (t < 0.0 && t_left < 0.0) || (same_obstacle && t_left < 0.0 && t_right < 0.0) {
                let unit_w = (self.velocity - left_cut_off).normalize();
                line.direction = Vec2::new(unit_w.y, -unit_w.x);
                line.point = left_cut_off + unit_w.scale(radius * inv_time_horizon_obst);
                self.orca_lines.push(line);
                continue;
            } else if t > 1.0 && t_right < 0.0 {
                let unit_w = (self.velocity - right_cut_off).normalize();
                line.direction = Vec2::new(unit_w.y, -unit_w.x);
                line.point = right_cut_off + unit_w.scale(radius * inv_time_horizon_obst);
                self.orca_lines.push(line);
                continue;
            }

            let dist_sq_cutoff = if t < 0.0 || t > 1.0 || same_obstacle {
                f32::INFINITY
            } else {
                (self.velocity - (left_cut_off + cut_off_vector.scale(t))).abs_sq()
            };
            let dist_sq_left = if t_left < 0.0 {
                f32::INFINITY
            } else {
                (self.velocity - (left_cut_off + left_leg_direction.scale(t_left))).abs_sq()
            };
            let dist_sq_right = if t_right < 0.0 {
                f32::INFINITY
            } else {
                (self.velocity - (right_cut_off + right_leg_direction.scale(t_right))).abs_sq()
            };

            if dist_sq_cutoff <= dist_sq_left && dist_sq_cutoff <= dist_sq_right {
                line.direction = -obstacle1.direction;
                line.point = left_cut_off + Vec2::new(-line.direction.y, line.direction.x).scale(radius * inv_time_horizon_obst);
                self.orca_lines.push(line);
            } else if dist_sq_left <= dist_sq_right {
                if is_left_leg_foreign {
                    continue;
                }
                line.direction = left_leg_direction;
                line.point = left_cut_off + Vec2::new(-line.direction.y, line.direction.x).scale(radius * inv_time_horizon_obst);
                self.orca_lines.push(line);
            } else {
                if is_right_leg_foreign {
                    continue;
                }
                line.direction = -right_leg_direction;
                line.point = right_cut_off + Vec2::new(-line.direction.y, line.direction.x).scale(radius * inv_time_horizon_obst);
                self.orca_lines.push(line);
            }
        }

        let num_obst_lines = self.orca_lines.len();
        let inv_time_horizon = 1.0 / self.time_horizon;

        let agent_neighbors: Vec<(f32, u32)> = self.agent_neighbors.iter().collect();

        for (_, other_id) in agent_neighbors {
            let other = Self::lookup(other_id, self_index, before, after);

            let relative_position = other.position - self.position;
            let relative_velocity = self.velocity - other.velocity;
            let dist_sq = relative_position.abs_sq();
            let combined_radius = self.radius + other.radius;
            let combined_radius_sq = sqr(combined_radius);

            let mut line = Line { point: Vec2::ZERO, direction: Vec2::ZERO };
            let u;

            if dist_sq > combined_radius_sq {
                let w = relative_velocity - relative_position.scale(inv_time_horizon);
                let w_length_sq = w.abs_sq();
                let dot_product1 = w.dot(relative_position);

                if dot_product1 < 0.0 && sqr(dot_product1) > combined_radius_sq * w_length_sq {
                    let w_length = w_length_sq.sqrt();
                    let unit_w = w.scale(1.0 / w_length);
                    line.direction = Vec2::new(unit_w.y, -unit_w.x);
                    u = unit_w.scale(combined_radius * inv_time_horizon - w_length);
                } else {
                    let leg = (dist_sq - combined_radius_sq).sqrt();
                    if relative_position.det(w) > 0.0 {
                        line.direction = Vec2::new(
                            relative_position.x * leg - relative_position.y * combined_radius,
                            relative_position.x * combined_radius + relative_position.y * leg,
                        )
                        .scale(1.0 / dist_sq);
                    } else {
                        line.direction = -Vec2::new(
                            relative_position.x * leg + relative_position.y * combined_radius,
                            -relative_position.x * combined_radius + relative_position.y * leg,
                        )
                        .scale(1.0 / dist_sq);
                    }

                    let dot_product2 = relative_velocity.dot(line.direction);
                    u = line.direction.scale(dot_product2) - relative_velocity;
                }
            } else {
                let inv_time_step = 1.0 / time_step;
                let w = relative_velocity - relative_position.scale(inv_time_step);
                let w_length = w.abs();
                let unit_w = w.scale(1.0 / w_length);
                line.direction = Vec2::new(unit_w.y, -unit_w.x);
                u = unit_w.scale(combined_radius * inv_time_step - w_length);
            }

            line.point = self.velocity + u.scale(0.5);
            self.orca_lines.push(line);
        }

        let (mut result, fail) = lp2(&self.orca_lines, self.max_speed, self.pref_velocity, false);
        if fail < self.orca_lines.len() {
            result = lp3(&self.orca_lines, num_obst_lines, fail, self.max_speed, result);
        }
        self.new_velocity = result;
    }

    fn lookup<'a>(id: u32, self_index: usize, before: &'a [Agent], after: &'a [Agent]) -> &'a Agent {
        let idx = id as usize;
        if idx < self_index {
            &before[idx]
        } else {
            &after[idx - self_index - 1]
        }
    }

    /// Apply the velocity solved by the most recent [`compute_new_velocity`]
    /// call and integrate position over `time_step`.
    pub fn commit(&mut self, time_step: f32) {
        self.velocity = self.new_velocity;
        self.position = self.position + self.velocity.scale(time_step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentDefaults;

    fn defaults() -> AgentDefaults {
        AgentDefaults {
            neighbor_dist: 15.0,
            max_neighbors: 10,
            time_horizon: 10.0,
            time_horizon_obst: 10.0,
            radius: 1.0,
            max_speed: 2.0,
            velocity: Vec2::ZERO,
        }
    }

    #[test]
    fn commit_integrates_position_from_new_velocity() {
        let mut agent = Agent::new(0, &defaults());
        agent.new_velocity = Vec2::new(1.0, 0.0);
        agent.commit(0.5);
        assert_eq!(agent.velocity, Vec2::new(1.0, 0.0));
        assert_eq!(agent.position, Vec2::new(0.5, 0.0));
    }

    #[test]
    fn two_agents_head_on_deflect_rather_than_collide() {
        let mut a = Agent::new(0, &defaults());
        a.position = Vec2::new(-5.0, 0.0);
        a.velocity = Vec2::new(1.0, 0.0);
        a.pref_velocity = Vec2::new(1.0, 0.0);

        let mut b = Agent::new(1, &defaults());
        b.position = Vec2::new(5.0, 0.0);
        b.velocity = Vec2::new(-1.0, 0.0);
        b.pref_velocity = Vec2::new(-1.0, 0.0);

        let positions = [a.position, b.position];
        let tree = AgentKdTree::build(&positions);
        let obstacles = ObstacleSet::new();

        a.compute_obstacle_neighbors(&obstacles);
        a.compute_agent_neighbors(&positions, &tree);
        b.compute_obstacle_neighbors(&obstacles);
        b.compute_agent_neighbors(&positions, &tree);

        let agents = [a.clone(), b.clone()];
        let (before_a, after_a) = (&agents[0..0], &agents[1..2]);
        a.compute_new_velocity(0, before_a, after_a, &obstacles, 0.1);
        let (before_b, after_b) = (&agents[0..1], &agents[2..2]);
        b.compute_new_velocity(1, before_b, after_b, &obstacles, 0.1);

        // Neither agent should keep its head-on preferred velocity exactly;
        // ORCA must deflect at least one sideways component in.
        assert!(a.new_velocity.y.abs() > 1e-3 || b.new_velocity.y.abs() > 1e-3);
        assert!(a.new_velocity.abs() <= a.max_speed + 1e-3);
        assert!(b.new_velocity.abs() <= b.max_speed + 1e-3);
    }

    #[test]
    fn single_agent_with_no_neighbors_keeps_preferred_velocity() {
        let mut a = Agent::new(0, &defaults());
        a.pref_velocity = Vec2::new(1.0, 0.5);
        let obstacles = ObstacleSet::new();
        let positions = [a.position];
        let tree = AgentKdTree::build(&positions);

        a.compute_obstacle_neighbors(&obstacles);
        a.compute_agent_neighbors(&positions, &tree);
        a.compute_new_velocity(0, &[], &[], &obstacles, 0.1);

        assert!((a.new_velocity - a.pref_velocity).abs() < 1e-3);
    }
}
