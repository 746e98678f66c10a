/// Public API: owns agents, obstacles and the spatial indices, and drives
/// one tick at a time.
///
/// Generalizes the shape of this crate's ancestry's `storage::rvo::RVOSimulator`
/// (a struct owning agents plus default-parameter fields, `add_agent`/
/// `remove_agent`/`step`/`clear`/`agent_count` methods) to the full ORCA
/// pipeline and spatial-indexed neighbor queries. Unlike that ancestor
/// (and the rest of `storage/`), there is no process-wide singleton here;
/// a `Simulator` is an ordinary owned value, and both trees borrow it at
/// build and query time.
use crate::agent::Agent;
use crate::config::{AgentDefaults, DEFAULT_TIME_STEP};
use crate::kdtree::AgentKdTree;
use crate::obstacle::ObstacleSet;
use crate::vecmath::Vec2;

/// Errors for accessors that address an id or call a query out of its
/// required order. The topology calls (`add_agent`, `add_obstacle`) keep
/// returning `Option`/sentinel values instead of these; those are
/// recoverable caller-input conditions, not programmer errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum OrcaError {
    #[error("no agent with id {0}")]
    UnknownAgent(u32),
    #[error("no obstacle vertex with id {0}")]
    UnknownVertex(u32),
    #[error("query_visibility called before process_obstacles")]
    ObstaclesNotProcessed,
}

/// Owns every agent, the obstacle vertex arena, the spatial indices, and
/// the simulation clock. The agent k-D tree is rebuilt every tick; the
/// obstacle BSP is built once by [`Simulator::process_obstacles`] and
/// frozen after that.
pub struct Simulator {
    agents: Vec<Agent>,
    obstacles: ObstacleSet,
    agent_tree: AgentKdTree,
    default_agent: Option<AgentDefaults>,
    time_step: f32,
    global_time: f32,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            agents: Vec::new(),
            obstacles: ObstacleSet::new(),
            agent_tree: AgentKdTree::build(&[]),
            default_agent: None,
            time_step: DEFAULT_TIME_STEP,
            global_time: 0.0,
        }
    }

    pub fn time_step(&self) -> f32 {
        self.time_step
    }

    pub fn set_time_step(&mut self, time_step: f32) {
        self.time_step = time_step;
    }

    pub fn global_time(&self) -> f32 {
        self.global_time
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Drop every agent, obstacle and the default-agent template. A fresh
    /// call to [`Simulator::set_agent_defaults`] is required before
    /// [`Simulator::add_agent`] will succeed again.
    pub fn clear(&mut self) {
        self.agents.clear();
        self.obstacles.clear();
        self.agent_tree = AgentKdTree::build(&[]);
        self.default_agent = None;
        self.global_time = 0.0;
    }

    /// Set the template new agents are created from via
    /// [`Simulator::add_agent`]. Does not retroactively change existing
    /// agents.
    #[allow(clippy::too_many_arguments)]
    pub fn set_agent_defaults(
        &mut self,
        neighbor_dist: f32,
        max_neighbors: usize,
        time_horizon: f32,
        time_horizon_obst: f32,
        radius: f32,
        max_speed: f32,
        velocity: Vec2,
    ) {
        self.default_agent = Some(AgentDefaults {
            neighbor_dist,
            max_neighbors,
            time_horizon,
            time_horizon_obst,
            radius,
            max_speed,
            velocity,
        });
    }

    /// Add an agent at `position` using the current default-agent template.
    /// Returns the new agent's id, or `None` if
    /// [`Simulator::set_agent_defaults`] hasn't been called since
    /// construction or the last [`Simulator::clear`].
    pub fn add_agent(&mut self, position: Vec2) -> Option<u32> {
        let defaults = self.default_agent?;
        Some(self.add_agent_with_params(position, &defaults))
    }

    /// Add an agent at `position` with an explicit parameter bundle,
    /// bypassing the default-agent template entirely.
    pub fn add_agent_with_params(&mut self, position: Vec2, defaults: &AgentDefaults) -> u32 {
        let id = self.agents.len() as u32;
        let mut agent = Agent::new(id, defaults);
        agent.position = position;
        self.agents.push(agent);
        id
    }

    /// Append a polygon (or 2-vertex degenerate "line" obstacle) as a new
    /// chain. Returns the id of its first vertex, or `None` if fewer than 2
    /// vertices were supplied. Call [`Simulator::process_obstacles`] after
    /// all obstacles have been added.
    pub fn add_obstacle(&mut self, verts: &[Vec2]) -> Option<u32> {
        self.obstacles.add_obstacle(verts)
    }

    /// Rebuild the obstacle BSP from every vertex added so far. May append
    /// new split vertices to the arena; existing ids remain valid. Must be
    /// called before [`Simulator::query_visibility`] or before any tick
    /// that should account for obstacles (agents gathered no
    /// obstacle-neighbor data before this runs).
    pub fn process_obstacles(&mut self) {
        self.obstacles.process();
    }

    /// Whether the closed segment `q1`-`q2` clears every obstacle edge by
    /// at least `radius`. Requires [`Simulator::process_obstacles`] to have
    /// run at least once.
    pub fn query_visibility(&self, q1: Vec2, q2: Vec2, radius: f32) -> Result<bool, OrcaError> {
        if !self.obstacles.is_processed() {
            return Err(OrcaError::ObstaclesNotProcessed);
        }
        Ok(self.obstacles.query_visibility(q1, q2, radius))
    }

    /// Run one tick: rebuild the agent k-D tree, gather neighbors and solve
    /// a new velocity for every agent from pre-tick state, then commit all
    /// positions and velocities at once. Returns the new global time.
    ///
    /// Every agent's neighbor gathering and ORCA solve reads only the
    /// positions/velocities from before this call; nothing observes
    /// another agent's new velocity until every agent has computed its
    /// own, so the result does not depend on agent order.
    pub fn do_step(&mut self) -> f32 {
        let positions: Vec<Vec2> = self.agents.iter().map(|a| a.position).collect();
        self.agent_tree = AgentKdTree::build(&positions);

        for agent in &mut self.agents {
            agent.compute_obstacle_neighbors(&self.obstacles);
            agent.compute_agent_neighbors(&positions, &self.agent_tree);
        }

        let n = self.agents.len();
        for i in 0..n {
            let (before, rest) = self.agents.split_at_mut(i);
            let (agent, after) = rest.split_first_mut().expect("i < n");
            agent.compute_new_velocity(i, before, after, &self.obstacles, self.time_step);
        }

        for agent in &mut self.agents {
            agent.commit(self.time_step);
        }

        self.global_time += self.time_step;
        self.global_time
    }

    fn agent(&self, id: u32) -> Result<&Agent, OrcaError> {
        self.agents.get(id as usize).ok_or(OrcaError::UnknownAgent(id))
    }

    fn agent_mut(&mut self, id: u32) -> Result<&mut Agent, OrcaError> {
        self.agents.get_mut(id as usize).ok_or(OrcaError::UnknownAgent(id))
    }

    pub fn agent_position(&self, id: u32) -> Result<Vec2, OrcaError> {
        self.agent(id).map(|a| a.position)
    }

    pub fn set_agent_position(&mut self, id: u32, position: Vec2) -> Result<(), OrcaError> {
        self.agent_mut(id).map(|a| a.position = position)
    }

    pub fn agent_velocity(&self, id: u32) -> Result<Vec2, OrcaError> {
        self.agent(id).map(|a| a.velocity)
    }

    pub fn set_agent_velocity(&mut self, id: u32, velocity: Vec2) -> Result<(), OrcaError> {
        self.agent_mut(id).map(|a| a.velocity = velocity)
    }

    pub fn agent_pref_velocity(&self, id: u32) -> Result<Vec2, OrcaError> {
        self.agent(id).map(|a| a.pref_velocity)
    }

    pub fn set_agent_pref_velocity(&mut self, id: u32, pref_velocity: Vec2) -> Result<(), OrcaError> {
        self.agent_mut(id).map(|a| a.pref_velocity = pref_velocity)
    }

    pub fn agent_radius(&self, id: u32) -> Result<f32, OrcaError> {
        self.agent(id).map(|a| a.radius)
    }

    pub fn set_agent_radius(&mut self, id: u32, radius: f32) -> Result<(), OrcaError> {
        self.agent_mut(id).map(|a| a.radius = radius)
    }

    pub fn agent_max_speed(&self, id: u32) -> Result<f32, OrcaError> {
        self.agent(id).map(|a| a.max_speed)
    }

    pub fn set_agent_max_speed(&mut self, id: u32, max_speed: f32) -> Result<(), OrcaError> {
        self.agent_mut(id).map(|a| a.max_speed = max_speed)
    }

    pub fn agent_neighbor_dist(&self, id: u32) -> Result<f32, OrcaError> {
        self.agent(id).map(|a| a.neighbor_dist)
    }

    pub fn set_agent_neighbor_dist(&mut self, id: u32, neighbor_dist: f32) -> Result<(), OrcaError> {
        self.agent_mut(id).map(|a| a.neighbor_dist = neighbor_dist)
    }

    pub fn agent_max_neighbors(&self, id: u32) -> Result<usize, OrcaError> {
        self.agent(id).map(|a| a.max_neighbors)
    }

    pub fn set_agent_max_neighbors(&mut self, id: u32, max_neighbors: usize) -> Result<(), OrcaError> {
        self.agent_mut(id).map(|a| a.max_neighbors = max_neighbors)
    }

    pub fn agent_time_horizon(&self, id: u32) -> Result<f32, OrcaError> {
        self.agent(id).map(|a| a.time_horizon)
    }

    pub fn set_agent_time_horizon(&mut self, id: u32, time_horizon: f32) -> Result<(), OrcaError> {
        self.agent_mut(id).map(|a| a.time_horizon = time_horizon)
    }

    pub fn agent_time_horizon_obst(&self, id: u32) -> Result<f32, OrcaError> {
        self.agent(id).map(|a| a.time_horizon_obst)
    }

    pub fn set_agent_time_horizon_obst(&mut self, id: u32, time_horizon_obst: f32) -> Result<(), OrcaError> {
        self.agent_mut(id).map(|a| a.time_horizon_obst = time_horizon_obst)
    }

    pub fn agent_num_agent_neighbors(&self, id: u32) -> Result<usize, OrcaError> {
        self.agent(id).map(|a| a.agent_neighbor_count())
    }

    pub fn agent_num_obstacle_neighbors(&self, id: u32) -> Result<usize, OrcaError> {
        self.agent(id).map(|a| a.obstacle_neighbor_count())
    }

    pub fn obstacle_vertex_count(&self) -> usize {
        self.obstacles.vertex_count()
    }

    pub fn obstacle_vertex_position(&self, id: u32) -> Result<Vec2, OrcaError> {
        self.obstacles.vertex(id).map(|v| v.point).ok_or(OrcaError::UnknownVertex(id))
    }

    pub fn next_vertex_no(&self, id: u32) -> Result<u32, OrcaError> {
        self.obstacles.next_vertex_no(id).ok_or(OrcaError::UnknownVertex(id))
    }

    pub fn prev_vertex_no(&self, id: u32) -> Result<u32, OrcaError> {
        self.obstacles.prev_vertex_no(id).ok_or(OrcaError::UnknownVertex(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults_sim() -> Simulator {
        let mut sim = Simulator::new();
        sim.set_agent_defaults(15.0, 10, 10.0, 10.0, 2.0, 2.0, Vec2::ZERO);
        sim
    }

    #[test]
    fn add_agent_fails_without_defaults() {
        let mut sim = Simulator::new();
        assert_eq!(sim.add_agent(Vec2::ZERO), None);
    }

    #[test]
    fn agent_ids_are_stable_insertion_order() {
        let mut sim = defaults_sim();
        for k in 0..5u32 {
            let id = sim.add_agent(Vec2::new(k as f32, 0.0)).unwrap();
            assert_eq!(id, k);
        }
    }

    #[test]
    fn clear_requires_defaults_again() {
        let mut sim = defaults_sim();
        sim.add_agent(Vec2::ZERO).unwrap();
        sim.clear();
        assert_eq!(sim.add_agent(Vec2::ZERO), None);
        assert_eq!(sim.agent_count(), 0);
    }

    #[test]
    fn add_obstacle_rejects_fewer_than_two_vertices() {
        let mut sim = Simulator::new();
        assert_eq!(sim.add_obstacle(&[Vec2::ZERO]), None);
    }

    #[test]
    fn query_visibility_requires_process_obstacles() {
        let mut sim = Simulator::new();
        sim.add_obstacle(&[Vec2::new(0.0, -1.0), Vec2::new(0.0, 1.0)]).unwrap();
        assert_eq!(
            sim.query_visibility(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0), 0.0),
            Err(OrcaError::ObstaclesNotProcessed)
        );
        sim.process_obstacles();
        assert!(sim.query_visibility(Vec2::new(-5.0, 0.0), Vec2::new(5.0, 0.0), 0.0).is_ok());
    }

    #[test]
    fn single_agent_no_obstacles_reaches_exact_target() {
        let mut sim = Simulator::new();
        sim.set_agent_defaults(15.0, 10, 10.0, 10.0, 0.5, 1.0, Vec2::ZERO);
        sim.set_time_step(1.0);
        let id = sim.add_agent(Vec2::ZERO).unwrap();
        sim.set_agent_pref_velocity(id, Vec2::new(1.0, 0.0)).unwrap();

        for _ in 0..5 {
            sim.do_step();
        }

        let pos = sim.agent_position(id).unwrap();
        assert!((pos - Vec2::new(5.0, 0.0)).abs() < 1e-3);
    }

    #[test]
    fn head_on_agents_pass_without_colliding() {
        let mut sim = Simulator::new();
        sim.set_agent_defaults(15.0, 10, 10.0, 10.0, 2.0, 2.0, Vec2::ZERO);
        sim.set_time_step(0.25);
        let a = sim.add_agent(Vec2::new(-5.0, 0.0)).unwrap();
        let b = sim.add_agent(Vec2::new(5.0, 0.0)).unwrap();
        sim.set_agent_pref_velocity(a, Vec2::new(2.0, 0.0)).unwrap();
        sim.set_agent_pref_velocity(b, Vec2::new(-2.0, 0.0)).unwrap();

        for _ in 0..20 {
            sim.do_step();
            let pa = sim.agent_position(a).unwrap();
            let pb = sim.agent_position(b).unwrap();
            assert!((pa - pb).abs() >= 4.0 - 1e-3);
        }

        assert!(sim.agent_position(a).unwrap().x > 0.0);
        assert!(sim.agent_position(b).unwrap().x < 0.0);
    }

    #[test]
    fn zero_pref_velocity_is_idempotent() {
        let mut sim = defaults_sim();
        let id = sim.add_agent(Vec2::new(1.0, 2.0)).unwrap();
        sim.set_agent_velocity(id, Vec2::new(0.3, -0.1)).unwrap();

        sim.do_step();
        sim.do_step();

        assert!(sim.agent_velocity(id).unwrap().abs() < 1e-4);
    }
}
