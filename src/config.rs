/// Tuning constants shared across the ORCA pipeline
///
/// Centralized the same way the rest of this crate's ancestry keeps
/// cross-module numeric knobs in one place instead of scattering magic
/// numbers through the call sites that use them.

/// Tolerance used to classify "on the line" / "parallel" / "coincident"
/// cases throughout the obstacle, agent and linear-program code.
pub const EPSILON: f32 = 1e-5;

/// Maximum number of agents stored in a single k-D tree leaf before it is
/// split.
pub const MAX_LEAF_SIZE: usize = 10;

/// Default simulation tick length, in seconds, used until
/// [`crate::Simulator::set_time_step`] is called.
pub const DEFAULT_TIME_STEP: f32 = 0.1;

/// Default per-agent parameter bundle, applied to every agent created via
/// [`crate::Simulator::add_agent`] after [`crate::Simulator::set_agent_defaults`]
/// has been called.
///
/// Serializable so a caller can load a tuned defaults profile from disk
/// (e.g. a JSON preset per crowd density) instead of hard-coding the seven
/// scalar parameters at every call site.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AgentDefaults {
    pub neighbor_dist: f32,
    pub max_neighbors: usize,
    pub time_horizon: f32,
    pub time_horizon_obst: f32,
    pub radius: f32,
    pub max_speed: f32,
    pub velocity: crate::vecmath::Vec2,
}
