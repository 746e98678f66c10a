//! Optimal Reciprocal Collision Avoidance (ORCA) crowd-simulation core.
//!
//! A synchronous, in-process simulator for many disk-shaped agents sharing a
//! 2-D plane with static polygonal obstacles. Each [`Simulator::do_step`]
//! computes, per agent, a new velocity that is as close as possible to the
//! agent's preferred velocity while staying collision-free with nearby
//! agents and obstacles for a configured time horizon.
//!
//! No rendering, no wire protocol, no global path planning: preferred
//! velocities are supplied by the caller every tick.

pub mod agent;
pub mod config;
pub mod kdtree;
pub mod linear_program;
pub mod obstacle;
mod simulator;
pub mod vecmath;

pub use simulator::{OrcaError, Simulator};
