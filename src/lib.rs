//! Grid-accelerated particle simulation on wgpu compute.
//!
//! Every frame the [`orchestrator::FrameOrchestrator`] rebuilds a uniform grid over the particle
//! positions, steps every particle against six static half-spaces, one moving control sphere and
//! its 27 neighbouring cells, and leaves the particle buffer on the device for an indirect
//! instanced draw. [`simulation::HostSimulation`] runs the same kernels on the CPU.

pub mod common;
pub mod config;
pub mod debug;
pub mod error;
pub mod geometry;
pub mod orchestrator;
pub mod partition;
pub mod render;
pub mod simulation;
mod wgpu_utilities;

pub use common::{GridCell, GridCounters, Particle, MAX_PARTICLES_PER_GRID_CELL, UNASSIGNED};
pub use config::{ParticleShape, SimulationConfig};
pub use error::{Result, SimulationError};
pub use geometry::{Aabb, ControlSphere, HalfSpace, SphereState, TransformProvider};
pub use orchestrator::FrameOrchestrator;
pub use simulation::{GpuContext, GpuSimulation, HostSimulation, Lifecycle, ParticleSimulation};
