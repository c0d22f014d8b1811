//! Particle store and stepper. Two backends share one contract: [`GpuSimulation`] runs the
//! kernels on a wgpu device, [`HostSimulation`] runs the same kernel math on the CPU with rayon.

pub mod dynamics;
mod host;
mod lifecycle;
mod simulation;

pub use host::HostSimulation;
pub use lifecycle::Lifecycle;
pub use simulation::{GpuContext, GpuSimulation};

use crate::common::{GridCounters, Particle};
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::geometry::SphereState;

pub trait ParticleSimulation {
    fn config(&self) -> &SimulationConfig;

    fn lifecycle(&self) -> Lifecycle;

    /// Fixed for the lifetime of the store; also the instance count of every draw.
    fn capacity(&self) -> u32 {
        self.config().particle_capacity
    }

    /// Fills every slot from the configured random ranges.
    fn seed(&mut self) -> Result<()>;

    /// Fills the store with caller supplied records. `particles.len()` must equal the capacity.
    fn seed_with(&mut self, particles: Vec<Particle>) -> Result<()>;

    /// Clear, reset particle linkage, then assign every particle to its cell.
    fn rebuild_grid(&mut self) -> Result<()>;

    /// One fixed step against the current grid and the given control sphere.
    fn step(&mut self, sphere: &SphereState) -> Result<()>;

    /// Counters recorded by the most recent grid rebuild.
    fn grid_report(&self) -> Result<GridCounters>;

    fn particles(&self) -> Result<Vec<Particle>>;

    /// Releases the store and the grid. Every later call fails with a lifecycle error.
    fn dispose(&mut self) -> Result<()>;
}

pub(crate) fn check_seed_records(
    config: &SimulationConfig,
    particles: &[Particle],
) -> Result<()> {
    use crate::error::SimulationError;

    if particles.len() as u64 != config.particle_capacity as u64 {
        return Err(SimulationError::Capacity {
            what: "particle",
            requested: particles.len() as u64,
            available: config.particle_capacity as u64,
        });
    }
    let max_radius = 0.5 * config.cell_size();
    if let Some((index, particle)) = particles
        .iter()
        .enumerate()
        .find(|(_, particle)| !(particle.radius > 0.0 && particle.radius <= max_radius))
    {
        return Err(SimulationError::configuration(format!(
            "particle {index} has radius {} outside (0, {max_radius}]",
            particle.radius
        )));
    }
    Ok(())
}
