use crate::common::GridCounters;
use crate::error::Result;
use crate::geometry::{ControlSphere, SphereState, TransformProvider};
use crate::simulation::ParticleSimulation;

/// Owns one simulation and drives it through a frame: control sphere update, grid rebuild,
/// step, sphere commit. Each phase is a full barrier before the next one starts.
pub struct FrameOrchestrator<S: ParticleSimulation> {
    simulation: S,
    sphere: ControlSphere,
    frame: u64,
    last_report: Option<GridCounters>,
}

impl<S: ParticleSimulation> FrameOrchestrator<S> {
    pub fn new(simulation: S) -> Self {
        let sphere_config = &simulation.config().sphere;
        let sphere = ControlSphere::new(sphere_config.radius, sphere_config.start);
        FrameOrchestrator {
            simulation,
            sphere,
            frame: 0,
            last_report: None,
        }
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut S {
        &mut self.simulation
    }

    pub fn sphere(&self) -> SphereState {
        self.sphere.state()
    }

    /// frames ticked since activation
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn last_report(&self) -> Option<GridCounters> {
        self.last_report
    }

    /// Seeds the store and builds the first grid.
    pub fn activate(&mut self) -> Result<()> {
        self.simulation.seed()?;
        self.simulation.rebuild_grid()?;
        log::info!(
            "activated {} particles on a {} grid",
            self.simulation.capacity(),
            self.simulation.config().grid.dimension
        );
        Ok(())
    }

    pub fn tick(&mut self, control: &impl TransformProvider) -> Result<SphereState> {
        let fixed_timestep = self.simulation.config().dynamics.fixed_timestep;
        let sphere = self.sphere.update(control.position(), fixed_timestep);

        self.simulation.rebuild_grid()?;
        self.simulation.step(&sphere)?;
        self.sphere.commit();
        self.frame += 1;

        let interval = self.simulation.config().report_interval as u64;
        if interval > 0 && self.frame % interval == 0 {
            self.report()?;
        }
        Ok(sphere)
    }

    /// Pulls the grid counters and logs any overflow or escaped particles.
    pub fn report(&mut self) -> Result<GridCounters> {
        let counters = self.simulation.grid_report()?;
        if counters.overflowed > 0 {
            log::warn!(
                "frame {}: {} particles overflowed their grid cell, collisions are approximate",
                self.frame,
                counters.overflowed
            );
        }
        if counters.out_of_bounds > 0 {
            log::warn!(
                "frame {}: {} particles outside the grid box",
                self.frame,
                counters.out_of_bounds
            );
        }
        self.last_report = Some(counters);
        Ok(counters)
    }

    pub fn shutdown(&mut self) -> Result<()> {
        self.simulation.dispose()?;
        log::info!("simulation shut down after {} frames", self.frame);
        Ok(())
    }
}
