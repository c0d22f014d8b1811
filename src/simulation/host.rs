use rand::{rngs::StdRng, SeedableRng};
use rayon::prelude::*;

use crate::common::{GridCounters, Particle, UNASSIGNED};
use crate::config::SimulationConfig;
use crate::error::{Result, SimulationError};
use crate::geometry::{HalfSpace, SphereState, STATIC_CONSTRAINT_COUNT};
use crate::partition::{GridLayout, HostGrid};

use super::dynamics::{
    integrate, pair_contact, pinned_share, project_inside, resolve_half_space, resolve_sphere,
    spawn_particle, Contact, StepParameters,
};
use super::{check_seed_records, Lifecycle, ParticleSimulation};

/// CPU backend. Each kernel becomes a rayon parallel iterator over the particle slice.
pub struct HostSimulation {
    config: SimulationConfig,
    lifecycle: Lifecycle,
    parameters: StepParameters,
    constraints: [HalfSpace; STATIC_CONSTRAINT_COUNT],
    particles: Vec<Particle>,
    snapshot: Vec<Particle>,
    grid: Option<HostGrid>,
    counters: GridCounters,
}

impl HostSimulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let capacity = config.particle_capacity as usize;
        Ok(HostSimulation {
            parameters: StepParameters::from_config(&config),
            constraints: config.static_constraints(),
            particles: Vec::with_capacity(capacity),
            snapshot: Vec::with_capacity(capacity),
            grid: Some(HostGrid::new(GridLayout::from_config(&config))),
            counters: GridCounters::default(),
            lifecycle: Lifecycle::Uninitialized,
            config,
        })
    }

    pub fn grid(&self) -> Option<&HostGrid> {
        self.grid.as_ref()
    }

    pub fn constraints(&self) -> &[HalfSpace; STATIC_CONSTRAINT_COUNT] {
        &self.constraints
    }

    fn live_grid(&self, operation: &'static str) -> Result<&HostGrid> {
        self.lifecycle.require_live(operation)?;
        self.grid.as_ref().ok_or(SimulationError::Lifecycle {
            operation,
            state: self.lifecycle,
        })
    }

    fn integrate_particles(&mut self, sphere: &SphereState) {
        let parameters = self.parameters;
        let constraints = self.constraints;
        self.particles.par_iter_mut().for_each(|particle| {
            integrate(particle, &parameters);
            for plane in &constraints {
                resolve_half_space(particle, plane, &parameters);
            }
            resolve_sphere(particle, sphere, &parameters);
        });
    }

    fn collide_particles(&mut self) -> Result<()> {
        self.snapshot.clone_from(&self.particles);

        let parameters = self.parameters;
        let constraints = self.constraints;
        let snapshot = &self.snapshot;
        let grid = self.grid.as_ref().ok_or(SimulationError::Lifecycle {
            operation: "step",
            state: self.lifecycle,
        })?;
        let layout = grid.layout();

        self.particles
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, particle)| {
                if particle.cell != UNASSIGNED {
                    let index = index as u32;
                    let own = &snapshot[index as usize];
                    let total = layout
                        .neighborhood(particle.cell)
                        .flat_map(|cell| grid.occupants(cell))
                        .filter_map(|other| {
                            let neighbour = &snapshot[other as usize];
                            pair_contact(index, own, other, neighbour, &parameters).map(|contact| {
                                Contact {
                                    correction: contact.correction
                                        + pinned_share(neighbour, contact.correction, &constraints),
                                    impulse: contact.impulse,
                                }
                            })
                        })
                        .fold(Contact::default(), |sum, contact| Contact {
                            correction: sum.correction + contact.correction,
                            impulse: sum.impulse + contact.impulse,
                        });
                    particle.set_position(particle.position() + total.correction);
                    particle.set_velocity(particle.velocity() + total.impulse);
                }
                for plane in &constraints {
                    project_inside(particle, plane);
                }
            });
        Ok(())
    }
}

impl ParticleSimulation for HostSimulation {
    fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn seed(&mut self) -> Result<()> {
        if self.lifecycle != Lifecycle::Uninitialized {
            return self.lifecycle.seed();
        }
        let mut rng = StdRng::seed_from_u64(self.config.spawn.seed);
        let volume = self.config.spawn_volume();
        let particles = (0..self.config.particle_capacity)
            .map(|_| spawn_particle(&mut rng, &self.config.spawn, &volume))
            .collect();
        self.seed_with(particles)
    }

    fn seed_with(&mut self, particles: Vec<Particle>) -> Result<()> {
        if self.lifecycle != Lifecycle::Uninitialized {
            return self.lifecycle.seed();
        }
        check_seed_records(&self.config, &particles)?;
        self.particles = particles;
        HostGrid::init_particle_index(&mut self.particles);
        self.lifecycle.seed()?;
        log::debug!("seeded {} particles on the host", self.particles.len());
        Ok(())
    }

    fn rebuild_grid(&mut self) -> Result<()> {
        self.live_grid("rebuild grid")?;
        if let Some(grid) = self.grid.as_ref() {
            self.counters = grid.rebuild(&mut self.particles);
        }
        Ok(())
    }

    fn step(&mut self, sphere: &SphereState) -> Result<()> {
        self.lifecycle.step()?;
        self.integrate_particles(sphere);
        self.collide_particles()
    }

    fn grid_report(&self) -> Result<GridCounters> {
        self.live_grid("read grid report")?;
        Ok(self.counters)
    }

    fn particles(&self) -> Result<Vec<Particle>> {
        self.lifecycle.require_live("read particles")?;
        Ok(self.particles.clone())
    }

    fn dispose(&mut self) -> Result<()> {
        self.lifecycle.dispose()?;
        self.particles = Vec::new();
        self.snapshot = Vec::new();
        self.grid = None;
        log::debug!("host simulation disposed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{UVec3, Vec3};

    fn config(capacity: u32) -> SimulationConfig {
        let mut config = SimulationConfig::inter_particle();
        config.particle_capacity = capacity;
        config.grid.dimension = UVec3::new(8, 8, 8);
        config.grid.low_corner = Vec3::new(-4.0, 0.0, -4.0);
        config.grid.cell_size = Some(1.0);
        config
    }

    fn idle_sphere() -> SphereState {
        SphereState {
            center: Vec3::new(100.0, 100.0, 100.0),
            radius: 0.8,
            velocity: Vec3::ZERO,
        }
    }

    #[test]
    fn seeding_is_reproducible() {
        let mut first = HostSimulation::new(config(64)).unwrap();
        let mut second = HostSimulation::new(config(64)).unwrap();
        first.seed().unwrap();
        second.seed().unwrap();
        assert_eq!(first.particles().unwrap(), second.particles().unwrap());
    }

    #[test]
    fn seeded_particles_start_unlinked() {
        let mut simulation = HostSimulation::new(config(32)).unwrap();
        simulation.seed().unwrap();
        assert!(simulation
            .particles()
            .unwrap()
            .iter()
            .all(|particle| particle.cell == UNASSIGNED && particle.slot == UNASSIGNED));
    }

    #[test]
    fn seed_with_wrong_length_is_a_capacity_error() {
        let mut simulation = HostSimulation::new(config(4)).unwrap();
        let particles = vec![Particle::new(Vec3::new(0.0, 2.0, 0.0), 0.25, Vec3::ZERO); 3];
        assert!(matches!(
            simulation.seed_with(particles),
            Err(SimulationError::Capacity { requested: 3, available: 4, .. })
        ));
        assert_eq!(simulation.lifecycle(), Lifecycle::Uninitialized);
    }

    #[test]
    fn seed_with_oversized_particle_is_rejected() {
        let mut simulation = HostSimulation::new(config(1)).unwrap();
        let particles = vec![Particle::new(Vec3::new(0.0, 2.0, 0.0), 0.6, Vec3::ZERO)];
        assert!(matches!(
            simulation.seed_with(particles),
            Err(SimulationError::Configuration(_))
        ));
    }

    #[test]
    fn grid_tracks_particles_after_stepping() {
        let mut simulation = HostSimulation::new(config(128)).unwrap();
        simulation.seed().unwrap();
        for _ in 0..10 {
            simulation.rebuild_grid().unwrap();
            simulation.step(&idle_sphere()).unwrap();
        }
        simulation.rebuild_grid().unwrap();
        let report = simulation.grid_report().unwrap();
        let grid = simulation.grid().unwrap();
        assert_eq!(
            grid.occupancy() + report.out_of_bounds as u64,
            simulation.capacity() as u64
        );
    }

    #[test]
    fn disposed_simulation_rejects_everything() {
        let mut simulation = HostSimulation::new(config(8)).unwrap();
        simulation.seed().unwrap();
        simulation.dispose().unwrap();
        assert!(simulation.grid().is_none());
        assert!(matches!(
            simulation.step(&idle_sphere()),
            Err(SimulationError::Lifecycle { state: Lifecycle::Disposed, .. })
        ));
        assert!(simulation.rebuild_grid().is_err());
        assert!(simulation.particles().is_err());
        assert!(simulation.grid_report().is_err());
        assert!(simulation.dispose().is_err());
    }
}
