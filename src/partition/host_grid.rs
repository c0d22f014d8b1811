use std::sync::atomic::{AtomicU32, Ordering};

use rayon::prelude::*;

use crate::common::{GridCell, GridCounters, Particle, MAX_PARTICLES_PER_GRID_CELL, UNASSIGNED};

use super::GridLayout;

/// Host mirror of the device grid. Lanes are rayon tasks and slot reservation is an atomic
/// `fetch_add` on the cell count, exactly like `assign_grid` in `grid.wgsl`.
pub struct HostGrid {
    layout: GridLayout,
    counts: Vec<AtomicU32>,
    /// `cell * MAX_PARTICLES_PER_GRID_CELL + slot`
    slots: Vec<AtomicU32>,
    overflowed: AtomicU32,
    out_of_bounds: AtomicU32,
}

impl HostGrid {
    pub fn new(layout: GridLayout) -> Self {
        let cells = layout.cell_count();
        HostGrid {
            layout,
            counts: (0..cells).map(|_| AtomicU32::new(0)).collect(),
            slots: (0..cells * MAX_PARTICLES_PER_GRID_CELL)
                .map(|_| AtomicU32::new(UNASSIGNED))
                .collect(),
            overflowed: AtomicU32::new(0),
            out_of_bounds: AtomicU32::new(0),
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn clear(&self) {
        self.overflowed.store(0, Ordering::Relaxed);
        self.out_of_bounds.store(0, Ordering::Relaxed);
        self.counts
            .par_iter()
            .for_each(|count| count.store(0, Ordering::Relaxed));
    }

    pub fn init_particle_index(particles: &mut [Particle]) {
        particles.par_iter_mut().for_each(|particle| {
            particle.cell = UNASSIGNED;
            particle.slot = UNASSIGNED;
        });
    }

    pub fn assign(&self, particles: &mut [Particle]) {
        particles
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, particle)| {
                let Some(coordinate) = self.layout.cell_coordinate(particle.position()) else {
                    self.out_of_bounds.fetch_add(1, Ordering::Relaxed);
                    return;
                };
                let cell = self.layout.cell_index(coordinate);
                let slot = self.counts[cell as usize].fetch_add(1, Ordering::Relaxed);
                particle.cell = cell;
                if (slot as usize) < MAX_PARTICLES_PER_GRID_CELL {
                    self.slots[cell as usize * MAX_PARTICLES_PER_GRID_CELL + slot as usize]
                        .store(index as u32, Ordering::Relaxed);
                    particle.slot = slot;
                } else {
                    self.overflowed.fetch_add(1, Ordering::Relaxed);
                }
            });
    }

    /// Clear, reset particle linkage, then assign. Returns this frame's counters.
    pub fn rebuild(&self, particles: &mut [Particle]) -> GridCounters {
        self.clear();
        Self::init_particle_index(particles);
        self.assign(particles);
        self.counters()
    }

    pub fn counters(&self) -> GridCounters {
        GridCounters {
            overflowed: self.overflowed.load(Ordering::Relaxed),
            out_of_bounds: self.out_of_bounds.load(Ordering::Relaxed),
        }
    }

    /// Stored occupants of `cell`, at most `MAX_PARTICLES_PER_GRID_CELL`.
    pub fn occupants(&self, cell: u32) -> impl Iterator<Item = u32> + '_ {
        let base = cell as usize * MAX_PARTICLES_PER_GRID_CELL;
        let stored = (self.counts[cell as usize].load(Ordering::Relaxed) as usize)
            .min(MAX_PARTICLES_PER_GRID_CELL);
        self.slots[base..base + stored]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
    }

    /// Sum of cell occupancy counts, overflowing occupants included.
    pub fn occupancy(&self) -> u64 {
        self.counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed) as u64)
            .sum()
    }

    /// Snapshot in the device record layout.
    pub fn cells(&self) -> Vec<GridCell> {
        (0..self.layout.cell_count())
            .map(|cell| {
                let mut record = GridCell {
                    count: self.counts[cell].load(Ordering::Relaxed),
                    slots: [UNASSIGNED; MAX_PARTICLES_PER_GRID_CELL],
                };
                for (slot, id) in self.occupants(cell as u32).enumerate() {
                    record.slots[slot] = id;
                }
                record
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{UVec3, Vec3};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn layout() -> GridLayout {
        GridLayout {
            low_corner: Vec3::ZERO,
            cell_size: 1.0,
            dimension: UVec3::new(5, 5, 5),
        }
    }

    fn particle_at(position: Vec3) -> Particle {
        Particle::new(position, 0.1, Vec3::ZERO)
    }

    #[test]
    fn occupancy_matches_particles_inside_the_box() {
        let grid = HostGrid::new(layout());
        let mut rng = StdRng::seed_from_u64(7);
        let mut particles: Vec<Particle> = (0..400)
            .map(|_| particle_at(Vec3::new(rng.gen_range(-1.0..6.0), rng.gen_range(0.0..5.0), rng.gen_range(0.0..5.0))))
            .collect();
        let inside = particles
            .iter()
            .filter(|particle| grid.layout().cell_coordinate(particle.position()).is_some())
            .count() as u64;

        let counters = grid.rebuild(&mut particles);

        assert_eq!(grid.occupancy(), inside);
        assert_eq!(counters.out_of_bounds as u64, 400 - inside);
        let assigned = particles.iter().filter(|particle| particle.cell != UNASSIGNED).count() as u64;
        assert_eq!(assigned, inside);
    }

    #[test]
    fn every_stored_occupant_points_back_at_its_cell() {
        let grid = HostGrid::new(layout());
        let mut particles: Vec<Particle> = (0..50)
            .map(|i| particle_at(Vec3::new((i % 5) as f32 + 0.5, (i / 10) as f32 + 0.5, 2.5)))
            .collect();
        grid.rebuild(&mut particles);

        let mut seen = vec![false; particles.len()];
        for (cell, record) in grid.cells().iter().enumerate() {
            for &id in record.occupants() {
                assert_eq!(particles[id as usize].cell, cell as u32);
                assert!(!seen[id as usize], "particle {id} stored twice");
                seen[id as usize] = true;
            }
        }
        assert!(seen.iter().all(|stored| *stored));
    }

    #[test]
    fn overflow_is_counted_but_occupancy_stays_exact() {
        let grid = HostGrid::new(layout());
        let crowd = MAX_PARTICLES_PER_GRID_CELL + 4;
        let mut particles: Vec<Particle> = (0..crowd)
            .map(|i| particle_at(Vec3::new(2.1 + 0.01 * i as f32, 2.5, 2.5)))
            .collect();

        let counters = grid.rebuild(&mut particles);

        assert_eq!(counters.overflowed, 4);
        assert_eq!(grid.occupancy(), crowd as u64);
        let cell = grid.layout().cell_index(UVec3::new(2, 2, 2));
        assert_eq!(grid.occupants(cell).count(), MAX_PARTICLES_PER_GRID_CELL);
        let unslotted = particles.iter().filter(|particle| particle.slot == UNASSIGNED).count();
        assert_eq!(unslotted, 4);
        assert!(particles.iter().all(|particle| particle.cell == cell));
    }

    #[test]
    fn out_of_bounds_particle_is_reported_not_assigned() {
        let grid = HostGrid::new(layout());
        let mut particles = vec![particle_at(Vec3::new(2.5, 2.5, 2.5)), particle_at(Vec3::new(2.5, 5.0, 2.5))];
        let counters = grid.rebuild(&mut particles);
        assert_eq!(counters.out_of_bounds, 1);
        assert_eq!(particles[1].cell, UNASSIGNED);
        assert_eq!(grid.occupancy(), 1);
    }

    #[test]
    fn clearing_twice_equals_clearing_once() {
        let grid = HostGrid::new(layout());
        let mut particles: Vec<Particle> = (0..20).map(|i| particle_at(Vec3::splat(0.2 * i as f32))).collect();
        grid.rebuild(&mut particles);
        assert!(grid.occupancy() > 0);

        grid.clear();
        let once = grid.cells();
        grid.clear();
        let twice = grid.cells();

        assert_eq!(once, twice);
        assert!(twice.iter().all(|cell| cell.count == 0));
        assert_eq!(grid.counters(), GridCounters::default());
    }

    #[test]
    fn stale_linkage_is_overwritten_each_frame() {
        let grid = HostGrid::new(layout());
        let mut particles = vec![particle_at(Vec3::new(0.5, 0.5, 0.5))];
        grid.rebuild(&mut particles);
        assert_eq!(particles[0].cell, 0);

        particles[0].set_position(Vec3::new(-3.0, 0.5, 0.5));
        grid.rebuild(&mut particles);
        assert_eq!(particles[0].cell, UNASSIGNED);
        assert_eq!(particles[0].slot, UNASSIGNED);
    }
}
