//! Host-provided configuration surface.
//!
//! Both sibling scenes (inter-particle box and the tilted-floor collider scene) are presets of
//! the same [`SimulationConfig`]; nothing else in the crate branches on which one is running.

use std::path::Path;

use glam::{UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::common::{MAX_GRID_CELLS, MAX_PARTICLES};
use crate::error::{Result, SimulationError};
use crate::geometry::{
    floor_drop, static_constraints, Aabb, HalfSpace, STATIC_CONSTRAINT_COUNT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParticleShape {
    Box,
    Sphere,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// number of cells along x, y and z
    pub dimension: UVec3,
    pub low_corner: Vec3,
    /// edge length of a cell, derived from the largest particle diameter when absent
    pub cell_size: Option<f32>,
}

impl Default for GridConfig {
    fn default() -> Self {
        GridConfig {
            dimension: UVec3::splat(20),
            low_corner: Vec3::new(-8.0, -2.0, -8.0),
            cell_size: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnConfig {
    /// particle radius range
    pub min_scale: f32,
    pub max_scale: f32,
    pub min_linear_speed: f32,
    pub max_linear_speed: f32,
    /// radians per second
    pub min_angular_speed: f32,
    pub max_angular_speed: f32,
    /// spawn region, defaults to the upper half of the grid box inset by `max_scale`
    pub volume: Option<Aabb>,
    pub seed: u64,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        SpawnConfig {
            min_scale: 0.2,
            max_scale: 0.4,
            min_linear_speed: 1.0,
            max_linear_speed: 1.5,
            min_angular_speed: 1.0,
            max_angular_speed: 6.0,
            volume: None,
            seed: 0x1A7E_5EED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsConfig {
    pub gravity: f32,
    pub restitution: f32,
    pub friction: f32,
    /// multiplies the scalar part of the per-step rotation quaternion, must exceed 1
    pub angular_damping: f32,
    pub time_scale: f32,
    pub fixed_timestep: f32,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        DynamicsConfig {
            gravity: 9.8,
            restitution: 0.3,
            friction: 0.7,
            angular_damping: 1.02,
            time_scale: 1.0,
            fixed_timestep: 0.02,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlSphereConfig {
    pub radius: f32,
    pub start: Vec3,
}

impl Default for ControlSphereConfig {
    fn default() -> Self {
        ControlSphereConfig {
            radius: 0.8,
            start: Vec3::new(0.0, 1.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub particle_capacity: u32,
    pub grid: GridConfig,
    pub spawn: SpawnConfig,
    pub dynamics: DynamicsConfig,
    pub sphere: ControlSphereConfig,
    /// tilts the floor by up to 20 degrees about -x, in [-1, 1]
    pub floor_tilt: f32,
    /// where the floor crosses the box's vertical centre line, defaults to the lowest height that
    /// keeps the whole tilted floor inside the grid box
    pub floor_height: Option<f32>,
    pub shape: ParticleShape,
    /// frames between grid occupancy reports, 0 disables them
    pub report_interval: u32,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig::inter_particle()
    }
}

impl SimulationConfig {
    /// Balls of mixed size bouncing inside a walled box.
    pub fn inter_particle() -> Self {
        SimulationConfig {
            particle_capacity: 1000,
            grid: GridConfig::default(),
            spawn: SpawnConfig::default(),
            dynamics: DynamicsConfig::default(),
            sphere: ControlSphereConfig::default(),
            floor_tilt: 0.0,
            floor_height: None,
            shape: ParticleShape::Sphere,
            report_interval: 60,
        }
    }

    /// Small boxes falling onto a (possibly tilted) floor.
    ///
    /// The floor sits at y = -2 and the lattice reaches far enough below it that the floor stays
    /// inside the grid at any tilt.
    pub fn colliders() -> Self {
        SimulationConfig {
            particle_capacity: 1000,
            grid: GridConfig {
                dimension: UVec3::splat(32),
                low_corner: Vec3::new(-4.8, -3.8, -4.8),
                cell_size: None,
            },
            floor_height: Some(-2.0),
            spawn: SpawnConfig {
                min_scale: 0.1,
                max_scale: 0.15,
                ..SpawnConfig::default()
            },
            shape: ParticleShape::Box,
            ..SimulationConfig::inter_particle()
        }
    }

    pub fn from_ron(source: &str) -> Result<Self> {
        let config: SimulationConfig = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_ron(&source)?;
        log::info!("loaded configuration from {:?}", path.as_ref());
        Ok(config)
    }

    pub fn cell_size(&self) -> f32 {
        self.grid
            .cell_size
            .unwrap_or(2.0 * self.spawn.max_scale)
    }

    pub fn grid_bounds(&self) -> Aabb {
        let low = self.grid.low_corner;
        Aabb {
            min: low,
            max: low + self.grid.dimension.as_vec3() * self.cell_size(),
        }
    }

    pub fn floor_height(&self) -> f32 {
        self.floor_height.unwrap_or_else(|| {
            let bounds = self.grid_bounds();
            bounds.min.y + floor_drop(&bounds, self.floor_tilt)
        })
    }

    /// Floor, ceiling and walls for this configuration, see [`static_constraints`].
    pub fn static_constraints(&self) -> [HalfSpace; STATIC_CONSTRAINT_COUNT] {
        static_constraints(&self.grid_bounds(), self.floor_height(), self.floor_tilt)
    }

    pub fn cell_count(&self) -> u64 {
        let dimension = self.grid.dimension;
        dimension.x as u64 * dimension.y as u64 * dimension.z as u64
    }

    pub fn spawn_volume(&self) -> Aabb {
        if let Some(volume) = self.spawn.volume {
            return volume;
        }
        let bounds = self.grid_bounds();
        let inset = Vec3::splat(self.spawn.max_scale);
        let min = bounds.min + inset;
        let max = bounds.max - inset;
        Aabb {
            min: Vec3::new(min.x, 0.5 * (min.y + max.y), min.z),
            max,
        }
    }

    /// simulated seconds advanced by one step
    pub fn step_delta(&self) -> f32 {
        self.dynamics.time_scale * self.dynamics.fixed_timestep
    }

    /// Rejects configurations that would break collision completeness or produce
    /// nonsensical sampling ranges.
    pub fn validate(&self) -> Result<()> {
        let spawn = &self.spawn;
        let dynamics = &self.dynamics;

        if self.particle_capacity == 0 {
            return Err(SimulationError::configuration("particle capacity must be positive"));
        }
        if self.particle_capacity > MAX_PARTICLES {
            return Err(SimulationError::Capacity {
                what: "particle",
                requested: self.particle_capacity as u64,
                available: MAX_PARTICLES as u64,
            });
        }
        if self.grid.dimension.min_element() == 0 {
            return Err(SimulationError::configuration(format!(
                "grid dimension {} has an empty axis",
                self.grid.dimension
            )));
        }
        if self.cell_count() > MAX_GRID_CELLS {
            return Err(SimulationError::Capacity {
                what: "grid cell",
                requested: self.cell_count(),
                available: MAX_GRID_CELLS,
            });
        }
        if !(spawn.min_scale > 0.0 && spawn.min_scale <= spawn.max_scale) {
            return Err(SimulationError::configuration(format!(
                "scale range [{}, {}] must satisfy 0 < min <= max",
                spawn.min_scale, spawn.max_scale
            )));
        }
        let max_diameter = 2.0 * spawn.max_scale;
        if !(self.cell_size() >= max_diameter) {
            return Err(SimulationError::configuration(format!(
                "grid cell size {} is smaller than the largest particle diameter {}",
                self.cell_size(),
                max_diameter
            )));
        }
        for (name, min, max) in [
            ("linear speed", spawn.min_linear_speed, spawn.max_linear_speed),
            ("angular speed", spawn.min_angular_speed, spawn.max_angular_speed),
        ] {
            if !(min >= 0.0 && min <= max) {
                return Err(SimulationError::configuration(format!(
                    "{name} range [{min}, {max}] must satisfy 0 <= min <= max"
                )));
            }
        }
        for (name, value) in [
            ("restitution", dynamics.restitution),
            ("friction", dynamics.friction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimulationError::configuration(format!(
                    "{name} {value} is outside [0, 1]"
                )));
            }
        }
        if !(dynamics.angular_damping > 1.0) {
            return Err(SimulationError::configuration(format!(
                "angular damping {} must be greater than 1",
                dynamics.angular_damping
            )));
        }
        if !(0.0..=2.0).contains(&dynamics.time_scale) {
            return Err(SimulationError::configuration(format!(
                "time scale {} is outside [0, 2]",
                dynamics.time_scale
            )));
        }
        if !(dynamics.fixed_timestep > 0.0) {
            return Err(SimulationError::configuration("fixed timestep must be positive"));
        }
        if !dynamics.gravity.is_finite() {
            return Err(SimulationError::configuration("gravity must be finite"));
        }
        if !(self.sphere.radius > 0.0) {
            return Err(SimulationError::configuration("control sphere radius must be positive"));
        }
        if !(-1.0..=1.0).contains(&self.floor_tilt) {
            return Err(SimulationError::configuration(format!(
                "floor tilt {} is outside [-1, 1]",
                self.floor_tilt
            )));
        }
        let bounds = self.grid_bounds();
        let floor_low = self.floor_height() - floor_drop(&bounds, self.floor_tilt);
        if !(floor_low >= bounds.min.y - 1e-4 && self.floor_height() < bounds.max.y) {
            return Err(SimulationError::configuration(format!(
                "floor at height {} with tilt {} leaves the grid box {:?}..{:?}",
                self.floor_height(),
                self.floor_tilt,
                bounds.min,
                bounds.max
            )));
        }
        let volume = self.spawn_volume();
        if !self.grid_bounds().contains_box(&volume) || volume.min.cmpgt(volume.max).any() {
            return Err(SimulationError::configuration(format!(
                "spawn volume {:?}..{:?} does not fit inside the grid box",
                volume.min, volume.max
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_configuration_error(config: &SimulationConfig) {
        match config.validate() {
            Err(SimulationError::Configuration(_)) => {}
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn presets_are_valid() {
        SimulationConfig::inter_particle().validate().unwrap();
        SimulationConfig::colliders().validate().unwrap();
    }

    #[test]
    fn derived_cell_size_is_the_largest_diameter() {
        let config = SimulationConfig::inter_particle();
        assert_eq!(config.cell_size(), 0.8);
        let bounds = config.grid_bounds();
        assert_eq!(bounds.max - bounds.min, Vec3::splat(16.0));
    }

    #[test]
    fn rejects_cell_smaller_than_particle_diameter() {
        let mut config = SimulationConfig::inter_particle();
        config.grid.cell_size = Some(0.5);
        assert_configuration_error(&config);
    }

    #[test]
    fn rejects_out_of_range_dynamics() {
        let mut config = SimulationConfig::inter_particle();
        config.dynamics.restitution = 1.5;
        assert_configuration_error(&config);

        let mut config = SimulationConfig::inter_particle();
        config.dynamics.friction = -0.1;
        assert_configuration_error(&config);

        let mut config = SimulationConfig::inter_particle();
        config.dynamics.angular_damping = 1.0;
        assert_configuration_error(&config);

        let mut config = SimulationConfig::inter_particle();
        config.dynamics.time_scale = 2.5;
        assert_configuration_error(&config);
    }

    #[test]
    fn rejects_inverted_scale_range() {
        let mut config = SimulationConfig::inter_particle();
        config.spawn.min_scale = 0.5;
        config.spawn.max_scale = 0.3;
        assert_configuration_error(&config);
    }

    #[test]
    fn rejects_spawn_volume_outside_grid() {
        let mut config = SimulationConfig::inter_particle();
        config.spawn.volume = Some(Aabb {
            min: Vec3::splat(-100.0),
            max: Vec3::splat(100.0),
        });
        assert_configuration_error(&config);
    }

    #[test]
    fn collider_floor_stays_inside_the_grid_at_any_tilt() {
        for tilt in [-1.0, -0.5, 0.0, 0.5, 1.0] {
            let mut config = SimulationConfig::colliders();
            config.floor_tilt = tilt;
            config.validate().unwrap();
            assert_eq!(config.floor_height(), -2.0);
            let bounds = config.grid_bounds();
            assert!(config.floor_height() - floor_drop(&bounds, tilt) >= bounds.min.y);
        }
    }

    #[test]
    fn default_floor_rises_with_tilt() {
        let mut config = SimulationConfig::inter_particle();
        assert_eq!(config.floor_height(), config.grid.low_corner.y);
        config.floor_tilt = 0.5;
        config.validate().unwrap();
        assert!(config.floor_height() > config.grid.low_corner.y);
    }

    #[test]
    fn rejects_tilted_floor_leaving_the_grid() {
        let mut config = SimulationConfig::inter_particle();
        config.floor_tilt = 1.0;
        config.floor_height = Some(config.grid.low_corner.y);
        assert_configuration_error(&config);
    }

    #[test]
    fn oversized_capacity_is_a_capacity_error() {
        let mut config = SimulationConfig::inter_particle();
        config.particle_capacity = MAX_PARTICLES + 1;
        assert!(matches!(
            config.validate(),
            Err(SimulationError::Capacity { what: "particle", .. })
        ));
    }

    #[test]
    fn parses_partial_ron_with_defaults() {
        let config = SimulationConfig::from_ron(
            "(particle_capacity: 64, dynamics: (restitution: 0.5), shape: Box)",
        )
        .unwrap();
        assert_eq!(config.particle_capacity, 64);
        assert_eq!(config.dynamics.restitution, 0.5);
        assert_eq!(config.dynamics.friction, 0.7);
        assert_eq!(config.shape, ParticleShape::Box);
    }

    #[test]
    fn ron_round_trip_preserves_preset() {
        let config = SimulationConfig::colliders();
        let text = ron::to_string(&config).unwrap();
        assert_eq!(SimulationConfig::from_ron(&text).unwrap(), config);
    }
}
