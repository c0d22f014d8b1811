//! Records shared between the host and the compute kernels.
//!
//! The device layouts are declared once in `common.wgsl`, which every kernel imports. The structs
//! below mirror them field for field and the tests check their sizes against the shader.

use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};

#[include_wgsl_oil::include_wgsl_oil("./common.wgsl")]
mod shader {}

/// slots stored inline per grid cell, occupants beyond this are counted as overflow
pub const MAX_PARTICLES_PER_GRID_CELL: usize =
    shader::constants::MAX_PARTICLES_PER_GRID_CELL::VALUE as usize;

/// marks a particle that has no grid cell or slot this frame
pub const UNASSIGNED: u32 = shader::constants::UNASSIGNED::VALUE as u32;

/// half-spaces bounding the simulation volume
pub const STATIC_CONSTRAINT_COUNT: usize = shader::constants::STATIC_CONSTRAINT_COUNT::VALUE as usize;

/// hard ceiling on particle capacity, independent of device limits
pub const MAX_PARTICLES: u32 = 1 << 20;

/// hard ceiling on the number of grid cells
pub const MAX_GRID_CELLS: u64 = 1 << 22;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub position: [f32; 3],
    pub radius: f32,
    /// xyzw unit quaternion
    pub orientation: [f32; 4],
    pub velocity: [f32; 3],
    pub cell: u32,
    /// rotation axis scaled by rate in radians per second
    pub angular_velocity: [f32; 3],
    pub slot: u32,
}
unsafe impl Zeroable for Particle {}
unsafe impl Pod for Particle {}

impl Default for Particle {
    fn default() -> Self {
        Particle::new(Vec3::ZERO, 0.0, Vec3::ZERO)
    }
}

impl Particle {
    pub fn new(position: Vec3, radius: f32, velocity: Vec3) -> Self {
        Particle {
            position: position.to_array(),
            radius,
            orientation: Quat::IDENTITY.to_array(),
            velocity: velocity.to_array(),
            cell: UNASSIGNED,
            angular_velocity: [0.0; 3],
            slot: UNASSIGNED,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::from_array(self.velocity)
    }

    pub fn angular_velocity(&self) -> Vec3 {
        Vec3::from_array(self.angular_velocity)
    }

    pub fn orientation(&self) -> Quat {
        Quat::from_array(self.orientation)
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position.to_array();
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity.to_array();
    }

    pub fn set_angular_velocity(&mut self, angular_velocity: Vec3) {
        self.angular_velocity = angular_velocity.to_array();
    }

    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation.to_array();
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridCell {
    /// true occupancy, may exceed the inline slot count
    pub count: u32,
    pub slots: [u32; MAX_PARTICLES_PER_GRID_CELL],
}
unsafe impl Zeroable for GridCell {}
unsafe impl Pod for GridCell {}

impl GridCell {
    /// particle ids actually stored in this cell
    pub fn occupants(&self) -> &[u32] {
        let stored = (self.count as usize).min(MAX_PARTICLES_PER_GRID_CELL);
        &self.slots[..stored]
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GridCounters {
    pub overflowed: u32,
    pub out_of_bounds: u32,
}
unsafe impl Zeroable for GridCounters {}
unsafe impl Pod for GridCounters {}
