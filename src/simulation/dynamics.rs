//! Per-particle kernel math, shared by the host backend and mirrored line for line by
//! `simulation.wgsl`.

use std::f32::consts::TAU;

use glam::{Quat, Vec3};
use rand::Rng;

use crate::common::Particle;
use crate::config::{SimulationConfig, SpawnConfig};
use crate::geometry::{Aabb, HalfSpace, SphereState};

/// extra separation added when pushing overlapping pairs apart
pub const CONTACT_SLOP: f32 = 1e-4;

const EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepParameters {
    /// time scale times fixed timestep
    pub delta: f32,
    pub gravity: f32,
    pub restitution: f32,
    pub friction: f32,
    pub angular_damping: f32,
}

impl StepParameters {
    pub fn from_config(config: &SimulationConfig) -> Self {
        StepParameters {
            delta: config.step_delta(),
            gravity: config.dynamics.gravity,
            restitution: config.dynamics.restitution,
            friction: config.dynamics.friction,
            angular_damping: config.dynamics.angular_damping,
        }
    }
}

/// Builds the rotation covered in one step, multiplies its scalar part by `damping`,
/// renormalizes, and reads the rate back from the shortened angle.
///
/// This is an approximation of rotational drag, kept exact because the visible spin-down
/// depends on it.
pub fn damp_angular_velocity(angular_velocity: Vec3, damping: f32, delta: f32) -> Vec3 {
    let rate = angular_velocity.length();
    let angle = rate * delta;
    if angle <= EPSILON {
        return angular_velocity;
    }
    let axis = angular_velocity / rate;
    let half = 0.5 * angle;
    let rotation = (axis * half.sin()).extend(half.cos() * damping).normalize();
    let damped_angle = 2.0 * rotation.w.clamp(-1.0, 1.0).acos();
    axis * (damped_angle / delta)
}

/// Gravity, angular damping, then explicit integration of position and orientation.
pub fn integrate(particle: &mut Particle, parameters: &StepParameters) {
    let delta = parameters.delta;
    let velocity = particle.velocity() + Vec3::NEG_Y * (parameters.gravity * delta);
    let angular_velocity = damp_angular_velocity(
        particle.angular_velocity(),
        parameters.angular_damping,
        delta,
    );
    let spin = Quat::from_scaled_axis(angular_velocity * delta);

    particle.set_velocity(velocity);
    particle.set_angular_velocity(angular_velocity);
    particle.set_position(particle.position() + velocity * delta);
    particle.set_orientation((spin * particle.orientation()).normalize());
}

fn reflect(velocity: Vec3, normal: Vec3, parameters: &StepParameters) -> Vec3 {
    let normal_velocity = normal * velocity.dot(normal);
    let tangent_velocity = velocity - normal_velocity;
    tangent_velocity * (1.0 - parameters.friction) - normal_velocity * parameters.restitution
}

/// Penetration correction and restitution/friction response against a static plane.
///
/// Fires only when the signed distance is strictly less than the radius; a particle resting
/// exactly on the surface is left untouched.
pub fn resolve_half_space(
    particle: &mut Particle,
    plane: &HalfSpace,
    parameters: &StepParameters,
) -> bool {
    let distance = plane.signed_distance(particle.position());
    if !(distance < particle.radius) {
        return false;
    }
    particle.set_position(particle.position() + plane.normal * (particle.radius - distance));
    let velocity = particle.velocity();
    if velocity.dot(plane.normal) < 0.0 {
        particle.set_velocity(reflect(velocity, plane.normal, parameters));
    }
    true
}

/// Position-only push back onto the inside of a plane.
pub fn project_inside(particle: &mut Particle, plane: &HalfSpace) {
    let distance = plane.signed_distance(particle.position());
    if distance < particle.radius {
        particle.set_position(particle.position() + plane.normal * (particle.radius - distance));
    }
}

/// Response against the moving control sphere. The sphere's outward normal speed is added to
/// the outgoing velocity as a stand-in for momentum transfer.
pub fn resolve_sphere(
    particle: &mut Particle,
    sphere: &SphereState,
    parameters: &StepParameters,
) -> bool {
    let offset = particle.position() - sphere.center;
    let distance = offset.length();
    let reach = sphere.radius + particle.radius;
    if !(distance < reach) {
        return false;
    }
    let normal = if distance > EPSILON { offset / distance } else { Vec3::Y };
    particle.set_position(sphere.center + normal * reach);

    let relative = particle.velocity() - sphere.velocity;
    if relative.dot(normal) < 0.0 {
        let pushed = normal * sphere.velocity.dot(normal).max(0.0);
        particle.set_velocity(reflect(relative, normal, parameters) + pushed);
    }
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Contact {
    pub correction: Vec3,
    pub impulse: Vec3,
}

/// This particle's half of an equal-mass contact with `other`, or `None` when they do not
/// overlap. Both records come from the same snapshot, so the sum over all contacts does not
/// depend on the order neighbours are visited in.
pub fn pair_contact(
    index: u32,
    particle: &Particle,
    other_index: u32,
    other: &Particle,
    parameters: &StepParameters,
) -> Option<Contact> {
    if index == other_index {
        return None;
    }
    let offset = particle.position() - other.position();
    let distance = offset.length();
    let reach = particle.radius + other.radius;
    if !(distance < reach) {
        return None;
    }
    let normal = if distance > EPSILON {
        offset / distance
    } else if index < other_index {
        Vec3::NEG_X
    } else {
        Vec3::X
    };

    let correction = normal * (0.5 * (reach - distance + CONTACT_SLOP));
    let relative = particle.velocity() - other.velocity();
    let normal_speed = relative.dot(normal);
    let impulse = if normal_speed < 0.0 {
        let tangent = relative - normal * normal_speed;
        -normal * (0.5 * (1.0 + parameters.restitution) * normal_speed)
            - tangent * (0.5 * parameters.friction)
    } else {
        Vec3::ZERO
    };
    Some(Contact {
        correction,
        impulse,
    })
}

/// Part of `other`'s push that the static planes would take back, handed to this particle along
/// `correction`. `correction` is this particle's half of the pair push; `other` moves by its
/// negation, so a neighbour resting against a wall leaves the whole separation to this side.
pub fn pinned_share(other: &Particle, correction: Vec3, constraints: &[HalfSpace]) -> Vec3 {
    let push = correction.length();
    if push <= EPSILON {
        return Vec3::ZERO;
    }
    let normal = correction / push;
    let pushed = other.position() - correction;
    let share = constraints.iter().fold(0.0_f32, |share, plane| {
        let depth = other.radius - plane.signed_distance(pushed);
        let facing = plane.normal.dot(normal);
        if depth > 0.0 && facing > 0.0 {
            share.max(depth * facing)
        } else {
            share
        }
    });
    normal * share.min(push)
}

fn random_unit_vector<R: Rng>(rng: &mut R) -> Vec3 {
    let z: f32 = rng.gen_range(-1.0..=1.0);
    let phi: f32 = rng.gen_range(0.0..TAU);
    let r = (1.0 - z * z).max(0.0).sqrt();
    Vec3::new(r * phi.cos(), r * phi.sin(), z)
}

/// One freshly spawned record, sampled uniformly from the configured ranges.
pub fn spawn_particle<R: Rng>(rng: &mut R, spawn: &SpawnConfig, volume: &Aabb) -> Particle {
    let position = Vec3::new(
        rng.gen_range(volume.min.x..=volume.max.x),
        rng.gen_range(volume.min.y..=volume.max.y),
        rng.gen_range(volume.min.z..=volume.max.z),
    );
    let radius = rng.gen_range(spawn.min_scale..=spawn.max_scale);
    let speed = rng.gen_range(spawn.min_linear_speed..=spawn.max_linear_speed);
    let angular_speed = rng.gen_range(spawn.min_angular_speed..=spawn.max_angular_speed);

    let mut particle = Particle::new(position, radius, random_unit_vector(rng) * speed);
    particle.set_angular_velocity(random_unit_vector(rng) * angular_speed);
    particle.set_orientation(Quat::from_axis_angle(
        random_unit_vector(rng),
        rng.gen_range(0.0..TAU),
    ));
    particle
}
