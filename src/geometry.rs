//! Analytic collision geometry: static half-spaces derived from the grid box and the
//! single externally driven control sphere.

use glam::{Quat, Vec3, Vec4};
use serde::{Deserialize, Serialize};

pub use crate::common::STATIC_CONSTRAINT_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn contains_box(&self, other: &Aabb) -> bool {
        self.contains_point(other.min) && self.contains_point(other.max)
    }

    pub fn inflate(&self, margin: Vec3) -> Aabb {
        Aabb {
            min: self.min - margin,
            max: self.max + margin,
        }
    }
}

/// `dot(normal, p) + distance >= 0` holds for points on the inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HalfSpace {
    pub normal: Vec3,
    pub distance: f32,
}

impl HalfSpace {
    /// plane through `point` facing along `normal`
    pub fn through(normal: Vec3, point: Vec3) -> Self {
        let normal = normal.normalize();
        HalfSpace {
            normal,
            distance: -normal.dot(point),
        }
    }

    pub fn signed_distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) + self.distance
    }

    /// packed as `(normal, distance)` for the device
    pub fn to_vec4(&self) -> Vec4 {
        self.normal.extend(self.distance)
    }
}

/// Steepest floor tilt, reached at `floor_tilt = ±1`.
pub const MAX_FLOOR_TILT_DEGREES: f32 = 20.0;

/// How far a floor tilted by `floor_tilt` falls between the box's vertical centre line and its
/// lowest edge.
pub fn floor_drop(bounds: &Aabb, floor_tilt: f32) -> f32 {
    0.5 * bounds.extent().z * (MAX_FLOOR_TILT_DEGREES * floor_tilt).to_radians().tan().abs()
}

/// Floor, ceiling and four walls enclosing the grid box, in that order.
///
/// The floor crosses the box's vertical centre line at `floor_height`, and `floor_tilt` in
/// [-1, 1] rotates it by up to 20 degrees about -x.
pub fn static_constraints(
    bounds: &Aabb,
    floor_height: f32,
    floor_tilt: f32,
) -> [HalfSpace; STATIC_CONSTRAINT_COUNT] {
    let (low, high) = (bounds.min, bounds.max);
    let floor_rotation =
        Quat::from_axis_angle(Vec3::NEG_X, (MAX_FLOOR_TILT_DEGREES * floor_tilt).to_radians());
    let floor_anchor = Vec3::new(bounds.center().x, floor_height, bounds.center().z);
    [
        HalfSpace::through(floor_rotation * Vec3::Y, floor_anchor),
        HalfSpace::through(Vec3::NEG_Y, high),
        HalfSpace::through(Vec3::X, low),
        HalfSpace::through(Vec3::NEG_X, high),
        HalfSpace::through(Vec3::Z, low),
        HalfSpace::through(Vec3::NEG_Z, high),
    ]
}

/// Source of the control object's world position, read once per tick.
pub trait TransformProvider {
    fn position(&self) -> Vec3;
}

impl TransformProvider for Vec3 {
    fn position(&self) -> Vec3 {
        *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SphereState {
    pub center: Vec3,
    pub radius: f32,
    pub velocity: Vec3,
}

/// Tracks the dynamic sphere between frames. Velocity is a finite difference of the centre over
/// the fixed timestep, computed on the host since only one such object exists.
#[derive(Debug, Clone)]
pub struct ControlSphere {
    radius: f32,
    previous: Option<Vec3>,
    current: SphereState,
}

impl ControlSphere {
    pub fn new(radius: f32, center: Vec3) -> Self {
        ControlSphere {
            radius,
            previous: None,
            current: SphereState {
                center,
                radius,
                velocity: Vec3::ZERO,
            },
        }
    }

    pub fn update(&mut self, center: Vec3, fixed_timestep: f32) -> SphereState {
        let previous = self.previous.unwrap_or(center);
        self.current = SphereState {
            center,
            radius: self.radius,
            velocity: (center - previous) / fixed_timestep,
        };
        self.current
    }

    /// end of frame, the current centre becomes the reference for the next velocity
    pub fn commit(&mut self) {
        self.previous = Some(self.current.center);
    }

    pub fn state(&self) -> SphereState {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> Aabb {
        Aabb {
            min: Vec3::new(-1.0, 0.0, -1.0),
            max: Vec3::new(1.0, 2.0, 1.0),
        }
    }

    #[test]
    fn static_constraints_contain_the_box_interior() {
        let bounds = unit_box();
        let constraints = static_constraints(&bounds, bounds.min.y, 0.0);
        for constraint in constraints {
            assert!((constraint.normal.length() - 1.0).abs() < 1e-6);
            assert!(constraint.signed_distance(bounds.center()) > 0.0);
        }
        let outside = constraints
            .iter()
            .filter(|constraint| constraint.signed_distance(Vec3::splat(10.0)) < 0.0)
            .count();
        assert_eq!(outside, 3);
        assert_eq!(constraints[0].signed_distance(Vec3::new(0.0, 0.0, 0.0)), 0.0);
        assert_eq!(constraints[1].signed_distance(Vec3::new(0.0, 2.0, 0.0)), 0.0);
        assert_eq!(constraints[3].signed_distance(Vec3::new(1.0, 1.0, 0.0)), 0.0);
    }

    #[test]
    fn distance_follows_reference_point_formula() {
        let plane = HalfSpace::through(Vec3::Y, Vec3::new(3.0, -2.0, 7.0));
        assert_eq!(plane.distance, 2.0);
        assert_eq!(plane.to_vec4(), Vec4::new(0.0, 1.0, 0.0, 2.0));
    }

    #[test]
    fn tilted_floor_passes_through_its_anchor() {
        let bounds = unit_box();
        let floor = static_constraints(&bounds, 0.5, 1.0)[0];
        assert!(floor.signed_distance(Vec3::new(0.0, 0.5, 0.0)).abs() < 1e-6);
        let angle = floor.normal.angle_between(Vec3::Y).to_degrees();
        assert!((angle - 20.0).abs() < 1e-3);
    }

    #[test]
    fn floor_lifted_by_its_drop_stays_inside_the_box() {
        let bounds = unit_box();
        for tilt in [-1.0, -0.3, 0.0, 0.6, 1.0] {
            let drop = floor_drop(&bounds, tilt);
            let floor = static_constraints(&bounds, bounds.min.y + drop, tilt)[0];
            for corner in [
                Vec3::new(bounds.min.x, bounds.min.y, bounds.min.z),
                Vec3::new(bounds.max.x, bounds.min.y, bounds.min.z),
                Vec3::new(bounds.min.x, bounds.min.y, bounds.max.z),
                Vec3::new(bounds.max.x, bounds.min.y, bounds.max.z),
            ] {
                assert!(floor.signed_distance(corner) <= 1e-5, "tilt {tilt} corner {corner}");
            }
        }
        assert_eq!(floor_drop(&bounds, 0.0), 0.0);
    }

    #[test]
    fn sphere_velocity_is_difference_over_timestep() {
        let mut sphere = ControlSphere::new(0.8, Vec3::ZERO);
        let first = sphere.update(Vec3::new(1.0, 0.0, 0.0), 0.02);
        assert_eq!(first.velocity, Vec3::ZERO);
        sphere.commit();
        let second = sphere.update(Vec3::new(1.1, 0.0, 0.0), 0.02);
        assert!((second.velocity - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-3);
        assert_eq!(second.radius, 0.8);
    }

    #[test]
    fn aabb_containment() {
        let outer = unit_box();
        let inner = Aabb {
            min: Vec3::new(-0.5, 0.5, -0.5),
            max: Vec3::new(0.5, 1.5, 0.5),
        };
        assert!(outer.contains_box(&inner));
        assert!(!inner.contains_box(&outer));
        assert_eq!(outer.inflate(Vec3::ONE).extent(), Vec3::new(4.0, 4.0, 4.0));
    }
}
