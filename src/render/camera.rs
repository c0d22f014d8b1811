use glam::{Mat4, Quat, Vec3, Vec4};
use std::f32::consts::PI;

use crate::geometry::Aabb;

#[derive(Debug, Default, Clone, Copy)]
pub struct Clip {
    pub near: f32,
    pub far: f32,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Camera {
    pub fov: f32,
    /// the proportional relationship between the width and height of the camera's view frustum
    pub aspect: f32,
    pub clip: Clip,
    pub position: Vec3,
    pub rotation: Quat,
}

impl Camera {
    pub fn new() -> Self {
        Camera {
            aspect: 1.,
            fov: PI / 3.,
            clip: Clip {
                near: 0.1,
                far: 1000.0,
            },
            ..Default::default()
        }
    }

    /// Places the camera `distance` away from `target`, looking at it.
    pub fn orbit(&mut self, target: Vec3, distance: f32, yaw: f32, pitch: f32) {
        self.rotation = Quat::from_axis_angle(Vec3::Y, yaw) * Quat::from_axis_angle(Vec3::X, pitch);
        self.position = target - self.rotation * Vec3::Z * distance;
    }

    pub fn view(&self) -> Mat4 {
        let forward = self.rotation * Vec3::Z;
        let up = self.rotation * Vec3::Y;
        Mat4::look_at_lh(self.position, self.position + forward, up)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective_lh(self.fov, self.aspect, self.clip.near, self.clip.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }

    /// Conservative frustum test: `false` only when every corner of `bounds` lies outside the
    /// same clip plane.
    pub fn sees(&self, bounds: &Aabb) -> bool {
        let view_projection = self.view_projection();
        let corners = (0..8).map(|corner| {
            let pick = |bit: u32, low: f32, high: f32| if corner & bit == 0 { low } else { high };
            view_projection
                * Vec4::new(
                    pick(1, bounds.min.x, bounds.max.x),
                    pick(2, bounds.min.y, bounds.max.y),
                    pick(4, bounds.min.z, bounds.max.z),
                    1.0,
                )
        });
        let clip_planes: [fn(Vec4) -> bool; 6] = [
            |c| c.x < -c.w,
            |c| c.x > c.w,
            |c| c.y < -c.w,
            |c| c.y > c.w,
            |c| c.z < 0.0,
            |c| c.z > c.w,
        ];
        let corners: Vec<Vec4> = corners.collect();
        !clip_planes
            .iter()
            .any(|outside| corners.iter().all(|&corner| outside(corner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> Aabb {
        Aabb {
            min: Vec3::splat(-1.0),
            max: Vec3::splat(1.0),
        }
    }

    #[test]
    fn orbiting_camera_sees_its_target() {
        let mut camera = Camera::new();
        camera.orbit(Vec3::ZERO, 10.0, 0.7, 0.3);
        assert!((camera.position.length() - 10.0).abs() < 1e-4);
        assert!(camera.sees(&bounds()));
    }

    #[test]
    fn box_behind_the_camera_is_culled() {
        let mut camera = Camera::new();
        camera.orbit(Vec3::new(0.0, 0.0, 50.0), 10.0, 0.0, 0.0);
        let behind = Aabb {
            min: Vec3::new(-1.0, -1.0, 20.0),
            max: Vec3::new(1.0, 1.0, 30.0),
        };
        assert!(!camera.sees(&behind));
    }
}
