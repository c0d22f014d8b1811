use std::f32::consts::{PI, TAU};

use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::config::ParticleShape;

/// Index range a mesh provider exposes to the indirect argument record.
pub trait MeshTopology {
    fn index_count(&self) -> u32;

    fn first_index(&self) -> u32 {
        0
    }

    fn base_vertex(&self) -> i32 {
        0
    }
}

#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}
unsafe impl Zeroable for Vertex {}
unsafe impl Pod for Vertex {}

impl Vertex {
    fn new(position: Vec3, normal: Vec3) -> Self {
        Vertex {
            position: position.to_array(),
            normal: normal.to_array(),
        }
    }
}

/// Unit-sized mesh centred on the origin. Instances scale it by their diameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshTopology for Mesh {
    fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }
}

impl Mesh {
    pub fn for_shape(shape: ParticleShape) -> Self {
        match shape {
            ParticleShape::Box => Mesh::unit_box(),
            ParticleShape::Sphere => Mesh::unit_sphere(12, 8),
        }
    }

    /// Flat shaded cube with half extent 0.5, four vertices per face.
    pub fn unit_box() -> Self {
        let mut vertices = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);
        for normal in [Vec3::X, Vec3::NEG_X, Vec3::Y, Vec3::NEG_Y, Vec3::Z, Vec3::NEG_Z] {
            // two tangents spanning the face, ordered so the winding faces outward
            let tangent = normal.any_orthonormal_vector();
            let bitangent = normal.cross(tangent);
            let base = vertices.len() as u32;
            for (u, v) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let corner = 0.5 * (normal + tangent * u + bitangent * v);
                vertices.push(Vertex::new(corner, normal));
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }
        Mesh { vertices, indices }
    }

    /// Low poly UV sphere of radius 0.5.
    pub fn unit_sphere(segments: u32, rings: u32) -> Self {
        let segments = segments.max(3);
        let rings = rings.max(2);
        let mut vertices = Vec::with_capacity(((segments + 1) * (rings + 1)) as usize);
        for ring in 0..=rings {
            let theta = PI * ring as f32 / rings as f32;
            for segment in 0..=segments {
                let phi = TAU * segment as f32 / segments as f32;
                let normal = Vec3::new(theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin());
                vertices.push(Vertex::new(0.5 * normal, normal));
            }
        }

        let stride = segments + 1;
        let mut indices = Vec::with_capacity((segments * rings * 6) as usize);
        for ring in 0..rings {
            for segment in 0..segments {
                let a = ring * stride + segment;
                let b = a + stride;
                indices.extend_from_slice(&[a, a + 1, b, a + 1, b + 1, b]);
            }
        }
        Mesh { vertices, indices }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_matches_layout() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
    }

    #[test]
    fn unit_box_is_closed_and_outward_facing() {
        let mesh = Mesh::unit_box();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.index_count(), 36);
        for vertex in &mesh.vertices {
            let position = Vec3::from_array(vertex.position);
            assert!((position.abs().max_element() - 0.5).abs() < 1e-6);
        }
        for triangle in mesh.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from_array(mesh.vertices[triangle[i] as usize].position));
            let face_normal = (b - a).cross(c - a);
            let normal = Vec3::from_array(mesh.vertices[triangle[0] as usize].normal);
            assert!(face_normal.dot(normal) > 0.0);
        }
    }

    #[test]
    fn unit_sphere_has_half_unit_radius() {
        let mesh = Mesh::unit_sphere(12, 8);
        assert_eq!(mesh.index_count(), 12 * 8 * 6);
        assert!(mesh
            .vertices
            .iter()
            .all(|vertex| (Vec3::from_array(vertex.position).length() - 0.5).abs() < 1e-5));
        assert!(mesh.indices.iter().all(|&index| (index as usize) < mesh.vertices.len()));
    }

    #[test]
    fn shape_selects_mesh() {
        assert_eq!(Mesh::for_shape(ParticleShape::Box), Mesh::unit_box());
        assert_eq!(Mesh::for_shape(ParticleShape::Sphere).index_count(), 576);
    }
}
