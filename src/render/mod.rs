//! Read-only draw path over the particle store.

mod camera;
mod indirect;
mod mesh;

pub use camera::{Camera, Clip};
pub use indirect::{static_bounds, DrawIndexedIndirectArgs, IndirectRenderBridge, DEPTH_FORMAT};
pub use mesh::{Mesh, MeshTopology, Vertex};
