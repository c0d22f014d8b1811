use std::{borrow::Cow, mem::size_of};

use bytemuck::{Pod, Zeroable};
use encase::ShaderType;
use glam::{Mat4, Vec3};
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType, BufferDescriptor, BufferUsages,
    ColorTargetState, CompareFunction, DepthStencilState, Device, FragmentState, IndexFormat,
    MultisampleState, PipelineLayoutDescriptor, PrimitiveState, Queue, RenderPass,
    RenderPipeline, RenderPipelineDescriptor, ShaderModuleDescriptor, ShaderSource,
    ShaderStages, TextureFormat, VertexBufferLayout, VertexState, VertexStepMode,
};

use crate::debug::read_buffer_blocking;
use crate::error::Result;
use crate::geometry::Aabb;
use crate::wgpu_utilities::QueueUtilities;

use super::{Camera, Mesh, MeshTopology, Vertex};

#[include_wgsl_oil::include_wgsl_oil("render.wgsl")]
mod shader {}

pub const DEPTH_FORMAT: TextureFormat = TextureFormat::Depth32Float;

/// Argument record consumed by `draw_indexed_indirect`, in the order the device reads it.
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct DrawIndexedIndirectArgs {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub base_vertex: i32,
    pub first_instance: u32,
}
unsafe impl Zeroable for DrawIndexedIndirectArgs {}
unsafe impl Pod for DrawIndexedIndirectArgs {}

impl DrawIndexedIndirectArgs {
    /// One instance per particle slot, every slot drawn every frame.
    pub fn for_mesh(mesh: &impl MeshTopology, capacity: u32) -> Self {
        DrawIndexedIndirectArgs {
            index_count: mesh.index_count(),
            instance_count: capacity,
            first_index: mesh.first_index(),
            base_vertex: mesh.base_vertex(),
            first_instance: 0,
        }
    }
}

/// Fixed culling volume: the grid box grown by half its extent on every side.
pub fn static_bounds(grid_bounds: &Aabb) -> Aabb {
    grid_bounds.inflate(0.5 * grid_bounds.extent())
}

#[derive(ShaderType)]
struct RenderUniforms {
    view_projection: Mat4,
    light_direction: Vec3,
    tint_speed: f32,
}

/// Draws every particle of the store as an instance of one mesh. The argument buffer is
/// written at creation and only ever read afterwards; particle data never leaves the device.
pub struct IndirectRenderBridge {
    args: DrawIndexedIndirectArgs,
    bounds: Aabb,
    args_buffer: Buffer,
    vertex_buffer: Buffer,
    index_buffer: Buffer,
    uniform_buffer: Buffer,
    bind_group: BindGroup,
    render_pipeline: RenderPipeline,
}

impl IndirectRenderBridge {
    pub fn new(
        device: &Device,
        target: ColorTargetState,
        mesh: &Mesh,
        particle_buffer: &Buffer,
        capacity: u32,
        grid_bounds: &Aabb,
    ) -> Self {
        let args = DrawIndexedIndirectArgs::for_mesh(mesh, capacity);
        let args_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("IndirectRenderBridge::args_buffer"),
            contents: bytemuck::bytes_of(&args),
            usage: BufferUsages::INDIRECT | BufferUsages::COPY_SRC,
        });
        let vertex_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("IndirectRenderBridge::vertex_buffer"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("IndirectRenderBridge::index_buffer"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: BufferUsages::INDEX,
        });
        let uniform_buffer = device.create_buffer(&BufferDescriptor {
            size: RenderUniforms::min_size().get(),
            label: Some("IndirectRenderBridge::uniform_buffer"),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let shader_module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("IndirectRenderBridge::shader"),
            source: ShaderSource::Wgsl(Cow::Borrowed(shader::SOURCE)),
        });

        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: None,
            entries: &[
                BindGroupLayoutEntry {
                    binding: shader::globals::uniforms::binding::BINDING,
                    visibility: ShaderStages::VERTEX_FRAGMENT,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                BindGroupLayoutEntry {
                    binding: shader::globals::particles::binding::BINDING,
                    visibility: ShaderStages::VERTEX,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: &bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: shader::globals::uniforms::binding::BINDING,
                    resource: uniform_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: shader::globals::particles::binding::BINDING,
                    resource: particle_buffer.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let render_pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("IndirectRenderBridge::render_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader_module,
                entry_point: shader::entry_points::vertex::NAME,
                buffers: &[VertexBufferLayout {
                    array_stride: size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3],
                }],
            },
            fragment: Some(FragmentState {
                module: &shader_module,
                entry_point: shader::entry_points::fragment::NAME,
                targets: &[Some(target)],
            }),
            primitive: PrimitiveState::default(),
            depth_stencil: Some(DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: CompareFunction::Less,
                stencil: Default::default(),
                bias: Default::default(),
            }),
            multisample: MultisampleState::default(),
            multiview: None,
        });

        log::debug!(
            "indirect draw: {} indices x {} instances",
            args.index_count,
            args.instance_count
        );

        IndirectRenderBridge {
            args,
            bounds: static_bounds(grid_bounds),
            args_buffer,
            vertex_buffer,
            index_buffer,
            uniform_buffer,
            bind_group,
            render_pipeline,
        }
    }

    pub fn args(&self) -> DrawIndexedIndirectArgs {
        self.args
    }

    pub fn bounds(&self) -> &Aabb {
        &self.bounds
    }

    /// Reads the argument record back from the device.
    pub fn read_args(&self, device: &Device, queue: &Queue) -> Result<DrawIndexedIndirectArgs> {
        let args = read_buffer_blocking::<DrawIndexedIndirectArgs>(device, queue, &self.args_buffer, 1)?;
        Ok(args.first().copied().unwrap_or_default())
    }

    pub fn update_camera(&self, queue: &Queue, camera: &Camera, tint_speed: f32) -> Result<()> {
        queue.write_encased_uniform_buffer(
            &self.uniform_buffer,
            &RenderUniforms {
                view_projection: camera.view_projection(),
                light_direction: Vec3::new(-0.4, -1.0, 0.3).normalize(),
                tint_speed: tint_speed.max(f32::EPSILON),
            },
        )
    }

    /// Records the single indirect draw into an open render pass.
    pub fn draw<'a>(&'a self, render_pass: &mut RenderPass<'a>) {
        render_pass.set_pipeline(&self.render_pipeline);
        render_pass.set_bind_group(0, &self.bind_group, &[]);
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.set_index_buffer(self.index_buffer.slice(..), IndexFormat::Uint32);
        render_pass.draw_indexed_indirect(&self.args_buffer, 0);
    }
}

impl Drop for IndirectRenderBridge {
    fn drop(&mut self) {
        self.args_buffer.destroy();
        self.vertex_buffer.destroy();
        self.index_buffer.destroy();
        self.uniform_buffer.destroy();
    }
}
