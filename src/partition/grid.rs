use std::borrow::Cow;

use bytemuck::Zeroable;
use encase::ShaderType;
use glam::{IVec3, UVec3, Vec3};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType, BufferDescriptor, BufferUsages,
    CommandEncoder, CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, Device, PipelineLayoutDescriptor, Queue, ShaderModuleDescriptor,
    ShaderSource, ShaderStages,
};

use crate::common::{GridCell, GridCounters};
use crate::config::SimulationConfig;
use crate::debug::read_buffer_blocking;
use crate::error::{Result, SimulationError};
use crate::wgpu_utilities::QueueUtilities;

#[include_wgsl_oil::include_wgsl_oil("./grid.wgsl")]
mod shader {}

/// Uniform lattice over a static world-space box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub low_corner: Vec3,
    pub cell_size: f32,
    pub dimension: UVec3,
}

impl GridLayout {
    pub fn from_config(config: &SimulationConfig) -> Self {
        GridLayout {
            low_corner: config.grid.low_corner,
            cell_size: config.cell_size(),
            dimension: config.grid.dimension,
        }
    }

    pub fn cell_count(&self) -> usize {
        (self.dimension.x * self.dimension.y * self.dimension.z) as usize
    }

    /// Cell coordinate by `floor`, or `None` when the point lies outside `[0, dimension)`.
    pub fn cell_coordinate(&self, position: Vec3) -> Option<UVec3> {
        let coordinate = ((position - self.low_corner) / self.cell_size).floor();
        if coordinate.cmplt(Vec3::ZERO).any() || coordinate.cmpge(self.dimension.as_vec3()).any() {
            return None;
        }
        Some(coordinate.as_uvec3())
    }

    pub fn cell_index(&self, coordinate: UVec3) -> u32 {
        coordinate.x + self.dimension.x * (coordinate.y + self.dimension.y * coordinate.z)
    }

    pub fn coordinate_of(&self, index: u32) -> UVec3 {
        UVec3::new(
            index % self.dimension.x,
            (index / self.dimension.x) % self.dimension.y,
            index / (self.dimension.x * self.dimension.y),
        )
    }

    /// The cell itself and its up to 26 in-bounds neighbours.
    pub fn neighborhood(&self, index: u32) -> impl Iterator<Item = u32> + '_ {
        let center = self.coordinate_of(index).as_ivec3();
        let dimension = self.dimension.as_ivec3();
        (-1..=1)
            .flat_map(|z| (-1..=1).flat_map(move |y| (-1..=1).map(move |x| IVec3::new(x, y, z))))
            .map(move |offset| center + offset)
            .filter(move |coordinate| {
                coordinate.cmpge(IVec3::ZERO).all() && coordinate.cmplt(dimension).all()
            })
            .map(move |coordinate| self.cell_index(coordinate.as_uvec3()))
    }
}

#[derive(ShaderType)]
struct GridUniforms {
    low_corner: Vec3,
    cell_size: f32,
    dimension: UVec3,
    num_particles: u32,
}

/// Device-resident grid rebuilt every frame by `clear_grid`, `init_particle_index` and
/// `assign_grid`.
pub struct GridPartition {
    layout: GridLayout,
    num_particles: u32,
    clear_grid_pipeline: ComputePipeline,
    init_particle_index_pipeline: ComputePipeline,
    assign_grid_pipeline: ComputePipeline,
    bind_group: BindGroup,
    pub grid_buffer: Buffer,
    pub counters_buffer: Buffer,
    uniform_buffer: Buffer,
}

impl Drop for GridPartition {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl GridPartition {
    pub fn new(
        device: &Device,
        queue: &Queue,
        layout: GridLayout,
        particle_buffer: &Buffer,
        num_particles: u32,
    ) -> Result<Self> {
        let grid_size = std::mem::size_of::<GridCell>() as u64 * layout.cell_count() as u64;
        let max_binding = device.limits().max_storage_buffer_binding_size as u64;
        if grid_size > max_binding {
            return Err(SimulationError::Capacity {
                what: "grid cell",
                requested: layout.cell_count() as u64,
                available: max_binding / std::mem::size_of::<GridCell>() as u64,
            });
        }

        let shader_module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("GridPartition::shader"),
            source: ShaderSource::Wgsl(Cow::Borrowed(shader::SOURCE)),
        });

        let storage_entry = |binding: u32| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: None,
            entries: &[
                storage_entry(shader::globals::particles::binding::BINDING),
                storage_entry(shader::globals::grid::binding::BINDING),
                storage_entry(shader::globals::counters::binding::BINDING),
                BindGroupLayoutEntry {
                    binding: shader::globals::params::binding::BINDING,
                    visibility: ShaderStages::COMPUTE,
                    ty: BindingType::Buffer {
                        ty: BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: None,
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |entry_point: &str| {
            device.create_compute_pipeline(&ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader_module,
                entry_point,
            })
        };
        let clear_grid_pipeline = pipeline(shader::entry_points::clear_grid::NAME);
        let init_particle_index_pipeline =
            pipeline(shader::entry_points::init_particle_index::NAME);
        let assign_grid_pipeline = pipeline(shader::entry_points::assign_grid::NAME);

        let grid_buffer = device.create_buffer(&BufferDescriptor {
            size: grid_size,
            label: Some("GridPartition::grid_buffer"),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let counters_buffer = device.create_buffer(&BufferDescriptor {
            size: std::mem::size_of::<GridCounters>() as u64,
            label: Some("GridPartition::counters_buffer"),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        queue.write_buffer(&counters_buffer, 0, bytemuck::bytes_of(&GridCounters::zeroed()));

        let uniform_buffer = device.create_buffer(&BufferDescriptor {
            size: GridUniforms::min_size().get(),
            label: Some("GridPartition::uniform_buffer"),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        queue.write_encased_uniform_buffer(
            &uniform_buffer,
            &GridUniforms {
                low_corner: layout.low_corner,
                cell_size: layout.cell_size,
                dimension: layout.dimension,
                num_particles,
            },
        )?;

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: &bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: shader::globals::particles::binding::BINDING,
                    resource: particle_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: shader::globals::grid::binding::BINDING,
                    resource: grid_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: shader::globals::counters::binding::BINDING,
                    resource: counters_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: shader::globals::params::binding::BINDING,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        log::debug!(
            "grid partition: {} cells of {} ({} bytes)",
            layout.cell_count(),
            layout.cell_size,
            grid_size
        );

        Ok(GridPartition {
            layout,
            num_particles,
            clear_grid_pipeline,
            init_particle_index_pipeline,
            assign_grid_pipeline,
            bind_group,
            grid_buffer,
            counters_buffer,
            uniform_buffer,
        })
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    fn workgroups(count: u32, workgroup_size: [u32; 3]) -> u32 {
        (count as f32 / workgroup_size[0] as f32).ceil() as u32
    }

    pub fn clear_grid_with_encoder(&self, command_encoder: &mut CommandEncoder) {
        let mut compute_pass =
            command_encoder.begin_compute_pass(&ComputePassDescriptor { label: Some("clear_grid") });
        compute_pass.set_bind_group(0, &self.bind_group, &[]);
        compute_pass.set_pipeline(&self.clear_grid_pipeline);
        compute_pass.dispatch_workgroups(
            Self::workgroups(
                self.layout.cell_count() as u32,
                shader::entry_points::clear_grid::WORKGROUP_SIZE,
            ),
            1,
            1,
        );
    }

    /// Records the full rebuild. Each dispatch completes before the next one starts, so
    /// assignment never observes a partially cleared lattice.
    pub fn build_grid_with_encoder(&self, command_encoder: &mut CommandEncoder) {
        self.clear_grid_with_encoder(command_encoder);

        let mut compute_pass =
            command_encoder.begin_compute_pass(&ComputePassDescriptor { label: Some("assign_grid") });
        compute_pass.set_bind_group(0, &self.bind_group, &[]);

        compute_pass.set_pipeline(&self.init_particle_index_pipeline);
        compute_pass.dispatch_workgroups(
            Self::workgroups(
                self.num_particles,
                shader::entry_points::init_particle_index::WORKGROUP_SIZE,
            ),
            1,
            1,
        );

        compute_pass.set_pipeline(&self.assign_grid_pipeline);
        compute_pass.dispatch_workgroups(
            Self::workgroups(
                self.num_particles,
                shader::entry_points::assign_grid::WORKGROUP_SIZE,
            ),
            1,
            1,
        );
    }

    pub fn build_grid(&self, device: &Device, queue: &Queue) {
        let mut command_encoder =
            device.create_command_encoder(&CommandEncoderDescriptor { label: None });
        self.build_grid_with_encoder(&mut command_encoder);
        queue.submit(Some(command_encoder.finish()));
    }

    pub fn clear_grid(&self, device: &Device, queue: &Queue) {
        let mut command_encoder =
            device.create_command_encoder(&CommandEncoderDescriptor { label: None });
        self.clear_grid_with_encoder(&mut command_encoder);
        queue.submit(Some(command_encoder.finish()));
    }

    pub fn read_cells(&self, device: &Device, queue: &Queue) -> Result<Vec<GridCell>> {
        read_buffer_blocking(device, queue, &self.grid_buffer, self.layout.cell_count() as u64)
    }

    pub fn read_counters(&self, device: &Device, queue: &Queue) -> Result<GridCounters> {
        let counters = read_buffer_blocking::<GridCounters>(device, queue, &self.counters_buffer, 1)?;
        Ok(counters.first().copied().unwrap_or_default())
    }

    pub fn destroy(&self) {
        self.grid_buffer.destroy();
        self.counters_buffer.destroy();
        self.uniform_buffer.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GridLayout {
        GridLayout {
            low_corner: Vec3::new(-2.0, 0.0, -2.0),
            cell_size: 1.0,
            dimension: UVec3::new(4, 3, 4),
        }
    }

    #[test]
    fn boundary_point_belongs_to_positive_cell() {
        let layout = layout();
        assert_eq!(
            layout.cell_coordinate(Vec3::new(-1.0, 1.0, -2.0)),
            Some(UVec3::new(1, 1, 0))
        );
        assert_eq!(layout.cell_coordinate(Vec3::new(-2.0, 0.0, -2.0)), Some(UVec3::ZERO));
    }

    #[test]
    fn points_outside_the_box_have_no_cell() {
        let layout = layout();
        assert_eq!(layout.cell_coordinate(Vec3::new(2.0, 1.0, 0.0)), None);
        assert_eq!(layout.cell_coordinate(Vec3::new(0.0, -0.001, 0.0)), None);
        assert_eq!(layout.cell_coordinate(Vec3::new(0.0, 2.999, 1.999)), Some(UVec3::new(2, 2, 3)));
    }

    #[test]
    fn index_and_coordinate_are_inverse() {
        let layout = layout();
        for index in 0..layout.cell_count() as u32 {
            assert_eq!(layout.cell_index(layout.coordinate_of(index)), index);
        }
    }

    #[test]
    fn neighborhood_is_clipped_to_the_lattice() {
        let layout = layout();
        let corner = layout.cell_index(UVec3::ZERO);
        assert_eq!(layout.neighborhood(corner).count(), 8);
        let inner = layout.cell_index(UVec3::new(1, 1, 1));
        let cells: Vec<u32> = layout.neighborhood(inner).collect();
        assert_eq!(cells.len(), 27);
        assert!(cells.contains(&inner));
    }
}
