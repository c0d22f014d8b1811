use std::{borrow::Cow, mem::size_of, sync::Arc};

use encase::ShaderType;
use glam::{UVec3, Vec2, Vec3, Vec4};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, BindingType, Buffer, BufferBindingType, BufferDescriptor, BufferUsages,
    CommandEncoder, CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline,
    ComputePipelineDescriptor, Device, DeviceDescriptor, Features, Instance, Limits,
    PipelineLayoutDescriptor, PowerPreference, Queue, RequestAdapterOptions,
    ShaderModuleDescriptor, ShaderSource, ShaderStages,
};

use crate::common::{GridCell, GridCounters, Particle, UNASSIGNED};
use crate::config::SimulationConfig;
use crate::debug::read_buffer_blocking;
use crate::error::{Result, SimulationError};
use crate::geometry::{HalfSpace, SphereState, STATIC_CONSTRAINT_COUNT};
use crate::partition::{GridLayout, GridPartition};
use crate::wgpu_utilities::QueueUtilities;

use super::dynamics::{StepParameters, CONTACT_SLOP};
use super::{check_seed_records, Lifecycle, ParticleSimulation};

#[include_wgsl_oil::include_wgsl_oil("./simulation.wgsl")]
mod simulation_shader {}

/// Device and queue shared by the simulation and whatever renders it.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<Device>,
    pub queue: Arc<Queue>,
}

impl GpuContext {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        GpuContext { device, queue }
    }

    /// Requests any adapter without a surface. Fails with [`SimulationError::NoAdapter`] on
    /// machines without a usable GPU or software fallback.
    pub async fn request_headless() -> Result<Self> {
        let instance = Instance::default();
        let adapter = instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or(SimulationError::NoAdapter)?;
        let (device, queue) = adapter
            .request_device(
                &DeviceDescriptor {
                    label: None,
                    features: Features::empty(),
                    limits: Limits::downlevel_defaults().using_resolution(adapter.limits()),
                },
                None,
            )
            .await?;
        log::info!("headless adapter: {:?}", adapter.get_info().name);
        Ok(GpuContext::new(Arc::new(device), Arc::new(queue)))
    }

    pub fn headless() -> Result<Self> {
        futures::executor::block_on(Self::request_headless())
    }
}

#[derive(ShaderType)]
struct SimulationUniforms {
    delta: f32,
    gravity: f32,
    restitution: f32,
    friction: f32,
    angular_damping: f32,
    seed: u32,
    num_particles: u32,
    contact_slop: f32,
    sphere: Vec4,
    sphere_velocity: Vec4,
    planes: [Vec4; STATIC_CONSTRAINT_COUNT],
    scale_range: Vec2,
    linear_speed_range: Vec2,
    angular_speed_range: Vec2,
    spawn_min: Vec3,
    spawn_max: Vec3,
    grid_low_corner: Vec3,
    cell_size: f32,
    grid_dimension: UVec3,
}

/// Buffers that exist only between construction and `dispose`.
struct DeviceStore {
    particle_buffer: Buffer,
    snapshot_buffer: Buffer,
    uniform_buffer: Buffer,
    bind_group: BindGroup,
    grid: GridPartition,
}

impl DeviceStore {
    fn destroy(&self) {
        self.grid.destroy();
        self.particle_buffer.destroy();
        self.snapshot_buffer.destroy();
        self.uniform_buffer.destroy();
    }
}

pub struct GpuSimulation {
    context: GpuContext,
    config: SimulationConfig,
    lifecycle: Lifecycle,
    parameters: StepParameters,
    constraints: [HalfSpace; STATIC_CONSTRAINT_COUNT],
    init_particles_pipeline: ComputePipeline,
    integrate_pipeline: ComputePipeline,
    collide_pipeline: ComputePipeline,
    store: Option<DeviceStore>,
}

impl GpuSimulation {
    pub fn new(context: GpuContext, config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let device = &context.device;
        let num_particles = config.particle_capacity;

        let particle_size = size_of::<Particle>() as u64;
        let limits = device.limits();
        let max_binding = (limits.max_storage_buffer_binding_size as u64).min(limits.max_buffer_size);
        if particle_size * num_particles as u64 > max_binding {
            return Err(SimulationError::Capacity {
                what: "particle",
                requested: num_particles as u64,
                available: max_binding / particle_size,
            });
        }

        let shader_module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some("GpuSimulation::shader"),
            source: ShaderSource::Wgsl(Cow::Borrowed(simulation_shader::SOURCE)),
        });

        let storage_entry = |binding: u32, read_only: bool| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: BindingType::Buffer {
                ty: BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: None,
            entries: &[
                storage_entry(simulation_shader::globals::particles::binding::BINDING, false),
                storage_entry(simulation_shader::globals::snapshot::binding::BINDING, true),
                storage_entry(simulation_shader::globals::grid::binding::BINDING, true),
                BindGroupLayoutEntry {
                    binding: simulation_shader::globals::params::binding::BINDING,
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
        let init_particles_pipeline =
            pipeline(simulation_shader::entry_points::init_particles::NAME);
        let integrate_pipeline = pipeline(simulation_shader::entry_points::integrate::NAME);
        let collide_pipeline = pipeline(simulation_shader::entry_points::collide::NAME);

        let particle_buffer = device.create_buffer(&BufferDescriptor {
            size: particle_size * num_particles as u64,
            label: Some("GpuSimulation::particle_buffer"),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST | BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let snapshot_buffer = device.create_buffer(&BufferDescriptor {
            size: particle_size * num_particles as u64,
            label: Some("GpuSimulation::snapshot_buffer"),
            usage: BufferUsages::STORAGE | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_buffer = device.create_buffer(&BufferDescriptor {
            size: SimulationUniforms::min_size().get(),
            label: Some("GpuSimulation::uniform_buffer"),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let grid = GridPartition::new(
            device,
            &context.queue,
            GridLayout::from_config(&config),
            &particle_buffer,
            num_particles,
        )?;

        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: None,
            layout: &bind_group_layout,
            entries: &[
                BindGroupEntry {
                    binding: simulation_shader::globals::particles::binding::BINDING,
                    resource: particle_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: simulation_shader::globals::snapshot::binding::BINDING,
                    resource: snapshot_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: simulation_shader::globals::grid::binding::BINDING,
                    resource: grid.grid_buffer.as_entire_binding(),
                },
                BindGroupEntry {
                    binding: simulation_shader::globals::params::binding::BINDING,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        log::debug!(
            "gpu simulation: {} particles ({} bytes)",
            num_particles,
            particle_size * num_particles as u64
        );

        Ok(GpuSimulation {
            parameters: StepParameters::from_config(&config),
            constraints: config.static_constraints(),
            context,
            config,
            lifecycle: Lifecycle::Uninitialized,
            init_particles_pipeline,
            integrate_pipeline,
            collide_pipeline,
            store: Some(DeviceStore {
                particle_buffer,
                snapshot_buffer,
                uniform_buffer,
                bind_group,
                grid,
            }),
        })
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    fn live_store(&self, operation: &'static str) -> Result<&DeviceStore> {
        self.lifecycle.require_live(operation)?;
        self.store.as_ref().ok_or(SimulationError::Lifecycle {
            operation,
            state: self.lifecycle,
        })
    }

    fn unseeded_store(&self, operation: &'static str) -> Result<&DeviceStore> {
        match (self.lifecycle, self.store.as_ref()) {
            (Lifecycle::Uninitialized, Some(store)) => Ok(store),
            (state, _) => Err(SimulationError::Lifecycle { operation, state }),
        }
    }

    /// The particle store, bound read-only by the draw path.
    pub fn particle_buffer(&self) -> Result<&Buffer> {
        Ok(&self.live_store("bind particles")?.particle_buffer)
    }

    pub fn grid_layout(&self) -> GridLayout {
        GridLayout::from_config(&self.config)
    }

    fn write_uniforms(&self, store: &DeviceStore, sphere: &SphereState) -> Result<()> {
        let spawn = &self.config.spawn;
        let volume = self.config.spawn_volume();
        let layout = store.grid.layout();
        let seed = self.config.spawn.seed;
        self.context.queue.write_encased_uniform_buffer(
            &store.uniform_buffer,
            &SimulationUniforms {
                delta: self.parameters.delta,
                gravity: self.parameters.gravity,
                restitution: self.parameters.restitution,
                friction: self.parameters.friction,
                angular_damping: self.parameters.angular_damping,
                seed: (seed ^ (seed >> 32)) as u32,
                num_particles: self.config.particle_capacity,
                contact_slop: CONTACT_SLOP,
                sphere: sphere.center.extend(sphere.radius),
                sphere_velocity: sphere.velocity.extend(0.0),
                planes: self.constraints.map(|plane| plane.to_vec4()),
                scale_range: Vec2::new(spawn.min_scale, spawn.max_scale),
                linear_speed_range: Vec2::new(spawn.min_linear_speed, spawn.max_linear_speed),
                angular_speed_range: Vec2::new(spawn.min_angular_speed, spawn.max_angular_speed),
                spawn_min: volume.min,
                spawn_max: volume.max,
                grid_low_corner: layout.low_corner,
                cell_size: layout.cell_size,
                grid_dimension: layout.dimension,
            },
        )
    }

    fn workgroups(&self, workgroup_size: [u32; 3]) -> u32 {
        (self.config.particle_capacity as f32 / workgroup_size[0] as f32).ceil() as u32
    }

    fn parked_sphere(&self) -> SphereState {
        SphereState {
            center: self.config.sphere.start,
            radius: self.config.sphere.radius,
            velocity: Vec3::ZERO,
        }
    }

    /// Integrate, snapshot, collide. Uniforms for `sphere` must already be written.
    pub fn step_with_encoder(&self, command_encoder: &mut CommandEncoder) -> Result<()> {
        let store = self.live_store("step")?;
        {
            let mut compute_pass = command_encoder
                .begin_compute_pass(&ComputePassDescriptor { label: Some("integrate") });
            compute_pass.set_bind_group(0, &store.bind_group, &[]);
            compute_pass.set_pipeline(&self.integrate_pipeline);
            compute_pass.dispatch_workgroups(
                self.workgroups(simulation_shader::entry_points::integrate::WORKGROUP_SIZE),
                1,
                1,
            );
        }

        command_encoder.copy_buffer_to_buffer(
            &store.particle_buffer,
            0,
            &store.snapshot_buffer,
            0,
            store.particle_buffer.size(),
        );

        let mut compute_pass =
            command_encoder.begin_compute_pass(&ComputePassDescriptor { label: Some("collide") });
        compute_pass.set_bind_group(0, &store.bind_group, &[]);
        compute_pass.set_pipeline(&self.collide_pipeline);
        compute_pass.dispatch_workgroups(
            self.workgroups(simulation_shader::entry_points::collide::WORKGROUP_SIZE),
            1,
            1,
        );
        Ok(())
    }

    pub fn read_cells(&self) -> Result<Vec<GridCell>> {
        let store = self.live_store("read grid")?;
        store.grid.read_cells(&self.context.device, &self.context.queue)
    }
}

impl Drop for GpuSimulation {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            store.destroy();
        }
    }
}

impl ParticleSimulation for GpuSimulation {
    fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn seed(&mut self) -> Result<()> {
        let store = self.unseeded_store("seed")?;
        self.write_uniforms(store, &self.parked_sphere())?;

        let mut command_encoder = self
            .context
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: None });
        {
            let mut compute_pass = command_encoder
                .begin_compute_pass(&ComputePassDescriptor { label: Some("init_particles") });
            compute_pass.set_bind_group(0, &store.bind_group, &[]);
            compute_pass.set_pipeline(&self.init_particles_pipeline);
            compute_pass.dispatch_workgroups(
                self.workgroups(simulation_shader::entry_points::init_particles::WORKGROUP_SIZE),
                1,
                1,
            );
        }
        self.context.queue.submit(Some(command_encoder.finish()));

        self.lifecycle.seed()?;
        log::debug!("seeded {} particles on the device", self.config.particle_capacity);
        Ok(())
    }

    fn seed_with(&mut self, mut particles: Vec<Particle>) -> Result<()> {
        let store = self.unseeded_store("seed")?;
        check_seed_records(&self.config, &particles)?;
        for particle in &mut particles {
            particle.cell = UNASSIGNED;
            particle.slot = UNASSIGNED;
        }
        self.context
            .queue
            .write_buffer(&store.particle_buffer, 0, bytemuck::cast_slice(&particles));
        self.lifecycle.seed()
    }

    fn rebuild_grid(&mut self) -> Result<()> {
        let store = self.live_store("rebuild grid")?;
        store.grid.build_grid(&self.context.device, &self.context.queue);
        Ok(())
    }

    fn step(&mut self, sphere: &SphereState) -> Result<()> {
        let store = self.live_store("step")?;
        self.write_uniforms(store, sphere)?;
        let mut command_encoder = self
            .context
            .device
            .create_command_encoder(&CommandEncoderDescriptor { label: None });
        self.step_with_encoder(&mut command_encoder)?;
        self.context.queue.submit(Some(command_encoder.finish()));
        self.lifecycle.step()
    }

    fn grid_report(&self) -> Result<GridCounters> {
        let store = self.live_store("read grid report")?;
        store
            .grid
            .read_counters(&self.context.device, &self.context.queue)
    }

    fn particles(&self) -> Result<Vec<Particle>> {
        let store = self.live_store("read particles")?;
        read_buffer_blocking(
            &self.context.device,
            &self.context.queue,
            &store.particle_buffer,
            self.config.particle_capacity as u64,
        )
    }

    fn dispose(&mut self) -> Result<()> {
        self.lifecycle.dispose()?;
        if let Some(store) = self.store.take() {
            store.destroy();
        }
        log::debug!("gpu simulation disposed");
        Ok(())
    }
}
