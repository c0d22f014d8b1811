//! Device backend checks. Each test returns early when the machine has no usable adapter.

use glam::{UVec3, Vec3};
use wgpu::{
    util::{BufferInitDescriptor, DeviceExt},
    BufferUsages, TextureFormat,
};

use impetus::{
    partition::{GridLayout, GridPartition},
    render::{DrawIndexedIndirectArgs, IndirectRenderBridge, Mesh},
    FrameOrchestrator, GpuContext, GpuSimulation, GridCounters, HostSimulation, Particle,
    ParticleSimulation, SimulationConfig, SphereState,
};

fn context() -> Option<GpuContext> {
    match GpuContext::headless() {
        Ok(context) => Some(context),
        Err(error) => {
            eprintln!("skipping device test: {error}");
            None
        }
    }
}

fn small_config(capacity: u32) -> SimulationConfig {
    let mut config = SimulationConfig::inter_particle();
    config.particle_capacity = capacity;
    config.grid.dimension = UVec3::new(8, 16, 8);
    config.grid.low_corner = Vec3::new(-4.0, 0.0, -4.0);
    config.grid.cell_size = Some(1.0);
    config
}

fn parked_sphere() -> SphereState {
    SphereState {
        center: Vec3::splat(100.0),
        radius: 0.8,
        velocity: Vec3::ZERO,
    }
}

fn lattice(capacity: u32) -> Vec<Particle> {
    (0..capacity)
        .map(|i| {
            let position = Vec3::new(
                -3.5 + 0.7 * (i % 10) as f32,
                0.5 + 0.7 * ((i / 10) % 10) as f32,
                -3.5 + 0.7 * (i / 100) as f32,
            );
            Particle::new(position, 0.3, Vec3::new(0.5, 0.0, -0.25))
        })
        .collect()
}

#[test]
fn device_seeding_respects_configured_ranges() {
    let Some(context) = context() else { return };
    let config = small_config(1000);
    let volume = config.spawn_volume();
    let spawn = config.spawn.clone();
    let mut simulation = GpuSimulation::new(context, config).unwrap();
    simulation.seed().unwrap();

    let particles = simulation.particles().unwrap();
    assert_eq!(particles.len(), 1000);
    for particle in particles {
        assert!(particle.radius >= spawn.min_scale - 1e-5 && particle.radius <= spawn.max_scale + 1e-5);
        assert!(volume.inflate(Vec3::splat(1e-4)).contains_point(particle.position()));
        let speed = particle.velocity().length();
        assert!(speed >= spawn.min_linear_speed - 1e-3 && speed <= spawn.max_linear_speed + 1e-3);
        assert!((particle.orientation().length() - 1.0).abs() < 1e-4);
    }
}

#[test]
fn device_grid_matches_host_grid() {
    let Some(context) = context() else { return };
    let config = small_config(700);
    let particles = lattice(700);

    let mut device = GpuSimulation::new(context, config.clone()).unwrap();
    device.seed_with(particles.clone()).unwrap();
    device.rebuild_grid().unwrap();
    let mut host = HostSimulation::new(config).unwrap();
    host.seed_with(particles).unwrap();
    host.rebuild_grid().unwrap();

    let device_cells = device.read_cells().unwrap();
    let host_cells = host.grid().unwrap().cells();
    assert_eq!(device_cells.len(), host_cells.len());
    for (device_cell, host_cell) in device_cells.iter().zip(&host_cells) {
        assert_eq!(device_cell.count, host_cell.count);
        let mut device_ids = device_cell.occupants().to_vec();
        let mut host_ids = host_cell.occupants().to_vec();
        device_ids.sort_unstable();
        host_ids.sort_unstable();
        assert_eq!(device_ids, host_ids);
    }
    assert_eq!(device.grid_report().unwrap(), host.grid_report().unwrap());

    let device_particles = device.particles().unwrap();
    let host_particles = host.particles().unwrap();
    for (device_particle, host_particle) in device_particles.iter().zip(&host_particles) {
        assert_eq!(device_particle.cell, host_particle.cell);
    }
}

#[test]
fn device_step_agrees_with_host_step() {
    let Some(context) = context() else { return };
    let config = small_config(500);
    let particles = lattice(500);

    let mut device = GpuSimulation::new(context, config.clone()).unwrap();
    device.seed_with(particles.clone()).unwrap();
    let mut host = HostSimulation::new(config).unwrap();
    host.seed_with(particles).unwrap();

    for simulation in [&mut device as &mut dyn ParticleSimulation, &mut host] {
        simulation.rebuild_grid().unwrap();
        simulation.step(&parked_sphere()).unwrap();
    }

    let device_particles = device.particles().unwrap();
    let host_particles = host.particles().unwrap();
    for (device_particle, host_particle) in device_particles.iter().zip(&host_particles) {
        let drift = device_particle.position().distance(host_particle.position());
        assert!(drift < 1e-3, "device and host disagree by {drift}");
    }
}

#[test]
fn indirect_arguments_stay_fixed_across_the_run() {
    let Some(context) = context() else { return };
    let config = small_config(256);
    let mesh = Mesh::for_shape(config.shape);
    let grid_bounds = config.grid_bounds();
    let mut orchestrator = FrameOrchestrator::new(GpuSimulation::new(context.clone(), config).unwrap());
    orchestrator.activate().unwrap();

    let bridge = IndirectRenderBridge::new(
        &context.device,
        TextureFormat::Rgba8UnormSrgb.into(),
        &mesh,
        orchestrator.simulation().particle_buffer().unwrap(),
        orchestrator.simulation().capacity(),
        &grid_bounds,
    );
    let expected = DrawIndexedIndirectArgs::for_mesh(&mesh, 256);
    assert_eq!(bridge.args(), expected);

    for _ in 0..20 {
        orchestrator.tick(&Vec3::new(0.0, 2.0, 0.0)).unwrap();
        let args = bridge.read_args(&context.device, &context.queue).unwrap();
        assert_eq!(args.instance_count, 256);
        assert_eq!(args, expected);
    }
}

#[test]
fn disposed_device_store_rejects_access() {
    let Some(context) = context() else { return };
    let mut simulation = GpuSimulation::new(context, small_config(64)).unwrap();
    assert!(simulation.particle_buffer().is_err());
    simulation.seed().unwrap();
    assert!(simulation.particle_buffer().is_ok());
    simulation.dispose().unwrap();
    assert!(simulation.particle_buffer().is_err());
    assert!(simulation.particles().is_err());
    assert!(simulation.step(&parked_sphere()).is_err());
    assert!(simulation.dispose().is_err());
}

#[test]
fn clearing_the_device_grid_twice_equals_clearing_once() {
    let Some(context) = context() else { return };
    let config = small_config(300);
    let particles = lattice(300);
    let particle_buffer = context.device.create_buffer_init(&BufferInitDescriptor {
        label: Some("particles"),
        contents: bytemuck::cast_slice(&particles),
        usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC,
    });
    let grid = GridPartition::new(
        &context.device,
        &context.queue,
        GridLayout::from_config(&config),
        &particle_buffer,
        300,
    )
    .unwrap();

    grid.build_grid(&context.device, &context.queue);
    let occupancy: u64 = grid
        .read_cells(&context.device, &context.queue)
        .unwrap()
        .iter()
        .map(|cell| cell.count as u64)
        .sum();
    assert_eq!(occupancy, 300);

    grid.clear_grid(&context.device, &context.queue);
    let once = grid.read_cells(&context.device, &context.queue).unwrap();
    grid.clear_grid(&context.device, &context.queue);
    let twice = grid.read_cells(&context.device, &context.queue).unwrap();

    assert!(once.iter().all(|cell| cell.count == 0));
    assert_eq!(
        once.iter().map(|cell| cell.count).collect::<Vec<_>>(),
        twice.iter().map(|cell| cell.count).collect::<Vec<_>>()
    );
    assert_eq!(
        grid.read_counters(&context.device, &context.queue).unwrap(),
        GridCounters::default()
    );
}
