use std::{collections::HashSet, error::Error, sync::Arc, time::Instant};

use futures::executor::block_on;
use glam::Vec3;
use wgpu::{
    Color, CommandEncoderDescriptor, DeviceDescriptor, Extent3d, Features, Instance, Limits,
    LoadOp, Operations, PowerPreference, PresentMode, RenderPassColorAttachment,
    RenderPassDepthStencilAttachment, RenderPassDescriptor, RequestAdapterOptions, SurfaceError,
    SurfaceConfiguration, TextureDescriptor, TextureDimension, TextureUsages, TextureView,
    TextureViewDescriptor,
};
use winit::{
    event::{ElementState, Event, KeyboardInput, MouseScrollDelta, VirtualKeyCode, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

use impetus::{
    render::{Camera, IndirectRenderBridge, Mesh, DEPTH_FORMAT},
    Aabb, FrameOrchestrator, GpuContext, GpuSimulation, ParticleSimulation, SimulationConfig,
    SimulationError, TransformProvider,
};

/// control sphere speed in units per second
const CONTROL_SPEED: f32 = 4.0;
/// most fixed steps run per rendered frame before the simulation falls behind real time
const MAX_STEPS_PER_FRAME: u32 = 4;

/// Keyboard driven control sphere: arrows or WASD move horizontally, Space up, Shift down.
struct KeyboardControl {
    position: Vec3,
    held: HashSet<VirtualKeyCode>,
}

impl KeyboardControl {
    fn direction(&self) -> Vec3 {
        let axis = |positive: &[VirtualKeyCode], negative: &[VirtualKeyCode]| {
            let pressed = |keys: &[VirtualKeyCode]| keys.iter().any(|key| self.held.contains(key));
            pressed(positive) as i32 as f32 - pressed(negative) as i32 as f32
        };
        Vec3::new(
            axis(&[VirtualKeyCode::D, VirtualKeyCode::Right], &[VirtualKeyCode::A, VirtualKeyCode::Left]),
            axis(&[VirtualKeyCode::Space], &[VirtualKeyCode::LShift, VirtualKeyCode::RShift]),
            axis(&[VirtualKeyCode::W, VirtualKeyCode::Up], &[VirtualKeyCode::S, VirtualKeyCode::Down]),
        )
        .normalize_or_zero()
    }

    fn advance(&mut self, delta: f32, bounds: &Aabb) {
        self.position = (self.position + self.direction() * CONTROL_SPEED * delta)
            .clamp(bounds.min, bounds.max);
    }
}

impl TransformProvider for KeyboardControl {
    fn position(&self) -> Vec3 {
        self.position
    }
}

fn config_from_args() -> Result<SimulationConfig, SimulationError> {
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None => Ok(SimulationConfig::default()),
        Some("--config") => {
            let path = args
                .next()
                .ok_or_else(|| SimulationError::configuration("--config expects a path"))?;
            SimulationConfig::load(path)
        }
        Some("--colliders") => Ok(SimulationConfig::colliders()),
        Some(other) => Err(SimulationError::configuration(format!(
            "unknown argument {other:?}, expected --config <file.ron> or --colliders"
        ))),
    }
}

fn create_depth_view(device: &wgpu::Device, width: u32, height: u32) -> TextureView {
    device
        .create_texture(&TextureDescriptor {
            label: Some("depth"),
            size: Extent3d {
                width: width.max(1),
                height: height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
        .create_view(&TextureViewDescriptor::default())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(error) = block_on(async_main()) {
        log::error!("{error}");
        std::process::exit(1);
    }
}

async fn async_main() -> Result<(), Box<dyn Error>> {
    let config = config_from_args()?;
    config.validate()?;

    let event_loop = EventLoop::new();
    let window = WindowBuilder::new().with_title("impetus").build(&event_loop)?;

    let instance = Instance::default();
    let surface = unsafe { instance.create_surface(&window) }?;
    let adapter = instance
        .request_adapter(&RequestAdapterOptions {
            power_preference: PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
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
    let context = GpuContext::new(Arc::new(device), Arc::new(queue));
    let surface_capabilities = surface.get_capabilities(&adapter);
    let surface_format = surface_capabilities.formats[0];

    let grid_bounds = config.grid_bounds();
    let control_bounds = grid_bounds.inflate(Vec3::splat(-config.sphere.radius));
    let tint_speed = 2.0 * config.spawn.max_linear_speed;
    let mesh = Mesh::for_shape(config.shape);
    let fixed_timestep = config.dynamics.fixed_timestep;

    let mut orchestrator = FrameOrchestrator::new(GpuSimulation::new(context.clone(), config)?);
    orchestrator.activate()?;
    let bridge = IndirectRenderBridge::new(
        &context.device,
        surface_format.into(),
        &mesh,
        orchestrator.simulation().particle_buffer()?,
        orchestrator.simulation().capacity(),
        &grid_bounds,
    );

    let size = window.inner_size();
    let mut surface_configuration = SurfaceConfiguration {
        usage: TextureUsages::RENDER_ATTACHMENT,
        format: surface_format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode: PresentMode::AutoVsync,
        alpha_mode: surface_capabilities.alpha_modes[0],
        view_formats: vec![],
    };
    surface.configure(&context.device, &surface_configuration);
    let mut depth_view = create_depth_view(&context.device, size.width, size.height);

    let mut control = KeyboardControl {
        position: orchestrator.sphere().center,
        held: HashSet::new(),
    };
    let mut camera = Camera::new();
    camera.aspect = surface_configuration.width as f32 / surface_configuration.height as f32;
    let (mut yaw, pitch, mut distance) = (0.6_f32, 0.45_f32, 2.0 * grid_bounds.extent().max_element());
    camera.orbit(grid_bounds.center(), distance, yaw, pitch);

    let mut last_frame = Instant::now();
    let mut accumulator = 0.0_f32;
    let mut running = true;

    event_loop.run(move |event, _, control_flow| {
        *control_flow = ControlFlow::Poll;
        match event {
            Event::WindowEvent {
                event:
                    WindowEvent::KeyboardInput {
                        input:
                            KeyboardInput {
                                virtual_keycode: Some(key),
                                state,
                                ..
                            },
                        ..
                    },
                ..
            } => {
                match state {
                    ElementState::Pressed => control.held.insert(key),
                    ElementState::Released => control.held.remove(&key),
                };
            }
            Event::WindowEvent {
                event: WindowEvent::MouseWheel { delta, .. },
                ..
            } => {
                let lines = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(position) => position.y as f32 / 40.0,
                };
                distance = (distance - lines).max(1.0);
                camera.orbit(grid_bounds.center(), distance, yaw, pitch);
            }
            Event::WindowEvent {
                event: WindowEvent::Resized(size),
                ..
            } => {
                surface_configuration.width = size.width.max(1);
                surface_configuration.height = size.height.max(1);
                camera.aspect =
                    surface_configuration.width as f32 / surface_configuration.height as f32;
                surface.configure(&context.device, &surface_configuration);
                depth_view = create_depth_view(&context.device, size.width, size.height);
            }
            Event::MainEventsCleared if running => {
                let elapsed = last_frame.elapsed().as_secs_f32();
                last_frame = Instant::now();
                accumulator += elapsed;

                let orbit = [VirtualKeyCode::Q, VirtualKeyCode::E]
                    .map(|key| control.held.contains(&key) as i32 as f32);
                yaw += (orbit[1] - orbit[0]) * elapsed;
                camera.orbit(grid_bounds.center(), distance, yaw, pitch);

                let mut steps = 0;
                while accumulator >= fixed_timestep && steps < MAX_STEPS_PER_FRAME {
                    control.advance(fixed_timestep, &control_bounds);
                    if let Err(error) = orchestrator.tick(&control) {
                        log::error!("simulation tick failed: {error}");
                        running = false;
                        *control_flow = ControlFlow::Exit;
                        return;
                    }
                    accumulator -= fixed_timestep;
                    steps += 1;
                }
                if steps == MAX_STEPS_PER_FRAME {
                    accumulator = 0.0;
                }
                window.request_redraw();
            }
            Event::RedrawRequested(_) if running => {
                if let Err(error) = bridge.update_camera(&context.queue, &camera, tint_speed) {
                    log::error!("failed to write camera uniforms: {error}");
                    return;
                }

                let current_texture = match surface.get_current_texture() {
                    Ok(texture) => texture,
                    Err(SurfaceError::Lost | SurfaceError::Outdated) => {
                        surface.configure(&context.device, &surface_configuration);
                        return;
                    }
                    Err(error) => {
                        log::warn!("skipping frame: {error}");
                        return;
                    }
                };
                let view = current_texture
                    .texture
                    .create_view(&TextureViewDescriptor::default());

                let mut command_encoder = context
                    .device
                    .create_command_encoder(&CommandEncoderDescriptor { label: None });
                {
                    let mut render_pass =
                        command_encoder.begin_render_pass(&RenderPassDescriptor {
                            label: Some("particles"),
                            color_attachments: &[Some(RenderPassColorAttachment {
                                view: &view,
                                resolve_target: None,
                                ops: Operations {
                                    load: LoadOp::Clear(Color {
                                        r: 0.02,
                                        g: 0.02,
                                        b: 0.03,
                                        a: 1.0,
                                    }),
                                    store: true,
                                },
                            })],
                            depth_stencil_attachment: Some(RenderPassDepthStencilAttachment {
                                view: &depth_view,
                                depth_ops: Some(Operations {
                                    load: LoadOp::Clear(1.0),
                                    store: true,
                                }),
                                stencil_ops: None,
                            }),
                        });
                    if camera.sees(bridge.bounds()) {
                        bridge.draw(&mut render_pass);
                    }
                }

                context.queue.submit(Some(command_encoder.finish()));
                current_texture.present();
            }
            Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                window_id,
            } if window_id == window.id() => {
                if running {
                    running = false;
                    if let Err(error) = orchestrator.shutdown() {
                        log::error!("shutdown failed: {error}");
                    }
                }
                *control_flow = ControlFlow::Exit;
            }
            _ => (),
        }
    });
}
