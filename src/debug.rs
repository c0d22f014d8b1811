use std::mem::size_of;

use bytemuck::Pod;
use futures::channel::oneshot;
use wgpu::{Buffer, Device, Queue};

use crate::error::{Result, SimulationError};

/// Copies the first `length` elements of `buffer` into a staging buffer and maps them back.
///
/// Blocks on `device.poll`, so this is for tests and on-demand diagnostics, never the render path.
pub async fn read_buffer<T: Pod>(
    device: &Device,
    queue: &Queue,
    buffer: &Buffer,
    length: u64,
) -> Result<Vec<T>> {
    let size = size_of::<T>() as u64 * length;
    let staging_buffer = device.create_buffer(&wgpu::BufferDescriptor {
        size,
        label: Some("debug::staging_buffer"),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder =
        device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging_buffer, 0, size);
    queue.submit(Some(encoder.finish()));

    let buffer_slice = staging_buffer.slice(..);
    let (sender, receiver) = oneshot::channel();
    buffer_slice.map_async(wgpu::MapMode::Read, move |v| {
        let _ = sender.send(v);
    });
    device.poll(wgpu::Maintain::Wait);
    match receiver.await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => return Err(error.into()),
        Err(_) => return Err(SimulationError::MapCancelled),
    };

    let result = {
        let data = buffer_slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    staging_buffer.unmap();
    staging_buffer.destroy();
    Ok(result)
}

pub fn read_buffer_blocking<T: Pod>(
    device: &Device,
    queue: &Queue,
    buffer: &Buffer,
    length: u64,
) -> Result<Vec<T>> {
    futures::executor::block_on(read_buffer(device, queue, buffer, length))
}
