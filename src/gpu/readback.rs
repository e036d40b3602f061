//! Copying GPU buffers and textures back to the CPU.

use wgpu::{Device, Queue};

use super::context::GpuError;

/// Maps `buffer` for reading and copies out `range`.
fn map_read(
    device: &Device,
    buffer: &wgpu::Buffer,
    range: std::ops::Range<u64>,
) -> Result<Vec<u8>, GpuError> {
    let slice = buffer.slice(range);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |r| {
        let _ = tx.send(r);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| GpuError::BufferMapFailed(e.to_string()))?;

    rx.recv()
        .map_err(|e| GpuError::BufferMapFailed(e.to_string()))?
        .map_err(|e| GpuError::BufferMapFailed(format!("{:?}", e)))?;

    let data = slice.get_mapped_range().to_vec();
    buffer.unmap();
    Ok(data)
}

/// Reads `size` bytes at `offset` of a `COPY_SRC` buffer whose allocation is
/// padded to `wgpu::COPY_BUFFER_ALIGNMENT`.
pub(super) fn read_buffer(
    device: &Device,
    queue: &Queue,
    source: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>, GpuError> {
    if size == 0 {
        return Ok(Vec::new());
    }
    let align = wgpu::COPY_BUFFER_ALIGNMENT;
    let start = offset / align * align;
    let end = (offset + size).div_ceil(align) * align;

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("staging_buffer"),
        size: end - start,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("buffer_readback"),
    });
    encoder.copy_buffer_to_buffer(source, start, &staging, 0, end - start);
    queue.submit(Some(encoder.finish()));

    let data = map_read(device, &staging, 0..end - start)?;
    let skip = (offset - start) as usize;
    Ok(data[skip..skip + size as usize].to_vec())
}

/// Readback buffer for copying one texture level to the CPU.
pub(super) struct ReadbackBuffer {
    buffer: wgpu::Buffer,
    width: u32,
    height: u32,
    padded_row_bytes: u32,
    unpadded_row_bytes: u32,
}

impl ReadbackBuffer {
    pub fn new(device: &Device, width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        let unpadded_row_bytes = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded_row_bytes = unpadded_row_bytes.div_ceil(align) * align;

        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback_buffer"),
            size: (padded_row_bytes * height) as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Self {
            buffer,
            width,
            height,
            padded_row_bytes,
            unpadded_row_bytes,
        }
    }

    pub fn copy_from(&self, encoder: &mut wgpu::CommandEncoder, texture: &wgpu::Texture, level: u32) {
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row_bytes),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Reads pixels from the mapped buffer, removing row padding.
    pub fn read_pixels(&self, device: &Device) -> Result<Vec<u8>, GpuError> {
        let data = map_read(device, &self.buffer, 0..self.buffer.size())?;
        let mut pixels = Vec::with_capacity((self.unpadded_row_bytes * self.height) as usize);
        for row in 0..self.height {
            let start = (row * self.padded_row_bytes) as usize;
            let end = start + self.unpadded_row_bytes as usize;
            pixels.extend_from_slice(&data[start..end]);
        }
        Ok(pixels)
    }
}

/// Reads one level of a `COPY_SRC` color texture, tightly packed.
pub(super) fn read_texture(
    device: &Device,
    queue: &Queue,
    texture: &wgpu::Texture,
    level: u32,
    (width, height): (u32, u32),
    bytes_per_pixel: usize,
) -> Result<Vec<u8>, GpuError> {
    let readback = ReadbackBuffer::new(device, width, height, bytes_per_pixel as u32);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("texture_readback"),
    });
    readback.copy_from(&mut encoder, texture, level);
    queue.submit(Some(encoder.finish()));
    readback.read_pixels(device)
}

/// Uploads tightly packed pixels into one level of a `COPY_DST` texture.
pub(super) fn write_texture(
    queue: &Queue,
    texture: &wgpu::Texture,
    level: u32,
    (width, height): (u32, u32),
    bytes_per_pixel: usize,
    data: &[u8],
) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(width * bytes_per_pixel as u32),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}
