//! wgpu implementation of the GPU capability seam.

use std::io;
use std::sync::Arc;

use log::warn;
use rustc_hash::FxHashMap;
use wgpu::{Device, Queue};

use crate::error::{VirtualTextureError, VtResult};
use crate::gpu::{GpuBackend, TextureDesc, TextureId};
use crate::raster::CHANNEL_COUNT;

/// [`GpuBackend`] over a caller-provided wgpu device and queue.
pub struct WgpuBackend {
    device: Arc<Device>,
    queue: Arc<Queue>,
    textures: FxHashMap<TextureId, wgpu::Texture>,
    next_id: u64,
}

impl WgpuBackend {
    pub fn new(device: Arc<Device>, queue: Arc<Queue>) -> Self {
        Self {
            device,
            queue,
            textures: FxHashMap::default(),
            next_id: 0,
        }
    }

    /// Create a backend on a freshly requested default adapter. Intended for
    /// offline tools; interactive hosts share their existing device instead.
    pub fn headless() -> VtResult<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(
            instance.request_adapter(&wgpu::RequestAdapterOptions::default()),
        )
        .ok_or_else(|| VirtualTextureError::Config("no compatible GPU adapter".into()))?;
        let (device, queue) =
            pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor::default(), None))
                .map_err(|e| {
                    VirtualTextureError::Config(format!("device request failed: {}", e))
                })?;
        Ok(Self::new(Arc::new(device), Arc::new(queue)))
    }

    /// Borrow the underlying texture for binding by the host renderer.
    pub fn texture(&self, id: TextureId) -> Option<&wgpu::Texture> {
        self.textures.get(&id)
    }
}

impl GpuBackend for WgpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId {
        let mut usage = wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::TEXTURE_BINDING;
        if desc.render_target {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        if desc.readable {
            usage |= wgpu::TextureUsages::COPY_SRC;
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: desc.mip_count,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage,
            view_formats: &[],
        });

        self.next_id += 1;
        let id = TextureId(self.next_id);
        self.textures.insert(id, texture);
        id
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if let Some(texture) = self.textures.remove(&id) {
            texture.destroy();
        }
    }

    fn upload_region(
        &mut self,
        id: TextureId,
        mip: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) {
        let texture = match self.textures.get(&id) {
            Some(texture) => texture,
            None => {
                warn!("upload to unknown texture handle {:?}", id);
                return;
            }
        };

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: mip,
                origin: wgpu::Origin3d { x, y, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            pixels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * CHANNEL_COUNT as u32),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn read_back(&mut self, id: TextureId, out: &mut [u8]) -> VtResult<()> {
        let texture = self
            .textures
            .get(&id)
            .ok_or_else(|| VirtualTextureError::Config("unknown texture handle".into()))?;

        let width = texture.width();
        let height = texture.height();
        let unpadded = width as usize * CHANNEL_COUNT;
        if out.len() != unpadded * height as usize {
            return Err(VirtualTextureError::Config(format!(
                "readback buffer is {} bytes, texture needs {}",
                out.len(),
                unpadded * height as usize
            )));
        }

        // wgpu requires the copy row pitch to be 256-byte aligned.
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize;
        let padded = (unpadded + align - 1) / align * align;

        let readback = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("vt readback"),
            size: (padded * height as usize) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("vt readback"),
            });
        encoder.copy_texture_to_buffer(
            texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded as u32),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = flume::bounded(1);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            tx.send(result).ok();
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "readback channel closed"))?
            .map_err(|e| {
                VirtualTextureError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    format!("texture readback failed: {:?}", e),
                ))
            })?;

        {
            let data = slice.get_mapped_range();
            for y in 0..height as usize {
                out[y * unpadded..(y + 1) * unpadded]
                    .copy_from_slice(&data[y * padded..y * padded + unpadded]);
            }
        }
        readback.unmap();
        Ok(())
    }
}
