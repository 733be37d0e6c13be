//! The GPU capability seam.
//!
//! The paging engine owns no GPU state beyond opaque [`TextureId`] handles;
//! everything it needs from a graphics API is expressed by [`GpuBackend`].
//! [`WgpuBackend`](wgpu_backend::WgpuBackend) is the shipped implementation;
//! [`NullBackend`] serves headless tools and tests.

pub mod wgpu_backend;

use crate::error::VtResult;

/// Opaque handle to a backend-owned 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

/// Creation parameters for a 2D RGBA8 texture.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub mip_count: u32,
    /// The renderer will draw into this texture.
    pub render_target: bool,
    /// The engine will read this texture back to the CPU.
    pub readable: bool,
}

/// Everything the paging engine asks of a graphics backend.
pub trait GpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> TextureId;

    fn destroy_texture(&mut self, id: TextureId);

    /// Upload a tightly packed RGBA8 block to a region of one mip level.
    fn upload_region(
        &mut self,
        id: TextureId,
        mip: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        pixels: &[u8],
    );

    /// Read the whole mip 0 of a texture back into `out` as tightly packed
    /// RGBA8. `out` must be exactly `width * height * 4` bytes.
    fn read_back(&mut self, id: TextureId, out: &mut [u8]) -> VtResult<()>;
}

/// Backend that performs no GPU work. Uploads are discarded and readbacks
/// return zeroes; useful for offline generation and tests.
#[derive(Debug, Default)]
pub struct NullBackend {
    next_id: u64,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GpuBackend for NullBackend {
    fn create_texture(&mut self, _desc: &TextureDesc) -> TextureId {
        self.next_id += 1;
        TextureId(self.next_id)
    }

    fn destroy_texture(&mut self, _id: TextureId) {}

    fn upload_region(
        &mut self,
        _id: TextureId,
        _mip: u32,
        _x: u32,
        _y: u32,
        _width: u32,
        _height: u32,
        _pixels: &[u8],
    ) {
    }

    fn read_back(&mut self, _id: TextureId, out: &mut [u8]) -> VtResult<()> {
        out.fill(0);
        Ok(())
    }
}
