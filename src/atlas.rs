//! The physical texture atlas: a fixed grid of page-sized slots backing
//! whatever is currently resident.

use log::debug;

use crate::gpu::{GpuBackend, TextureDesc, TextureId};
use crate::TextureInfo;

/// Grid coordinate of one page slot inside the atlas,
/// in `[0, side_count)²`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AtlasSlot {
    pub x: u32,
    pub y: u32,
}

pub struct TextureAtlas {
    texture: TextureId,
    page_size: u32,
    side_count: u32,
}

impl TextureAtlas {
    pub fn new(info: &TextureInfo, side_count: u32, gpu: &mut dyn GpuBackend) -> Self {
        let page_size = info.page_size();
        let size = side_count * page_size;
        let texture = gpu.create_texture(&TextureDesc {
            label: "vt atlas",
            width: size,
            height: size,
            mip_count: 1,
            render_target: false,
            readable: false,
        });

        Self {
            texture,
            page_size,
            side_count,
        }
    }

    /// Upload one decoded page into `slot`.
    pub fn upload_page(&mut self, gpu: &mut dyn GpuBackend, slot: AtlasSlot, pixels: &[u8]) {
        gpu.upload_region(
            self.texture,
            0,
            slot.x * self.page_size,
            slot.y * self.page_size,
            self.page_size,
            self.page_size,
            pixels,
        );
        debug!("uploaded page to atlas slot {},{}", slot.x, slot.y);
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn side_count(&self) -> u32 {
        self.side_count
    }
}
