//! Sparse virtual texturing: a demand-paged, GPU-resident texture cache.
//!
//! A renderer addresses an arbitrarily large mip-pyramid image while only
//! the pages visible each frame are resident. The live path is
//! [`FeedbackBuffer`] → [`VirtualTexture::update`] → [`PageCache`] →
//! [`TileStore`] → [`TextureAtlas`] + [`PageTable`]; [`TileGenerator`]
//! prepares the backing store offline.
//!
//! All GPU work goes through the [`GpuBackend`] capability trait, so the
//! engine runs against wgpu ([`WgpuBackend`]) or fully headless
//! ([`NullBackend`]).

pub mod atlas;
pub mod cache;
pub mod codec;
pub mod error;
pub mod feedback;
pub mod generator;
pub mod gpu;
pub mod loader;
pub mod page;
pub mod raster;
pub mod store;
pub mod table;
pub mod virtual_texture;

use serde::{Deserialize, Serialize};

pub use atlas::{AtlasSlot, TextureAtlas};
pub use cache::{PageCache, ResidencyEvent};
pub use error::{VirtualTextureError, VtResult};
pub use feedback::FeedbackBuffer;
pub use generator::{ImageGridSource, MemorySource, SourceTiles, TileGenerator};
pub use gpu::wgpu_backend::WgpuBackend;
pub use gpu::{GpuBackend, NullBackend, TextureDesc, TextureId};
pub use loader::TileLoader;
pub use page::{Page, PageIndexer, PageRequest};
pub use raster::{Point, Rect, TileImage, CHANNEL_COUNT};
pub use store::{PageRecord, TileStore};
pub use table::{PageTable, Quadtree};
pub use virtual_texture::{VirtualTexture, VtUniforms};

/// Pyramid parameters of one virtual texture asset.
///
/// `tile_size` is the payload area of a page; a page on disk and in the
/// atlas additionally carries `border_size` replicated pixels on every edge
/// so bilinear filtering stays seamless across page boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureInfo {
    pub virtual_texture_size: u32,
    pub tile_size: u32,
    pub border_size: u32,
}

impl Default for TextureInfo {
    fn default() -> Self {
        Self {
            virtual_texture_size: 8192,
            tile_size: 256,
            border_size: 1,
        }
    }
}

impl TextureInfo {
    /// Edge length in pixels of one stored page, border included.
    pub fn page_size(&self) -> u32 {
        self.tile_size + 2 * self.border_size
    }

    /// Pages per axis at mip 0.
    pub fn page_table_size(&self) -> u32 {
        self.virtual_texture_size / self.tile_size
    }

    /// Reject degenerate pyramid geometry. Called by every constructor that
    /// derives state from these parameters.
    pub fn validate(&self) -> VtResult<()> {
        if !self.tile_size.is_power_of_two() {
            return Err(VirtualTextureError::Config(format!(
                "tile size {} is not a power of two",
                self.tile_size
            )));
        }
        if !self.virtual_texture_size.is_power_of_two()
            || self.virtual_texture_size < self.tile_size
        {
            return Err(VirtualTextureError::Config(format!(
                "virtual texture size {} is not a power-of-two multiple of the tile size",
                self.virtual_texture_size
            )));
        }
        if self.border_size * 2 >= self.tile_size {
            return Err(VirtualTextureError::Config(format!(
                "border {} is too large for tile size {}",
                self.border_size, self.tile_size
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_sizes() {
        let info = TextureInfo::default();
        assert_eq!(info.page_size(), 258);
        assert_eq!(info.page_table_size(), 32);
        info.validate().expect("default info is valid");
    }

    #[test]
    fn validate_rejects_bad_geometry() {
        let bad_tile = TextureInfo {
            tile_size: 100,
            ..TextureInfo::default()
        };
        assert!(bad_tile.validate().is_err());

        let too_small = TextureInfo {
            virtual_texture_size: 128,
            tile_size: 256,
            border_size: 1,
        };
        assert!(too_small.validate().is_err());

        let fat_border = TextureInfo {
            virtual_texture_size: 1024,
            tile_size: 16,
            border_size: 8,
        };
        assert!(fat_border.validate().is_err());
    }
}
