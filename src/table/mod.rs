//! The indirection page table: cache residency mirrored into a quadtree and
//! rasterized into a mip chain the sampling shader redirects through.
//!
//! Each indirection texel encodes (atlas slot x, atlas slot y, source mip,
//! 255). Rebuilds are amortized: any number of residency changes in a frame
//! cost one rasterize + upload.

pub mod quadtree;

pub use quadtree::Quadtree;

use log::debug;

use crate::atlas::AtlasSlot;
use crate::cache::ResidencyEvent;
use crate::gpu::{GpuBackend, TextureDesc, TextureId};
use crate::page::{Page, PageIndexer};
use crate::raster::{Rect, TileImage};
use crate::TextureInfo;

pub struct PageTable {
    quadtree: Quadtree,
    /// One indirection image per mip, finest first.
    images: Vec<TileImage>,
    texture: TextureId,
    dirty: bool,
}

impl PageTable {
    pub fn new(info: &TextureInfo, indexer: &PageIndexer, gpu: &mut dyn GpuBackend) -> Self {
        let table_size = info.page_table_size();
        let mip_count = indexer.mip_count();

        let texture = gpu.create_texture(&TextureDesc {
            label: "vt page table",
            width: table_size,
            height: table_size,
            mip_count,
            render_target: false,
            readable: false,
        });

        let images = (0..mip_count)
            .map(|mip| {
                let size = (table_size >> mip) as usize;
                TileImage::new(size, size, 0)
            })
            .collect();

        Self {
            quadtree: Quadtree::new(
                Rect::new(0, 0, table_size as i32, table_size as i32),
                table_size.ilog2(),
            ),
            images,
            texture,
            // Force a full rasterize on the first update.
            dirty: true,
        }
    }

    /// Mirror one residency change; marks the table dirty.
    pub fn apply(&mut self, event: ResidencyEvent) {
        self.dirty = true;
        match event {
            ResidencyEvent::Added { page, slot } => self.quadtree.add(page, slot),
            ResidencyEvent::Removed { page, .. } => self.quadtree.remove(page),
        }
    }

    /// Re-rasterize and upload the whole mip chain, if anything changed.
    pub fn update(&mut self, gpu: &mut dyn GpuBackend) {
        if !self.dirty {
            return;
        }
        self.dirty = false;

        for (mip, image) in self.images.iter_mut().enumerate() {
            self.quadtree.write(image, mip as u32);
            gpu.upload_region(
                self.texture,
                mip as u32,
                0,
                0,
                image.width as u32,
                image.height as u32,
                &image.data,
            );
        }
        debug!("page table re-rasterized ({} mips)", self.images.len());
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    /// Current slot mapping for a page, if it is mirrored in the tree.
    pub fn find(&self, page: Page) -> Option<AtlasSlot> {
        self.quadtree.find(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::AtlasSlot;
    use crate::gpu::NullBackend;
    use crate::page::Page;

    fn table() -> (PageTable, NullBackend) {
        let info = TextureInfo {
            virtual_texture_size: 2048,
            tile_size: 256,
            border_size: 1,
        };
        let mut gpu = NullBackend::new();
        let indexer = PageIndexer::new(&info).expect("indexer");
        (PageTable::new(&info, &indexer, &mut gpu), gpu)
    }

    #[test]
    fn update_clears_dirty_until_next_event() {
        let (mut table, mut gpu) = table();
        assert!(table.is_dirty());

        table.update(&mut gpu);
        assert!(!table.is_dirty());

        table.apply(ResidencyEvent::Added {
            page: Page::new(0, 0, 0),
            slot: AtlasSlot { x: 0, y: 0 },
        });
        assert!(table.is_dirty());
        table.update(&mut gpu);
        assert!(!table.is_dirty());
    }

    #[test]
    fn events_flow_through_to_the_quadtree() {
        let (mut table, _gpu) = table();
        let page = Page::new(3, 3, 0);
        let slot = AtlasSlot { x: 2, y: 1 };

        table.apply(ResidencyEvent::Added { page, slot });
        assert_eq!(table.find(page), Some(slot));

        table.apply(ResidencyEvent::Removed { page, slot });
        assert_eq!(table.find(page), None);
    }
}
