//! The synchronous page load seam between the cache and the store.
//!
//! `load` fills the caller's buffer with decoded pixels before returning, so
//! the completion contract is "submit request, pixels are ready on return".
//! An asynchronous streaming backend can replace this without touching cache
//! or page-table logic.

use crate::error::VtResult;
use crate::page::{Page, PageIndexer};
use crate::raster::CHANNEL_COUNT;
use crate::store::TileStore;
use crate::TextureInfo;

/// Debug colors, one per mip level.
const MIP_COLORS: [[u8; 4]; 12] = [
    [255, 0, 0, 255],
    [255, 255, 0, 255],
    [0, 0, 255, 255],
    [255, 0, 255, 255],
    [0, 255, 255, 255],
    [192, 64, 64, 255],
    [64, 192, 64, 255],
    [192, 192, 64, 255],
    [64, 64, 192, 255],
    [192, 64, 192, 255],
    [64, 192, 192, 255],
    [0, 255, 0, 255],
];

pub struct TileLoader {
    store: Option<TileStore>,
    indexer: PageIndexer,
    info: TextureInfo,
    color_mip_levels: bool,
    show_borders: bool,
}

impl TileLoader {
    pub fn new(store: Option<TileStore>, info: TextureInfo) -> VtResult<Self> {
        Ok(Self {
            store,
            indexer: PageIndexer::new(&info)?,
            info,
            color_mip_levels: false,
            show_borders: false,
        })
    }

    /// Decoded size of one page in bytes.
    pub fn page_bytes(&self) -> usize {
        let page_size = self.info.page_size() as usize;
        page_size * page_size * CHANNEL_COUNT
    }

    /// Load one page synchronously into `out`. `scratch` receives the
    /// compressed block when a store read is involved.
    pub fn load(&self, page: Page, out: &mut [u8], scratch: &mut Vec<u8>) -> VtResult<()> {
        if self.color_mip_levels {
            self.fill_mip_color(out, page);
        } else if let Some(store) = &self.store {
            store.read_page(self.indexer.index_of(page), out, scratch)?;
        } else {
            out.fill(0);
        }

        if self.show_borders {
            self.draw_border(out);
        }
        Ok(())
    }

    pub fn show_borders(&self) -> bool {
        self.show_borders
    }

    /// Returns true when the value changed (cached pages are then stale).
    pub fn set_show_borders(&mut self, enable: bool) -> bool {
        let changed = self.show_borders != enable;
        self.show_borders = enable;
        changed
    }

    pub fn color_mip_levels(&self) -> bool {
        self.color_mip_levels
    }

    /// Returns true when the value changed (cached pages are then stale).
    pub fn set_color_mip_levels(&mut self, enable: bool) -> bool {
        let changed = self.color_mip_levels != enable;
        self.color_mip_levels = enable;
        changed
    }

    fn fill_mip_color(&self, out: &mut [u8], page: Page) {
        let color = MIP_COLORS[page.mip as usize % MIP_COLORS.len()];
        for px in out.chunks_exact_mut(CHANNEL_COUNT) {
            px.copy_from_slice(&color);
        }
    }

    /// Mark the border inset with a green line pair.
    fn draw_border(&self, out: &mut [u8]) {
        let page_size = self.info.page_size() as usize;
        let border = self.info.border_size as usize;
        const GREEN: [u8; 4] = [0, 255, 0, 255];

        for i in 0..page_size {
            let row = (border * page_size + i) * CHANNEL_COUNT;
            out[row..row + CHANNEL_COUNT].copy_from_slice(&GREEN);

            let column = (i * page_size + border) * CHANNEL_COUNT;
            out[column..column + CHANNEL_COUNT].copy_from_slice(&GREEN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> TextureInfo {
        TextureInfo {
            virtual_texture_size: 1024,
            tile_size: 256,
            border_size: 1,
        }
    }

    #[test]
    fn mip_colors_fill_whole_page() {
        let mut loader = TileLoader::new(None, info()).expect("loader");
        loader.set_color_mip_levels(true);

        let mut out = vec![0u8; loader.page_bytes()];
        let mut scratch = Vec::new();
        loader
            .load(Page::new(0, 0, 1), &mut out, &mut scratch)
            .expect("load");

        assert_eq!(&out[..4], &MIP_COLORS[1]);
        assert_eq!(&out[out.len() - 4..], &MIP_COLORS[1]);
    }

    #[test]
    fn border_overlay_marks_the_inset() {
        let mut loader = TileLoader::new(None, info()).expect("loader");
        loader.set_color_mip_levels(true);
        assert!(loader.set_show_borders(true));
        assert!(!loader.set_show_borders(true));

        let mut out = vec![0u8; loader.page_bytes()];
        let mut scratch = Vec::new();
        loader
            .load(Page::new(0, 0, 0), &mut out, &mut scratch)
            .expect("load");

        let page_size = info().page_size() as usize;
        let border = info().border_size as usize;
        let at = |x: usize, y: usize| &out[(y * page_size + x) * CHANNEL_COUNT..][..4];
        assert_eq!(at(5, border), &[0, 255, 0, 255]);
        assert_eq!(at(border, 5), &[0, 255, 0, 255]);
        assert_eq!(at(5, 5), &MIP_COLORS[0]);
    }
}
