//! The per-frame orchestrator: turns aggregated demand into a bounded set
//! of cache requests, applies priority ordering, and throttles quality when
//! the cache thrashes.

use bytemuck::{Pod, Zeroable};
use log::{debug, warn};

use crate::atlas::TextureAtlas;
use crate::cache::PageCache;
use crate::error::{VirtualTextureError, VtResult};
use crate::gpu::{GpuBackend, TextureId};
use crate::loader::TileLoader;
use crate::page::{PageIndexer, PageRequest};
use crate::store::TileStore;
use crate::table::PageTable;
use crate::TextureInfo;

/// Shader-facing settings block.
///
/// `settings_1` = (virtual texture size, 1 / atlas side count, border scale,
/// border offset); `settings_2` = (mip bias, page table size, 0, 0).
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct VtUniforms {
    pub settings_1: [f32; 4],
    pub settings_2: [f32; 4],
}

pub struct VirtualTexture {
    info: TextureInfo,
    indexer: PageIndexer,
    atlas_side_count: u32,
    uploads_per_frame: usize,
    mip_bias: u32,
    loader: TileLoader,
    cache: PageCache,
    atlas: TextureAtlas,
    table: PageTable,
    staged: Vec<PageRequest>,
}

impl VirtualTexture {
    /// `atlas_texture_size` is the edge length in pixels of the physical
    /// atlas; capacity is `(atlas_texture_size / page_size)²` pages. When a
    /// store is given, its pyramid parameters must match `info`.
    pub fn new(
        store: Option<TileStore>,
        info: TextureInfo,
        atlas_texture_size: u32,
        uploads_per_frame: usize,
        mip_bias: u32,
        gpu: &mut dyn GpuBackend,
    ) -> VtResult<Self> {
        info.validate()?;
        if let Some(store) = &store {
            if store.info() != info {
                return Err(VirtualTextureError::Config(
                    "store pyramid parameters do not match the texture info".to_string(),
                ));
            }
        }

        let atlas_side_count = atlas_texture_size / info.page_size();
        if atlas_side_count == 0 {
            return Err(VirtualTextureError::Config(format!(
                "atlas texture ({}px) is smaller than one page ({}px)",
                atlas_texture_size,
                info.page_size()
            )));
        }

        let indexer = PageIndexer::new(&info)?;
        let loader = TileLoader::new(store, info)?;
        let cache = PageCache::new(atlas_side_count);
        let atlas = TextureAtlas::new(&info, atlas_side_count, gpu);
        let table = PageTable::new(&info, &indexer, gpu);

        let staged = Vec::with_capacity(indexer.page_count());

        Ok(Self {
            info,
            indexer,
            atlas_side_count,
            uploads_per_frame: uploads_per_frame.max(1),
            mip_bias,
            loader,
            cache,
            atlas,
            table,
            staged,
        })
    }

    /// Resolve one frame of aggregated demand (`requests` is the feedback
    /// buffer's accumulator, indexed by linear page index).
    pub fn update(&mut self, requests: &[u32], gpu: &mut dyn GpuBackend) {
        self.staged.clear();

        // Pages already resident just get refreshed in the LRU; the rest are
        // load candidates.
        let mut touched = 0usize;
        for (index, &count) in requests.iter().enumerate() {
            if count == 0 {
                continue;
            }
            let page = self.indexer.page_at(index);
            if self.cache.touch(page) {
                touched += 1;
            } else {
                self.staged.push(PageRequest { page, count });
            }
        }

        let capacity = self.cache.capacity();
        if touched < capacity {
            // Coarsest first, then most demanded; load what the per-frame
            // budget allows.
            self.staged
                .sort_unstable_by_key(|r| (std::cmp::Reverse(r.page.mip), std::cmp::Reverse(r.count)));

            let load_count = self
                .staged
                .len()
                .min(self.uploads_per_frame)
                .min(capacity);
            for request in &self.staged[..load_count] {
                match self
                    .cache
                    .request(request.page, &self.loader, &mut self.atlas, gpu)
                {
                    Ok(_) => {}
                    Err(e) => {
                        // A missing page is not fatal; the indirection table
                        // keeps redirecting to the nearest resident ancestor.
                        warn!("dropping request for page {:?}: {}", request.page, e);
                    }
                }
            }
        } else {
            // Every resident slot is itself wanted this frame. Loading more
            // would only thrash, so lower the demand resolution instead.
            self.mip_bias = self.mip_bias.saturating_sub(1);
            debug!("page cache saturated; mip bias lowered to {}", self.mip_bias);
        }

        for event in self.cache.drain_events() {
            self.table.apply(event);
        }
        self.table.update(gpu);
    }

    pub fn uniforms(&self) -> VtUniforms {
        let page_size = self.info.page_size() as f32;
        let border = self.info.border_size as f32;
        VtUniforms {
            settings_1: [
                self.info.virtual_texture_size as f32,
                1.0 / self.atlas_side_count as f32,
                (page_size - 2.0 * border) / page_size,
                border / page_size,
            ],
            settings_2: [
                self.mip_bias as f32,
                self.info.page_table_size() as f32,
                0.0,
                0.0,
            ],
        }
    }

    pub fn uploads_per_frame(&self) -> usize {
        self.uploads_per_frame
    }

    /// Bound the number of page loads issued per frame.
    pub fn set_uploads_per_frame(&mut self, count: usize) {
        self.uploads_per_frame = count.max(1);
    }

    pub fn mip_bias(&self) -> u32 {
        self.mip_bias
    }

    pub fn set_mip_bias(&mut self, value: u32) {
        self.mip_bias = value;
    }

    pub fn show_borders(&self) -> bool {
        self.loader.show_borders()
    }

    /// Toggle the border overlay. Already-decoded pages are stale, so the
    /// cache is flushed on change.
    pub fn enable_show_borders(&mut self, enable: bool) {
        if self.loader.set_show_borders(enable) {
            self.clear();
        }
    }

    pub fn color_mip_levels(&self) -> bool {
        self.loader.color_mip_levels()
    }

    /// Toggle per-mip debug coloring. Already-decoded pages are stale, so
    /// the cache is flushed on change.
    pub fn enable_color_mip_levels(&mut self, enable: bool) {
        if self.loader.set_color_mip_levels(enable) {
            self.clear();
        }
    }

    /// Evict every resident page.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub fn page_table(&self) -> &PageTable {
        &self.table
    }

    pub fn atlas_texture(&self) -> TextureId {
        self.atlas.texture()
    }

    pub fn page_table_texture(&self) -> TextureId {
        self.table.texture()
    }

    pub fn info(&self) -> TextureInfo {
        self.info
    }

    pub fn atlas_side_count(&self) -> u32 {
        self.atlas_side_count
    }
}
