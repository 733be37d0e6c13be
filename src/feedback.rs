//! Demand aggregation from the renderer's feedback pass.
//!
//! The renderer draws the scene into a small offscreen target whose texels
//! encode "which page does this pixel want" as (x, y, mip, 0xff). Download
//! scans that target and accumulates a per-page demand count — for the
//! requested page and every valid ancestor up the mip chain, so a coarser
//! fallback is always eligible for residency when the finest page cannot be
//! kept.

use crate::error::VtResult;
use crate::gpu::{GpuBackend, TextureDesc, TextureId};
use crate::page::{Page, PageIndexer};
use crate::raster::CHANNEL_COUNT;
use crate::TextureInfo;

/// Alpha value marking a texel as a valid page request.
const REQUEST_SENTINEL: u8 = 0xff;

pub struct FeedbackBuffer {
    indexer: PageIndexer,
    width: u32,
    height: u32,
    target: TextureId,
    requests: Vec<u32>,
    download: Vec<u8>,
}

impl FeedbackBuffer {
    pub fn new(
        info: &TextureInfo,
        width: u32,
        height: u32,
        gpu: &mut dyn GpuBackend,
    ) -> VtResult<Self> {
        let indexer = PageIndexer::new(info)?;
        let target = gpu.create_texture(&TextureDesc {
            label: "vt feedback",
            width,
            height,
            mip_count: 1,
            render_target: true,
            readable: true,
        });

        let requests = vec![0; indexer.page_count()];
        let download = vec![0; width as usize * height as usize * CHANNEL_COUNT];

        Ok(Self {
            indexer,
            width,
            height,
            target,
            requests,
            download,
        })
    }

    /// Read the feedback target back and accumulate demand for every flagged
    /// texel.
    pub fn download(&mut self, gpu: &mut dyn GpuBackend) -> VtResult<()> {
        let mut download = std::mem::take(&mut self.download);
        let result = gpu.read_back(self.target, &mut download);
        if result.is_ok() {
            for px in download.chunks_exact(CHANNEL_COUNT) {
                if px[3] == REQUEST_SENTINEL {
                    self.add_request_with_ancestors(Page::new(
                        px[0] as u32,
                        px[1] as u32,
                        px[2] as u32,
                    ));
                }
            }
        }
        self.download = download;
        result
    }

    /// Count one unit of demand for `request` and each valid ancestor up to
    /// the root. Accumulation stops silently at the first invalid page.
    pub fn add_request_with_ancestors(&mut self, request: Page) {
        if request.mip >= self.indexer.mip_count() {
            return;
        }
        let span = self.indexer.mip_count() - request.mip;
        for i in 0..span {
            let page = Page::new(request.x >> i, request.y >> i, request.mip + i);
            if !self.indexer.is_valid(page) {
                return;
            }
            self.requests[self.indexer.index_of(page)] += 1;
        }
    }

    /// Per-page demand counts, indexed by linear page index.
    pub fn requests(&self) -> &[u32] {
        &self.requests
    }

    /// Zero the accumulator. Call once per frame after the counts are
    /// consumed.
    pub fn clear(&mut self) {
        self.requests.fill(0);
    }

    /// The offscreen target the renderer draws page labels into.
    pub fn target(&self) -> TextureId {
        self.target
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }
}
