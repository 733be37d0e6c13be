//! Fixed-capacity LRU over resident pages, with in-flight tracking and
//! residency events that drive the page-table rebuild.

use log::{info, warn};
use rustc_hash::FxHashSet;

use crate::atlas::{AtlasSlot, TextureAtlas};
use crate::error::VtResult;
use crate::gpu::GpuBackend;
use crate::loader::TileLoader;
use crate::page::Page;

/// Residency change emitted by the cache. Drained by the orchestrator into
/// the page table within the same frame, in emission order (a request that
/// evicts emits `Removed` before its own `Added`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidencyEvent {
    Added { page: Page, slot: AtlasSlot },
    Removed { page: Page, slot: AtlasSlot },
}

#[derive(Debug, Clone, Copy)]
struct LruEntry {
    page: Page,
    slot: AtlasSlot,
}

pub struct PageCache {
    side_count: u32,
    /// Least recently used at the front, most recent at the back.
    lru: Vec<LruEntry>,
    resident: FxHashSet<Page>,
    loading: FxHashSet<Page>,
    /// Slots handed out so far; once it reaches capacity, eviction reuses
    /// slots instead.
    next_slot: u32,
    events: Vec<ResidencyEvent>,
    page_pixels: Vec<u8>,
    scratch: Vec<u8>,
}

impl PageCache {
    pub fn new(side_count: u32) -> Self {
        Self {
            side_count,
            lru: Vec::with_capacity((side_count * side_count) as usize),
            resident: FxHashSet::default(),
            loading: FxHashSet::default(),
            next_slot: 0,
            events: Vec::new(),
            page_pixels: Vec::new(),
            scratch: Vec::new(),
        }
    }

    /// Maximum resident pages (`side_count²`).
    pub fn capacity(&self) -> usize {
        (self.side_count * self.side_count) as usize
    }

    pub fn resident_count(&self) -> usize {
        self.lru.len()
    }

    pub fn is_resident(&self, page: Page) -> bool {
        self.resident.contains(&page)
    }

    /// If `page` is resident (and not mid-load), move it to the
    /// most-recently-used position. Returns whether it was resident.
    pub fn touch(&mut self, page: Page) -> bool {
        if self.loading.contains(&page) || !self.resident.contains(&page) {
            return false;
        }
        if let Some(position) = self.lru.iter().position(|e| e.page == page) {
            let entry = self.lru.remove(position);
            self.lru.push(entry);
            return true;
        }
        false
    }

    /// Load `page` unless it is already resident or in flight. The load is
    /// synchronous: decoded pixels are uploaded to the atlas and the LRU is
    /// updated before this returns. Returns whether a new load started.
    pub fn request(
        &mut self,
        page: Page,
        loader: &TileLoader,
        atlas: &mut TextureAtlas,
        gpu: &mut dyn GpuBackend,
    ) -> VtResult<bool> {
        if self.loading.contains(&page) || self.resident.contains(&page) {
            return Ok(false);
        }

        self.loading.insert(page);
        let mut pixels = std::mem::take(&mut self.page_pixels);
        pixels.resize(loader.page_bytes(), 0);
        let mut scratch = std::mem::take(&mut self.scratch);

        let result = loader.load(page, &mut pixels, &mut scratch);

        self.scratch = scratch;
        match result {
            Ok(()) => {
                self.complete_load(page, &pixels, atlas, gpu);
                self.page_pixels = pixels;
                Ok(true)
            }
            Err(e) => {
                self.loading.remove(&page);
                self.page_pixels = pixels;
                warn!("load failed for page {:?}: {}", page, e);
                Err(e)
            }
        }
    }

    /// Evict everything and reset slot allocation. Used when a setting
    /// change makes previously decoded pixels stale.
    pub fn clear(&mut self) {
        debug_assert!(self.loading.is_empty());
        for entry in self.lru.drain(..) {
            self.events.push(ResidencyEvent::Removed {
                page: entry.page,
                slot: entry.slot,
            });
        }
        self.resident.clear();
        self.next_slot = 0;
    }

    /// Residency changes accumulated since the last drain, in order.
    pub fn drain_events(&mut self) -> std::vec::Drain<'_, ResidencyEvent> {
        self.events.drain(..)
    }

    fn complete_load(
        &mut self,
        page: Page,
        pixels: &[u8],
        atlas: &mut TextureAtlas,
        gpu: &mut dyn GpuBackend,
    ) {
        self.loading.remove(&page);
        let capacity = self.capacity();

        let slot = if self.next_slot as usize == capacity {
            // Reuse the least recently used slot.
            let evicted = self.lru.remove(0);
            self.resident.remove(&evicted.page);
            self.events.push(ResidencyEvent::Removed {
                page: evicted.page,
                slot: evicted.slot,
            });
            evicted.slot
        } else {
            let slot = AtlasSlot {
                x: self.next_slot % self.side_count,
                y: self.next_slot / self.side_count,
            };
            self.next_slot += 1;
            if self.next_slot as usize == capacity {
                info!("atlas is full ({} pages resident)", capacity);
            }
            slot
        };

        atlas.upload_page(gpu, slot, pixels);
        self.lru.push(LruEntry { page, slot });
        self.resident.insert(page);
        self.events.push(ResidencyEvent::Added { page, slot });

        debug_assert_eq!(self.lru.len(), self.resident.len());
        debug_assert!(self.lru.len() <= capacity);
    }
}
