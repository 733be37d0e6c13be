//! Page identity and the dense linear addressing of the mip pyramid.

use crate::error::VtResult;
use crate::TextureInfo;

/// The smallest independently loadable unit of the virtual texture: a tile
/// coordinate plus a mip level (0 is finest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Page {
    pub x: u32,
    pub y: u32,
    pub mip: u32,
}

impl Page {
    pub fn new(x: u32, y: u32, mip: u32) -> Self {
        Self { x, y, mip }
    }
}

/// A staged load candidate: a page plus the demand observed for it this
/// frame. Sorted coarsest-first, then by descending demand.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub page: Page,
    pub count: u32,
}

/// Bijection between page coordinates and a dense linear index over the
/// whole pyramid, plus the bounds checks everything else filters through.
///
/// Immutable for the lifetime of a pyramid shape.
#[derive(Debug, Clone)]
pub struct PageIndexer {
    sizes: Vec<u32>,
    offsets: Vec<usize>,
    reverse: Vec<Page>,
    count: usize,
    mip_count: u32,
}

impl PageIndexer {
    pub fn new(info: &TextureInfo) -> VtResult<Self> {
        info.validate()?;

        let table_size = info.page_table_size();
        let mip_count = table_size.ilog2() + 1;

        let sizes: Vec<u32> = (0..mip_count).map(|mip| table_size >> mip).collect();

        let mut offsets = Vec::with_capacity(mip_count as usize);
        let mut count = 0usize;
        for &size in &sizes {
            offsets.push(count);
            count += (size * size) as usize;
        }

        let mut indexer = Self {
            sizes,
            offsets,
            reverse: Vec::new(),
            count,
            mip_count,
        };

        let mut reverse = vec![Page::new(0, 0, 0); count];
        for mip in 0..mip_count {
            let size = indexer.sizes[mip as usize];
            for y in 0..size {
                for x in 0..size {
                    let page = Page::new(x, y, mip);
                    reverse[indexer.index_of(page)] = page;
                }
            }
        }
        indexer.reverse = reverse;

        Ok(indexer)
    }

    /// Linear index of a page. The page must be in range for its mip.
    pub fn index_of(&self, page: Page) -> usize {
        debug_assert!(self.is_valid(page), "page out of range: {:?}", page);
        self.offsets[page.mip as usize]
            + (page.y * self.sizes[page.mip as usize] + page.x) as usize
    }

    /// Reverse lookup; O(1) through the precomputed table.
    pub fn page_at(&self, index: usize) -> Page {
        self.reverse[index]
    }

    /// Bounds check used to silently discard synthesized out-of-range pages.
    pub fn is_valid(&self, page: Page) -> bool {
        page.mip < self.mip_count
            && page.x < self.sizes[page.mip as usize]
            && page.y < self.sizes[page.mip as usize]
    }

    pub fn page_count(&self) -> usize {
        self.count
    }

    pub fn mip_count(&self) -> u32 {
        self.mip_count
    }

    /// Pages per axis at `mip`.
    pub fn size_at(&self, mip: u32) -> u32 {
        self.sizes[mip as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VirtualTextureError;

    fn indexer() -> PageIndexer {
        let info = TextureInfo {
            virtual_texture_size: 2048,
            tile_size: 256,
            border_size: 1,
        };
        PageIndexer::new(&info).expect("valid pyramid")
    }

    #[test]
    fn index_and_page_are_a_bijection() {
        let indexer = indexer();
        assert_eq!(indexer.mip_count(), 4);
        assert_eq!(indexer.page_count(), 64 + 16 + 4 + 1);

        for index in 0..indexer.page_count() {
            let page = indexer.page_at(index);
            assert_eq!(indexer.index_of(page), index);
        }

        for mip in 0..indexer.mip_count() {
            let size = indexer.size_at(mip);
            for y in 0..size {
                for x in 0..size {
                    let page = Page::new(x, y, mip);
                    assert_eq!(indexer.page_at(indexer.index_of(page)), page);
                }
            }
        }
    }

    #[test]
    fn is_valid_bounds_mip_and_coordinates() {
        let indexer = indexer();

        assert!(indexer.is_valid(Page::new(7, 7, 0)));
        assert!(indexer.is_valid(Page::new(0, 0, 3)));

        assert!(!indexer.is_valid(Page::new(8, 0, 0)));
        assert!(!indexer.is_valid(Page::new(0, 8, 0)));
        assert!(!indexer.is_valid(Page::new(1, 0, 3)));
        assert!(!indexer.is_valid(Page::new(0, 0, 4)));
    }

    #[test]
    fn rejects_degenerate_geometry() {
        let info = TextureInfo {
            virtual_texture_size: 1000,
            tile_size: 256,
            border_size: 1,
        };
        assert!(matches!(
            PageIndexer::new(&info),
            Err(VirtualTextureError::Config(_))
        ));
    }
}
