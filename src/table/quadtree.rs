//! Sparse quadtree mirroring cache residency.
//!
//! Children are owned exclusively by their parent; removal drops the whole
//! subtree. There are no parent pointers — the parent of the node
//! representing a page is recomputed top-down by rectangle containment,
//! which costs at most one descent per call.

use crate::atlas::AtlasSlot;
use crate::page::Page;
use crate::raster::{Point, Rect, TileImage};

pub struct Quadtree {
    rect: Rect,
    /// Mip of the finest page this node can represent.
    level: u32,
    mapping: AtlasSlot,
    children: [Option<Box<Quadtree>>; 4],
}

impl Quadtree {
    pub fn new(rect: Rect, level: u32) -> Self {
        Self {
            rect,
            level,
            mapping: AtlasSlot::default(),
            children: [None, None, None, None],
        }
    }

    /// Store `slot` at the node representing `page`, creating intermediate
    /// nodes on the way down as needed.
    pub fn add(&mut self, page: Page, slot: AtlasSlot) {
        debug_assert!(page.mip <= self.level);
        self.add_at(page_origin(page), page.mip, slot);
    }

    fn add_at(&mut self, target: Point, mip: u32, slot: AtlasSlot) {
        if mip >= self.level {
            self.mapping = slot;
            return;
        }
        let index = self.child_index(target);
        let rect = self.child_rect(index);
        let level = self.level - 1;
        self.children[index]
            .get_or_insert_with(|| Box::new(Quadtree::new(rect, level)))
            .add_at(target, mip, slot);
    }

    /// Drop the subtree representing `page`. A page that was never added
    /// (or sits at the root level, which has no parent) is a no-op.
    pub fn remove(&mut self, page: Page) {
        self.remove_at(page_origin(page), page.mip);
    }

    fn remove_at(&mut self, target: Point, mip: u32) {
        if self.level == mip + 1 {
            for child in &mut self.children {
                if child.as_ref().map_or(false, |c| c.rect.contains(target)) {
                    *child = None;
                    return;
                }
            }
        } else if self.level > mip + 1 {
            for child in self.children.iter_mut().flatten() {
                if child.rect.contains(target) {
                    child.remove_at(target, mip);
                    return;
                }
            }
        }
    }

    /// Atlas slot stored for exactly `page`, if its node exists.
    pub fn find(&self, page: Page) -> Option<AtlasSlot> {
        let target = page_origin(page);
        let mut node = self;
        while node.level > page.mip {
            let index = node.child_index(target);
            match &node.children[index] {
                Some(child) => node = child,
                None => return None,
            }
        }
        Some(node.mapping)
    }

    /// Rasterize into `image` for `mip`: coarse mappings first, children
    /// after, so finer residency overrides the coarser fallback.
    pub fn write(&self, image: &mut TileImage, mip: u32) {
        if self.level < mip {
            return;
        }
        image.fill(
            Rect::new(
                self.rect.x >> mip,
                self.rect.y >> mip,
                self.rect.width >> mip,
                self.rect.width >> mip,
            ),
            [
                self.mapping.x as u8,
                self.mapping.y as u8,
                self.level as u8,
                255,
            ],
        );
        for child in self.children.iter().flatten() {
            child.write(image, mip);
        }
    }

    fn child_rect(&self, index: usize) -> Rect {
        let x = self.rect.x;
        let y = self.rect.y;
        let half = self.rect.width / 2;
        match index {
            0 => Rect::new(x, y, half, half),
            1 => Rect::new(x + half, y, half, half),
            2 => Rect::new(x + half, y + half, half, half),
            _ => Rect::new(x, y + half, half, half),
        }
    }

    fn child_index(&self, p: Point) -> usize {
        let half = self.rect.width / 2;
        let east = p.x >= self.rect.x + half;
        let south = p.y >= self.rect.y + half;
        match (east, south) {
            (false, false) => 0,
            (true, false) => 1,
            (true, true) => 2,
            (false, true) => 3,
        }
    }
}

/// Mip-0 coordinate of the page's top-left corner in page-table space.
fn page_origin(page: Page) -> Point {
    Point::new((page.x << page.mip) as i32, (page.y << page.mip) as i32)
}
