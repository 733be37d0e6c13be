//! Offline tile generation: builds the full mip pyramid of a virtual
//! texture as compressed pages in a [`TileStore`].
//!
//! Mip 0 is cut page-by-page from the source tiles, keeping a 3x3 ring of
//! input tiles resident so page borders can reach into neighbors. Every
//! coarser page is built from the 4x4 neighborhood of its four children
//! (wraparound addressing keeps borders continuous), composited, halved and
//! cropped. Both phases fan out over a shared atomic cursor drained by a
//! fixed-size worker pool; each worker owns its scratch buffers, so the
//! store mutex only serializes the raw file I/O.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use log::{info, warn};
use parking_lot::Mutex;

use crate::error::{VirtualTextureError, VtResult};
use crate::page::{Page, PageIndexer};
use crate::raster::{Point, Rect, TileImage, CHANNEL_COUNT};
use crate::store::TileStore;
use crate::TextureInfo;

/// A provider of source imagery, addressed as a square grid of equally
/// sized input tiles. A single in-memory image is the 1x1 special case.
pub trait SourceTiles: Sync {
    /// Edge length in pixels of one input tile.
    fn tile_size(&self) -> u32;

    /// Number of input tiles along each axis.
    fn grid_size(&self) -> u32;

    /// Whether mip-0 page borders wrap around the virtual texture edges
    /// (tile sets) or clamp to them (plain images).
    fn wrap_borders(&self) -> bool {
        true
    }

    /// Load one input tile into `into` (already sized `tile_size²`).
    fn load_tile(&self, x: u32, y: u32, into: &mut TileImage) -> VtResult<()>;
}

/// Source tiles stored as image files in one directory, named `{x}_{y}.ext`.
/// Missing or unreadable tiles are tolerated and come up black.
pub struct ImageGridSource {
    directory: PathBuf,
    extension: String,
    tile_size: u32,
    grid_size: u32,
}

impl ImageGridSource {
    pub fn new(directory: impl Into<PathBuf>, tile_size: u32, grid_size: u32) -> Self {
        Self {
            directory: directory.into(),
            extension: "png".to_string(),
            tile_size,
            grid_size,
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    fn tile_path(&self, x: u32, y: u32) -> PathBuf {
        self.directory.join(format!("{}_{}.{}", x, y, self.extension))
    }
}

impl SourceTiles for ImageGridSource {
    fn tile_size(&self) -> u32 {
        self.tile_size
    }

    fn grid_size(&self) -> u32 {
        self.grid_size
    }

    fn load_tile(&self, x: u32, y: u32, into: &mut TileImage) -> VtResult<()> {
        let path = self.tile_path(x, y);
        let decoded = match image::open(&path) {
            Ok(decoded) => decoded.to_rgba8(),
            Err(e) => {
                warn!("input tile {} unreadable ({}), using black", path.display(), e);
                into.clear(0);
                return Ok(());
            }
        };

        if decoded.width() != self.tile_size || decoded.height() != self.tile_size {
            return Err(VirtualTextureError::Config(format!(
                "input tile {} is {}x{}, expected {}x{}",
                path.display(),
                decoded.width(),
                decoded.height(),
                self.tile_size,
                self.tile_size
            )));
        }
        into.data.copy_from_slice(decoded.as_raw());
        Ok(())
    }
}

/// A whole source image held in memory, exposed as a 1x1 tile grid.
pub struct MemorySource {
    image: TileImage,
}

impl MemorySource {
    /// `image` must be square and sized to the virtual texture.
    pub fn new(image: TileImage) -> Self {
        assert_eq!(image.width, image.height, "source image must be square");
        Self { image }
    }
}

impl SourceTiles for MemorySource {
    fn tile_size(&self) -> u32 {
        self.image.width as u32
    }

    fn grid_size(&self) -> u32 {
        1
    }

    fn wrap_borders(&self) -> bool {
        false
    }

    fn load_tile(&self, _x: u32, _y: u32, into: &mut TileImage) -> VtResult<()> {
        into.data.copy_from_slice(&self.image.data);
        Ok(())
    }
}

/// Toroidal cache of up to 3x3 input tiles, addressed so a global pixel
/// coordinate modulo the ring span lands on the right texel.
struct InputRing {
    image: TileImage,
    tile_size: u32,
    slots: u32,
    loaded: [[Option<(u32, u32)>; 3]; 3],
    scratch: TileImage,
}

impl InputRing {
    fn new(tile_size: u32, grid_size: u32) -> Self {
        let slots = grid_size.min(3);
        let span = (tile_size * slots) as usize;
        Self {
            image: TileImage::new(span, span, 0),
            tile_size,
            slots,
            loaded: [[None; 3]; 3],
            scratch: TileImage::new(tile_size as usize, tile_size as usize, 0),
        }
    }

    /// Pixels per axis of the ring image.
    fn span(&self) -> i64 {
        self.image.width as i64
    }

    /// Ensure the 3x3 neighborhood around input tile (center_x, center_y) is
    /// resident. Out-of-range neighbors are skipped; already-resident tiles
    /// are not re-read.
    fn load_neighborhood(
        &mut self,
        source: &dyn SourceTiles,
        center_x: u32,
        center_y: u32,
    ) -> VtResult<()> {
        let grid = source.grid_size() as i64;
        for ty in center_y as i64 - 1..=center_y as i64 + 1 {
            if ty < 0 || ty >= grid {
                continue;
            }
            for tx in center_x as i64 - 1..=center_x as i64 + 1 {
                if tx < 0 || tx >= grid {
                    continue;
                }
                let sx = (tx as u32 % self.slots) as usize;
                let sy = (ty as u32 % self.slots) as usize;
                if self.loaded[sx][sy] == Some((tx as u32, ty as u32)) {
                    continue;
                }
                self.loaded[sx][sy] = Some((tx as u32, ty as u32));
                source.load_tile(tx as u32, ty as u32, &mut self.scratch)?;
                self.image.copy_from(
                    Point::new(
                        (sx as u32 * self.tile_size) as i32,
                        (sy as u32 * self.tile_size) as i32,
                    ),
                    &self.scratch,
                    Rect::new(0, 0, self.tile_size as i32, self.tile_size as i32),
                );
            }
        }
        Ok(())
    }
}

/// Worker-private buffers for the mip-0 phase.
struct PageScratch {
    page: TileImage,
    compressed: Vec<u8>,
}

/// Worker-private buffers for the downsampling phase.
struct DownsampleScratch {
    page: TileImage,
    neighbor: TileImage,
    composite: TileImage,
    half: TileImage,
    compressed: Vec<u8>,
}

pub struct TileGenerator {
    info: TextureInfo,
    workers: usize,
}

impl TileGenerator {
    pub fn new(info: TextureInfo) -> Self {
        Self {
            info,
            workers: default_worker_count(),
        }
    }

    pub fn set_workers(&mut self, workers: usize) {
        self.workers = workers.max(1);
    }

    /// Build the tile store at `store_path` from `source`. Returns false if
    /// a store already exists and `force` is off (nothing is generated).
    pub fn generate(
        &self,
        store_path: impl AsRef<Path>,
        source: &dyn SourceTiles,
        force: bool,
    ) -> VtResult<bool> {
        let store_path = store_path.as_ref();
        if !force && store_path.exists() {
            info!(
                "tile store {} already exists, skipping generation",
                store_path.display()
            );
            return Ok(false);
        }

        // The virtual size follows the input; the rest of the pyramid
        // parameters come from the configured info.
        let info = TextureInfo {
            virtual_texture_size: source.tile_size() * source.grid_size(),
            ..self.info
        };
        info.validate()?;
        if source.tile_size() % info.tile_size != 0 {
            return Err(VirtualTextureError::Config(format!(
                "input tile size {} is not a multiple of the page tile size {}",
                source.tile_size(),
                info.tile_size
            )));
        }

        let indexer = PageIndexer::new(&info)?;
        let store = TileStore::create(store_path, info)?;
        info!(
            "generating {} pages over {} mips with {} workers",
            indexer.page_count(),
            indexer.mip_count(),
            self.workers
        );

        self.generate_mip_zero(&store, &indexer, &info, source)?;

        for mip in 1..indexer.mip_count() {
            let side = indexer.size_at(mip);
            self.parallel_pages(
                (side * side) as usize,
                || DownsampleScratch {
                    page: page_image(&info),
                    neighbor: page_image(&info),
                    composite: TileImage::new(
                        info.tile_size as usize * 4,
                        info.tile_size as usize * 4,
                        0xff,
                    ),
                    half: TileImage::new(
                        info.tile_size as usize * 2,
                        info.tile_size as usize * 2,
                        0xff,
                    ),
                    compressed: Vec::new(),
                },
                |index, scratch| {
                    let page = Page::new(index as u32 % side, index as u32 / side, mip);
                    build_mip_page(&store, &indexer, &info, page, scratch)
                },
            )?;
            info!("generated mip {} ({} pages)", mip, side * side);
        }

        store.write_table()?;
        info!("tile store {} complete", store_path.display());
        Ok(true)
    }

    /// Cut mip-0 pages directly out of the source tiles, one 3x3 input
    /// neighborhood at a time.
    fn generate_mip_zero(
        &self,
        store: &TileStore,
        indexer: &PageIndexer,
        info: &TextureInfo,
        source: &dyn SourceTiles,
    ) -> VtResult<()> {
        let table_size = info.page_table_size();
        let pages_per_input = (source.tile_size() / info.tile_size) as usize;
        let wrap = source.wrap_borders();
        let virtual_size = info.virtual_texture_size as i64;

        let mut ring = InputRing::new(source.tile_size(), source.grid_size());

        for block_y in (0..table_size as usize).step_by(pages_per_input) {
            let input_y = block_y as u32 * info.tile_size / source.tile_size();
            for block_x in (0..table_size as usize).step_by(pages_per_input) {
                let input_x = block_x as u32 * info.tile_size / source.tile_size();
                ring.load_neighborhood(source, input_x, input_y)?;

                let ring_image = &ring.image;
                let ring_span = ring.span();
                self.parallel_pages(
                    pages_per_input * pages_per_input,
                    || PageScratch {
                        page: page_image(info),
                        compressed: Vec::new(),
                    },
                    |index, scratch| {
                        let page = Page::new(
                            (block_x + index % pages_per_input) as u32,
                            (block_y + index / pages_per_input) as u32,
                            0,
                        );
                        let x0 = page.x as i64 * info.tile_size as i64 - info.border_size as i64;
                        let y0 = page.y as i64 * info.tile_size as i64 - info.border_size as i64;
                        copy_page_pixels(
                            ring_image,
                            ring_span,
                            x0,
                            y0,
                            virtual_size,
                            wrap,
                            &mut scratch.page,
                        );
                        store.write_page(
                            indexer.index_of(page),
                            &scratch.page.data,
                            &mut scratch.compressed,
                        )
                    },
                )?;
            }
        }
        info!("generated mip 0 ({} pages)", table_size * table_size);
        Ok(())
    }

    /// Classic parallel-for: `self.workers` tasks drain one atomic cursor.
    /// The first failure is kept and the pool winds down.
    fn parallel_pages<S, M, F>(&self, count: usize, make_scratch: M, job: F) -> VtResult<()>
    where
        M: Fn() -> S + Sync,
        F: Fn(usize, &mut S) -> VtResult<()> + Sync,
    {
        let cursor = AtomicUsize::new(0);
        let failure: Mutex<Option<VirtualTextureError>> = Mutex::new(None);

        rayon::scope(|scope| {
            for _ in 0..self.workers {
                scope.spawn(|_| {
                    let mut scratch = make_scratch();
                    loop {
                        if failure.lock().is_some() {
                            break;
                        }
                        let index = cursor.fetch_add(1, Ordering::Relaxed);
                        if index >= count {
                            break;
                        }
                        if let Err(e) = job(index, &mut scratch) {
                            let mut slot = failure.lock();
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            break;
                        }
                    }
                });
            }
        });

        match failure.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Build one mip > 0 page: composite the 4x4 neighborhood of finer pages
/// around this page's children, halve it, crop the border-inclusive
/// footprint out of the center.
fn build_mip_page(
    store: &TileStore,
    indexer: &PageIndexer,
    info: &TextureInfo,
    page: Page,
    scratch: &mut DownsampleScratch,
) -> VtResult<()> {
    let child_x = (page.x as i64) << 1;
    let child_y = (page.y as i64) << 1;
    let finer = page.mip - 1;
    let finer_side = indexer.size_at(finer) as i64;
    let tile = info.tile_size as i32;
    let border = info.border_size as i32;

    scratch.composite.clear(page.mip as u8);
    for y in 0..4i64 {
        for x in 0..4i64 {
            // Wrap so the composite picks up the border regions of pages on
            // the far side of the texture.
            let sx = (child_x + x - 1).rem_euclid(finer_side);
            let sy = (child_y + y - 1).rem_euclid(finer_side);
            let neighbor = Page::new(sx as u32, sy as u32, finer);

            store.read_page(
                indexer.index_of(neighbor),
                &mut scratch.neighbor.data,
                &mut scratch.compressed,
            )?;
            scratch.composite.copy_from(
                Point::new(x as i32 * tile, y as i32 * tile),
                &scratch.neighbor,
                Rect::new(border, border, tile, tile),
            );
        }
    }

    scratch.composite.downsample_into(&mut scratch.half);

    let page_size = info.page_size() as i32;
    scratch.page.copy_from(
        Point::new(0, 0),
        &scratch.half,
        Rect::new(tile / 2 - border, tile / 2 - border, page_size, page_size),
    );

    store.write_page(indexer.index_of(page), &scratch.page.data, &mut scratch.compressed)
}

/// Copy one border-inclusive page out of the input ring. `x0`/`y0` are the
/// page's top-left in virtual-texture pixels (possibly negative at edges);
/// wrap follows the texture torus, clamp replicates the outermost pixels.
fn copy_page_pixels(
    ring: &TileImage,
    ring_span: i64,
    x0: i64,
    y0: i64,
    virtual_size: i64,
    wrap: bool,
    out: &mut TileImage,
) {
    let page_size = out.width;
    for iy in 0..page_size {
        let gy = y0 + iy as i64;
        let ry = resolve(gy, virtual_size, ring_span, wrap) as usize;
        for ix in 0..page_size {
            let gx = x0 + ix as i64;
            let rx = resolve(gx, virtual_size, ring_span, wrap) as usize;

            let si = (ry * ring.width + rx) * CHANNEL_COUNT;
            let di = (iy * page_size + ix) * CHANNEL_COUNT;
            out.data[di..di + CHANNEL_COUNT].copy_from_slice(&ring.data[si..si + CHANNEL_COUNT]);
        }
    }
}

fn resolve(coordinate: i64, virtual_size: i64, ring_span: i64, wrap: bool) -> i64 {
    if wrap {
        coordinate.rem_euclid(ring_span)
    } else {
        coordinate.clamp(0, virtual_size - 1).rem_euclid(ring_span)
    }
}

fn page_image(info: &TextureInfo) -> TileImage {
    let page_size = info.page_size() as usize;
    TileImage::new(page_size, page_size, 0xff)
}

fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(2).max(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_addressing_matches_global_coordinates() {
        struct Numbered;
        impl SourceTiles for Numbered {
            fn tile_size(&self) -> u32 {
                4
            }
            fn grid_size(&self) -> u32 {
                4
            }
            fn load_tile(&self, x: u32, y: u32, into: &mut TileImage) -> VtResult<()> {
                into.clear((y * 4 + x) as u8);
                Ok(())
            }
        }

        let source = Numbered;
        let mut ring = InputRing::new(4, 4);
        ring.load_neighborhood(&source, 1, 1).expect("load");

        // Global pixel (5, 6) lives in input tile (1, 1).
        let rx = 5i64.rem_euclid(ring.span()) as usize;
        let ry = 6i64.rem_euclid(ring.span()) as usize;
        assert_eq!(ring.image.data[(ry * ring.image.width + rx) * CHANNEL_COUNT], 5);

        // Global pixel (0, 0) lives in input tile (0, 0).
        assert_eq!(ring.image.data[0], 0);
    }

    #[test]
    fn parallel_pages_covers_every_index_once() {
        let info = TextureInfo {
            virtual_texture_size: 64,
            tile_size: 16,
            border_size: 1,
        };
        let generator = TileGenerator::new(info);

        let hits: Vec<AtomicUsize> = (0..97).map(|_| AtomicUsize::new(0)).collect();
        generator
            .parallel_pages(
                hits.len(),
                || (),
                |index, _scratch| {
                    hits[index].fetch_add(1, Ordering::Relaxed);
                    Ok(())
                },
            )
            .expect("parallel run");

        assert!(hits.iter().all(|h| h.load(Ordering::Relaxed) == 1));
    }

    #[test]
    fn parallel_pages_surfaces_the_first_error() {
        let info = TextureInfo {
            virtual_texture_size: 64,
            tile_size: 16,
            border_size: 1,
        };
        let generator = TileGenerator::new(info);

        let result = generator.parallel_pages(
            64,
            || (),
            |index, _scratch| {
                if index == 7 {
                    Err(VirtualTextureError::Config("boom".to_string()))
                } else {
                    Ok(())
                }
            },
        );
        assert!(matches!(result, Err(VirtualTextureError::Config(_))));
    }
}
