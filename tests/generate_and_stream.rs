//! End to end: generate a small pyramid offline, then stream it through the
//! live paging path with a headless backend.

use megatexture::{
    FeedbackBuffer, MemorySource, NullBackend, Page, PageIndexer, TextureInfo, TileGenerator,
    TileImage, TileStore, VirtualTexture, CHANNEL_COUNT,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn small_info() -> TextureInfo {
    TextureInfo {
        virtual_texture_size: 64,
        tile_size: 16,
        border_size: 1,
    }
}

/// A smooth two-axis gradient across the whole virtual texture.
fn source_image(size: usize) -> TileImage {
    let mut image = TileImage::new(size, size, 0);
    for y in 0..size {
        for x in 0..size {
            let i = (y * size + x) * CHANNEL_COUNT;
            image.data[i] = (x * 4) as u8;
            image.data[i + 1] = (y * 4) as u8;
            image.data[i + 2] = 128;
            image.data[i + 3] = 255;
        }
    }
    image
}

#[test]
fn generator_builds_a_complete_readable_pyramid() {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("asset.vt");
    let info = small_info();

    let source = MemorySource::new(source_image(info.virtual_texture_size as usize));
    let mut generator = TileGenerator::new(info);
    generator.set_workers(4);
    assert!(generator.generate(&path, &source, false).expect("generate"));

    let store = TileStore::open(&path).expect("open store");
    let indexer = PageIndexer::new(&info).expect("indexer");
    assert_eq!(store.page_count(), indexer.page_count());

    // Every page of every mip exists and decodes.
    let mut out = vec![0u8; store.page_bytes()];
    let mut scratch = Vec::new();
    for index in 0..store.page_count() {
        assert!(store.is_written(index), "page {} missing", index);
        store
            .read_page(index, &mut out, &mut scratch)
            .expect("read page");
    }

    // A mip 0 page reproduces its source region (borders excluded, lossy
    // tolerance): page (1, 1) payload starts at virtual texel (16, 16).
    let page = Page::new(1, 1, 0);
    store
        .read_page(indexer.index_of(page), &mut out, &mut scratch)
        .expect("read page");
    let source = source_image(info.virtual_texture_size as usize);
    let page_size = info.page_size() as usize;
    let border = info.border_size as usize;
    for y in 0..info.tile_size as usize {
        for x in 0..info.tile_size as usize {
            let pi = ((y + border) * page_size + (x + border)) * CHANNEL_COUNT;
            let si = ((y + 16) * source.width + (x + 16)) * CHANNEL_COUNT;
            for c in 0..3 {
                let delta = (out[pi + c] as i32 - source.data[si + c] as i32).abs();
                assert!(delta <= 32, "texel ({}, {}) channel {} off by {}", x, y, c, delta);
            }
        }
    }

    // The coarsest page averages the whole texture; the gradient midpoint
    // lands mid-range in the red and green channels.
    let root = Page::new(0, 0, indexer.mip_count() - 1);
    store
        .read_page(indexer.index_of(root), &mut out, &mut scratch)
        .expect("read root");
    let center = ((page_size / 2) * page_size + page_size / 2) * CHANNEL_COUNT;
    assert!((out[center] as i32 - 128).abs() <= 48);
    assert!((out[center + 1] as i32 - 128).abs() <= 48);
}

#[test]
fn existing_stores_are_not_regenerated_unless_forced() {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("asset.vt");
    let info = small_info();
    let source = MemorySource::new(source_image(info.virtual_texture_size as usize));
    let generator = TileGenerator::new(info);

    assert!(generator.generate(&path, &source, false).expect("generate"));
    assert!(!generator.generate(&path, &source, false).expect("skip"));
    assert!(generator.generate(&path, &source, true).expect("force"));
}

#[test]
fn demand_streams_pages_into_residency() {
    init_logging();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("asset.vt");
    let info = small_info();

    let source = MemorySource::new(source_image(info.virtual_texture_size as usize));
    TileGenerator::new(info)
        .generate(&path, &source, false)
        .expect("generate");

    let mut gpu = NullBackend::new();
    let store = TileStore::open(&path).expect("open store");

    // Atlas with room for four pages, four uploads a frame.
    let mut vt = VirtualTexture::new(Some(store), info, 2 * info.page_size(), 4, 0, &mut gpu)
        .expect("virtual texture");
    let mut feedback =
        FeedbackBuffer::new(&info, 16, 16, &mut gpu).expect("feedback buffer");

    // One visible fine page; its ancestor chain accrues demand with it.
    feedback.add_request_with_ancestors(Page::new(3, 3, 0));
    vt.update(feedback.requests(), &mut gpu);
    feedback.clear();

    assert_eq!(vt.cache().resident_count(), 3);
    for page in [Page::new(0, 0, 2), Page::new(1, 1, 1), Page::new(3, 3, 0)] {
        assert!(vt.cache().is_resident(page), "{:?} should be resident", page);
        assert!(vt.page_table().find(page).is_some());
    }

    // Next frame: different fine page, same coarse ancestors stay put.
    feedback.add_request_with_ancestors(Page::new(0, 0, 0));
    vt.update(feedback.requests(), &mut gpu);
    feedback.clear();

    assert!(vt.cache().is_resident(Page::new(0, 0, 0)));
    assert!(vt.cache().is_resident(Page::new(0, 0, 2)));
    assert!(vt.cache().resident_count() <= vt.cache().capacity());
}
