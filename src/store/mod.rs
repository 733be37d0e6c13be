//! The tile data file: a persistent store of per-page compressed image
//! blocks, addressed by linear page index.
//!
//! Layout: bincode header (magic, version, pyramid parameters, page count,
//! record-table checksum) + dense array of [`PageRecord`] + append region of
//! variable-length JPEG blocks. Records are all zero until their page is
//! written, so a partially generated store is readable and self-describing.
//!
//! Reads and appends share one mutex scoped to the file handle; encode and
//! decode happen outside the lock.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::{debug, info};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{VirtualTextureError, VtResult};
use crate::page::PageIndexer;
use crate::raster::CHANNEL_COUNT;
use crate::TextureInfo;

const STORE_MAGIC: [u8; 4] = *b"MTEX";
const STORE_VERSION: u32 = 1;

/// Location of one compressed page block inside the store. Length 0 means
/// the page has not been written yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub offset: u64,
    pub length: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreHeader {
    magic: [u8; 4],
    version: u32,
    info: TextureInfo,
    page_count: u64,
    table_crc: u32,
}

struct StoreInner {
    file: File,
    /// Append cursor; always past every written block.
    cursor: u64,
    records: Vec<PageRecord>,
}

/// One page store for one virtual texture asset.
pub struct TileStore {
    info: TextureInfo,
    page_count: usize,
    page_bytes: usize,
    inner: Mutex<StoreInner>,
}

impl TileStore {
    /// Create a new store for writing. The record table is zeroed and
    /// persisted immediately.
    pub fn create(path: impl AsRef<Path>, info: TextureInfo) -> VtResult<Self> {
        let path = path.as_ref();
        let indexer = PageIndexer::new(&info)?;
        let page_count = indexer.page_count();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        let records = vec![PageRecord::default(); page_count];
        let data_start = table_span(&info, &records)?;

        let store = Self {
            info,
            page_count,
            page_bytes: page_footprint(&info),
            inner: Mutex::new(StoreInner {
                file,
                cursor: data_start,
                records,
            }),
        };
        store.write_table()?;

        info!(
            "created tile store {} ({} pages, {}px pages)",
            path.display(),
            page_count,
            info.page_size()
        );
        Ok(store)
    }

    /// Open an existing store for reading, verifying magic, version and the
    /// record-table checksum.
    pub fn open(path: impl AsRef<Path>) -> VtResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).open(path)?;
        let mut reader = BufReader::new(file);

        let header: StoreHeader = bincode::deserialize_from(&mut reader)
            .map_err(|e| VirtualTextureError::CorruptedStore(format!("unreadable header: {}", e)))?;

        if header.magic != STORE_MAGIC {
            return Err(VirtualTextureError::CorruptedStore(
                "bad magic bytes".to_string(),
            ));
        }
        if header.version != STORE_VERSION {
            return Err(VirtualTextureError::VersionMismatch {
                expected: STORE_VERSION,
                found: header.version,
            });
        }
        header.info.validate()?;

        let indexer = PageIndexer::new(&header.info)?;
        if header.page_count as usize != indexer.page_count() {
            return Err(VirtualTextureError::CorruptedStore(format!(
                "page count {} does not match pyramid ({} pages)",
                header.page_count,
                indexer.page_count()
            )));
        }

        let records: Vec<PageRecord> = bincode::deserialize_from(&mut reader).map_err(|e| {
            VirtualTextureError::CorruptedStore(format!("unreadable record table: {}", e))
        })?;
        if records.len() != header.page_count as usize {
            return Err(VirtualTextureError::CorruptedStore(
                "truncated record table".to_string(),
            ));
        }
        if table_crc(&records) != header.table_crc {
            return Err(VirtualTextureError::CorruptedStore(
                "record table checksum mismatch".to_string(),
            ));
        }

        let data_start = table_span(&header.info, &records)?;
        let cursor = records
            .iter()
            .map(|r| r.offset + r.length as u64)
            .max()
            .unwrap_or(0)
            .max(data_start);

        debug!(
            "opened tile store {} ({} of {} pages written)",
            path.display(),
            records.iter().filter(|r| r.length > 0).count(),
            records.len()
        );

        Ok(Self {
            info: header.info,
            page_count: records.len(),
            page_bytes: page_footprint(&header.info),
            inner: Mutex::new(StoreInner {
                file: reader.into_inner(),
                cursor,
                records,
            }),
        })
    }

    pub fn info(&self) -> TextureInfo {
        self.info
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Decoded size of one page in bytes (`page_size² × 4`).
    pub fn page_bytes(&self) -> usize {
        self.page_bytes
    }

    pub fn is_written(&self, index: usize) -> bool {
        self.inner.lock().records[index].length > 0
    }

    /// Encode `pixels` and append the compressed block, recording its
    /// location. `scratch` receives the compressed bytes and is reusable
    /// across calls. Safe to call from multiple threads; the append itself
    /// is serialized.
    pub fn write_page(&self, index: usize, pixels: &[u8], scratch: &mut Vec<u8>) -> VtResult<()> {
        assert!(index < self.page_count, "page index {} out of range", index);
        debug_assert_eq!(pixels.len(), self.page_bytes);

        codec::encode_page(pixels, self.info.page_size() as usize, scratch)?;

        let mut inner = self.inner.lock();
        let offset = inner.cursor;
        inner.file.seek(SeekFrom::Start(offset))?;
        inner.file.write_all(scratch)?;
        inner.cursor = offset + scratch.len() as u64;
        inner.records[index] = PageRecord {
            offset,
            length: scratch.len() as u32,
        };
        Ok(())
    }

    /// Read and decode one page into the fixed `page_bytes` footprint.
    /// `scratch` holds the compressed block between the locked read and the
    /// unlocked decode.
    pub fn read_page(&self, index: usize, out: &mut [u8], scratch: &mut Vec<u8>) -> VtResult<()> {
        assert!(index < self.page_count, "page index {} out of range", index);
        debug_assert_eq!(out.len(), self.page_bytes);

        {
            let mut inner = self.inner.lock();
            let record = inner.records[index];
            if record.length == 0 {
                return Err(VirtualTextureError::CorruptedStore(format!(
                    "page {} has not been written",
                    index
                )));
            }
            scratch.resize(record.length as usize, 0);
            inner.file.seek(SeekFrom::Start(record.offset))?;
            inner.file.read_exact(scratch)?;
        }

        codec::decode_page(scratch, out)
    }

    /// Persist the header and record table. Called once at create time (all
    /// zero) and again when generation finishes.
    pub fn write_table(&self) -> VtResult<()> {
        let mut inner = self.inner.lock();
        let StoreInner { file, records, .. } = &mut *inner;

        file.seek(SeekFrom::Start(0))?;
        let mut writer = BufWriter::new(&mut *file);
        let header = StoreHeader {
            magic: STORE_MAGIC,
            version: STORE_VERSION,
            info: self.info,
            page_count: records.len() as u64,
            table_crc: table_crc(records),
        };
        bincode::serialize_into(&mut writer, &header)
            .map_err(|e| VirtualTextureError::CorruptedStore(format!("header write: {}", e)))?;
        bincode::serialize_into(&mut writer, records).map_err(|e| {
            VirtualTextureError::CorruptedStore(format!("record table write: {}", e))
        })?;
        writer.flush()?;
        Ok(())
    }
}

fn page_footprint(info: &TextureInfo) -> usize {
    let page_size = info.page_size() as usize;
    page_size * page_size * CHANNEL_COUNT
}

/// Byte length of the header + record table region, i.e. where the append
/// region begins.
fn table_span(info: &TextureInfo, records: &[PageRecord]) -> VtResult<u64> {
    let header = StoreHeader {
        magic: STORE_MAGIC,
        version: STORE_VERSION,
        info: *info,
        page_count: records.len() as u64,
        table_crc: 0,
    };
    let header_len = bincode::serialized_size(&header)
        .map_err(|e| VirtualTextureError::CorruptedStore(format!("header size: {}", e)))?;
    let table_len = bincode::serialized_size(&records)
        .map_err(|e| VirtualTextureError::CorruptedStore(format!("table size: {}", e)))?;
    Ok(header_len + table_len)
}

fn table_crc(records: &[PageRecord]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    for record in records {
        hasher.update(&record.offset.to_le_bytes());
        hasher.update(&record.length.to_le_bytes());
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_info() -> TextureInfo {
        TextureInfo {
            virtual_texture_size: 64,
            tile_size: 16,
            border_size: 1,
        }
    }

    fn gradient_page(info: &TextureInfo, seed: u8) -> Vec<u8> {
        let size = info.page_size() as usize;
        let mut pixels = vec![0u8; size * size * CHANNEL_COUNT];
        for y in 0..size {
            for x in 0..size {
                let i = (y * size + x) * CHANNEL_COUNT;
                pixels[i] = seed;
                pixels[i + 1] = (x * 4) as u8;
                pixels[i + 2] = (y * 4) as u8;
                pixels[i + 3] = 255;
            }
        }
        pixels
    }

    #[test]
    fn write_then_read_same_handle() {
        let dir = tempfile::tempdir().expect("temp dir");
        let info = small_info();
        let store = TileStore::create(dir.path().join("a.vt"), info).expect("create");

        let pixels = gradient_page(&info, 80);
        let mut scratch = Vec::new();
        store.write_page(3, &pixels, &mut scratch).expect("write");
        assert!(store.is_written(3));
        assert!(!store.is_written(4));

        let mut out = vec![0u8; store.page_bytes()];
        store.read_page(3, &mut out, &mut scratch).expect("read");
        for (a, b) in pixels.chunks_exact(4).zip(out.chunks_exact(4)) {
            for c in 0..3 {
                assert!((a[c] as i32 - b[c] as i32).abs() <= 32);
            }
        }
    }

    #[test]
    fn reading_an_unwritten_page_is_typed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = TileStore::create(dir.path().join("a.vt"), small_info()).expect("create");

        let mut out = vec![0u8; store.page_bytes()];
        let mut scratch = Vec::new();
        assert!(matches!(
            store.read_page(0, &mut out, &mut scratch),
            Err(VirtualTextureError::CorruptedStore(_))
        ));
    }

    #[test]
    fn reopen_after_write_table() {
        let dir = tempfile::tempdir().expect("temp dir");
        let info = small_info();
        let path = dir.path().join("a.vt");

        let pixels = gradient_page(&info, 42);
        {
            let store = TileStore::create(&path, info).expect("create");
            let mut scratch = Vec::new();
            store.write_page(0, &pixels, &mut scratch).expect("write");
            store.write_page(7, &pixels, &mut scratch).expect("write");
            store.write_table().expect("table");
        }

        let store = TileStore::open(&path).expect("open");
        assert_eq!(store.info(), info);
        assert!(store.is_written(0));
        assert!(store.is_written(7));
        assert!(!store.is_written(1));

        let mut out = vec![0u8; store.page_bytes()];
        let mut scratch = Vec::new();
        store.read_page(7, &mut out, &mut scratch).expect("read");
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("junk.vt");
        std::fs::write(&path, b"definitely not a tile store, but long enough").expect("write");

        assert!(matches!(
            TileStore::open(&path),
            Err(VirtualTextureError::CorruptedStore(_))
        ));
    }

    #[test]
    fn open_rejects_future_version() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("a.vt");
        TileStore::create(&path, small_info()).expect("create");

        // The version field sits right after the 4 magic bytes.
        let mut bytes = std::fs::read(&path).expect("read");
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        std::fs::write(&path, &bytes).expect("write");

        assert!(matches!(
            TileStore::open(&path),
            Err(VirtualTextureError::VersionMismatch {
                expected: STORE_VERSION,
                found: 99
            })
        ));
    }

    #[test]
    fn open_rejects_corrupt_record_table() {
        let dir = tempfile::tempdir().expect("temp dir");
        let info = small_info();
        let path = dir.path().join("a.vt");
        {
            let store = TileStore::create(&path, info).expect("create");
            let pixels = gradient_page(&info, 1);
            let mut scratch = Vec::new();
            store.write_page(0, &pixels, &mut scratch).expect("write");
            store.write_table().expect("table");
        }

        // Flip a byte inside the first record (past the fixed header).
        let mut bytes = std::fs::read(&path).expect("read");
        let header_len = bincode::serialized_size(&StoreHeader {
            magic: STORE_MAGIC,
            version: STORE_VERSION,
            info,
            page_count: 0,
            table_crc: 0,
        })
        .expect("size") as usize;
        bytes[header_len + 8 + 2] ^= 0xff;
        std::fs::write(&path, &bytes).expect("write");

        assert!(matches!(
            TileStore::open(&path),
            Err(VirtualTextureError::CorruptedStore(_))
        ));
    }
}
