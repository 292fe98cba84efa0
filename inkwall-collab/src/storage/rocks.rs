//! RocksDB-backed stroke storage.
//!
//! Column families:
//! - `pages`   — page metadata (bincode), keyed by page id
//! - `strokes` — canonical rows (JSON, LZ4 compressed), keyed by
//!   `<page id><0x00><seq: 8 bytes BE>` so a prefix scan yields acceptance order
//! - `meta`    — the last assigned sequence number
//!
//! Stroke rows and the sequence counter are written in one batch, so recovery
//! never sees a row whose sequence exceeds the stored counter.

use std::path::{Path, PathBuf};

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};

use inkwall_core::{CanonicalStroke, PageId, PageMeta};

use super::{StorageError, StrokeStorage};

const CF_PAGES: &str = "pages";
const CF_STROKES: &str = "strokes";
const CF_META: &str = "meta";

const COLUMN_FAMILIES: &[&str] = &[CF_PAGES, CF_STROKES, CF_META];

const SEQUENCE_KEY: &[u8] = b"sequence";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    pub bloom_filter_bits: i32,
    /// fsync every accepted stroke
    pub sync_writes: bool,
    pub max_open_files: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("inkwall_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
        }
    }
}

impl StorageConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

pub struct RocksStorage {
    db: DBWithThreadMode<SingleThreaded>,
    config: StorageConfig,
}

impl RocksStorage {
    /// Open (or create) the database and its column families.
    pub fn open(config: StorageConfig) -> Result<Self, StorageError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened stroke storage at {}", config.path.display());

        Ok(Self { db, config })
    }

    fn cf_options(name: &str, config: &StorageConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            // Rows are already LZ4 compressed.
            CF_STROKES => opts.set_compression_type(DBCompressionType::None),
            _ => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
        }
        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::Database(format!("column family '{name}' not found")))
    }

    fn page_prefix(page: &PageId) -> Vec<u8> {
        let mut key = Vec::with_capacity(page.as_str().len() + 1);
        key.extend_from_slice(page.as_str().as_bytes());
        key.push(0);
        key
    }

    fn stroke_key(page: &PageId, seq: u64) -> Vec<u8> {
        let mut key = Self::page_prefix(page);
        key.extend_from_slice(&seq.to_be_bytes());
        key
    }

    fn encode_page(meta: &PageMeta) -> Result<Vec<u8>, StorageError> {
        bincode::serde::encode_to_vec(meta, bincode::config::standard())
            .map_err(|e| StorageError::Serialization(e.to_string()))
    }

    fn decode_page(bytes: &[u8]) -> Result<PageMeta, StorageError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StorageError::Deserialization(e.to_string()))?;
        Ok(meta)
    }

    fn encode_row(stroke: &CanonicalStroke) -> Result<Vec<u8>, StorageError> {
        let json =
            serde_json::to_vec(stroke).map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&json))
    }

    fn decode_row(bytes: &[u8]) -> Result<CanonicalStroke, StorageError> {
        let json = lz4_flex::decompress_size_prepended(bytes)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| StorageError::Deserialization(e.to_string()))
    }
}

impl StrokeStorage for RocksStorage {
    fn put_page(&self, meta: &PageMeta) -> Result<(), StorageError> {
        let cf = self.cf(CF_PAGES)?;
        self.db
            .put_cf(&cf, meta.id.as_str().as_bytes(), Self::encode_page(meta)?)?;
        Ok(())
    }

    fn get_page(&self, id: &PageId) -> Result<Option<PageMeta>, StorageError> {
        let cf = self.cf(CF_PAGES)?;
        match self.db.get_cf(&cf, id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(Self::decode_page(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_pages(&self) -> Result<Vec<PageMeta>, StorageError> {
        let cf = self.cf(CF_PAGES)?;
        let mut pages = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            pages.push(Self::decode_page(&value)?);
        }
        Ok(pages)
    }

    fn append_stroke(&self, seq: u64, stroke: &CanonicalStroke) -> Result<(), StorageError> {
        let cf_strokes = self.cf(CF_STROKES)?;
        let cf_meta = self.cf(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(
            &cf_strokes,
            Self::stroke_key(stroke.page_id(), seq),
            Self::encode_row(stroke)?,
        );
        batch.put_cf(&cf_meta, SEQUENCE_KEY, seq.to_be_bytes());

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn strokes_for_page(&self, id: &PageId) -> Result<Vec<CanonicalStroke>, StorageError> {
        let cf = self.cf(CF_STROKES)?;
        let prefix = Self::page_prefix(id);

        let mut rows = Vec::new();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            rows.push(Self::decode_row(&value)?);
        }
        Ok(rows)
    }

    fn last_sequence(&self) -> Result<u64, StorageError> {
        let cf = self.cf(CF_META)?;
        match self.db.get_cf(&cf, SEQUENCE_KEY)? {
            Some(bytes) => {
                let buf: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    StorageError::Deserialization("sequence counter is not 8 bytes".into())
                })?;
                Ok(u64::from_be_bytes(buf))
            }
            None => Ok(0),
        }
    }
}
