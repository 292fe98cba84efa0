//! Persistent storage for pages and canonical stroke rows.
//!
//! ```text
//! ┌─────────────┐  append_stroke   ┌────────────────────┐
//! │ StrokeLedger│ ───────────────► │ dyn StrokeStorage  │
//! │ (single     │                  ├────────────────────┤
//! │  writer)    │ ◄─────────────── │ MemoryStorage      │  default
//! └─────────────┘  recovery on     │ RocksStorage       │  feature "rocksdb"
//!                  startup         └────────────────────┘
//! ```
//!
//! Storage is synchronous; the ledger calls it while holding its acceptance
//! lock so persisted order always equals acceptance order.

pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;

use thiserror::Error;

use inkwall_core::{CanonicalStroke, PageId, PageMeta};

pub use memory::MemoryStorage;
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksStorage, StorageConfig};

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
    #[error("compression error: {0}")]
    Compression(String),
}

/// Backing store for the stroke ledger.
pub trait StrokeStorage: Send + Sync {
    /// Insert or replace page metadata.
    fn put_page(&self, meta: &PageMeta) -> Result<(), StorageError>;

    fn get_page(&self, id: &PageId) -> Result<Option<PageMeta>, StorageError>;

    fn list_pages(&self) -> Result<Vec<PageMeta>, StorageError>;

    /// Persist an accepted stroke under its acceptance sequence number.
    fn append_stroke(&self, seq: u64, stroke: &CanonicalStroke) -> Result<(), StorageError>;

    /// All strokes for a page in acceptance order.
    fn strokes_for_page(&self, id: &PageId) -> Result<Vec<CanonicalStroke>, StorageError>;

    /// Highest sequence number ever appended, 0 when empty.
    fn last_sequence(&self) -> Result<u64, StorageError>;
}
