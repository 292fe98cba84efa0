//! In-memory storage. Nothing survives a restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use inkwall_core::{CanonicalStroke, PageId, PageMeta};

use super::{StorageError, StrokeStorage};

#[derive(Default)]
struct Inner {
    pages: BTreeMap<PageId, PageMeta>,
    /// page -> (seq, row), appended in sequence order
    strokes: HashMap<PageId, Vec<(u64, CanonicalStroke)>>,
    last_seq: u64,
}

#[derive(Default)]
pub struct MemoryStorage {
    inner: RwLock<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StorageError> {
        self.inner
            .read()
            .map_err(|_| StorageError::Database("memory storage lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StorageError> {
        self.inner
            .write()
            .map_err(|_| StorageError::Database("memory storage lock poisoned".into()))
    }
}

impl StrokeStorage for MemoryStorage {
    fn put_page(&self, meta: &PageMeta) -> Result<(), StorageError> {
        self.write()?.pages.insert(meta.id.clone(), meta.clone());
        Ok(())
    }

    fn get_page(&self, id: &PageId) -> Result<Option<PageMeta>, StorageError> {
        Ok(self.read()?.pages.get(id).cloned())
    }

    fn list_pages(&self) -> Result<Vec<PageMeta>, StorageError> {
        Ok(self.read()?.pages.values().cloned().collect())
    }

    fn append_stroke(&self, seq: u64, stroke: &CanonicalStroke) -> Result<(), StorageError> {
        let mut inner = self.write()?;
        inner
            .strokes
            .entry(stroke.page_id().clone())
            .or_default()
            .push((seq, stroke.clone()));
        inner.last_seq = inner.last_seq.max(seq);
        Ok(())
    }

    fn strokes_for_page(&self, id: &PageId) -> Result<Vec<CanonicalStroke>, StorageError> {
        let inner = self.read()?;
        let Some(rows) = inner.strokes.get(id) else {
            return Ok(Vec::new());
        };
        let mut rows = rows.clone();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    fn last_sequence(&self) -> Result<u64, StorageError> {
        Ok(self.read()?.last_seq)
    }
}
