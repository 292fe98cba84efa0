//! Optimistic stroke store for one active page.
//!
//! Holds committed and pending strokes in draw order (later entries draw over
//! earlier ones). Every mutation is synchronous and runs to completion; the
//! page session serializes callers so no two mutations interleave.
//!
//! ## Reconciliation rules
//!
//! | Event | Store state | Result |
//! |-------|-------------|--------|
//! | `confirm(t, s)` | `t` pending, `s` unknown | `t` replaced in place by `s` |
//! | `confirm(t, s)` | `t` pending, `s` present | `t` removed (feed got there first) |
//! | `confirm(t, s)` | `t` absent | no-op |
//! | `rollback(t)` | `t` pending | `t` removed |
//! | `merge_remote(s)` | `s` present | discarded |
//! | `merge_remote(s)` | own pending entry with same content | that entry promoted in place |
//! | `merge_remote(s)` | otherwise | appended |
//!
//! Whichever path (write response or feed) delivers the canonical record
//! first wins; the later one is discarded.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::model::{
    CanonicalId, CanonicalStroke, ContentFingerprint, PageId, Stroke, StrokeDraft, StrokeId,
    TempId,
};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("temporary id {0} is already pending")]
    TempIdInUse(TempId),
    #[error("temporary id {0} was already resolved and cannot be reused")]
    TempIdRetired(TempId),
    #[error("stroke belongs to page {got}, store holds page {expected}")]
    WrongPage { expected: PageId, got: PageId },
}

/// Result of [`OptimisticStore::confirm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The pending entry now carries its canonical id.
    Replaced,
    /// The canonical stroke was already present; the pending copy was dropped.
    Deduplicated,
    /// Nothing pending under that id (rolled back, or promoted by the feed).
    NotPending,
}

/// Result of [`OptimisticStore::rollback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Removed,
    NotPending,
}

/// Result of [`OptimisticStore::merge_remote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New stroke appended at the end of the draw order.
    Appended,
    /// Canonical id already present.
    Duplicate,
    /// Matched one of our own pending strokes, which is now committed.
    Promoted(TempId),
    /// Stroke belongs to a different page and was dropped.
    WrongPage,
}

/// Ordered strokes for one page: committed plus pending.
#[derive(Debug, Clone)]
pub struct OptimisticStore {
    page_id: PageId,
    entries: Vec<Stroke>,
    /// Canonical ids present in `entries`.
    committed: HashSet<CanonicalId>,
    /// Live temp ids and their content fingerprints.
    pending: HashMap<TempId, ContentFingerprint>,
    /// Temp ids that were confirmed, rolled back or promoted.
    retired: HashSet<TempId>,
}

impl OptimisticStore {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            entries: Vec::new(),
            committed: HashSet::new(),
            pending: HashMap::new(),
            retired: HashSet::new(),
        }
    }

    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    /// Load initial strokes in order. Returns how many were appended.
    pub fn seed(&mut self, strokes: impl IntoIterator<Item = CanonicalStroke>) -> usize {
        strokes
            .into_iter()
            .filter(|s| self.merge_remote(s.clone()) == MergeOutcome::Appended)
            .count()
    }

    /// Append a speculative stroke under a fresh temp id.
    pub fn insert_pending(&mut self, temp_id: TempId, draft: StrokeDraft) -> Result<(), StoreError> {
        if draft.page_id != self.page_id {
            return Err(StoreError::WrongPage {
                expected: self.page_id.clone(),
                got: draft.page_id,
            });
        }
        if self.pending.contains_key(&temp_id) {
            return Err(StoreError::TempIdInUse(temp_id));
        }
        if self.retired.contains(&temp_id) {
            return Err(StoreError::TempIdRetired(temp_id));
        }

        self.pending.insert(temp_id, draft.fingerprint());
        self.entries.push(Stroke::pending(temp_id, draft));
        Ok(())
    }

    /// Replace a pending entry with its canonical record, keeping its place
    /// in draw order.
    pub fn confirm(&mut self, temp_id: TempId, canonical: CanonicalStroke) -> ConfirmOutcome {
        let Some(index) = self.pending_index(temp_id) else {
            log::debug!("confirm {temp_id}: not pending, ignoring {}", canonical.id);
            return ConfirmOutcome::NotPending;
        };
        self.retire(temp_id);

        if self.committed.contains(&canonical.id) {
            self.entries.remove(index);
            log::debug!("confirm {temp_id}: {} already merged from feed", canonical.id);
            return ConfirmOutcome::Deduplicated;
        }

        self.committed.insert(canonical.id.clone());
        self.entries[index] = Stroke::committed(canonical);
        ConfirmOutcome::Replaced
    }

    /// Remove a pending entry.
    pub fn rollback(&mut self, temp_id: TempId) -> RollbackOutcome {
        match self.pending_index(temp_id) {
            Some(index) => {
                self.entries.remove(index);
                self.retire(temp_id);
                RollbackOutcome::Removed
            }
            None => RollbackOutcome::NotPending,
        }
    }

    /// Merge a canonical stroke delivered by the live feed or the initial load.
    pub fn merge_remote(&mut self, canonical: CanonicalStroke) -> MergeOutcome {
        if canonical.draft.page_id != self.page_id {
            log::warn!(
                "Dropping stroke {} for page {} (active page {})",
                canonical.id,
                canonical.draft.page_id,
                self.page_id
            );
            return MergeOutcome::WrongPage;
        }
        if self.committed.contains(&canonical.id) {
            return MergeOutcome::Duplicate;
        }

        let fingerprint = canonical.draft.fingerprint();
        let echo_of = self
            .entries
            .iter()
            .enumerate()
            .find_map(|(index, entry)| match entry.id {
                StrokeId::Pending(t)
                    if entry.draft.session_id == canonical.draft.session_id
                        && self.pending.get(&t) == Some(&fingerprint) =>
                {
                    Some((index, t))
                }
                _ => None,
            });

        self.committed.insert(canonical.id.clone());
        match echo_of {
            Some((index, temp_id)) => {
                self.retire(temp_id);
                self.entries[index] = Stroke::committed(canonical);
                MergeOutcome::Promoted(temp_id)
            }
            None => {
                self.entries.push(Stroke::committed(canonical));
                MergeOutcome::Appended
            }
        }
    }

    /// Strokes in draw order.
    pub fn strokes(&self) -> &[Stroke] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &Stroke> {
        self.entries.iter()
    }

    /// Owned copy of the draw list.
    pub fn snapshot(&self) -> Vec<Stroke> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, temp_id: TempId) -> bool {
        self.pending.contains_key(&temp_id)
    }

    pub fn contains_canonical(&self, id: &CanonicalId) -> bool {
        self.committed.contains(id)
    }

    pub fn get(&self, id: &StrokeId) -> Option<&Stroke> {
        match id {
            StrokeId::Pending(t) => self.get_pending(*t),
            StrokeId::Committed(c) => self.get_canonical(c),
        }
    }

    pub fn get_canonical(&self, id: &CanonicalId) -> Option<&Stroke> {
        self.entries
            .iter()
            .find(|s| s.id.canonical_id() == Some(id))
    }

    pub fn get_pending(&self, temp_id: TempId) -> Option<&Stroke> {
        self.pending_index(temp_id).map(|i| &self.entries[i])
    }

    fn pending_index(&self, temp_id: TempId) -> Option<usize> {
        if !self.pending.contains_key(&temp_id) {
            return None;
        }
        self.entries
            .iter()
            .position(|s| s.id == StrokeId::Pending(temp_id))
    }

    fn retire(&mut self, temp_id: TempId) {
        self.pending.remove(&temp_id);
        self.retired.insert(temp_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Point, SessionId, Tool};
    use chrono::Utc;

    fn page() -> PageId {
        PageId::from("page_01")
    }

    fn draft(session: &str, seed: f64) -> StrokeDraft {
        StrokeDraft {
            page_id: page(),
            session_id: SessionId::from(session),
            color: "#ff0066".to_string(),
            width: 3.0,
            points: vec![
                Point::new(seed, seed),
                Point::new(seed + 1.0, seed),
                Point::new(seed + 2.0, seed + 1.0),
            ],
            tool: Tool::Pen,
            created_at: Utc::now(),
        }
    }

    fn canonical(id: &str, draft: StrokeDraft) -> CanonicalStroke {
        CanonicalStroke::new(id, draft)
    }

    fn ids(store: &OptimisticStore) -> Vec<String> {
        store.iter().map(|s| s.id.to_string()).collect()
    }

    #[test]
    fn test_pending_then_confirm() {
        let mut store = OptimisticStore::new(page());
        let d = draft("a", 0.0);
        let temp = TempId::new();

        store.insert_pending(temp, d.clone()).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.strokes()[0].is_pending());

        let outcome = store.confirm(temp, canonical("s-42", d.clone()));
        assert_eq!(outcome, ConfirmOutcome::Replaced);
        assert_eq!(store.len(), 1);
        assert!(!store.is_pending(temp));
        let s = store.get_canonical(&CanonicalId::from("s-42")).unwrap();
        assert_eq!(s.points(), d.points.as_slice());
        assert!(store.get_pending(temp).is_none());
    }

    #[test]
    fn test_confirm_preserves_draw_order() {
        let mut store = OptimisticStore::new(page());
        store.merge_remote(canonical("s-1", draft("b", 0.0)));
        let temp = TempId::new();
        store.insert_pending(temp, draft("a", 10.0)).unwrap();
        store.merge_remote(canonical("s-3", draft("b", 20.0)));

        store.confirm(temp, canonical("s-2", draft("a", 10.0)));
        assert_eq!(ids(&store), vec!["s-1", "s-2", "s-3"]);
    }

    #[test]
    fn test_rollback_restores_previous_state() {
        let mut store = OptimisticStore::new(page());
        store.merge_remote(canonical("s-1", draft("b", 0.0)));
        let before = store.snapshot();

        let temp = TempId::new();
        store.insert_pending(temp, draft("a", 5.0)).unwrap();
        assert_eq!(store.rollback(temp), RollbackOutcome::Removed);

        assert_eq!(store.snapshot(), before);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.rollback(temp), RollbackOutcome::NotPending);
    }

    #[test]
    fn test_confirm_after_rollback_is_noop() {
        let mut store = OptimisticStore::new(page());
        let temp = TempId::new();
        store.insert_pending(temp, draft("a", 0.0)).unwrap();
        store.rollback(temp);

        assert_eq!(
            store.confirm(temp, canonical("s-1", draft("a", 0.0))),
            ConfirmOutcome::NotPending
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_temp_id_never_reused() {
        let mut store = OptimisticStore::new(page());
        let temp = TempId::new();
        store.insert_pending(temp, draft("a", 0.0)).unwrap();
        assert_eq!(
            store.insert_pending(temp, draft("a", 1.0)),
            Err(StoreError::TempIdInUse(temp))
        );

        store.rollback(temp);
        assert_eq!(
            store.insert_pending(temp, draft("a", 2.0)),
            Err(StoreError::TempIdRetired(temp))
        );
    }

    #[test]
    fn test_insert_pending_wrong_page() {
        let mut store = OptimisticStore::new(page());
        let mut d = draft("a", 0.0);
        d.page_id = PageId::from("other");
        assert!(matches!(
            store.insert_pending(TempId::new(), d),
            Err(StoreError::WrongPage { .. })
        ));
    }

    #[test]
    fn test_merge_remote_idempotent() {
        let mut store = OptimisticStore::new(page());
        let s = canonical("s-7", draft("b", 0.0));
        assert_eq!(store.merge_remote(s.clone()), MergeOutcome::Appended);
        assert_eq!(store.merge_remote(s), MergeOutcome::Duplicate);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_merge_remote_wrong_page() {
        let mut store = OptimisticStore::new(page());
        let mut d = draft("b", 0.0);
        d.page_id = PageId::from("page_02");
        assert_eq!(store.merge_remote(canonical("s-1", d)), MergeOutcome::WrongPage);
        assert!(store.is_empty());
    }

    #[test]
    fn test_echo_after_confirm_suppressed() {
        let mut store = OptimisticStore::new(page());
        let d = draft("a", 0.0);
        let temp = TempId::new();
        store.insert_pending(temp, d.clone()).unwrap();
        store.confirm(temp, canonical("s-5", d.clone()));

        assert_eq!(store.merge_remote(canonical("s-5", d)), MergeOutcome::Duplicate);
        assert_eq!(ids(&store), vec!["s-5"]);
    }

    #[test]
    fn test_echo_before_confirm_promotes_pending() {
        let mut store = OptimisticStore::new(page());
        let d = draft("a", 0.0);
        let temp = TempId::new();
        store.insert_pending(temp, d.clone()).unwrap();

        // Backend restamps created_at; the echo must still match.
        let mut echoed = d.clone();
        echoed.created_at = d.created_at + chrono::Duration::milliseconds(250);
        assert_eq!(
            store.merge_remote(canonical("s-5", echoed.clone())),
            MergeOutcome::Promoted(temp)
        );
        assert_eq!(ids(&store), vec!["s-5"]);

        // Write response lands later: nothing left to confirm.
        assert_eq!(
            store.confirm(temp, canonical("s-5", echoed)),
            ConfirmOutcome::NotPending
        );
        assert_eq!(ids(&store), vec!["s-5"]);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_echo_then_lost_response_keeps_stroke() {
        let mut store = OptimisticStore::new(page());
        let d = draft("a", 0.0);
        let temp = TempId::new();
        store.insert_pending(temp, d.clone()).unwrap();
        store.merge_remote(canonical("s-9", d));

        // Response never arrived; caller rolls back. The persisted stroke stays.
        assert_eq!(store.rollback(temp), RollbackOutcome::NotPending);
        assert!(store.contains_canonical(&CanonicalId::from("s-9")));
    }

    #[test]
    fn test_confirm_when_feed_delivered_unmatched_copy() {
        // Feed delivered the row before the response but content differs
        // (e.g. backend normalised it), so it was appended separately.
        let mut store = OptimisticStore::new(page());
        let d = draft("a", 0.0);
        let temp = TempId::new();
        store.insert_pending(temp, d.clone()).unwrap();

        let mut normalised = d.clone();
        normalised.width = 4.0;
        assert_eq!(
            store.merge_remote(canonical("s-3", normalised.clone())),
            MergeOutcome::Appended
        );
        assert_eq!(
            store.confirm(temp, canonical("s-3", normalised)),
            ConfirmOutcome::Deduplicated
        );
        assert_eq!(ids(&store), vec!["s-3"]);
    }

    #[test]
    fn test_other_session_same_content_not_promoted() {
        let mut store = OptimisticStore::new(page());
        let mine = draft("a", 0.0);
        let temp = TempId::new();
        store.insert_pending(temp, mine.clone()).unwrap();

        let mut theirs = mine.clone();
        theirs.session_id = SessionId::from("b");
        assert_eq!(
            store.merge_remote(canonical("s-7", theirs)),
            MergeOutcome::Appended
        );
        assert!(store.is_pending(temp));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_remote_stroke_while_pending_unrelated() {
        let mut store = OptimisticStore::new(page());
        let temp = TempId::new();
        store.insert_pending(temp, draft("a", 0.0)).unwrap();
        store.merge_remote(canonical("s-7", draft("b", 50.0)));

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.confirm(temp, canonical("s-8", draft("a", 0.0))),
            ConfirmOutcome::Replaced
        );
        assert_eq!(ids(&store), vec!["s-8", "s-7"]);
    }

    #[test]
    fn test_seed_deduplicates() {
        let mut store = OptimisticStore::new(page());
        let rows = vec![
            canonical("s-1", draft("a", 0.0)),
            canonical("s-2", draft("b", 1.0)),
            canonical("s-1", draft("a", 0.0)),
        ];
        assert_eq!(store.seed(rows), 2);
        assert_eq!(ids(&store), vec!["s-1", "s-2"]);
    }
}
