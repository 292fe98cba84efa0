//! The stroke ledger: sole writer of canonical stroke records.
//!
//! Acceptance pipeline for one draft:
//!
//! ```text
//! validate ─► lock ─► cooldown check ─► assign s-<n> + created_at
//!                                            │
//!                               persist ◄────┘
//!                                  │
//!                               publish to page room ─► unlock
//! ```
//!
//! Everything after the lock runs under one `tokio::sync::Mutex`, so the
//! sequence, persisted order and feed order all agree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use inkwall_core::{CanonicalId, CanonicalStroke, PageId, PageMeta, SessionId, StrokeDraft, MIN_POINTS};

use crate::broadcast::RoomManager;
use crate::protocol::FeedMessage;
use crate::storage::{StorageError, StrokeStorage};

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Minimum interval between accepted writes from one session
    pub cooldown: Duration,
    pub max_points: usize,
    pub max_width: f64,
    pub max_color_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            max_points: 10_000,
            max_width: 200.0,
            max_color_len: 32,
        }
    }
}

impl LedgerConfig {
    /// No cooldown, so tests can write back to back.
    pub fn for_testing() -> Self {
        Self {
            cooldown: Duration::ZERO,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("unknown page {0}")]
    UnknownPage(PageId),
    #[error("malformed stroke: {0}")]
    Malformed(String),
    #[error("session is writing too fast, retry in {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl LedgerError {
    /// Machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::UnknownPage(_) => "unknown_page",
            LedgerError::Malformed(_) => "malformed",
            LedgerError::RateLimited { .. } => "rate_limited",
            LedgerError::Storage(_) => "storage_error",
        }
    }
}

struct LedgerState {
    last_accepted: HashMap<SessionId, Instant>,
    last_seq: u64,
    last_stamp: Option<DateTime<Utc>>,
}

pub struct StrokeLedger {
    config: LedgerConfig,
    storage: Arc<dyn StrokeStorage>,
    rooms: Arc<RoomManager>,
    state: Mutex<LedgerState>,
}

impl StrokeLedger {
    /// Open a ledger over existing storage, resuming its id sequence.
    pub fn open(
        config: LedgerConfig,
        storage: Arc<dyn StrokeStorage>,
        rooms: Arc<RoomManager>,
    ) -> Result<Self, LedgerError> {
        let last_seq = storage.last_sequence()?;
        let pages = storage.list_pages()?;
        if last_seq > 0 || !pages.is_empty() {
            log::info!(
                "Recovered {} pages, resuming stroke ids after s-{last_seq}",
                pages.len()
            );
        }

        Ok(Self {
            config,
            storage,
            rooms,
            state: Mutex::new(LedgerState {
                last_accepted: HashMap::new(),
                last_seq,
                last_stamp: None,
            }),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn rooms(&self) -> &Arc<RoomManager> {
        &self.rooms
    }

    /// Sessions whose cooldown may still be running.
    pub async fn tracked_sessions(&self) -> usize {
        self.state.lock().await.last_accepted.len()
    }

    pub fn register_page(&self, meta: PageMeta) -> Result<(), LedgerError> {
        self.storage.put_page(&meta)?;
        log::info!("Registered page {} ({}x{})", meta.id, meta.width, meta.height);
        Ok(())
    }

    pub fn page(&self, id: &PageId) -> Result<Option<PageMeta>, LedgerError> {
        Ok(self.storage.get_page(id)?)
    }

    /// All strokes of a page in acceptance order.
    pub fn strokes(&self, id: &PageId) -> Result<Vec<CanonicalStroke>, LedgerError> {
        if self.storage.get_page(id)?.is_none() {
            return Err(LedgerError::UnknownPage(id.clone()));
        }
        Ok(self.storage.strokes_for_page(id)?)
    }

    /// Validate, rate-limit, persist and publish one draft.
    pub async fn insert(&self, draft: StrokeDraft) -> Result<CanonicalStroke, LedgerError> {
        self.validate(&draft)?;
        if self.storage.get_page(&draft.page_id)?.is_none() {
            return Err(LedgerError::UnknownPage(draft.page_id));
        }

        let mut state = self.state.lock().await;

        let now = Instant::now();
        if let Some(last) = state.last_accepted.get(&draft.session_id) {
            let elapsed = now.duration_since(*last);
            if elapsed < self.config.cooldown {
                let retry_after = self.config.cooldown - elapsed;
                log::debug!(
                    "Rate limited session {} ({} ms left)",
                    draft.session_id,
                    retry_after.as_millis()
                );
                return Err(LedgerError::RateLimited {
                    retry_after_ms: retry_after.as_millis() as u64,
                });
            }
        }

        let seq = state.last_seq + 1;
        let created_at = match state.last_stamp {
            Some(prev) => Utc::now().max(prev),
            None => Utc::now(),
        };
        let session_id = draft.session_id.clone();
        let stroke = CanonicalStroke::new(
            CanonicalId::new(format!("s-{seq}")),
            StrokeDraft { created_at, ..draft },
        );

        // State only advances once the row is durable.
        self.storage.append_stroke(seq, &stroke)?;
        state.last_seq = seq;
        state.last_stamp = Some(created_at);
        // Sessions past their cooldown need no entry.
        let cooldown = self.config.cooldown;
        state
            .last_accepted
            .retain(|_, last| now.duration_since(*last) < cooldown);
        state.last_accepted.insert(session_id, now);

        if let Some(room) = self.rooms.get(stroke.page_id()).await {
            match FeedMessage::stroke_inserted(seq, &stroke) {
                Ok(msg) => {
                    if let Err(e) = room.publish(&msg) {
                        log::error!("Failed to publish {}: {e}", stroke.id);
                    }
                }
                Err(e) => log::error!("Failed to encode {}: {e}", stroke.id),
            }
        }
        drop(state);

        log::debug!(
            "Accepted {} on page {} from session {}",
            stroke.id,
            stroke.page_id(),
            stroke.session_id()
        );
        Ok(stroke)
    }

    fn validate(&self, draft: &StrokeDraft) -> Result<(), LedgerError> {
        if draft.session_id.as_str().trim().is_empty() {
            return Err(LedgerError::Malformed("session_id is empty".into()));
        }
        if draft.points.len() < MIN_POINTS {
            return Err(LedgerError::Malformed(format!(
                "stroke needs at least {MIN_POINTS} points, got {}",
                draft.points.len()
            )));
        }
        if draft.points.len() > self.config.max_points {
            return Err(LedgerError::Malformed(format!(
                "stroke has {} points, limit is {}",
                draft.points.len(),
                self.config.max_points
            )));
        }
        if !draft.points.iter().all(|p| p.is_finite()) {
            return Err(LedgerError::Malformed("points must be finite".into()));
        }
        if !(draft.width > 0.0 && draft.width <= self.config.max_width) {
            return Err(LedgerError::Malformed(format!(
                "width must be in (0, {}], got {}",
                self.config.max_width, draft.width
            )));
        }
        let color_len = draft.color.chars().count();
        if color_len == 0 || color_len > self.config.max_color_len {
            return Err(LedgerError::Malformed(format!(
                "color must be 1..={} characters",
                self.config.max_color_len
            )));
        }
        Ok(())
    }
}
