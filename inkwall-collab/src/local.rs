//! In-process backend: the client collaborator traits served straight from a
//! [`StrokeLedger`], with no HTTP or WebSocket hop.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use inkwall_core::{CanonicalStroke, PageId, PageMeta, StrokeDraft};

use crate::broadcast::RoomManager;
use crate::feed::{inserted_stroke, FeedError, FeedSubscription, StrokeFeed, FEED_BUFFER};
use crate::ledger::{LedgerConfig, LedgerError, StrokeLedger};
use crate::pages::{PageFetchError, PageSource};
use crate::protocol::{FeedMessage, MessageKind};
use crate::session::Collaborators;
use crate::storage::MemoryStorage;
use crate::writer::{Rejection, StrokeWriter};

/// Map a ledger refusal to what a remote writer would have seen.
pub fn rejection_for(err: LedgerError) -> Rejection {
    match err {
        LedgerError::RateLimited { .. } => Rejection::RateLimited(err.to_string()),
        LedgerError::UnknownPage(_) | LedgerError::Malformed(_) => {
            Rejection::Malformed(err.to_string())
        }
        LedgerError::Storage(_) => Rejection::ServerUnavailable(err.to_string()),
    }
}

#[derive(Clone)]
pub struct LocalBackend {
    ledger: Arc<StrokeLedger>,
}

impl LocalBackend {
    pub fn new(ledger: Arc<StrokeLedger>) -> Self {
        Self { ledger }
    }

    /// Ledger over fresh memory storage.
    pub fn in_memory(config: LedgerConfig) -> Result<Self, LedgerError> {
        let ledger = StrokeLedger::open(
            config,
            Arc::new(MemoryStorage::new()),
            Arc::new(RoomManager::new(256)),
        )?;
        Ok(Self::new(Arc::new(ledger)))
    }

    pub fn ledger(&self) -> &Arc<StrokeLedger> {
        &self.ledger
    }

    pub fn collaborators(&self) -> Collaborators {
        let this = Arc::new(self.clone());
        Collaborators::new(this.clone(), this.clone(), this)
    }

    async fn open_feed(&self, page_id: PageId) -> Result<FeedSubscription, FeedError> {
        let rooms = self.ledger.rooms().clone();
        let conn_id = Uuid::new_v4();
        let (room, mut room_rx) = rooms.subscribe(&page_id, conn_id).await;

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task_page = page_id.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,

                    msg = room_rx.recv() => match msg {
                        Ok(bytes) => {
                            let msg = match FeedMessage::decode(&bytes) {
                                Ok(msg) => msg,
                                Err(e) => {
                                    log::warn!("Dropping undecodable room message: {e}");
                                    continue;
                                }
                            };
                            if msg.kind != MessageKind::StrokeInserted {
                                continue;
                            }
                            let Some(stroke) = inserted_stroke(&msg, &task_page) else {
                                continue;
                            };
                            if tx.send(stroke).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!(
                                "Local subscriber on {task_page} lagged, {skipped} strokes skipped, closing feed"
                            );
                            room.record_lag(skipped);
                            break;
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }

            room.remove_subscriber(&conn_id).await;
            rooms.remove_if_empty(&task_page).await;
        });

        Ok(FeedSubscription::new(page_id, rx, stop_tx, task))
    }
}

impl StrokeWriter for LocalBackend {
    fn submit(&self, draft: StrokeDraft) -> BoxFuture<'_, Result<CanonicalStroke, Rejection>> {
        async move { self.ledger.insert(draft).await.map_err(rejection_for) }.boxed()
    }
}

impl PageSource for LocalBackend {
    fn fetch_meta(&self, page_id: &PageId) -> BoxFuture<'_, Result<PageMeta, PageFetchError>> {
        let result = match self.ledger.page(page_id) {
            Ok(Some(meta)) => Ok(meta),
            Ok(None) => Err(PageFetchError::NotFound(page_id.clone())),
            Err(e) => Err(PageFetchError::Transport(e.to_string())),
        };
        async move { result }.boxed()
    }

    fn fetch_strokes(
        &self,
        page_id: &PageId,
    ) -> BoxFuture<'_, Result<Vec<CanonicalStroke>, PageFetchError>> {
        let result = self.ledger.strokes(page_id).map_err(|e| match e {
            LedgerError::UnknownPage(id) => PageFetchError::NotFound(id),
            other => PageFetchError::Transport(other.to_string()),
        });
        async move { result }.boxed()
    }
}

impl StrokeFeed for LocalBackend {
    fn subscribe(&self, page_id: &PageId) -> BoxFuture<'_, Result<FeedSubscription, FeedError>> {
        self.open_feed(page_id.clone()).boxed()
    }
}
