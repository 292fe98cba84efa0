//! Page session: one active page, one task owning its optimistic store.
//!
//! ```text
//!  PageSession (handle)                       session task
//!  ───────────────────                        ────────────
//!  pointer_down/move/up ──► Command::Submit ──► insert_pending ─► spawn write
//!                                                                    │
//!                        Command::WriteResolved ◄────────────────────┘
//!                                                 confirm / rollback
//!  live feed ───────────────────────────────────► merge_remote
//!                                                       │
//!  watch() / snapshot() ◄──── render list ◄─────────────┘
//!  take_event_rx()      ◄──── SessionEvent
//! ```
//!
//! The task handles one command or feed stroke at a time, so store mutations
//! never interleave. Pointer capture stays on the caller's side and never
//! waits on the network.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use inkwall_core::{
    finish_stroke, CanonicalId, CanonicalStroke, ConfirmOutcome, DraftError, MergeOutcome,
    OptimisticStore, PageId, PageMeta, Point, PointReducer, RollbackOutcome, SessionId, Stroke,
    StrokeCapture, StrokeDraft, StrokeDraftBuilder, TempId, ToolSettings,
};

use crate::config::ClientConfig;
use crate::feed::{FeedError, FeedSubscription, StrokeFeed, WsStrokeFeed};
use crate::pages::{HttpPageSource, PageFetchError, PageSource};
use crate::writer::{HttpStrokeWriter, Rejection, SaveNotice, StrokeWriter};

/// Capacity of the event channel handed out by `take_event_rx`.
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("failed to load page: {0}")]
    PageLoad(#[from] PageFetchError),
    #[error("failed to subscribe to live feed: {0}")]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Draft(#[from] DraftError),
    #[error("collaborator setup failed: {0}")]
    Setup(String),
    #[error("page session is closed")]
    Closed,
}

/// What happened to the page, for UI feedback.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// One of our strokes is committed, by write response or by its echo
    Confirmed { temp_id: TempId, id: CanonicalId },
    /// One of our strokes was refused and rolled back
    Rejected {
        temp_id: TempId,
        rejection: Rejection,
        notice: SaveNotice,
    },
    /// A new stroke from another session
    RemoteStroke(CanonicalId),
    /// Feed delivered a stroke that is already shown
    EchoSuppressed(CanonicalId),
    /// The live feed ended; no further remote strokes will arrive
    FeedClosed,
}

/// The backend-facing collaborators a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub writer: Arc<dyn StrokeWriter>,
    pub pages: Arc<dyn PageSource>,
    pub feed: Arc<dyn StrokeFeed>,
}

impl Collaborators {
    pub fn new(
        writer: Arc<dyn StrokeWriter>,
        pages: Arc<dyn PageSource>,
        feed: Arc<dyn StrokeFeed>,
    ) -> Self {
        Self {
            writer,
            pages,
            feed,
        }
    }

    /// HTTP writer and page source plus the WebSocket feed.
    pub fn remote(config: &ClientConfig) -> Result<Self, SessionError> {
        let writer =
            HttpStrokeWriter::new(config.clone()).map_err(|e| SessionError::Setup(e.to_string()))?;
        let pages =
            HttpPageSource::new(config.clone()).map_err(|e| SessionError::Setup(e.to_string()))?;
        Ok(Self::new(
            Arc::new(writer),
            Arc::new(pages),
            Arc::new(WsStrokeFeed::new(config)),
        ))
    }
}

enum Command {
    Submit {
        temp_id: TempId,
        draft: StrokeDraft,
    },
    WriteResolved {
        temp_id: TempId,
        result: Result<CanonicalStroke, Rejection>,
    },
    Shutdown,
}

/// Handle to an active page.
pub struct PageSession {
    meta: PageMeta,
    settings: ToolSettings,
    capture: StrokeCapture,
    reducer: PointReducer,
    builder: StrokeDraftBuilder,
    commands: mpsc::UnboundedSender<Command>,
    render_rx: watch::Receiver<Vec<Stroke>>,
    event_rx: Option<mpsc::Receiver<SessionEvent>>,
    task: Option<JoinHandle<()>>,
}

impl PageSession {
    /// Subscribe, load the page, and start the session task.
    ///
    /// The feed is subscribed before the initial load so nothing accepted in
    /// between is lost; strokes seen by both paths are merged once.
    pub async fn activate(
        page_id: PageId,
        settings: ToolSettings,
        session_id: SessionId,
        collaborators: Collaborators,
    ) -> Result<Self, SessionError> {
        let feed = collaborators.feed.subscribe(&page_id).await?;
        let meta = collaborators.pages.fetch_meta(&page_id).await?;
        let initial = collaborators.pages.fetch_strokes(&page_id).await?;

        let mut store = OptimisticStore::new(page_id.clone());
        let seeded = store.seed(initial);
        log::info!(
            "Activated page {page_id} ({}x{}) with {seeded} strokes",
            meta.width,
            meta.height
        );

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (render_tx, render_rx) = watch::channel(store.snapshot());
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let task = SessionTask {
            store,
            writer: collaborators.writer,
            commands: commands.downgrade(),
            render_tx,
            event_tx,
        };
        let task = tokio::spawn(task.run(command_rx, feed));

        Ok(Self {
            meta,
            settings,
            capture: StrokeCapture::new(),
            reducer: PointReducer::default(),
            builder: StrokeDraftBuilder::new(page_id, session_id),
            commands,
            render_rx,
            event_rx: Some(event_rx),
            task: Some(task),
        })
    }

    pub fn page_id(&self) -> &PageId {
        self.builder.page_id()
    }

    pub fn session_id(&self) -> &SessionId {
        self.builder.session_id()
    }

    pub fn meta(&self) -> &PageMeta {
        &self.meta
    }

    pub fn tool(&self) -> &ToolSettings {
        &self.settings
    }

    pub fn set_tool(&mut self, settings: ToolSettings) {
        self.settings = settings;
    }

    /// Replace the default point reducer.
    pub fn set_reducer(&mut self, reducer: PointReducer) {
        self.reducer = reducer;
    }

    pub fn pointer_down(&mut self, at: Point) {
        self.capture.pointer_down(at);
    }

    pub fn pointer_move(&mut self, at: Point) {
        self.capture.pointer_move(at);
    }

    /// Finish the gesture and hand it to the session task.
    ///
    /// Returns `Ok(None)` when no gesture was in progress. A gesture with
    /// fewer than two points fails here and is never sent.
    pub fn pointer_up(&mut self) -> Result<Option<TempId>, SessionError> {
        let Some(raw) = self.capture.pointer_up() else {
            return Ok(None);
        };
        let (temp_id, draft) = finish_stroke(raw, &self.reducer, &self.builder, &self.settings)?;
        self.commands
            .send(Command::Submit { temp_id, draft })
            .map_err(|_| SessionError::Closed)?;
        Ok(Some(temp_id))
    }

    /// A whole gesture at once.
    pub fn draw(
        &mut self,
        points: impl IntoIterator<Item = Point>,
    ) -> Result<Option<TempId>, SessionError> {
        let mut points = points.into_iter();
        if let Some(first) = points.next() {
            self.pointer_down(first);
            for p in points {
                self.pointer_move(p);
            }
        }
        self.pointer_up()
    }

    /// In-progress gesture, for the live preview.
    pub fn preview(&self) -> &[Point] {
        self.capture.preview()
    }

    /// Current render list in draw order.
    pub fn snapshot(&self) -> Vec<Stroke> {
        self.render_rx.borrow().clone()
    }

    /// Receiver that changes whenever the render list does.
    pub fn watch(&self) -> watch::Receiver<Vec<Stroke>> {
        self.render_rx.clone()
    }

    /// Take the event receiver. Can only be called once.
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.event_rx.take()
    }

    /// Release the feed subscription and stop the session task.
    ///
    /// Writes still in flight complete on the backend; their results are
    /// discarded.
    pub async fn deactivate(mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        log::info!("Deactivated page {}", self.page_id());
    }
}

struct SessionTask {
    store: OptimisticStore,
    writer: Arc<dyn StrokeWriter>,
    /// Weak so an abandoned handle lets the task finish once writes settle.
    commands: mpsc::WeakUnboundedSender<Command>,
    render_tx: watch::Sender<Vec<Stroke>>,
    event_tx: mpsc::Sender<SessionEvent>,
}

impl SessionTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>, mut feed: FeedSubscription) {
        let mut feed_open = true;

        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(Command::Submit { temp_id, draft }) => self.submit(temp_id, draft),
                    Some(Command::WriteResolved { temp_id, result }) => self.resolve(temp_id, result),
                    Some(Command::Shutdown) | None => break,
                },

                stroke = feed.recv(), if feed_open => match stroke {
                    Some(stroke) => self.merge(stroke),
                    None => {
                        feed_open = false;
                        log::warn!("Live feed closed for page {}", self.store.page_id());
                        self.emit(SessionEvent::FeedClosed);
                    }
                },
            }
        }

        feed.unsubscribe().await;
        log::debug!("Session task for page {} stopped", self.store.page_id());
    }

    fn submit(&mut self, temp_id: TempId, draft: StrokeDraft) {
        if let Err(e) = self.store.insert_pending(temp_id, draft.clone()) {
            log::error!("Refusing stroke {temp_id}: {e}");
            return;
        }
        self.publish();

        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let writer = self.writer.clone();
        tokio::spawn(async move {
            let result = writer.submit(draft).await;
            // Session may be gone; the backend outcome stands regardless.
            let _ = commands.send(Command::WriteResolved { temp_id, result });
        });
    }

    fn resolve(&mut self, temp_id: TempId, result: Result<CanonicalStroke, Rejection>) {
        match result {
            Ok(canonical) => {
                let id = canonical.id.clone();
                match self.store.confirm(temp_id, canonical) {
                    ConfirmOutcome::Replaced | ConfirmOutcome::Deduplicated => {
                        self.publish();
                        self.emit(SessionEvent::Confirmed { temp_id, id });
                    }
                    // Its echo already promoted the entry.
                    ConfirmOutcome::NotPending => {}
                }
            }
            Err(rejection) => match self.store.rollback(temp_id) {
                RollbackOutcome::Removed => {
                    log::warn!("Stroke {temp_id} rolled back: {rejection}");
                    self.publish();
                    let notice = rejection.notice();
                    self.emit(SessionEvent::Rejected {
                        temp_id,
                        rejection,
                        notice,
                    });
                }
                // Its echo already committed it.
                RollbackOutcome::NotPending => {
                    log::debug!("Ignoring late failure for committed stroke {temp_id}: {rejection}");
                }
            },
        }
    }

    fn merge(&mut self, stroke: CanonicalStroke) {
        let id = stroke.id.clone();
        match self.store.merge_remote(stroke) {
            MergeOutcome::Appended => {
                self.publish();
                self.emit(SessionEvent::RemoteStroke(id));
            }
            MergeOutcome::Promoted(temp_id) => {
                self.publish();
                self.emit(SessionEvent::Confirmed { temp_id, id });
            }
            MergeOutcome::Duplicate => self.emit(SessionEvent::EchoSuppressed(id)),
            MergeOutcome::WrongPage => {}
        }
    }

    fn publish(&self) {
        self.render_tx.send_replace(self.store.snapshot());
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.event_tx.try_send(event) {
            log::warn!("Session event buffer full, dropping {event:?}");
        }
    }
}
