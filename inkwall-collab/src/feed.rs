//! Live feed subscription.
//!
//! A subscription is page-scoped and lives until it is dropped or explicitly
//! unsubscribed. Its background task decodes insert events and forwards the
//! canonical rows; anything it cannot use is logged and skipped, and only a
//! closed connection ends the stream.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

use inkwall_core::{CanonicalStroke, PageId};

use crate::config::ClientConfig;
use crate::protocol::{FeedMessage, MessageKind, ProtocolError};

/// Buffered rows per subscription before the reader waits on the consumer.
pub const FEED_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("could not connect to feed: {0}")]
    Connect(String),
    #[error("feed handshake failed: {0}")]
    Handshake(String),
    #[error("feed did not confirm the subscription in time")]
    Timeout,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Handle to one page's stream of canonical strokes.
pub struct FeedSubscription {
    page_id: PageId,
    rx: mpsc::Receiver<CanonicalStroke>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FeedSubscription {
    /// Wrap a running forwarder task. The task must stop when `stop` fires
    /// or its sender is dropped.
    pub fn new(
        page_id: PageId,
        rx: mpsc::Receiver<CanonicalStroke>,
        stop: oneshot::Sender<()>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            page_id,
            rx,
            stop: Some(stop),
            task: Some(task),
        }
    }

    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    /// Next canonical stroke, or `None` once the feed has closed.
    pub async fn recv(&mut self) -> Option<CanonicalStroke> {
        self.rx.recv().await
    }

    /// Release the subscription and wait for the forwarder to finish.
    pub async fn unsubscribe(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        log::debug!("Unsubscribed from page {}", self.page_id);
    }
}

pub trait StrokeFeed: Send + Sync {
    /// Resolves once the subscription is live, so no insert accepted after
    /// this returns can be missed.
    fn subscribe(&self, page_id: &PageId) -> BoxFuture<'_, Result<FeedSubscription, FeedError>>;
}

/// WebSocket client for the feed server.
#[derive(Debug, Clone)]
pub struct WsStrokeFeed {
    url: String,
    handshake_timeout: Duration,
}

impl WsStrokeFeed {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            url: config.feed_url.clone(),
            handshake_timeout: config.request_timeout,
        }
    }

    async fn connect(&self, page_id: PageId) -> Result<FeedSubscription, FeedError> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let subscribe = FeedMessage::subscribe(page_id.clone()).encode()?;
        ws_sender
            .send(Message::Binary(subscribe.into()))
            .await
            .map_err(|e| FeedError::Handshake(e.to_string()))?;

        match tokio::time::timeout(
            self.handshake_timeout,
            await_ack(&mut ws_receiver, &page_id),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => return Err(FeedError::Timeout),
        }
        log::info!("Subscribed to live feed for page {page_id}");

        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task_page = page_id.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        if let Ok(bytes) = FeedMessage::unsubscribe(task_page.clone()).encode() {
                            let _ = ws_sender.send(Message::Binary(bytes.into())).await;
                        }
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }

                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let msg = match FeedMessage::decode(&data) {
                                    Ok(msg) => msg,
                                    Err(e) => {
                                        log::warn!("Dropping undecodable feed frame: {e}");
                                        continue;
                                    }
                                };
                                match msg.kind {
                                    MessageKind::StrokeInserted => {
                                        let Some(stroke) = inserted_stroke(&msg, &task_page) else {
                                            continue;
                                        };
                                        if tx.send(stroke).await.is_err() {
                                            break;
                                        }
                                    }
                                    MessageKind::Ping => {
                                        if let Ok(bytes) = FeedMessage::pong().encode() {
                                            if ws_sender.send(Message::Binary(bytes.into())).await.is_err() {
                                                break;
                                            }
                                        }
                                    }
                                    other => log::debug!("Unhandled feed message {other:?}"),
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if ws_sender.send(Message::Pong(data)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                log::info!("Live feed closed for page {task_page}");
                                break;
                            }
                            Some(Err(e)) => {
                                log::error!("Live feed error for page {task_page}: {e}");
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
        });

        Ok(FeedSubscription::new(page_id, rx, stop_tx, task))
    }
}

/// The row carried by a `StrokeInserted` event, if it is usable on `page_id`.
pub(crate) fn inserted_stroke(msg: &FeedMessage, page_id: &PageId) -> Option<CanonicalStroke> {
    let stroke = match msg.stroke() {
        Ok(stroke) => stroke,
        Err(e) => {
            log::warn!("Dropping malformed feed event seq {}: {e}", msg.seq);
            return None;
        }
    };
    if stroke.page_id() != page_id {
        log::warn!(
            "Dropping feed event {} for page {} on page {page_id} subscription",
            stroke.id,
            stroke.page_id()
        );
        return None;
    }
    Some(stroke)
}

async fn await_ack<S>(ws_receiver: &mut S, page_id: &PageId) -> Result<(), FeedError>
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let msg = FeedMessage::decode(&data)?;
                if msg.kind == MessageKind::Subscribed && &msg.page_id == page_id {
                    return Ok(());
                }
                log::debug!("Ignoring {:?} before subscription ack", msg.kind);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => return Err(FeedError::Handshake(e.to_string())),
        }
    }
    Err(FeedError::Protocol(ProtocolError::ConnectionClosed))
}

impl StrokeFeed for WsStrokeFeed {
    fn subscribe(&self, page_id: &PageId) -> BoxFuture<'_, Result<FeedSubscription, FeedError>> {
        self.connect(page_id.clone()).boxed()
    }
}
