//! WebSocket live-feed server with per-page rooms.
//!
//! Architecture:
//! ```text
//! StrokeLedger ── publish ──► PageRoom (page_01) ──┬──► Client A
//!                                                  └──► Client B
//!                             PageRoom (page_02) ─────► Client C
//! ```
//!
//! A connection joins one page with `Subscribe`, gets `Subscribed` back, and
//! from then on receives every `StrokeInserted` event of that page, encoded
//! once by the ledger and shared by all subscribers. Clients only ever send
//! `Subscribe`, `Unsubscribe` and `Ping`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use crate::broadcast::{PageRoom, RoomManager};
use crate::protocol::{FeedMessage, MessageKind};

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct FeedServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub active_rooms: usize,
}

type ConnResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// The feed server, bound and ready to accept.
pub struct FeedServer {
    listener: TcpListener,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<FeedServerStats>>,
}

impl FeedServer {
    pub async fn bind(addr: &str, rooms: Arc<RoomManager>) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            rooms,
            stats: Arc::new(RwLock::new(FeedServerStats::default())),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared handle to the statistics, usable after `run` takes the server.
    pub fn stats_handle(&self) -> Arc<RwLock<FeedServerStats>> {
        self.stats.clone()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> io::Result<()> {
        log::info!("Feed server listening on {}", self.local_addr()?);

        loop {
            let (stream, addr) = self.listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, rooms, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }
}

struct Membership {
    room: Arc<PageRoom>,
    rx: broadcast::Receiver<Arc<Vec<u8>>>,
}

async fn leave(rooms: &RoomManager, conn_id: &Uuid, membership: Membership) {
    let page_id = membership.room.page_id().clone();
    membership.room.remove_subscriber(conn_id).await;
    drop(membership);
    if rooms.remove_if_empty(&page_id).await {
        log::info!("Room {page_id} removed (empty)");
    }
}

type WsStream = WebSocketStream<TcpStream>;

struct Connection {
    conn_id: Uuid,
    addr: SocketAddr,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<FeedServerStats>>,
    sender: SplitSink<WsStream, Message>,
    receiver: SplitStream<WsStream>,
    membership: Option<Membership>,
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Arc<RoomManager>,
    stats: Arc<RwLock<FeedServerStats>>,
) -> ConnResult {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (sender, receiver) = ws_stream.split();
    let conn_id = Uuid::new_v4();

    log::info!("WebSocket connection {conn_id} established from {addr}");
    {
        let mut s = stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let mut conn = Connection {
        conn_id,
        addr,
        rooms,
        stats,
        sender,
        receiver,
        membership: None,
    };
    let result = conn.run().await;
    conn.close().await;
    result
}

impl Connection {
    async fn run(&mut self) -> ConnResult {
        let addr = self.addr;
        let conn_id = self.conn_id;

        loop {
            tokio::select! {
                msg = self.receiver.next() => {
                    match msg {
                        Some(Ok(Message::Binary(data))) => {
                            self.stats.write().await.total_messages += 1;
                            match FeedMessage::decode(&data) {
                                Ok(msg) => self.handle_message(msg).await?,
                                Err(e) => log::warn!("Failed to decode message from {addr}: {e}"),
                            }
                        }

                        Some(Ok(Message::Ping(data))) => {
                            self.sender.send(Message::Pong(data)).await?;
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection closed from {addr}");
                            break;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {addr}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                event = next_event(&mut self.membership) => {
                    match event {
                        Ok(data) => {
                            self.sender.send(Message::Binary(data.to_vec().into())).await?;
                        }
                        Err(RecvError::Lagged(n)) => {
                            // The client missed strokes and has to refetch.
                            log::warn!("Connection {conn_id} lagged by {n} events, closing");
                            if let Some(m) = &self.membership {
                                m.room.record_lag(n);
                            }
                            let _ = self.sender.send(Message::Close(None)).await;
                            break;
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, msg: FeedMessage) -> ConnResult {
        match msg.kind {
            MessageKind::Subscribe => {
                if let Some(old) = self.membership.take() {
                    leave(&self.rooms, &self.conn_id, old).await;
                }
                let (room, rx) = self.rooms.subscribe(&msg.page_id, self.conn_id).await;
                self.membership = Some(Membership { room, rx });

                let ack = FeedMessage::subscribed(msg.page_id.clone()).encode()?;
                self.sender.send(Message::Binary(ack.into())).await?;
                self.stats.write().await.active_rooms = self.rooms.room_count().await;
                log::info!("Connection {} subscribed to page {}", self.conn_id, msg.page_id);
            }
            MessageKind::Unsubscribe => {
                if let Some(old) = self.membership.take() {
                    log::info!("Connection {} left page {}", self.conn_id, old.room.page_id());
                    leave(&self.rooms, &self.conn_id, old).await;
                }
            }
            MessageKind::Ping => {
                let pong = FeedMessage::pong().encode()?;
                self.sender.send(Message::Binary(pong.into())).await?;
            }
            MessageKind::Pong => {}
            other => log::debug!("Ignoring client-sent {other:?} from {}", self.addr),
        }
        Ok(())
    }

    async fn close(mut self) {
        if let Some(old) = self.membership.take() {
            leave(&self.rooms, &self.conn_id, old).await;
        }
        let active_rooms = self.rooms.room_count().await;
        let mut s = self.stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
        s.active_rooms = active_rooms;
    }
}

/// Next room event, or never if the connection has not subscribed yet.
async fn next_event(membership: &mut Option<Membership>) -> Result<Arc<Vec<u8>>, RecvError> {
    match membership {
        Some(m) => m.rx.recv().await,
        None => std::future::pending().await,
    }
}
