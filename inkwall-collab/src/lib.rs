//! # inkwall-collab — Stroke sync over the network for Inkwall
//!
//! Client side: the page session and the collaborators it talks to. Server
//! side: a reference backend that assigns canonical ids, rate-limits sessions
//! and fans new strokes out to every subscriber of a page.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  POST /insert-stroke  ┌──────────────┐
//! │ PageSession  │ ────────────────────► │ ApiServer    │
//! │ (per page)   │  GET /pages/{id}/…    │ (axum)       │
//! └──────┬───────┘                       └──────┬───────┘
//!        │                                      ▼
//!        │                               ┌──────────────┐    ┌─────────────┐
//!        │                               │ StrokeLedger │ ─► │ StrokeStorage│
//!        │                               └──────┬───────┘    └─────────────┘
//!        │         WebSocket (bincode)          ▼
//!        └◄──────────────────────────── PageRoom ◄── FeedServer
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — Binary feed envelope (bincode-encoded FeedMessage)
//! - [`config`] — Client and server settings from the environment
//! - [`writer`] — Authoritative write client and rejection mapping
//! - [`pages`] — Page metadata and initial stroke loading
//! - [`feed`] — Live feed subscription client
//! - [`session`] — Page session task owning the optimistic store
//! - [`ledger`] — Canonical id assignment, validation and cooldown
//! - [`storage`] — Stroke persistence (memory, RocksDB)
//! - [`broadcast`] — Per-page fan-out rooms
//! - [`endpoint`] — HTTP write and read endpoint
//! - [`server`] — WebSocket feed server
//! - [`backend`] — Reference backend wiring
//! - [`local`] — In-process backend for embedding and tests

pub mod backend;
pub mod broadcast;
pub mod config;
pub mod endpoint;
pub mod feed;
pub mod ledger;
pub mod local;
pub mod pages;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
pub mod writer;

// Re-exports for convenience
pub use backend::{Backend, BackendError};
pub use broadcast::{PageRoom, RoomManager, RoomStats};
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use endpoint::{ApiServer, ApiState};
pub use feed::{FeedError, FeedSubscription, StrokeFeed, WsStrokeFeed};
pub use ledger::{LedgerConfig, LedgerError, StrokeLedger};
pub use local::LocalBackend;
pub use pages::{HttpPageSource, PageFetchError, PageSource};
pub use protocol::{FeedMessage, MessageKind, ProtocolError};
pub use server::{FeedServer, FeedServerStats};
pub use session::{Collaborators, PageSession, SessionError, SessionEvent};
pub use storage::{MemoryStorage, StorageError, StrokeStorage};
#[cfg(feature = "rocksdb")]
pub use storage::{RocksStorage, StorageConfig};
pub use writer::{HttpStrokeWriter, Rejection, SaveNotice, StrokeWriter};
