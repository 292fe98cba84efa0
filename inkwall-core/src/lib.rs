//! # inkwall-core — Stroke model and optimistic store for Inkwall
//!
//! Everything here is synchronous and network-free. The collaboration layer
//! (`inkwall-collab`) drives these types from its page session actor.
//!
//! ## Pipeline
//!
//! ```text
//! pointer events ─► StrokeCapture ─► PointReducer ─► StrokeDraftBuilder
//!                                                          │ (TempId, StrokeDraft)
//!                                                          ▼
//!                     write response / live feed ─► OptimisticStore ─► draw list
//! ```
//!
//! ## Modules
//!
//! - [`model`] — Points, tools, ids, draft and canonical stroke rows
//! - [`reducer`] — Stride-based point reduction
//! - [`draft`] — Gesture capture and draft assembly
//! - [`identity`] — Persistent per-profile session id
//! - [`store`] — Ordered pending/committed strokes with echo suppression

pub mod draft;
pub mod identity;
pub mod model;
pub mod reducer;
pub mod store;

pub use draft::{
    finish_stroke, DraftError, StrokeCapture, StrokeDraftBuilder, ToolSettings, DEFAULT_COLOR,
    DEFAULT_WIDTH, MIN_POINTS,
};
pub use identity::{
    FileIdentityStorage, IdentityStorage, MemoryIdentityStorage, SessionIdentityProvider, APP_DIR,
    SESSION_FILE,
};
pub use model::{
    flatten_points, CanonicalId, CanonicalStroke, CompositeOp, ContentFingerprint, PageId,
    PageMeta, Point, RawPath, SessionId, Stroke, StrokeDraft, StrokeId, TempId, Tool,
};
pub use reducer::{reduce, PointReducer, DEFAULT_STRIDE, DEFAULT_THRESHOLD};
pub use store::{ConfirmOutcome, MergeOutcome, OptimisticStore, RollbackOutcome, StoreError};
