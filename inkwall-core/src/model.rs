//! Stroke data model shared by the client engine and the backend.
//!
//! A stroke lives in two shapes:
//!
//! ```text
//! StrokeDraft ──(backend assigns id)──► CanonicalStroke
//!      │                                      │
//!      └── Stroke { id: Pending(TempId) } ────┴──► Stroke { id: Committed(CanonicalId) }
//! ```
//!
//! `StrokeDraft` and `CanonicalStroke` are wire types (JSON rows). `Stroke` is
//! the in-memory entry held by the optimistic store; its id is a tagged
//! variant so pending and committed entries can never be confused.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

// ───────────────────────────────────────────────────────────────────
// Points
// ───────────────────────────────────────────────────────────────────

/// A captured pointer position in page-local pixels.
///
/// Serialized as a two-element array `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// A point path in either of the two shapes found in stored rows.
///
/// Rows written by different clients carry `[[x,y],...]` or a flat
/// `[x,y,x,y,...]`. Both normalize to `Vec<Point>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPath {
    Pairs(Vec<[f64; 2]>),
    Flat(Vec<f64>),
}

impl RawPath {
    /// Number of whole points this path describes.
    pub fn point_count(&self) -> usize {
        match self {
            RawPath::Pairs(pairs) => pairs.len(),
            RawPath::Flat(coords) => coords.len() / 2,
        }
    }

    /// Normalize into points. A flat path of odd length drops its dangling
    /// coordinate.
    pub fn into_points(self) -> Vec<Point> {
        match self {
            RawPath::Pairs(pairs) => pairs.into_iter().map(Point::from).collect(),
            RawPath::Flat(coords) => {
                if coords.len() % 2 != 0 {
                    log::debug!(
                        "Flat point path has odd length {}, dropping trailing coordinate",
                        coords.len()
                    );
                }
                coords
                    .chunks_exact(2)
                    .map(|c| Point::new(c[0], c[1]))
                    .collect()
            }
        }
    }
}

impl From<Vec<Point>> for RawPath {
    fn from(points: Vec<Point>) -> Self {
        RawPath::Pairs(points.into_iter().map(<[f64; 2]>::from).collect())
    }
}

/// Flatten points into `[x0, y0, x1, y1, ...]` for line-drawing primitives.
pub fn flatten_points(points: &[Point]) -> Vec<f64> {
    points.iter().flat_map(|p| [p.x, p.y]).collect()
}

fn deserialize_points<'de, D>(deserializer: D) -> Result<Vec<Point>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(RawPath::deserialize(deserializer)?.into_points())
}

// ───────────────────────────────────────────────────────────────────
// Tools
// ───────────────────────────────────────────────────────────────────

/// Drawing tool. Only affects compositing at render time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    #[default]
    Pen,
    Eraser,
}

/// Canvas composite operation selected by a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeOp {
    SourceOver,
    DestinationOut,
}

impl CompositeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositeOp::SourceOver => "source-over",
            CompositeOp::DestinationOut => "destination-out",
        }
    }
}

impl Tool {
    pub fn composite_op(&self) -> CompositeOp {
        match self {
            Tool::Pen => CompositeOp::SourceOver,
            Tool::Eraser => CompositeOp::DestinationOut,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tool::Pen => "pen",
            Tool::Eraser => "eraser",
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Identifiers
// ───────────────────────────────────────────────────────────────────

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Page identifier (routing parameter).
    PageId
);
string_id!(
    /// Opaque per-profile session identifier.
    SessionId
);
string_id!(
    /// Backend-assigned permanent stroke identifier.
    CanonicalId
);

/// Client-minted placeholder id for a stroke awaiting confirmation.
///
/// Never serialized onto the wire and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TempId(Uuid);

impl TempId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TempId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "temp:{}", self.0)
    }
}

/// Identity of a store entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StrokeId {
    Pending(TempId),
    Committed(CanonicalId),
}

impl StrokeId {
    pub fn is_pending(&self) -> bool {
        matches!(self, StrokeId::Pending(_))
    }

    pub fn temp_id(&self) -> Option<TempId> {
        match self {
            StrokeId::Pending(t) => Some(*t),
            StrokeId::Committed(_) => None,
        }
    }

    pub fn canonical_id(&self) -> Option<&CanonicalId> {
        match self {
            StrokeId::Pending(_) => None,
            StrokeId::Committed(id) => Some(id),
        }
    }
}

impl fmt::Display for StrokeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrokeId::Pending(t) => t.fmt(f),
            StrokeId::Committed(id) => id.fmt(f),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Strokes
// ───────────────────────────────────────────────────────────────────

/// Hash of a stroke's visual content and author, excluding `created_at`.
///
/// The backend restamps `created_at`, so it cannot take part in matching a
/// feed echo against a pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentFingerprint(u64);

/// Unsent stroke record. This is the write endpoint's request body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeDraft {
    pub page_id: PageId,
    pub session_id: SessionId,
    pub color: String,
    pub width: f64,
    #[serde(deserialize_with = "deserialize_points")]
    pub points: Vec<Point>,
    #[serde(default)]
    pub tool: Tool,
    pub created_at: DateTime<Utc>,
}

impl StrokeDraft {
    pub fn fingerprint(&self) -> ContentFingerprint {
        let mut hasher = DefaultHasher::new();
        self.page_id.hash(&mut hasher);
        self.session_id.hash(&mut hasher);
        self.color.hash(&mut hasher);
        self.width.to_bits().hash(&mut hasher);
        self.tool.hash(&mut hasher);
        self.points.len().hash(&mut hasher);
        for p in &self.points {
            p.x.to_bits().hash(&mut hasher);
            p.y.to_bits().hash(&mut hasher);
        }
        ContentFingerprint(hasher.finish())
    }
}

/// A persisted stroke row as returned by the write endpoint, the initial
/// load, and the live feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalStroke {
    pub id: CanonicalId,
    #[serde(flatten)]
    pub draft: StrokeDraft,
}

impl CanonicalStroke {
    pub fn new(id: impl Into<CanonicalId>, draft: StrokeDraft) -> Self {
        Self {
            id: id.into(),
            draft,
        }
    }

    pub fn page_id(&self) -> &PageId {
        &self.draft.page_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.draft.session_id
    }
}

/// An entry in the optimistic store.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub id: StrokeId,
    pub draft: StrokeDraft,
}

impl Stroke {
    pub fn pending(temp_id: TempId, draft: StrokeDraft) -> Self {
        Self {
            id: StrokeId::Pending(temp_id),
            draft,
        }
    }

    pub fn committed(canonical: CanonicalStroke) -> Self {
        Self {
            id: StrokeId::Committed(canonical.id),
            draft: canonical.draft,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.id.is_pending()
    }

    pub fn points(&self) -> &[Point] {
        &self.draft.points
    }

    pub fn flat_points(&self) -> Vec<f64> {
        flatten_points(&self.draft.points)
    }
}

// ───────────────────────────────────────────────────────────────────
// Pages
// ───────────────────────────────────────────────────────────────────

/// Page metadata used to size the canvas and fetch its background snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub id: PageId,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub snapshot_url: Option<String>,
    #[serde(default)]
    pub snapshot_ts: Option<DateTime<Utc>>,
}

impl PageMeta {
    pub fn new(id: impl Into<PageId>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            snapshot_url: None,
            snapshot_ts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(points: Vec<Point>) -> StrokeDraft {
        StrokeDraft {
            page_id: PageId::from("page_01"),
            session_id: SessionId::from("sess-a"),
            color: "#ff0066".to_string(),
            width: 3.0,
            points,
            tool: Tool::Pen,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_point_serializes_as_pair() {
        let json = serde_json::to_string(&Point::new(1.5, 2.0)).unwrap();
        assert_eq!(json, "[1.5,2.0]");
    }

    #[test]
    fn test_row_accepts_pair_points() {
        let json = r##"{
            "id": "s-1", "page_id": "page_01", "session_id": "a",
            "color": "#000", "width": 3, "tool": "pen",
            "points": [[1, 2], [3, 4]],
            "created_at": "2024-05-01T10:00:00Z"
        }"##;
        let row: CanonicalStroke = serde_json::from_str(json).unwrap();
        assert_eq!(row.id.as_str(), "s-1");
        assert_eq!(row.draft.points, vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
    }

    #[test]
    fn test_row_accepts_flat_points() {
        let json = r##"{
            "id": "s-2", "page_id": "page_01", "session_id": "a",
            "color": "#000", "width": 3, "tool": "eraser",
            "points": [1, 2, 3, 4, 5],
            "created_at": "2024-05-01T10:00:00Z"
        }"##;
        let row: CanonicalStroke = serde_json::from_str(json).unwrap();
        assert_eq!(row.draft.tool, Tool::Eraser);
        assert_eq!(row.draft.points, vec![Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
    }

    #[test]
    fn test_missing_tool_defaults_to_pen() {
        let json = r##"{
            "page_id": "p", "session_id": "a", "color": "#000", "width": 1,
            "points": [[0, 0], [1, 1]], "created_at": "2024-05-01T10:00:00Z"
        }"##;
        let d: StrokeDraft = serde_json::from_str(json).unwrap();
        assert_eq!(d.tool, Tool::Pen);
    }

    #[test]
    fn test_canonical_row_is_flat_json() {
        let row = CanonicalStroke::new("s-9", draft(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]));
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["id"], "s-9");
        assert_eq!(value["page_id"], "page_01");
        assert_eq!(value["points"][1][0], 1.0);
        assert_eq!(value["tool"], "pen");
    }

    #[test]
    fn test_fingerprint_ignores_created_at() {
        let pts = vec![Point::new(0.0, 0.0), Point::new(4.0, 4.0)];
        let a = draft(pts.clone());
        let mut b = draft(pts);
        b.created_at = a.created_at + chrono::Duration::seconds(30);
        assert_eq!(a.fingerprint(), b.fingerprint());

        b.color = "#000000".to_string();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_stroke_id_tags() {
        let temp = TempId::new();
        let pending = StrokeId::Pending(temp);
        let committed = StrokeId::Committed(CanonicalId::from("s-1"));
        assert!(pending.is_pending());
        assert_eq!(pending.temp_id(), Some(temp));
        assert!(!committed.is_pending());
        assert_eq!(committed.canonical_id().map(|c| c.as_str()), Some("s-1"));
        assert_ne!(TempId::new(), TempId::new());
    }

    #[test]
    fn test_tool_composite() {
        assert_eq!(Tool::Pen.composite_op().as_str(), "source-over");
        assert_eq!(Tool::Eraser.composite_op().as_str(), "destination-out");
    }

    #[test]
    fn test_flatten_points() {
        let flat = flatten_points(&[Point::new(1.0, 2.0), Point::new(3.0, 4.0)]);
        assert_eq!(flat, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_page_meta_optional_fields() {
        let meta: PageMeta =
            serde_json::from_str(r#"{"id":"page_01","width":800,"height":600}"#).unwrap();
        assert_eq!(meta.width, 800);
        assert!(meta.snapshot_url.is_none());
        assert!(meta.snapshot_ts.is_none());
    }
}
