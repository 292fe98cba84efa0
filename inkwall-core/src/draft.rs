//! Pointer capture and stroke draft assembly.
//!
//! ```text
//! pointer_down ─► pointer_move* ─► pointer_up
//!                                     │ raw path
//!                                     ▼
//!                               PointReducer
//!                                     │
//!                                     ▼
//!                  StrokeDraftBuilder::build ─► (TempId, StrokeDraft)
//! ```

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{PageId, Point, SessionId, StrokeDraft, TempId, Tool};
use crate::reducer::PointReducer;

pub const DEFAULT_COLOR: &str = "#ff0066";
pub const DEFAULT_WIDTH: f64 = 3.0;

/// Minimum number of points a persisted stroke may have.
pub const MIN_POINTS: usize = 2;

/// Current drawing tool state.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSettings {
    pub color: String,
    pub width: f64,
    pub tool: Tool,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            color: DEFAULT_COLOR.to_string(),
            width: DEFAULT_WIDTH,
            tool: Tool::Pen,
        }
    }
}

impl ToolSettings {
    pub fn pen(color: impl Into<String>, width: f64) -> Self {
        Self {
            color: color.into(),
            width,
            tool: Tool::Pen,
        }
    }

    pub fn eraser(width: f64) -> Self {
        Self {
            color: DEFAULT_COLOR.to_string(),
            width,
            tool: Tool::Eraser,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DraftError {
    #[error("stroke needs at least 2 points, got {0}")]
    TooFewPoints(usize),
}

/// Builds drafts for one page and one session.
#[derive(Debug, Clone)]
pub struct StrokeDraftBuilder {
    page_id: PageId,
    session_id: SessionId,
}

impl StrokeDraftBuilder {
    pub fn new(page_id: PageId, session_id: SessionId) -> Self {
        Self {
            page_id,
            session_id,
        }
    }

    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Build a draft stamped with the current time and mint its temp id.
    pub fn build(
        &self,
        points: Vec<Point>,
        settings: &ToolSettings,
    ) -> Result<(TempId, StrokeDraft), DraftError> {
        self.build_at(points, settings, Utc::now())
    }

    pub fn build_at(
        &self,
        points: Vec<Point>,
        settings: &ToolSettings,
        created_at: DateTime<Utc>,
    ) -> Result<(TempId, StrokeDraft), DraftError> {
        if points.len() < MIN_POINTS {
            return Err(DraftError::TooFewPoints(points.len()));
        }
        let draft = StrokeDraft {
            page_id: self.page_id.clone(),
            session_id: self.session_id.clone(),
            color: settings.color.clone(),
            width: settings.width,
            points,
            tool: settings.tool,
            created_at,
        };
        Ok((TempId::new(), draft))
    }
}

/// Accumulates one gesture. Purely local; never touches the network.
#[derive(Debug, Default)]
pub struct StrokeCapture {
    points: Vec<Point>,
    active: bool,
}

impl StrokeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new gesture, discarding any unfinished one.
    pub fn pointer_down(&mut self, at: Point) {
        self.points.clear();
        self.points.push(at);
        self.active = true;
    }

    /// Ignored unless a gesture is in progress.
    pub fn pointer_move(&mut self, at: Point) {
        if self.active {
            self.points.push(at);
        }
    }

    /// Finish the gesture and hand back its raw path. `None` if no gesture
    /// was in progress.
    pub fn pointer_up(&mut self) -> Option<Vec<Point>> {
        if !self.active {
            return None;
        }
        self.active = false;
        Some(std::mem::take(&mut self.points))
    }

    pub fn cancel(&mut self) {
        self.active = false;
        self.points.clear();
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// In-progress path, for drawing the live preview.
    pub fn preview(&self) -> &[Point] {
        &self.points
    }
}

/// Reduce a finished raw path and build its draft.
pub fn finish_stroke(
    raw: Vec<Point>,
    reducer: &PointReducer,
    builder: &StrokeDraftBuilder,
    settings: &ToolSettings,
) -> Result<(TempId, StrokeDraft), DraftError> {
    if raw.len() < MIN_POINTS {
        return Err(DraftError::TooFewPoints(raw.len()));
    }
    builder.build(reducer.reduce_points(raw), settings)
}
