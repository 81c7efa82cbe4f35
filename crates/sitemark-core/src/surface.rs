//! Rendering surface seam.
//!
//! The session never draws. It tells the host what changed through this
//! trait; a host maps the calls onto its map widget or canvas element.

use crate::geometry::{Context, GeoPoint, Geometry};
use crate::handles::Handle;
use crate::model::Style;
use peniko::Color;
use uuid::Uuid;

/// Which kind of entity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Node,
    Line,
    Drawing,
}

/// Resolved paint for a transient shape: colors with opacity applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Paint {
    pub stroke: Color,
    pub fill: Option<Color>,
    /// Stroke width in pixels.
    pub width: f64,
    pub dash: Option<Vec<f64>>,
}

impl From<&Style> for Paint {
    fn from(style: &Style) -> Self {
        Self {
            stroke: style.stroke(),
            fill: style.fill(),
            width: style.weight,
            dash: style.dash_array.clone(),
        }
    }
}

/// Host-side rendering surface.
pub trait Surface {
    /// Route all pointer events to the session until released.
    fn capture_pointer(&mut self);

    fn release_pointer(&mut self);

    /// Draw a transient shape (drag preview or in-progress tool).
    fn show_preview(&mut self, geometry: &Geometry, paint: &Paint);

    /// Draw a transient marker, e.g. a node being dragged.
    fn show_point_preview(&mut self, position: GeoPoint);

    fn clear_preview(&mut self);

    /// Replace the displayed handle set. An empty slice hides the handles.
    fn show_handles(&mut self, handles: &[Handle]);

    /// An entity was created, updated or removed.
    fn entity_changed(&mut self, kind: EntityKind, id: Uuid);

    /// Everything in `context` should be redrawn (undo, redo, mode change).
    fn refresh(&mut self, context: Context);

    /// Surface a user-facing error.
    fn alert(&mut self, message: &str) {
        log::warn!("{message}");
    }
}

/// One call made on a [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCall {
    CapturePointer,
    ReleasePointer,
    ShowPreview(Geometry, Paint),
    ShowPointPreview(GeoPoint),
    ClearPreview,
    ShowHandles(usize),
    EntityChanged(EntityKind, Uuid),
    Refresh(Context),
    Alert(String),
}

/// Surface that records every call. Used by tests and headless hosts.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    calls: Vec<SurfaceCall>,
    captured: bool,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> &[SurfaceCall] {
        &self.calls
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    pub fn count(&self, matches: impl Fn(&SurfaceCall) -> bool) -> usize {
        self.calls.iter().filter(|c| matches(c)).count()
    }

    pub fn alerts(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                SurfaceCall::Alert(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}

impl Surface for RecordingSurface {
    fn capture_pointer(&mut self) {
        self.captured = true;
        self.calls.push(SurfaceCall::CapturePointer);
    }

    fn release_pointer(&mut self) {
        self.captured = false;
        self.calls.push(SurfaceCall::ReleasePointer);
    }

    fn show_preview(&mut self, geometry: &Geometry, paint: &Paint) {
        self.calls
            .push(SurfaceCall::ShowPreview(geometry.clone(), paint.clone()));
    }

    fn show_point_preview(&mut self, position: GeoPoint) {
        self.calls.push(SurfaceCall::ShowPointPreview(position));
    }

    fn clear_preview(&mut self) {
        self.calls.push(SurfaceCall::ClearPreview);
    }

    fn show_handles(&mut self, handles: &[Handle]) {
        self.calls.push(SurfaceCall::ShowHandles(handles.len()));
    }

    fn entity_changed(&mut self, kind: EntityKind, id: Uuid) {
        self.calls.push(SurfaceCall::EntityChanged(kind, id));
    }

    fn refresh(&mut self, context: Context) {
        self.calls.push(SurfaceCall::Refresh(context));
    }

    fn alert(&mut self, message: &str) {
        self.calls.push(SurfaceCall::Alert(message.to_string()));
    }
}
