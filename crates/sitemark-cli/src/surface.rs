//! Headless surface: reports what a real view would redraw to the log.

use sitemark_core::handles::Handle;
use sitemark_core::surface::{EntityKind, Paint};
use sitemark_core::{Context, GeoPoint, Geometry, Surface};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct LogSurface {
    captured: bool,
    alerts: usize,
}

impl LogSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_captured(&self) -> bool {
        self.captured
    }

    /// Number of user-facing errors raised so far.
    pub fn alerts(&self) -> usize {
        self.alerts
    }
}

impl Surface for LogSurface {
    fn capture_pointer(&mut self) {
        self.captured = true;
        log::trace!("Pointer captured");
    }

    fn release_pointer(&mut self) {
        self.captured = false;
        log::trace!("Pointer released");
    }

    fn show_preview(&mut self, geometry: &Geometry, paint: &Paint) {
        let stroke = paint.stroke.to_rgba8();
        log::trace!(
            "Preview {} stroke #{:02x}{:02x}{:02x}{:02x}",
            geometry.kind_name(),
            stroke.r,
            stroke.g,
            stroke.b,
            stroke.a
        );
    }

    fn show_point_preview(&mut self, position: GeoPoint) {
        log::trace!("Preview point {:.6}, {:.6}", position.lat, position.lng);
    }

    fn clear_preview(&mut self) {
        log::trace!("Preview cleared");
    }

    fn show_handles(&mut self, handles: &[Handle]) {
        log::debug!("Showing {} handles", handles.len());
    }

    fn entity_changed(&mut self, kind: EntityKind, id: Uuid) {
        log::info!("{kind:?} {id} changed");
    }

    fn refresh(&mut self, context: Context) {
        log::debug!("Refresh {}", context.name());
    }

    fn alert(&mut self, message: &str) {
        self.alerts += 1;
        log::error!("{message}");
    }
}
