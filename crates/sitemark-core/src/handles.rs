//! Selection handle layout.
//!
//! Handles are anchored in native coordinates so they follow the shape when
//! the view pans, but the rotate handle is offset by a fixed pixel distance
//! so its gap above the shape looks the same at every zoom.

use crate::geometry::{Bounds, Context, GeoPoint, Geometry, bounds_of};
use crate::model::DrawingId;
use crate::projection::Projector;
use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

/// Distance from the top edge to the rotation handle, in screen pixels.
pub const ROTATE_HANDLE_OFFSET_PX: f64 = 30.0;
/// Handle hit tolerance in screen pixels.
pub const HANDLE_HIT_TOLERANCE_PX: f64 = 10.0;

/// Corner positions. Top is north.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomRight,
        Corner::BottomLeft,
    ];

    pub fn opposite(self) -> Corner {
        match self {
            Corner::TopLeft => Corner::BottomRight,
            Corner::TopRight => Corner::BottomLeft,
            Corner::BottomLeft => Corner::TopRight,
            Corner::BottomRight => Corner::TopLeft,
        }
    }

    pub fn anchor(self, bounds: &Bounds) -> GeoPoint {
        match self {
            Corner::TopLeft => bounds.north_west(),
            Corner::TopRight => bounds.north_east(),
            Corner::BottomLeft => bounds.south_west(),
            Corner::BottomRight => bounds.south_east(),
        }
    }
}

/// Edge midpoint positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Edge {
    Top,
    Right,
    Bottom,
    Left,
}

impl Edge {
    pub const ALL: [Edge; 4] = [Edge::Top, Edge::Right, Edge::Bottom, Edge::Left];

    pub fn opposite(self) -> Edge {
        match self {
            Edge::Top => Edge::Bottom,
            Edge::Right => Edge::Left,
            Edge::Bottom => Edge::Top,
            Edge::Left => Edge::Right,
        }
    }

    /// Top/bottom edges resize vertically.
    pub fn is_vertical_axis(self) -> bool {
        matches!(self, Edge::Top | Edge::Bottom)
    }

    pub fn anchor(self, bounds: &Bounds) -> GeoPoint {
        let center = bounds.center();
        match self {
            Edge::Top => GeoPoint::new(bounds.north, center.lng),
            Edge::Right => GeoPoint::new(center.lat, bounds.east),
            Edge::Bottom => GeoPoint::new(bounds.south, center.lng),
            Edge::Left => GeoPoint::new(center.lat, bounds.west),
        }
    }
}

/// What a handle does when dragged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandleKind {
    /// Uniform scale about the opposite corner.
    Corner(Corner),
    /// Single-axis scale about the opposite edge.
    Edge(Edge),
    /// Rotation about the shape center.
    Rotate,
}

impl HandleKind {
    /// The handle that stays fixed while this one is dragged.
    pub fn opposite(self) -> Option<HandleKind> {
        match self {
            HandleKind::Corner(c) => Some(HandleKind::Corner(c.opposite())),
            HandleKind::Edge(e) => Some(HandleKind::Edge(e.opposite())),
            HandleKind::Rotate => None,
        }
    }

    pub fn is_scale(self) -> bool {
        !matches!(self, HandleKind::Rotate)
    }

    /// Anchor of a scale handle on the given bounds.
    pub fn anchor_on(self, bounds: &Bounds) -> Option<GeoPoint> {
        match self {
            HandleKind::Corner(c) => Some(c.anchor(bounds)),
            HandleKind::Edge(e) => Some(e.anchor(bounds)),
            HandleKind::Rotate => None,
        }
    }
}

/// Visual shape of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HandleShape {
    #[default]
    Square,
    Circle,
}

/// A draggable control point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Handle {
    pub kind: HandleKind,
    /// Position in native coordinates.
    pub anchor: GeoPoint,
    pub shape: HandleShape,
}

impl Handle {
    pub fn new(kind: HandleKind, anchor: GeoPoint) -> Self {
        let shape = match kind {
            HandleKind::Rotate => HandleShape::Circle,
            _ => HandleShape::Square,
        };
        Self {
            kind,
            anchor,
            shape,
        }
    }

    /// Screen-space distance check.
    pub fn hit_test(&self, pixel: Point, projector: &dyn Projector, tolerance: f64) -> bool {
        projector.project(self.anchor).distance(pixel) <= tolerance
    }
}

/// Point `offset_px` screen pixels above `anchor`.
pub fn offset_above(anchor: GeoPoint, offset_px: f64, projector: &dyn Projector) -> GeoPoint {
    projector.unproject(projector.project(anchor) - Vec2::new(0.0, offset_px))
}

/// Handles for a selected geometry.
///
/// Non-text shapes get 4 corners, 4 edge midpoints and a rotate handle above
/// the top-center. Text gets only the rotate handle, above its position.
pub fn compute_handles(
    geometry: &Geometry,
    context: Context,
    projector: &dyn Projector,
    rotate_offset_px: f64,
) -> Vec<Handle> {
    if let Geometry::Text { position } = geometry {
        return vec![Handle::new(
            HandleKind::Rotate,
            offset_above(*position, rotate_offset_px, projector),
        )];
    }
    let Some(bounds) = bounds_of(geometry, context) else {
        return Vec::new();
    };

    let mut handles = Vec::with_capacity(9);
    for corner in Corner::ALL {
        handles.push(Handle::new(HandleKind::Corner(corner), corner.anchor(&bounds)));
    }
    for edge in Edge::ALL {
        handles.push(Handle::new(HandleKind::Edge(edge), edge.anchor(&bounds)));
    }
    handles.push(Handle::new(
        HandleKind::Rotate,
        offset_above(bounds.top_center(), rotate_offset_px, projector),
    ));
    handles
}

/// Closest handle within `tolerance` pixels of `pixel`.
pub fn hit_test_handles(
    handles: &[Handle],
    pixel: Point,
    projector: &dyn Projector,
    tolerance: f64,
) -> Option<Handle> {
    handles
        .iter()
        .map(|h| (h, projector.project(h.anchor).distance(pixel)))
        .filter(|(_, d)| *d <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(h, _)| *h)
}

#[derive(Debug, Clone, PartialEq)]
struct CacheKey {
    drawing_id: DrawingId,
    geometry: Geometry,
    zoom: f64,
}

/// Handles of the selected drawing, recomputed only when the selection, its
/// committed geometry or the zoom changes. Drag frames go to the preview
/// overlay and never touch this cache.
#[derive(Debug, Clone, Default)]
pub struct HandleCache {
    key: Option<CacheKey>,
    handles: Vec<Handle>,
    recomputes: usize,
}

impl HandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles for `drawing_id` with `geometry`, recomputing if stale.
    pub fn get(
        &mut self,
        drawing_id: DrawingId,
        geometry: &Geometry,
        context: Context,
        projector: &dyn Projector,
        rotate_offset_px: f64,
    ) -> &[Handle] {
        let fresh = self.key.as_ref().is_some_and(|k| {
            k.drawing_id == drawing_id && k.geometry == *geometry && k.zoom == projector.zoom()
        });
        if !fresh {
            self.handles = compute_handles(geometry, context, projector, rotate_offset_px);
            self.key = Some(CacheKey {
                drawing_id,
                geometry: geometry.clone(),
                zoom: projector.zoom(),
            });
            self.recomputes += 1;
        }
        &self.handles
    }

    /// Currently cached handles, without recomputing.
    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.handles.clear();
    }

    /// Number of layout computations so far.
    pub fn recomputes(&self) -> usize {
        self.recomputes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::{CanvasProjector, MercatorProjector};
    use kurbo::Size;
    use uuid::Uuid;

    fn rect() -> Geometry {
        Geometry::Rectangle {
            bounds: Bounds::new(10.0, 0.0, 10.0, 0.0),
        }
    }

    #[test]
    fn test_rectangle_has_nine_handles() {
        let projector = CanvasProjector::new(Size::new(800.0, 600.0));
        let handles = compute_handles(&rect(), Context::Canvas, &projector, ROTATE_HANDLE_OFFSET_PX);
        assert_eq!(handles.len(), 9);
        let se = handles
            .iter()
            .find(|h| h.kind == HandleKind::Corner(Corner::BottomRight))
            .unwrap();
        assert_eq!(se.anchor, GeoPoint::new(0.0, 10.0));
        let right = handles
            .iter()
            .find(|h| h.kind == HandleKind::Edge(Edge::Right))
            .unwrap();
        assert_eq!(right.anchor, GeoPoint::new(5.0, 10.0));
    }

    #[test]
    fn test_rotate_handle_constant_pixel_gap() {
        let mut projector = MercatorProjector::new(GeoPoint::new(5.0, 5.0), 6.0, Size::new(800.0, 600.0));
        for zoom in [6.0, 9.0, 12.0] {
            projector.set_view(GeoPoint::new(5.0, 5.0), zoom);
            let geometry = Geometry::Rectangle {
                bounds: Bounds::new(5.01, 5.0, 5.01, 5.0),
            };
            let handles = compute_handles(&geometry, Context::Map, &projector, 30.0);
            let rotate = handles.iter().find(|h| h.kind == HandleKind::Rotate).unwrap();
            let top = projector.project(GeoPoint::new(5.01, 5.005));
            let gap = top - projector.project(rotate.anchor);
            assert!(gap.x.abs() < 1e-6);
            assert!((gap.y - 30.0).abs() < 1e-6, "zoom {zoom}: gap {}", gap.y);
        }
    }

    #[test]
    fn test_text_only_rotate_handle() {
        let projector = CanvasProjector::new(Size::new(800.0, 600.0));
        let text = Geometry::Text {
            position: GeoPoint::new(0.0, 0.0),
        };
        let handles = compute_handles(&text, Context::Canvas, &projector, 30.0);
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].kind, HandleKind::Rotate);
        assert!(handles[0].anchor.lat > 0.0);
    }

    #[test]
    fn test_opposite_handles() {
        assert_eq!(
            HandleKind::Corner(Corner::BottomRight).opposite(),
            Some(HandleKind::Corner(Corner::TopLeft))
        );
        assert_eq!(
            HandleKind::Edge(Edge::Left).opposite(),
            Some(HandleKind::Edge(Edge::Right))
        );
        assert_eq!(HandleKind::Rotate.opposite(), None);
    }

    #[test]
    fn test_hit_test_picks_closest() {
        let projector = CanvasProjector::new(Size::new(800.0, 600.0));
        let handles = compute_handles(&rect(), Context::Canvas, &projector, 30.0);
        let se_px = projector.project(GeoPoint::new(0.0, 10.0));
        let hit = hit_test_handles(&handles, se_px + Vec2::new(2.0, 1.0), &projector, 5.0).unwrap();
        assert_eq!(hit.kind, HandleKind::Corner(Corner::BottomRight));
        assert!(hit_test_handles(&handles, Point::new(0.0, 0.0), &projector, 5.0).is_none());
    }

    #[test]
    fn test_cache_recomputes_only_on_change() {
        let projector = CanvasProjector::new(Size::new(800.0, 600.0));
        let mut cache = HandleCache::new();
        let id = Uuid::new_v4();
        let geometry = rect();
        for _ in 0..10 {
            cache.get(id, &geometry, Context::Canvas, &projector, 30.0);
        }
        assert_eq!(cache.recomputes(), 1);

        let moved = Geometry::Rectangle {
            bounds: Bounds::new(11.0, 1.0, 10.0, 0.0),
        };
        cache.get(id, &moved, Context::Canvas, &projector, 30.0);
        assert_eq!(cache.recomputes(), 2);

        cache.get(Uuid::new_v4(), &moved, Context::Canvas, &projector, 30.0);
        assert_eq!(cache.recomputes(), 3);
    }
}
