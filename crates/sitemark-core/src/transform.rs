//! Direct-manipulation controller for move, scale and rotate drags.
//!
//! The controller is a small state machine over an explicit [`DragSession`].
//! Every preview frame is recomputed from the session's snapshot plus the
//! total pointer delta, so no error accumulates across frames.

use crate::geometry::{
    ANGLE_EPSILON, Context, GeoPoint, Geometry, GeometryTransform, Scale,
    apply_geometry_transform, bounds_of, center_of, normalize_angle, snap_angle,
    translate_geometry,
};
use crate::handles::{Handle, HandleKind};
use crate::input::PointerPosition;
use crate::model::{Drawing, DrawingId, DrawingTransform};
use crate::projection::Projector;
use kurbo::{Point, Vec2};
use thiserror::Error;

/// Geometry change below this (native units) is not worth a commit.
pub const COMMIT_EPSILON: f64 = 1e-5;
/// Body drags shorter than this (pixels) are treated as clicks.
pub const MOVE_THRESHOLD_PX: f64 = 1.0;
/// Floating-point noise left by a transform that changed nothing.
const NOISE_EPSILON: f64 = 1e-12;
/// Default rotation snap increment, in degrees.
pub const DEFAULT_ANGLE_SNAP: f64 = 15.0;

/// Reasons a drag cannot start.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("A drag is already in progress")]
    Busy,
    #[error("{0} shapes cannot be scaled")]
    ScaleUnsupported(&'static str),
    #[error("Drawing has no extent to transform")]
    NoExtent,
}

/// What was grabbed on pointer-down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragTarget {
    Body,
    Handle(Handle),
}

/// What the current drag does.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragKind {
    Move,
    Scale(HandleKind),
    Rotate,
}

/// Snapshot and progress of one drag.
#[derive(Debug, Clone, PartialEq)]
pub struct DragSession {
    pub drawing_id: DrawingId,
    pub context: Context,
    pub kind: DragKind,
    pub original_geometry: Geometry,
    pub original_transform: Option<DrawingTransform>,
    pub start: PointerPosition,
    /// Fixed point of the transform: opposite handle for scale, shape center
    /// for rotate, unused for move.
    pub pivot: GeoPoint,
    /// Anchor of the grabbed handle.
    pub handle_anchor: GeoPoint,
    /// Last valid preview.
    pub preview: Preview,
    /// Last pointer seen.
    pub current: PointerPosition,
}

/// Live preview of a drag: the would-be geometry and transform record.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub geometry: Geometry,
    pub transform: Option<DrawingTransform>,
    /// Rotation applied by this drag, in `[0, 360)`.
    pub angle: f64,
    /// Scale applied by this drag.
    pub scale: Scale,
}

/// Result of a completed drag, ready for the editor to record and persist.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformCommit {
    pub drawing_id: DrawingId,
    pub previous_geometry: Geometry,
    pub previous_transform: Option<DrawingTransform>,
    pub geometry: Geometry,
    pub transform: Option<DrawingTransform>,
}

/// Controller states.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ControllerState {
    #[default]
    Idle,
    /// Pointer is down on a target but has not moved yet.
    Armed(DragSession),
    Dragging(DragSession),
}

/// Turns pointer sequences into preview geometry and commits.
#[derive(Debug, Clone)]
pub struct TransformController {
    state: ControllerState,
    angle_snap_degrees: f64,
}

impl Default for TransformController {
    fn default() -> Self {
        Self::new(DEFAULT_ANGLE_SNAP)
    }
}

/// Bearing from `from` to `to` on screen, degrees clockwise from +x.
fn bearing(from: Point, to: Point) -> f64 {
    let d = to - from;
    d.y.atan2(d.x).to_degrees()
}

impl TransformController {
    pub fn new(angle_snap_degrees: f64) -> Self {
        Self {
            state: ControllerState::Idle,
            angle_snap_degrees,
        }
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, ControllerState::Idle)
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.state, ControllerState::Dragging(_))
    }

    pub fn session(&self) -> Option<&DragSession> {
        match &self.state {
            ControllerState::Idle => None,
            ControllerState::Armed(s) | ControllerState::Dragging(s) => Some(s),
        }
    }

    /// Current preview, once the pointer has moved.
    pub fn preview(&self) -> Option<&Preview> {
        match &self.state {
            ControllerState::Dragging(s) => Some(&s.preview),
            _ => None,
        }
    }

    /// Arm a drag on `drawing`. Refused while another drag is active.
    pub fn pointer_down(
        &mut self,
        drawing: &Drawing,
        target: DragTarget,
        pointer: PointerPosition,
    ) -> Result<(), TransformError> {
        if !self.is_idle() {
            return Err(TransformError::Busy);
        }
        let geometry = &drawing.geometry;
        let (kind, pivot, handle_anchor) = match target {
            DragTarget::Body => (DragKind::Move, pointer.geo, pointer.geo),
            DragTarget::Handle(handle) => match handle.kind {
                HandleKind::Rotate => {
                    let center = center_of(geometry).ok_or(TransformError::NoExtent)?;
                    (DragKind::Rotate, center, handle.anchor)
                }
                kind => {
                    if !geometry.supports_scale() {
                        return Err(TransformError::ScaleUnsupported(geometry.kind_name()));
                    }
                    let bounds =
                        bounds_of(geometry, drawing.context).ok_or(TransformError::NoExtent)?;
                    let pivot = kind
                        .opposite()
                        .and_then(|o| o.anchor_on(&bounds))
                        .ok_or(TransformError::NoExtent)?;
                    (DragKind::Scale(kind), pivot, handle.anchor)
                }
            },
        };

        log::debug!(
            "Arming {:?} drag on drawing {} ({})",
            kind,
            drawing.id,
            geometry.kind_name()
        );
        self.state = ControllerState::Armed(DragSession {
            drawing_id: drawing.id,
            context: drawing.context,
            kind,
            original_geometry: geometry.clone(),
            original_transform: drawing.transform,
            start: pointer,
            pivot,
            handle_anchor,
            preview: Preview {
                geometry: geometry.clone(),
                transform: drawing.transform,
                angle: 0.0,
                scale: Scale::IDENTITY,
            },
            current: pointer,
        });
        Ok(())
    }

    /// Update the preview. Returns the new preview when the frame was valid;
    /// a degenerate frame keeps the previous preview and returns `None`.
    pub fn pointer_move(
        &mut self,
        pointer: PointerPosition,
        snap: bool,
        projector: &dyn Projector,
    ) -> Option<&Preview> {
        let state = std::mem::take(&mut self.state);
        let mut session = match state {
            ControllerState::Idle => return None,
            ControllerState::Armed(s) | ControllerState::Dragging(s) => s,
        };
        session.current = pointer;
        let updated = match compute_preview(&session, pointer, snap, self.angle_snap_degrees, projector) {
            Some(preview) => {
                session.preview = preview;
                true
            }
            None => false,
        };
        self.state = ControllerState::Dragging(session);
        if updated { self.preview() } else { None }
    }

    /// Finish the drag. Returns a commit when the net change is significant.
    pub fn pointer_up(
        &mut self,
        pointer: PointerPosition,
        snap: bool,
        projector: &dyn Projector,
    ) -> Option<TransformCommit> {
        let session = match std::mem::take(&mut self.state) {
            ControllerState::Idle | ControllerState::Armed(_) => return None,
            ControllerState::Dragging(s) => s,
        };
        let preview = compute_preview(&session, pointer, snap, self.angle_snap_degrees, projector)
            .unwrap_or_else(|| session.preview.clone());

        if session.kind == DragKind::Move
            && pointer.pixel.distance(session.start.pixel) <= MOVE_THRESHOLD_PX
        {
            log::debug!("Move below threshold; discarding");
            return None;
        }
        // At deep map zooms a pixel is smaller than the native epsilon, so a
        // drag that travelled on screen commits any real geometry change.
        let travelled = pointer.pixel.distance(session.start.pixel) > MOVE_THRESHOLD_PX;
        let moved = !preview
            .geometry
            .approx_eq(&session.original_geometry, COMMIT_EPSILON)
            || (travelled
                && !preview
                    .geometry
                    .approx_eq(&session.original_geometry, NOISE_EPSILON));
        let turned = preview.angle.min(360.0 - preview.angle) > ANGLE_EPSILON;
        if !moved && !turned {
            log::debug!("Drag on {} produced no change", session.drawing_id);
            return None;
        }

        Some(TransformCommit {
            drawing_id: session.drawing_id,
            previous_geometry: session.original_geometry,
            previous_transform: session.original_transform,
            geometry: preview.geometry,
            transform: preview.transform,
        })
    }

    /// Abandon any drag. Returns true if one was active.
    pub fn cancel(&mut self) -> bool {
        !matches!(std::mem::take(&mut self.state), ControllerState::Idle)
    }
}

/// Preview for `pointer`, computed from the session snapshot.
fn compute_preview(
    session: &DragSession,
    pointer: PointerPosition,
    snap: bool,
    snap_increment: f64,
    projector: &dyn Projector,
) -> Option<Preview> {
    let original = &session.original_geometry;
    match session.kind {
        DragKind::Move => {
            let geometry = translate_geometry(
                original,
                session.start.geo,
                pointer.geo,
                session.context,
                projector,
            );
            geometry.validate().ok()?;
            Some(Preview {
                geometry,
                transform: session.original_transform,
                angle: 0.0,
                scale: Scale::IDENTITY,
            })
        }
        DragKind::Scale(kind) => {
            let scale = scale_factor(session, kind, pointer, projector)?;
            let geometry = apply_geometry_transform(
                original,
                &GeometryTransform::scale(scale),
                session.pivot,
                session.context,
                projector,
            )
            .map_err(|e| log::debug!("Scale preview rejected: {e}"))
            .ok()?;
            let base = session.original_transform.unwrap_or_default();
            Some(Preview {
                geometry,
                transform: Some(base.then(0.0, scale)),
                angle: 0.0,
                scale,
            })
        }
        DragKind::Rotate => {
            let center = projector.project(session.pivot);
            let handle = projector.project(session.handle_anchor);
            let raw = bearing(center, pointer.pixel) - bearing(center, handle);
            if !raw.is_finite() {
                return None;
            }
            let angle = if snap {
                snap_angle(raw, snap_increment)
            } else {
                normalize_angle(raw)
            };
            let geometry = apply_geometry_transform(
                original,
                &GeometryTransform::rotate(angle),
                session.pivot,
                session.context,
                projector,
            )
            .map_err(|e| log::debug!("Rotate preview rejected: {e}"))
            .ok()?;
            let base = session.original_transform.unwrap_or_default();
            Some(Preview {
                geometry,
                transform: Some(base.then(angle, Scale::IDENTITY)),
                angle,
                scale: Scale::IDENTITY,
            })
        }
    }
}

/// Scale factor for dragging `kind` to `pointer`.
///
/// Measured in pixels on the canvas and in planar native units on the map,
/// matching the space [`crate::geometry::scale_point`] works in. The grabbed
/// handle follows the pointer's total delta, so grabbing off-center does not
/// jump.
fn scale_factor(
    session: &DragSession,
    kind: HandleKind,
    pointer: PointerPosition,
    projector: &dyn Projector,
) -> Option<Scale> {
    let to_space = |p: GeoPoint| match session.context {
        Context::Canvas => projector.project(p),
        Context::Map => p.to_planar(),
    };
    let pivot = to_space(session.pivot);
    let handle = to_space(session.handle_anchor);
    let delta: Vec2 = to_space(pointer.geo) - to_space(session.start.geo);
    let reach = handle - pivot;
    let dragged = handle + delta - pivot;

    let scale = match kind {
        HandleKind::Corner(_) => {
            let len_sq = reach.hypot2();
            if len_sq < f64::EPSILON {
                return None;
            }
            Scale::uniform(dragged.dot(reach) / len_sq)
        }
        HandleKind::Edge(edge) if edge.is_vertical_axis() => {
            if reach.y.abs() < f64::EPSILON {
                return None;
            }
            Scale::new(1.0, dragged.y / reach.y)
        }
        HandleKind::Edge(_) => {
            if reach.x.abs() < f64::EPSILON {
                return None;
            }
            Scale::new(dragged.x / reach.x, 1.0)
        }
        HandleKind::Rotate => return None,
    };
    Some(scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Bounds, MoveDelta, move_geometry};
    use crate::handles::{Corner, Edge, compute_handles};
    use crate::projection::{CanvasProjector, MercatorProjector};
    use kurbo::Size;
    use uuid::Uuid;

    fn canvas() -> CanvasProjector {
        CanvasProjector::new(Size::new(800.0, 600.0))
    }

    fn square() -> Drawing {
        Drawing::new(
            Uuid::new_v4(),
            Geometry::Rectangle {
                bounds: Bounds::new(10.0, 0.0, 10.0, 0.0),
            },
            Context::Canvas,
        )
    }

    fn at(projector: &dyn Projector, geo: GeoPoint) -> PointerPosition {
        PointerPosition::new(projector.project(geo), geo)
    }

    fn handle(drawing: &Drawing, kind: HandleKind, projector: &dyn Projector) -> Handle {
        compute_handles(&drawing.geometry, drawing.context, projector, 30.0)
            .into_iter()
            .find(|h| h.kind == kind)
            .unwrap()
    }

    #[test]
    fn test_corner_scale_about_opposite_corner() {
        let projector = canvas();
        let drawing = square();
        let se = handle(&drawing, HandleKind::Corner(Corner::BottomRight), &projector);
        let mut controller = TransformController::default();
        controller
            .pointer_down(&drawing, DragTarget::Handle(se), at(&projector, se.anchor))
            .unwrap();

        let target = at(&projector, GeoPoint::new(-2.0, 12.0));
        assert!(controller.pointer_move(target, false, &projector).is_some());
        let commit = controller.pointer_up(target, false, &projector).unwrap();
        match commit.geometry {
            Geometry::Rectangle { bounds } => {
                assert!(bounds.approx_eq(&Bounds::new(10.0, -2.0, 12.0, 0.0), 1e-9));
            }
            other => panic!("unexpected {}", other.kind_name()),
        }
        let scale = commit.transform.unwrap().scale;
        assert!((scale.x - 1.2).abs() < 1e-9 && scale.is_uniform());
        assert!(controller.is_idle());
    }

    #[test]
    fn test_edge_scale_single_axis() {
        let projector = canvas();
        let drawing = square();
        let right = handle(&drawing, HandleKind::Edge(Edge::Right), &projector);
        let mut controller = TransformController::default();
        controller
            .pointer_down(&drawing, DragTarget::Handle(right), at(&projector, right.anchor))
            .unwrap();
        let target = at(&projector, GeoPoint::new(9.0, 15.0));
        controller.pointer_move(target, false, &projector);
        let commit = controller.pointer_up(target, false, &projector).unwrap();
        match commit.geometry {
            Geometry::Rectangle { bounds } => {
                assert!(bounds.approx_eq(&Bounds::new(10.0, 0.0, 15.0, 0.0), 1e-9));
            }
            other => panic!("unexpected {}", other.kind_name()),
        }
    }

    #[test]
    fn test_rotate_relative_to_handle_bearing() {
        let projector = canvas();
        let drawing = square();
        let rotate = handle(&drawing, HandleKind::Rotate, &projector);
        let mut controller = TransformController::default();
        controller
            .pointer_down(&drawing, DragTarget::Handle(rotate), at(&projector, rotate.anchor))
            .unwrap();

        // Grabbing and moving along the handle's own bearing is no rotation.
        let above = at(&projector, GeoPoint::new(40.0, 5.0));
        let preview = controller.pointer_move(above, false, &projector).unwrap();
        assert!(preview.angle.abs() < 1e-9);

        // Pointer due east of center is a quarter turn clockwise.
        let east = at(&projector, GeoPoint::new(5.0, 40.0));
        let preview = controller.pointer_move(east, false, &projector).unwrap();
        assert!((preview.angle - 90.0).abs() < 1e-9);
        assert!(matches!(preview.geometry, Geometry::Polygon { .. }));

        let commit = controller.pointer_up(east, false, &projector).unwrap();
        assert!((commit.transform.unwrap().rotation - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotate_snaps_and_normalizes() {
        let projector = canvas();
        let drawing = square();
        let rotate = handle(&drawing, HandleKind::Rotate, &projector);
        let mut controller = TransformController::new(15.0);
        controller
            .pointer_down(&drawing, DragTarget::Handle(rotate), at(&projector, rotate.anchor))
            .unwrap();
        // 5 degrees counter-clockwise from straight up.
        let c = projector.project(GeoPoint::new(5.0, 5.0));
        let theta = (-95f64).to_radians();
        let px = c + Vec2::new(theta.cos(), theta.sin()) * 50.0;
        let pointer = PointerPosition::new(px, projector.unproject(px));

        let free = controller.pointer_move(pointer, false, &projector).unwrap();
        assert!((free.angle - 355.0).abs() < 1e-9);
        let snapped = controller.pointer_move(pointer, true, &projector).unwrap();
        assert!(snapped.angle.abs() < 1e-9);
    }

    #[test]
    fn test_text_refuses_scale() {
        let projector = canvas();
        let drawing = Drawing::new(
            Uuid::new_v4(),
            Geometry::Text {
                position: GeoPoint::new(0.0, 0.0),
            },
            Context::Canvas,
        );
        let fake = Handle::new(HandleKind::Corner(Corner::TopLeft), GeoPoint::new(0.0, 0.0));
        let mut controller = TransformController::default();
        let err = controller
            .pointer_down(&drawing, DragTarget::Handle(fake), at(&projector, fake.anchor))
            .unwrap_err();
        assert_eq!(err, TransformError::ScaleUnsupported("text"));
        assert!(controller.is_idle());
    }

    #[test]
    fn test_second_drag_refused() {
        let projector = canvas();
        let drawing = square();
        let mut controller = TransformController::default();
        let p = at(&projector, GeoPoint::new(5.0, 5.0));
        controller.pointer_down(&drawing, DragTarget::Body, p).unwrap();
        assert_eq!(
            controller.pointer_down(&drawing, DragTarget::Body, p),
            Err(TransformError::Busy)
        );
        assert!(controller.cancel());
        assert!(controller.is_idle());
    }

    #[test]
    fn test_click_without_move_is_noop() {
        let projector = canvas();
        let drawing = square();
        let mut controller = TransformController::default();
        let p = at(&projector, GeoPoint::new(5.0, 5.0));
        controller.pointer_down(&drawing, DragTarget::Body, p).unwrap();
        assert!(controller.pointer_up(p, false, &projector).is_none());

        // Sub-pixel jitter is also discarded.
        controller.pointer_down(&drawing, DragTarget::Body, p).unwrap();
        let jitter = PointerPosition::new(p.pixel + Vec2::new(0.5, 0.0), projector.unproject(p.pixel + Vec2::new(0.5, 0.0)));
        controller.pointer_move(jitter, false, &projector);
        assert!(controller.pointer_up(jitter, false, &projector).is_none());
    }

    #[test]
    fn test_preview_has_no_drift() {
        let projector = MercatorProjector::new(GeoPoint::new(51.5, -0.12), 16.0, Size::new(800.0, 600.0));
        let mut drawing = square();
        drawing.context = Context::Map;
        drawing.geometry = Geometry::Polygon {
            coordinates: vec![
                GeoPoint::new(51.5, -0.12),
                GeoPoint::new(51.501, -0.12),
                GeoPoint::new(51.5005, -0.119),
            ],
        };
        let mut controller = TransformController::default();
        let start = at(&projector, GeoPoint::new(51.5005, -0.1195));
        controller.pointer_down(&drawing, DragTarget::Body, start).unwrap();
        let mut pixel = start.pixel;
        for _ in 0..50 {
            pixel += Vec2::new(1.0, 0.5);
            let p = PointerPosition::new(pixel, projector.unproject(pixel));
            controller.pointer_move(p, false, &projector);
        }
        let end = PointerPosition::new(pixel, projector.unproject(pixel));
        let commit = controller.pointer_up(end, false, &projector).unwrap();
        let direct = move_geometry(&drawing.geometry, MoveDelta::Pixel(Vec2::new(50.0, 25.0)), &projector);
        assert!(commit.geometry.approx_eq(&direct, 1e-9));
    }

    #[test]
    fn test_small_map_drags_commit_at_deep_zoom() {
        let projector = MercatorProjector::new(
            GeoPoint::new(51.50005, -0.11995),
            20.0,
            Size::new(800.0, 600.0),
        );
        let offset = |p: PointerPosition, dx: f64, dy: f64| {
            let pixel = p.pixel + Vec2::new(dx, dy);
            PointerPosition::new(pixel, projector.unproject(pixel))
        };

        // A few pixels of body drag is well under a microdegree here.
        let mut drawing = square();
        drawing.context = Context::Map;
        drawing.geometry = Geometry::Polygon {
            coordinates: vec![
                GeoPoint::new(51.5, -0.12),
                GeoPoint::new(51.5001, -0.12),
                GeoPoint::new(51.50005, -0.1199),
            ],
        };
        let mut controller = TransformController::default();
        let start = at(&projector, GeoPoint::new(51.50005, -0.11995));
        controller.pointer_down(&drawing, DragTarget::Body, start).unwrap();
        let end = offset(start, 5.0, 0.0);
        controller.pointer_move(end, false, &projector);
        let commit = controller.pointer_up(end, false, &projector).unwrap();
        assert!(!commit.geometry.approx_eq(&drawing.geometry, 1e-12));

        // Same for a corner scale of a tiny rectangle.
        drawing.geometry = Geometry::Rectangle {
            bounds: Bounds::new(51.5001, 51.5, -0.1199, -0.12),
        };
        let se = handle(&drawing, HandleKind::Corner(Corner::BottomRight), &projector);
        let start = at(&projector, se.anchor);
        controller.pointer_down(&drawing, DragTarget::Handle(se), start).unwrap();
        let end = offset(start, 6.0, 6.0);
        controller.pointer_move(end, false, &projector);
        let commit = controller.pointer_up(end, false, &projector).unwrap();
        assert!(commit.transform.unwrap().scale.x > 1.0);
    }

    #[test]
    fn test_degenerate_frame_keeps_last_preview() {
        let projector = canvas();
        let drawing = square();
        let top = handle(&drawing, HandleKind::Edge(Edge::Top), &projector);
        let mut controller = TransformController::default();
        controller
            .pointer_down(&drawing, DragTarget::Handle(top), at(&projector, top.anchor))
            .unwrap();
        let valid = at(&projector, GeoPoint::new(12.0, 5.0));
        let good = controller.pointer_move(valid, false, &projector).unwrap().clone();
        // Dragging the top edge below the bottom edge would flip the shape.
        let flipped = at(&projector, GeoPoint::new(-5.0, 5.0));
        assert!(controller.pointer_move(flipped, false, &projector).is_none());
        assert!(controller.is_dragging());
        let commit = controller.pointer_up(flipped, false, &projector).unwrap();
        assert_eq!(commit.geometry, good.geometry);
    }
}
