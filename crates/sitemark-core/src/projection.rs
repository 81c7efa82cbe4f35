//! Conversion between native coordinates and screen pixels.
//!
//! The host map (or canvas view) owns the real viewport; the core only needs
//! a [`Projector`] to do pixel-space rotation, constant-offset handle
//! placement and pixel drags.

use crate::geometry::{Bounds, GeoPoint};
use kurbo::{Affine, Point, Size, Vec2};
use serde::{Deserialize, Serialize};

/// Web Mercator tile size in pixels.
pub const TILE_SIZE: f64 = 256.0;

/// Deepest zoom a fitted map view will use.
pub const MAX_MAP_ZOOM: f64 = 22.0;

/// Latitude limit of the Web Mercator projection.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_6;

/// Geographic <-> pixel conversion for the current viewport.
pub trait Projector {
    /// Native coordinates to viewport pixels (y grows downwards).
    fn project(&self, point: GeoPoint) -> Point;

    /// Viewport pixels to native coordinates.
    fn unproject(&self, pixel: Point) -> GeoPoint;

    fn zoom(&self) -> f64;

    fn center(&self) -> GeoPoint;

    fn viewport_size(&self) -> Size;

    /// Native bounds currently visible.
    fn viewport_bounds(&self) -> Bounds {
        let size = self.viewport_size();
        Bounds::from_corners(
            self.unproject(Point::ZERO),
            self.unproject(Point::new(size.width, size.height)),
        )
    }
}

/// Linear projection for the blank drawing canvas.
///
/// `lng` maps to x and `lat` to y with the y axis flipped, so north is up as
/// on the map. One unit spans `2^zoom` pixels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasProjector {
    /// Pixel position of the native origin.
    pub offset: Vec2,
    pub zoom: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    pub viewport: Size,
}

impl CanvasProjector {
    /// Origin at the viewport center, zoom 0.
    pub fn new(viewport: Size) -> Self {
        Self {
            offset: Vec2::new(viewport.width / 2.0, viewport.height / 2.0),
            zoom: 0.0,
            min_zoom: -5.0,
            max_zoom: 5.0,
            viewport,
        }
    }

    /// Pixels per canvas unit.
    pub fn scale(&self) -> f64 {
        2f64.powf(self.zoom)
    }

    fn transform(&self) -> Affine {
        Affine::translate(self.offset) * Affine::scale_non_uniform(self.scale(), -self.scale())
    }

    /// Pan by a screen delta.
    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Zoom by `levels`, keeping the given screen point fixed.
    pub fn zoom_at(&mut self, screen_point: Point, levels: f64) {
        let new_zoom = (self.zoom + levels).clamp(self.min_zoom, self.max_zoom);
        if (new_zoom - self.zoom).abs() < f64::EPSILON {
            return;
        }
        let anchor = self.unproject(screen_point);
        self.zoom = new_zoom;
        let moved = self.project(anchor);
        self.offset += screen_point - moved;
    }

    /// Zoom and center so `bounds` fills the viewport. Bounds around a
    /// single point only recenter the view.
    pub fn fit_bounds(&mut self, bounds: &Bounds) {
        if !bounds.is_ordered() {
            return;
        }
        let sx = self.viewport.width / bounds.width();
        let sy = self.viewport.height / bounds.height();
        let fit = sx.min(sy);
        if fit.is_finite() && fit > 0.0 {
            self.zoom = fit.log2().clamp(self.min_zoom, self.max_zoom);
        }
        let center = bounds.center();
        let s = self.scale();
        self.offset = Vec2::new(
            self.viewport.width / 2.0 - center.lng * s,
            self.viewport.height / 2.0 + center.lat * s,
        );
    }
}

impl Projector for CanvasProjector {
    fn project(&self, point: GeoPoint) -> Point {
        self.transform() * point.to_planar()
    }

    fn unproject(&self, pixel: Point) -> GeoPoint {
        GeoPoint::from_planar(self.transform().inverse() * pixel)
    }

    fn zoom(&self) -> f64 {
        self.zoom
    }

    fn center(&self) -> GeoPoint {
        self.unproject(Point::new(self.viewport.width / 2.0, self.viewport.height / 2.0))
    }

    fn viewport_size(&self) -> Size {
        self.viewport
    }
}

/// Spherical Web Mercator projection for the geographic map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MercatorProjector {
    pub center: GeoPoint,
    pub zoom: f64,
    pub viewport: Size,
}

impl MercatorProjector {
    pub fn new(center: GeoPoint, zoom: f64, viewport: Size) -> Self {
        Self {
            center,
            zoom,
            viewport,
        }
    }

    fn world_size(&self) -> f64 {
        TILE_SIZE * 2f64.powf(self.zoom)
    }

    /// Absolute world pixel of a geographic point at the current zoom.
    fn to_world(&self, point: GeoPoint) -> Point {
        let size = self.world_size();
        let lat = point.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = (point.lng + 180.0) / 360.0 * size;
        let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * size;
        Point::new(x, y)
    }

    fn from_world(&self, world: Point) -> GeoPoint {
        let size = self.world_size();
        let lng = world.x / size * 360.0 - 180.0;
        let n = std::f64::consts::PI * (1.0 - 2.0 * world.y / size);
        let lat = n.sinh().atan().to_degrees();
        GeoPoint::new(lat, lng)
    }

    fn origin(&self) -> Point {
        self.to_world(self.center) - Vec2::new(self.viewport.width / 2.0, self.viewport.height / 2.0)
    }

    pub fn set_view(&mut self, center: GeoPoint, zoom: f64) {
        self.center = center;
        self.zoom = zoom;
    }

    /// Center on `bounds` and pick the deepest zoom that still shows all of it.
    /// Bounds around a single point only recenter the view.
    pub fn fit_bounds(&mut self, bounds: &Bounds) {
        if !bounds.is_ordered() {
            return;
        }
        let nw = self.to_world(bounds.north_west());
        let se = self.to_world(bounds.south_east());
        let span = se - nw;
        let factor = (self.viewport.width / span.x.abs()).min(self.viewport.height / span.y.abs());
        if factor.is_nan() || factor <= 0.0 {
            return;
        }
        // Mercator midpoint, not the latitude average.
        let center = self.from_world(nw.midpoint(se));
        let zoom = if factor.is_finite() {
            (self.zoom + factor.log2()).clamp(0.0, MAX_MAP_ZOOM)
        } else {
            self.zoom
        };
        self.set_view(center, zoom);
    }
}

impl Projector for MercatorProjector {
    fn project(&self, point: GeoPoint) -> Point {
        let origin = self.origin();
        let world = self.to_world(point);
        Point::new(world.x - origin.x, world.y - origin.y)
    }

    fn unproject(&self, pixel: Point) -> GeoPoint {
        let origin = self.origin();
        self.from_world(Point::new(pixel.x + origin.x, pixel.y + origin.y))
    }

    fn zoom(&self) -> f64 {
        self.zoom
    }

    fn center(&self) -> GeoPoint {
        self.center
    }

    fn viewport_size(&self) -> Size {
        self.viewport
    }
}
