//! Geometry kernel.
//!
//! Pure functions over [`Geometry`] values: bounds and center extraction,
//! point moves in geographic or pixel space, and rotate/scale about a pivot.
//! Every function that can run in either coordinate space takes a
//! [`Context`] so both spaces are handled explicitly.

use crate::projection::Projector;
use kurbo::{Affine, Point, Vec2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Approximate metres per degree of latitude.
pub const METERS_PER_DEGREE: f64 = 111_320.0;

/// Half-size of the synthetic bounds around a text position (degrees).
pub const TEXT_PADDING_MAP: f64 = 0.0001;

/// Half-size of the synthetic bounds around a text position (canvas units).
pub const TEXT_PADDING_CANVAS: f64 = 5.0;

/// Smallest scale factor accepted on either axis.
pub const MIN_SCALE: f64 = 1e-3;

/// Rotations smaller than this (degrees) are treated as no rotation.
pub const ANGLE_EPSILON: f64 = 1e-5;

/// Geometry errors. Degenerate transforms are rejected, never committed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeometryError {
    #[error("Degenerate geometry: {0}")]
    Degenerate(String),
    #[error("Geometry has no coordinates")]
    Empty,
}

/// Result type for geometry operations.
pub type GeometryResult<T> = Result<T, GeometryError>;

/// Which coordinate space an entity's numbers live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    /// Geographic map: latitude/longitude in degrees.
    #[default]
    Map,
    /// Blank drawing canvas: `lat` is the vertical axis, `lng` the horizontal.
    Canvas,
}

impl Context {
    pub fn name(&self) -> &'static str {
        match self {
            Context::Map => "map",
            Context::Canvas => "canvas",
        }
    }
}

/// A position in native (geographic or canvas) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Treat the point as planar `(x = lng, y = lat)`.
    pub fn to_planar(self) -> Point {
        Point::new(self.lng, self.lat)
    }

    pub fn from_planar(point: Point) -> Self {
        Self::new(point.y, point.x)
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    pub fn approx_eq(&self, other: GeoPoint, epsilon: f64) -> bool {
        (self.lat - other.lat).abs() <= epsilon && (self.lng - other.lng).abs() <= epsilon
    }

    /// Distance to another point: metres on the map, units on the canvas.
    pub fn distance(&self, other: GeoPoint, context: Context) -> f64 {
        match context {
            Context::Canvas => self.to_planar().distance(other.to_planar()),
            Context::Map => {
                let mean_lat = ((self.lat + other.lat) / 2.0).to_radians();
                let dy = (other.lat - self.lat) * METERS_PER_DEGREE;
                let dx = (other.lng - self.lng) * METERS_PER_DEGREE * mean_lat.cos();
                dx.hypot(dy)
            }
        }
    }
}

/// Axis-aligned bounds in native coordinates. North is the top edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

impl Bounds {
    pub const fn new(north: f64, south: f64, east: f64, west: f64) -> Self {
        Self {
            north,
            south,
            east,
            west,
        }
    }

    /// Bounds spanned by two arbitrary corner points.
    pub fn from_corners(a: GeoPoint, b: GeoPoint) -> Self {
        Self::new(a.lat.max(b.lat), a.lat.min(b.lat), a.lng.max(b.lng), a.lng.min(b.lng))
    }

    /// Bounds of a set of points, `None` when empty.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a GeoPoint>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut bounds = Self::new(first.lat, first.lat, first.lng, first.lng);
        for p in iter {
            bounds.extend(*p);
        }
        Some(bounds)
    }

    /// Grow to include a point.
    pub fn extend(&mut self, point: GeoPoint) {
        self.north = self.north.max(point.lat);
        self.south = self.south.min(point.lat);
        self.east = self.east.max(point.lng);
        self.west = self.west.min(point.lng);
    }

    /// `north > south` and `east > west`.
    pub fn is_valid(&self) -> bool {
        self.north > self.south && self.east > self.west
    }

    /// Not inverted, possibly of zero size.
    pub fn is_ordered(&self) -> bool {
        self.north >= self.south && self.east >= self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn center(&self) -> GeoPoint {
        GeoPoint::new((self.north + self.south) / 2.0, (self.east + self.west) / 2.0)
    }

    pub fn north_west(&self) -> GeoPoint {
        GeoPoint::new(self.north, self.west)
    }

    pub fn north_east(&self) -> GeoPoint {
        GeoPoint::new(self.north, self.east)
    }

    pub fn south_east(&self) -> GeoPoint {
        GeoPoint::new(self.south, self.east)
    }

    pub fn south_west(&self) -> GeoPoint {
        GeoPoint::new(self.south, self.west)
    }

    pub fn top_center(&self) -> GeoPoint {
        GeoPoint::new(self.north, (self.east + self.west) / 2.0)
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        point.lat <= self.north
            && point.lat >= self.south
            && point.lng <= self.east
            && point.lng >= self.west
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.north.max(other.north),
            self.south.min(other.south),
            self.east.max(other.east),
            self.west.min(other.west),
        )
    }

    /// Pad each side by `ratio` of the span on that axis.
    pub fn padded(&self, ratio: f64) -> Bounds {
        let dy = self.height() * ratio;
        let dx = self.width() * ratio;
        Bounds::new(self.north + dy, self.south - dy, self.east + dx, self.west - dx)
    }

    pub fn approx_eq(&self, other: &Bounds, epsilon: f64) -> bool {
        (self.north - other.north).abs() <= epsilon
            && (self.south - other.south).abs() <= epsilon
            && (self.east - other.east).abs() <= epsilon
            && (self.west - other.west).abs() <= epsilon
    }
}

/// Per-axis scale factor. A uniform scale has `x == y`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    pub x: f64,
    pub y: f64,
}

impl Scale {
    pub const IDENTITY: Scale = Scale { x: 1.0, y: 1.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub const fn uniform(factor: f64) -> Self {
        Self { x: factor, y: factor }
    }

    pub fn is_uniform(&self) -> bool {
        (self.x - self.y).abs() < f64::EPSILON
    }

    pub fn is_identity(&self) -> bool {
        (self.x - 1.0).abs() < f64::EPSILON && (self.y - 1.0).abs() < f64::EPSILON
    }

    /// Scalar used where a shape has a single size (circle radius).
    pub fn mean(&self) -> f64 {
        (self.x + self.y) / 2.0
    }

    pub fn then(&self, other: Scale) -> Scale {
        Scale::new(self.x * other.x, self.y * other.y)
    }

    fn check(&self) -> GeometryResult<()> {
        let ok = |v: f64| v.is_finite() && v > MIN_SCALE;
        if ok(self.x) && ok(self.y) {
            Ok(())
        } else {
            Err(GeometryError::Degenerate(format!(
                "scale {}x{} collapses or flips the shape",
                self.x, self.y
            )))
        }
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// A rotate/scale request applied by [`apply_geometry_transform`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeometryTransform {
    /// Rotation in degrees, clockwise on screen.
    pub rotation: Option<f64>,
    pub scale: Option<Scale>,
}

impl GeometryTransform {
    pub fn rotate(degrees: f64) -> Self {
        Self {
            rotation: Some(degrees),
            scale: None,
        }
    }

    pub fn scale(scale: Scale) -> Self {
        Self {
            rotation: None,
            scale: Some(scale),
        }
    }
}

/// A displacement for [`move_geometry`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveDelta {
    Geographic { dlat: f64, dlng: f64 },
    Pixel(Vec2),
}

/// Positional description of a drawing, one variant per shape kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Geometry {
    Rectangle { bounds: Bounds },
    /// Radius in metres on the map, in canvas units on the canvas.
    Circle { center: GeoPoint, radius: f64 },
    Polygon { coordinates: Vec<GeoPoint> },
    Building { coordinates: Vec<GeoPoint> },
    Boundary { coordinates: Vec<GeoPoint> },
    Line { coordinates: Vec<GeoPoint> },
    Freehand { coordinates: Vec<GeoPoint> },
    Text { position: GeoPoint },
}

impl Geometry {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Geometry::Rectangle { .. } => "rectangle",
            Geometry::Circle { .. } => "circle",
            Geometry::Polygon { .. } => "polygon",
            Geometry::Building { .. } => "building",
            Geometry::Boundary { .. } => "boundary",
            Geometry::Line { .. } => "line",
            Geometry::Freehand { .. } => "freehand",
            Geometry::Text { .. } => "text",
        }
    }

    /// Vertex list for coordinate-based kinds.
    pub fn coordinates(&self) -> Option<&[GeoPoint]> {
        match self {
            Geometry::Polygon { coordinates }
            | Geometry::Building { coordinates }
            | Geometry::Boundary { coordinates }
            | Geometry::Line { coordinates }
            | Geometry::Freehand { coordinates } => Some(coordinates),
            Geometry::Rectangle { .. } | Geometry::Circle { .. } | Geometry::Text { .. } => None,
        }
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Geometry::Text { .. })
    }

    /// Text has no intrinsic size, so it only rotates.
    pub fn supports_scale(&self) -> bool {
        !self.is_text()
    }

    /// Same kind with the same control points within `epsilon`.
    pub fn approx_eq(&self, other: &Geometry, epsilon: f64) -> bool {
        match (self, other) {
            (Geometry::Rectangle { bounds: a }, Geometry::Rectangle { bounds: b }) => {
                a.approx_eq(b, epsilon)
            }
            (
                Geometry::Circle {
                    center: c1,
                    radius: r1,
                },
                Geometry::Circle {
                    center: c2,
                    radius: r2,
                },
            ) => c1.approx_eq(*c2, epsilon) && (r1 - r2).abs() <= epsilon,
            (Geometry::Text { position: a }, Geometry::Text { position: b }) => {
                a.approx_eq(*b, epsilon)
            }
            _ => {
                if self.kind_name() != other.kind_name() {
                    return false;
                }
                match (self.coordinates(), other.coordinates()) {
                    (Some(a), Some(b)) => {
                        a.len() == b.len()
                            && a.iter().zip(b).all(|(p, q)| p.approx_eq(*q, epsilon))
                    }
                    _ => false,
                }
            }
        }
    }

    /// Apply `f` to every control point, keeping the kind.
    fn map_points(&self, mut f: impl FnMut(GeoPoint) -> GeoPoint) -> Geometry {
        match self {
            Geometry::Rectangle { bounds } => Geometry::Rectangle {
                bounds: Bounds::from_corners(f(bounds.north_west()), f(bounds.south_east())),
            },
            Geometry::Circle { center, radius } => Geometry::Circle {
                center: f(*center),
                radius: *radius,
            },
            Geometry::Polygon { coordinates } => Geometry::Polygon {
                coordinates: coordinates.iter().map(|p| f(*p)).collect(),
            },
            Geometry::Building { coordinates } => Geometry::Building {
                coordinates: coordinates.iter().map(|p| f(*p)).collect(),
            },
            Geometry::Boundary { coordinates } => Geometry::Boundary {
                coordinates: coordinates.iter().map(|p| f(*p)).collect(),
            },
            Geometry::Line { coordinates } => Geometry::Line {
                coordinates: coordinates.iter().map(|p| f(*p)).collect(),
            },
            Geometry::Freehand { coordinates } => Geometry::Freehand {
                coordinates: coordinates.iter().map(|p| f(*p)).collect(),
            },
            Geometry::Text { position } => Geometry::Text {
                position: f(*position),
            },
        }
    }

    /// Check the post-transform invariants.
    pub fn validate(&self) -> GeometryResult<()> {
        match self {
            Geometry::Rectangle { bounds } => {
                if bounds.is_valid() {
                    Ok(())
                } else {
                    Err(GeometryError::Degenerate(format!(
                        "rectangle bounds n={} s={} e={} w={}",
                        bounds.north, bounds.south, bounds.east, bounds.west
                    )))
                }
            }
            Geometry::Circle { center, radius } => {
                if center.is_finite() && radius.is_finite() && *radius > 0.0 {
                    Ok(())
                } else {
                    Err(GeometryError::Degenerate(format!("circle radius {radius}")))
                }
            }
            Geometry::Text { position } => {
                if position.is_finite() {
                    Ok(())
                } else {
                    Err(GeometryError::Degenerate("text position".to_string()))
                }
            }
            _ => {
                let coords = self.coordinates().unwrap_or_default();
                if coords.is_empty() {
                    Err(GeometryError::Empty)
                } else if coords.iter().all(GeoPoint::is_finite) {
                    Ok(())
                } else {
                    Err(GeometryError::Degenerate("non-finite vertex".to_string()))
                }
            }
        }
    }
}

/// Bounding box of a geometry.
///
/// Circles and text get synthetic bounds: radius-derived padding for circles,
/// a fixed padding for text.
pub fn bounds_of(geometry: &Geometry, context: Context) -> Option<Bounds> {
    match geometry {
        Geometry::Rectangle { bounds } => Some(*bounds),
        Geometry::Circle { center, radius } => {
            let (dlat, dlng) = match context {
                Context::Canvas => (*radius, *radius),
                Context::Map => {
                    let dlat = radius / METERS_PER_DEGREE;
                    let cos = center.lat.to_radians().cos().abs().max(1e-6);
                    (dlat, dlat / cos)
                }
            };
            Some(Bounds::new(
                center.lat + dlat,
                center.lat - dlat,
                center.lng + dlng,
                center.lng - dlng,
            ))
        }
        Geometry::Text { position } => {
            let pad = match context {
                Context::Map => TEXT_PADDING_MAP,
                Context::Canvas => TEXT_PADDING_CANVAS,
            };
            Some(Bounds::new(
                position.lat + pad,
                position.lat - pad,
                position.lng + pad,
                position.lng - pad,
            ))
        }
        _ => Bounds::from_points(geometry.coordinates().unwrap_or_default()),
    }
}

/// Representative center: bounds midpoint for rectangles, explicit center or
/// position for circles and text, vertex mean for coordinate lists.
pub fn center_of(geometry: &Geometry) -> Option<GeoPoint> {
    match geometry {
        Geometry::Rectangle { bounds } => Some(bounds.center()),
        Geometry::Circle { center, .. } => Some(*center),
        Geometry::Text { position } => Some(*position),
        _ => {
            let coords = geometry.coordinates().unwrap_or_default();
            if coords.is_empty() {
                return None;
            }
            let n = coords.len() as f64;
            let (lat, lng) = coords
                .iter()
                .fold((0.0, 0.0), |(lat, lng), p| (lat + p.lat, lng + p.lng));
            Some(GeoPoint::new(lat / n, lng / n))
        }
    }
}

pub fn move_point_geographic(point: GeoPoint, dlat: f64, dlng: f64) -> GeoPoint {
    GeoPoint::new(point.lat + dlat, point.lng + dlng)
}

/// Move by a screen-space delta, round-tripping through the projector so the
/// on-screen displacement is constant at any zoom.
pub fn move_point_pixel(point: GeoPoint, delta: Vec2, projector: &dyn Projector) -> GeoPoint {
    projector.unproject(projector.project(point) + delta)
}

/// Rotate about `pivot` in pixel space, clockwise on screen for positive
/// angles.
pub fn rotate_point(
    point: GeoPoint,
    angle_degrees: f64,
    pivot: GeoPoint,
    projector: &dyn Projector,
) -> GeoPoint {
    let p = projector.project(point);
    let c = projector.project(pivot);
    let rotated = Affine::rotate_about(angle_degrees.to_radians(), c) * p;
    projector.unproject(rotated)
}

/// Scale about `pivot`: in pixel space on the canvas, by raw coordinate
/// deltas on the map.
pub fn scale_point(
    point: GeoPoint,
    scale: Scale,
    pivot: GeoPoint,
    context: Context,
    projector: &dyn Projector,
) -> GeoPoint {
    match context {
        Context::Canvas => {
            let p = projector.project(point);
            let c = projector.project(pivot);
            let scaled = Point::new(c.x + (p.x - c.x) * scale.x, c.y + (p.y - c.y) * scale.y);
            projector.unproject(scaled)
        }
        Context::Map => GeoPoint::new(
            pivot.lat + (point.lat - pivot.lat) * scale.y,
            pivot.lng + (point.lng - pivot.lng) * scale.x,
        ),
    }
}

/// Translate every control point of a geometry.
pub fn move_geometry(geometry: &Geometry, delta: MoveDelta, projector: &dyn Projector) -> Geometry {
    match delta {
        MoveDelta::Geographic { dlat, dlng } => {
            geometry.map_points(|p| move_point_geographic(p, dlat, dlng))
        }
        MoveDelta::Pixel(d) => geometry.map_points(|p| move_point_pixel(p, d, projector)),
    }
}

/// Move a whole geometry so that `from` lands on `to`.
///
/// Map drags translate in pixel space so shapes keep their on-screen size
/// across latitudes; canvas drags translate by raw coordinate deltas.
pub fn translate_geometry(
    geometry: &Geometry,
    from: GeoPoint,
    to: GeoPoint,
    context: Context,
    projector: &dyn Projector,
) -> Geometry {
    let delta = match context {
        Context::Map => MoveDelta::Pixel(projector.project(to) - projector.project(from)),
        Context::Canvas => MoveDelta::Geographic {
            dlat: to.lat - from.lat,
            dlng: to.lng - from.lng,
        },
    };
    move_geometry(geometry, delta, projector)
}

/// Union of a set of bounds, `None` when empty.
pub fn bounds_union(bounds: impl IntoIterator<Item = Bounds>) -> Option<Bounds> {
    bounds.into_iter().reduce(|acc, b| acc.union(&b))
}

/// Scale then rotate every vertex about `pivot`.
///
/// A rectangle with a nonzero rotation becomes a [`Geometry::Polygon`] of its
/// four rotated corners (NW, NE, SE, SW), since rotation destroys
/// axis-alignment. Text only ever moves its position. Circles scale their
/// radius by the mean of the two factors.
pub fn apply_geometry_transform(
    geometry: &Geometry,
    transform: &GeometryTransform,
    pivot: GeoPoint,
    context: Context,
    projector: &dyn Projector,
) -> GeometryResult<Geometry> {
    let scale = transform.scale.unwrap_or_default();
    scale.check()?;
    let rotation = transform
        .rotation
        .filter(|a| a.is_finite() && normalize_angle(*a).min(360.0 - normalize_angle(*a)) > ANGLE_EPSILON);

    let map = |p: GeoPoint| {
        let mut q = p;
        if !scale.is_identity() {
            q = scale_point(q, scale, pivot, context, projector);
        }
        if let Some(angle) = rotation {
            q = rotate_point(q, angle, pivot, projector);
        }
        q
    };

    let result = match geometry {
        Geometry::Rectangle { bounds } if rotation.is_some() => Geometry::Polygon {
            coordinates: vec![
                map(bounds.north_west()),
                map(bounds.north_east()),
                map(bounds.south_east()),
                map(bounds.south_west()),
            ],
        },
        Geometry::Rectangle { bounds } => {
            let nw = map(bounds.north_west());
            let se = map(bounds.south_east());
            Geometry::Rectangle {
                bounds: Bounds::new(nw.lat, se.lat, se.lng, nw.lng),
            }
        }
        Geometry::Circle { center, radius } => Geometry::Circle {
            center: map(*center),
            radius: radius * scale.mean(),
        },
        other => other.map_points(map),
    };

    result.validate()?;
    Ok(result)
}

/// Normalize an angle into `[0, 360)`.
pub fn normalize_angle(degrees: f64) -> f64 {
    let a = degrees.rem_euclid(360.0);
    if a >= 360.0 { 0.0 } else { a }
}

/// Snap an angle to the nearest increment, normalized into `[0, 360)`.
pub fn snap_angle(degrees: f64, increment: f64) -> f64 {
    if increment <= 0.0 {
        return normalize_angle(degrees);
    }
    normalize_angle((degrees / increment).round() * increment)
}

/// Distance from a point to a segment (all planar).
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = b - a;
    let pv = point - a;
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    point.distance(a + seg * t)
}
