//! Entity definitions: nodes, lines, drawings and their styles.

use crate::geometry::{Context, GeoPoint, Geometry, Scale, normalize_angle};
use peniko::Color;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type ProjectId = Uuid;
pub type NodeId = Uuid;
pub type NodeTypeId = Uuid;
pub type LineId = Uuid;
pub type DrawingId = Uuid;
pub type SectionId = Uuid;

/// Serializable color representation (RGBA8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub const fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    /// Default stroke blue.
    pub const fn blue() -> Self {
        Self::new(0x33, 0x88, 0xff, 255)
    }

    /// Parse `#rrggbb` or `#rrggbbaa`.
    pub fn from_hex(hex: &str) -> Option<Self> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
        match hex.len() {
            6 => Some(Self::new(byte(0)?, byte(2)?, byte(4)?, 255)),
            8 => Some(Self::new(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => None,
        }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Stroke and fill styling shared by lines and drawings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    pub stroke_color: SerializableColor,
    /// Fill color (None = no fill).
    pub fill_color: Option<SerializableColor>,
    /// Stroke weight in pixels.
    pub weight: f64,
    pub opacity: f64,
    pub fill_opacity: f64,
    /// Dash pattern in pixels; None draws a solid stroke.
    #[serde(default)]
    pub dash_array: Option<Vec<f64>>,
}

impl Default for Style {
    fn default() -> Self {
        Self {
            stroke_color: SerializableColor::blue(),
            fill_color: None,
            weight: 3.0,
            opacity: 1.0,
            fill_opacity: 0.2,
            dash_array: None,
        }
    }
}

impl Style {
    /// Stroke color with opacity applied.
    pub fn stroke(&self) -> Color {
        let alpha = (self.stroke_color.a as f64 * self.opacity.clamp(0.0, 1.0)) as u8;
        let c = self.stroke_color;
        Color::from_rgba8(c.r, c.g, c.b, alpha)
    }

    /// Fill color with fill opacity applied.
    pub fn fill(&self) -> Option<Color> {
        self.fill_color.map(|c| {
            let alpha = (c.a as f64 * self.fill_opacity.clamp(0.0, 1.0)) as u8;
            Color::from_rgba8(c.r, c.g, c.b, alpha)
        })
    }

    /// Dashed preview overlay derived from this style.
    pub fn preview(&self) -> Style {
        Style {
            dash_array: Some(vec![6.0, 6.0]),
            opacity: 0.8,
            ..self.clone()
        }
    }
}

/// Cumulative transform metadata, kept apart from the raw geometry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawingTransform {
    /// Degrees in `[0, 360)`.
    pub rotation: f64,
    pub scale: Scale,
}

impl Default for DrawingTransform {
    fn default() -> Self {
        Self {
            rotation: 0.0,
            scale: Scale::IDENTITY,
        }
    }
}

impl DrawingTransform {
    /// Fold a further rotation/scale into the record.
    pub fn then(&self, rotation: f64, scale: Scale) -> DrawingTransform {
        DrawingTransform {
            rotation: normalize_angle(self.rotation + rotation),
            scale: self.scale.then(scale),
        }
    }
}

/// A vector shape placed on the map or canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Drawing {
    pub id: DrawingId,
    pub project_id: ProjectId,
    pub geometry: Geometry,
    pub style: Style,
    #[serde(default)]
    pub transform: Option<DrawingTransform>,
    pub context: Context,
    #[serde(default = "default_visible")]
    pub visible: bool,
    /// Label, or the content of a text shape.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_visible() -> bool {
    true
}

impl Drawing {
    pub fn new(project_id: ProjectId, geometry: Geometry, context: Context) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            geometry,
            style: Style::default(),
            transform: None,
            context,
            visible: true,
            label: None,
        }
    }

    pub fn transform_or_default(&self) -> DrawingTransform {
        self.transform.unwrap_or_default()
    }
}

/// Marker shape of a node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeShape {
    #[default]
    Circle,
    Square,
    Triangle,
    Diamond,
}

/// Template for nodes: marker look plus the reference prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeType {
    pub id: NodeTypeId,
    pub name: String,
    /// Prefix of auto-generated references, e.g. `MH` gives `MH1`, `MH2`.
    pub reference_prefix: String,
    pub shape: NodeShape,
    pub color: SerializableColor,
    /// Marker size in pixels.
    pub size: f64,
}

impl NodeType {
    pub fn new(name: impl Into<String>, reference_prefix: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            reference_prefix: reference_prefix.into(),
            shape: NodeShape::default(),
            color: SerializableColor::blue(),
            size: 12.0,
        }
    }
}

/// A typed point entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub project_id: ProjectId,
    pub node_type: NodeTypeId,
    /// Human-readable reference, unique within the context.
    pub reference: String,
    pub position: GeoPoint,
    #[serde(default)]
    pub cover_level: Option<f64>,
    #[serde(default)]
    pub invert_level: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    pub context: Context,
}

/// Read-only join to an external section record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionLink {
    pub section_id: SectionId,
    pub start_reference: String,
    pub finish_reference: String,
}

/// A polyline between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: LineId,
    pub project_id: ProjectId,
    pub start_node: NodeId,
    pub end_node: NodeId,
    #[serde(default)]
    pub waypoints: Vec<GeoPoint>,
    #[serde(default)]
    pub section: Option<SectionLink>,
    pub style: Style,
    pub context: Context,
}

impl Line {
    pub fn references(&self, node: NodeId) -> bool {
        self.start_node == node || self.end_node == node
    }

    /// Full polyline: start, waypoints, end.
    pub fn path(&self, start: GeoPoint, end: GeoPoint) -> Vec<GeoPoint> {
        let mut points = Vec::with_capacity(self.waypoints.len() + 2);
        points.push(start);
        points.extend_from_slice(&self.waypoints);
        points.push(end);
        points
    }

    /// Rewrite endpoint ids after a server-side re-key.
    pub fn remap_nodes(&mut self, ids: &HashMap<Uuid, Uuid>) {
        if let Some(new) = ids.get(&self.start_node) {
            self.start_node = *new;
        }
        if let Some(new) = ids.get(&self.end_node) {
            self.end_node = *new;
        }
    }
}
