//! Drawing tools: turn pointer sequences into geometry.

use crate::geometry::{Bounds, Context, Geometry};
use crate::input::PointerPosition;
use serde::{Deserialize, Serialize};

/// Freehand samples closer than this to the previous one are dropped (pixels).
pub const FREEHAND_MIN_SPACING_PX: f64 = 2.0;

/// Available drawing tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawTool {
    #[default]
    Rectangle,
    Circle,
    Polygon,
    Building,
    Boundary,
    Line,
    Freehand,
    Text,
}

impl DrawTool {
    pub const ALL: [DrawTool; 8] = [
        DrawTool::Rectangle,
        DrawTool::Circle,
        DrawTool::Polygon,
        DrawTool::Building,
        DrawTool::Boundary,
        DrawTool::Line,
        DrawTool::Freehand,
        DrawTool::Text,
    ];

    /// Press-drag-release tools.
    pub fn is_drag(self) -> bool {
        matches!(
            self,
            DrawTool::Rectangle | DrawTool::Circle | DrawTool::Freehand
        )
    }

    /// Click-per-vertex tools, finished explicitly.
    pub fn is_click_sequence(self) -> bool {
        matches!(
            self,
            DrawTool::Polygon | DrawTool::Building | DrawTool::Boundary | DrawTool::Line
        )
    }

    /// Vertices needed before a click sequence can finish.
    pub fn min_vertices(self) -> usize {
        match self {
            DrawTool::Polygon | DrawTool::Building | DrawTool::Boundary => 3,
            DrawTool::Line | DrawTool::Freehand => 2,
            _ => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DrawTool::Rectangle => "rectangle",
            DrawTool::Circle => "circle",
            DrawTool::Polygon => "polygon",
            DrawTool::Building => "building",
            DrawTool::Boundary => "boundary",
            DrawTool::Line => "line",
            DrawTool::Freehand => "freehand",
            DrawTool::Text => "text",
        }
    }
}

/// State of a tool interaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ToolState {
    #[default]
    Idle,
    /// Rectangle, circle or freehand drag in progress.
    Dragging {
        start: PointerPosition,
        current: PointerPosition,
        /// Freehand samples, including `start`.
        samples: Vec<PointerPosition>,
    },
    /// Click sequence in progress.
    Placing {
        vertices: Vec<PointerPosition>,
        /// Pointer position for the rubber-band segment.
        hover: Option<PointerPosition>,
    },
}

/// Manages the current tool and its in-progress shape.
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    pub current_tool: DrawTool,
    pub state: ToolState,
}

impl ToolManager {
    pub fn new(tool: DrawTool) -> Self {
        Self {
            current_tool: tool,
            state: ToolState::Idle,
        }
    }

    /// Switch tools, dropping any in-progress shape.
    pub fn set_tool(&mut self, tool: DrawTool) {
        self.current_tool = tool;
        self.state = ToolState::Idle;
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, ToolState::Idle)
    }

    pub fn cancel(&mut self) {
        self.state = ToolState::Idle;
    }

    /// Handle a press. Text completes immediately; everything else starts or
    /// extends the in-progress shape.
    pub fn pointer_down(&mut self, pointer: PointerPosition) -> Option<Geometry> {
        let tool = self.current_tool;
        if tool == DrawTool::Text {
            self.state = ToolState::Idle;
            return Some(Geometry::Text {
                position: pointer.geo,
            });
        }
        if tool.is_drag() {
            self.state = ToolState::Dragging {
                start: pointer,
                current: pointer,
                samples: vec![pointer],
            };
            return None;
        }
        match &mut self.state {
            ToolState::Placing { vertices, hover } => {
                // A second press on the last vertex is a double click.
                if vertices.last().is_none_or(|v| v.pixel != pointer.pixel) {
                    vertices.push(pointer);
                }
                *hover = None;
            }
            _ => {
                self.state = ToolState::Placing {
                    vertices: vec![pointer],
                    hover: None,
                };
            }
        }
        None
    }

    pub fn pointer_move(&mut self, pointer: PointerPosition) {
        let freehand = self.current_tool == DrawTool::Freehand;
        match &mut self.state {
            ToolState::Dragging {
                current, samples, ..
            } => {
                *current = pointer;
                let far_enough = samples.last().is_none_or(|last| {
                    pointer.pixel.distance(last.pixel) >= FREEHAND_MIN_SPACING_PX
                });
                if freehand && far_enough {
                    samples.push(pointer);
                }
            }
            ToolState::Placing { hover, .. } => *hover = Some(pointer),
            ToolState::Idle => {}
        }
    }

    /// Handle a release. Drag tools complete here; a zero-size drag yields
    /// nothing.
    pub fn pointer_up(&mut self, pointer: PointerPosition, context: Context) -> Option<Geometry> {
        if !matches!(self.state, ToolState::Dragging { .. }) {
            return None;
        }
        self.pointer_move(pointer);
        let geometry = self.build(context, false);
        self.state = ToolState::Idle;
        geometry
    }

    /// Complete a click sequence (Enter or double click).
    pub fn finish(&mut self, context: Context) -> Option<Geometry> {
        if !matches!(self.state, ToolState::Placing { .. }) {
            return None;
        }
        let geometry = self.build(context, false);
        if geometry.is_some() {
            self.state = ToolState::Idle;
        }
        geometry
    }

    /// Shape that would result if the interaction completed now, including
    /// the rubber-band vertex of a click sequence.
    pub fn preview(&self, context: Context) -> Option<Geometry> {
        self.build(context, true)
    }

    /// Vertices placed so far in a click sequence.
    pub fn vertex_count(&self) -> usize {
        match &self.state {
            ToolState::Placing { vertices, .. } => vertices.len(),
            _ => 0,
        }
    }

    fn build(&self, context: Context, with_hover: bool) -> Option<Geometry> {
        let geometry = match &self.state {
            ToolState::Idle => return None,
            ToolState::Dragging {
                start,
                current,
                samples,
            } => match self.current_tool {
                DrawTool::Rectangle => Geometry::Rectangle {
                    bounds: Bounds::from_corners(start.geo, current.geo),
                },
                DrawTool::Circle => Geometry::Circle {
                    center: start.geo,
                    radius: start.geo.distance(current.geo, context),
                },
                DrawTool::Freehand => {
                    if samples.len() < DrawTool::Freehand.min_vertices() {
                        return None;
                    }
                    Geometry::Freehand {
                        coordinates: samples.iter().map(|s| s.geo).collect(),
                    }
                }
                _ => return None,
            },
            ToolState::Placing { vertices, hover } => {
                let mut coordinates: Vec<_> = vertices.iter().map(|v| v.geo).collect();
                if with_hover {
                    coordinates.extend(hover.map(|h| h.geo));
                }
                if coordinates.len() < self.current_tool.min_vertices() {
                    return None;
                }
                match self.current_tool {
                    DrawTool::Polygon => Geometry::Polygon { coordinates },
                    DrawTool::Building => Geometry::Building { coordinates },
                    DrawTool::Boundary => Geometry::Boundary { coordinates },
                    DrawTool::Line => Geometry::Line { coordinates },
                    _ => return None,
                }
            }
        };
        geometry.validate().ok()?;
        Some(geometry)
    }
}
