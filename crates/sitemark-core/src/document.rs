//! In-memory entity stores for one editing session.

use crate::geometry::{Bounds, Context, GeoPoint, bounds_of, bounds_union, point_to_segment_dist};
use crate::model::{Drawing, DrawingId, Line, LineId, Node, NodeId, NodeType, NodeTypeId, ProjectId};
use crate::projection::Projector;
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All nodes, lines and drawings of a project, across both contexts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub project_id: ProjectId,
    pub nodes: HashMap<NodeId, Node>,
    pub lines: HashMap<LineId, Line>,
    pub drawings: HashMap<DrawingId, Drawing>,
    /// Paint order of drawings (back to front).
    pub drawing_order: Vec<DrawingId>,
    #[serde(default)]
    pub node_types: HashMap<NodeTypeId, NodeType>,
}

/// A hit on a line's rendered polyline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineHit {
    pub line_id: LineId,
    /// Index of the hit segment in `[start, waypoints.., end]`.
    pub segment: usize,
}

impl Document {
    pub fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            ..Self::default()
        }
    }

    pub fn add_node_type(&mut self, node_type: NodeType) -> NodeTypeId {
        let id = node_type.id;
        self.node_types.insert(id, node_type);
        id
    }

    // --- nodes ---

    pub fn insert_node(&mut self, node: Node) {
        self.nodes.insert(node.id, node);
    }

    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&id)
    }

    pub fn nodes_in(&self, context: Context) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.context == context)
    }

    /// Node holding `reference` in `context`, if any.
    pub fn node_by_reference(&self, context: Context, reference: &str) -> Option<NodeId> {
        self.nodes_in(context)
            .find(|n| n.reference == reference)
            .map(|n| n.id)
    }

    /// First free `{prefix}{n}` reference in `context`, counting from 1.
    pub fn next_reference(&self, context: Context, prefix: &str) -> String {
        let highest = self
            .nodes_in(context)
            .filter_map(|n| n.reference.strip_prefix(prefix)?.parse::<u32>().ok())
            .max()
            .unwrap_or(0);
        let mut n = highest + 1;
        loop {
            let candidate = format!("{prefix}{n}");
            if self.node_by_reference(context, &candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Move a node under a new id, rewriting line endpoints.
    pub fn rekey_node(&mut self, old: NodeId, new: NodeId) {
        if let Some(mut node) = self.nodes.remove(&old) {
            node.id = new;
            self.nodes.insert(new, node);
        }
        for line in self.lines.values_mut() {
            if line.start_node == old {
                line.start_node = new;
            }
            if line.end_node == old {
                line.end_node = new;
            }
        }
    }

    // --- lines ---

    pub fn insert_line(&mut self, line: Line) {
        self.lines.insert(line.id, line);
    }

    pub fn remove_line(&mut self, id: LineId) -> Option<Line> {
        self.lines.remove(&id)
    }

    pub fn line(&self, id: LineId) -> Option<&Line> {
        self.lines.get(&id)
    }

    pub fn lines_in(&self, context: Context) -> impl Iterator<Item = &Line> {
        self.lines.values().filter(move |l| l.context == context)
    }

    /// Ids of lines with `node` as an endpoint, sorted for stable output.
    pub fn lines_referencing(&self, node: NodeId) -> Vec<LineId> {
        let mut ids: Vec<LineId> = self
            .lines
            .values()
            .filter(|l| l.references(node))
            .map(|l| l.id)
            .collect();
        ids.sort();
        ids
    }

    /// Full polyline of a line, `None` if an endpoint is missing.
    pub fn line_path(&self, line: &Line) -> Option<Vec<GeoPoint>> {
        let start = self.node(line.start_node)?.position;
        let end = self.node(line.end_node)?.position;
        Some(line.path(start, end))
    }

    pub fn rekey_line(&mut self, old: LineId, new: LineId) {
        if let Some(mut line) = self.lines.remove(&old) {
            line.id = new;
            self.lines.insert(new, line);
        }
    }

    // --- drawings ---

    pub fn insert_drawing(&mut self, drawing: Drawing) {
        let id = drawing.id;
        if !self.drawing_order.contains(&id) {
            self.drawing_order.push(id);
        }
        self.drawings.insert(id, drawing);
    }

    /// Insert at a paint-order position, clamped to the end.
    pub fn insert_drawing_at(&mut self, drawing: Drawing, index: usize) {
        let id = drawing.id;
        self.drawing_order.retain(|&d| d != id);
        let index = index.min(self.drawing_order.len());
        self.drawing_order.insert(index, id);
        self.drawings.insert(id, drawing);
    }

    pub fn drawing_index(&self, id: DrawingId) -> Option<usize> {
        self.drawing_order.iter().position(|&d| d == id)
    }

    pub fn remove_drawing(&mut self, id: DrawingId) -> Option<Drawing> {
        self.drawing_order.retain(|&d| d != id);
        self.drawings.remove(&id)
    }

    pub fn drawing(&self, id: DrawingId) -> Option<&Drawing> {
        self.drawings.get(&id)
    }

    pub fn drawing_mut(&mut self, id: DrawingId) -> Option<&mut Drawing> {
        self.drawings.get_mut(&id)
    }

    /// Drawings of a context in paint order.
    pub fn drawings_in(&self, context: Context) -> impl Iterator<Item = &Drawing> {
        self.drawing_order
            .iter()
            .filter_map(|id| self.drawings.get(id))
            .filter(move |d| d.context == context)
    }

    pub fn rekey_drawing(&mut self, old: DrawingId, new: DrawingId) {
        if let Some(mut drawing) = self.drawings.remove(&old) {
            drawing.id = new;
            self.drawings.insert(new, drawing);
        }
        for id in &mut self.drawing_order {
            if *id == old {
                *id = new;
            }
        }
    }

    // --- queries ---

    /// Union of every entity's bounds in `context`.
    pub fn bounds(&self, context: Context) -> Option<Bounds> {
        let nodes = self
            .nodes_in(context)
            .map(|n| Bounds::new(n.position.lat, n.position.lat, n.position.lng, n.position.lng));
        let lines = self
            .lines_in(context)
            .filter_map(|line| self.line_path(line).and_then(|p| Bounds::from_points(&p)));
        let drawings = self
            .drawings_in(context)
            .filter_map(|d| bounds_of(&d.geometry, context));
        bounds_union(nodes.chain(lines).chain(drawings))
    }

    /// Topmost visible drawing whose pixel bounds contain `pixel`.
    pub fn drawing_at(
        &self,
        context: Context,
        pixel: Point,
        projector: &dyn Projector,
        tolerance: f64,
    ) -> Option<DrawingId> {
        let hits: Vec<DrawingId> = self
            .drawings_in(context)
            .filter(|d| d.visible)
            .filter(|d| {
                bounds_of(&d.geometry, context).is_some_and(|b| {
                    let a = projector.project(b.north_west());
                    let c = projector.project(b.south_east());
                    Rect::from_points(a, c)
                        .inflate(tolerance, tolerance)
                        .contains(pixel)
                })
            })
            .map(|d| d.id)
            .collect();
        hits.last().copied()
    }

    /// Closest node marker within `tolerance` pixels.
    pub fn node_at(
        &self,
        context: Context,
        pixel: Point,
        projector: &dyn Projector,
        tolerance: f64,
    ) -> Option<NodeId> {
        self.nodes_in(context)
            .map(|n| (n.id, projector.project(n.position).distance(pixel)))
            .filter(|(_, d)| *d <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, _)| id)
    }

    /// Closest line segment within `tolerance` pixels.
    pub fn line_at(
        &self,
        context: Context,
        pixel: Point,
        projector: &dyn Projector,
        tolerance: f64,
    ) -> Option<LineHit> {
        let mut best: Option<(LineHit, f64)> = None;
        for line in self.lines_in(context) {
            let Some(path) = self.line_path(line) else {
                continue;
            };
            let screen: Vec<Point> = path.iter().map(|p| projector.project(*p)).collect();
            for (segment, w) in screen.windows(2).enumerate() {
                let d = point_to_segment_dist(pixel, w[0], w[1]);
                if d <= tolerance && best.is_none_or(|(_, bd)| d < bd) {
                    best = Some((
                        LineHit {
                            line_id: line.id,
                            segment,
                        },
                        d,
                    ));
                }
            }
        }
        best.map(|(hit, _)| hit)
    }

    /// Serialize the document to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize a document from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
