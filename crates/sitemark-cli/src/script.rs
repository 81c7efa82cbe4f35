//! Editing scripts.
//!
//! A script is a viewport plus a list of steps. Steps are expressed in
//! screen pixels and replayed through a [`Session`] as pointer and key
//! events, the way a user would perform them.

use kurbo::{Point, Size};
use serde::Deserialize;
use sitemark_core::model::NodeTypeId;
use sitemark_core::{
    Bounds, CanvasProjector, Context, Document, DrawTool, Editor, GeoPoint, KeyEvent,
    MercatorProjector, Modifiers, Mode, MouseButton, NodeType, Outcome, PersistError, Persistence,
    PointerEvent, PointerPosition, Projector, Session, SessionError, Surface,
};
use std::fmt;
use thiserror::Error;

/// Node type seeded into projects that have none.
pub const DEFAULT_NODE_TYPE: (&str, &str) = ("Manhole", "MH");

/// Script errors.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Failed to parse script: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("No node with reference {0}")]
    UnknownReference(String),
    #[error("No node type named {0}")]
    UnknownNodeType(String),
    #[error("{0} step needs at least one point")]
    NoPoints(&'static str),
}

fn default_viewport() -> [f64; 2] {
    [800.0, 600.0]
}

/// A parsed editing script.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub context: Context,
    /// Viewport size in pixels.
    #[serde(default = "default_viewport")]
    pub viewport: [f64; 2],
    /// Map view center. Ignored on the canvas, whose origin sits mid-viewport.
    #[serde(default)]
    pub center: GeoPoint,
    /// Defaults to 17 on the map and 0 on the canvas.
    #[serde(default)]
    pub zoom: Option<f64>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_json(json: &str) -> Result<Self, ScriptError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ScriptError> {
        let json = std::fs::read_to_string(path).map_err(|source| ScriptError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }
}

/// One scripted user action. Points are `[x, y]` viewport pixels.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Step {
    /// Click once in add-node mode. `type` matches a node type's name or
    /// reference prefix.
    AddNode {
        #[serde(rename = "type", default)]
        node_type: Option<String>,
        at: [f64; 2],
    },
    /// Click the start node, then the end node, in line mode.
    AddLine { from: String, to: String },
    /// Drag tools press on the first point, move through the rest and
    /// release on the last. Click tools click every point, then press Enter.
    Draw { tool: DrawTool, points: Vec<[f64; 2]> },
    /// Press, move and release in view mode: moves nodes and waypoints,
    /// moves drawings, or drags a selected drawing's handle.
    Drag {
        from: [f64; 2],
        to: [f64; 2],
        #[serde(default)]
        shift: bool,
    },
    /// Click in view mode: selects or deselects drawings.
    Click {
        at: [f64; 2],
        #[serde(default)]
        shift: bool,
    },
    /// A key press, e.g. `{"op": "key", "key": "z", "ctrl": true}`.
    Key {
        key: String,
        #[serde(default)]
        ctrl: bool,
        #[serde(default)]
        shift: bool,
    },
    Undo,
    Redo,
    DeleteNode { reference: String },
    /// Fit the view to everything in the context.
    Fit,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::AddNode { .. } => "add-node",
            Step::AddLine { .. } => "add-line",
            Step::Draw { .. } => "draw",
            Step::Drag { .. } => "drag",
            Step::Click { .. } => "click",
            Step::Key { .. } => "key",
            Step::Undo => "undo",
            Step::Redo => "redo",
            Step::DeleteNode { .. } => "delete-node",
            Step::Fit => "fit",
        }
    }
}

/// Add the default node type if the catalog is empty.
pub fn seed_node_types(document: &mut Document) -> bool {
    if !document.node_types.is_empty() {
        return false;
    }
    let (name, prefix) = DEFAULT_NODE_TYPE;
    document.add_node_type(NodeType::new(name, prefix));
    true
}

/// The host's view of the document.
enum View {
    Canvas(CanvasProjector),
    Map(MercatorProjector),
}

impl View {
    fn new(script: &Script) -> Self {
        let size = Size::new(script.viewport[0], script.viewport[1]);
        match script.context {
            Context::Canvas => {
                let mut projector = CanvasProjector::new(size);
                projector.zoom = script.zoom.unwrap_or(0.0);
                View::Canvas(projector)
            }
            Context::Map => {
                View::Map(MercatorProjector::new(script.center, script.zoom.unwrap_or(17.0), size))
            }
        }
    }

    fn projector(&self) -> &dyn Projector {
        match self {
            View::Canvas(p) => p,
            View::Map(p) => p,
        }
    }

    fn fit(&mut self, bounds: &Bounds) {
        match self {
            View::Canvas(p) => p.fit_bounds(bounds),
            View::Map(p) => p.fit_bounds(bounds),
        }
    }
}

/// What a finished script left behind.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub context: Context,
    pub nodes: usize,
    pub lines: usize,
    pub drawings: usize,
    pub history: usize,
    pub can_undo: bool,
    pub can_redo: bool,
    pub steps: usize,
    pub failures: usize,
    pub fit: Option<Bounds>,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n=== {} ===", self.context.name())?;
        writeln!(f, "  nodes:     {}", self.nodes)?;
        writeln!(f, "  lines:     {}", self.lines)?;
        writeln!(f, "  drawings:  {}", self.drawings)?;
        writeln!(
            f,
            "  history:   {} commands (undo: {}, redo: {})",
            self.history,
            if self.can_undo { "yes" } else { "no" },
            if self.can_redo { "yes" } else { "no" },
        )?;
        writeln!(f, "  steps:     {} ({} failed)", self.steps, self.failures)?;
        match &self.fit {
            Some(b) => write!(
                f,
                "  fit:       N {:.6} S {:.6} E {:.6} W {:.6}",
                b.north, b.south, b.east, b.west
            ),
            None => write!(f, "  fit:       empty"),
        }
    }
}

/// Replays scripts through a session.
pub struct Runner<P: Persistence, S: Surface> {
    session: Session<P, S>,
    view: View,
    steps: usize,
    failures: usize,
}

impl<P: Persistence, S: Surface> Runner<P, S> {
    pub fn new(editor: Editor<P>, surface: S, script: &Script) -> Self {
        Self {
            session: Session::new(editor, surface, script.context),
            view: View::new(script),
            steps: 0,
            failures: 0,
        }
    }

    pub fn session(&self) -> &Session<P, S> {
        &self.session
    }

    /// Run every step. A failing step is logged and counted; the rest still
    /// run, as they would for a user who saw the error and carried on.
    pub async fn run(&mut self, steps: &[Step]) -> Summary {
        for (i, step) in steps.iter().enumerate() {
            self.steps += 1;
            match self.run_step(step).await {
                Ok(outcome) => log::debug!("Step {} ({}): {:?}", i + 1, step.name(), outcome),
                Err(e) => {
                    self.failures += 1;
                    log::warn!("Step {} ({}) failed: {}", i + 1, step.name(), e);
                }
            }
        }
        self.summary()
    }

    pub fn summary(&self) -> Summary {
        let context = self.session.context();
        let editor = self.session.editor();
        let document = editor.document();
        Summary {
            context,
            nodes: document.nodes_in(context).count(),
            lines: document.lines_in(context).count(),
            drawings: document.drawings_in(context).count(),
            history: editor.history().len(),
            can_undo: editor.can_undo(),
            can_redo: editor.can_redo(),
            steps: self.steps,
            failures: self.failures,
            fit: self.session.fit_viewport(),
        }
    }

    pub async fn run_step(&mut self, step: &Step) -> Result<Outcome, ScriptError> {
        match step {
            Step::AddNode { node_type, at } => {
                let node_type = self.node_type(node_type.as_deref())?;
                self.session.set_mode(Mode::AddNode { node_type });
                self.click(pixel(*at), Modifiers::NONE).await
            }
            Step::AddLine { from, to } => {
                let start = self.node_pixel(from)?;
                let end = self.node_pixel(to)?;
                self.session.set_mode(Mode::DrawLine);
                self.click(start, Modifiers::NONE).await?;
                self.click(end, Modifiers::NONE).await
            }
            Step::Draw { tool, points } => self.draw(*tool, points).await,
            Step::Drag { from, to, shift } => {
                self.session.set_mode(Mode::View);
                let modifiers = shift_if(*shift);
                self.press(pixel(*from), modifiers).await?;
                self.motion(pixel(*to), modifiers).await?;
                self.release(pixel(*to), modifiers).await
            }
            Step::Click { at, shift } => {
                self.session.set_mode(Mode::View);
                self.click(pixel(*at), shift_if(*shift)).await
            }
            Step::Key { key, ctrl, shift } => {
                let modifiers = Modifiers {
                    ctrl: *ctrl,
                    shift: *shift,
                    ..Modifiers::NONE
                };
                let event = KeyEvent::new(key.as_str(), modifiers);
                Ok(self.session.handle_key(&event, self.view.projector()).await?)
            }
            Step::Undo => Ok(self.session.undo(self.view.projector()).await?),
            Step::Redo => Ok(self.session.redo(self.view.projector()).await?),
            Step::DeleteNode { reference } => {
                let context = self.session.context();
                let id = self
                    .session
                    .editor()
                    .document()
                    .node_by_reference(context, reference)
                    .ok_or_else(|| ScriptError::UnknownReference(reference.clone()))?;
                let result = self.session.editor_mut().delete_node(id).await;
                self.session.surface_mut().refresh(context);
                result.map_err(SessionError::from)?;
                Ok(Outcome::Nothing)
            }
            Step::Fit => {
                if let Some(bounds) = self.session.fit_viewport() {
                    self.view.fit(&bounds);
                    let projector = self.view.projector();
                    log::info!(
                        "Fitted view to {:.6}, {:.6} at zoom {:.2}",
                        projector.center().lat,
                        projector.center().lng,
                        projector.zoom()
                    );
                }
                Ok(Outcome::Nothing)
            }
        }
    }

    async fn draw(&mut self, tool: DrawTool, points: &[[f64; 2]]) -> Result<Outcome, ScriptError> {
        self.session.set_mode(Mode::Drawing(tool));
        let (first, rest) = points.split_first().ok_or(ScriptError::NoPoints("draw"))?;
        if tool.is_drag() {
            self.press(pixel(*first), Modifiers::NONE).await?;
            for point in rest {
                self.motion(pixel(*point), Modifiers::NONE).await?;
            }
            let last = rest.last().unwrap_or(first);
            return self.release(pixel(*last), Modifiers::NONE).await;
        }
        let mut outcome = Outcome::Nothing;
        for point in points {
            outcome = self.click(pixel(*point), Modifiers::NONE).await?;
        }
        if tool.is_click_sequence() {
            let enter = KeyEvent::new("Enter", Modifiers::NONE);
            outcome = self.session.handle_key(&enter, self.view.projector()).await?;
        }
        Ok(outcome)
    }

    fn node_type(&self, name: Option<&str>) -> Result<NodeTypeId, ScriptError> {
        let document = self.session.editor().document();
        let wanted = name.unwrap_or(DEFAULT_NODE_TYPE.1);
        document
            .node_types
            .values()
            .find(|t| {
                t.name.eq_ignore_ascii_case(wanted) || t.reference_prefix.eq_ignore_ascii_case(wanted)
            })
            .map(|t| t.id)
            .ok_or_else(|| ScriptError::UnknownNodeType(wanted.to_string()))
    }

    fn node_pixel(&self, reference: &str) -> Result<Point, ScriptError> {
        let context = self.session.context();
        let document = self.session.editor().document();
        document
            .node_by_reference(context, reference)
            .and_then(|id| document.node(id))
            .map(|node| self.view.projector().project(node.position))
            .ok_or_else(|| ScriptError::UnknownReference(reference.to_string()))
    }

    fn position(&self, pixel: Point) -> PointerPosition {
        PointerPosition::new(pixel, self.view.projector().unproject(pixel))
    }

    async fn press(&mut self, at: Point, modifiers: Modifiers) -> Result<Outcome, ScriptError> {
        let event = PointerEvent::Down {
            position: self.position(at),
            button: MouseButton::Left,
            modifiers,
        };
        Ok(self.session.handle_pointer(event, self.view.projector()).await?)
    }

    async fn motion(&mut self, at: Point, modifiers: Modifiers) -> Result<Outcome, ScriptError> {
        let event = PointerEvent::Move {
            position: self.position(at),
            modifiers,
        };
        Ok(self.session.handle_pointer(event, self.view.projector()).await?)
    }

    async fn release(&mut self, at: Point, modifiers: Modifiers) -> Result<Outcome, ScriptError> {
        let event = PointerEvent::Up {
            position: self.position(at),
            button: MouseButton::Left,
            modifiers,
        };
        Ok(self.session.handle_pointer(event, self.view.projector()).await?)
    }

    /// Press and release in place. Reports whichever half did something.
    async fn click(&mut self, at: Point, modifiers: Modifiers) -> Result<Outcome, ScriptError> {
        let down = self.press(at, modifiers).await?;
        let up = self.release(at, modifiers).await?;
        Ok(if up == Outcome::Nothing { down } else { up })
    }
}

fn pixel([x, y]: [f64; 2]) -> Point {
    Point::new(x, y)
}

fn shift_if(shift: bool) -> Modifiers {
    if shift { Modifiers::shift() } else { Modifiers::NONE }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::LogSurface;
    use sitemark_core::{EditorConfig, MemoryPersistence};
    use std::sync::Arc;
    use uuid::Uuid;

    fn runner(json: &str) -> (Runner<MemoryPersistence, LogSurface>, Script) {
        let script = Script::from_json(json).unwrap();
        let mut document = Document::new(Uuid::new_v4());
        seed_node_types(&mut document);
        let editor = Editor::new(document, Arc::new(MemoryPersistence::new()), EditorConfig::default());
        (Runner::new(editor, LogSurface::new(), &script), script)
    }

    fn run(json: &str) -> Summary {
        let (mut runner, script) = runner(json);
        pollster::block_on(runner.run(&script.steps))
    }

    #[test]
    fn test_parse_steps() {
        let script = Script::from_json(
            r#"{"context": "canvas", "steps": [
                {"op": "add-node", "type": "MH", "at": [100, 100]},
                {"op": "add-line", "from": "MH1", "to": "MH2"},
                {"op": "draw", "tool": "rectangle", "points": [[0, 0], [10, 10]]},
                {"op": "key", "key": "z", "ctrl": true},
                {"op": "undo"},
                {"op": "fit"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(script.context, Context::Canvas);
        assert_eq!(script.viewport, [800.0, 600.0]);
        let names: Vec<_> = script.steps.iter().map(Step::name).collect();
        assert_eq!(names, ["add-node", "add-line", "draw", "key", "undo", "fit"]);
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let err = Script::from_json(r#"{"steps": [{"op": "explode"}]}"#).unwrap_err();
        assert!(matches!(err, ScriptError::Parse(_)));
    }

    #[test]
    fn test_seed_only_when_empty() {
        let mut document = Document::new(Uuid::new_v4());
        assert!(seed_node_types(&mut document));
        assert!(!seed_node_types(&mut document));
        assert_eq!(document.node_types.len(), 1);
    }

    #[test]
    fn test_nodes_and_line() {
        let summary = run(
            r#"{"context": "canvas", "steps": [
                {"op": "add-node", "at": [100, 100]},
                {"op": "add-node", "type": "manhole", "at": [300, 100]},
                {"op": "add-line", "from": "MH1", "to": "MH2"}
            ]}"#,
        );
        assert_eq!(summary.nodes, 2);
        assert_eq!(summary.lines, 1);
        assert_eq!(summary.history, 3);
        assert_eq!(summary.failures, 0);
    }

    #[test]
    fn test_delete_node_cascades_and_undoes() {
        let summary = run(
            r#"{"context": "canvas", "steps": [
                {"op": "add-node", "at": [100, 100]},
                {"op": "add-node", "at": [300, 100]},
                {"op": "add-line", "from": "MH1", "to": "MH2"},
                {"op": "delete-node", "reference": "MH1"}
            ]}"#,
        );
        assert_eq!((summary.nodes, summary.lines), (1, 0));

        let summary = run(
            r#"{"context": "canvas", "steps": [
                {"op": "add-node", "at": [100, 100]},
                {"op": "add-node", "at": [300, 100]},
                {"op": "add-line", "from": "MH1", "to": "MH2"},
                {"op": "delete-node", "reference": "MH1"},
                {"op": "undo"}
            ]}"#,
        );
        assert_eq!((summary.nodes, summary.lines), (2, 1));
        assert!(summary.can_redo);
    }

    #[test]
    fn test_draw_and_move_drawing() {
        let (mut runner, script) = runner(
            r#"{"context": "canvas", "steps": [
                {"op": "draw", "tool": "rectangle", "points": [[100, 100], [150, 150], [200, 200]]},
                {"op": "drag", "from": [150, 150], "to": [250, 150]}
            ]}"#,
        );
        let summary = pollster::block_on(runner.run(&script.steps));
        assert_eq!(summary.drawings, 1);
        assert_eq!(summary.history, 2);
        let fit = summary.fit.unwrap();
        // Canvas zoom 0: one unit per pixel, origin mid-viewport. The
        // rectangle spans x 100..200 and was moved 100px right.
        assert!(fit.west > -210.0 && fit.west < -200.0);
        assert!(fit.east > -100.0 && fit.east < -90.0);
        assert!(!runner.session().surface().is_captured());
    }

    #[test]
    fn test_click_sequence_finishes_on_enter() {
        let summary = run(
            r#"{"context": "canvas", "steps": [
                {"op": "draw", "tool": "building", "points": [[100, 100], [200, 100], [150, 50]]},
                {"op": "draw", "tool": "text", "points": [[400, 400]]}
            ]}"#,
        );
        assert_eq!(summary.drawings, 2);
    }

    #[test]
    fn test_failures_are_counted() {
        let summary = run(
            r#"{"context": "canvas", "steps": [
                {"op": "add-line", "from": "MH1", "to": "MH9"},
                {"op": "add-node", "type": "Valve", "at": [1, 1]},
                {"op": "draw", "tool": "polygon", "points": []},
                {"op": "add-node", "at": [10, 10]}
            ]}"#,
        );
        assert_eq!(summary.steps, 4);
        assert_eq!(summary.failures, 3);
        assert_eq!(summary.nodes, 1);
    }

    #[test]
    fn test_undo_redo_shortcuts() {
        let summary = run(
            r#"{"context": "canvas", "steps": [
                {"op": "add-node", "at": [100, 100]},
                {"op": "key", "key": "z", "ctrl": true},
                {"op": "key", "key": "z", "ctrl": true, "shift": true}
            ]}"#,
        );
        assert_eq!(summary.nodes, 1);
        assert!(!summary.can_redo);
    }

    #[test]
    fn test_map_fit() {
        let (mut runner, script) = runner(
            r#"{"context": "map", "center": {"lat": 51.5, "lng": -0.12}, "zoom": 16, "steps": [
                {"op": "add-node", "at": [100, 100]},
                {"op": "add-node", "at": [700, 500]},
                {"op": "fit"}
            ]}"#,
        );
        let summary = pollster::block_on(runner.run(&script.steps));
        assert_eq!(summary.failures, 0);
        let fit = summary.fit.unwrap();
        assert!(fit.contains(GeoPoint::new(51.5, -0.12)));
    }
}
