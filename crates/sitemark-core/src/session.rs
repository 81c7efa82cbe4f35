//! Interaction mode and pointer routing.
//!
//! A [`Session`] binds an [`Editor`] to a rendering [`Surface`] in one
//! coordinate context and turns raw pointer and key events into editor
//! operations according to the current [`Mode`].

use crate::editor::{DrawingDraft, Editor, EditorError, EditorResult, LineDraft, NodeDraft};
use crate::geometry::{Bounds, Context, GeoPoint, Geometry};
use crate::handles::{HandleCache, hit_test_handles};
use crate::input::{KeyEvent, MouseButton, PointerEvent, PointerPosition};
use crate::model::{DrawingId, LineId, NodeId, NodeTypeId, SectionLink, Style};
use crate::persistence::{PersistError, Persistence, ViewportSaver, ViewportState};
use crate::projection::Projector;
use crate::shortcuts::{ShortcutAction, ShortcutRegistry};
use crate::surface::{EntityKind, Paint, Surface};
use crate::tools::{DrawTool, ToolManager};
use crate::transform::{DragTarget, MOVE_THRESHOLD_PX, TransformController, TransformError};
use kurbo::Point;
use std::collections::BTreeSet;
use thiserror::Error;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant};

/// Current interaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Select, move and transform existing entities.
    #[default]
    View,
    /// Each click places a node of this type.
    AddNode { node_type: NodeTypeId },
    /// Click a start node, then an end node.
    DrawLine,
    Drawing(DrawTool),
}

/// Session errors.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Editor(#[from] EditorError),
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error("Drawing {0} is not in this view")]
    NotInView(DrawingId),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// What an event did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Nothing,
    Selected(Option<DrawingId>),
    MultiSelected { drawing_id: DrawingId, selected: bool },
    DragStarted(DrawingId),
    Previewed,
    Committed(DrawingId),
    NodeCreated(NodeId),
    NodeGrabbed(NodeId),
    NodeMoved(NodeId),
    LineStarted(NodeId),
    LineCreated(LineId),
    WaypointGrabbed { line_id: LineId },
    WaypointInserted { line_id: LineId, index: usize },
    WaypointMoved { line_id: LineId, index: usize },
    DrawingCreated(DrawingId),
    Deleted(Vec<DrawingId>),
    Undone(bool),
    Redone(bool),
    Cancelled,
}

#[derive(Debug, Clone, Copy)]
struct NodeDrag {
    node_id: NodeId,
    start: Point,
    current: GeoPoint,
    moved: bool,
}

#[derive(Debug, Clone, Copy)]
enum WaypointTarget {
    Existing(usize),
    /// Insert into this segment on release.
    Insert(usize),
}

#[derive(Debug, Clone, Copy)]
struct WaypointDrag {
    line_id: LineId,
    target: WaypointTarget,
    start: Point,
    current: GeoPoint,
    moved: bool,
}

/// One user's editing session over one coordinate context.
pub struct Session<P: Persistence, S: Surface> {
    editor: Editor<P>,
    surface: S,
    context: Context,
    mode: Mode,
    active_drawing: Option<DrawingId>,
    multi_select: BTreeSet<DrawingId>,
    handles: HandleCache,
    transform: TransformController,
    tools: ToolManager,
    line_start: Option<NodeId>,
    pending_section: Option<SectionLink>,
    node_drag: Option<NodeDrag>,
    waypoint_drag: Option<WaypointDrag>,
    viewport: ViewportSaver,
    captured: bool,
}

impl<P: Persistence, S: Surface> Session<P, S> {
    pub fn new(editor: Editor<P>, surface: S, context: Context) -> Self {
        let config = editor.config();
        let transform = TransformController::new(config.angle_snap_degrees);
        let viewport = ViewportSaver::new(Duration::from_millis(config.viewport_debounce_ms));
        Self {
            editor,
            surface,
            context,
            mode: Mode::View,
            active_drawing: None,
            multi_select: BTreeSet::new(),
            handles: HandleCache::new(),
            transform,
            tools: ToolManager::default(),
            line_start: None,
            pending_section: None,
            node_drag: None,
            waypoint_drag: None,
            viewport,
            captured: false,
        }
    }

    pub fn editor(&self) -> &Editor<P> {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut Editor<P> {
        &mut self.editor
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn context(&self) -> Context {
        self.context
    }

    /// Switch coordinate space. Drops the selection and any interaction.
    pub fn set_context(&mut self, context: Context) {
        if self.context == context {
            return;
        }
        self.abort_interactions();
        self.deselect();
        self.context = context;
        self.surface.refresh(context);
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        if self.mode == mode {
            return;
        }
        log::debug!("Mode {:?} -> {:?}", self.mode, mode);
        self.abort_interactions();
        if let Mode::Drawing(tool) = mode {
            self.tools.set_tool(tool);
        }
        if mode != Mode::View {
            self.deselect();
        }
        self.mode = mode;
    }

    /// Section to link the next created line to.
    pub fn set_pending_section(&mut self, section: Option<SectionLink>) {
        self.pending_section = section;
    }

    pub fn pending_section(&self) -> Option<&SectionLink> {
        self.pending_section.as_ref()
    }

    /// Node picked as the start of the line being drawn.
    pub fn line_start(&self) -> Option<NodeId> {
        self.line_start
    }

    pub fn is_dragging(&self) -> bool {
        !self.transform.is_idle() || self.node_drag.is_some() || self.waypoint_drag.is_some()
    }

    // --- selection ---

    pub fn active_drawing(&self) -> Option<DrawingId> {
        self.active_drawing
    }

    /// Make `id` the active drawing and show its handles.
    pub fn select_drawing(&mut self, id: DrawingId, projector: &dyn Projector) -> SessionResult<()> {
        let in_view = self
            .editor
            .document()
            .drawing(id)
            .is_some_and(|d| d.context == self.context);
        if !in_view {
            return Err(SessionError::NotInView(id));
        }
        self.active_drawing = Some(id);
        self.refresh_handles(projector);
        Ok(())
    }

    pub fn deselect(&mut self) {
        if self.active_drawing.take().is_some() {
            self.handles.invalidate();
            self.surface.show_handles(&[]);
        }
        self.multi_select.clear();
    }

    /// Add or remove a drawing from the multi-selection. Returns whether it
    /// is selected afterwards.
    pub fn toggle_multi_select(&mut self, id: DrawingId) -> bool {
        if self.multi_select.remove(&id) {
            false
        } else {
            self.multi_select.insert(id);
            true
        }
    }

    /// Active drawing plus the multi-selection, without duplicates.
    pub fn selected(&self) -> Vec<DrawingId> {
        let mut ids: Vec<_> = self.active_drawing.into_iter().collect();
        ids.extend(self.multi_select.iter().filter(|id| Some(**id) != self.active_drawing));
        ids
    }

    /// Bounds to fit the view to every entity in the current context.
    pub fn fit_viewport(&self) -> Option<Bounds> {
        self.editor.fit_bounds(self.context)
    }

    fn refresh_handles(&mut self, projector: &dyn Projector) {
        let drawing = self
            .active_drawing
            .and_then(|id| self.editor.document().drawing(id))
            .cloned();
        match drawing {
            Some(drawing) => {
                let offset = self.editor.config().rotate_handle_offset_px;
                let handles =
                    self.handles
                        .get(drawing.id, &drawing.geometry, drawing.context, projector, offset);
                self.surface.show_handles(handles);
            }
            None => {
                if self.active_drawing.take().is_some() {
                    self.handles.invalidate();
                    self.surface.show_handles(&[]);
                }
            }
        }
    }

    // --- viewport ---

    /// Record a pan or zoom. Written after the view has been still for the
    /// debounce interval.
    pub fn note_viewport(&mut self, center: GeoPoint, zoom: f64, now: Instant) {
        self.viewport.note_change(
            ViewportState {
                context: self.context,
                center,
                zoom,
            },
            now,
        );
    }

    /// Write the pending viewport if it is due.
    pub async fn flush_viewport(&mut self, now: Instant) -> SessionResult<bool> {
        let project = self.editor.project_id();
        let persistence = self.editor.persistence().as_ref();
        Ok(self.viewport.flush_due(persistence, project, now).await?)
    }

    // --- capture ---

    fn capture(&mut self) {
        if !self.captured {
            self.captured = true;
            self.surface.capture_pointer();
        }
    }

    fn release(&mut self) {
        if self.captured {
            self.captured = false;
            self.surface.release_pointer();
        }
    }

    /// Drop every in-flight interaction without committing anything.
    fn abort_interactions(&mut self) -> bool {
        let mut aborted = self.transform.cancel();
        aborted |= self.node_drag.take().is_some();
        aborted |= self.waypoint_drag.take().is_some();
        aborted |= self.line_start.take().is_some();
        if self.tools.is_active() {
            self.tools.cancel();
            aborted = true;
        }
        if aborted {
            self.surface.clear_preview();
        }
        self.release();
        aborted
    }

    /// Alert on failure. Local state may have changed even on error, so the
    /// view is refreshed either way.
    fn report<T>(&mut self, result: EditorResult<T>) -> SessionResult<T> {
        result.map_err(|e| {
            self.surface.alert(&e.to_string());
            self.surface.refresh(self.context);
            e.into()
        })
    }

    // --- pointer routing ---

    pub async fn handle_pointer(
        &mut self,
        event: PointerEvent,
        projector: &dyn Projector,
    ) -> SessionResult<Outcome> {
        match event {
            PointerEvent::Down {
                position,
                button: MouseButton::Left,
                modifiers,
            } => {
                if self.is_dragging() {
                    return Ok(Outcome::Nothing);
                }
                match self.mode {
                    Mode::View => self.view_down(position, modifiers.shift, projector),
                    Mode::AddNode { node_type } => self.add_node_down(node_type, position).await,
                    Mode::DrawLine => self.draw_line_down(position, projector).await,
                    Mode::Drawing(_) => self.tool_down(position).await,
                }
            }
            PointerEvent::Down { .. } => Ok(Outcome::Nothing),
            PointerEvent::Move {
                position,
                modifiers,
            } => Ok(self.pointer_move(position, modifiers.shift, projector)),
            PointerEvent::Up {
                position,
                modifiers,
                ..
            } => self.pointer_up(position, modifiers.shift, projector).await,
            PointerEvent::Cancel => {
                let aborted = self.abort_interactions();
                Ok(if aborted {
                    Outcome::Cancelled
                } else {
                    Outcome::Nothing
                })
            }
        }
    }

    fn tolerance(&self) -> f64 {
        self.editor.config().handle_hit_tolerance_px
    }

    fn view_down(
        &mut self,
        position: PointerPosition,
        toggle: bool,
        projector: &dyn Projector,
    ) -> SessionResult<Outcome> {
        let tolerance = self.tolerance();

        if let Some(drawing) = self
            .active_drawing
            .and_then(|id| self.editor.document().drawing(id))
            .cloned()
        {
            let offset = self.editor.config().rotate_handle_offset_px;
            let handles =
                self.handles
                    .get(drawing.id, &drawing.geometry, drawing.context, projector, offset);
            if let Some(handle) = hit_test_handles(handles, position.pixel, projector, tolerance) {
                self.transform
                    .pointer_down(&drawing, DragTarget::Handle(handle), position)?;
                self.capture();
                return Ok(Outcome::DragStarted(drawing.id));
            }
        }

        let document = self.editor.document();
        if let Some(node_id) = document.node_at(self.context, position.pixel, projector, tolerance) {
            self.node_drag = Some(NodeDrag {
                node_id,
                start: position.pixel,
                current: position.geo,
                moved: false,
            });
            self.capture();
            return Ok(Outcome::NodeGrabbed(node_id));
        }

        if let Some((line_id, index)) = self.waypoint_at(position.pixel, projector, tolerance) {
            self.begin_waypoint_drag(line_id, WaypointTarget::Existing(index), position);
            return Ok(Outcome::WaypointGrabbed { line_id });
        }

        let document = self.editor.document();
        if let Some(hit) = document.line_at(self.context, position.pixel, projector, tolerance) {
            self.begin_waypoint_drag(hit.line_id, WaypointTarget::Insert(hit.segment), position);
            return Ok(Outcome::WaypointGrabbed {
                line_id: hit.line_id,
            });
        }

        let hit = self
            .editor
            .document()
            .drawing_at(self.context, position.pixel, projector, 0.0);
        match hit {
            Some(id) if toggle => {
                let selected = self.toggle_multi_select(id);
                Ok(Outcome::MultiSelected {
                    drawing_id: id,
                    selected,
                })
            }
            Some(id) => {
                if self.active_drawing != Some(id) {
                    self.multi_select.clear();
                    self.select_drawing(id, projector)?;
                }
                if let Some(drawing) = self.editor.document().drawing(id).cloned() {
                    self.transform
                        .pointer_down(&drawing, DragTarget::Body, position)?;
                    self.capture();
                }
                Ok(Outcome::Selected(Some(id)))
            }
            None => {
                self.deselect();
                Ok(Outcome::Selected(None))
            }
        }
    }

    fn waypoint_at(
        &self,
        pixel: Point,
        projector: &dyn Projector,
        tolerance: f64,
    ) -> Option<(LineId, usize)> {
        self.editor
            .document()
            .lines_in(self.context)
            .flat_map(|line| {
                line.waypoints
                    .iter()
                    .enumerate()
                    .map(move |(i, w)| (line.id, i, projector.project(*w).distance(pixel)))
            })
            .filter(|(_, _, d)| *d <= tolerance)
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(line_id, index, _)| (line_id, index))
    }

    fn begin_waypoint_drag(
        &mut self,
        line_id: LineId,
        target: WaypointTarget,
        position: PointerPosition,
    ) {
        self.waypoint_drag = Some(WaypointDrag {
            line_id,
            target,
            start: position.pixel,
            current: position.geo,
            moved: false,
        });
        self.capture();
    }

    async fn add_node_down(
        &mut self,
        node_type: NodeTypeId,
        position: PointerPosition,
    ) -> SessionResult<Outcome> {
        let draft = NodeDraft::new(node_type, position.geo, self.context);
        let result = self.editor.create_node(draft).await;
        let id = self.report(result)?;
        self.surface.entity_changed(EntityKind::Node, id);
        Ok(Outcome::NodeCreated(id))
    }

    async fn draw_line_down(
        &mut self,
        position: PointerPosition,
        projector: &dyn Projector,
    ) -> SessionResult<Outcome> {
        let tolerance = self.tolerance();
        let document = self.editor.document();
        let Some(node_id) = document.node_at(self.context, position.pixel, projector, tolerance)
        else {
            // Clicking a line while drawing lines adds a waypoint to it.
            if let Some(hit) = document.line_at(self.context, position.pixel, projector, tolerance)
            {
                let point = nearest_on_segment(
                    self.editor.document(),
                    hit.line_id,
                    hit.segment,
                    position.pixel,
                    projector,
                )
                .unwrap_or(position.geo);
                let result = self
                    .editor
                    .insert_waypoint(hit.line_id, hit.segment, point)
                    .await;
                let index = self.report(result)?;
                self.surface.entity_changed(EntityKind::Line, hit.line_id);
                return Ok(Outcome::WaypointInserted {
                    line_id: hit.line_id,
                    index,
                });
            }
            return Ok(Outcome::Nothing);
        };

        match self.line_start {
            None => {
                self.line_start = Some(node_id);
                Ok(Outcome::LineStarted(node_id))
            }
            Some(start) if start == node_id => Ok(Outcome::Nothing),
            Some(start) => {
                self.line_start = None;
                self.surface.clear_preview();
                let mut draft = LineDraft::new(start, node_id);
                draft.section = self.pending_section.clone();
                let result = self.editor.create_line(draft).await;
                let id = self.report(result)?;
                self.surface.entity_changed(EntityKind::Line, id);
                if self.pending_section.is_some() {
                    self.surface.entity_changed(EntityKind::Node, start);
                    self.surface.entity_changed(EntityKind::Node, node_id);
                }
                Ok(Outcome::LineCreated(id))
            }
        }
    }

    async fn tool_down(&mut self, position: PointerPosition) -> SessionResult<Outcome> {
        match self.tools.pointer_down(position) {
            Some(geometry) => self.create_drawing(geometry).await,
            None => {
                if self.tools.current_tool.is_drag() {
                    self.capture();
                }
                Ok(Outcome::Nothing)
            }
        }
    }

    async fn create_drawing(&mut self, geometry: Geometry) -> SessionResult<Outcome> {
        self.surface.clear_preview();
        let draft = DrawingDraft::new(geometry, self.context);
        let result = self.editor.create_drawing(draft).await;
        let id = self.report(result)?;
        self.surface.entity_changed(EntityKind::Drawing, id);
        Ok(Outcome::DrawingCreated(id))
    }

    fn pointer_move(
        &mut self,
        position: PointerPosition,
        snap: bool,
        projector: &dyn Projector,
    ) -> Outcome {
        if !self.transform.is_idle() {
            let style = self
                .transform
                .session()
                .and_then(|s| self.editor.document().drawing(s.drawing_id))
                .map(|d| d.style.preview())
                .unwrap_or_default();
            return match self.transform.pointer_move(position, snap, projector) {
                Some(preview) => {
                    self.surface
                        .show_preview(&preview.geometry, &Paint::from(&style));
                    Outcome::Previewed
                }
                None => Outcome::Nothing,
            };
        }

        if let Some(drag) = &mut self.node_drag {
            drag.current = position.geo;
            drag.moved |= drag.start.distance(position.pixel) >= MOVE_THRESHOLD_PX;
            if drag.moved {
                self.surface.show_point_preview(position.geo);
                return Outcome::Previewed;
            }
            return Outcome::Nothing;
        }

        if let Some(drag) = &mut self.waypoint_drag {
            drag.current = position.geo;
            drag.moved |= drag.start.distance(position.pixel) >= MOVE_THRESHOLD_PX;
            let drag = *drag;
            if !drag.moved {
                return Outcome::Nothing;
            }
            let path = self.waypoint_preview(&drag);
            if let Some(coordinates) = path {
                let style = self
                    .editor
                    .document()
                    .line(drag.line_id)
                    .map(|l| l.style.preview())
                    .unwrap_or_default();
                self.surface
                    .show_preview(&Geometry::Line { coordinates }, &Paint::from(&style));
            }
            return Outcome::Previewed;
        }

        if self.mode == Mode::DrawLine {
            let start = self
                .line_start
                .and_then(|id| self.editor.document().node(id))
                .map(|n| n.position);
            if let Some(start) = start {
                let rubber_band = Geometry::Line {
                    coordinates: vec![start, position.geo],
                };
                self.surface
                    .show_preview(&rubber_band, &Paint::from(&Style::default().preview()));
                return Outcome::Previewed;
            }
        }

        if self.tools.is_active() {
            self.tools.pointer_move(position);
            if let Some(geometry) = self.tools.preview(self.context) {
                self.surface
                    .show_preview(&geometry, &Paint::from(&Style::default().preview()));
                return Outcome::Previewed;
            }
        }
        Outcome::Nothing
    }

    /// Path of a line with the dragged waypoint at its current position.
    fn waypoint_preview(&self, drag: &WaypointDrag) -> Option<Vec<GeoPoint>> {
        let document = self.editor.document();
        let mut line = document.line(drag.line_id)?.clone();
        match drag.target {
            WaypointTarget::Existing(i) => *line.waypoints.get_mut(i)? = drag.current,
            WaypointTarget::Insert(segment) => {
                let index = segment.min(line.waypoints.len());
                line.waypoints.insert(index, drag.current);
            }
        }
        document.line_path(&line)
    }

    async fn pointer_up(
        &mut self,
        position: PointerPosition,
        snap: bool,
        projector: &dyn Projector,
    ) -> SessionResult<Outcome> {
        if !self.transform.is_idle() {
            let commit = self.transform.pointer_up(position, snap, projector);
            self.release();
            self.surface.clear_preview();
            let Some(commit) = commit else {
                return Ok(Outcome::Nothing);
            };
            let id = commit.drawing_id;
            let result = self.editor.commit_transform(commit).await;
            self.refresh_handles(projector);
            self.report(result)?;
            self.surface.entity_changed(EntityKind::Drawing, id);
            return Ok(Outcome::Committed(id));
        }

        if let Some(mut drag) = self.node_drag.take() {
            drag.current = position.geo;
            drag.moved |= drag.start.distance(position.pixel) >= MOVE_THRESHOLD_PX;
            self.release();
            self.surface.clear_preview();
            if !drag.moved {
                return Ok(Outcome::Nothing);
            }
            let result = self.editor.move_node(drag.node_id, drag.current).await;
            self.report(result)?;
            self.surface.entity_changed(EntityKind::Node, drag.node_id);
            return Ok(Outcome::NodeMoved(drag.node_id));
        }

        if let Some(mut drag) = self.waypoint_drag.take() {
            drag.current = position.geo;
            drag.moved |= drag.start.distance(position.pixel) >= MOVE_THRESHOLD_PX;
            self.release();
            self.surface.clear_preview();
            let outcome = match drag.target {
                WaypointTarget::Existing(index) => {
                    if !drag.moved {
                        return Ok(Outcome::Nothing);
                    }
                    let result = self
                        .editor
                        .move_waypoint(drag.line_id, index, drag.current)
                        .await;
                    self.report(result)?;
                    Outcome::WaypointMoved {
                        line_id: drag.line_id,
                        index,
                    }
                }
                WaypointTarget::Insert(segment) => {
                    // A plain click lands exactly on the rendered line.
                    let point = if drag.moved {
                        drag.current
                    } else {
                        nearest_on_segment(
                            self.editor.document(),
                            drag.line_id,
                            segment,
                            position.pixel,
                            projector,
                        )
                        .unwrap_or(drag.current)
                    };
                    let result = self
                        .editor
                        .insert_waypoint(drag.line_id, segment, point)
                        .await;
                    let index = self.report(result)?;
                    Outcome::WaypointInserted {
                        line_id: drag.line_id,
                        index,
                    }
                }
            };
            self.surface.entity_changed(EntityKind::Line, drag.line_id);
            return Ok(outcome);
        }

        if let Mode::Drawing(_) = self.mode {
            let geometry = self.tools.pointer_up(position, self.context);
            self.release();
            if let Some(geometry) = geometry {
                return self.create_drawing(geometry).await;
            }
            if !self.tools.is_active() {
                self.surface.clear_preview();
            }
        }
        Ok(Outcome::Nothing)
    }

    // --- keyboard ---

    pub async fn handle_key(
        &mut self,
        event: &KeyEvent,
        projector: &dyn Projector,
    ) -> SessionResult<Outcome> {
        let Some(action) = ShortcutRegistry::resolve(event) else {
            return Ok(Outcome::Nothing);
        };
        log::trace!("Shortcut {action:?}");
        match action {
            ShortcutAction::Undo => self.undo(projector).await,
            ShortcutAction::Redo => self.redo(projector).await,
            ShortcutAction::Delete => self.delete_selected().await,
            ShortcutAction::Cancel => {
                if !self.abort_interactions() {
                    self.deselect();
                }
                Ok(Outcome::Cancelled)
            }
            ShortcutAction::Finish => match self.tools.finish(self.context) {
                Some(geometry) => self.create_drawing(geometry).await,
                None => Ok(Outcome::Nothing),
            },
        }
    }

    pub async fn undo(&mut self, projector: &dyn Projector) -> SessionResult<Outcome> {
        self.abort_interactions();
        let result = self.editor.undo().await;
        self.after_replay(projector);
        Ok(Outcome::Undone(self.report(result)?))
    }

    pub async fn redo(&mut self, projector: &dyn Projector) -> SessionResult<Outcome> {
        self.abort_interactions();
        let result = self.editor.redo().await;
        self.after_replay(projector);
        Ok(Outcome::Redone(self.report(result)?))
    }

    fn after_replay(&mut self, projector: &dyn Projector) {
        let document = self.editor.document();
        self.multi_select.retain(|id| document.drawing(*id).is_some());
        self.refresh_handles(projector);
        self.surface.refresh(self.context);
    }

    /// Delete the active drawing and the multi-selection.
    pub async fn delete_selected(&mut self) -> SessionResult<Outcome> {
        let ids = self.selected();
        if ids.is_empty() {
            return Ok(Outcome::Nothing);
        }
        self.abort_interactions();
        self.deselect();
        let mut deleted = Vec::new();
        let mut first_error = None;
        for id in ids {
            let result = self.editor.delete_drawing(id).await;
            match self.report(result) {
                Ok(()) => {
                    self.surface.entity_changed(EntityKind::Drawing, id);
                    deleted.push(id);
                }
                Err(e) => {
                    // Whatever survived locally stays selected.
                    if self.editor.document().drawing(id).is_some() {
                        self.multi_select.insert(id);
                    } else {
                        self.surface.entity_changed(EntityKind::Drawing, id);
                    }
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(Outcome::Deleted(deleted)),
        }
    }
}

impl<P: Persistence, S: Surface> Drop for Session<P, S> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Closest point to `pixel` on one segment of a line's rendered path.
fn nearest_on_segment(
    document: &crate::document::Document,
    line_id: LineId,
    segment: usize,
    pixel: Point,
    projector: &dyn Projector,
) -> Option<GeoPoint> {
    let path = document.line_path(document.line(line_id)?)?;
    let a = projector.project(*path.get(segment)?);
    let b = projector.project(*path.get(segment + 1)?);
    let seg = b - a;
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return Some(projector.unproject(a));
    }
    let t = ((pixel - a).dot(seg) / len_sq).clamp(0.0, 1.0);
    Some(projector.unproject(a + seg * t))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EditorConfig;
    use crate::document::Document;
    use crate::input::Modifiers;
    use crate::model::NodeType;
    use crate::persistence::{MemoryPersistence, Operation};
    use crate::projection::CanvasProjector;
    use crate::surface::{RecordingSurface, SurfaceCall};
    use kurbo::Size;
    use pollster::block_on;
    use std::sync::Arc;
    use uuid::Uuid;

    type TestSession = Session<MemoryPersistence, RecordingSurface>;

    fn setup() -> (TestSession, CanvasProjector, NodeTypeId) {
        let mut editor = Editor::new(
            Document::new(Uuid::new_v4()),
            Arc::new(MemoryPersistence::new()),
            EditorConfig::default(),
        );
        let manhole = editor.add_node_type(NodeType::new("Manhole", "MH"));
        let session = Session::new(editor, RecordingSurface::new(), Context::Canvas);
        (session, CanvasProjector::new(Size::new(800.0, 600.0)), manhole)
    }

    fn at(projector: &dyn Projector, lat: f64, lng: f64) -> PointerPosition {
        let geo = GeoPoint::new(lat, lng);
        PointerPosition::new(projector.project(geo), geo)
    }

    fn down(position: PointerPosition) -> PointerEvent {
        PointerEvent::Down {
            position,
            button: MouseButton::Left,
            modifiers: Modifiers::NONE,
        }
    }

    fn mv(position: PointerPosition) -> PointerEvent {
        PointerEvent::Move {
            position,
            modifiers: Modifiers::NONE,
        }
    }

    fn up(position: PointerPosition) -> PointerEvent {
        PointerEvent::Up {
            position,
            button: MouseButton::Left,
            modifiers: Modifiers::NONE,
        }
    }

    fn click(s: &mut TestSession, p: &CanvasProjector, lat: f64, lng: f64) -> Outcome {
        let pos = at(p, lat, lng);
        let outcome = block_on(s.handle_pointer(down(pos), p)).unwrap();
        let released = block_on(s.handle_pointer(up(pos), p)).unwrap();
        if released == Outcome::Nothing { outcome } else { released }
    }

    fn drag(s: &mut TestSession, p: &CanvasProjector, from: (f64, f64), to: (f64, f64)) -> Outcome {
        let a = at(p, from.0, from.1);
        let b = at(p, to.0, to.1);
        block_on(s.handle_pointer(down(a), p)).unwrap();
        block_on(s.handle_pointer(mv(b), p)).unwrap();
        block_on(s.handle_pointer(up(b), p)).unwrap()
    }

    #[test]
    fn test_add_node_mode_creates_on_click() {
        let (mut s, p, manhole) = setup();
        s.set_mode(Mode::AddNode { node_type: manhole });
        let Outcome::NodeCreated(id) = click(&mut s, &p, 5.0, 5.0) else {
            panic!("no node");
        };
        let node = s.editor().document().node(id).unwrap();
        assert_eq!(node.reference, "MH1");
        assert_eq!(node.context, Context::Canvas);
    }

    #[test]
    fn test_draw_line_picks_two_nodes() {
        let (mut s, p, manhole) = setup();
        s.set_mode(Mode::AddNode { node_type: manhole });
        click(&mut s, &p, 0.0, 0.0);
        click(&mut s, &p, 0.0, 100.0);
        s.set_mode(Mode::DrawLine);
        assert!(matches!(click(&mut s, &p, 0.0, 0.0), Outcome::LineStarted(_)));
        assert_eq!(click(&mut s, &p, 0.0, 0.0), Outcome::Nothing);
        assert!(matches!(click(&mut s, &p, 0.0, 100.0), Outcome::LineCreated(_)));
        assert_eq!(s.editor().document().lines.len(), 1);
        assert!(s.line_start().is_none());
    }

    #[test]
    fn test_click_on_line_inserts_waypoint() {
        let (mut s, p, manhole) = setup();
        s.set_mode(Mode::AddNode { node_type: manhole });
        click(&mut s, &p, 0.0, 0.0);
        click(&mut s, &p, 0.0, 100.0);
        s.set_mode(Mode::DrawLine);
        click(&mut s, &p, 0.0, 0.0);
        let Outcome::LineCreated(line) = click(&mut s, &p, 0.0, 100.0) else {
            panic!("no line");
        };

        s.set_mode(Mode::View);
        // Slightly off the line; the waypoint is projected onto it.
        let outcome = click(&mut s, &p, 2.0, 50.0);
        assert_eq!(
            outcome,
            Outcome::WaypointInserted {
                line_id: line,
                index: 0
            }
        );
        let waypoint = s.editor().document().line(line).unwrap().waypoints[0];
        assert!(waypoint.approx_eq(GeoPoint::new(0.0, 50.0), 1e-9));

        // Dragging the waypoint moves it.
        let outcome = drag(&mut s, &p, (0.0, 50.0), (20.0, 50.0));
        assert_eq!(outcome, Outcome::WaypointMoved { line_id: line, index: 0 });
        assert_eq!(
            s.editor().document().line(line).unwrap().waypoints[0],
            GeoPoint::new(20.0, 50.0)
        );
    }

    #[test]
    fn test_rectangle_tool_and_handle_drag() {
        let (mut s, p, _) = setup();
        s.set_mode(Mode::Drawing(DrawTool::Rectangle));
        let Outcome::DrawingCreated(id) = drag(&mut s, &p, (100.0, 0.0), (0.0, 100.0)) else {
            panic!("no drawing");
        };
        assert!(!s.surface().is_captured());

        s.set_mode(Mode::View);
        assert_eq!(click(&mut s, &p, 50.0, 50.0), Outcome::Selected(Some(id)));
        assert_eq!(s.active_drawing(), Some(id));

        // South-east corner drag scales about the north-west corner.
        let outcome = drag(&mut s, &p, (0.0, 100.0), (-20.0, 120.0));
        assert_eq!(outcome, Outcome::Committed(id));
        match &s.editor().document().drawing(id).unwrap().geometry {
            Geometry::Rectangle { bounds } => {
                assert!(bounds.approx_eq(&Bounds::new(100.0, -20.0, 120.0, 0.0), 1e-9));
            }
            other => panic!("unexpected {}", other.kind_name()),
        }
        assert!(!s.surface().is_captured());
    }

    #[test]
    fn test_node_drag_records_move() {
        let (mut s, p, manhole) = setup();
        s.set_mode(Mode::AddNode { node_type: manhole });
        let Outcome::NodeCreated(id) = click(&mut s, &p, 0.0, 0.0) else {
            panic!("no node");
        };
        s.set_mode(Mode::View);
        assert_eq!(drag(&mut s, &p, (0.0, 0.0), (30.0, 40.0)), Outcome::NodeMoved(id));
        assert_eq!(
            s.editor().document().node(id).unwrap().position,
            GeoPoint::new(30.0, 40.0)
        );
        block_on(s.undo(&p)).unwrap();
        assert_eq!(
            s.editor().document().node(id).unwrap().position,
            GeoPoint::new(0.0, 0.0)
        );
    }

    #[test]
    fn test_cancel_releases_capture() {
        let (mut s, p, _) = setup();
        s.set_mode(Mode::Drawing(DrawTool::Circle));
        block_on(s.handle_pointer(down(at(&p, 0.0, 0.0)), &p)).unwrap();
        assert!(s.surface().is_captured());
        let outcome = block_on(s.handle_pointer(PointerEvent::Cancel, &p)).unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert!(!s.surface().is_captured());
        assert!(s.editor().document().drawings.is_empty());
    }

    #[test]
    fn test_drop_releases_capture() {
        let (mut s, p, _) = setup();
        s.set_mode(Mode::Drawing(DrawTool::Rectangle));
        block_on(s.handle_pointer(down(at(&p, 0.0, 0.0)), &p)).unwrap();
        let captures = s.surface().count(|c| *c == SurfaceCall::CapturePointer);
        assert_eq!(captures, 1);
        drop(s);
    }

    #[test]
    fn test_multi_select_and_delete() {
        let (mut s, p, _) = setup();
        s.set_mode(Mode::Drawing(DrawTool::Rectangle));
        let Outcome::DrawingCreated(a) = drag(&mut s, &p, (10.0, 0.0), (0.0, 10.0)) else {
            panic!();
        };
        let Outcome::DrawingCreated(b) = drag(&mut s, &p, (110.0, 100.0), (100.0, 110.0)) else {
            panic!();
        };
        s.set_mode(Mode::View);
        s.select_drawing(a, &p).unwrap();
        let shift_down = PointerEvent::Down {
            position: at(&p, 105.0, 105.0),
            button: MouseButton::Left,
            modifiers: Modifiers::shift(),
        };
        let outcome = block_on(s.handle_pointer(shift_down, &p)).unwrap();
        assert_eq!(
            outcome,
            Outcome::MultiSelected {
                drawing_id: b,
                selected: true
            }
        );
        assert_eq!(s.selected(), vec![a, b]);

        let delete = KeyEvent::new("Delete", Modifiers::NONE);
        let outcome = block_on(s.handle_key(&delete, &p)).unwrap();
        assert_eq!(outcome, Outcome::Deleted(vec![a, b]));
        assert!(s.editor().document().drawings.is_empty());
        assert!(s.active_drawing().is_none());
    }

    #[test]
    fn test_failed_delete_continues_with_selection() {
        let (mut s, p, _) = setup();
        s.set_mode(Mode::Drawing(DrawTool::Rectangle));
        let Outcome::DrawingCreated(a) = drag(&mut s, &p, (10.0, 0.0), (0.0, 10.0)) else {
            panic!();
        };
        let Outcome::DrawingCreated(b) = drag(&mut s, &p, (110.0, 100.0), (100.0, 110.0)) else {
            panic!();
        };
        s.set_mode(Mode::View);
        s.select_drawing(a, &p).unwrap();
        s.toggle_multi_select(b);
        s.editor().persistence().fail_once(Operation::DeleteDrawing);

        assert!(block_on(s.delete_selected()).is_err());
        assert_eq!(s.editor().persistence().call_count(Operation::DeleteDrawing), 2);
        // Kept optimistically, so both are gone locally; only one remotely.
        assert!(s.editor().document().drawings.is_empty());
        assert!(s.editor().persistence().drawing(a).is_some());
        assert!(s.editor().persistence().drawing(b).is_none());
        assert_eq!(s.surface().alerts().len(), 1);
    }

    #[test]
    fn test_rollback_delete_keeps_survivor_selected() {
        let mut editor = Editor::new(
            Document::new(Uuid::new_v4()),
            Arc::new(MemoryPersistence::new()),
            EditorConfig::default().with_policy(crate::config::PersistPolicy::Rollback),
        );
        editor.add_node_type(NodeType::new("Manhole", "MH"));
        let mut s = Session::new(editor, RecordingSurface::new(), Context::Canvas);
        let p = CanvasProjector::new(Size::new(800.0, 600.0));
        s.set_mode(Mode::Drawing(DrawTool::Rectangle));
        let Outcome::DrawingCreated(a) = drag(&mut s, &p, (10.0, 0.0), (0.0, 10.0)) else {
            panic!();
        };
        let Outcome::DrawingCreated(b) = drag(&mut s, &p, (110.0, 100.0), (100.0, 110.0)) else {
            panic!();
        };
        s.set_mode(Mode::View);
        s.select_drawing(a, &p).unwrap();
        s.toggle_multi_select(b);
        s.editor().persistence().fail_once(Operation::DeleteDrawing);

        assert!(block_on(s.delete_selected()).is_err());
        assert!(s.editor().document().drawing(a).is_some());
        assert!(s.editor().document().drawing(b).is_none());
        assert_eq!(s.selected(), vec![a]);
    }

    #[test]
    fn test_tool_preview_carries_paint() {
        let (mut s, p, _) = setup();
        s.set_mode(Mode::Drawing(DrawTool::Rectangle));
        block_on(s.handle_pointer(down(at(&p, 0.0, 0.0)), &p)).unwrap();
        block_on(s.handle_pointer(mv(at(&p, -20.0, 30.0)), &p)).unwrap();
        let paint = s
            .surface()
            .calls()
            .iter()
            .rev()
            .find_map(|c| match c {
                SurfaceCall::ShowPreview(_, paint) => Some(paint.clone()),
                _ => None,
            })
            .unwrap();
        let stroke = paint.stroke.to_rgba8();
        assert_eq!((stroke.r, stroke.g, stroke.b, stroke.a), (0x33, 0x88, 0xff, 204));
        assert_eq!(paint.dash, Some(vec![6.0, 6.0]));
        assert!(paint.fill.is_none());
    }

    #[test]
    fn test_keyboard_undo_redo_and_text_input() {
        let (mut s, p, _) = setup();
        s.set_mode(Mode::Drawing(DrawTool::Text));
        click(&mut s, &p, 1.0, 1.0);
        assert_eq!(s.editor().document().drawings.len(), 1);

        let mut typing = KeyEvent::new("z", Modifiers::primary_key());
        typing.in_text_input = true;
        assert_eq!(block_on(s.handle_key(&typing, &p)).unwrap(), Outcome::Nothing);

        let undo = KeyEvent::new("z", Modifiers::primary_key());
        assert_eq!(block_on(s.handle_key(&undo, &p)).unwrap(), Outcome::Undone(true));
        assert!(s.editor().document().drawings.is_empty());
        let redo = KeyEvent::new("y", Modifiers::primary_key());
        assert_eq!(block_on(s.handle_key(&redo, &p)).unwrap(), Outcome::Redone(true));
        assert_eq!(s.editor().document().drawings.len(), 1);
    }

    #[test]
    fn test_polygon_finished_with_enter() {
        let (mut s, p, _) = setup();
        s.set_mode(Mode::Drawing(DrawTool::Polygon));
        click(&mut s, &p, 0.0, 0.0);
        click(&mut s, &p, 0.0, 50.0);
        click(&mut s, &p, 50.0, 25.0);
        let enter = KeyEvent::new("Enter", Modifiers::NONE);
        let outcome = block_on(s.handle_key(&enter, &p)).unwrap();
        assert!(matches!(outcome, Outcome::DrawingCreated(_)));
    }

    #[test]
    fn test_fit_viewport_uses_current_context() {
        let (mut s, p, manhole) = setup();
        assert!(s.fit_viewport().is_none());
        s.set_mode(Mode::AddNode { node_type: manhole });
        click(&mut s, &p, 0.0, 0.0);
        click(&mut s, &p, 100.0, 200.0);
        let bounds = s.fit_viewport().unwrap();
        assert!(bounds.approx_eq(&Bounds::new(105.0, -5.0, 210.0, -10.0), 1e-9));
        s.set_context(Context::Map);
        assert!(s.fit_viewport().is_none());
    }

    #[test]
    fn test_failed_create_alerts() {
        let (mut s, p, manhole) = setup();
        s.editor().persistence().fail_once(Operation::CreateNode);
        s.set_mode(Mode::AddNode { node_type: manhole });
        let result = block_on(s.handle_pointer(down(at(&p, 0.0, 0.0)), &p));
        assert!(result.is_err());
        assert_eq!(s.surface().alerts().len(), 1);
        // Kept optimistically under the default policy.
        assert_eq!(s.editor().document().nodes.len(), 1);
    }

    #[test]
    fn test_viewport_debounced_write() {
        let (mut s, _, _) = setup();
        let t0 = Instant::now();
        s.note_viewport(GeoPoint::new(1.0, 2.0), 3.0, t0);
        assert!(!block_on(s.flush_viewport(t0)).unwrap());
        let later = t0 + Duration::from_millis(s.editor().config().viewport_debounce_ms);
        assert!(block_on(s.flush_viewport(later)).unwrap());
        let project = s.editor().project_id();
        assert_eq!(
            s.editor().persistence().viewport(project).unwrap().context,
            Context::Canvas
        );
    }
}
