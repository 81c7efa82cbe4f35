//! Entity CRUD orchestration.
//!
//! Every mutation follows the same pipeline: mutate the local [`Document`]
//! optimistically, call the [`Persistence`] backend, fold any server-assigned
//! id back into local state and the history, then record a [`Command`].
//! Undo and redo replay commands through the same pipeline without
//! recording.

use crate::config::{EditorConfig, PersistPolicy};
use crate::document::Document;
use crate::geometry::{Bounds, Context, GeoPoint, Geometry, GeometryError};
use crate::history::{Command, History, NodeUpdate};
use crate::model::{
    Drawing, DrawingId, Line, LineId, Node, NodeId, NodeType, NodeTypeId, ProjectId, SectionLink,
    Style,
};
use crate::persistence::{Operation, PersistError, Persistence};
use crate::transform::TransformCommit;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Editor errors.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("Failed to {operation}: {source}")]
    Persist {
        operation: Operation,
        #[source]
        source: PersistError,
    },
    #[error("Unknown {kind} {id}")]
    UnknownEntity { kind: &'static str, id: Uuid },
    #[error("Expected a {} entity, found {}", expected.name(), found.name())]
    ContextMismatch { expected: Context, found: Context },
    #[error("Invalid line: {0}")]
    InvalidLine(String),
    #[error("Reference {0} is already in use")]
    DuplicateReference(String),
}

/// Result type for editor operations.
pub type EditorResult<T> = Result<T, EditorError>;

/// A failed persistence call. `kept` holds the local value when the policy
/// kept the optimistic change.
struct SyncFailure<T> {
    kept: Option<T>,
    error: EditorError,
}

impl<T> From<EditorError> for SyncFailure<T> {
    fn from(error: EditorError) -> Self {
        Self { kept: None, error }
    }
}

type Synced<T> = Result<T, SyncFailure<T>>;

fn replayed<T>(outcome: Synced<T>) -> EditorResult<T> {
    outcome.map_err(|f| f.error)
}

/// Input for [`Editor::create_node`].
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDraft {
    pub node_type: NodeTypeId,
    pub position: GeoPoint,
    pub context: Context,
    /// Explicit reference; generated from the type's prefix when `None`.
    pub reference: Option<String>,
    pub cover_level: Option<f64>,
    pub invert_level: Option<f64>,
    pub description: Option<String>,
}

impl NodeDraft {
    pub fn new(node_type: NodeTypeId, position: GeoPoint, context: Context) -> Self {
        Self {
            node_type,
            position,
            context,
            reference: None,
            cover_level: None,
            invert_level: None,
            description: None,
        }
    }
}

/// Input for [`Editor::create_line`].
#[derive(Debug, Clone, PartialEq)]
pub struct LineDraft {
    pub start_node: NodeId,
    pub end_node: NodeId,
    pub waypoints: Vec<GeoPoint>,
    /// Active "link to section" selection, if any.
    pub section: Option<SectionLink>,
    pub style: Option<Style>,
}

impl LineDraft {
    pub fn new(start_node: NodeId, end_node: NodeId) -> Self {
        Self {
            start_node,
            end_node,
            waypoints: Vec::new(),
            section: None,
            style: None,
        }
    }
}

/// Input for [`Editor::create_drawing`].
#[derive(Debug, Clone, PartialEq)]
pub struct DrawingDraft {
    pub geometry: Geometry,
    pub context: Context,
    pub style: Option<Style>,
    pub label: Option<String>,
}

impl DrawingDraft {
    pub fn new(geometry: Geometry, context: Context) -> Self {
        Self {
            geometry,
            context,
            style: None,
            label: None,
        }
    }
}

/// Owns the entity stores and the history of one editing session.
pub struct Editor<P: Persistence> {
    document: Document,
    history: History,
    persistence: Arc<P>,
    config: EditorConfig,
}

impl<P: Persistence> Editor<P> {
    pub fn new(document: Document, persistence: Arc<P>, config: EditorConfig) -> Self {
        Self {
            document,
            history: History::new(config.max_history),
            persistence,
            config,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn persistence(&self) -> &Arc<P> {
        &self.persistence
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn project_id(&self) -> ProjectId {
        self.document.project_id
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Register a node template. The catalog is local; it is not recorded.
    pub fn add_node_type(&mut self, node_type: NodeType) -> NodeTypeId {
        self.document.add_node_type(node_type)
    }

    /// Union of every entity's bounds in `context`, padded for display.
    pub fn fit_bounds(&self, context: Context) -> Option<Bounds> {
        self.document
            .bounds(context)
            .map(|b| b.padded(self.config.fit_padding))
    }

    fn policy(&self) -> PersistPolicy {
        self.config.persist_policy
    }

    fn node_or_err(&self, id: NodeId) -> EditorResult<&Node> {
        self.document
            .node(id)
            .ok_or(EditorError::UnknownEntity { kind: "node", id })
    }

    fn line_or_err(&self, id: LineId) -> EditorResult<&Line> {
        self.document
            .line(id)
            .ok_or(EditorError::UnknownEntity { kind: "line", id })
    }

    fn drawing_or_err(&self, id: DrawingId) -> EditorResult<&Drawing> {
        self.document
            .drawing(id)
            .ok_or(EditorError::UnknownEntity { kind: "drawing", id })
    }

    /// Endpoints exist and share the line's context.
    fn check_line(&self, line: &Line) -> EditorResult<()> {
        if line.start_node == line.end_node {
            return Err(EditorError::InvalidLine(
                "start and end are the same node".to_string(),
            ));
        }
        for id in [line.start_node, line.end_node] {
            let node = self.node_or_err(id)?;
            if node.context != line.context {
                return Err(EditorError::ContextMismatch {
                    expected: line.context,
                    found: node.context,
                });
            }
        }
        Ok(())
    }

    // --- persistence pipeline ---

    fn persist_failed<T>(
        &self,
        operation: Operation,
        source: PersistError,
        policy: PersistPolicy,
        local: T,
    ) -> SyncFailure<T> {
        let kept = match policy {
            PersistPolicy::KeepOptimistic => {
                log::warn!("Failed to {operation}; keeping local change: {source}");
                Some(local)
            }
            PersistPolicy::Rollback => {
                log::warn!("Failed to {operation}; rolled back local change: {source}");
                None
            }
        };
        SyncFailure {
            kept,
            error: EditorError::Persist { operation, source },
        }
    }

    /// Record the outcome of a user mutation.
    fn finish<T: Copy>(
        &mut self,
        outcome: Synced<T>,
        command: impl FnOnce(&Document, T) -> Option<Command>,
    ) -> EditorResult<T> {
        let (value, error) = match outcome {
            Ok(value) => (value, None),
            Err(SyncFailure {
                kept: Some(value),
                error,
            }) => (value, Some(error)),
            Err(SyncFailure { kept: None, error }) => return Err(error),
        };
        if let Some(command) = command(&self.document, value) {
            log::debug!("Recorded {}", command.name());
            self.history.push(command);
        }
        match error {
            Some(error) => Err(error),
            None => Ok(value),
        }
    }

    async fn sync_create_node(&mut self, node: Node, policy: PersistPolicy) -> Synced<NodeId> {
        let local_id = node.id;
        self.document.insert_node(node.clone());
        match self.persistence.create_node(&node).await {
            Ok(stored) => {
                let id = stored.id;
                if id != local_id {
                    log::debug!("Node {local_id} stored as {id}");
                    self.document.rekey_node(local_id, id);
                    self.history.remap_id(local_id, id);
                }
                self.document.insert_node(stored);
                Ok(id)
            }
            Err(source) => {
                if policy == PersistPolicy::Rollback {
                    self.document.remove_node(local_id);
                }
                Err(self.persist_failed(Operation::CreateNode, source, policy, local_id))
            }
        }
    }

    async fn sync_update_node(
        &mut self,
        next: Node,
        previous: Node,
        policy: PersistPolicy,
    ) -> Synced<()> {
        self.document.insert_node(next.clone());
        match self.persistence.update_node(&next).await {
            Ok(stored) => {
                self.document.insert_node(stored);
                Ok(())
            }
            Err(source) => {
                if policy == PersistPolicy::Rollback {
                    self.document.insert_node(previous);
                }
                Err(self.persist_failed(Operation::UpdateNode, source, policy, ()))
            }
        }
    }

    async fn sync_delete_node(&mut self, node: Node, policy: PersistPolicy) -> Synced<()> {
        self.document.remove_node(node.id);
        match self.persistence.delete_node(node.id).await {
            Ok(()) => Ok(()),
            Err(source) => {
                if policy == PersistPolicy::Rollback {
                    self.document.insert_node(node);
                }
                Err(self.persist_failed(Operation::DeleteNode, source, policy, ()))
            }
        }
    }

    async fn sync_create_line(&mut self, line: Line, policy: PersistPolicy) -> Synced<LineId> {
        self.check_line(&line)?;
        let local_id = line.id;
        self.document.insert_line(line.clone());
        match self.persistence.create_line(&line).await {
            Ok(stored) => {
                let id = stored.id;
                if id != local_id {
                    log::debug!("Line {local_id} stored as {id}");
                    self.document.rekey_line(local_id, id);
                    self.history.remap_id(local_id, id);
                }
                self.document.insert_line(stored);
                Ok(id)
            }
            Err(source) => {
                if policy == PersistPolicy::Rollback {
                    self.document.remove_line(local_id);
                }
                Err(self.persist_failed(Operation::CreateLine, source, policy, local_id))
            }
        }
    }

    async fn sync_update_line(
        &mut self,
        next: Line,
        previous: Line,
        policy: PersistPolicy,
    ) -> Synced<()> {
        self.document.insert_line(next.clone());
        match self.persistence.update_line(&next).await {
            Ok(stored) => {
                self.document.insert_line(stored);
                Ok(())
            }
            Err(source) => {
                if policy == PersistPolicy::Rollback {
                    self.document.insert_line(previous);
                }
                Err(self.persist_failed(Operation::UpdateLine, source, policy, ()))
            }
        }
    }

    async fn sync_delete_line(&mut self, line: Line, policy: PersistPolicy) -> Synced<()> {
        self.document.remove_line(line.id);
        match self.persistence.delete_line(line.id).await {
            Ok(()) => Ok(()),
            Err(source) => {
                if policy == PersistPolicy::Rollback {
                    self.document.insert_line(line);
                }
                Err(self.persist_failed(Operation::DeleteLine, source, policy, ()))
            }
        }
    }

    async fn sync_create_drawing(
        &mut self,
        drawing: Drawing,
        index: Option<usize>,
        policy: PersistPolicy,
    ) -> Synced<DrawingId> {
        let local_id = drawing.id;
        match index {
            Some(index) => self.document.insert_drawing_at(drawing.clone(), index),
            None => self.document.insert_drawing(drawing.clone()),
        }
        match self.persistence.create_drawing(&drawing).await {
            Ok(stored) => {
                let id = stored.id;
                if id != local_id {
                    log::debug!("Drawing {local_id} stored as {id}");
                    self.document.rekey_drawing(local_id, id);
                    self.history.remap_id(local_id, id);
                }
                self.document.insert_drawing(stored);
                Ok(id)
            }
            Err(source) => {
                if policy == PersistPolicy::Rollback {
                    self.document.remove_drawing(local_id);
                }
                Err(self.persist_failed(Operation::CreateDrawing, source, policy, local_id))
            }
        }
    }

    async fn sync_update_drawing(
        &mut self,
        next: Drawing,
        previous: Drawing,
        policy: PersistPolicy,
    ) -> Synced<()> {
        self.document.insert_drawing(next.clone());
        match self.persistence.update_drawing(&next).await {
            Ok(stored) => {
                self.document.insert_drawing(stored);
                Ok(())
            }
            Err(source) => {
                if policy == PersistPolicy::Rollback {
                    self.document.insert_drawing(previous);
                }
                Err(self.persist_failed(Operation::UpdateDrawing, source, policy, ()))
            }
        }
    }

    async fn sync_delete_drawing(&mut self, drawing: Drawing, policy: PersistPolicy) -> Synced<()> {
        let index = self.document.drawing_index(drawing.id);
        self.document.remove_drawing(drawing.id);
        match self.persistence.delete_drawing(drawing.id).await {
            Ok(()) => Ok(()),
            Err(source) => {
                if policy == PersistPolicy::Rollback {
                    let index = index.unwrap_or(self.document.drawing_order.len());
                    self.document.insert_drawing_at(drawing, index);
                }
                Err(self.persist_failed(Operation::DeleteDrawing, source, policy, ()))
            }
        }
    }

    // --- nodes ---

    /// Place a node. The reference is generated from the type's prefix
    /// unless the draft names one.
    pub async fn create_node(&mut self, draft: NodeDraft) -> EditorResult<NodeId> {
        let prefix = self
            .document
            .node_types
            .get(&draft.node_type)
            .map(|t| t.reference_prefix.clone())
            .ok_or(EditorError::UnknownEntity {
                kind: "node type",
                id: draft.node_type,
            })?;
        let reference = match draft.reference {
            Some(reference) => {
                if self
                    .document
                    .node_by_reference(draft.context, &reference)
                    .is_some()
                {
                    return Err(EditorError::DuplicateReference(reference));
                }
                reference
            }
            None => self.document.next_reference(draft.context, &prefix),
        };
        if !draft.position.is_finite() {
            return Err(GeometryError::Degenerate("node position".to_string()).into());
        }

        let node = Node {
            id: Uuid::new_v4(),
            project_id: self.document.project_id,
            node_type: draft.node_type,
            reference,
            position: draft.position,
            cover_level: draft.cover_level,
            invert_level: draft.invert_level,
            description: draft.description,
            context: draft.context,
        };
        log::debug!("Creating node {} at {:?}", node.reference, node.position);
        let outcome = self.sync_create_node(node, self.policy()).await;
        self.finish(outcome, |doc, id| {
            doc.node(id).cloned().map(|node| Command::CreateNode { node })
        })
    }

    /// Replace a node's attributes.
    pub async fn update_node(&mut self, next: Node) -> EditorResult<()> {
        let previous = self.node_or_err(next.id)?.clone();
        if previous.context != next.context {
            return Err(EditorError::ContextMismatch {
                expected: previous.context,
                found: next.context,
            });
        }
        if next.reference != previous.reference
            && self
                .document
                .node_by_reference(next.context, &next.reference)
                .is_some_and(|id| id != next.id)
        {
            return Err(EditorError::DuplicateReference(next.reference));
        }
        if previous == next {
            return Ok(());
        }
        let id = next.id;
        let outcome = self
            .sync_update_node(next, previous.clone(), self.policy())
            .await;
        self.finish(outcome, |doc, ()| {
            doc.node(id)
                .cloned()
                .map(|next| Command::UpdateNode { previous, next })
        })
    }

    /// Drag a node to a new position.
    pub async fn move_node(&mut self, id: NodeId, position: GeoPoint) -> EditorResult<()> {
        let previous = self.node_or_err(id)?.clone();
        if previous.position == position {
            return Ok(());
        }
        let mut next = previous.clone();
        next.position = position;
        let from = previous.position;
        let outcome = self.sync_update_node(next, previous, self.policy()).await;
        self.finish(outcome, |_, ()| {
            Some(Command::MoveNode {
                node_id: id,
                previous: from,
                next: position,
            })
        })
    }

    /// Delete a node and every line attached to it, as one command.
    ///
    /// Attached lines go first. A line whose remote delete fails stays
    /// deleted locally; the inconsistency is logged, not rolled back.
    pub async fn delete_node(&mut self, id: NodeId) -> EditorResult<()> {
        let node = self.node_or_err(id)?.clone();
        let mut deleted_lines = Vec::new();
        for line_id in self.document.lines_referencing(id) {
            let Some(line) = self.document.line(line_id).cloned() else {
                continue;
            };
            if let Err(failure) = self
                .sync_delete_line(line.clone(), PersistPolicy::KeepOptimistic)
                .await
            {
                log::error!(
                    "Line {line_id} removed locally while deleting node {}, but the remote delete failed: {}",
                    node.reference,
                    failure.error
                );
            }
            deleted_lines.push(line);
        }
        let outcome = self.sync_delete_node(node.clone(), self.policy()).await;
        if outcome.as_ref().is_err_and(|f| f.kept.is_none()) && !deleted_lines.is_empty() {
            log::error!(
                "Node {} restored after a failed delete; its {} line(s) stay deleted",
                node.reference,
                deleted_lines.len()
            );
        }
        self.finish(outcome, move |_, ()| {
            Some(Command::DeleteNode {
                node,
                deleted_lines,
            })
        })
    }

    // --- lines ---

    /// Connect two nodes. With a section link, the endpoints are renamed to
    /// the section's references unless another node already holds them.
    pub async fn create_line(&mut self, draft: LineDraft) -> EditorResult<LineId> {
        let context = self.node_or_err(draft.start_node)?.context;
        let line = Line {
            id: Uuid::new_v4(),
            project_id: self.document.project_id,
            start_node: draft.start_node,
            end_node: draft.end_node,
            waypoints: draft.waypoints,
            section: draft.section,
            style: draft.style.unwrap_or_default(),
            context,
        };
        self.check_line(&line)?;
        let policy = self.policy();

        let mut node_updates = Vec::new();
        if let Some(section) = line.section.clone() {
            let renames = [
                (line.start_node, section.start_reference),
                (line.end_node, section.finish_reference),
            ];
            for (node_id, reference) in renames {
                if let Some(update) = self.rename_for_section(node_id, reference, policy).await {
                    node_updates.push(update);
                }
            }
        }

        let outcome = self.sync_create_line(line, policy).await;
        if outcome.as_ref().is_err_and(|f| f.kept.is_none()) {
            for update in node_updates.iter().rev() {
                self.restore_reference(update.node_id, &update.previous_reference)
                    .await;
            }
        }
        self.finish(outcome, move |doc, id| {
            doc.line(id).cloned().map(|line| Command::CreateLine {
                line,
                node_updates,
            })
        })
    }

    async fn rename_for_section(
        &mut self,
        node_id: NodeId,
        reference: String,
        policy: PersistPolicy,
    ) -> Option<NodeUpdate> {
        let node = self.document.node(node_id)?.clone();
        if node.reference == reference {
            return None;
        }
        if self
            .document
            .node_by_reference(node.context, &reference)
            .is_some()
        {
            log::debug!(
                "Reference {reference} already taken; {} keeps its name",
                node.reference
            );
            return None;
        }
        let update = NodeUpdate {
            node_id,
            previous_reference: node.reference.clone(),
            next_reference: reference.clone(),
        };
        let mut next = node.clone();
        next.reference = reference;
        match self.sync_update_node(next, node, policy).await {
            Ok(()) => Some(update),
            Err(SyncFailure { kept: Some(()), .. }) => Some(update),
            Err(_) => None,
        }
    }

    /// Best-effort revert of a section rename after the line was rolled back.
    async fn restore_reference(&mut self, node_id: NodeId, reference: &str) {
        let Some(current) = self.document.node(node_id).cloned() else {
            return;
        };
        let mut previous = current.clone();
        previous.reference = reference.to_string();
        if self
            .sync_update_node(previous, current, PersistPolicy::KeepOptimistic)
            .await
            .is_err()
        {
            log::error!("Could not restore reference {reference} on node {node_id}");
        }
    }

    pub async fn delete_line(&mut self, id: LineId) -> EditorResult<()> {
        let line = self.line_or_err(id)?.clone();
        let outcome = self.sync_delete_line(line.clone(), self.policy()).await;
        self.finish(outcome, move |_, ()| Some(Command::DeleteLine { line }))
    }

    /// Replace a line's waypoints.
    pub async fn update_waypoints(
        &mut self,
        line_id: LineId,
        waypoints: Vec<GeoPoint>,
    ) -> EditorResult<()> {
        let previous = self.line_or_err(line_id)?.clone();
        if previous.waypoints == waypoints {
            return Ok(());
        }
        if !waypoints.iter().all(GeoPoint::is_finite) {
            return Err(GeometryError::Degenerate("non-finite waypoint".to_string()).into());
        }
        let mut next = previous.clone();
        next.waypoints = waypoints.clone();
        let before = previous.waypoints.clone();
        let outcome = self.sync_update_line(next, previous, self.policy()).await;
        self.finish(outcome, move |_, ()| {
            Some(Command::UpdateWaypoints {
                line_id,
                previous: before,
                next: waypoints,
            })
        })
    }

    /// Insert a waypoint into segment `segment` of the line's polyline
    /// (`0` is start to first waypoint). Returns the waypoint index.
    pub async fn insert_waypoint(
        &mut self,
        line_id: LineId,
        segment: usize,
        point: GeoPoint,
    ) -> EditorResult<usize> {
        let mut waypoints = self.line_or_err(line_id)?.waypoints.clone();
        let index = segment.min(waypoints.len());
        waypoints.insert(index, point);
        self.update_waypoints(line_id, waypoints).await?;
        Ok(index)
    }

    pub async fn move_waypoint(
        &mut self,
        line_id: LineId,
        index: usize,
        point: GeoPoint,
    ) -> EditorResult<()> {
        let mut waypoints = self.line_or_err(line_id)?.waypoints.clone();
        let slot = waypoints
            .get_mut(index)
            .ok_or_else(|| EditorError::InvalidLine(format!("no waypoint {index}")))?;
        *slot = point;
        self.update_waypoints(line_id, waypoints).await
    }

    pub async fn remove_waypoint(&mut self, line_id: LineId, index: usize) -> EditorResult<()> {
        let mut waypoints = self.line_or_err(line_id)?.waypoints.clone();
        if index >= waypoints.len() {
            return Err(EditorError::InvalidLine(format!("no waypoint {index}")));
        }
        waypoints.remove(index);
        self.update_waypoints(line_id, waypoints).await
    }

    // --- drawings ---

    pub async fn create_drawing(&mut self, draft: DrawingDraft) -> EditorResult<DrawingId> {
        draft.geometry.validate()?;
        let drawing = Drawing {
            id: Uuid::new_v4(),
            project_id: self.document.project_id,
            geometry: draft.geometry,
            style: draft.style.unwrap_or_default(),
            transform: None,
            context: draft.context,
            visible: true,
            label: draft.label,
        };
        log::debug!("Creating {} drawing", drawing.geometry.kind_name());
        let outcome = self.sync_create_drawing(drawing, None, self.policy()).await;
        self.finish(outcome, |doc, id| {
            doc.drawing(id)
                .cloned()
                .map(|drawing| Command::CreateDrawing { drawing })
        })
    }

    /// Replace a drawing. Geometry is validated first.
    pub async fn update_drawing(&mut self, next: Drawing) -> EditorResult<()> {
        let previous = self.drawing_or_err(next.id)?.clone();
        if previous.context != next.context {
            return Err(EditorError::ContextMismatch {
                expected: previous.context,
                found: next.context,
            });
        }
        next.geometry.validate()?;
        if previous == next {
            return Ok(());
        }
        let id = next.id;
        let outcome = self
            .sync_update_drawing(next, previous.clone(), self.policy())
            .await;
        self.finish(outcome, |doc, ()| {
            doc.drawing(id)
                .cloned()
                .map(|next| Command::UpdateDrawing { previous, next })
        })
    }

    pub async fn update_drawing_style(&mut self, id: DrawingId, style: Style) -> EditorResult<()> {
        let mut next = self.drawing_or_err(id)?.clone();
        next.style = style;
        self.update_drawing(next).await
    }

    pub async fn set_drawing_visible(&mut self, id: DrawingId, visible: bool) -> EditorResult<()> {
        let mut next = self.drawing_or_err(id)?.clone();
        next.visible = visible;
        self.update_drawing(next).await
    }

    pub async fn set_drawing_label(
        &mut self,
        id: DrawingId,
        label: Option<String>,
    ) -> EditorResult<()> {
        let mut next = self.drawing_or_err(id)?.clone();
        next.label = label;
        self.update_drawing(next).await
    }

    /// Apply the result of a handle or body drag.
    pub async fn commit_transform(&mut self, commit: TransformCommit) -> EditorResult<()> {
        let mut next = self.drawing_or_err(commit.drawing_id)?.clone();
        if next.geometry != commit.previous_geometry {
            log::warn!(
                "Drawing {} changed during the drag; applying the drag result",
                commit.drawing_id
            );
        }
        next.geometry = commit.geometry;
        next.transform = commit.transform;
        self.update_drawing(next).await
    }

    pub async fn delete_drawing(&mut self, id: DrawingId) -> EditorResult<()> {
        let drawing = self.drawing_or_err(id)?.clone();
        let index = self
            .document
            .drawing_index(id)
            .unwrap_or(self.document.drawing_order.len());
        let outcome = self.sync_delete_drawing(drawing.clone(), self.policy()).await;
        self.finish(outcome, move |_, ()| {
            Some(Command::DeleteDrawing { drawing, index })
        })
    }

    // --- undo / redo ---

    /// Invert the last applied command. Returns `Ok(false)` when there is
    /// nothing to undo. On failure the history position does not move.
    pub async fn undo(&mut self) -> EditorResult<bool> {
        let Some(command) = self.history.undo_target().cloned() else {
            return Ok(false);
        };
        let name = command.name();
        self.history.set_replaying(true);
        let result = self.revert(command).await;
        self.history.set_replaying(false);
        match result {
            Ok(()) => {
                self.history.step_back();
                log::debug!("Undid {name}");
                Ok(true)
            }
            Err(e) => {
                log::error!("Undo of {name} failed; history position unchanged: {e}");
                Err(e)
            }
        }
    }

    /// Reapply the next undone command. Returns `Ok(false)` when there is
    /// nothing to redo. On failure the history position does not move.
    pub async fn redo(&mut self) -> EditorResult<bool> {
        let Some(command) = self.history.redo_target().cloned() else {
            return Ok(false);
        };
        let name = command.name();
        self.history.set_replaying(true);
        let result = self.reapply(command).await;
        self.history.set_replaying(false);
        match result {
            Ok(()) => {
                self.history.step_forward();
                log::debug!("Redid {name}");
                Ok(true)
            }
            Err(e) => {
                log::error!("Redo of {name} failed; history position unchanged: {e}");
                Err(e)
            }
        }
    }

    async fn set_node_reference(&mut self, node_id: NodeId, reference: &str) -> EditorResult<()> {
        let current = self.node_or_err(node_id)?.clone();
        if current.reference == reference {
            return Ok(());
        }
        let mut next = current.clone();
        next.reference = reference.to_string();
        replayed(self.sync_update_node(next, current, self.policy()).await)
    }

    /// Delete a node locally and remotely along with any attached lines.
    async fn remove_node_cascade(&mut self, node: Node) -> EditorResult<()> {
        let policy = self.policy();
        for line_id in self.document.lines_referencing(node.id) {
            if let Some(line) = self.document.line(line_id).cloned() {
                replayed(self.sync_delete_line(line, policy).await)?;
            }
        }
        let node = self.document.node(node.id).cloned().unwrap_or(node);
        replayed(self.sync_delete_node(node, policy).await)
    }

    async fn revert(&mut self, command: Command) -> EditorResult<()> {
        let policy = self.policy();
        match command {
            Command::CreateNode { node } => self.remove_node_cascade(node).await,
            Command::DeleteNode {
                node,
                deleted_lines,
            } => {
                let old_id = node.id;
                let new_id = replayed(self.sync_create_node(node, policy).await)?;
                let ids = HashMap::from([(old_id, new_id)]);
                for mut line in deleted_lines {
                    line.remap_nodes(&ids);
                    replayed(self.sync_create_line(line, policy).await)?;
                }
                Ok(())
            }
            Command::UpdateNode { previous, next } => {
                let current = self.document.node(previous.id).cloned().unwrap_or(next);
                replayed(self.sync_update_node(previous, current, policy).await)
            }
            Command::MoveNode {
                node_id, previous, ..
            } => {
                let current = self.node_or_err(node_id)?.clone();
                let mut target = current.clone();
                target.position = previous;
                replayed(self.sync_update_node(target, current, policy).await)
            }
            Command::CreateLine { line, node_updates } => {
                let line = self.document.line(line.id).cloned().unwrap_or(line);
                replayed(self.sync_delete_line(line, policy).await)?;
                for update in node_updates.iter().rev() {
                    self.set_node_reference(update.node_id, &update.previous_reference)
                        .await?;
                }
                Ok(())
            }
            Command::DeleteLine { line } => {
                replayed(self.sync_create_line(line, policy).await).map(|_| ())
            }
            Command::UpdateWaypoints {
                line_id, previous, ..
            } => {
                let current = self.line_or_err(line_id)?.clone();
                let mut target = current.clone();
                target.waypoints = previous;
                replayed(self.sync_update_line(target, current, policy).await)
            }
            Command::CreateDrawing { drawing } => {
                let drawing = self.document.drawing(drawing.id).cloned().unwrap_or(drawing);
                replayed(self.sync_delete_drawing(drawing, policy).await)
            }
            Command::DeleteDrawing { drawing, index } => {
                replayed(self.sync_create_drawing(drawing, Some(index), policy).await).map(|_| ())
            }
            Command::UpdateDrawing { previous, next } => {
                let current = self.document.drawing(previous.id).cloned().unwrap_or(next);
                replayed(self.sync_update_drawing(previous, current, policy).await)
            }
        }
    }

    async fn reapply(&mut self, command: Command) -> EditorResult<()> {
        let policy = self.policy();
        match command {
            Command::CreateNode { node } => {
                replayed(self.sync_create_node(node, policy).await).map(|_| ())
            }
            Command::DeleteNode { node, .. } => self.remove_node_cascade(node).await,
            Command::UpdateNode { previous, next } => {
                let current = self.document.node(next.id).cloned().unwrap_or(previous);
                replayed(self.sync_update_node(next, current, policy).await)
            }
            Command::MoveNode { node_id, next, .. } => {
                let current = self.node_or_err(node_id)?.clone();
                let mut target = current.clone();
                target.position = next;
                replayed(self.sync_update_node(target, current, policy).await)
            }
            Command::CreateLine { line, node_updates } => {
                for update in &node_updates {
                    self.set_node_reference(update.node_id, &update.next_reference)
                        .await?;
                }
                replayed(self.sync_create_line(line, policy).await).map(|_| ())
            }
            Command::DeleteLine { line } => {
                let line = self.document.line(line.id).cloned().unwrap_or(line);
                replayed(self.sync_delete_line(line, policy).await)
            }
            Command::UpdateWaypoints { line_id, next, .. } => {
                let current = self.line_or_err(line_id)?.clone();
                let mut target = current.clone();
                target.waypoints = next;
                replayed(self.sync_update_line(target, current, policy).await)
            }
            Command::CreateDrawing { drawing } => {
                replayed(self.sync_create_drawing(drawing, None, policy).await).map(|_| ())
            }
            Command::DeleteDrawing { drawing, .. } => {
                let drawing = self.document.drawing(drawing.id).cloned().unwrap_or(drawing);
                replayed(self.sync_delete_drawing(drawing, policy).await)
            }
            Command::UpdateDrawing { previous, next } => {
                let current = self.document.drawing(next.id).cloned().unwrap_or(previous);
                replayed(self.sync_update_drawing(next, current, policy).await)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Bounds;
    use crate::persistence::MemoryPersistence;
    use pollster::block_on;

    struct Fixture {
        editor: Editor<MemoryPersistence>,
        manhole: NodeTypeId,
    }

    fn fixture_with(store: MemoryPersistence, config: EditorConfig) -> Fixture {
        let mut editor = Editor::new(Document::new(Uuid::new_v4()), Arc::new(store), config);
        let manhole = editor.add_node_type(NodeType::new("Manhole", "MH"));
        Fixture { editor, manhole }
    }

    fn fixture() -> Fixture {
        fixture_with(MemoryPersistence::new(), EditorConfig::default())
    }

    fn node_at(f: &mut Fixture, lat: f64, lng: f64) -> NodeId {
        block_on(f.editor.create_node(NodeDraft::new(
            f.manhole,
            GeoPoint::new(lat, lng),
            Context::Map,
        )))
        .unwrap()
    }

    fn rect() -> Geometry {
        Geometry::Rectangle {
            bounds: Bounds::new(1.0, 0.0, 1.0, 0.0),
        }
    }

    #[test]
    fn test_references_are_generated() {
        let mut f = fixture();
        let a = node_at(&mut f, 0.0, 0.0);
        let b = node_at(&mut f, 1.0, 1.0);
        let doc = f.editor.document();
        assert_eq!(doc.node(a).unwrap().reference, "MH1");
        assert_eq!(doc.node(b).unwrap().reference, "MH2");

        let mut draft = NodeDraft::new(f.manhole, GeoPoint::new(2.0, 2.0), Context::Map);
        draft.reference = Some("MH1".to_string());
        assert!(matches!(
            block_on(f.editor.create_node(draft)),
            Err(EditorError::DuplicateReference(_))
        ));
    }

    #[test]
    fn test_unknown_node_type() {
        let mut f = fixture();
        let draft = NodeDraft::new(Uuid::new_v4(), GeoPoint::new(0.0, 0.0), Context::Map);
        assert!(matches!(
            block_on(f.editor.create_node(draft)),
            Err(EditorError::UnknownEntity { kind: "node type", .. })
        ));
    }

    #[test]
    fn test_server_ids_are_reconciled() {
        let mut f = fixture_with(MemoryPersistence::with_server_ids(), EditorConfig::default());
        let a = node_at(&mut f, 0.0, 0.0);
        let b = node_at(&mut f, 1.0, 1.0);
        let line = block_on(f.editor.create_line(LineDraft::new(a, b))).unwrap();

        let store = Arc::clone(f.editor.persistence());
        assert!(store.node(a).is_some());
        assert_eq!(store.line(line).unwrap().start_node, a);
        match f.editor.history().undo_target().unwrap() {
            Command::CreateLine { line: recorded, .. } => assert_eq!(recorded.id, line),
            other => panic!("unexpected {}", other.name()),
        }

        // Undo deletes, redo re-creates under yet another server id.
        block_on(f.editor.undo()).unwrap();
        block_on(f.editor.redo()).unwrap();
        let lines: Vec<_> = f.editor.document().lines.values().collect();
        assert_eq!(lines.len(), 1);
        assert_ne!(lines[0].id, line);
        assert!(store.line(lines[0].id).is_some());
        match f.editor.history().undo_target().unwrap() {
            Command::CreateLine { line: recorded, .. } => assert_eq!(recorded.id, lines[0].id),
            other => panic!("unexpected {}", other.name()),
        }
    }

    #[test]
    fn test_keep_optimistic_keeps_state_and_command() {
        let mut f = fixture();
        f.editor.persistence().fail_once(Operation::CreateDrawing);
        let result = block_on(
            f.editor
                .create_drawing(DrawingDraft::new(rect(), Context::Canvas)),
        );
        assert!(matches!(
            result,
            Err(EditorError::Persist {
                operation: Operation::CreateDrawing,
                ..
            })
        ));
        assert_eq!(f.editor.document().drawings.len(), 1);
        assert_eq!(f.editor.history().len(), 1);
    }

    #[test]
    fn test_rollback_restores_state_without_command() {
        let config = EditorConfig::default().with_policy(PersistPolicy::Rollback);
        let mut f = fixture_with(MemoryPersistence::new(), config);
        let a = node_at(&mut f, 0.0, 0.0);
        f.editor.persistence().fail_once(Operation::UpdateNode);
        let result = block_on(f.editor.move_node(a, GeoPoint::new(5.0, 5.0)));
        assert!(result.is_err());
        assert_eq!(
            f.editor.document().node(a).unwrap().position,
            GeoPoint::new(0.0, 0.0)
        );
        assert_eq!(f.editor.history().len(), 1);
    }

    #[test]
    fn test_cascade_failure_is_not_rolled_back() {
        let config = EditorConfig::default().with_policy(PersistPolicy::Rollback);
        let mut f = fixture_with(MemoryPersistence::new(), config);
        let a = node_at(&mut f, 0.0, 0.0);
        let b = node_at(&mut f, 1.0, 1.0);
        let line = block_on(f.editor.create_line(LineDraft::new(a, b))).unwrap();

        f.editor.persistence().fail_once(Operation::DeleteLine);
        block_on(f.editor.delete_node(a)).unwrap();
        let doc = f.editor.document();
        assert!(doc.line(line).is_none());
        assert!(doc.node(a).is_none());
        // Remote still has the line; local does not.
        assert!(f.editor.persistence().line(line).is_some());
    }

    #[test]
    fn test_undo_failure_leaves_pointer() {
        let mut f = fixture();
        let a = node_at(&mut f, 0.0, 0.0);
        f.editor.persistence().fail_once(Operation::DeleteNode);
        assert!(block_on(f.editor.undo()).is_err());
        assert!(f.editor.can_undo());
        assert!(!f.editor.can_redo());

        // Retrying succeeds.
        assert!(block_on(f.editor.undo()).unwrap());
        assert!(f.editor.document().node(a).is_none());
        assert!(!f.editor.can_undo());
    }

    #[test]
    fn test_section_link_renames_with_collision_guard() {
        let mut f = fixture();
        let a = node_at(&mut f, 0.0, 0.0);
        let b = node_at(&mut f, 1.0, 1.0);
        let c = node_at(&mut f, 2.0, 2.0);
        // c already holds the finish reference.
        let mut taken = f.editor.document().node(c).unwrap().clone();
        taken.reference = "S-END".to_string();
        block_on(f.editor.update_node(taken)).unwrap();

        let mut draft = LineDraft::new(a, b);
        draft.section = Some(SectionLink {
            section_id: Uuid::new_v4(),
            start_reference: "S-START".to_string(),
            finish_reference: "S-END".to_string(),
        });
        block_on(f.editor.create_line(draft)).unwrap();
        let doc = f.editor.document();
        assert_eq!(doc.node(a).unwrap().reference, "S-START");
        assert_eq!(doc.node(b).unwrap().reference, "MH2");

        block_on(f.editor.undo()).unwrap();
        let doc = f.editor.document();
        assert!(doc.lines.is_empty());
        assert_eq!(doc.node(a).unwrap().reference, "MH1");
    }

    #[test]
    fn test_line_validation() {
        let mut f = fixture();
        let a = node_at(&mut f, 0.0, 0.0);
        assert!(matches!(
            block_on(f.editor.create_line(LineDraft::new(a, a))),
            Err(EditorError::InvalidLine(_))
        ));
        let other = block_on(f.editor.create_node(NodeDraft::new(
            f.manhole,
            GeoPoint::new(0.0, 0.0),
            Context::Canvas,
        )))
        .unwrap();
        assert!(matches!(
            block_on(f.editor.create_line(LineDraft::new(a, other))),
            Err(EditorError::ContextMismatch { .. })
        ));
    }

    #[test]
    fn test_waypoint_editing() {
        let mut f = fixture();
        let a = node_at(&mut f, 0.0, 0.0);
        let b = node_at(&mut f, 0.0, 4.0);
        let line = block_on(f.editor.create_line(LineDraft::new(a, b))).unwrap();

        let i = block_on(f.editor.insert_waypoint(line, 0, GeoPoint::new(1.0, 2.0))).unwrap();
        assert_eq!(i, 0);
        let j = block_on(f.editor.insert_waypoint(line, 1, GeoPoint::new(1.0, 3.0))).unwrap();
        assert_eq!(j, 1);
        block_on(f.editor.move_waypoint(line, 0, GeoPoint::new(-1.0, 1.0))).unwrap();
        assert_eq!(
            f.editor.document().line(line).unwrap().waypoints,
            vec![GeoPoint::new(-1.0, 1.0), GeoPoint::new(1.0, 3.0)]
        );
        assert!(block_on(f.editor.move_waypoint(line, 5, GeoPoint::new(0.0, 0.0))).is_err());

        block_on(f.editor.undo()).unwrap();
        assert_eq!(
            f.editor.document().line(line).unwrap().waypoints[0],
            GeoPoint::new(1.0, 2.0)
        );
    }

    #[test]
    fn test_degenerate_drawing_rejected() {
        let mut f = fixture();
        let bad = Geometry::Rectangle {
            bounds: Bounds::new(0.0, 1.0, 1.0, 0.0),
        };
        assert!(matches!(
            block_on(f.editor.create_drawing(DrawingDraft::new(bad, Context::Map))),
            Err(EditorError::Geometry(_))
        ));
        assert!(f.editor.history().is_empty());
        assert_eq!(f.editor.persistence().counts(), (0, 0, 0));
    }

    #[test]
    fn test_style_and_visibility_are_recorded() {
        let mut f = fixture();
        let id = block_on(
            f.editor
                .create_drawing(DrawingDraft::new(rect(), Context::Map)),
        )
        .unwrap();
        let style = Style {
            weight: 7.0,
            ..Style::default()
        };
        block_on(f.editor.update_drawing_style(id, style.clone())).unwrap();
        block_on(f.editor.set_drawing_visible(id, false)).unwrap();
        assert_eq!(f.editor.history().len(), 3);
        assert_eq!(f.editor.persistence().drawing(id).unwrap().style, style);

        block_on(f.editor.undo()).unwrap();
        assert!(f.editor.document().drawing(id).unwrap().visible);
        // No-op updates are not recorded.
        block_on(f.editor.update_drawing_style(id, style)).unwrap();
        assert_eq!(f.editor.history().len(), 3);
    }

    #[test]
    fn test_delete_drawing_restores_paint_order() {
        let mut f = fixture();
        let ids: Vec<_> = (0..3)
            .map(|_| {
                block_on(
                    f.editor
                        .create_drawing(DrawingDraft::new(rect(), Context::Map)),
                )
                .unwrap()
            })
            .collect();
        block_on(f.editor.delete_drawing(ids[1])).unwrap();
        block_on(f.editor.undo()).unwrap();
        assert_eq!(f.editor.document().drawing_order, ids);
    }

    #[test]
    fn test_fit_bounds_pads_union() {
        let mut f = fixture();
        node_at(&mut f, 0.0, 0.0);
        node_at(&mut f, 10.0, 20.0);
        let bounds = f.editor.fit_bounds(Context::Map).unwrap();
        assert!(bounds.approx_eq(&Bounds::new(10.5, -0.5, 21.0, -1.0), 1e-9));
        assert!(f.editor.fit_bounds(Context::Canvas).is_none());
    }
}
