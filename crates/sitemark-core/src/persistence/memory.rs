//! In-memory persistence implementation.

use super::{BoxFuture, Operation, PersistError, PersistResult, Persistence, ViewportState};
use crate::model::{Drawing, DrawingId, Line, LineId, Node, NodeId, ProjectId};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Records {
    nodes: HashMap<NodeId, Node>,
    lines: HashMap<LineId, Line>,
    drawings: HashMap<DrawingId, Drawing>,
    viewports: HashMap<ProjectId, ViewportState>,
}

#[derive(Debug, Default)]
struct Faults {
    always: HashSet<Operation>,
    once: HashSet<Operation>,
}

/// In-memory persistence for tests and ephemeral sessions.
///
/// Can mimic a server that assigns its own ids on create, and can be told
/// to fail chosen operations.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    records: RwLock<Records>,
    faults: RwLock<Faults>,
    calls: RwLock<Vec<Operation>>,
    server_ids: bool,
}

fn lock_error(e: impl std::fmt::Display) -> PersistError {
    PersistError::Other(format!("Lock error: {}", e))
}

impl MemoryPersistence {
    /// Create a new empty store that keeps client ids.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that replaces the id of every created record.
    pub fn with_server_ids() -> Self {
        Self {
            server_ids: true,
            ..Self::default()
        }
    }

    /// Make every call of `operation` fail until [`heal`](Self::heal).
    pub fn fail(&self, operation: Operation) {
        if let Ok(mut faults) = self.faults.write() {
            faults.always.insert(operation);
        }
    }

    /// Make the next call of `operation` fail.
    pub fn fail_once(&self, operation: Operation) {
        if let Ok(mut faults) = self.faults.write() {
            faults.once.insert(operation);
        }
    }

    pub fn heal(&self, operation: Operation) {
        if let Ok(mut faults) = self.faults.write() {
            faults.always.remove(&operation);
            faults.once.remove(&operation);
        }
    }

    /// Operations called so far, in order.
    pub fn calls(&self) -> Vec<Operation> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self, operation: Operation) -> usize {
        self.calls().iter().filter(|&&op| op == operation).count()
    }

    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.records.read().ok()?.nodes.get(&id).cloned()
    }

    pub fn line(&self, id: LineId) -> Option<Line> {
        self.records.read().ok()?.lines.get(&id).cloned()
    }

    pub fn drawing(&self, id: DrawingId) -> Option<Drawing> {
        self.records.read().ok()?.drawings.get(&id).cloned()
    }

    pub fn viewport(&self, project: ProjectId) -> Option<ViewportState> {
        self.records.read().ok()?.viewports.get(&project).copied()
    }

    /// Stored record counts as `(nodes, lines, drawings)`.
    pub fn counts(&self) -> (usize, usize, usize) {
        self.records
            .read()
            .map(|r| (r.nodes.len(), r.lines.len(), r.drawings.len()))
            .unwrap_or_default()
    }

    /// Log the call and apply any injected fault.
    fn enter(&self, operation: Operation) -> PersistResult<()> {
        self.calls.write().map_err(lock_error)?.push(operation);
        let mut faults = self.faults.write().map_err(lock_error)?;
        if faults.always.contains(&operation) || faults.once.remove(&operation) {
            return Err(PersistError::Rejected(format!("{operation} refused")));
        }
        Ok(())
    }

    fn assign_id(&self, id: Uuid) -> Uuid {
        if self.server_ids { Uuid::new_v4() } else { id }
    }
}

impl Persistence for MemoryPersistence {
    fn create_node(&self, node: &Node) -> BoxFuture<'_, PersistResult<Node>> {
        let mut node = node.clone();
        Box::pin(async move {
            self.enter(Operation::CreateNode)?;
            node.id = self.assign_id(node.id);
            let mut records = self.records.write().map_err(lock_error)?;
            records.nodes.insert(node.id, node.clone());
            Ok(node)
        })
    }

    fn update_node(&self, node: &Node) -> BoxFuture<'_, PersistResult<Node>> {
        let node = node.clone();
        Box::pin(async move {
            self.enter(Operation::UpdateNode)?;
            let mut records = self.records.write().map_err(lock_error)?;
            match records.nodes.get_mut(&node.id) {
                Some(stored) => {
                    *stored = node.clone();
                    Ok(node)
                }
                None => Err(PersistError::NotFound(format!("node {}", node.id))),
            }
        })
    }

    fn delete_node(&self, id: NodeId) -> BoxFuture<'_, PersistResult<()>> {
        Box::pin(async move {
            self.enter(Operation::DeleteNode)?;
            self.records.write().map_err(lock_error)?.nodes.remove(&id);
            Ok(())
        })
    }

    fn create_line(&self, line: &Line) -> BoxFuture<'_, PersistResult<Line>> {
        let mut line = line.clone();
        Box::pin(async move {
            self.enter(Operation::CreateLine)?;
            line.id = self.assign_id(line.id);
            let mut records = self.records.write().map_err(lock_error)?;
            records.lines.insert(line.id, line.clone());
            Ok(line)
        })
    }

    fn update_line(&self, line: &Line) -> BoxFuture<'_, PersistResult<Line>> {
        let line = line.clone();
        Box::pin(async move {
            self.enter(Operation::UpdateLine)?;
            let mut records = self.records.write().map_err(lock_error)?;
            match records.lines.get_mut(&line.id) {
                Some(stored) => {
                    *stored = line.clone();
                    Ok(line)
                }
                None => Err(PersistError::NotFound(format!("line {}", line.id))),
            }
        })
    }

    fn delete_line(&self, id: LineId) -> BoxFuture<'_, PersistResult<()>> {
        Box::pin(async move {
            self.enter(Operation::DeleteLine)?;
            self.records.write().map_err(lock_error)?.lines.remove(&id);
            Ok(())
        })
    }

    fn create_drawing(&self, drawing: &Drawing) -> BoxFuture<'_, PersistResult<Drawing>> {
        let mut drawing = drawing.clone();
        Box::pin(async move {
            self.enter(Operation::CreateDrawing)?;
            drawing.id = self.assign_id(drawing.id);
            let mut records = self.records.write().map_err(lock_error)?;
            records.drawings.insert(drawing.id, drawing.clone());
            Ok(drawing)
        })
    }

    fn update_drawing(&self, drawing: &Drawing) -> BoxFuture<'_, PersistResult<Drawing>> {
        let drawing = drawing.clone();
        Box::pin(async move {
            self.enter(Operation::UpdateDrawing)?;
            let mut records = self.records.write().map_err(lock_error)?;
            match records.drawings.get_mut(&drawing.id) {
                Some(stored) => {
                    *stored = drawing.clone();
                    Ok(drawing)
                }
                None => Err(PersistError::NotFound(format!("drawing {}", drawing.id))),
            }
        })
    }

    fn delete_drawing(&self, id: DrawingId) -> BoxFuture<'_, PersistResult<()>> {
        Box::pin(async move {
            self.enter(Operation::DeleteDrawing)?;
            self.records.write().map_err(lock_error)?.drawings.remove(&id);
            Ok(())
        })
    }

    fn save_viewport(
        &self,
        project: ProjectId,
        viewport: &ViewportState,
    ) -> BoxFuture<'_, PersistResult<()>> {
        let viewport = *viewport;
        Box::pin(async move {
            self.enter(Operation::SaveViewport)?;
            self.records
                .write()
                .map_err(lock_error)?
                .viewports
                .insert(project, viewport);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Context, GeoPoint};
    use pollster::block_on;

    fn node() -> Node {
        Node {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            node_type: Uuid::nil(),
            reference: "MH1".to_string(),
            position: GeoPoint::new(1.0, 2.0),
            cover_level: None,
            invert_level: None,
            description: None,
            context: Context::Map,
        }
    }

    #[test]
    fn test_create_and_update() {
        let store = MemoryPersistence::new();
        let mut n = node();
        let saved = block_on(store.create_node(&n)).unwrap();
        assert_eq!(saved.id, n.id);

        n.reference = "MH2".to_string();
        block_on(store.update_node(&n)).unwrap();
        assert_eq!(store.node(n.id).unwrap().reference, "MH2");
    }

    #[test]
    fn test_update_missing_is_not_found() {
        let store = MemoryPersistence::new();
        let result = block_on(store.update_node(&node()));
        assert!(matches!(result, Err(PersistError::NotFound(_))));
    }

    #[test]
    fn test_server_ids() {
        let store = MemoryPersistence::with_server_ids();
        let n = node();
        let saved = block_on(store.create_node(&n)).unwrap();
        assert_ne!(saved.id, n.id);
        assert!(store.node(saved.id).is_some());
        assert!(store.node(n.id).is_none());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = MemoryPersistence::new();
        let n = node();
        block_on(store.create_node(&n)).unwrap();
        block_on(store.delete_node(n.id)).unwrap();
        block_on(store.delete_node(n.id)).unwrap();
        assert_eq!(store.counts(), (0, 0, 0));
    }

    #[test]
    fn test_fault_injection() {
        let store = MemoryPersistence::new();
        store.fail_once(Operation::CreateNode);
        assert!(matches!(
            block_on(store.create_node(&node())),
            Err(PersistError::Rejected(_))
        ));
        assert!(block_on(store.create_node(&node())).is_ok());

        store.fail(Operation::DeleteNode);
        assert!(block_on(store.delete_node(Uuid::nil())).is_err());
        assert!(block_on(store.delete_node(Uuid::nil())).is_err());
        store.heal(Operation::DeleteNode);
        assert!(block_on(store.delete_node(Uuid::nil())).is_ok());
        assert_eq!(store.call_count(Operation::DeleteNode), 3);
    }
}
