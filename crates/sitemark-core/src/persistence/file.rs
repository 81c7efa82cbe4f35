//! File-based persistence for native platforms.

use super::{BoxFuture, Operation, PersistError, PersistResult, Persistence, ViewportState};
use crate::document::Document;
use crate::model::{Drawing, DrawingId, Line, LineId, Node, NodeId, ProjectId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

/// On-disk layout of a project file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredProject {
    pub document: Document,
    #[serde(default)]
    pub viewports: Vec<ViewportState>,
}

/// Stores one project as a JSON file, rewritten after every change.
pub struct FilePersistence {
    path: PathBuf,
    project: RwLock<StoredProject>,
}

fn lock_error(e: impl std::fmt::Display) -> PersistError {
    PersistError::Other(format!("Lock error: {}", e))
}

impl FilePersistence {
    /// Open the project file at `path`, starting an empty project if the
    /// file does not exist yet. Parent directories are created as needed.
    pub fn open(path: impl Into<PathBuf>) -> PersistResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                PersistError::Io(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        let project = if path.exists() {
            let json = fs::read_to_string(&path).map_err(|e| {
                PersistError::Io(format!("Failed to read {}: {}", path.display(), e))
            })?;
            serde_json::from_str(&json).map_err(|e| {
                PersistError::Serialization(format!("Failed to parse {}: {}", path.display(), e))
            })?
        } else {
            log::info!("Starting new project file at {}", path.display());
            StoredProject {
                document: Document::new(Uuid::new_v4()),
                viewports: Vec::new(),
            }
        };
        Ok(Self {
            path,
            project: RwLock::new(project),
        })
    }

    /// Project file in the default location.
    ///
    /// On Unix: `~/.local/share/sitemark/projects/<name>.json`
    /// On Windows: `%LOCALAPPDATA%\sitemark\projects\<name>.json`
    pub fn default_location(name: &str) -> PersistResult<Self> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| PersistError::Io("Could not determine home directory".to_string()))?;
        let safe: String = name
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        Self::open(base.join("sitemark").join("projects").join(format!("{safe}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn project_id(&self) -> PersistResult<ProjectId> {
        Ok(self.project.read().map_err(lock_error)?.document.project_id)
    }

    /// Snapshot of the stored entities, for starting an editing session.
    pub fn load_document(&self) -> PersistResult<Document> {
        Ok(self.project.read().map_err(lock_error)?.document.clone())
    }

    pub fn viewports(&self) -> PersistResult<Vec<ViewportState>> {
        Ok(self.project.read().map_err(lock_error)?.viewports.clone())
    }

    /// Store the node-type catalog alongside the entities.
    pub fn save_node_types(&self, document: &Document) -> PersistResult<()> {
        self.modify(|p| {
            p.document.node_types = document.node_types.clone();
            Ok(())
        })
    }

    /// Apply `f` to a copy of the stored project and rewrite the file. The
    /// copy replaces the stored project only once the write succeeded.
    fn modify<T>(
        &self,
        f: impl FnOnce(&mut StoredProject) -> PersistResult<T>,
    ) -> PersistResult<T> {
        let mut project = self.project.write().map_err(lock_error)?;
        let mut next = project.clone();
        let value = f(&mut next)?;
        let json = serde_json::to_string_pretty(&next)
            .map_err(|e| PersistError::Serialization(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| {
            PersistError::Io(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        *project = next;
        Ok(value)
    }

    fn run<T: 'static>(
        &self,
        operation: Operation,
        f: impl FnOnce(&mut StoredProject) -> PersistResult<T> + 'static,
    ) -> BoxFuture<'_, PersistResult<T>> {
        Box::pin(async move {
            let result = self.modify(f);
            if let Err(e) = &result {
                log::debug!("{operation} failed: {e}");
            }
            result
        })
    }
}

impl Persistence for FilePersistence {
    fn create_node(&self, node: &Node) -> BoxFuture<'_, PersistResult<Node>> {
        let node = node.clone();
        self.run(Operation::CreateNode, move |p| {
            p.document.insert_node(node.clone());
            Ok(node)
        })
    }

    fn update_node(&self, node: &Node) -> BoxFuture<'_, PersistResult<Node>> {
        let node = node.clone();
        self.run(Operation::UpdateNode, move |p| {
            let stored = p
                .document
                .node_mut(node.id)
                .ok_or_else(|| PersistError::NotFound(format!("node {}", node.id)))?;
            *stored = node.clone();
            Ok(node)
        })
    }

    fn delete_node(&self, id: NodeId) -> BoxFuture<'_, PersistResult<()>> {
        self.run(Operation::DeleteNode, move |p| {
            p.document.remove_node(id);
            Ok(())
        })
    }

    fn create_line(&self, line: &Line) -> BoxFuture<'_, PersistResult<Line>> {
        let line = line.clone();
        self.run(Operation::CreateLine, move |p| {
            p.document.insert_line(line.clone());
            Ok(line)
        })
    }

    fn update_line(&self, line: &Line) -> BoxFuture<'_, PersistResult<Line>> {
        let line = line.clone();
        self.run(Operation::UpdateLine, move |p| {
            if p.document.line(line.id).is_none() {
                return Err(PersistError::NotFound(format!("line {}", line.id)));
            }
            p.document.insert_line(line.clone());
            Ok(line)
        })
    }

    fn delete_line(&self, id: LineId) -> BoxFuture<'_, PersistResult<()>> {
        self.run(Operation::DeleteLine, move |p| {
            p.document.remove_line(id);
            Ok(())
        })
    }

    fn create_drawing(&self, drawing: &Drawing) -> BoxFuture<'_, PersistResult<Drawing>> {
        let drawing = drawing.clone();
        self.run(Operation::CreateDrawing, move |p| {
            p.document.insert_drawing(drawing.clone());
            Ok(drawing)
        })
    }

    fn update_drawing(&self, drawing: &Drawing) -> BoxFuture<'_, PersistResult<Drawing>> {
        let drawing = drawing.clone();
        self.run(Operation::UpdateDrawing, move |p| {
            let stored = p
                .document
                .drawing_mut(drawing.id)
                .ok_or_else(|| PersistError::NotFound(format!("drawing {}", drawing.id)))?;
            *stored = drawing.clone();
            Ok(drawing)
        })
    }

    fn delete_drawing(&self, id: DrawingId) -> BoxFuture<'_, PersistResult<()>> {
        self.run(Operation::DeleteDrawing, move |p| {
            p.document.remove_drawing(id);
            Ok(())
        })
    }

    fn save_viewport(
        &self,
        _project: ProjectId,
        viewport: &ViewportState,
    ) -> BoxFuture<'_, PersistResult<()>> {
        let viewport = *viewport;
        self.run(Operation::SaveViewport, move |p| {
            p.viewports.retain(|v| v.context != viewport.context);
            p.viewports.push(viewport);
            Ok(())
        })
    }
}
