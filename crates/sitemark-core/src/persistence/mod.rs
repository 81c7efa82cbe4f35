//! Remote persistence interface and its local implementations.
//!
//! The editing session is the only writer; the persistence layer is the
//! system of record. Every call returns the persisted record, which may
//! carry a server-assigned id that the editor reconciles into local state.

mod memory;
mod viewport;

#[cfg(not(target_arch = "wasm32"))]
mod file;

pub use memory::MemoryPersistence;
pub use viewport::{DEFAULT_VIEWPORT_DEBOUNCE_MS, ViewportSaver, ViewportState};

#[cfg(not(target_arch = "wasm32"))]
pub use file::{FilePersistence, StoredProject};

use crate::model::{Drawing, DrawingId, Line, LineId, Node, NodeId, ProjectId};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Rejected by server: {0}")]
    Rejected(String),
    #[error("Persistence error: {0}")]
    Other(String),
}

/// Result type for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Boxed future for async operations (compatible with WASM).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// The remote calls the editor makes, named for logs and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateNode,
    UpdateNode,
    DeleteNode,
    CreateLine,
    UpdateLine,
    DeleteLine,
    CreateDrawing,
    UpdateDrawing,
    DeleteDrawing,
    SaveViewport,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::CreateNode => "create node",
            Operation::UpdateNode => "update node",
            Operation::DeleteNode => "delete node",
            Operation::CreateLine => "create line",
            Operation::UpdateLine => "update line",
            Operation::DeleteLine => "delete line",
            Operation::CreateDrawing => "create drawing",
            Operation::UpdateDrawing => "update drawing",
            Operation::DeleteDrawing => "delete drawing",
            Operation::SaveViewport => "save viewport",
        };
        f.write_str(name)
    }
}

/// Native backends are shared across threads by their hosts; on WASM
/// everything is single-threaded and the bounds are dropped.
#[cfg(not(target_arch = "wasm32"))]
pub trait MaybeSync: Send + Sync {}
#[cfg(not(target_arch = "wasm32"))]
impl<T: Send + Sync> MaybeSync for T {}

#[cfg(target_arch = "wasm32")]
pub trait MaybeSync {}
#[cfg(target_arch = "wasm32")]
impl<T> MaybeSync for T {}

/// Trait for entity persistence backends.
///
/// Creates and updates return the stored record. Deletes of records the
/// backend does not hold succeed, so a replayed delete is harmless.
pub trait Persistence: MaybeSync {
    fn create_node(&self, node: &Node) -> BoxFuture<'_, PersistResult<Node>>;
    fn update_node(&self, node: &Node) -> BoxFuture<'_, PersistResult<Node>>;
    fn delete_node(&self, id: NodeId) -> BoxFuture<'_, PersistResult<()>>;

    fn create_line(&self, line: &Line) -> BoxFuture<'_, PersistResult<Line>>;
    fn update_line(&self, line: &Line) -> BoxFuture<'_, PersistResult<Line>>;
    fn delete_line(&self, id: LineId) -> BoxFuture<'_, PersistResult<()>>;

    fn create_drawing(&self, drawing: &Drawing) -> BoxFuture<'_, PersistResult<Drawing>>;
    fn update_drawing(&self, drawing: &Drawing) -> BoxFuture<'_, PersistResult<Drawing>>;
    fn delete_drawing(&self, id: DrawingId) -> BoxFuture<'_, PersistResult<()>>;

    /// Store the last viewport of a project.
    fn save_viewport(
        &self,
        project: ProjectId,
        viewport: &ViewportState,
    ) -> BoxFuture<'_, PersistResult<()>>;
}
