//! SiteMark core library
//!
//! Platform-agnostic engine for annotating a geographic map or a blank
//! canvas: typed point nodes, lines between them, and vector drawings that
//! can be moved, scaled and rotated, with undo/redo and pluggable
//! persistence.

pub mod config;
pub mod document;
pub mod editor;
pub mod geometry;
pub mod handles;
pub mod history;
pub mod input;
pub mod model;
pub mod persistence;
pub mod projection;
pub mod session;
pub mod shortcuts;
pub mod surface;
pub mod tools;
pub mod transform;

pub use config::{ConfigError, EditorConfig, PersistPolicy};
pub use document::{Document, LineHit};
pub use editor::{DrawingDraft, Editor, EditorError, EditorResult, LineDraft, NodeDraft};
pub use geometry::{Bounds, Context, GeoPoint, Geometry, GeometryError, Scale};
pub use handles::{Handle, HandleCache, HandleKind};
pub use history::{Command, History};
pub use input::{KeyEvent, Modifiers, MouseButton, PointerEvent, PointerPosition};
pub use model::{Drawing, Line, Node, NodeType, SectionLink, Style};
pub use persistence::{MemoryPersistence, PersistError, Persistence, ViewportState};
pub use projection::{CanvasProjector, MercatorProjector, Projector};
pub use session::{Mode, Outcome, Session, SessionError};
pub use shortcuts::{ShortcutAction, ShortcutRegistry};
pub use surface::{Paint, RecordingSurface, Surface};
pub use tools::DrawTool;
pub use transform::{TransformCommit, TransformController};

#[cfg(not(target_arch = "wasm32"))]
pub use persistence::FilePersistence;
