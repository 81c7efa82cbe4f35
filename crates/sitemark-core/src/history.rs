//! Bounded undo/redo log of invertible commands.
//!
//! The log only stores commands and a position; the editor performs the
//! actual inversion and replay against the entity stores and persistence.

use crate::geometry::GeoPoint;
use crate::model::{Drawing, Line, LineId, Node, NodeId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default number of commands kept.
pub const DEFAULT_MAX_HISTORY: usize = 50;

/// One reference rename folded into a line creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub node_id: NodeId,
    pub previous_reference: String,
    pub next_reference: String,
}

/// A committed mutation with enough state to undo and redo it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Command {
    CreateNode {
        node: Node,
    },
    /// A node and the lines that were deleted with it.
    DeleteNode {
        node: Node,
        deleted_lines: Vec<Line>,
    },
    UpdateNode {
        previous: Node,
        next: Node,
    },
    MoveNode {
        node_id: NodeId,
        previous: GeoPoint,
        next: GeoPoint,
    },
    CreateLine {
        line: Line,
        #[serde(default)]
        node_updates: Vec<NodeUpdate>,
    },
    DeleteLine {
        line: Line,
    },
    UpdateWaypoints {
        line_id: LineId,
        previous: Vec<GeoPoint>,
        next: Vec<GeoPoint>,
    },
    CreateDrawing {
        drawing: Drawing,
    },
    /// `index` is the drawing's position in paint order.
    DeleteDrawing {
        drawing: Drawing,
        index: usize,
    },
    UpdateDrawing {
        previous: Drawing,
        next: Drawing,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateNode { .. } => "CreateNode",
            Command::DeleteNode { .. } => "DeleteNode",
            Command::UpdateNode { .. } => "UpdateNode",
            Command::MoveNode { .. } => "MoveNode",
            Command::CreateLine { .. } => "CreateLine",
            Command::DeleteLine { .. } => "DeleteLine",
            Command::UpdateWaypoints { .. } => "UpdateWaypoints",
            Command::CreateDrawing { .. } => "CreateDrawing",
            Command::DeleteDrawing { .. } => "DeleteDrawing",
            Command::UpdateDrawing { .. } => "UpdateDrawing",
        }
    }

    /// Replace every occurrence of entity id `old` with `new`.
    pub fn remap_id(&mut self, old: Uuid, new: Uuid) {
        let swap = |id: &mut Uuid| {
            if *id == old {
                *id = new;
            }
        };
        let swap_line = |line: &mut Line| {
            swap(&mut line.id);
            swap(&mut line.start_node);
            swap(&mut line.end_node);
        };
        match self {
            Command::CreateNode { node } => swap(&mut node.id),
            Command::DeleteNode {
                node,
                deleted_lines,
            } => {
                swap(&mut node.id);
                deleted_lines.iter_mut().for_each(swap_line);
            }
            Command::UpdateNode { previous, next } => {
                swap(&mut previous.id);
                swap(&mut next.id);
            }
            Command::MoveNode { node_id, .. } => swap(node_id),
            Command::CreateLine { line, node_updates } => {
                swap_line(line);
                for update in node_updates {
                    swap(&mut update.node_id);
                }
            }
            Command::DeleteLine { line } => swap_line(line),
            Command::UpdateWaypoints { line_id, .. } => swap(line_id),
            Command::CreateDrawing { drawing } | Command::DeleteDrawing { drawing, .. } => {
                swap(&mut drawing.id)
            }
            Command::UpdateDrawing { previous, next } => {
                swap(&mut previous.id);
                swap(&mut next.id);
            }
        }
    }
}

/// Undo/redo log.
///
/// `applied` counts the commands currently in effect: the undo target is
/// `commands[applied - 1]` and the redo target is `commands[applied]`.
#[derive(Debug, Clone)]
pub struct History {
    commands: Vec<Command>,
    applied: usize,
    max_size: usize,
    replaying: bool,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl History {
    pub fn new(max_size: usize) -> Self {
        Self {
            commands: Vec::new(),
            applied: 0,
            max_size: max_size.max(1),
            replaying: false,
        }
    }

    /// Append a user command, discarding the redo branch and evicting the
    /// oldest entry when full. Ignored while replaying.
    pub fn push(&mut self, command: Command) -> bool {
        if self.replaying {
            log::trace!("Ignoring {} recorded during replay", command.name());
            return false;
        }
        self.commands.truncate(self.applied);
        self.commands.push(command);
        self.applied = self.commands.len();
        if self.commands.len() > self.max_size {
            let excess = self.commands.len() - self.max_size;
            self.commands.drain(..excess);
            self.applied -= excess;
        }
        true
    }

    pub fn can_undo(&self) -> bool {
        self.applied > 0
    }

    pub fn can_redo(&self) -> bool {
        self.applied < self.commands.len()
    }

    /// Command the next undo inverts.
    pub fn undo_target(&self) -> Option<&Command> {
        self.applied.checked_sub(1).and_then(|i| self.commands.get(i))
    }

    /// Command the next redo reapplies.
    pub fn redo_target(&self) -> Option<&Command> {
        self.commands.get(self.applied)
    }

    /// Move the position back after a successful undo.
    pub fn step_back(&mut self) {
        self.applied = self.applied.saturating_sub(1);
    }

    /// Move the position forward after a successful redo.
    pub fn step_forward(&mut self) {
        if self.applied < self.commands.len() {
            self.applied += 1;
        }
    }

    pub fn set_replaying(&mut self, replaying: bool) {
        self.replaying = replaying;
    }

    pub fn is_replaying(&self) -> bool {
        self.replaying
    }

    /// Rewrite an entity id in every stored command.
    pub fn remap_id(&mut self, old: Uuid, new: Uuid) {
        for command in &mut self.commands {
            command.remap_id(old, new);
        }
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.applied = 0;
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Index of the undo target, or `None` when nothing can be undone.
    pub fn pointer(&self) -> Option<usize> {
        self.applied.checked_sub(1)
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Context;

    fn move_cmd(n: f64) -> Command {
        Command::MoveNode {
            node_id: Uuid::nil(),
            previous: GeoPoint::new(n, 0.0),
            next: GeoPoint::new(n + 1.0, 0.0),
        }
    }

    fn lat_of(command: &Command) -> f64 {
        match command {
            Command::MoveNode { previous, .. } => previous.lat,
            _ => f64::NAN,
        }
    }

    #[test]
    fn test_push_and_navigate() {
        let mut history = History::new(10);
        assert!(!history.can_undo());
        history.push(move_cmd(0.0));
        history.push(move_cmd(1.0));
        assert_eq!(history.pointer(), Some(1));
        assert_eq!(lat_of(history.undo_target().unwrap()), 1.0);

        history.step_back();
        assert!(history.can_redo());
        assert_eq!(lat_of(history.redo_target().unwrap()), 1.0);
        history.step_forward();
        assert!(!history.can_redo());
    }

    #[test]
    fn test_push_truncates_redo_branch() {
        let mut history = History::new(10);
        for i in 0..3 {
            history.push(move_cmd(i as f64));
        }
        history.step_back();
        history.step_back();
        history.push(move_cmd(9.0));
        assert_eq!(history.len(), 2);
        assert!(!history.can_redo());
        assert_eq!(lat_of(history.undo_target().unwrap()), 9.0);
    }

    #[test]
    fn test_bounded_with_head_eviction() {
        let mut history = History::new(50);
        for i in 0..51 {
            history.push(move_cmd(i as f64));
            assert!(history.len() <= 50);
        }
        assert_eq!(history.len(), 50);
        assert_eq!(lat_of(&history.commands()[0]), 1.0);
        assert_eq!(history.pointer(), Some(49));

        let mut undos = 0;
        while history.can_undo() {
            history.step_back();
            undos += 1;
        }
        assert_eq!(undos, 50);
    }

    #[test]
    fn test_eviction_while_behind_keeps_contiguous() {
        let mut history = History::new(3);
        for i in 0..3 {
            history.push(move_cmd(i as f64));
        }
        history.step_back();
        history.push(move_cmd(7.0));
        history.push(move_cmd(8.0));
        assert_eq!(history.len(), 3);
        let lats: Vec<f64> = history.commands().iter().map(lat_of).collect();
        assert_eq!(lats, vec![1.0, 7.0, 8.0]);
        assert_eq!(history.pointer(), Some(2));
    }

    #[test]
    fn test_push_ignored_while_replaying() {
        let mut history = History::default();
        history.set_replaying(true);
        assert!(!history.push(move_cmd(0.0)));
        history.set_replaying(false);
        assert!(history.push(move_cmd(0.0)));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_remap_rewrites_line_endpoints() {
        let old = Uuid::new_v4();
        let new = Uuid::new_v4();
        let line = Line {
            id: Uuid::new_v4(),
            project_id: Uuid::nil(),
            start_node: old,
            end_node: Uuid::new_v4(),
            waypoints: vec![],
            section: None,
            style: Default::default(),
            context: Context::Canvas,
        };
        let mut history = History::default();
        history.push(Command::DeleteLine { line });
        history.remap_id(old, new);
        match history.undo_target().unwrap() {
            Command::DeleteLine { line } => assert_eq!(line.start_node, new),
            other => panic!("unexpected {}", other.name()),
        }
    }

    #[test]
    fn test_command_serde_shape() {
        let json = serde_json::to_value(move_cmd(0.0)).unwrap();
        assert_eq!(json["type"], "MoveNode");
        assert!(json["data"]["previous"].is_object());
    }
}
