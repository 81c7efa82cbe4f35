//! Keyboard shortcut registry.

use crate::input::{KeyEvent, Modifiers};

/// What a shortcut does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortcutAction {
    Undo,
    Redo,
    /// Delete the active drawing.
    Delete,
    /// Abort the current drag, tool or line pick.
    Cancel,
    /// Complete a click-sequence tool.
    Finish,
}

/// A keyboard shortcut definition. `primary` is Ctrl, or Cmd on macOS.
#[derive(Debug, Clone)]
pub struct Shortcut {
    pub key: &'static str,
    pub primary: bool,
    pub shift: bool,
    pub action: ShortcutAction,
    pub description: &'static str,
}

impl Shortcut {
    pub const fn new(
        key: &'static str,
        primary: bool,
        shift: bool,
        action: ShortcutAction,
        description: &'static str,
    ) -> Self {
        Self {
            key,
            primary,
            shift,
            action,
            description,
        }
    }

    /// Format the shortcut for display (e.g., "Ctrl+Shift+Z").
    pub fn format(&self) -> String {
        let mut parts = Vec::new();
        if self.primary {
            parts.push("Ctrl");
        }
        if self.shift {
            parts.push("Shift");
        }
        parts.push(self.key);
        parts.join("+")
    }

    fn matches(&self, key: &str, modifiers: Modifiers) -> bool {
        self.key.eq_ignore_ascii_case(key)
            && self.primary == modifiers.primary()
            && self.shift == modifiers.shift
    }
}

/// Registry of all keyboard shortcuts.
pub struct ShortcutRegistry;

impl ShortcutRegistry {
    pub fn all() -> Vec<Shortcut> {
        vec![
            Shortcut::new("Z", true, false, ShortcutAction::Undo, "Undo"),
            Shortcut::new("Z", true, true, ShortcutAction::Redo, "Redo"),
            Shortcut::new("Y", true, false, ShortcutAction::Redo, "Redo"),
            Shortcut::new("Delete", false, false, ShortcutAction::Delete, "Delete selected drawing"),
            Shortcut::new("Backspace", false, false, ShortcutAction::Delete, "Delete selected drawing"),
            Shortcut::new("Escape", false, false, ShortcutAction::Cancel, "Cancel current action"),
            Shortcut::new("Enter", false, false, ShortcutAction::Finish, "Finish shape"),
        ]
    }

    /// Action bound to a key press. Keys typed into a text field never
    /// trigger shortcuts.
    pub fn resolve(event: &KeyEvent) -> Option<ShortcutAction> {
        if event.in_text_input {
            return None;
        }
        Self::all()
            .into_iter()
            .find(|s| s.matches(&event.key, event.modifiers))
            .map(|s| s.action)
    }

    pub fn print_all() {
        println!("\n=== Keyboard Shortcuts ===");
        for shortcut in Self::all() {
            println!("  {:20} {}", shortcut.format(), shortcut.description);
        }
        println!();
    }
}
