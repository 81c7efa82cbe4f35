//! Pointer and keyboard events delivered by the rendering surface.

use crate::geometry::GeoPoint;
use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MouseButton {
    #[default]
    Left,
    Right,
    Middle,
}

/// Modifier keys state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        ctrl: false,
        alt: false,
        meta: false,
    };

    /// Ctrl on Linux/Windows, Cmd on macOS. Either counts.
    pub fn primary(&self) -> bool {
        self.ctrl || self.meta
    }

    pub fn shift() -> Self {
        Self {
            shift: true,
            ..Self::NONE
        }
    }

    pub fn primary_key() -> Self {
        Self {
            ctrl: true,
            ..Self::NONE
        }
    }
}

/// A pointer location in both pixel and native coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerPosition {
    pub pixel: Point,
    pub geo: GeoPoint,
}

impl PointerPosition {
    pub fn new(pixel: Point, geo: GeoPoint) -> Self {
        Self { pixel, geo }
    }

    /// Screen delta from another position.
    pub fn pixel_delta(&self, from: &PointerPosition) -> Vec2 {
        self.pixel - from.pixel
    }
}

/// Pointer event with both coordinate spaces attached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Down {
        position: PointerPosition,
        button: MouseButton,
        modifiers: Modifiers,
    },
    Move {
        position: PointerPosition,
        modifiers: Modifiers,
    },
    Up {
        position: PointerPosition,
        button: MouseButton,
        modifiers: Modifiers,
    },
    /// Pointer capture lost (window blur, touch cancel).
    Cancel,
}

impl PointerEvent {
    pub fn position(&self) -> Option<PointerPosition> {
        match self {
            PointerEvent::Down { position, .. }
            | PointerEvent::Move { position, .. }
            | PointerEvent::Up { position, .. } => Some(*position),
            PointerEvent::Cancel => None,
        }
    }

    pub fn modifiers(&self) -> Modifiers {
        match self {
            PointerEvent::Down { modifiers, .. }
            | PointerEvent::Move { modifiers, .. }
            | PointerEvent::Up { modifiers, .. } => *modifiers,
            PointerEvent::Cancel => Modifiers::NONE,
        }
    }
}

/// A key press.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    /// Key name, e.g. `"z"`, `"Delete"`, `"Escape"`.
    pub key: String,
    #[serde(default)]
    pub modifiers: Modifiers,
    /// Focus is inside a text field; editor shortcuts must not fire.
    #[serde(default)]
    pub in_text_input: bool,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>, modifiers: Modifiers) -> Self {
        Self {
            key: key.into(),
            modifiers,
            in_text_input: false,
        }
    }
}
