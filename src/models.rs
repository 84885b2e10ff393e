use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in viewport coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Size of the visible area the popups are laid out in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

/// Estimated popup footprint used by the positioning algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupGeometry {
    pub width: i32,
    pub height: i32,
    /// Distance between the pointer and the popup corner.
    pub offset: i32,
    /// Minimum distance kept from every viewport edge.
    pub margin: i32,
}

impl Default for PopupGeometry {
    fn default() -> Self {
        Self {
            width: 350,
            height: 200,
            offset: 10,
            margin: 10,
        }
    }
}

/// Opaque popup identifier, unique within a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PopupId(String);

impl PopupId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PopupId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PopupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifies which page an explanation request came from and where its
/// result has to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationId(pub u64);

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

/// What a popup currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupContent {
    Loading,
    Explanation(String),
    Error(String),
}

impl PopupContent {
    pub fn is_loading(&self) -> bool {
        matches!(self, PopupContent::Loading)
    }
}

/// A text selection taken from the page at pointer-up time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub text: String,
    pub pointer: Position,
}

impl Selection {
    pub fn new(raw: &str, pointer: Position) -> Self {
        Self {
            text: raw.trim().to_string(),
            pointer,
        }
    }
}
