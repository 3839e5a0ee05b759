//! Surface geometry for Panels and Widgets.
//!
//! The core never lays anything out; it only stores the geometry a plugin
//! requested and enforces the invariants the layout engine relies on:
//!
//! * `Size` components are finite and non-negative (`Size::is_valid`).
//! * An `Attachment` names another Panel/Widget URI. The attachment graph is
//!   a forest: every surface has at most one outgoing attachment and no chain
//!   may loop back to its start. The cycle check itself lives in the widgets
//!   subsystem because it needs a consistent view across records.
//! * `WidgetHandle` is an opaque token supplied by the widget host. The core
//!   stores and returns it but never interprets it.

use core_uri::Uri;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Finite and non-negative in both dimensions. NaN is rejected.
    pub fn is_valid(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width >= 0.0 && self.height >= 0.0
    }
}

/// Placement of a surface relative to a target surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(alias = "targetWidgetUri")]
    pub target_uri: Uri,
    #[serde(default)]
    pub target_anchor: Vec2,
    #[serde(default)]
    pub subject_anchor: Vec2,
    #[serde(default)]
    pub offset: Vec2,
    #[serde(default)]
    pub allow_overflow: bool,
}

impl Attachment {
    pub fn to(target_uri: Uri) -> Self {
        Self {
            target_uri,
            target_anchor: Vec2::ZERO,
            subject_anchor: Vec2::ZERO,
            offset: Vec2::ZERO,
            allow_overflow: false,
        }
    }
}

/// Opaque native widget reference owned by the widget host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetHandle(pub u64);

/// Panel/Widget specific record fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceState {
    #[serde(default)]
    pub size: Size,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(default)]
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<WidgetHandle>,
}

impl SurfaceState {
    pub fn with_size(size: Size) -> Self {
        Self {
            size,
            ..Self::default()
        }
    }

    /// Target of the outgoing attachment, if any.
    pub fn attached_to(&self) -> Option<&Uri> {
        self.attachment.as_ref().map(|a| &a.target_uri)
    }
}
