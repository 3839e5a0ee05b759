//! Component records shared by the store, subsystems, and gateway.
//!
//! A `ComponentRecord` is the common envelope (`uri`, `enabled`, `visible`,
//! `exists`) around a category-specific `ComponentBody`. Records are plain
//! values: the store owns the authoritative copy and hands out clones, so a
//! caller can never observe a half-written record.
//!
//! Category/body pairing (checked by `ComponentRecord::validate`):
//! * `Actions`, `Tools`  -> `ComponentBody::Action`
//! * `Settings`          -> `ComponentBody::Setting`
//! * `Panels`, `Widgets` -> `ComponentBody::Surface`

use core_uri::{Category, Uri};
use serde::{Deserialize, Serialize};

mod action;
mod error;
pub mod layout;
mod setting;

pub use action::{ActionState, Shortcuts};
pub use error::{BridgeError, BridgeResult, CancelReason, ErrorKind};
pub use layout::{Attachment, Size, SurfaceState, Vec2, WidgetHandle};
pub use setting::{SettingState, SettingValue, ValueSelector};

/// Opaque caller-supplied fields carried alongside known request fields and
/// forwarded verbatim to the control plane.
pub type Passthrough = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ComponentBody {
    Action(ActionState),
    Setting(SettingState),
    Surface(SurfaceState),
}

impl ComponentBody {
    /// Whether this body shape is legal for records of `category`.
    pub fn accepts(&self, category: Category) -> bool {
        match self {
            ComponentBody::Action(_) => matches!(category, Category::Actions | Category::Tools),
            ComponentBody::Setting(_) => category == Category::Settings,
            ComponentBody::Surface(_) => category.is_surface(),
        }
    }

    fn shape(&self) -> &'static str {
        match self {
            ComponentBody::Action(_) => "action",
            ComponentBody::Setting(_) => "setting",
            ComponentBody::Surface(_) => "surface",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub uri: Uri,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub exists: bool,
    #[serde(flatten)]
    pub body: ComponentBody,
}

const fn default_true() -> bool {
    true
}

impl ComponentRecord {
    fn with_body(uri: Uri, body: ComponentBody) -> Self {
        Self {
            uri,
            enabled: true,
            visible: true,
            exists: true,
            body,
        }
    }

    pub fn action(uri: Uri, state: ActionState) -> Self {
        Self::with_body(uri, ComponentBody::Action(state))
    }

    pub fn setting(uri: Uri, state: SettingState) -> Self {
        Self::with_body(uri, ComponentBody::Setting(state))
    }

    pub fn surface(uri: Uri, state: SurfaceState) -> Self {
        Self::with_body(uri, ComponentBody::Surface(state))
    }

    pub fn category(&self) -> Option<Category> {
        self.uri.category
    }

    pub fn as_action(&self) -> Option<&ActionState> {
        match &self.body {
            ComponentBody::Action(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_action_mut(&mut self) -> Option<&mut ActionState> {
        match &mut self.body {
            ComponentBody::Action(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_setting(&self) -> Option<&SettingState> {
        match &self.body {
            ComponentBody::Setting(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_setting_mut(&mut self) -> Option<&mut SettingState> {
        match &mut self.body {
            ComponentBody::Setting(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_surface(&self) -> Option<&SurfaceState> {
        match &self.body {
            ComponentBody::Surface(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_surface_mut(&mut self) -> Option<&mut SurfaceState> {
        match &mut self.body {
            ComponentBody::Surface(s) => Some(s),
            _ => None,
        }
    }

    /// Registration-time checks: the URI carries every required field, the
    /// body shape fits the category, and per-body invariants hold.
    pub fn validate(&self) -> BridgeResult<()> {
        if let Some(field) = self.uri.missing_required() {
            return Err(BridgeError::invalid_value(
                &self.uri,
                format!("stored uri is missing `{field}`"),
            ));
        }
        if let Some(field) = self.uri.unprintable_id() {
            return Err(BridgeError::invalid_value(
                &self.uri,
                format!("`{field}` must be non-empty, not `*`, and free of `/` and surrounding spaces"),
            ));
        }
        let category = self.uri.category.unwrap_or(Category::Actions);
        if !self.body.accepts(category) {
            return Err(BridgeError::invalid_value(
                &self.uri,
                format!(
                    "{} body is not valid for category {}",
                    self.body.shape(),
                    category.as_str()
                ),
            ));
        }
        match &self.body {
            ComponentBody::Setting(s) => s
                .validate()
                .map_err(|reason| BridgeError::invalid_value(&self.uri, reason)),
            ComponentBody::Surface(s) if !s.size.is_valid() => Err(BridgeError::InvalidSize {
                uri: self.uri.clone(),
                width: s.size.width,
                height: s.size.height,
            }),
            _ => Ok(()),
        }
    }
}
