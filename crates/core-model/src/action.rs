//! Action record fields.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Ordered keyboard shortcuts bound to an action. Most actions carry zero to two.
pub type Shortcuts = SmallVec<[String; 2]>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionState {
    #[serde(default)]
    pub checkable: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub tooltip: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub shortcuts: Shortcuts,
    #[serde(default)]
    pub disable_as_tool: bool,
}

impl ActionState {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Checkable action starting in `checked` state.
    pub fn toggle(text: impl Into<String>, checked: bool) -> Self {
        Self {
            checkable: true,
            checked,
            ..Self::new(text)
        }
    }

    pub fn with_shortcut(mut self, shortcut: impl Into<String>) -> Self {
        self.shortcuts.push(shortcut.into());
        self
    }

    /// Flip `checked` when checkable. Returns the committed checked state
    /// (`None` for non-checkable actions).
    pub fn apply_activation(&mut self) -> Option<bool> {
        if self.checkable {
            self.checked = !self.checked;
            Some(self.checked)
        } else {
            None
        }
    }
}
