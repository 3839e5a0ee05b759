//! Setting record fields and value selection.
//!
//! Invariant: `values` is non-empty and `value < values.len()` for every
//! stored setting. `SettingState::validate` is the single check used at
//! registration; the settings subsystem re-establishes it after external
//! reconfiguration by clamping.

use core_uri::Uri;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingValue {
    pub id: String,
    pub action_uri: Uri,
    #[serde(default = "SettingValue::default_visible")]
    pub visible: bool,
}

impl SettingValue {
    pub fn new(id: impl Into<String>, action_uri: Uri) -> Self {
        Self {
            id: id.into(),
            action_uri,
            visible: true,
        }
    }

    const fn default_visible() -> bool {
        true
    }
}

/// Caller-side reference to one of a setting's values: by index or by id.
///
/// Any other JSON shape (negative numbers, booleans, objects) lands in
/// `Malformed` so a bad entry fails on its own instead of failing the
/// request that carries it. `Malformed` never resolves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValueSelector {
    Index(usize),
    Id(String),
    Malformed(serde_json::Value),
}

impl fmt::Display for ValueSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSelector::Index(i) => write!(f, "#{i}"),
            ValueSelector::Id(id) => write!(f, "`{id}`"),
            ValueSelector::Malformed(raw) => write!(f, "{raw}"),
        }
    }
}

impl From<usize> for ValueSelector {
    fn from(i: usize) -> Self {
        ValueSelector::Index(i)
    }
}

impl From<&str> for ValueSelector {
    fn from(id: &str) -> Self {
        ValueSelector::Id(id.to_owned())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingState {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub text_key: String,
    #[serde(default)]
    pub tooltip_key: String,
    #[serde(default)]
    pub value: usize,
    pub values: Vec<SettingValue>,
}

impl SettingState {
    pub fn new(text: impl Into<String>, values: Vec<SettingValue>) -> Self {
        Self {
            text: text.into(),
            values,
            ..Self::default()
        }
    }

    pub fn with_value(mut self, value: usize) -> Self {
        self.value = value;
        self
    }

    /// Index addressed by `selector`, if it names an existing value.
    pub fn resolve(&self, selector: &ValueSelector) -> Option<usize> {
        match selector {
            ValueSelector::Index(i) if *i < self.values.len() => Some(*i),
            ValueSelector::Index(_) => None,
            ValueSelector::Id(id) => self.values.iter().position(|v| &v.id == id),
            ValueSelector::Malformed(_) => None,
        }
    }

    /// Currently selected value entry.
    pub fn current(&self) -> Option<&SettingValue> {
        self.values.get(self.value)
    }

    /// Checks the stored-setting invariant, returning a reason when broken.
    pub fn validate(&self) -> Result<(), String> {
        if self.values.is_empty() {
            return Err("setting must declare at least one value".into());
        }
        if self.value >= self.values.len() {
            return Err(format!(
                "value index {} out of range for {} values",
                self.value,
                self.values.len()
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_uri::Category;

    fn ab() -> SettingState {
        SettingState::new(
            "Mode",
            vec![
                SettingValue::new("A", Uri::new(Category::Actions, "p", "a")),
                SettingValue::new("B", Uri::new(Category::Actions, "p", "b")),
            ],
        )
    }

    #[test]
    fn resolves_index_and_id() {
        let s = ab();
        assert_eq!(s.resolve(&1.into()), Some(1));
        assert_eq!(s.resolve(&"A".into()), Some(0));
        assert_eq!(s.resolve(&5.into()), None);
        assert_eq!(s.resolve(&"Z".into()), None);
    }

    #[test]
    fn validate_rejects_empty_and_out_of_range() {
        assert!(ab().validate().is_ok());
        assert!(ab().with_value(2).validate().is_err());
        assert!(SettingState::new("x", vec![]).validate().is_err());
    }

    #[test]
    fn selector_deserializes_untagged() {
        let i: ValueSelector = serde_json::from_str("1").unwrap();
        let s: ValueSelector = serde_json::from_str("\"B\"").unwrap();
        assert_eq!(i, ValueSelector::Index(1));
        assert_eq!(s, ValueSelector::Id("B".into()));
    }

    #[test]
    fn other_json_shapes_are_malformed_and_never_resolve() {
        for raw in ["-1", "true", "{}", "1.5", "null"] {
            let sel: ValueSelector = serde_json::from_str(raw).unwrap();
            assert!(matches!(sel, ValueSelector::Malformed(_)), "{raw} -> {sel:?}");
            assert_eq!(ab().resolve(&sel), None);
        }
    }
}
