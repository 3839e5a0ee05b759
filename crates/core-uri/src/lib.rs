//! Structured component addressing.
//!
//! A `Uri` names a host-owned UI component by five independent fields:
//! category, data-model scope, plugin type, plugin id, and item id. Every
//! field is optional. The same type serves two roles:
//!
//! * **Stored key**: the identity of a registered record. Stored URIs must
//!   carry `category`, `plugin_id`, and `item_id` (see `Uri::missing_required`).
//!   `data_model_scope` and `plugin_type` are qualifiers and may be absent.
//! * **Query**: any subset of fields. Absent fields are wildcards.
//!
//! Matching rule (`Uri::matches`): a query matches a stored URI iff every
//! field present in the query equals the stored field. A present query field
//! never matches an absent stored field. Matching is a plain per-field
//! predicate; there is no string pattern syntax.
//!
//! Textual form (`Display` / `FromStr`): five `/` separated segments in
//! field order, `*` for an absent field, e.g.
//! `Actions/Standalone/*/Output/Toggle`. Plugin and item ids therefore must
//! not contain `/`; the textual form exists for logs and host scripts, the
//! structured form is authoritative.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

mod parse;

pub use parse::UriParseError;

// -------------------------------------------------------------------------------------------------
// Field enums
// -------------------------------------------------------------------------------------------------

/// Component category. Each category is an independent key space in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Actions,
    Settings,
    Widgets,
    Tools,
    Panels,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Actions,
        Category::Settings,
        Category::Widgets,
        Category::Tools,
        Category::Panels,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Actions => "Actions",
            Category::Settings => "Settings",
            Category::Widgets => "Widgets",
            Category::Tools => "Tools",
            Category::Panels => "Panels",
        }
    }

    /// Panels and Widgets share the surface record shape and may attach to each other.
    pub fn is_surface(&self) -> bool {
        matches!(self, Category::Panels | Category::Widgets)
    }
}

/// Data model the component is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataModelScope {
    Edit,
    PlayClient,
    PlayServer,
    Standalone,
    Null,
}

impl DataModelScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataModelScope::Edit => "Edit",
            DataModelScope::PlayClient => "PlayClient",
            DataModelScope::PlayServer => "PlayServer",
            DataModelScope::Standalone => "Standalone",
            DataModelScope::Null => "Null",
        }
    }
}

/// Origin of the plugin that owns the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PluginType {
    Cloud,
    Local,
    Asset,
    Standalone,
}

impl PluginType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginType::Cloud => "Cloud",
            PluginType::Local => "Local",
            PluginType::Asset => "Asset",
            PluginType::Standalone => "Standalone",
        }
    }
}

/// Names a single URI field (used in validation errors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UriField {
    Category,
    DataModelScope,
    PluginType,
    PluginId,
    ItemId,
}

impl fmt::Display for UriField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UriField::Category => "category",
            UriField::DataModelScope => "dataModelScope",
            UriField::PluginType => "pluginType",
            UriField::PluginId => "pluginId",
            UriField::ItemId => "itemId",
        };
        f.write_str(s)
    }
}

// -------------------------------------------------------------------------------------------------
// Uri
// -------------------------------------------------------------------------------------------------

/// Structured, partially-wildcardable component identifier.
///
/// Ids that are empty, equal to `*`, contain `/`, or carry surrounding
/// whitespace have no textual form (`Display` output would parse back
/// differently). Stored records reject them; see [`Uri::unprintable_id`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Uri {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(default, alias = "dataModel", skip_serializing_if = "Option::is_none")]
    pub data_model_scope: Option<DataModelScope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_type: Option<PluginType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl Uri {
    /// Fully wildcard query.
    pub fn any() -> Self {
        Self::default()
    }

    /// Query for every record of one category.
    pub fn of_category(category: Category) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    /// Convenience constructor for the three required stored fields.
    pub fn new(category: Category, plugin_id: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            category: Some(category),
            data_model_scope: None,
            plugin_type: None,
            plugin_id: Some(plugin_id.into()),
            item_id: Some(item_id.into()),
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_data_model(mut self, scope: DataModelScope) -> Self {
        self.data_model_scope = Some(scope);
        self
    }

    pub fn with_plugin_type(mut self, plugin_type: PluginType) -> Self {
        self.plugin_type = Some(plugin_type);
        self
    }

    pub fn with_plugin_id(mut self, plugin_id: impl Into<String>) -> Self {
        self.plugin_id = Some(plugin_id.into());
        self
    }

    pub fn with_item_id(mut self, item_id: impl Into<String>) -> Self {
        self.item_id = Some(item_id.into());
        self
    }

    /// True when this query matches `stored` under the per-field wildcard rule.
    pub fn matches(&self, stored: &Uri) -> bool {
        field_matches(&self.category, &stored.category)
            && field_matches(&self.data_model_scope, &stored.data_model_scope)
            && field_matches(&self.plugin_type, &stored.plugin_type)
            && field_matches(&self.plugin_id, &stored.plugin_id)
            && field_matches(&self.item_id, &stored.item_id)
    }

    /// True when no field is present.
    pub fn is_wildcard(&self) -> bool {
        self.specificity() == 0
    }

    /// Number of present fields.
    pub fn specificity(&self) -> usize {
        usize::from(self.category.is_some())
            + usize::from(self.data_model_scope.is_some())
            + usize::from(self.plugin_type.is_some())
            + usize::from(self.plugin_id.is_some())
            + usize::from(self.item_id.is_some())
    }

    /// First required stored field that is absent, if any.
    pub fn missing_required(&self) -> Option<UriField> {
        if self.category.is_none() {
            Some(UriField::Category)
        } else if self.plugin_id.is_none() {
            Some(UriField::PluginId)
        } else if self.item_id.is_none() {
            Some(UriField::ItemId)
        } else {
            None
        }
    }

    /// First id field whose value does not survive `Display` then `FromStr`.
    pub fn unprintable_id(&self) -> Option<UriField> {
        let unprintable = |id: &Option<String>| {
            id.as_deref()
                .is_some_and(|s| s.is_empty() || s == "*" || s.contains('/') || s.trim() != s)
        };
        if unprintable(&self.plugin_id) {
            Some(UriField::PluginId)
        } else if unprintable(&self.item_id) {
            Some(UriField::ItemId)
        } else {
            None
        }
    }

    /// True when the URI can be used as a stored key.
    pub fn is_resolved(&self) -> bool {
        self.missing_required().is_none()
    }

    /// True when the URI belongs to `plugin_id`.
    pub fn owned_by(&self, plugin_id: &str) -> bool {
        self.plugin_id.as_deref() == Some(plugin_id)
    }
}

fn field_matches<T: PartialEq>(query: &Option<T>, stored: &Option<T>) -> bool {
    match query {
        None => true,
        Some(q) => stored.as_ref() == Some(q),
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn seg<'a>(v: Option<&'a str>) -> &'a str {
            v.unwrap_or("*")
        }
        write!(
            f,
            "{}/{}/{}/{}/{}",
            seg(self.category.as_ref().map(Category::as_str)),
            seg(self.data_model_scope.as_ref().map(DataModelScope::as_str)),
            seg(self.plugin_type.as_ref().map(PluginType::as_str)),
            seg(self.plugin_id.as_deref()),
            seg(self.item_id.as_deref()),
        )
    }
}

impl FromStr for Uri {
    type Err = UriParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse_uri(s)
    }
}
