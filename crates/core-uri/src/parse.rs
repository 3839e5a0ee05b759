//! Textual URI form: `Category/DataModel/PluginType/PluginId/ItemId`.

use crate::{Category, DataModelScope, PluginType, Uri};
use thiserror::Error;

const SEGMENTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UriParseError {
    #[error("expected 5 '/' separated segments, found {0}")]
    SegmentCount(usize),
    #[error("unknown category `{0}`")]
    UnknownCategory(String),
    #[error("unknown data model scope `{0}`")]
    UnknownDataModel(String),
    #[error("unknown plugin type `{0}`")]
    UnknownPluginType(String),
}

pub(crate) fn parse_uri(s: &str) -> Result<Uri, UriParseError> {
    let parts: Vec<&str> = s.trim().split('/').collect();
    if parts.len() != SEGMENTS {
        return Err(UriParseError::SegmentCount(parts.len()));
    }
    Ok(Uri {
        category: wildcard(parts[0]).map(parse_category).transpose()?,
        data_model_scope: wildcard(parts[1]).map(parse_scope).transpose()?,
        plugin_type: wildcard(parts[2]).map(parse_plugin_type).transpose()?,
        plugin_id: wildcard(parts[3]).map(str::to_owned),
        item_id: wildcard(parts[4]).map(str::to_owned),
    })
}

fn wildcard(seg: &str) -> Option<&str> {
    match seg {
        "" | "*" => None,
        other => Some(other),
    }
}

fn parse_category(s: &str) -> Result<Category, UriParseError> {
    Category::ALL
        .into_iter()
        .find(|c| c.as_str() == s)
        .ok_or_else(|| UriParseError::UnknownCategory(s.to_owned()))
}

fn parse_scope(s: &str) -> Result<DataModelScope, UriParseError> {
    [
        DataModelScope::Edit,
        DataModelScope::PlayClient,
        DataModelScope::PlayServer,
        DataModelScope::Standalone,
        DataModelScope::Null,
    ]
    .into_iter()
    .find(|d| d.as_str() == s)
    .ok_or_else(|| UriParseError::UnknownDataModel(s.to_owned()))
}

fn parse_plugin_type(s: &str) -> Result<PluginType, UriParseError> {
    [
        PluginType::Cloud,
        PluginType::Local,
        PluginType::Asset,
        PluginType::Standalone,
    ]
    .into_iter()
    .find(|p| p.as_str() == s)
    .ok_or_else(|| UriParseError::UnknownPluginType(s.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_query() {
        let u: Uri = "Settings/*/*/Output/*".parse().unwrap();
        assert_eq!(u.category, Some(Category::Settings));
        assert_eq!(u.plugin_id.as_deref(), Some("Output"));
        assert!(u.item_id.is_none());
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert_eq!(
            "Actions/Output".parse::<Uri>(),
            Err(UriParseError::SegmentCount(2))
        );
    }

    #[test]
    fn rejects_unknown_enum_names() {
        assert_eq!(
            "Buttons/*/*/a/b".parse::<Uri>(),
            Err(UriParseError::UnknownCategory("Buttons".into()))
        );
        assert!(matches!(
            "Actions/Studio/*/a/b".parse::<Uri>(),
            Err(UriParseError::UnknownDataModel(_))
        ));
    }

    #[test]
    fn ids_without_a_textual_form_are_flagged() {
        for id in ["", "*", "a/b", "padded "] {
            let u = Uri::new(Category::Widgets, "Output", id);
            assert_eq!(u.unprintable_id(), Some(crate::UriField::ItemId), "{id:?}");
            assert_ne!(u.to_string().parse::<Uri>().ok(), Some(u));
        }
        let ok = Uri::new(Category::Widgets, "Output", "Main.Panel-2");
        assert_eq!(ok.unprintable_id(), None);
        assert_eq!(ok.to_string().parse::<Uri>(), Ok(ok));
    }
}
