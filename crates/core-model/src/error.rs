//! Closed set of failure kinds surfaced to callers.
//!
//! Every store, subsystem, and gateway operation resolves to either a
//! well-typed success payload or one of these variants. Batch operations
//! report one `Result` per input item instead of failing the batch.

use core_uri::Uri;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why a request was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CancelReason {
    /// The caller dropped interest (`PendingReply::cancel`).
    Caller,
    /// The owning plugin unloaded while the request was pending.
    PluginUnloaded,
    /// The configured request timeout elapsed.
    Timeout,
    /// The gateway shut down.
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancelReason::Caller => "caller",
            CancelReason::PluginUnloaded => "plugin_unloaded",
            CancelReason::Timeout => "timeout",
            CancelReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum BridgeError {
    #[error("no component matches {query}")]
    NotFound { query: Uri },
    #[error("{query} matches {count} components, expected exactly one")]
    AmbiguousUri { query: Uri, count: usize },
    #[error("{uri} is already registered under a different identity")]
    DuplicateUri { uri: Uri },
    #[error("invalid value for {uri}: {reason}")]
    InvalidValue { uri: Uri, reason: String },
    #[error("invalid size {width}x{height} for {uri}")]
    InvalidSize { uri: Uri, width: f32, height: f32 },
    #[error("attaching {uri} to {target} would create an attachment cycle")]
    CyclicAttachment { uri: Uri, target: Uri },
    #[error("activation of {uri} failed: {reason}")]
    ActivationFailed { uri: Uri, reason: String },
    #[error("request cancelled ({reason})")]
    Cancelled { reason: CancelReason },
}

/// Fieldless discriminant of `BridgeError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    AmbiguousUri,
    DuplicateUri,
    InvalidValue,
    InvalidSize,
    CyclicAttachment,
    ActivationFailed,
    Cancelled,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::NotFound { .. } => ErrorKind::NotFound,
            BridgeError::AmbiguousUri { .. } => ErrorKind::AmbiguousUri,
            BridgeError::DuplicateUri { .. } => ErrorKind::DuplicateUri,
            BridgeError::InvalidValue { .. } => ErrorKind::InvalidValue,
            BridgeError::InvalidSize { .. } => ErrorKind::InvalidSize,
            BridgeError::CyclicAttachment { .. } => ErrorKind::CyclicAttachment,
            BridgeError::ActivationFailed { .. } => ErrorKind::ActivationFailed,
            BridgeError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn invalid_value(uri: &Uri, reason: impl Into<String>) -> Self {
        BridgeError::InvalidValue {
            uri: uri.clone(),
            reason: reason.into(),
        }
    }

    pub fn not_found(query: &Uri) -> Self {
        BridgeError::NotFound {
            query: query.clone(),
        }
    }

    pub fn cancelled(reason: CancelReason) -> Self {
        BridgeError::Cancelled { reason }
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use core_uri::Category;

    #[test]
    fn display_includes_textual_uri() {
        let err = BridgeError::not_found(&Uri::new(Category::Actions, "Output", "Toggle"));
        assert_eq!(err.to_string(), "no component matches Actions/*/*/Output/Toggle");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn serializes_with_kind_tag() {
        let err = BridgeError::cancelled(CancelReason::PluginUnloaded);
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "Cancelled");
        assert_eq!(json["reason"], "PluginUnloaded");
    }
}
