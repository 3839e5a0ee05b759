//! Request, reply, and envelope types crossing the plugin boundary.

use core_actions::Activation;
use core_model::{Attachment, BridgeError, BridgeResult, ComponentRecord, Size};
use core_settings::{SettingChange, SettingUpdate};
use core_state::UpsertOutcome;
use core_uri::{Category, Uri};
use core_widgets::WidgetRegistration;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gateway-assigned, monotonically increasing request identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Operation {
    List {
        category: Category,
    },
    Get {
        category: Category,
        uris: Vec<Uri>,
    },
    Activate {
        uri: Uri,
    },
    Update {
        settings: Vec<SettingUpdate>,
    },
    Register {
        widgets: Vec<WidgetRegistration>,
    },
    Deregister {
        uris: Vec<Uri>,
    },
    SetAttachment {
        uri: Uri,
        #[serde(alias = "params")]
        attachment: Attachment,
    },
    ClearAttachment {
        uri: Uri,
    },
    SetSize {
        uri: Uri,
        size: Size,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::List { .. } => "list",
            Operation::Get { .. } => "get",
            Operation::Activate { .. } => "activate",
            Operation::Update { .. } => "update",
            Operation::Register { .. } => "register",
            Operation::Deregister { .. } => "deregister",
            Operation::SetAttachment { .. } => "set_attachment",
            Operation::ClearAttachment { .. } => "clear_attachment",
            Operation::SetSize { .. } => "set_size",
        }
    }

    /// Operations that never mutate.
    pub fn is_read(&self) -> bool {
        matches!(self, Operation::List { .. } | Operation::Get { .. })
    }

    /// Operations that can create records, and so must not overlap the
    /// owning plugin's unload sweep.
    pub fn inserts_records(&self) -> bool {
        matches!(self, Operation::Register { .. })
    }
}

/// A plugin's call. `plugin_id` ties it to the plugin's lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub plugin_id: String,
    #[serde(flatten)]
    pub operation: Operation,
}

impl Request {
    pub fn new(plugin_id: impl Into<String>, operation: Operation) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            operation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reply", content = "data", rename_all = "camelCase")]
pub enum Reply {
    Records(Vec<ComponentRecord>),
    Lookups(Vec<BridgeResult<ComponentRecord>>),
    Activated(Activation),
    Updated(Vec<BridgeResult<SettingChange>>),
    Registered(Vec<BridgeResult<UpsertOutcome>>),
    Deregistered(Vec<BridgeResult<Vec<Uri>>>),
    Surface(ComponentRecord),
}

/// Uniform response wrapper: always exactly one per submitted request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub request_id: RequestId,
    pub plugin_id: String,
    pub outcome: Result<Reply, BridgeError>,
}

impl Envelope {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}
