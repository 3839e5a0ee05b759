//! Component events and the dispatcher that fans them out.
//!
//! Events are published by subsystems *after* a mutation commits and while
//! the record's writer lock is still held (see `core-state::cell`), so for a
//! single URI the event order is the commit order. Each event carries the
//! committed state that produced it; subscribers never need to re-read the
//! store to interpret an event.
//!
//! The dispatcher stores only query URIs and subscriber sinks. It never holds
//! record data, so a subscription may outlive the records it observes.

use core_model::Size;
use core_uri::Uri;
use serde::{Deserialize, Serialize};

mod dispatcher;

pub use dispatcher::{
    DeliveryReport, DispatchMetricsSnapshot, EventDispatcher, Subscription, SubscriptionId,
};

// -------------------------------------------------------------------------------------------------
// Event model
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Activated,
    Changed,
}

impl EventKind {
    pub const ALL: [EventKind; 2] = [EventKind::Activated, EventKind::Changed];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Activated => "activated",
            EventKind::Changed => "changed",
        }
    }
}

/// Why a setting's selected value moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueCause {
    /// Caller-issued update.
    Update,
    /// External reconfiguration shrank `values` below the selected index.
    Clamped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all_fields = "camelCase")]
pub enum ChangeDetail {
    Value {
        previous: usize,
        current: usize,
        value_id: String,
        cause: ValueCause,
    },
    Size {
        size: Size,
    },
    Attachment {
        target: Option<Uri>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EventDetail {
    Activated { checked: Option<bool> },
    Changed(ChangeDetail),
}

impl EventDetail {
    pub fn kind(&self) -> EventKind {
        match self {
            EventDetail::Activated { .. } => EventKind::Activated,
            EventDetail::Changed(_) => EventKind::Changed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentEvent {
    /// Dispatcher-wide publication sequence.
    pub seq: u64,
    /// Concrete URI of the record that changed.
    pub uri: Uri,
    /// Record revision the event describes.
    pub revision: u64,
    #[serde(flatten)]
    pub detail: EventDetail,
}

impl ComponentEvent {
    pub fn kind(&self) -> EventKind {
        self.detail.kind()
    }
}

/// Receiving end of a channel-backed binding.
pub type EventReceiver = tokio::sync::mpsc::Receiver<ComponentEvent>;

// -------------------------------------------------------------------------------------------------
// Handlers
// -------------------------------------------------------------------------------------------------

/// Callback subscriber. Errors (and panics) are isolated per handler: they are
/// logged and counted, never propagated to the publisher or other handlers.
/// Handlers run on the publishing thread and should not block.
pub trait EventHandler: Send + Sync + 'static {
    fn handle(&self, event: &ComponentEvent) -> anyhow::Result<()>;
}

impl<F> EventHandler for F
where
    F: Fn(&ComponentEvent) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, event: &ComponentEvent) -> anyhow::Result<()> {
        self(event)
    }
}
