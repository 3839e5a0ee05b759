//! Settings Subsystem.
//!
//! A setting selects one of its named `values`. Invariant for every stored
//! setting: `values` is non-empty and `value < values.len()`.
//!
//! * `update` applies each entry independently. An entry resolves exactly one
//!   setting, validates its selector against that setting's current `values`
//!   inside the record's writer lock, commits, and publishes `Changed` before
//!   the lock is released. A failing entry never aborts its siblings.
//! * After each committed entry the control plane receives a
//!   `SettingUpdateNotice` with the caller's passthrough fields. That call
//!   runs outside the record lock and its failure is logged only; the state
//!   change already happened.
//! * `reconfigure_values` is the external reconfiguration path. It re-checks
//!   the invariant and clamps `value` to the last index when `values` shrank
//!   below it, raising `Changed` only when the selection actually moved.

use core_events::{
    ChangeDetail, EventDetail, EventDispatcher, EventHandler, EventKind, EventReceiver,
    Subscription, ValueCause,
};
use core_model::{
    BridgeError, BridgeResult, ComponentRecord, Passthrough, SettingValue, ValueSelector,
};
use core_plugin::{ControlPlane, SettingUpdateNotice};
use core_state::{ComponentId, ComponentStore, UpsertOutcome};
use core_uri::{Category, Uri};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

const SCOPE: [Category; 1] = [Category::Settings];

/// One entry of an `update` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingUpdate {
    pub uri: Uri,
    pub value: ValueSelector,
    /// Unknown fields, forwarded verbatim to the control plane.
    #[serde(flatten)]
    pub extra: Passthrough,
}

impl SettingUpdate {
    pub fn new(uri: Uri, value: impl Into<ValueSelector>) -> Self {
        Self {
            uri,
            value: value.into(),
            extra: Passthrough::new(),
        }
    }
}

/// Committed selection change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingChange {
    pub uri: Uri,
    pub previous: usize,
    pub value: usize,
    pub value_id: String,
    pub revision: u64,
}

pub struct SettingsSubsystem {
    store: Arc<ComponentStore>,
    events: EventDispatcher,
    control: Arc<dyn ControlPlane>,
}

impl SettingsSubsystem {
    pub fn new(
        store: Arc<ComponentStore>,
        events: EventDispatcher,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            store,
            events,
            control,
        }
    }

    /// Host-side registration. Rejects empty `values` or an out-of-range `value`.
    pub fn register(&self, id: ComponentId, record: ComponentRecord) -> BridgeResult<UpsertOutcome> {
        if record.category() != Some(Category::Settings) {
            return Err(BridgeError::invalid_value(&record.uri, "expected a Settings record"));
        }
        self.store.upsert(id, record)
    }

    pub fn list(&self) -> Vec<ComponentRecord> {
        self.store.find_in(&Uri::of_category(Category::Settings), &SCOPE)
    }

    pub fn get(&self, uris: &[Uri]) -> Vec<BridgeResult<ComponentRecord>> {
        uris.iter()
            .map(|q| self.store.resolve_in(q, &SCOPE).map(|cell| cell.snapshot()))
            .collect()
    }

    /// Apply every entry independently; one result per entry, same order.
    pub fn update(&self, entries: Vec<SettingUpdate>) -> Vec<BridgeResult<SettingChange>> {
        entries.into_iter().map(|entry| self.update_one(entry)).collect()
    }

    fn update_one(&self, entry: SettingUpdate) -> BridgeResult<SettingChange> {
        let cell = self.store.resolve_in(&entry.uri, &SCOPE)?;
        let uri = cell.uri().clone();
        let (change, action_uri) = {
            let commit = cell.mutate(|record| {
                let setting = record
                    .as_setting_mut()
                    .ok_or_else(|| BridgeError::invalid_value(&uri, "record is not a setting"))?;
                let index = setting.resolve(&entry.value).ok_or_else(|| {
                    BridgeError::invalid_value(
                        &uri,
                        format!(
                            "value {} does not name one of {} values",
                            entry.value,
                            setting.values.len()
                        ),
                    )
                })?;
                let previous = setting.value;
                setting.value = index;
                let chosen = &setting.values[index];
                Ok((previous, chosen.id.clone(), chosen.action_uri.clone()))
            })?;
            let (previous, value_id, action_uri) = commit.output;
            let current = selected_index(&commit.record);
            self.events.publish(
                &uri,
                commit.revision,
                EventDetail::Changed(ChangeDetail::Value {
                    previous,
                    current,
                    value_id: value_id.clone(),
                    cause: ValueCause::Update,
                }),
            );
            debug!(target: "settings", %uri, previous, current, revision = commit.revision, "setting_updated");
            (
                SettingChange {
                    uri: uri.clone(),
                    previous,
                    value: current,
                    value_id,
                    revision: commit.revision,
                },
                action_uri,
            )
        };

        let notice = SettingUpdateNotice {
            uri,
            value: change.value,
            value_id: change.value_id.clone(),
            action_uri,
            extra: entry.extra,
        };
        if let Err(err) = self.control.forward_setting_update(&notice) {
            warn!(target: "settings", uri = %notice.uri, error = %err, "setting_forward_failed");
        }
        Ok(change)
    }

    /// Replace a setting's `values`, clamping the selection when it falls off
    /// the end. Returns the clamp as a change, or `None` when `value` stayed put.
    pub fn reconfigure_values(
        &self,
        query: &Uri,
        values: Vec<SettingValue>,
    ) -> BridgeResult<Option<SettingChange>> {
        let cell = self.store.resolve_in(query, &SCOPE)?;
        let uri = cell.uri().clone();
        if values.is_empty() {
            return Err(BridgeError::invalid_value(&uri, "setting must declare at least one value"));
        }
        let commit = cell.mutate(|record| {
            let setting = record
                .as_setting_mut()
                .ok_or_else(|| BridgeError::invalid_value(&uri, "record is not a setting"))?;
            setting.values = values;
            let previous = setting.value;
            if previous >= setting.values.len() {
                setting.value = setting.values.len() - 1;
            }
            Ok(previous)
        })?;
        let previous = commit.output;
        let current = selected_index(&commit.record);
        if previous == current {
            trace!(target: "settings", %uri, count = values_len(&commit.record), "setting_reconfigured");
            return Ok(None);
        }
        let value_id = commit
            .record
            .as_setting()
            .and_then(|s| s.current())
            .map(|v| v.id.clone())
            .unwrap_or_default();
        self.events.publish(
            &uri,
            commit.revision,
            EventDetail::Changed(ChangeDetail::Value {
                previous,
                current,
                value_id: value_id.clone(),
                cause: ValueCause::Clamped,
            }),
        );
        debug!(target: "settings", %uri, previous, current, "setting_value_clamped");
        Ok(Some(SettingChange {
            uri,
            previous,
            value: current,
            value_id,
            revision: commit.revision,
        }))
    }

    /// Invoke `handler` on every future `Changed` matching `query`. Reads never fire it.
    pub fn bind_to_changed<H: EventHandler>(
        &self,
        query: Uri,
        owner: Option<String>,
        handler: H,
    ) -> Subscription {
        self.events
            .subscribe(EventKind::Changed, scoped(query), owner, handler)
    }

    pub fn bind_to_changed_channel(
        &self,
        query: Uri,
        owner: Option<String>,
        capacity: usize,
    ) -> (Subscription, EventReceiver) {
        self.events
            .subscribe_channel(EventKind::Changed, scoped(query), owner, capacity)
    }
}

fn scoped(query: Uri) -> Uri {
    match query.category {
        Some(_) => query,
        None => query.with_category(Category::Settings),
    }
}

fn selected_index(record: &ComponentRecord) -> usize {
    record.as_setting().map_or(0, |s| s.value)
}

fn values_len(record: &ComponentRecord) -> usize {
    record.as_setting().map_or(0, |s| s.values.len())
}
