//! Action Subsystem.
//!
//! Actions (and Tools, which share the action body) are read-mostly records.
//! The only mutation is activation:
//!
//! 1. resolve the query to exactly one record in this subsystem's category
//! 2. under the record's writer lock, toggle `checked` when checkable
//! 3. publish `Activated` carrying the committed `checked` while still holding
//!    that lock, so per-URI event order equals commit order
//! 4. release the lock and run the control-plane executor
//!
//! Executor failure surfaces as `ActivationFailed`. The toggle is not rolled
//! back: `checked` reflects UI state, not command success.

use core_events::{
    EventDetail, EventDispatcher, EventHandler, EventKind, EventReceiver, Subscription,
};
use core_model::{BridgeError, BridgeResult, ComponentRecord};
use core_plugin::ControlPlane;
use core_state::{ComponentId, ComponentStore, UpsertOutcome};
use core_uri::{Category, Uri};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Committed outcome of one activation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    pub uri: Uri,
    /// New `checked` state, `None` for non-checkable actions.
    pub checked: Option<bool>,
    pub revision: u64,
}

pub struct ActionSubsystem {
    category: Category,
    store: Arc<ComponentStore>,
    events: EventDispatcher,
    control: Arc<dyn ControlPlane>,
}

impl ActionSubsystem {
    /// Subsystem serving the `Actions` category.
    pub fn new(
        store: Arc<ComponentStore>,
        events: EventDispatcher,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        Self::for_category(Category::Actions, store, events, control)
    }

    /// Same behavior over another action-bodied category (`Tools`).
    pub fn for_category(
        category: Category,
        store: Arc<ComponentStore>,
        events: EventDispatcher,
        control: Arc<dyn ControlPlane>,
    ) -> Self {
        Self {
            category,
            store,
            events,
            control,
        }
    }

    pub fn category(&self) -> Category {
        self.category
    }

    /// Host-side registration. Re-registering with the same `id` updates in place.
    pub fn register(&self, id: ComponentId, record: ComponentRecord) -> BridgeResult<UpsertOutcome> {
        if record.category() != Some(self.category) {
            return Err(BridgeError::invalid_value(
                &record.uri,
                format!("expected a {} record", self.category.as_str()),
            ));
        }
        self.store.upsert(id, record)
    }

    /// Snapshot of every record in this category, insertion order.
    pub fn list(&self) -> Vec<ComponentRecord> {
        self.store.find_in(&Uri::of_category(self.category), &[self.category])
    }

    /// One result per query. Each query must resolve to exactly one record.
    pub fn get(&self, uris: &[Uri]) -> Vec<BridgeResult<ComponentRecord>> {
        uris.iter()
            .map(|q| self.store.resolve_in(q, &[self.category]).map(|cell| cell.snapshot()))
            .collect()
    }

    pub fn activate(&self, query: &Uri) -> BridgeResult<Activation> {
        let cell = self.store.resolve_in(query, &[self.category])?;
        let uri = cell.uri().clone();
        let activation = {
            let commit = cell.mutate(|record| {
                let uri = record.uri.clone();
                record
                    .as_action_mut()
                    .map(|action| action.apply_activation())
                    .ok_or_else(|| BridgeError::invalid_value(&uri, "record is not an action"))
            })?;
            let checked = commit.output;
            let report = self
                .events
                .publish(&uri, commit.revision, EventDetail::Activated { checked });
            debug!(
                target: "actions",
                %uri,
                ?checked,
                revision = commit.revision,
                subscribers = report.matched,
                "action_activated"
            );
            Activation {
                uri: uri.clone(),
                checked,
                revision: commit.revision,
            }
        };

        trace!(target: "actions", %uri, control = self.control.name(), "control_plane_execute");
        if let Err(err) = self.control.execute(&uri) {
            warn!(target: "actions", %uri, error = %err, "activation_failed");
            return Err(BridgeError::ActivationFailed {
                uri,
                reason: format!("{err:#}"),
            });
        }
        Ok(activation)
    }

    /// Invoke `handler` on every future activation matching `query`.
    pub fn bind_to_activated<H: EventHandler>(
        &self,
        query: Uri,
        owner: Option<String>,
        handler: H,
    ) -> Subscription {
        self.events
            .subscribe(EventKind::Activated, self.scoped(query), owner, handler)
    }

    /// Channel form of [`bind_to_activated`](Self::bind_to_activated).
    pub fn bind_to_activated_channel(
        &self,
        query: Uri,
        owner: Option<String>,
        capacity: usize,
    ) -> (Subscription, EventReceiver) {
        self.events
            .subscribe_channel(EventKind::Activated, self.scoped(query), owner, capacity)
    }

    fn scoped(&self, query: Uri) -> Uri {
        match query.category {
            Some(_) => query,
            None => query.with_category(self.category),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::ComponentEvent;
    use core_model::{ActionState, ErrorKind};
    use core_plugin::{NoopControlPlane, RecordingControlPlane};
    use core_uri::DataModelScope;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn toggle_uri() -> Uri {
        Uri::new(Category::Actions, "Output", "Toggle").with_data_model(DataModelScope::Standalone)
    }

    fn subsystem(control: Arc<dyn ControlPlane>) -> ActionSubsystem {
        let actions = ActionSubsystem::new(Arc::new(ComponentStore::new()), EventDispatcher::new(), control);
        let id = actions.store.allocate_id();
        actions
            .register(id, ComponentRecord::action(toggle_uri(), ActionState::toggle("Output", false)))
            .unwrap();
        actions
    }

    #[test]
    fn activate_toggles_and_raises_one_event() {
        let actions = subsystem(Arc::new(NoopControlPlane));
        let seen = Arc::new(AtomicUsize::new(0));
        let s = seen.clone();
        let _sub = actions.bind_to_activated(toggle_uri(), None, move |e: &ComponentEvent| -> anyhow::Result<()> {
            assert_eq!(e.uri, toggle_uri());
            s.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let first = actions.activate(&toggle_uri()).unwrap();
        assert_eq!(first.checked, Some(true));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let second = actions.activate(&toggle_uri()).unwrap();
        assert_eq!(second.checked, Some(false));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn executor_failure_keeps_toggle() {
        let control = Arc::new(RecordingControlPlane::new());
        control.fail_on(toggle_uri());
        let actions = subsystem(control.clone());
        let err = actions.activate(&toggle_uri()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ActivationFailed);
        let rec = actions.get(&[toggle_uri()]).remove(0).unwrap();
        assert!(rec.as_action().unwrap().checked);
        assert_eq!(control.executed(), vec![toggle_uri()]);
    }

    #[test]
    fn get_reports_per_query_outcome() {
        let actions = subsystem(Arc::new(NoopControlPlane));
        let id = actions.store.allocate_id();
        actions
            .register(
                id,
                ComponentRecord::action(Uri::new(Category::Actions, "Output", "Clear"), ActionState::new("Clear")),
            )
            .unwrap();
        let results = actions.get(&[
            toggle_uri(),
            Uri::of_category(Category::Actions).with_plugin_id("Output"),
            Uri::new(Category::Actions, "Output", "Missing"),
        ]);
        assert!(results[0].is_ok());
        assert_eq!(results[1].as_ref().unwrap_err().kind(), ErrorKind::AmbiguousUri);
        assert_eq!(results[2].as_ref().unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(actions.list().len(), 2);
    }

    #[test]
    fn non_checkable_activation_reports_none() {
        let actions = subsystem(Arc::new(NoopControlPlane));
        let uri = Uri::new(Category::Actions, "Output", "Run");
        let id = actions.store.allocate_id();
        actions
            .register(id, ComponentRecord::action(uri.clone(), ActionState::new("Run")))
            .unwrap();
        let activation = actions.activate(&uri).unwrap();
        assert_eq!(activation.checked, None);
        assert_eq!(activation.revision, 1);
    }

    #[test]
    fn register_rejects_foreign_category() {
        let actions = subsystem(Arc::new(NoopControlPlane));
        let tool = ComponentRecord::action(Uri::new(Category::Tools, "p", "t"), ActionState::new("t"));
        let id = actions.store.allocate_id();
        assert_eq!(actions.register(id, tool).unwrap_err().kind(), ErrorKind::InvalidValue);
    }
}
