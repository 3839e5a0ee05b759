//! Panels/Widgets Subsystem.
//!
//! Surfaces (Panels and Widgets) carry geometry and an optional attachment to
//! another surface. The attachment graph must stay acyclic.
//!
//! Locking:
//! * Every operation that commits a surface record and publishes the change
//!   (`seed`, `set_attachment`, `clear_attachment`, `set_size`, `deregister`,
//!   `sweep_plugin`) runs under one subsystem-wide attachment lock. That makes
//!   the cycle walk and the commit that follows it atomic with respect to
//!   other attachment changes. Reads and the other subsystems never touch it.
//! * The attachment lock is reentrant and is always taken *before* any record
//!   writer lock. A subscriber may call back into this subsystem from the
//!   publishing thread. Handing the call to another thread and waiting for it
//!   from inside the handler deadlocks, because the publisher still holds the
//!   attachment lock.
//!
//! Removal never cascades: surfaces attached to a removed target are
//! detached (attachment set to none) and each detach raises `Changed`.

use core_events::{
    ChangeDetail, EventDetail, EventDispatcher, EventHandler, EventKind, EventReceiver,
    Subscription,
};
use core_model::{
    Attachment, BridgeError, BridgeResult, ComponentRecord, Size, SurfaceState, WidgetHandle,
};
use core_plugin::WidgetHost;
use core_state::{ComponentStore, RecordHandle, UpsertOutcome};
use core_uri::{Category, Uri};
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

pub const SURFACES: [Category; 2] = [Category::Panels, Category::Widgets];

/// One entry of a `register` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetRegistration {
    pub uri: Uri,
    #[serde(default, alias = "handle", skip_serializing_if = "Option::is_none")]
    pub widget_handle: Option<WidgetHandle>,
    /// Initial size for a first registration. Ignored on re-registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<Size>,
}

impl WidgetRegistration {
    pub fn new(uri: Uri, widget_handle: Option<WidgetHandle>) -> Self {
        Self {
            uri,
            widget_handle,
            size: None,
        }
    }
}

pub struct WidgetsSubsystem {
    store: Arc<ComponentStore>,
    events: EventDispatcher,
    host: Arc<dyn WidgetHost>,
    attachments: ReentrantMutex<()>,
}

impl WidgetsSubsystem {
    pub fn new(store: Arc<ComponentStore>, events: EventDispatcher, host: Arc<dyn WidgetHost>) -> Self {
        Self {
            store,
            events,
            host,
            attachments: ReentrantMutex::new(()),
        }
    }

    pub fn list(&self) -> Vec<ComponentRecord> {
        self.store.find_in(&Uri::any(), &SURFACES)
    }

    pub fn get(&self, uris: &[Uri]) -> Vec<BridgeResult<ComponentRecord>> {
        uris.iter()
            .map(|q| self.store.resolve_in(q, &SURFACES).map(|cell| cell.snapshot()))
            .collect()
    }

    // ---------------------------------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------------------------------

    /// Insert or replace each target. Re-registration is idempotent: it keeps
    /// the stored geometry and swaps the handle.
    pub fn register(&self, targets: Vec<WidgetRegistration>) -> Vec<BridgeResult<UpsertOutcome>> {
        targets.into_iter().map(|t| self.register_one(t)).collect()
    }

    fn register_one(&self, target: WidgetRegistration) -> BridgeResult<UpsertOutcome> {
        let uri = target.uri;
        if !uri.category.is_some_and(|c| c.is_surface()) {
            return Err(BridgeError::invalid_value(&uri, "expected a Panels or Widgets uri"));
        }
        let handle = target.widget_handle;
        if let Some(cell) = self.store.handle(&uri) {
            let swapped = cell.mutate(|record| {
                let surface = surface_mut(record)?;
                let previous = surface.handle;
                surface.handle = handle;
                surface.registered = true;
                Ok(previous)
            });
            if let Ok(commit) = swapped {
                let previous = commit.output;
                drop(commit);
                if let Some(old) = previous.filter(|old| Some(*old) != handle) {
                    self.host.release_widget_handle(&uri, old);
                }
                self.attach_handle(&uri, handle);
                debug!(target: "widgets", %uri, "widget_reregistered");
                return Ok(UpsertOutcome::Updated(cell.id()));
            }
            // Removed concurrently; fall through to a fresh insert.
        }
        let mut state = SurfaceState::with_size(target.size.unwrap_or_default());
        state.registered = true;
        state.handle = handle;
        let outcome = self.store.replace(ComponentRecord::surface(uri.clone(), state))?;
        self.attach_handle(&uri, handle);
        debug!(target: "widgets", %uri, "widget_registered");
        Ok(outcome)
    }

    /// Host-side registration of a complete surface record. Every field is
    /// stored as given. A declared attachment must resolve and keep the graph
    /// acyclic; it is checked before anything is written, so a rejected seed
    /// leaves no record behind.
    pub fn seed(&self, mut record: ComponentRecord) -> BridgeResult<UpsertOutcome> {
        let uri = record.uri.clone();
        if !uri.category.is_some_and(|c| c.is_surface()) {
            return Err(BridgeError::invalid_value(&uri, "expected a Panels or Widgets uri"));
        }
        record.validate()?;
        let _attachments = self.attachments.lock();
        if let Some(params) = surface_mut(&mut record)?.attachment.take() {
            if params.target_uri == uri {
                return Err(BridgeError::CyclicAttachment {
                    uri: uri.clone(),
                    target: uri,
                });
            }
            let target = self.store.resolve_in(&params.target_uri, &SURFACES)?;
            if self.reaches(&target, &uri) {
                debug!(target: "widgets", %uri, target = %target.uri(), "attachment_cycle_rejected");
                return Err(BridgeError::CyclicAttachment {
                    uri,
                    target: target.uri().clone(),
                });
            }
            surface_mut(&mut record)?.attachment = Some(Attachment {
                target_uri: target.uri().clone(),
                ..params
            });
        }
        let handle = record.as_surface().and_then(|s| s.handle);
        let previous = self
            .store
            .handle(&uri)
            .and_then(|cell| cell.snapshot().as_surface().and_then(|s| s.handle));
        let outcome = self.store.replace(record)?;
        if let Some(old) = previous.filter(|old| Some(*old) != handle) {
            self.host.release_widget_handle(&uri, old);
        }
        self.attach_handle(&uri, handle);
        debug!(target: "widgets", %uri, "widget_seeded");
        Ok(outcome)
    }

    fn attach_handle(&self, uri: &Uri, handle: Option<WidgetHandle>) {
        if let Some(handle) = handle {
            self.host.attach_widget_handle(uri, handle);
        }
    }

    /// Remove every surface matching each query. One result per query,
    /// listing the removed URIs; a query matching nothing is `NotFound`.
    pub fn deregister(&self, uris: &[Uri]) -> Vec<BridgeResult<Vec<Uri>>> {
        let _attachments = self.attachments.lock();
        uris.iter()
            .map(|query| {
                let mut removed = Vec::new();
                for cell in self.store.find_handles_in(query, &SURFACES) {
                    if let Some(record) = self.store.remove(cell.uri()) {
                        self.release(&record);
                        removed.push(record.uri);
                    }
                }
                if removed.is_empty() {
                    return Err(BridgeError::not_found(query));
                }
                debug!(target: "widgets", %query, count = removed.len(), "widgets_deregistered");
                self.detach_dependents(&removed);
                Ok(removed)
            })
            .collect()
    }

    /// Plugin unload: drop every record the plugin owns in every category,
    /// release their handles, and detach surviving surfaces that pointed at them.
    pub fn sweep_plugin(&self, plugin_id: &str) -> Vec<ComponentRecord> {
        let _attachments = self.attachments.lock();
        let removed = self.store.remove_plugin(plugin_id);
        let mut gone = Vec::new();
        for record in &removed {
            if record.as_surface().is_some() {
                self.release(record);
                gone.push(record.uri.clone());
            }
        }
        self.detach_dependents(&gone);
        removed
    }

    fn release(&self, record: &ComponentRecord) {
        if let Some(handle) = record.as_surface().and_then(|s| s.handle) {
            self.host.release_widget_handle(&record.uri, handle);
        }
    }

    fn detach_dependents(&self, removed: &[Uri]) {
        if removed.is_empty() {
            return;
        }
        let removed: HashSet<&Uri> = removed.iter().collect();
        for cell in self.store.find_handles_in(&Uri::any(), &SURFACES) {
            let attached = cell
                .snapshot()
                .as_surface()
                .and_then(|s| s.attached_to().cloned());
            let Some(target) = attached else { continue };
            if !removed.contains(&target) {
                continue;
            }
            if let Ok(commit) = cell.mutate(|record| {
                surface_mut(record)?.attachment = None;
                Ok(())
            }) {
                self.events.publish(
                    cell.uri(),
                    commit.revision,
                    EventDetail::Changed(ChangeDetail::Attachment { target: None }),
                );
                debug!(target: "widgets", uri = %cell.uri(), %target, "attachment_detached");
            }
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Geometry
    // ---------------------------------------------------------------------------------------------

    /// Attach `query` to `params.target_uri`. Both must resolve to exactly one
    /// surface, and the attachment graph must stay acyclic.
    pub fn set_attachment(&self, query: &Uri, params: Attachment) -> BridgeResult<ComponentRecord> {
        let _attachments = self.attachments.lock();
        let subject = self.store.resolve_in(query, &SURFACES)?;
        let target = self.store.resolve_in(&params.target_uri, &SURFACES)?;
        let subject_uri = subject.uri().clone();
        let target_uri = target.uri().clone();
        if self.reaches(&target, &subject_uri) {
            debug!(target: "widgets", uri = %subject_uri, target = %target_uri, "attachment_cycle_rejected");
            return Err(BridgeError::CyclicAttachment {
                uri: subject_uri,
                target: target_uri,
            });
        }
        let attachment = Attachment {
            target_uri: target_uri.clone(),
            ..params
        };
        let commit = subject.mutate(|record| {
            surface_mut(record)?.attachment = Some(attachment);
            Ok(())
        })?;
        self.events.publish(
            &subject_uri,
            commit.revision,
            EventDetail::Changed(ChangeDetail::Attachment {
                target: Some(target_uri.clone()),
            }),
        );
        debug!(target: "widgets", uri = %subject_uri, target = %target_uri, "attachment_set");
        Ok(commit.record.clone())
    }

    /// Remove the outgoing attachment. Clearing an unattached surface still commits.
    pub fn clear_attachment(&self, query: &Uri) -> BridgeResult<ComponentRecord> {
        let _attachments = self.attachments.lock();
        let subject = self.store.resolve_in(query, &SURFACES)?;
        let commit = subject.mutate(|record| {
            surface_mut(record)?.attachment = None;
            Ok(())
        })?;
        self.events.publish(
            subject.uri(),
            commit.revision,
            EventDetail::Changed(ChangeDetail::Attachment { target: None }),
        );
        Ok(commit.record.clone())
    }

    /// Depth-first walk along attachments starting at `from` (inclusive).
    fn reaches(&self, from: &RecordHandle, needle: &Uri) -> bool {
        let mut visited: HashSet<Uri> = HashSet::new();
        let mut next = Some(from.clone());
        while let Some(cell) = next.take() {
            let uri = cell.uri().clone();
            if &uri == needle {
                return true;
            }
            if !visited.insert(uri) {
                // Pre-existing loop not involving `needle`.
                return false;
            }
            let attached = cell.snapshot().as_surface().and_then(|s| s.attached_to().cloned());
            next = attached.and_then(|t| self.store.handle(&t));
        }
        trace!(target: "widgets", %needle, hops = visited.len(), "attachment_walk_clear");
        false
    }

    pub fn set_size(&self, query: &Uri, size: Size) -> BridgeResult<ComponentRecord> {
        let _attachments = self.attachments.lock();
        let subject = self.store.resolve_in(query, &SURFACES)?;
        let uri = subject.uri().clone();
        if !size.is_valid() {
            return Err(BridgeError::InvalidSize {
                uri,
                width: size.width,
                height: size.height,
            });
        }
        let commit = subject.mutate(|record| {
            surface_mut(record)?.size = size;
            Ok(())
        })?;
        self.events.publish(
            &uri,
            commit.revision,
            EventDetail::Changed(ChangeDetail::Size { size }),
        );
        debug!(target: "widgets", %uri, width = size.width, height = size.height, "size_set");
        Ok(commit.record.clone())
    }

    pub fn bind_to_changed<H: EventHandler>(
        &self,
        query: Uri,
        owner: Option<String>,
        handler: H,
    ) -> Subscription {
        self.events.subscribe(EventKind::Changed, query, owner, handler)
    }

    pub fn bind_to_changed_channel(
        &self,
        query: Uri,
        owner: Option<String>,
        capacity: usize,
    ) -> (Subscription, EventReceiver) {
        self.events
            .subscribe_channel(EventKind::Changed, query, owner, capacity)
    }
}

fn surface_mut(record: &mut ComponentRecord) -> BridgeResult<&mut SurfaceState> {
    let uri = record.uri.clone();
    record
        .as_surface_mut()
        .ok_or_else(|| BridgeError::invalid_value(&uri, "record is not a panel or widget"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::ComponentEvent;
    use core_model::ErrorKind;
    use core_plugin::{NoopWidgetHost, RecordingWidgetHost};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn panel(item: &str) -> Uri {
        Uri::new(Category::Panels, "Layout", item)
    }

    fn subsystem_with(host: Arc<dyn WidgetHost>, items: &[&str]) -> WidgetsSubsystem {
        let widgets = WidgetsSubsystem::new(Arc::new(ComponentStore::new()), EventDispatcher::new(), host);
        let results = widgets.register(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| WidgetRegistration::new(panel(item), Some(WidgetHandle(i as u64 + 1))))
                .collect(),
        );
        assert!(results.iter().all(|r| r.is_ok()));
        widgets
    }

    fn subsystem(items: &[&str]) -> WidgetsSubsystem {
        subsystem_with(Arc::new(NoopWidgetHost), items)
    }

    fn attachment_of(widgets: &WidgetsSubsystem, uri: &Uri) -> Option<Uri> {
        widgets.get(&[uri.clone()]).remove(0).unwrap().as_surface().unwrap().attached_to().cloned()
    }

    #[test]
    fn two_node_cycle_rejected_and_state_unchanged() {
        let widgets = subsystem(&["A", "B"]);
        widgets.set_attachment(&panel("A"), Attachment::to(panel("B"))).unwrap();
        let err = widgets
            .set_attachment(&panel("B"), Attachment::to(panel("A")))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CyclicAttachment);
        assert_eq!(attachment_of(&widgets, &panel("A")), Some(panel("B")));
        assert_eq!(attachment_of(&widgets, &panel("B")), None);
    }

    #[test]
    fn self_attachment_and_longer_cycle_rejected() {
        let widgets = subsystem(&["A", "B", "C"]);
        let err = widgets.set_attachment(&panel("A"), Attachment::to(panel("A"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CyclicAttachment);
        widgets.set_attachment(&panel("A"), Attachment::to(panel("B"))).unwrap();
        widgets.set_attachment(&panel("B"), Attachment::to(panel("C"))).unwrap();
        let err = widgets.set_attachment(&panel("C"), Attachment::to(panel("A"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CyclicAttachment);
    }

    #[test]
    fn attachment_target_must_exist() {
        let widgets = subsystem(&["A"]);
        let err = widgets.set_attachment(&panel("A"), Attachment::to(panel("Nope"))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn negative_size_rejected() {
        let widgets = subsystem(&["A"]);
        let err = widgets.set_size(&panel("A"), Size::new(-1.0, 4.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSize);
        let rec = widgets.set_size(&panel("A"), Size::new(320.0, 200.0)).unwrap();
        assert_eq!(rec.as_surface().unwrap().size, Size::new(320.0, 200.0));
    }

    #[test]
    fn deregister_detaches_dependents_without_cascading() {
        let host = Arc::new(RecordingWidgetHost::new());
        let widgets = subsystem_with(host.clone(), &["A", "B"]);
        widgets.set_attachment(&panel("A"), Attachment::to(panel("B"))).unwrap();
        let detaches = Arc::new(AtomicUsize::new(0));
        let d = detaches.clone();
        let _sub = widgets.bind_to_changed(panel("A"), None, move |e: &ComponentEvent| -> anyhow::Result<()> {
            if matches!(e.detail, EventDetail::Changed(ChangeDetail::Attachment { target: None })) {
                d.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });

        let removed = widgets.deregister(&[panel("B")]).remove(0).unwrap();
        assert_eq!(removed, vec![panel("B")]);
        assert_eq!(attachment_of(&widgets, &panel("A")), None);
        assert_eq!(detaches.load(Ordering::SeqCst), 1);
        assert_eq!(host.released(), vec![(panel("B"), WidgetHandle(2))]);
        assert_eq!(widgets.list().len(), 1);
    }

    #[test]
    fn reregistration_swaps_handle_and_keeps_geometry() {
        let host = Arc::new(RecordingWidgetHost::new());
        let widgets = subsystem_with(host.clone(), &["A"]);
        widgets.set_size(&panel("A"), Size::new(10.0, 10.0)).unwrap();
        let results = widgets.register(vec![WidgetRegistration::new(panel("A"), Some(WidgetHandle(9)))]);
        assert!(matches!(results[0], Ok(UpsertOutcome::Updated(_))));
        let rec = widgets.get(&[panel("A")]).remove(0).unwrap();
        let surface = rec.as_surface().unwrap();
        assert_eq!(surface.handle, Some(WidgetHandle(9)));
        assert_eq!(surface.size, Size::new(10.0, 10.0));
        assert_eq!(host.released(), vec![(panel("A"), WidgetHandle(1))]);
        assert_eq!(host.attached().len(), 2);
    }

    #[test]
    fn sweep_removes_plugin_records_and_detaches_survivors() {
        let widgets = subsystem(&["Mine"]);
        let foreign = Uri::new(Category::Widgets, "Other", "W");
        widgets.register(vec![WidgetRegistration::new(foreign.clone(), None)]);
        widgets.set_attachment(&foreign, Attachment::to(panel("Mine"))).unwrap();
        let removed = widgets.sweep_plugin("Layout");
        assert_eq!(removed.len(), 1);
        assert_eq!(attachment_of(&widgets, &foreign), None);
    }

    #[test]
    fn seed_keeps_every_field() {
        let host = Arc::new(RecordingWidgetHost::new());
        let widgets = subsystem_with(host.clone(), &["Root"]);
        let state = SurfaceState {
            handle: Some(WidgetHandle(7)),
            attachment: Some(Attachment::to(panel("Root"))),
            ..SurfaceState::with_size(Size::new(40.0, 30.0))
        };
        let mut record = ComponentRecord::surface(panel("Child"), state);
        record.visible = false;
        record.enabled = false;

        widgets.seed(record.clone()).unwrap();
        assert_eq!(widgets.get(&[panel("Child")]).remove(0).unwrap(), record);
        assert!(host.attached().contains(&(panel("Child"), WidgetHandle(7))));
    }

    #[test]
    fn rejected_seed_leaves_nothing_behind() {
        let widgets = subsystem(&["A"]);
        let dangling = SurfaceState {
            attachment: Some(Attachment::to(panel("Missing"))),
            ..SurfaceState::default()
        };
        let err = widgets.seed(ComponentRecord::surface(panel("B"), dangling)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let looped = SurfaceState {
            attachment: Some(Attachment::to(panel("C"))),
            ..SurfaceState::default()
        };
        let err = widgets.seed(ComponentRecord::surface(panel("C"), looped)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CyclicAttachment);

        assert_eq!(widgets.list().len(), 1);
    }

    #[test]
    fn handler_on_publishing_thread_may_reattach() {
        let widgets = Arc::new(subsystem(&["A", "B"]));
        let inner = widgets.clone();
        let reattached = Arc::new(AtomicUsize::new(0));
        let count = reattached.clone();
        let _sub = widgets.bind_to_changed(panel("A"), None, move |e: &ComponentEvent| -> anyhow::Result<()> {
            if matches!(e.detail, EventDetail::Changed(ChangeDetail::Size { .. })) {
                inner.set_attachment(&panel("A"), Attachment::to(panel("B")))?;
                count.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        });
        widgets.set_size(&panel("A"), Size::new(1.0, 1.0)).unwrap();
        assert_eq!(reattached.load(Ordering::SeqCst), 1);
        assert_eq!(attachment_of(&widgets, &panel("A")), Some(panel("B")));
    }

    #[test]
    fn register_rejects_non_surface_uri() {
        let widgets = subsystem(&[]);
        let results = widgets.register(vec![WidgetRegistration::new(
            Uri::new(Category::Actions, "p", "a"),
            None,
        )]);
        assert_eq!(results[0].as_ref().unwrap_err().kind(), ErrorKind::InvalidValue);
    }
}
