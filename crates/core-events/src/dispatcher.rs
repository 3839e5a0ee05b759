//! Event Dispatcher.
//!
//! Tables: one subscriber table per (category slot, event kind). Category
//! slots are the five categories plus one slot for bindings whose query has
//! no category. Each table is a copy-on-write `Vec<Arc<Entry>>` behind an
//! `ArcSwap`:
//!
//! * `publish` loads the current table snapshot without locking and walks
//!   it. An entry added concurrently lands in a newer snapshot and does not
//!   see the in-flight event; an entry removed concurrently stays alive (the
//!   snapshot holds an `Arc`) so a handler is never invoked on freed state.
//! * An unsubscribed entry is flagged inactive first, so no delivery starts
//!   after `unsubscribe` returns, even from an older snapshot.
//! * Each entry lives in exactly one table and each table is walked once per
//!   event, so a subscriber is invoked at most once per event.
//!
//! Failure isolation: a handler error or panic, a full channel, or a closed
//! channel is logged under `events.dispatch`, counted, and skipped. Nothing
//! is retried and nothing propagates back to the publisher.

use crate::{ComponentEvent, EventDetail, EventHandler, EventKind, EventReceiver};
use arc_swap::ArcSwap;
use core_uri::{Category, Uri};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

const CATEGORY_SLOTS: usize = 6;
const WILDCARD_SLOT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

enum Sink {
    Handler(Box<dyn EventHandler>),
    Channel(mpsc::Sender<ComponentEvent>),
}

struct Entry {
    id: SubscriptionId,
    query: Uri,
    owner: Option<String>,
    active: AtomicBool,
    sink: Sink,
}

type Table = ArcSwap<Vec<Arc<Entry>>>;

#[derive(Default)]
struct DispatchMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchMetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    /// Handler errors/panics and sends into closed channels.
    pub failed: u64,
    /// Events dropped because a channel binding was full.
    pub dropped: u64,
}

/// Per-publication outcome (returned for diagnostics and tests).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub seq: u64,
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
}

struct Inner {
    tables: Vec<Table>,
    next_id: AtomicU64,
    next_seq: AtomicU64,
    metrics: DispatchMetrics,
}

impl Inner {
    fn table(&self, slot: usize, kind: EventKind) -> &Table {
        let k = match kind {
            EventKind::Activated => 0,
            EventKind::Changed => 1,
        };
        &self.tables[k * CATEGORY_SLOTS + slot]
    }

    fn remove(&self, slot: usize, kind: EventKind, id: SubscriptionId) -> bool {
        let mut removed = false;
        self.table(slot, kind).rcu(|current| {
            let kept: Vec<Arc<Entry>> = current.iter().filter(|e| e.id != id).cloned().collect();
            removed = kept.len() != current.len();
            kept
        });
        removed
    }
}

fn slot_of(category: Option<Category>) -> usize {
    match category {
        Some(Category::Actions) => 0,
        Some(Category::Settings) => 1,
        Some(Category::Widgets) => 2,
        Some(Category::Tools) => 3,
        Some(Category::Panels) => 4,
        None => WILDCARD_SLOT,
    }
}

/// Cheaply cloneable handle to a shared dispatcher.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        let tables = (0..CATEGORY_SLOTS * EventKind::ALL.len())
            .map(|_| ArcSwap::from_pointee(Vec::new()))
            .collect();
        Self {
            inner: Arc::new(Inner {
                tables,
                next_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(1),
                metrics: DispatchMetrics::default(),
            }),
        }
    }

    fn insert(&self, kind: EventKind, query: Uri, owner: Option<String>, sink: Sink) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let slot = slot_of(query.category);
        let entry = Arc::new(Entry {
            id,
            query,
            owner,
            active: AtomicBool::new(true),
            sink,
        });
        debug!(
            target: "events.dispatch",
            %id,
            kind = kind.as_str(),
            query = %entry.query,
            owner = entry.owner.as_deref(),
            "subscribed"
        );
        self.inner.table(slot, kind).rcu(|current| {
            let mut next = Vec::with_capacity(current.len() + 1);
            next.extend(current.iter().cloned());
            next.push(entry.clone());
            next
        });
        Subscription {
            id,
            kind,
            slot,
            entry: Some(entry),
            dispatcher: Arc::downgrade(&self.inner),
        }
    }

    /// Register a callback for every future `kind` event whose URI matches `query`.
    pub fn subscribe<H: EventHandler>(
        &self,
        kind: EventKind,
        query: Uri,
        owner: Option<String>,
        handler: H,
    ) -> Subscription {
        self.insert(kind, query, owner, Sink::Handler(Box::new(handler)))
    }

    /// Register a bounded channel binding. Delivery never blocks the publisher:
    /// when the channel is full the event is dropped for this subscriber.
    pub fn subscribe_channel(
        &self,
        kind: EventKind,
        query: Uri,
        owner: Option<String>,
        capacity: usize,
    ) -> (Subscription, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.insert(kind, query, owner, Sink::Channel(tx)), rx)
    }

    /// Fan out one event. Returns after every matching subscriber was offered it.
    pub fn publish(&self, uri: &Uri, revision: u64, detail: EventDetail) -> DeliveryReport {
        let kind = detail.kind();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let event = ComponentEvent {
            seq,
            uri: uri.clone(),
            revision,
            detail,
        };
        self.inner.metrics.published.fetch_add(1, Ordering::Relaxed);

        let mut report = DeliveryReport {
            seq,
            ..DeliveryReport::default()
        };
        let mut slots = vec![WILDCARD_SLOT];
        if uri.category.is_some() {
            slots.insert(0, slot_of(uri.category));
        }
        for slot in slots {
            let snapshot = self.inner.table(slot, kind).load_full();
            for entry in snapshot.iter() {
                if !entry.active.load(Ordering::Acquire) || !entry.query.matches(uri) {
                    continue;
                }
                report.matched += 1;
                if self.deliver(entry, &event) {
                    report.delivered += 1;
                } else {
                    report.failed += 1;
                }
            }
        }
        trace!(
            target: "events.dispatch",
            seq,
            kind = kind.as_str(),
            %uri,
            matched = report.matched,
            failed = report.failed,
            "published"
        );
        report
    }

    fn deliver(&self, entry: &Entry, event: &ComponentEvent) -> bool {
        let metrics = &self.inner.metrics;
        let ok = match &entry.sink {
            Sink::Handler(handler) => {
                match catch_unwind(AssertUnwindSafe(|| handler.handle(event))) {
                    Ok(Ok(())) => true,
                    Ok(Err(err)) => {
                        warn!(target: "events.dispatch", id = %entry.id, seq = event.seq, error = %err, "subscriber_failed");
                        false
                    }
                    Err(_) => {
                        warn!(target: "events.dispatch", id = %entry.id, seq = event.seq, "subscriber_panicked");
                        false
                    }
                }
            }
            Sink::Channel(tx) => match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    metrics.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(target: "events.dispatch", id = %entry.id, seq = event.seq, "binding_channel_full");
                    return false;
                }
                Err(TrySendError::Closed(_)) => {
                    // Receiver gone: stop offering further events to this entry.
                    entry.active.store(false, Ordering::Release);
                    debug!(target: "events.dispatch", id = %entry.id, "binding_channel_closed");
                    false
                }
            },
        };
        if ok {
            metrics.delivered.fetch_add(1, Ordering::Relaxed);
        } else {
            metrics.failed.fetch_add(1, Ordering::Relaxed);
        }
        ok
    }

    /// Drop every subscription owned by `plugin_id`. Returns how many were removed.
    pub fn unsubscribe_owner(&self, plugin_id: &str) -> usize {
        let mut removed = 0;
        for table in &self.inner.tables {
            let mut swept = 0;
            table.rcu(|current| {
                let (gone, kept): (Vec<_>, Vec<_>) = current
                    .iter()
                    .cloned()
                    .partition(|e| e.owner.as_deref() == Some(plugin_id));
                for e in &gone {
                    e.active.store(false, Ordering::Release);
                }
                swept = gone.len();
                kept
            });
            removed += swept;
        }
        if removed > 0 {
            debug!(target: "events.dispatch", owner = plugin_id, removed, "owner_unsubscribed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tables.iter().map(|t| t.load().len()).sum()
    }

    pub fn metrics(&self) -> DispatchMetricsSnapshot {
        let m = &self.inner.metrics;
        DispatchMetricsSnapshot {
            published: m.published.load(Ordering::Relaxed),
            delivered: m.delivered.load(Ordering::Relaxed),
            failed: m.failed.load(Ordering::Relaxed),
            dropped: m.dropped.load(Ordering::Relaxed),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Subscription handle
// -------------------------------------------------------------------------------------------------

/// Standing registration. Unsubscribes on `unsubscribe()` or when dropped.
pub struct Subscription {
    id: SubscriptionId,
    kind: EventKind,
    slot: usize,
    entry: Option<Arc<Entry>>,
    dispatcher: Weak<Inner>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn query(&self) -> Option<&Uri> {
        self.entry.as_ref().map(|e| &e.query)
    }

    /// False once unsubscribed, swept by owner, or its channel receiver dropped.
    pub fn is_active(&self) -> bool {
        self.entry
            .as_ref()
            .is_some_and(|e| e.active.load(Ordering::Acquire))
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        entry.active.store(false, Ordering::Release);
        if let Some(inner) = self.dispatcher.upgrade() {
            if inner.remove(self.slot, self.kind, self.id) {
                debug!(target: "events.dispatch", id = %self.id, "unsubscribed");
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChangeDetail, ValueCause};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn toggle() -> Uri {
        Uri::new(Category::Actions, "Output", "Toggle")
    }

    fn activated() -> EventDetail {
        EventDetail::Activated {
            checked: Some(true),
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl EventHandler) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &ComponentEvent| -> anyhow::Result<()> {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn partial_query_receives_matching_events_once() {
        let d = EventDispatcher::new();
        let (count, handler) = counter();
        let _sub = d.subscribe(
            EventKind::Activated,
            Uri::of_category(Category::Actions).with_plugin_id("Output"),
            None,
            handler,
        );
        let report = d.publish(&toggle(), 1, activated());
        assert_eq!(report.matched, 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        d.publish(&Uri::new(Category::Actions, "Other", "Toggle"), 1, activated());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn kinds_are_independent() {
        let d = EventDispatcher::new();
        let (count, handler) = counter();
        let _sub = d.subscribe(EventKind::Changed, toggle(), None, handler);
        d.publish(&toggle(), 1, activated());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wildcard_category_binding_sees_all_categories() {
        let d = EventDispatcher::new();
        let (count, handler) = counter();
        let _sub = d.subscribe(EventKind::Changed, Uri::any().with_plugin_id("p"), None, handler);
        let detail = EventDetail::Changed(ChangeDetail::Value {
            previous: 0,
            current: 1,
            value_id: "B".into(),
            cause: ValueCause::Update,
        });
        d.publish(&Uri::new(Category::Settings, "p", "s"), 1, detail.clone());
        d.publish(&Uri::new(Category::Panels, "p", "x"), 1, detail);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_block_others() {
        let d = EventDispatcher::new();
        let _bad = d.subscribe(EventKind::Activated, toggle(), None, |_: &ComponentEvent| -> anyhow::Result<()> {
            anyhow::bail!("handler exploded")
        });
        let _worse = d.subscribe(EventKind::Activated, toggle(), None, |_: &ComponentEvent| -> anyhow::Result<()> {
            panic!("handler panicked")
        });
        let (count, handler) = counter();
        let _good = d.subscribe(EventKind::Activated, toggle(), None, handler);
        let report = d.publish(&toggle(), 1, activated());
        assert_eq!(report.matched, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(d.metrics().failed, 2);
    }

    #[test]
    fn unsubscribe_and_drop_stop_delivery() {
        let d = EventDispatcher::new();
        let (count, handler) = counter();
        let sub = d.subscribe(EventKind::Activated, toggle(), None, handler);
        assert_eq!(d.subscriber_count(), 1);
        sub.unsubscribe();
        assert_eq!(d.subscriber_count(), 0);
        d.publish(&toggle(), 1, activated());
        assert_eq!(count.load(Ordering::SeqCst), 0);

        let (count, handler) = counter();
        {
            let _scoped = d.subscribe(EventKind::Activated, toggle(), None, handler);
        }
        d.publish(&toggle(), 1, activated());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn owner_sweep_removes_only_that_plugin() {
        let d = EventDispatcher::new();
        let (gone_count, gone) = counter();
        let (kept_count, kept) = counter();
        let gone_sub = d.subscribe(EventKind::Activated, toggle(), Some("A".into()), gone);
        let _kept_sub = d.subscribe(EventKind::Activated, toggle(), Some("B".into()), kept);
        assert_eq!(d.unsubscribe_owner("A"), 1);
        assert!(!gone_sub.is_active());
        d.publish(&toggle(), 1, activated());
        assert_eq!(gone_count.load(Ordering::SeqCst), 0);
        assert_eq!(kept_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscribe_during_publish_is_safe() {
        let d = EventDispatcher::new();
        let late: Arc<Mutex<Vec<Subscription>>> = Arc::new(Mutex::new(Vec::new()));
        let (late_count, _) = counter();
        let d2 = d.clone();
        let late2 = late.clone();
        let lc = late_count.clone();
        let _adder = d.subscribe(EventKind::Activated, toggle(), None, move |_: &ComponentEvent| -> anyhow::Result<()> {
            let lc = lc.clone();
            let sub = d2.subscribe(EventKind::Activated, toggle(), None, move |_: &ComponentEvent| -> anyhow::Result<()> {
                lc.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            late2.lock().unwrap().push(sub);
            Ok(())
        });
        d.publish(&toggle(), 1, activated());
        assert_eq!(late_count.load(Ordering::SeqCst), 0, "added mid-publish, not in snapshot");
        d.publish(&toggle(), 2, activated());
        assert_eq!(late_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_subscribe_unsubscribe_with_publish() {
        let d = EventDispatcher::new();
        let (count, handler) = counter();
        let _stable = d.subscribe(EventKind::Activated, toggle(), None, handler);
        let churn = {
            let d = d.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let s = d.subscribe(EventKind::Activated, toggle(), None, |_: &ComponentEvent| -> anyhow::Result<()> { Ok(()) });
                    s.unsubscribe();
                }
            })
        };
        for rev in 0..200 {
            d.publish(&toggle(), rev, activated());
        }
        churn.join().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 200);
        assert_eq!(d.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn channel_binding_receives_and_counts_drops() {
        let d = EventDispatcher::new();
        let (_sub, mut rx) = d.subscribe_channel(EventKind::Activated, toggle(), None, 1);
        d.publish(&toggle(), 1, activated());
        d.publish(&toggle(), 2, activated());
        let first = rx.recv().await.unwrap();
        assert_eq!(first.revision, 1);
        assert_eq!(d.metrics().dropped, 1);
    }

    #[test]
    fn closed_channel_deactivates_binding() {
        let d = EventDispatcher::new();
        let (sub, rx) = d.subscribe_channel(EventKind::Activated, toggle(), None, 4);
        drop(rx);
        let report = d.publish(&toggle(), 1, activated());
        assert_eq!(report.failed, 1);
        assert!(!sub.is_active());
        let report = d.publish(&toggle(), 2, activated());
        assert_eq!(report.matched, 0);
    }
}
