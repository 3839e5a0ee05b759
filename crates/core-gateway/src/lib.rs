//! Request Gateway: the async boundary between plugin callers and the core.
//!
//! Responsibilities:
//! * Route a [`Request`] to the subsystem that owns its category and wrap the
//!   outcome in an [`Envelope`]. No business logic lives here.
//! * Never block the caller: every operation runs on a blocking worker
//!   (`spawn_blocking`) because the control plane it may call is allowed to
//!   block. The caller holds a [`PendingReply`] future.
//! * Bound concurrency with a semaphore (`max_in_flight`). A permit is held
//!   until the operation itself finishes, not just until the caller stops
//!   waiting.
//! * Cancellation: each request gets a child token of its plugin's token,
//!   which is itself a child of the gateway's shutdown token. Caller cancel,
//!   plugin unload, timeout, and shutdown all race the operation in one
//!   `select!`, so exactly one outcome reaches the caller. An operation that
//!   already started runs to completion (its commit and event fan-out are
//!   atomic); only the reply is discarded.
//!
//! Because subsystems publish events before returning, every event for a
//! mutation has been delivered before the caller's reply resolves.
//!
//! Bindings (`bind`) are channel-backed subscriptions owned by the plugin;
//! the unload sweep drops them together with the plugin's records.
//!
//! Unload ordering: operations that insert records hold their plugin's gate
//! shared while they run; `on_plugin_unloaded` cancels the plugin token and
//! then takes the gate exclusively before sweeping. An insert therefore either
//! finishes before the sweep (and is swept) or observes the cancellation and
//! never touches the store.

use core_actions::ActionSubsystem;
use core_config::Config;
use core_events::{EventDispatcher, EventKind, EventReceiver, Subscription};
use core_model::{BridgeError, BridgeResult, CancelReason, ComponentRecord, Size};
use core_plugin::{ControlPlane, PluginLifecycle, WidgetHost};
use core_settings::SettingsSubsystem;
use core_state::{ComponentStore, UpsertOutcome};
use core_uri::{Category, Uri};
use core_widgets::WidgetsSubsystem;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

mod pending;
mod request;

pub use pending::PendingReply;
pub use request::{Envelope, Operation, Reply, Request, RequestId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayOptions {
    pub max_in_flight: usize,
    pub request_timeout: Option<Duration>,
    pub channel_capacity: usize,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 64,
            request_timeout: None,
            channel_capacity: 256,
        }
    }
}

impl From<&Config> for GatewayOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            max_in_flight: cfg.gateway().max_in_flight.max(1),
            request_timeout: cfg.gateway().request_timeout(),
            channel_capacity: cfg.events().channel_capacity.max(1),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Metrics
// -------------------------------------------------------------------------------------------------

#[derive(Default)]
struct GatewayMetrics {
    submitted: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    timed_out: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayMetricsSnapshot {
    pub submitted: u64,
    /// Replies carrying the operation's own outcome (success or error).
    pub completed: u64,
    /// Replies resolved as `Cancelled` for any reason except timeout.
    pub cancelled: u64,
    pub timed_out: u64,
}

/// A plugin's channel-backed binding.
#[derive(Debug)]
pub struct Binding {
    pub subscription: Subscription,
    pub events: EventReceiver,
}

// -------------------------------------------------------------------------------------------------
// Gateway
// -------------------------------------------------------------------------------------------------

struct Inner {
    store: Arc<ComponentStore>,
    events: EventDispatcher,
    actions: ActionSubsystem,
    tools: ActionSubsystem,
    settings: SettingsSubsystem,
    widgets: WidgetsSubsystem,
    options: GatewayOptions,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
    plugins: Mutex<HashMap<String, PluginSlot>>,
    next_request: AtomicU64,
    metrics: GatewayMetrics,
}

/// Per-plugin cancellation root plus the gate that orders record inserts
/// against the unload sweep.
#[derive(Clone)]
struct PluginSlot {
    token: CancellationToken,
    gate: Arc<RwLock<()>>,
}

/// Cheaply cloneable handle to one host session's gateway.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    pub fn new(
        options: GatewayOptions,
        store: Arc<ComponentStore>,
        control: Arc<dyn ControlPlane>,
        host: Arc<dyn WidgetHost>,
    ) -> Self {
        let events = EventDispatcher::new();
        let actions = ActionSubsystem::new(store.clone(), events.clone(), control.clone());
        let tools =
            ActionSubsystem::for_category(Category::Tools, store.clone(), events.clone(), control.clone());
        let settings = SettingsSubsystem::new(store.clone(), events.clone(), control);
        let widgets = WidgetsSubsystem::new(store.clone(), events.clone(), host);
        info!(
            target: "gateway",
            max_in_flight = options.max_in_flight,
            timeout_ms = options.request_timeout.map(|d| d.as_millis() as u64),
            "gateway_started"
        );
        Self {
            inner: Arc::new(Inner {
                store,
                events,
                actions,
                tools,
                settings,
                widgets,
                permits: Arc::new(Semaphore::new(options.max_in_flight.max(1))),
                options,
                shutdown: CancellationToken::new(),
                plugins: Mutex::new(HashMap::new()),
                next_request: AtomicU64::new(1),
                metrics: GatewayMetrics::default(),
            }),
        }
    }

    pub fn store(&self) -> &Arc<ComponentStore> {
        &self.inner.store
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    pub fn actions(&self) -> &ActionSubsystem {
        &self.inner.actions
    }

    pub fn tools(&self) -> &ActionSubsystem {
        &self.inner.tools
    }

    pub fn settings(&self) -> &SettingsSubsystem {
        &self.inner.settings
    }

    pub fn widgets(&self) -> &WidgetsSubsystem {
        &self.inner.widgets
    }

    /// Host-side registration of any record, routed by category. Records are
    /// stored with every field intact; a surface's attachment is validated
    /// first, so a rejected seed stores nothing.
    pub fn seed(&self, record: ComponentRecord) -> BridgeResult<UpsertOutcome> {
        self.inner.seed(record)
    }

    /// Submit a request. Must be called from within a tokio runtime.
    pub fn submit(&self, request: Request) -> PendingReply {
        let inner = self.inner.clone();
        let request_id = RequestId(inner.next_request.fetch_add(1, Ordering::Relaxed));
        let slot = inner.plugin_slot(&request.plugin_id);
        let token = slot.token.child_token();
        inner.metrics.submitted.fetch_add(1, Ordering::Relaxed);
        debug!(
            target: "gateway",
            request = %request_id,
            plugin = %request.plugin_id,
            op = request.operation.name(),
            "request_submitted"
        );
        let plugin_id = request.plugin_id.clone();
        let task = tokio::spawn(inner.run(request_id, request, token.clone(), slot));
        PendingReply {
            request_id,
            plugin_id,
            token,
            task,
        }
    }

    /// Submit and await in one step.
    pub async fn call(&self, request: Request) -> Envelope {
        self.submit(request).await
    }

    /// Channel-backed binding owned by `plugin_id`.
    ///
    /// An `Activated` query without a category is scoped to Actions. A
    /// `Changed` query without a category spans Settings, Panels and Widgets.
    /// Pairs that can never fire (`Activated` on Settings or surfaces,
    /// `Changed` on Actions or Tools) are rejected with `InvalidValue`.
    pub fn bind(&self, plugin_id: &str, kind: EventKind, query: Uri) -> BridgeResult<Binding> {
        let query = match (kind, query.category) {
            (EventKind::Activated, None) => query.with_category(Category::Actions),
            (EventKind::Activated, Some(Category::Actions | Category::Tools)) => query,
            (EventKind::Changed, None | Some(Category::Settings | Category::Panels | Category::Widgets)) => {
                query
            }
            (kind, Some(category)) => {
                return Err(BridgeError::invalid_value(
                    &query,
                    format!("{} records never raise {}", category.as_str(), kind.as_str()),
                ));
            }
        };
        let (subscription, events) = self.inner.events.subscribe_channel(
            kind,
            query,
            Some(plugin_id.to_owned()),
            self.inner.options.channel_capacity,
        );
        Ok(Binding {
            subscription,
            events,
        })
    }

    /// Cancel everything pending and refuse new work.
    pub fn shutdown(&self) {
        info!(target: "gateway", "gateway_shutdown");
        self.inner.shutdown.cancel();
    }

    pub fn metrics(&self) -> GatewayMetricsSnapshot {
        let m = &self.inner.metrics;
        GatewayMetricsSnapshot {
            submitted: m.submitted.load(Ordering::Relaxed),
            completed: m.completed.load(Ordering::Relaxed),
            cancelled: m.cancelled.load(Ordering::Relaxed),
            timed_out: m.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl PluginLifecycle for Gateway {
    /// Cancel the plugin's pending requests, sweep its records in every
    /// category, and drop its bindings. A reloaded plugin with the same id
    /// starts with a fresh token.
    fn on_plugin_unloaded(&self, plugin_id: &str) {
        let slot = self.inner.plugins.lock().remove(plugin_id);
        if let Some(slot) = &slot {
            slot.token.cancel();
        }
        // Waits for inserts already past their cancellation check.
        let _gate = slot.as_ref().map(|s| s.gate.write());
        let removed = self.inner.widgets.sweep_plugin(plugin_id);
        let unsubscribed = self.inner.events.unsubscribe_owner(plugin_id);
        info!(
            target: "plugin.lifecycle",
            plugin = plugin_id,
            records = removed.len(),
            bindings = unsubscribed,
            "plugin_unloaded"
        );
    }
}

impl Inner {
    fn plugin_slot(&self, plugin_id: &str) -> PluginSlot {
        self.plugins
            .lock()
            .entry(plugin_id.to_owned())
            .or_insert_with(|| PluginSlot {
                token: self.shutdown.child_token(),
                gate: Arc::new(RwLock::new(())),
            })
            .clone()
    }

    fn cancel_reason(&self, plugin_token: &CancellationToken) -> CancelReason {
        if self.shutdown.is_cancelled() {
            CancelReason::Shutdown
        } else if plugin_token.is_cancelled() {
            CancelReason::PluginUnloaded
        } else {
            CancelReason::Caller
        }
    }

    async fn run(
        self: Arc<Self>,
        request_id: RequestId,
        request: Request,
        token: CancellationToken,
        slot: PluginSlot,
    ) -> Envelope {
        let Request {
            plugin_id,
            operation,
        } = request;
        let timeout = self.options.request_timeout;
        let work = self.clone().execute(operation, token.clone(), slot.gate);
        let outcome = tokio::select! {
            _ = token.cancelled() => Err(BridgeError::cancelled(self.cancel_reason(&slot.token))),
            outcome = with_timeout(timeout, work) => outcome,
        };
        match &outcome {
            Err(BridgeError::Cancelled {
                reason: CancelReason::Timeout,
            }) => {
                self.metrics.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(target: "gateway", request = %request_id, plugin = %plugin_id, "request_timed_out");
            }
            Err(BridgeError::Cancelled { reason }) => {
                self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(target: "gateway", request = %request_id, plugin = %plugin_id, %reason, "request_cancelled");
            }
            other => {
                self.metrics.completed.fetch_add(1, Ordering::Relaxed);
                debug!(
                    target: "gateway",
                    request = %request_id,
                    plugin = %plugin_id,
                    ok = other.is_ok(),
                    "request_completed"
                );
            }
        }
        Envelope {
            request_id,
            plugin_id,
            outcome,
        }
    }

    async fn execute(
        self: Arc<Self>,
        operation: Operation,
        token: CancellationToken,
        gate: Arc<RwLock<()>>,
    ) -> BridgeResult<Reply> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| BridgeError::cancelled(CancelReason::Shutdown))?;
        let inner = self.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let _gate = operation.inserts_records().then(|| gate.read());
            if token.is_cancelled() {
                // Cancelled while queued; never touch the store.
                return Err(BridgeError::cancelled(CancelReason::Caller));
            }
            inner.dispatch(operation)
        })
        .await;
        joined.unwrap_or_else(|err| {
            warn!(target: "gateway", error = %err, "operation_aborted");
            Err(BridgeError::cancelled(CancelReason::Shutdown))
        })
    }

    /// Route one operation to its subsystem. Runs on a blocking worker.
    fn dispatch(&self, operation: Operation) -> BridgeResult<Reply> {
        trace!(target: "gateway", op = operation.name(), read = operation.is_read(), "dispatch");
        match operation {
            Operation::List { category } => Ok(Reply::Records(self.list(category))),
            Operation::Get { category, uris } => {
                let scoped: Vec<Uri> = uris
                    .into_iter()
                    .map(|u| match u.category {
                        Some(_) => u,
                        None => u.with_category(category),
                    })
                    .collect();
                Ok(Reply::Lookups(self.get(category, &scoped)))
            }
            Operation::Activate { uri } => {
                let subsystem = match uri.category {
                    Some(Category::Tools) => &self.tools,
                    None | Some(Category::Actions) => &self.actions,
                    Some(other) => {
                        return Err(BridgeError::invalid_value(
                            &uri,
                            format!("{} records cannot be activated", other.as_str()),
                        ));
                    }
                };
                subsystem.activate(&uri).map(Reply::Activated)
            }
            Operation::Update { settings } => Ok(Reply::Updated(self.settings.update(settings))),
            Operation::Register { widgets } => Ok(Reply::Registered(self.widgets.register(widgets))),
            Operation::Deregister { uris } => Ok(Reply::Deregistered(self.widgets.deregister(&uris))),
            Operation::SetAttachment { uri, attachment } => self
                .widgets
                .set_attachment(&uri, attachment)
                .map(Reply::Surface),
            Operation::ClearAttachment { uri } => {
                self.widgets.clear_attachment(&uri).map(Reply::Surface)
            }
            Operation::SetSize { uri, size } => self.set_size(&uri, size),
        }
    }

    fn list(&self, category: Category) -> Vec<ComponentRecord> {
        match category {
            Category::Actions => self.actions.list(),
            Category::Tools => self.tools.list(),
            Category::Settings => self.settings.list(),
            Category::Panels | Category::Widgets => self
                .widgets
                .list()
                .into_iter()
                .filter(|r| r.category() == Some(category))
                .collect(),
        }
    }

    fn get(&self, category: Category, uris: &[Uri]) -> Vec<BridgeResult<ComponentRecord>> {
        match category {
            Category::Actions => self.actions.get(uris),
            Category::Tools => self.tools.get(uris),
            Category::Settings => self.settings.get(uris),
            Category::Panels | Category::Widgets => self.widgets.get(uris),
        }
    }

    fn set_size(&self, uri: &Uri, size: Size) -> BridgeResult<Reply> {
        self.widgets.set_size(uri, size).map(Reply::Surface)
    }

    fn seed(&self, record: ComponentRecord) -> BridgeResult<UpsertOutcome> {
        match record.category() {
            Some(Category::Actions) => self.actions.register(self.store.allocate_id(), record),
            Some(Category::Tools) => self.tools.register(self.store.allocate_id(), record),
            Some(Category::Settings) => self.settings.register(self.store.allocate_id(), record),
            Some(Category::Panels | Category::Widgets) => self.widgets.seed(record),
            None => Err(BridgeError::invalid_value(&record.uri, "stored uri is missing `category`")),
        }
    }
}

async fn with_timeout<F>(timeout: Option<Duration>, work: F) -> BridgeResult<Reply>
where
    F: Future<Output = BridgeResult<Reply>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or_else(|_| Err(BridgeError::cancelled(CancelReason::Timeout))),
        None => work.await,
    }
}
