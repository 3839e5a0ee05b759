//! Collaborator contracts consumed by the core.
//!
//! The core never performs a real UI effect itself. Three seams connect it to
//! the host application:
//!
//! * [`ControlPlane`] executes the command behind an activated action and
//!   receives committed setting updates (with the caller's opaque passthrough
//!   fields). It may be slow or blocking; the gateway only ever calls it from
//!   a blocking worker, never from an async task.
//! * [`WidgetHost`] owns native widget handles. The core stores the handle it
//!   is given at registration and tells the host when the record goes away.
//! * [`PluginLifecycle`] is the notification the host raises when a plugin
//!   unloads. The gateway implements it to run the unload sweep.
//!
//! Collaborator failures are `anyhow::Error` at this seam. The subsystems
//! convert them (`ActivationFailed`) or log and drop them, so nothing from a
//! collaborator crosses back to a caller unstructured.
//!
//! `Noop*` implementations are used by the binary when no real collaborator
//! is wired, and `RecordingControlPlane` backs tests across the workspace.

use core_model::{Passthrough, WidgetHandle};
use core_uri::Uri;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

/// Committed setting change forwarded to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingUpdateNotice {
    pub uri: Uri,
    pub value: usize,
    pub value_id: String,
    /// Action bound to the newly selected value. May dangle.
    pub action_uri: Uri,
    /// Caller-supplied fields beyond `uri`/`value`, forwarded verbatim.
    pub extra: Passthrough,
}

pub trait ControlPlane: Send + Sync + 'static {
    /// Stable identifier for logs.
    fn name(&self) -> &'static str;
    /// Perform the command behind `action_uri`. Called after the activation
    /// committed and its event was published, outside every record lock.
    fn execute(&self, action_uri: &Uri) -> anyhow::Result<()>;
    /// Receive a committed setting update. Failure is logged by the caller.
    fn forward_setting_update(&self, notice: &SettingUpdateNotice) -> anyhow::Result<()> {
        let _ = notice;
        Ok(())
    }
}

impl<T: ControlPlane + ?Sized> ControlPlane for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }
    fn execute(&self, action_uri: &Uri) -> anyhow::Result<()> {
        (**self).execute(action_uri)
    }
    fn forward_setting_update(&self, notice: &SettingUpdateNotice) -> anyhow::Result<()> {
        (**self).forward_setting_update(notice)
    }
}

pub trait WidgetHost: Send + Sync + 'static {
    /// A Panel/Widget record now refers to `handle`.
    fn attach_widget_handle(&self, uri: &Uri, handle: WidgetHandle);
    /// The record holding `handle` was deregistered or swept.
    fn release_widget_handle(&self, uri: &Uri, handle: WidgetHandle);
}

impl<T: WidgetHost + ?Sized> WidgetHost for Arc<T> {
    fn attach_widget_handle(&self, uri: &Uri, handle: WidgetHandle) {
        (**self).attach_widget_handle(uri, handle)
    }
    fn release_widget_handle(&self, uri: &Uri, handle: WidgetHandle) {
        (**self).release_widget_handle(uri, handle)
    }
}

pub trait PluginLifecycle: Send + Sync {
    fn on_plugin_unloaded(&self, plugin_id: &str);
}

// -------------------------------------------------------------------------------------------------
// No-op collaborators
// -------------------------------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopControlPlane;

impl ControlPlane for NoopControlPlane {
    fn name(&self) -> &'static str {
        "noop-control-plane"
    }
    fn execute(&self, _action_uri: &Uri) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWidgetHost;

impl WidgetHost for NoopWidgetHost {
    fn attach_widget_handle(&self, _uri: &Uri, _handle: WidgetHandle) {}
    fn release_widget_handle(&self, _uri: &Uri, _handle: WidgetHandle) {}
}

// -------------------------------------------------------------------------------------------------
// Recording collaborators
// -------------------------------------------------------------------------------------------------

/// Control plane that records every call and can be told to fail for
/// specific action URIs.
#[derive(Debug, Default)]
pub struct RecordingControlPlane {
    executed: Mutex<Vec<Uri>>,
    forwarded: Mutex<Vec<SettingUpdateNotice>>,
    failing: Mutex<HashSet<Uri>>,
    fail_forwarding: Mutex<bool>,
}

impl RecordingControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `execute(uri)` fail from now on.
    pub fn fail_on(&self, uri: Uri) {
        self.failing.lock().insert(uri);
    }

    pub fn fail_forwarding(&self, fail: bool) {
        *self.fail_forwarding.lock() = fail;
    }

    pub fn executed(&self) -> Vec<Uri> {
        self.executed.lock().clone()
    }

    pub fn forwarded(&self) -> Vec<SettingUpdateNotice> {
        self.forwarded.lock().clone()
    }
}

impl ControlPlane for RecordingControlPlane {
    fn name(&self) -> &'static str {
        "recording-control-plane"
    }
    fn execute(&self, action_uri: &Uri) -> anyhow::Result<()> {
        self.executed.lock().push(action_uri.clone());
        if self.failing.lock().contains(action_uri) {
            anyhow::bail!("control plane rejected {action_uri}");
        }
        Ok(())
    }
    fn forward_setting_update(&self, notice: &SettingUpdateNotice) -> anyhow::Result<()> {
        self.forwarded.lock().push(notice.clone());
        if *self.fail_forwarding.lock() {
            anyhow::bail!("forwarding disabled");
        }
        Ok(())
    }
}

/// Widget host that tracks which handles are currently attached.
#[derive(Debug, Default)]
pub struct RecordingWidgetHost {
    attached: Mutex<Vec<(Uri, WidgetHandle)>>,
    released: Mutex<Vec<(Uri, WidgetHandle)>>,
}

impl RecordingWidgetHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(&self) -> Vec<(Uri, WidgetHandle)> {
        self.attached.lock().clone()
    }

    pub fn released(&self) -> Vec<(Uri, WidgetHandle)> {
        self.released.lock().clone()
    }
}

impl WidgetHost for RecordingWidgetHost {
    fn attach_widget_handle(&self, uri: &Uri, handle: WidgetHandle) {
        self.attached.lock().push((uri.clone(), handle));
    }
    fn release_widget_handle(&self, uri: &Uri, handle: WidgetHandle) {
        tracing::trace!(target: "plugin.lifecycle", %uri, handle = handle.0, "widget_handle_released");
        self.released.lock().push((uri.clone(), handle));
    }
}
