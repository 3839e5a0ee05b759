#![allow(dead_code)] // Shared across integration tests; each test binary uses a subset of helpers.

use core_gateway::{Gateway, GatewayOptions, Operation, Request};
use core_model::{ActionState, ComponentRecord, SettingState, SettingValue};
use core_model::WidgetHandle;
use core_plugin::{ControlPlane, NoopWidgetHost, RecordingControlPlane, RecordingWidgetHost, WidgetHost};
use core_state::ComponentStore;
use core_uri::{Category, DataModelScope, Uri};
use std::sync::{Arc, Condvar, Mutex};
use tokio::sync::Notify;

pub const PLUGIN: &str = "Output";

pub fn toggle_uri() -> Uri {
    Uri::new(Category::Actions, PLUGIN, "Toggle").with_data_model(DataModelScope::Standalone)
}

pub fn mode_uri() -> Uri {
    Uri::new(Category::Settings, PLUGIN, "Mode")
}

pub fn panel(item: &str) -> Uri {
    Uri::new(Category::Panels, PLUGIN, item)
}

pub fn gateway_with(options: GatewayOptions, control: Arc<dyn ControlPlane>) -> Gateway {
    gateway_with_host(options, control, Arc::new(NoopWidgetHost))
}

pub fn gateway_with_host(
    options: GatewayOptions,
    control: Arc<dyn ControlPlane>,
    host: Arc<dyn WidgetHost>,
) -> Gateway {
    let gateway = Gateway::new(options, Arc::new(ComponentStore::new()), control, host);
    gateway
        .seed(ComponentRecord::action(toggle_uri(), ActionState::toggle("Output", false)))
        .unwrap();
    gateway
        .seed(ComponentRecord::setting(
            mode_uri(),
            SettingState::new(
                "Mode",
                vec![
                    SettingValue::new("A", Uri::new(Category::Actions, PLUGIN, "A")),
                    SettingValue::new("B", Uri::new(Category::Actions, PLUGIN, "B")),
                ],
            ),
        ))
        .unwrap();
    gateway
}

pub fn gateway() -> (Gateway, Arc<RecordingControlPlane>) {
    let control = Arc::new(RecordingControlPlane::new());
    (gateway_with(GatewayOptions::default(), control.clone()), control)
}

pub fn request(op: Operation) -> Request {
    Request::new(PLUGIN, op)
}

/// Parks callers until the test opens it. `entered` fires on every arrival.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn pass(&self) {
        self.entered.notify_one();
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

/// Control plane whose `execute` parks until the test opens the gate.
#[derive(Default)]
pub struct GatedControlPlane {
    pub gate: Gate,
}

impl ControlPlane for GatedControlPlane {
    fn name(&self) -> &'static str {
        "gated-control-plane"
    }

    fn execute(&self, _action_uri: &Uri) -> anyhow::Result<()> {
        self.gate.pass();
        Ok(())
    }
}

/// Widget host whose `attach_widget_handle` parks until the test opens the
/// gate. Calls are recorded once they pass.
#[derive(Default)]
pub struct GatedWidgetHost {
    pub gate: Gate,
    pub recorder: RecordingWidgetHost,
}

impl WidgetHost for GatedWidgetHost {
    fn attach_widget_handle(&self, uri: &Uri, handle: WidgetHandle) {
        self.gate.pass();
        self.recorder.attach_widget_handle(uri, handle);
    }

    fn release_widget_handle(&self, uri: &Uri, handle: WidgetHandle) {
        self.recorder.release_widget_handle(uri, handle);
    }
}
