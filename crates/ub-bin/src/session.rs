//! Scripted host session: manifest seeding and JSON-lines request scripts.
//!
//! Script lines are JSON objects. `op` selects the line kind:
//! * `bind`   `{"op":"bind","pluginId":..,"kind":"Activated"|"Changed","uri":{..}}`
//! * `unload` `{"op":"unload","pluginId":..}`
//! * anything else is a gateway [`Request`] (`list`, `get`, `activate`, ...).
//!
//! Output is one JSON object per line: an envelope per request, an `event`
//! line per event received by a binding (drained after every script line),
//! and `error` lines for unparsable input. Blank lines and lines starting
//! with `#` are skipped.

use anyhow::{Context, Result};
use core_events::{ComponentEvent, EventKind};
use core_gateway::{Binding, Gateway, Request};
use core_model::ComponentRecord;
use core_plugin::{ControlPlane, PluginLifecycle, SettingUpdateNotice};
use core_uri::Uri;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub records: Vec<ComponentRecord>,
}

impl Manifest {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("manifest is not valid JSON")
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BindLine {
    plugin_id: String,
    kind: EventKind,
    #[serde(default)]
    uri: Uri,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnloadLine {
    plugin_id: String,
}

#[derive(Debug)]
enum ScriptLine {
    Request(Request),
    Bind(BindLine),
    Unload(UnloadLine),
}

fn parse_line(line: &str) -> Result<ScriptLine> {
    let value: serde_json::Value = serde_json::from_str(line).context("line is not valid JSON")?;
    let op = value.get("op").and_then(|v| v.as_str()).unwrap_or_default();
    Ok(match op {
        "bind" => ScriptLine::Bind(serde_json::from_value(value).context("malformed bind line")?),
        "unload" => ScriptLine::Unload(serde_json::from_value(value).context("malformed unload line")?),
        _ => ScriptLine::Request(serde_json::from_value(value).context("malformed request")?),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
enum OutputLine<'a> {
    Bound { binding: u64, plugin_id: &'a str },
    Unloaded { plugin_id: &'a str },
    Event { binding: u64, event: &'a ComponentEvent },
    Error { line: usize, message: String },
}

/// Control plane for the standalone binary: records each call in the log.
#[derive(Debug, Default)]
pub struct LoggingControlPlane;

impl ControlPlane for LoggingControlPlane {
    fn name(&self) -> &'static str {
        "logging-control-plane"
    }

    fn execute(&self, action_uri: &Uri) -> anyhow::Result<()> {
        info!(target: "runtime.control", uri = %action_uri, "execute");
        Ok(())
    }

    fn forward_setting_update(&self, notice: &SettingUpdateNotice) -> anyhow::Result<()> {
        info!(
            target: "runtime.control",
            uri = %notice.uri,
            value = notice.value,
            value_id = notice.value_id.as_str(),
            extra_fields = notice.extra.len(),
            "setting_update"
        );
        Ok(())
    }
}

pub struct Session<W: Write> {
    gateway: Gateway,
    bindings: Vec<Binding>,
    out: W,
}

impl<W: Write> Session<W> {
    pub fn new(gateway: Gateway, out: W) -> Self {
        Self {
            gateway,
            bindings: Vec::new(),
            out,
        }
    }

    /// Register every manifest record. Returns how many were accepted.
    pub fn seed(&mut self, manifest: Manifest) -> usize {
        let total = manifest.records.len();
        let mut accepted = 0;
        for record in manifest.records {
            let uri = record.uri.clone();
            match self.gateway.seed(record) {
                Ok(_) => accepted += 1,
                Err(err) => warn!(target: "runtime", %uri, error = %err, "seed_rejected"),
            }
        }
        info!(target: "runtime", accepted, total, "manifest_seeded");
        accepted
    }

    /// Execute a script to completion. Requests run one at a time so the
    /// output order follows the script.
    pub async fn run_script<R: BufRead>(&mut self, script: R) -> Result<()> {
        for (idx, line) in script.lines().enumerate() {
            let line = line.context("reading script")?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match parse_line(trimmed) {
                Ok(ScriptLine::Request(request)) => {
                    let envelope = self.gateway.call(request).await;
                    self.emit(&envelope)?;
                }
                Ok(ScriptLine::Bind(bind)) => match self.gateway.bind(&bind.plugin_id, bind.kind, bind.uri) {
                    Ok(binding) => {
                        let id = binding.subscription.id().0;
                        self.bindings.push(binding);
                        self.emit(&OutputLine::Bound {
                            binding: id,
                            plugin_id: &bind.plugin_id,
                        })?;
                    }
                    Err(err) => {
                        warn!(target: "runtime", line = idx + 1, error = %err, "bind_rejected");
                        self.emit(&OutputLine::Error {
                            line: idx + 1,
                            message: err.to_string(),
                        })?;
                    }
                },
                Ok(ScriptLine::Unload(unload)) => {
                    self.gateway.on_plugin_unloaded(&unload.plugin_id);
                    self.emit(&OutputLine::Unloaded {
                        plugin_id: &unload.plugin_id,
                    })?;
                }
                Err(err) => {
                    warn!(target: "runtime", line = idx + 1, error = %format!("{err:#}"), "script_line_rejected");
                    self.emit(&OutputLine::Error {
                        line: idx + 1,
                        message: format!("{err:#}"),
                    })?;
                }
            }
            self.drain_events()?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn drain_events(&mut self) -> Result<()> {
        let mut pending = Vec::new();
        for binding in &mut self.bindings {
            let id = binding.subscription.id().0;
            while let Ok(event) = binding.events.try_recv() {
                pending.push((id, event));
            }
        }
        self.bindings.retain(|b| b.subscription.is_active());
        pending.sort_by_key(|(_, e)| e.seq);
        for (binding, event) in &pending {
            self.emit(&OutputLine::Event {
                binding: *binding,
                event,
            })?;
        }
        if !pending.is_empty() {
            debug!(target: "runtime", count = pending.len(), "events_emitted");
        }
        Ok(())
    }

    fn emit<T: Serialize>(&mut self, line: &T) -> Result<()> {
        serde_json::to_writer(&mut self.out, line)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    pub fn into_output(self) -> W {
        self.out
    }
}
