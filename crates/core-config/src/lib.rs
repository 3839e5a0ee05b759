//! Configuration loading and parsing.
//!
//! Parses `uibridge.toml` (or an override path provided by the binary):
//!
//! ```toml
//! [gateway]
//! max_in_flight = 64
//! request_timeout_ms = 0
//! [events]
//! channel_capacity = 256
//! [logging]
//! filter = "info"
//! file = "uibridge.log"
//! ```
//!
//! Missing file falls back to defaults silently; a parse failure falls back
//! to defaults with a warning. Unknown fields are ignored so newer files load
//! on older builds. Values below their minimum are clamped in
//! `Config::normalize` (logged under the `config` target).

use anyhow::Result;
use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

pub const FILE_NAME: &str = "uibridge.toml";

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    #[serde(default = "GatewayConfig::default_max_in_flight")]
    pub max_in_flight: usize,
    /// 0 disables the timeout.
    #[serde(default)]
    pub request_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_in_flight: Self::default_max_in_flight(),
            request_timeout_ms: 0,
        }
    }
}

impl GatewayConfig {
    const fn default_max_in_flight() -> usize {
        64
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct EventsConfig {
    #[serde(default = "EventsConfig::default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            channel_capacity: Self::default_channel_capacity(),
        }
    }
}

impl EventsConfig {
    const fn default_channel_capacity() -> usize {
        256
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_filter")]
    pub filter: String,
    #[serde(default = "LoggingConfig::default_file")]
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: Self::default_filter(),
            file: Self::default_file(),
        }
    }
}

impl LoggingConfig {
    fn default_filter() -> String {
        "info".into()
    }
    fn default_file() -> String {
        "uibridge.log".into()
    }
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>, // original file string (optional)
    pub source: Option<PathBuf>,
    pub file: ConfigFile,
}

/// Best-effort config path: working directory first, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from(FILE_NAME);
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("uibridge").join(FILE_NAME);
    }
    PathBuf::from(FILE_NAME)
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    let Ok(content) = fs::read_to_string(&path) else {
        return Ok(Config::default().normalize());
    };
    match toml::from_str::<ConfigFile>(&content) {
        Ok(file) => Ok(Config {
            raw: Some(content),
            source: Some(path),
            file,
        }
        .normalize()),
        Err(e) => {
            warn!(target: "config", path = %path.display(), error = %e, "config_parse_failed");
            Ok(Config::default().normalize())
        }
    }
}

impl Config {
    /// Clamp values to their minimums.
    pub fn normalize(mut self) -> Self {
        let gateway = &mut self.file.gateway;
        if gateway.max_in_flight == 0 {
            info!(target: "config", raw = 0, clamped = 1, "gateway_max_in_flight_clamped");
            gateway.max_in_flight = 1;
        }
        let events = &mut self.file.events;
        if events.channel_capacity == 0 {
            info!(target: "config", raw = 0, clamped = 1, "events_channel_capacity_clamped");
            events.channel_capacity = 1;
        }
        self
    }

    pub fn gateway(&self) -> &GatewayConfig {
        &self.file.gateway
    }

    pub fn events(&self) -> &EventsConfig {
        &self.file.events
    }

    pub fn logging(&self) -> &LoggingConfig {
        &self.file.logging
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex, MutexGuard};
    use tracing::Level;
    use tracing::subscriber::with_default;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone)]
    struct BufferWriter {
        inner: Arc<Mutex<Vec<u8>>>,
    }

    impl BufferWriter {
        fn new() -> (Self, Arc<Mutex<Vec<u8>>>) {
            let buf = Arc::new(Mutex::new(Vec::new()));
            (Self { inner: buf.clone() }, buf)
        }
    }

    struct LockedWriter<'a> {
        guard: MutexGuard<'a, Vec<u8>>,
    }

    impl<'a> Write for LockedWriter<'a> {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for BufferWriter {
        type Writer = LockedWriter<'a>;

        fn make_writer(&'a self) -> Self::Writer {
            LockedWriter {
                guard: self.inner.lock().expect("log buffer poisoned"),
            }
        }
    }

    fn capture<F: FnOnce()>(f: F) -> String {
        let (writer, buffer) = BufferWriter::new();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::INFO)
            .with_target(true)
            .with_ansi(false)
            .without_time()
            .with_writer(writer)
            .finish();
        with_default(subscriber, f);
        let out = buffer.lock().unwrap().clone();
        String::from_utf8(out).unwrap()
    }

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), body).unwrap();
        tmp
    }

    #[test]
    fn default_config_when_missing_file() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(cfg.gateway().max_in_flight, 64);
        assert_eq!(cfg.gateway().request_timeout(), None);
        assert_eq!(cfg.events().channel_capacity, 256);
        assert_eq!(cfg.logging().filter, "info");
        assert!(cfg.raw.is_none());
    }

    #[test]
    fn parses_all_sections() {
        let tmp = write_config(
            "[gateway]\nmax_in_flight = 4\nrequest_timeout_ms = 250\n\
             [events]\nchannel_capacity = 8\n\
             [logging]\nfilter = \"debug,store=trace\"\nfile = \"bridge.log\"\n",
        );
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.gateway().max_in_flight, 4);
        assert_eq!(cfg.gateway().request_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.events().channel_capacity, 8);
        assert_eq!(cfg.logging().filter, "debug,store=trace");
        assert_eq!(cfg.logging().file, "bridge.log");
        assert_eq!(cfg.source.as_deref(), Some(tmp.path()));
    }

    #[test]
    fn partial_file_keeps_other_defaults_and_ignores_unknown_keys() {
        let tmp = write_config("[events]\nchannel_capacity = 2\n[future]\nknob = true\n");
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.events().channel_capacity, 2);
        assert_eq!(cfg.gateway().max_in_flight, 64);
    }

    #[test]
    fn zero_values_are_clamped_with_config_log() {
        let tmp = write_config("[gateway]\nmax_in_flight = 0\n[events]\nchannel_capacity = 0\n");
        let mut cfg = None;
        let log_output = capture(|| {
            cfg = Some(load_from(Some(tmp.path().to_path_buf())).unwrap());
        });
        let cfg = cfg.unwrap();
        assert_eq!(cfg.gateway().max_in_flight, 1);
        assert_eq!(cfg.events().channel_capacity, 1);
        assert!(log_output.contains("INFO config:"));
        assert!(log_output.contains("gateway_max_in_flight_clamped"));
        assert!(log_output.contains("events_channel_capacity_clamped"));
    }

    #[test]
    fn parse_failure_falls_back_to_defaults_with_warning() {
        let tmp = write_config("[gateway\nmax_in_flight = ");
        let mut cfg = None;
        let log_output = capture(|| {
            cfg = Some(load_from(Some(tmp.path().to_path_buf())).unwrap());
        });
        assert_eq!(cfg.unwrap().file, ConfigFile::default());
        assert!(log_output.contains("WARN config:"));
        assert!(log_output.contains("config_parse_failed"));
    }
}
