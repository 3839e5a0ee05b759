//! uibridge entrypoint: seeds a component manifest and runs a JSON-lines
//! request script against the gateway.
use anyhow::{Context, Result};
use clap::Parser;
use core_config::{Config, LoggingConfig, load_from};
use core_gateway::{Gateway, GatewayOptions};
use core_plugin::NoopWidgetHost;
use core_state::ComponentStore;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

mod session;

use session::{LoggingControlPlane, Manifest, Session};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "uibridge", version, about = "UI component bridge host")]
struct Args {
    /// JSON manifest of records to register before the script runs.
    #[arg(long = "manifest")]
    pub manifest: Option<PathBuf>,
    /// JSON-lines request script. Reads stdin when omitted.
    #[arg(long = "script")]
    pub script: Option<PathBuf>,
    /// Optional configuration file path (overrides discovery of `uibridge.toml`).
    #[arg(long = "config")]
    pub config: Option<PathBuf>,
}

struct AppStartup {
    log_guard: Option<WorkerGuard>,
}

impl AppStartup {
    fn new() -> Self {
        Self { log_guard: None }
    }

    fn configure_logging(&mut self, logging: &LoggingConfig) -> Result<()> {
        let log_dir = Path::new(".");
        let log_path = log_dir.join(&logging.file);
        if log_path.exists() {
            let _ = std::fs::remove_file(&log_path);
        }

        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .or_else(|_| tracing_subscriber::EnvFilter::try_new(&logging.filter))
            .context("invalid logging filter")?;
        let file_appender = tracing_appender::rolling::never(log_dir, &logging.file);
        let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
        match tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(nb_writer)
            .with_ansi(false)
            .try_init()
        {
            Ok(_) => {
                self.log_guard = Some(guard);
            }
            Err(_err) => {
                // Global tracing subscriber already installed; drop guard so writer shuts down.
            }
        }
        Ok(())
    }

    fn install_panic_hook() {
        static HOOK: Once = Once::new();
        HOOK.call_once(|| {
            let default_panic = std::panic::take_hook();
            std::panic::set_hook(Box::new(move |info| {
                tracing::error!(target: "runtime.panic", ?info, "panic");
                default_panic(info);
            }));
        });
    }
}

fn load_manifest(path: Option<&Path>) -> Result<Manifest> {
    let Some(path) = path else {
        return Ok(Manifest::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    Manifest::parse(&text)
}

async fn run(args: Args, config: Config) -> Result<()> {
    let options = GatewayOptions::from(&config);
    info!(
        target: "runtime.startup",
        config = config.source.as_ref().map(|p| p.display().to_string()).as_deref(),
        max_in_flight = options.max_in_flight,
        timeout_ms = options.request_timeout.map(|d| d.as_millis() as u64),
        channel_capacity = options.channel_capacity,
        "bootstrap_complete"
    );
    let gateway = Gateway::new(
        options,
        Arc::new(ComponentStore::new()),
        Arc::new(LoggingControlPlane),
        Arc::new(NoopWidgetHost),
    );

    let manifest = load_manifest(args.manifest.as_deref())?;
    let stdout = io::stdout();
    let mut session = Session::new(gateway.clone(), stdout.lock());
    session.seed(manifest);

    let outcome = match args.script.as_ref() {
        Some(path) => {
            let file = std::fs::File::open(path)
                .with_context(|| format!("opening script {}", path.display()))?;
            session.run_script(BufReader::new(file)).await
        }
        None => session.run_script(io::stdin().lock()).await,
    };

    gateway.shutdown();
    let metrics = gateway.metrics();
    info!(
        target: "runtime",
        submitted = metrics.submitted,
        completed = metrics.completed,
        cancelled = metrics.cancelled,
        timed_out = metrics.timed_out,
        "shutdown"
    );
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_from(args.config.clone())?;
    let mut startup = AppStartup::new();
    startup.configure_logging(config.logging())?;
    AppStartup::install_panic_hook();
    info!(target: "runtime", "startup");

    let result = run(args, config).await;
    if let Err(err) = &result {
        tracing::error!(target: "runtime", error = %format!("{err:#}"), "fatal");
    }
    drop(startup.log_guard.take());
    result
}
