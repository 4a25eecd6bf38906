mod config;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

use uptime_api::state::AppState;
use uptime_core::{
    CheckStatus, Engine, EngineConfig, HttpProbe, MemoryStore, Monitor, ProbeKind,
    ProbeRegistry, SenderRegistry, Store,
};

use crate::config::AppConfig;

fn version_string() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| {
        let version = env!("CARGO_PKG_VERSION");
        match env!("GIT_HASH") {
            "" => version.to_string(),
            hash => format!("{version} ({hash})"),
        }
    })
}

/// Uptime monitor: probe endpoints, track incidents and send notifications.
#[derive(Parser)]
#[command(name = "uptime-monitor", version = version_string(), about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitoring engine and the HTTP API server.
    Serve {
        /// Listen address (e.g. 0.0.0.0:8080). Overrides config file.
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Path to TOML config file.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Probe a single URL or host:port once and print the result.
    Check {
        /// `http(s)://` URL or `host:port`.
        target: String,

        /// Timeout in seconds.
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// Report as degraded when latency exceeds this many milliseconds.
        #[arg(long)]
        degraded_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { listen, config } => {
            run_serve(listen, config).await;
        }
        Commands::Check {
            target,
            timeout,
            degraded_ms,
        } => {
            fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
                )
                .init();
            let passed = run_check(target, timeout, degraded_ms).await;
            if !passed {
                std::process::exit(1);
            }
        }
    }
}

async fn run_serve(listen_override: Option<SocketAddr>, config_path: Option<PathBuf>) {
    let app_config = if let Some(ref path) = config_path {
        match AppConfig::load(path) {
            Ok(c) => {
                init_tracing(&c.server.log_format);
                tracing::info!(path = %path.display(), "Loaded config file");
                Some(c)
            }
            Err(e) => {
                init_tracing("pretty");
                tracing::error!("{}", e);
                std::process::exit(1);
            }
        }
    } else {
        init_tracing("pretty");
        None
    };

    let listen = listen_override
        .or(app_config.as_ref().map(|c| c.server.listen))
        .unwrap_or_else(config::default_listen);

    let engine_config = app_config
        .as_ref()
        .map(|c| c.engine.to_engine_config())
        .unwrap_or_default();

    let engine = match build_engine(engine_config) {
        Ok(engine) => Arc::new(engine),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build HTTP client");
            std::process::exit(1);
        }
    };

    if let Err(e) = engine.start().await {
        tracing::error!(error = %e, "Failed to start engine");
        std::process::exit(1);
    }

    let mut state = AppState::new(engine.clone());
    if let Some(ref app_config) = app_config {
        if let Some(ref url) = app_config.server.public_url {
            state = state.with_public_url(url);
        }
        load_config(&engine, &state, app_config).await;
    }

    tracing::info!(%listen, "Starting uptime monitor API server");
    if let Err(e) = uptime_api::serve_with_state(listen, state, uptime_api::shutdown_signal()).await
    {
        tracing::error!(error = %e, "Server failed");
        engine.shutdown().await;
        std::process::exit(1);
    }

    tracing::info!("Shutdown signal received, stopping monitors...");
    engine.shutdown().await;
    tracing::info!("Shutdown complete");
}

fn build_engine(config: EngineConfig) -> Result<Engine, reqwest::Error> {
    let client = HttpProbe::build_client(Duration::from_secs(30))?;
    let probes = ProbeRegistry::with_defaults(client.clone(), config.max_body_bytes);
    let senders = SenderRegistry::with_defaults(client);
    let store = Arc::new(MemoryStore::new(config.check_history_limit));
    Ok(Engine::new(store, probes, senders, config))
}

/// Stores channels first so monitors can reference them by name, then
/// monitors, then maintenance windows.
async fn load_config(engine: &Engine, state: &AppState, config: &AppConfig) {
    let store = engine.store();

    let mut channel_ids = HashMap::new();
    for def in &config.channel {
        let channel = def.to_channel();
        match store.upsert_channel(&channel).await {
            Ok(()) => {
                tracing::info!(channel = %channel.name, kind = %channel.kind, "Channel loaded from config");
                channel_ids.insert(def.name.clone(), channel.id);
            }
            Err(e) => tracing::error!(channel = %def.name, error = %e, "Failed to store channel"),
        }
    }

    let mut monitor_ids = HashMap::new();
    for def in &config.monitor {
        let monitor = def.to_monitor(&channel_ids);
        let id = monitor.id;
        let result = if monitor.is_heartbeat() {
            add_heartbeat(engine, state, monitor, def.grace_secs.unwrap_or(0), def.token.clone())
                .await
        } else {
            engine.add_monitor(monitor).await.map(|_| ())
        };
        match result {
            Ok(()) => {
                tracing::info!(monitor = %def.name, monitor_id = %id, "Monitor loaded from config");
                monitor_ids.insert(def.name.clone(), id);
            }
            Err(e) => tracing::error!(monitor = %def.name, error = %e, "Failed to add monitor"),
        }
    }

    for def in &config.maintenance {
        let window = def.to_window(&monitor_ids);
        match store.upsert_maintenance_window(&window).await {
            Ok(()) => tracing::info!(window = %window.name, "Maintenance window loaded from config"),
            Err(e) => tracing::error!(window = %def.name, error = %e, "Failed to store maintenance window"),
        }
    }
}

async fn add_heartbeat(
    engine: &Engine,
    state: &AppState,
    monitor: Monitor,
    grace_secs: u64,
    token: Option<String>,
) -> Result<(), uptime_core::EngineError> {
    let name = monitor.name.clone();
    let mut heartbeat = engine.add_heartbeat(monitor, grace_secs).await?;
    if let Some(token) = token {
        heartbeat = heartbeat.with_token(token);
        engine.store().save_heartbeat(&heartbeat).await?;
    }
    tracing::info!(monitor = %name, push_url = %state.push_url(&heartbeat.token), "Heartbeat ready");
    Ok(())
}

/// Returns false when the target is down.
async fn run_check(target: String, timeout: u64, degraded_ms: Option<u64>) -> bool {
    let kind = if target.starts_with("http://") || target.starts_with("https://") {
        ProbeKind::Http
    } else {
        ProbeKind::Tcp
    };
    let mut monitor = Monitor::new("check", kind, &target).with_timeout(timeout.max(1));
    if let Some(ms) = degraded_ms {
        monitor = monitor.with_degraded_latency(ms);
    }

    let config = EngineConfig::default();
    let client = match HttpProbe::build_client(monitor.timeout()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            return false;
        }
    };
    let probes = ProbeRegistry::with_defaults(client, config.max_body_bytes);

    let spinner = ProgressBar::new_spinner();
    if let Ok(s) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(s);
    }
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("{} {}", style(kind).dim(), style(&target).bold()));

    let outcome = probes.run(&monitor).await;
    spinner.finish_and_clear();

    let label = format!("{:<8}", outcome.status.to_string().to_uppercase());
    let label = match outcome.status {
        CheckStatus::Up => style(label).green().bold(),
        CheckStatus::Degraded => style(label).yellow().bold(),
        CheckStatus::Down => style(label).red().bold(),
    };
    let code = outcome
        .status_code
        .map(|c| format!(" HTTP {c}"))
        .unwrap_or_default();
    println!(
        "{} {}  {}ms{}  {}",
        label,
        style(&target).bold(),
        outcome.latency_ms,
        style(code).dim(),
        outcome.message
    );

    outcome.status != CheckStatus::Down
}

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_format {
        "json" => {
            fmt().with_env_filter(filter).json().init();
        }
        _ => {
            fmt().with_env_filter(filter).init();
        }
    }
}
