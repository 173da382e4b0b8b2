// Copyright 2025 Chris Custine
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

mod config;
mod connection_manager;
mod status;

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use clap::Parser;
use log::{error, info, warn};
use tokio::time::MissedTickBehavior;

use config::{AppConfig, ServerConfig};
use connection_manager::ConnectionManager;
use status::{DiagnosticLevel, SharedSystemStatus, SystemStatus};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Follow live aircraft positions from one or more channels servers.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Connect to this WebSocket URL instead of the configured servers (repeatable)
    #[arg(long)]
    url: Vec<String>,

    /// Subscribe to this topic instead of the configured ones (repeatable)
    #[arg(long = "topic")]
    topics: Vec<String>,

    /// Show raw positions without smoothing
    #[arg(long)]
    no_interpolation: bool,

    /// Duration of one eased transition in milliseconds
    #[arg(long)]
    interpolation_ms: Option<u64>,

    /// Seconds between status log lines
    #[arg(long)]
    status_interval: Option<u64>,

    /// Log the current position of this aircraft with each status line (repeatable)
    #[arg(long)]
    sample: Vec<String>,
}

impl Args {
    /// Apply command-line overrides. They are never saved.
    fn apply(&self, config: &mut AppConfig) {
        if !self.url.is_empty() {
            config.servers = self
                .url
                .iter()
                .enumerate()
                .map(|(i, url)| ServerConfig::new(format!("cli-{}", i + 1), url.clone(), true))
                .collect();
        }
        if !self.topics.is_empty() {
            for server in &mut config.servers {
                server.topics.clone_from(&self.topics);
            }
        }
        if self.no_interpolation {
            config.interpolation_enabled = false;
        }
        if let Some(ms) = self.interpolation_ms {
            config.interpolation_ms = ms;
        }
        if let Some(secs) = self.status_interval {
            config.status_interval_secs = secs;
        }
    }
}

/// Log a status summary plus the diagnostics recorded after `since`.
fn log_status(
    manager: &ConnectionManager,
    status: &SharedSystemStatus,
    samples: &[String],
    since: DateTime<Utc>,
) {
    {
        let status = status::lock(status);
        for diagnostic in status.diagnostics_since(since) {
            let stamp = diagnostic.timestamp.format("%H:%M:%S");
            match diagnostic.level {
                DiagnosticLevel::Info => info!("{stamp} {}", diagnostic.message),
                DiagnosticLevel::Warning => warn!("{stamp} {}", diagnostic.message),
                DiagnosticLevel::Error => error!("{stamp} {}", diagnostic.message),
            }
        }
        info!(
            "{}/{} servers connected ({} configured), {} aircraft, {} distinct",
            status.get_connected_server_count(),
            manager.active_connection_count(),
            manager.connection_count(),
            status.get_total_server_aircraft(),
            manager.get_all_positions_merged().len()
        );
        for server in status.servers.values() {
            info!(
                "[{}] {:?}, {} aircraft, {} batches, up {}s{}",
                server.server_name,
                server.status,
                server.aircraft_count,
                server.batch_count,
                server.uptime_seconds(),
                server
                    .last_error
                    .as_ref()
                    .map(|e| format!(", last error: {e}"))
                    .unwrap_or_default()
            );
        }
    }

    for id in samples {
        match manager.get_position(id) {
            Some(p) => info!(
                "{id}: {:.5}, {:.5} alt {:?} track {:?} gs {:?}",
                p.lat, p.lon, p.alt, p.track, p.gs
            ),
            None => info!("{id}: not tracked"),
        }
    }
}

/// Apply server changes from the config file on disk.
///
/// Servers given with `--url` are never replaced by the file.
fn reload_servers(manager: &mut ConnectionManager, args: &Args) {
    if !args.url.is_empty() {
        info!("Servers come from the command line, ignoring reload");
        return;
    }
    match AppConfig::load() {
        Ok(mut config) => {
            args.apply(&mut config);
            info!("Reloading {} configured servers", config.servers.len());
            manager.apply_servers(&config.servers);
        }
        Err(e) => error!("Failed to reload configuration: {e}"),
    }
}

/// SIGHUP listener; never fires where the signal does not exist.
struct ReloadSignal {
    #[cfg(unix)]
    hangup: Option<tokio::signal::unix::Signal>,
}

impl ReloadSignal {
    fn new() -> Self {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let hangup = signal(SignalKind::hangup())
                .inspect_err(|e| warn!("Config reload on SIGHUP unavailable: {e}"))
                .ok();
            Self { hangup }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        {
            if let Some(hangup) = &mut self.hangup {
                if hangup.recv().await.is_some() {
                    return;
                }
            }
            self.hangup = None;
        }
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), confy::ConfyError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = AppConfig::load()?;
    if let Ok(path) = AppConfig::get_config_path() {
        info!("Using configuration {}", path.display());
    }
    args.apply(&mut config);

    let status: SharedSystemStatus = Arc::new(Mutex::new(SystemStatus::new()));
    if config.enabled_servers().next().is_none() {
        error!("No enabled servers configured");
        return Ok(());
    }
    let mut manager = ConnectionManager::new(status.clone(), config.interpolation_config());
    manager.apply_servers(&config.servers);

    let mut ticker = tokio::time::interval(config.status_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut reload = ReloadSignal::new();
    let mut last_report = DateTime::<Utc>::MIN_UTC;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                log_status(&manager, &status, &args.sample, last_report);
                last_report = now;
            }
            () = reload.recv() => reload_servers(&mut manager, &args),
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    error!("Failed to listen for ctrl-c: {e}");
                }
                break;
            }
        }
    }

    manager.shutdown().await;
    info!("Stopped");
    Ok(())
}
