//! Pagi Dialog Daemon
//!
//! Hosts the dialog core as a long-running process. Inbound bus messages are
//! read as JSON lines (`{"topic": ..., "payload": ...}`) from stdin; everything
//! the host publishes is written to stdout in the same shape. Logs go to stderr.

use anyhow::Context;
use pagi_dialog::{
    topics, BroadcastBus, ConnectivityProbe, DialogConfig, DialogHost, HttpProbe, InboundMessage,
};
use pagi_voice::{default_catalog, SiteMonitors, VadConfig};
use std::io::{BufRead, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const PROBE_TIMEOUT_SECS: u64 = 5;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[pagi-daemon] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = DialogConfig::load().context("load DialogConfig")?;

    let bus = Arc::new(BroadcastBus::default());
    spawn_outbound_writer(&bus);
    let ended_sites = spawn_session_watcher(&bus);

    let probe = if config.stay_completely_offline {
        None
    } else {
        Some(HttpProbe::new(
            config.connectivity_probe_url.clone(),
            Duration::from_secs(PROBE_TIMEOUT_SECS),
        )?)
    };
    let online = match &probe {
        Some(probe) => probe.probe().await,
        None => false,
    };

    let catalog = default_catalog(&config);
    let connectivity_every = Duration::from_secs(config.connectivity_check_secs.max(1));
    let housekeeping_every = Duration::from_secs(config.housekeeping_secs.max(1));

    let host = Arc::new(DialogHost::new(config, catalog, bus, online)?);
    {
        let host = Arc::clone(&host);
        tokio::task::spawn_blocking(move || host.start()).await??;
    }
    spawn_inbound_reader(Arc::clone(&host), ended_sites)?;

    tracing::info!(online, "Pagi dialog daemon started");

    let mut connectivity = tokio::time::interval(connectivity_every);
    let mut housekeeping = tokio::time::interval(housekeeping_every);

    loop {
        tokio::select! {
            _ = connectivity.tick(), if probe.is_some() => {
                if let Some(probe) = &probe {
                    if let Err(e) = host.connectivity().check(probe).await {
                        tracing::warn!(error = %e, "connectivity check failed");
                    }
                }
            }
            _ = housekeeping.tick() => {
                let swept = host.housekeeping();
                if swept.components > 0 || swept.sessions > 0 {
                    tracing::debug!(components = swept.components, sessions = swept.sessions, "housekeeping");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down daemon");
                break;
            }
        }
    }

    tokio::task::spawn_blocking(move || host.shutdown()).await?;
    Ok(())
}

/// Mirror every published message to stdout as one JSON line.
fn spawn_outbound_writer(bus: &BroadcastBus) {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(message) => match serde_json::to_string(&message) {
                    Ok(line) => {
                        let mut out = std::io::stdout().lock();
                        if writeln!(out, "{line}").and_then(|_| out.flush()).is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, topic = %message.topic, "unserializable message"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "outbound writer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Forward the device of every ended session to the inbound thread.
fn spawn_session_watcher(bus: &BroadcastBus) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    let mut sub = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match sub.recv().await {
                Ok(message) if message.topic == topics::SESSION_ENDED => {
                    let Some(site) = message.payload.get("siteId").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    if tx.send(site.to_string()).is_err() {
                        break;
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    });
    rx
}

/// Route stdin JSON lines on a plain thread; dispatch blocks.
fn spawn_inbound_reader(host: Arc<DialogHost>, ended_sites: mpsc::Receiver<String>) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("inbound_router".to_string())
        .spawn(move || {
            let mut monitors = SiteMonitors::new(VadConfig::default());
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                };
                for site in ended_sites.try_iter() {
                    monitors.session_ended(&site);
                }
                let message: InboundMessage = match serde_json::from_str(&line) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "invalid inbound message");
                        continue;
                    }
                };
                let vad = monitors.feed(&message);
                for message in std::iter::once(message).chain(vad) {
                    if let Err(e) = host.route(message) {
                        tracing::warn!(error = %e, "routing failed");
                    }
                }
            }
            tracing::info!("stdin closed; inbound routing stopped");
        })?;
    Ok(())
}
