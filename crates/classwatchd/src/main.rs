use anyhow::{Context, Result};
use classwatch_core::gallery::resolve_seed;
use classwatch_core::{AlertStore, Registration, SeedIdentity, SeedSource, SystemClock};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod embedder;
mod feed;
mod monitor;
mod roster;
mod session;

use config::{BusKind, Config};
use dbus_interface::ClassWatchService;
use embedder::CommandEmbedder;
use feed::FeedOpener;
use monitor::{Monitor, MonitorSettings};
use session::Session;

fn load_seed(config: &Config) -> Result<Vec<SeedIdentity>> {
    let mut seed = Vec::new();
    if let Some(path) = &config.roster_path {
        seed.extend(roster::load_roster(path).context("loading seed roster")?);
    }
    if let Some(dir) = &config.students_dir {
        seed.extend(roster::scan_students_dir(dir).context("scanning students directory")?);
    }
    Ok(seed)
}

fn load_registrations(config: &Config) -> Result<Vec<Registration>> {
    match &config.registrations_path {
        Some(path) => roster::load_registrations(path, config.embedding_dim)
            .context("loading registrations"),
        None => Ok(Vec::new()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("classwatchd starting");

    let config = Config::from_env();
    tracing::info!(
        feed = %config.feed_path,
        threshold = config.match_threshold,
        dim = config.embedding_dim,
        bus = ?config.bus,
        "configuration loaded"
    );

    let opener = FeedOpener {
        path: config.feed_path.clone(),
        frame_interval: config.frame_interval,
        embedding_dim: config.embedding_dim,
    };

    let seed = load_seed(&config)?;
    let seed = match config
        .embed_command
        .as_deref()
        .and_then(|cmd| CommandEmbedder::from_command_line(cmd, config.embed_timeout))
    {
        Some(mut embedder) => resolve_seed(seed, &mut embedder, config.embedding_dim).await,
        None => {
            if seed
                .iter()
                .any(|s| s.sources.iter().any(|src| matches!(src, SeedSource::Image(_))))
            {
                tracing::warn!("CLASSWATCH_EMBED_CMD is unset; photo-only identities will be omitted");
            }
            let (_, mut embedder) = opener.open();
            resolve_seed(seed, &mut embedder, config.embedding_dim).await
        }
    };
    let registrations = load_registrations(&config)?;

    let session = Session::new(
        seed,
        registrations,
        AlertStore::new(config.alert_cooldown_ms, config.alert_history),
    )
    .shared();
    tracing::info!(identities = session::lock(&session).gallery().len(), "gallery ready");

    let mut monitor = Monitor::new(
        Arc::clone(&session),
        config.correlator(),
        Arc::new(SystemClock),
        MonitorSettings {
            cycle_interval: config.cycle_interval,
            perception_timeout: config.perception_timeout,
        },
    );
    let mut reports = monitor.subscribe();
    tokio::spawn(async move {
        loop {
            match reports.recv().await {
                Ok(report) => {
                    for alert in report.alerts {
                        tracing::info!(
                            kind = alert.kind.as_str(),
                            severity = ?alert.severity,
                            students = ?alert.students,
                            "{}",
                            alert.message
                        );
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "alert log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let (source, backend) = opener.open();
    monitor
        .start(source, backend)
        .await
        .context("starting detection loop")?;
    let monitor = Arc::new(tokio::sync::Mutex::new(monitor));

    let service = ClassWatchService {
        session,
        monitor: Arc::clone(&monitor),
        feed: opener,
        embedding_dim: config.embedding_dim,
        registrations_path: config.registrations_path.clone(),
    };

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(dbus_interface::BUS_NAME)?
        .serve_at(dbus_interface::OBJECT_PATH, service)?
        .build()
        .await
        .context("registering D-Bus service")?;

    tracing::info!(name = dbus_interface::BUS_NAME, "classwatchd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("classwatchd shutting down");
    monitor.lock().await.stop().await;

    Ok(())
}
