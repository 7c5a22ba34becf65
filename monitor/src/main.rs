mod report;

use anyhow::{Context, Result};
use gatewatch::backend::BackendClient;
use gatewatch::config::resolve_config;
use gatewatch::stream::StreamConsumer;
use report::{new_alerts, Summary};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

const SUMMARY_INTERVAL: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gatewatch_monitor=info,gatewatch=info".into()),
        )
        .init();

    info!("Gatewatch monitor starting...");

    let config = resolve_config()?;
    info!(
        stream_url = %config.stream.url,
        alert_capacity = config.stream.alert_capacity,
        reconnect_delay_ms = config.stream.reconnect_delay_ms,
        "Configuration loaded"
    );

    let mut consumer = StreamConsumer::new(config.stream.clone());
    if config.stream.bootstrap_stats {
        consumer = consumer.with_bootstrap(BackendClient::new(config.backend.clone()));
    }
    let mut handle = consumer.connect(config.stream.url.clone());

    let mut updates = handle.subscribe();
    let reporter = tokio::spawn(async move {
        let mut ticker = interval(SUMMARY_INTERVAL);
        // Skip missed ticks to prevent backlog under load
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_seen: Option<u64> = None;

        loop {
            tokio::select! {
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let view = updates.borrow_and_update();
                    for entry in new_alerts(&view, last_seen) {
                        let alert = &entry.alert;
                        warn!(
                            camera_id = alert.camera_id,
                            severity = ?alert.severity,
                            incident_type = %alert.incident_type,
                            alert_id = ?alert.alert_id.as_ref().map(ToString::to_string),
                            message = %alert.message,
                            "Alert received"
                        );
                        last_seen = Some(entry.seq);
                    }
                }
                _ = ticker.tick() => {
                    let summary = Summary::from_view(&updates.borrow());
                    info!(
                        connected = summary.connected,
                        buffered_alerts = summary.buffered_alerts,
                        cameras_with_frames = summary.cameras_with_frames,
                        alerting_cameras = ?summary.alerting_cameras,
                        stats_keys = ?summary.stats_keys,
                        "Dashboard summary"
                    );
                }
            }
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    handle.shutdown().await;
    reporter.abort();
    info!("Gatewatch monitor stopped");

    Ok(())
}
