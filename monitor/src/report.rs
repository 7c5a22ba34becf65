use gatewatch::stream::{BufferedAlert, DashboardView};

/// Periodic one-line view summary
#[derive(Debug, PartialEq, Eq)]
pub struct Summary {
    pub connected: bool,
    pub buffered_alerts: usize,
    pub cameras_with_frames: usize,
    pub alerting_cameras: Vec<i64>,
    pub stats_keys: Vec<String>,
}

impl Summary {
    pub fn from_view(view: &DashboardView) -> Self {
        let mut stats_keys: Vec<String> = view
            .stats
            .as_ref()
            .map(|stats| stats.keys().cloned().collect())
            .unwrap_or_default();
        stats_keys.sort();

        Self {
            connected: view.connected,
            buffered_alerts: view.alerts.len(),
            cameras_with_frames: view.frames.len(),
            alerting_cameras: view.currently_alerting().into_keys().collect(),
            stats_keys,
        }
    }
}

/// Alerts newer than `last_seen`, oldest first
pub fn new_alerts(view: &DashboardView, last_seen: Option<u64>) -> Vec<&BufferedAlert> {
    let mut fresh: Vec<&BufferedAlert> = view
        .alerts
        .iter()
        .take_while(|entry| last_seen.map_or(true, |seen| entry.seq > seen))
        .collect();
    fresh.reverse();
    fresh
}
