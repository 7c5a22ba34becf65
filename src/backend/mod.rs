use crate::config::BackendConfig;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

/// HTTP client for the decision backend.
///
/// Timeouts are applied by callers so each use keeps its own bound.
#[derive(Clone)]
pub struct BackendClient {
    http: reqwest::Client,
    config: BackendConfig,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// GET dashboard stats (bootstrap snapshot)
    pub async fn fetch_stats(&self) -> Result<Map<String, Value>> {
        let url = self.url(&self.config.stats_path);
        debug!(url = %url, "Fetching dashboard stats");

        let stats = self
            .http
            .get(&url)
            .send()
            .await
            .context("Failed to reach dashboard stats endpoint")?
            .error_for_status()
            .context("Dashboard stats endpoint returned an error")?
            .json::<Map<String, Value>>()
            .await
            .context("Dashboard stats response was not a JSON object")?;

        Ok(stats)
    }

    /// POST a body to the decision webhook; non-2xx is an error
    pub async fn post_decision<T: Serialize + ?Sized>(&self, body: &T) -> Result<()> {
        let url = self.url(&self.config.decision_path);

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .context("Failed to reach decision webhook")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("decision webhook responded with {}", status);
        }
        debug!(status = %status, "Decision webhook accepted message");
        Ok(())
    }
}
