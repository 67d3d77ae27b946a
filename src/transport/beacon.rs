use anyhow::{Context, Result};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Best-effort notice to the agent that a session is being abandoned
#[derive(Debug, Clone)]
pub struct TerminationBeacon {
    client: reqwest::Client,
    endpoint: String,
}

impl TerminationBeacon {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, session_id: &str) -> String {
        format!("{}/terminate?sessionId={}", self.endpoint, session_id)
    }

    /// Send the notice on its own task; the caller never waits on the agent
    pub fn fire(&self, session_id: &str) -> JoinHandle<()> {
        let beacon = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move { beacon.send(&session_id).await })
    }

    /// Send the notice. Failures are logged and otherwise ignored.
    pub async fn send(&self, session_id: &str) {
        let url = self.url(session_id);
        match self.client.post(&url).send().await {
            Ok(response) => info!("Termination notice sent ({})", response.status()),
            Err(e) => warn!("Termination notice failed: {}", e),
        }
    }
}
