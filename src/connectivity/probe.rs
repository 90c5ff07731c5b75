//! HTTP reachability probe, the connectivity signal source for the CLI runtime.
//!
//! Any HTTP response (whatever the status) means the network path is up; a
//! transport error or timeout means it is down.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::ConnectivityObserver;
use crate::config::ConnectivityConfig;

pub struct ConnectivityProbe {
    client: reqwest::Client,
    url: String,
    interval: Duration,
}

impl ConnectivityProbe {
    pub fn new(url: impl Into<String>, interval: Duration, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build probe HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
            interval,
        })
    }

    /// Build a probe from config. `None` when no probe URL is configured.
    pub fn from_config(config: &ConnectivityConfig) -> Result<Option<Self>> {
        config
            .probe_url
            .as_deref()
            .map(|url| Self::new(url, config.probe_interval(), config.probe_timeout()))
            .transpose()
    }

    /// One reachability check.
    pub async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(response) => {
                tracing::trace!(url = %self.url, status = %response.status(), "probe reachable");
                true
            }
            Err(e) => {
                tracing::debug!(url = %self.url, error = %e, "probe unreachable");
                false
            }
        }
    }

    /// Check once and publish the result.
    pub async fn check_and_publish(&self, observer: &ConnectivityObserver) -> bool {
        let online = self.check().await;
        observer.set_online(online);
        online
    }

    /// Probe forever on the configured interval, feeding `observer`.
    pub fn spawn(self, observer: ConnectivityObserver) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check_and_publish(&observer).await;
            }
        })
    }
}
