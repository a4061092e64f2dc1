//! Readiness probes
//!
//! A probe is a single bounded attempt that answers ready or not-ready and
//! never fails. Polling lives in the lifecycle driver.

use crate::client::RuntimeClient;
use crate::error::Result;
use crate::template::WaitStrategy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

/// One readiness attempt
#[async_trait]
pub trait Probe: Send + Sync {
    /// `container` is the container to inspect when the strategy does not
    /// name one.
    async fn probe(&self, strategy: &WaitStrategy, container: Option<&str>) -> bool;
}

/// Sleeps between probe attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock sleeper
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Probes http, tcp and container health
pub struct ReadinessChecker {
    runtime: Arc<dyn RuntimeClient>,
    http: reqwest::Client,
    probe_timeout: Duration,
}

impl ReadinessChecker {
    /// Every probe is cut off after `probe_timeout`, whatever the
    /// strategy's own timing.
    pub fn new(runtime: Arc<dyn RuntimeClient>, probe_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(probe_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;

        Ok(Self {
            runtime,
            http,
            probe_timeout,
        })
    }

    async fn probe_http(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                debug!(url, status, "HTTP probe");
                (200..400).contains(&status)
            }
            Err(e) => {
                debug!(url, error = %e, "HTTP probe failed");
                false
            }
        }
    }

    async fn probe_tcp(&self, host: &str, port: u16) -> bool {
        match tokio::time::timeout(self.probe_timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(host, port, error = %e, "TCP probe failed");
                false
            }
            Err(_) => {
                debug!(host, port, "TCP probe timed out");
                false
            }
        }
    }

    async fn probe_health(&self, container: Option<&str>) -> bool {
        let Some(container) = container else {
            debug!("Health probe has no container to inspect");
            return false;
        };

        let inspected =
            tokio::time::timeout(self.probe_timeout, self.runtime.inspect_container(container)).await;

        match inspected {
            Ok(Ok(Some(details))) => {
                debug!(container, health = ?details.health, "Health probe");
                details.health.as_deref() == Some("healthy")
            }
            Ok(Ok(None)) => {
                debug!(container, "Health probe: container not found");
                false
            }
            Ok(Err(e)) => {
                debug!(container, error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                debug!(container, "Health probe timed out");
                false
            }
        }
    }
}

#[async_trait]
impl Probe for ReadinessChecker {
    async fn probe(&self, strategy: &WaitStrategy, container: Option<&str>) -> bool {
        match strategy {
            WaitStrategy::Http { url, .. } => self.probe_http(url).await,
            WaitStrategy::Tcp { host, port, .. } => self.probe_tcp(host, *port).await,
            WaitStrategy::ContainerHealthy {
                container: named, ..
            } => self.probe_health(named.as_deref().or(container)).await,
        }
    }
}
