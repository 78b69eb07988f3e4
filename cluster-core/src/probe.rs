//! Readiness probes.

use crate::error::Result;
use async_trait::async_trait;
use cluster_types::NodeConfiguration;
use std::time::Duration;

/// Answers "is this node serving yet?".
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Returns true if the node responded.
    async fn probe(&self, node: &NodeConfiguration) -> bool;
}

/// Plain HTTP GET against `http://localhost:<http_port>`.
///
/// Any HTTP response counts as ready, including error statuses: a server that
/// answers 503 is up and serving.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Create a probe whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn probe(&self, node: &NodeConfiguration) -> bool {
        match self.client.get(node.http_url()).send().await {
            Ok(response) => {
                tracing::debug!("{}: probe answered {}", node.name(), response.status());
                true
            }
            Err(e) => {
                tracing::debug!("{}: probe failed: {}", node.name(), e);
                false
            }
        }
    }
}
