//! Network dashboard feed over HTTP

use async_trait::async_trait;
use reqwest::Client;
use url::Url;

use crate::error::{MonitorError, Result};
use crate::fetch::DashboardSource;
use crate::models::NodeSummary;

pub struct HttpDashboardSource {
    client: Client,
    url: Url,
}

impl HttpDashboardSource {
    pub fn new(url: Url, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl DashboardSource for HttpDashboardSource {
    async fn fetch_nodes(&self) -> Result<Vec<NodeSummary>> {
        let response = self.client.get(self.url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::Rpc(format!(
                "dashboard returned {}: {}",
                status,
                body.trim()
            )));
        }

        Ok(response.json::<Vec<NodeSummary>>().await?)
    }
}
