//! IP geolocation over HTTP
//!
//! Speaks the ip-api.com JSON shape: `GET {base}/json/{ip}` answers with a
//! `status` of `success` or `fail`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::{MonitorError, Result};
use crate::fetch::GeoProvider;
use crate::models::GeoResult;

const LOOKUP_FIELDS: &str = "status,message,country,city,lat,lon,isp";

#[derive(Debug, Deserialize)]
struct LookupResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    country: Option<String>,
    #[serde(default)]
    city: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    isp: Option<String>,
}

impl LookupResponse {
    fn into_result(self) -> Option<GeoResult> {
        if self.status != "success" {
            return None;
        }
        Some(GeoResult {
            country: self.country,
            city: self.city,
            lat: self.lat?,
            lon: self.lon?,
            isp: self.isp,
        })
    }
}

pub struct IpApiGeoProvider {
    client: Client,
    base_url: Url,
}

impl IpApiGeoProvider {
    pub fn new(base_url: Url, timeout: std::time::Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn lookup_url(&self, ip: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(&format!("json/{}", ip))
            .map_err(|e| MonitorError::InvalidInput(format!("bad lookup address {}: {}", ip, e)))?;
        url.query_pairs_mut().append_pair("fields", LOOKUP_FIELDS);
        Ok(url)
    }
}

#[async_trait]
impl GeoProvider for IpApiGeoProvider {
    async fn lookup(&self, ip: &str) -> Result<Option<GeoResult>> {
        let response = self
            .client
            .get(self.lookup_url(ip)?)
            .send()
            .await?
            .error_for_status()?
            .json::<LookupResponse>()
            .await?;

        if let Some(message) = response.message.as_deref() {
            tracing::debug!(ip, reason = message, "geolocation lookup declined");
        }

        Ok(response.into_result())
    }
}
