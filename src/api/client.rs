use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::api::pager::{PageOutcome, PageSource, RawRecord};
use crate::error::FetchError;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    records: Option<Vec<Value>>,
}

/// Blocking client for the museum object endpoint.
pub struct CatalogClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl CatalogClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Cheap liveness check: asks for a single record and expects HTTP 200.
    pub fn probe(&self) -> bool {
        let result = self
            .client
            .get(&self.base_url)
            .query(&[("apikey", self.api_key.as_str()), ("size", "1")])
            .timeout(PROBE_TIMEOUT)
            .send();

        match result {
            Ok(response) => {
                debug!("Probe answered {}", response.status());
                response.status() == StatusCode::OK
            }
            Err(e) => {
                warn!("Probe request failed: {}", e);
                false
            }
        }
    }
}

impl PageSource for CatalogClient {
    fn fetch_page(
        &self,
        classification: &str,
        page: u32,
        page_size: u32,
    ) -> Result<PageOutcome, FetchError> {
        let page = page.to_string();
        let size = page_size.to_string();

        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("apikey", self.api_key.as_str()),
                ("classification", classification),
                ("size", size.as_str()),
                ("page", page.as_str()),
            ])
            .send()
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::TOO_MANY_REQUESTS => return Ok(PageOutcome::RateLimited),
            other => return Err(FetchError::Status(other.as_u16())),
        }

        let body: PageBody = response
            .json()
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        // Missing or null `records` means the source has nothing more.
        let records: Vec<RawRecord> = body
            .records
            .unwrap_or_default()
            .into_iter()
            .filter_map(|value| match value {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();

        Ok(PageOutcome::Records(records))
    }
}
