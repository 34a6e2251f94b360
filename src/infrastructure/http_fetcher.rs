//! HTTP content fetcher
//!
//! Plain GET per `(date, selector)`. The fetcher makes exactly one request
//! per call and only classifies the outcome; retries belong to the
//! [`RetryDriver`](crate::infrastructure::retry_driver::RetryDriver).

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::domain::errors::{FetchError, PanelError, PanelResult};
use crate::domain::services::{ContentFetcher, RawPayload};
use crate::infrastructure::config::{check_date_format, SourceConfig};

/// Configuration for HTTP fetcher behavior
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    pub base_url: String,
    /// URL with `{base_url}`, `{selector}` and `{date}` placeholders
    pub url_template: String,
    /// chrono format for `{date}`
    pub date_format: String,
    pub timeout_seconds: u64,
    pub user_agent: String,
}

impl HttpFetcherConfig {
    pub fn from_source_config(source: &SourceConfig) -> Self {
        Self {
            base_url: source.base_url.clone(),
            url_template: source.url_template.clone(),
            date_format: source.date_format.clone(),
            timeout_seconds: source.request_timeout_seconds,
            user_agent: source.user_agent.clone(),
        }
    }
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self::from_source_config(&SourceConfig::default())
    }
}

/// Map an HTTP status to the fetch outcome class.
pub fn classify_status(status: StatusCode, url: &str) -> Option<FetchError> {
    if status.is_success() {
        None
    } else if status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        Some(FetchError::Transient(format!("HTTP {status} from {url}")))
    } else {
        // 404/410 and every other client error mean the page is not there
        Some(FetchError::NotFound(format!("HTTP {status} from {url}")))
    }
}

fn classify_request_error(e: &reqwest::Error, url: &str) -> FetchError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        FetchError::Transient(format!("request to {url} failed: {e}"))
    } else if let Some(status) = e.status() {
        classify_status(status, url)
            .unwrap_or_else(|| FetchError::Transient(format!("request to {url} failed: {e}")))
    } else {
        FetchError::Transient(format!("request to {url} failed: {e}"))
    }
}

pub struct HttpContentFetcher {
    client: Client,
    config: HttpFetcherConfig,
}

impl HttpContentFetcher {
    pub fn new(config: HttpFetcherConfig) -> PanelResult<Self> {
        check_date_format(&config.date_format)?;
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(&config.user_agent)
            .cookie_store(true)
            .gzip(true)
            .build()
            .map_err(|e| PanelError::configuration(format!("Failed to create HTTP client: {e}")))?;

        info!("🌐 HTTP fetcher ready for {}", config.base_url);
        Ok(Self { client, config })
    }

    pub fn from_source_config(source: &SourceConfig) -> PanelResult<Self> {
        Self::new(HttpFetcherConfig::from_source_config(source))
    }

    /// URL of the page for `(date, selector)`.
    pub fn build_url(&self, date: NaiveDate, selector: &str) -> String {
        self.config
            .url_template
            .replace("{base_url}", self.config.base_url.trim_end_matches('/'))
            .replace("{selector}", selector)
            .replace("{date}", &date.format(&self.config.date_format).to_string())
    }
}

#[async_trait]
impl ContentFetcher for HttpContentFetcher {
    async fn fetch(&self, date: NaiveDate, selector: &str) -> Result<RawPayload, FetchError> {
        let url = self.build_url(date, selector);
        debug!("🌐 HTTP GET: {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_request_error(&e, &url))?;

        if let Some(err) = classify_status(response.status(), &url) {
            error!("❌ HTTP error {}: {}", response.status(), url);
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_request_error(&e, &url))?;
        Ok(RawPayload::new(body))
    }
}
