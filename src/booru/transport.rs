//! Shared HTTP transport with connection pooling.
//!
//! One `reqwest` client serves every adapter and the media fetcher; the
//! pool settings come from `[http]` config. Sites behind anti-bot
//! filtering get a browser-like User-Agent per request instead of the
//! default client identity.

use std::time::Duration;

use reqwest::{Client, header};

use crate::booru::adapter::{AdapterError, AdapterResult};
use crate::booru::config::HttpConfig;

const HTML_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Injected HTTP handle. Constructed once at startup and cloned wherever a
/// transport is needed; `reqwest::Client` is internally pooled.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    browser_user_agent: String,
}

impl HttpTransport {
    /// Build the pooled client from config.
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            browser_user_agent: config.browser_user_agent.clone(),
        })
    }

    /// Raw client for adapters that build their own requests.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// GET a text body. Non-2xx statuses become [`AdapterError::Http`] so
    /// the fallback orchestrator can classify them.
    pub async fn get_text(&self, url: &str, browser_like: bool) -> AdapterResult<String> {
        let mut request = self.client.get(url);
        if browser_like {
            request = request
                .header(header::USER_AGENT, self.browser_user_agent.as_str())
                .header(header::ACCEPT, HTML_ACCEPT);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AdapterError::Http {
                status: status.as_u16(),
            });
        }

        Ok(response.text().await?)
    }
}
