//! HTTP fetcher backed by `reqwest`

use async_trait::async_trait;
use kiosk_core_interface::{FetchOptions, FetchResponse, Fetcher, InterfaceError, Result};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use std::time::Duration;

/// GET-only HTTP client for the refresh engine.
///
/// Requests with `no_store` carry `Cache-Control: no-store` and
/// `Pragma: no-cache` so intermediaries never answer from cache.
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("kiosk-display/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| InterfaceError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (shared connection pool, custom TLS)
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn map_error(err: reqwest::Error, timeout: Duration) -> InterfaceError {
    if err.is_timeout() {
        InterfaceError::Timeout(timeout)
    } else {
        InterfaceError::Network(err.to_string())
    }
}

#[async_trait]
impl Fetcher for ReqwestFetcher {
    async fn get(&self, url: &str, options: FetchOptions) -> Result<FetchResponse> {
        let timeout = options.timeout;
        let mut request = self.client.get(url).timeout(timeout);
        if options.no_store {
            request = request
                .header(CACHE_CONTROL, "no-store")
                .header(PRAGMA, "no-cache");
        }

        let exchange = async {
            let response = request.send().await.map_err(|e| map_error(e, timeout))?;
            let status = response.status().as_u16();
            let body = response.text().await.map_err(|e| map_error(e, timeout))?;
            Ok(FetchResponse::new(status, body))
        };

        tokio::select! {
            biased;
            _ = options.cancel.cancelled() => Err(InterfaceError::Aborted),
            result = exchange => result,
        }
    }
}
