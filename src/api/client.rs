// src/api/client.rs
//! Pure HTTP client wrapper for the HubSpot API.
//!
//! This module performs one GET per [`PageRequest`] and hands the raw
//! status, headers and body to the parser for classification. It knows
//! nothing about stages, keys or pagination.

use super::connection_pool::{PoolConfig, RequestStats};
use super::parser::{classify_response, parse_retry_after, RawResponse};
use super::types::PageRequest;
use super::PageFetcher;
use crate::error::{AppError, FetchError};
use reqwest::{header, Client};
use std::time::Instant;

/// A thin wrapper around reqwest Client for HubSpot API requests.
#[derive(Debug)]
pub struct HubSpotHttpClient {
    client: Client,
    stats: RequestStats,
}

impl HubSpotHttpClient {
    /// Creates a new HTTP client with the given pool settings.
    pub fn new(pool: &PoolConfig) -> Result<Self, AppError> {
        Ok(Self {
            client: pool.build_client()?,
            stats: RequestStats::new(),
        })
    }

    /// Request counters accumulated since construction.
    pub fn stats(&self) -> &RequestStats {
        &self.stats
    }

    /// Builds the reqwest request, attaching the provider's headers.
    fn build(&self, request: &PageRequest) -> Result<reqwest::Request, FetchError> {
        let mut builder = self.client.get(request.url.clone());
        for (name, value) in request.headers.iter() {
            let name = header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| FetchError::fatal(format!("invalid header name '{}': {}", name, e)))?;
            let value = header::HeaderValue::from_str(value)
                .map_err(|e| FetchError::fatal(format!("invalid value for header '{}': {}", name, e)))?;
            builder = builder.header(name, value);
        }
        builder
            .build()
            .map_err(|e| FetchError::fatal(format!("failed to build request: {}", e)))
    }
}

#[async_trait::async_trait]
impl PageFetcher for HubSpotHttpClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<serde_json::Value, FetchError> {
        let http_request = self.build(request)?;
        log::debug!("GET {}", request.url.path());

        let started = Instant::now();
        let response = match self.client.execute(http_request).await {
            Ok(response) => response,
            Err(e) => {
                self.stats.record_failure();
                return Err(FetchError::from_reqwest(&e));
            }
        };

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let url = response.url().path().to_string();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                self.stats.record_failure();
                return Err(FetchError::from_reqwest(&e));
            }
        };

        let result = classify_response(RawResponse {
            status,
            retry_after,
            body,
            url,
        });
        match &result {
            Ok(_) => self.stats.record_success(started.elapsed()),
            Err(FetchError::RateLimited { .. }) => self.stats.record_rate_limited(),
            Err(_) => self.stats.record_failure(),
        }
        log::debug!("{} -> HTTP {} in {:?}", request.url.path(), status, started.elapsed());
        result
    }
}
