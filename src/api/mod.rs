// src/api/mod.rs
//! HubSpot API interaction: the ability to retrieve pages of records.
//!
//! Layers, leaves first: [`PageFetcher`] performs one request, the retry
//! controller in [`crate::error_recovery`] wraps it, [`Paginator`] threads
//! the offset cursor for one key, and [`Scheduler`] fans keys out in
//! bounded batches. Stage semantics live above this module.

pub mod auth;
mod budget;
pub mod client;
mod connection_pool;
mod pagination;
pub mod parser;
mod scheduler;
mod types;

use crate::error::FetchError;

/// The ability to perform one page request.
///
/// Implementations issue exactly one network call and classify the
/// outcome. Retrying, pagination and fan-out are layered on top, so a
/// test double only needs to answer single requests.
#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<serde_json::Value, FetchError>;
}

// Re-export the public interface
pub use auth::{AuthProvider, BearerTokenAuth};
pub use budget::RecordBudget;
pub use client::HubSpotHttpClient;
pub use connection_pool::{PoolConfig, RequestStats, RequestStatsSnapshot};
pub use pagination::{KeyRun, Paginator};
pub use scheduler::{KeyOutcome, Scheduler};
pub use types::{
    Endpoint, HeaderSet, Page, PageRequest, QueryFilters, QueryOptions, QueryPlan,
    RecordsLocation,
};
