// src/lib.rs
//! hubspot-tap library: staged extraction of HubSpot email data.
//!
//! # Public API
//!
//! The library exposes types organized by concern:
//! - **Error handling**: `AppError`, `FetchError`, `ErrorClass`, `ValidationError`
//! - **Configuration**: `CommandLineInput`, `PipelineConfig`, `SettingsFile`
//! - **Domain types**: `FetchKey`, `Cursor`, `StageName`, `RecordCap`, etc.
//! - **API client**: `PageFetcher`, `HubSpotHttpClient`, `Paginator`, `Scheduler`
//! - **Stages**: `Stage`, `StageGraph`, `KeyMapping`, the HubSpot catalog
//! - **Pipeline**: `Pipeline`, `RecordSink`, `PipelineReport`, sinks

mod api;
mod config;
mod constants;
mod error;
mod error_recovery;
mod output;
mod pipeline;
mod propagation;
mod stage;
mod streams;
mod types;

// --- Error Handling ---
pub use crate::error::{AppError, ErrorClass, FetchError, Result};
pub use crate::types::ValidationError;

// --- Configuration ---
pub use crate::config::{
    CommandLineInput, PipelineConfig, SettingsFile, TimestampSetting, ACCESS_TOKEN_ENV,
};

// --- Domain Types ---
pub use crate::types::{
    AccessToken, Cursor, EpochMillis, FetchKey, KeyValue, Record, RecordCap, StageName,
    ValidatedUrl,
};

// --- API Client ---
pub use crate::api::{
    parser::{classify_response, decode_page, parse_retry_after, HubSpotErrorBody, RawResponse},
    AuthProvider, BearerTokenAuth, Endpoint, HeaderSet, HubSpotHttpClient, KeyOutcome, KeyRun,
    Page, PageFetcher, PageRequest, Paginator, PoolConfig, QueryFilters, QueryOptions, QueryPlan,
    RecordBudget, RecordsLocation, RequestStats, RequestStatsSnapshot, Scheduler,
};

// --- Retry ---
pub use crate::error_recovery::{retry_with_backoff, RateLimitState, RetryPolicy};

// --- Stages ---
pub use crate::propagation::{propagate_keys, PropagatedKeys};
pub use crate::stage::{KeyFn, KeyMapping, PlannedStage, Stage, StageGraph, StageOptions};
pub use crate::streams::{
    hubspot_catalog, CatalogSettings, EMAIL_CAMPAIGNS, EMAIL_CAMPAIGN_DETAILS, EMAIL_EVENTS,
    EMAIL_SUBSCRIPTIONS,
};

// --- Pipeline ---
pub use crate::output::{open_output, JsonLinesSink, MemorySink, OutputStats, SingerMessage};
pub use crate::pipeline::{KeyFailure, Pipeline, PipelineReport, RecordSink, StageReport};
