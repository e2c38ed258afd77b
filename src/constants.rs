// src/constants.rs
//! Domain constants that define the operational boundaries of the system.
//!
//! Each constant is named for the domain concept it constrains. Reading them
//! tells you how the tap talks to HubSpot: how much it asks for per page,
//! how wide it fans out, and how patiently it waits when throttled.

use std::time::Duration;

// ---------------------------------------------------------------------------
// HubSpot API boundaries
// ---------------------------------------------------------------------------

/// Default API root when no `api_base_url` is configured.
pub const DEFAULT_API_BASE_URL: &str = "http://api.hubapi.com";

/// Paginated list of email campaigns.
pub const CAMPAIGNS_PATH: &str = "/email/public/v1/campaigns";

/// One campaign, addressed by id; requires `appId`.
pub const CAMPAIGN_DETAILS_PATH: &str = "/email/public/v1/campaigns/{campaign_id}";

/// Paginated email events; filtered by `campaignId` and `appId`.
pub const EVENTS_PATH: &str = "/email/public/v1/events";

/// Subscription status of one recipient address.
pub const SUBSCRIPTIONS_PATH: &str = "/email/public/v1/subscriptions/{recipient_email_id}";

/// How many records the email API returns per page.
///
/// 1000 is the documented maximum for the events and campaigns endpoints.
pub const HUBSPOT_PAGE_SIZE: u32 = 1000;

/// Response field that signals more pages exist.
pub const HAS_MORE_FIELD: &str = "hasMore";

/// Response field carrying the continuation token, echoed back as a query
/// parameter of the same name.
pub const OFFSET_FIELD: &str = "offset";

/// Error body category HubSpot attaches to throttled requests.
pub const RATE_LIMIT_CATEGORY: &str = "RATE_LIMITS";

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

/// Keys per batch for campaign-derived stages (events, campaign details).
pub const CAMPAIGN_FANOUT_BATCH_SIZE: usize = 50;

/// Keys per batch for the per-recipient subscription lookups.
pub const RECIPIENT_FANOUT_BATCH_SIZE: usize = 100;

/// Upper bound on any configured batch size.
pub const MAX_BATCH_SIZE: usize = 1000;

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Wait after a 429 for most endpoints.
pub const DEFAULT_RATE_LIMIT_DELAY: Duration = Duration::from_secs(1);

/// Wait after a 429 on the subscriptions endpoint, which has a much tighter
/// per-second budget than the campaign endpoints.
pub const SUBSCRIPTION_RATE_LIMIT_DELAY: Duration = Duration::from_secs(12);

/// Attempts allowed for connection errors, timeouts and 5xx responses.
pub const DEFAULT_TRANSIENT_ATTEMPTS: u32 = 4;

/// First delay after a transient failure; doubles per attempt.
pub const DEFAULT_TRANSIENT_BACKOFF: Duration = Duration::from_millis(500);

/// Ceiling for the transient backoff.
pub const DEFAULT_TRANSIENT_BACKOFF_CAP: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Error display
// ---------------------------------------------------------------------------

/// Maximum characters shown when previewing error response bodies.
pub const ERROR_BODY_PREVIEW_LENGTH: usize = 200;
