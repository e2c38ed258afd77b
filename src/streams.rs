// src/streams.rs
//! The HubSpot email stage catalog.
//!
//! ```text
//! email_campaigns
//! ├── email_campaign_details
//! └── email_events
//!     └── email_subscriptions
//! ```

use crate::api::{Endpoint, QueryFilters, RecordsLocation};
use crate::constants::{
    CAMPAIGNS_PATH, CAMPAIGN_DETAILS_PATH, CAMPAIGN_FANOUT_BATCH_SIZE, EVENTS_PATH,
    RECIPIENT_FANOUT_BATCH_SIZE, SUBSCRIPTIONS_PATH, SUBSCRIPTION_RATE_LIMIT_DELAY,
};
use crate::error_recovery::RetryPolicy;
use crate::stage::{KeyMapping, Stage, StageGraph};
use crate::types::{RecordCap, StageName, ValidationError};
use serde_json::{json, Map, Value};
use std::time::Duration;

pub const EMAIL_CAMPAIGNS: &str = "email_campaigns";
pub const EMAIL_CAMPAIGN_DETAILS: &str = "email_campaign_details";
pub const EMAIL_EVENTS: &str = "email_events";
pub const EMAIL_SUBSCRIPTIONS: &str = "email_subscriptions";

/// Settings that shape the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSettings {
    pub campaigns_limit: RecordCap,
    pub email_events_limit: RecordCap,
    pub event_filters: QueryFilters,
    /// Base retry policy; the subscriptions stage overrides its delay.
    pub retry: RetryPolicy,
    pub details_batch_size: usize,
    pub events_batch_size: usize,
    pub recipient_batch_size: usize,
    pub subscription_rate_limit_delay: Duration,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            campaigns_limit: RecordCap::Unlimited,
            email_events_limit: RecordCap::Unlimited,
            event_filters: QueryFilters::default(),
            retry: RetryPolicy::default(),
            details_batch_size: CAMPAIGN_FANOUT_BATCH_SIZE,
            events_batch_size: CAMPAIGN_FANOUT_BATCH_SIZE,
            recipient_batch_size: RECIPIENT_FANOUT_BATCH_SIZE,
            subscription_rate_limit_delay: SUBSCRIPTION_RATE_LIMIT_DELAY,
        }
    }
}

/// Builds the four-stage email catalog.
pub fn hubspot_catalog(settings: &CatalogSettings) -> Result<StageGraph, ValidationError> {
    let campaigns = StageName::new(EMAIL_CAMPAIGNS)?;
    let events = StageName::new(EMAIL_EVENTS)?;

    let stages = vec![
        Stage::root(
            campaigns.clone(),
            Endpoint::new(CAMPAIGNS_PATH, RecordsLocation::Field("campaigns")).paginated(),
        )
        .with_schema(campaign_schema())
        .with_key_properties(["id"])
        .with_cap(settings.campaigns_limit)
        .with_retry(settings.retry.clone()),
        Stage::child(
            StageName::new(EMAIL_CAMPAIGN_DETAILS)?,
            campaigns.clone(),
            campaign_key(),
            Endpoint::new(CAMPAIGN_DETAILS_PATH, RecordsLocation::Body)
                .with_key_query("appId", "app_id"),
        )
        .with_schema(campaign_details_schema())
        .with_key_properties(["id"])
        .with_batch_size(settings.details_batch_size)
        .with_retry(settings.retry.clone()),
        Stage::child(
            events.clone(),
            campaigns,
            campaign_key(),
            Endpoint::new(EVENTS_PATH, RecordsLocation::Field("events"))
                .paginated()
                .with_key_query("campaignId", "campaign_id")
                .with_key_query("appId", "app_id"),
        )
        .with_schema(event_schema())
        .with_key_properties(["id", "created"])
        .with_cap(settings.email_events_limit)
        .with_filters(settings.event_filters.clone())
        .with_batch_size(settings.events_batch_size)
        .with_retry(settings.retry.clone()),
        Stage::child(
            StageName::new(EMAIL_SUBSCRIPTIONS)?,
            events,
            KeyMapping::fields([("recipient_email_id", "recipient")]),
            Endpoint::new(SUBSCRIPTIONS_PATH, RecordsLocation::Body),
        )
        .with_schema(subscription_schema())
        .with_key_properties(["email"])
        .with_batch_size(settings.recipient_batch_size)
        .with_retry(
            settings
                .retry
                .clone()
                .with_rate_limit_delay(settings.subscription_rate_limit_delay),
        ),
    ];

    StageGraph::new(stages)
}

fn campaign_key() -> KeyMapping {
    KeyMapping::fields([("campaign_id", "id"), ("app_id", "appId")])
}

// --- Schemas ---

fn nullable(kind: &str) -> Value {
    json!({ "type": [kind, "null"] })
}

fn object(fields: &[(&str, Value)]) -> Value {
    let properties: Map<String, Value> = fields
        .iter()
        .map(|(name, schema)| (name.to_string(), schema.clone()))
        .collect();
    json!({ "type": ["object", "null"], "properties": properties })
}

fn integers(names: &[&'static str]) -> Vec<(&'static str, Value)> {
    names
        .iter()
        .map(|name| (*name, nullable("integer")))
        .collect()
}

const COUNTER_FIELDS: &[&str] = &[
    "processed",
    "deferred",
    "unsubscribed",
    "statuschange",
    "bounce",
    "mta_dropped",
    "dropped",
    "delivered",
    "sent",
    "click",
    "open",
];

const TIMESTAMP_FIELDS: &[&str] = &[
    "lastProcessingFinishedAt",
    "lastProcessingStartedAt",
    "lastProcessingStateChangeAt",
    "scheduledAt",
    "numIncluded",
];

fn campaign_schema() -> Value {
    object(&[
        ("id", nullable("integer")),
        ("groupId", nullable("integer")),
        ("lastUpdatedTime", nullable("integer")),
        ("appId", nullable("integer")),
        ("appName", nullable("string")),
    ])
}

fn campaign_details_schema() -> Value {
    let mut fields = vec![
        ("id", nullable("integer")),
        ("appId", nullable("integer")),
        ("appName", nullable("string")),
        ("contentId", nullable("integer")),
        ("subject", nullable("string")),
        ("name", nullable("string")),
        ("counters", object(&integers(COUNTER_FIELDS))),
    ];
    fields.extend(integers(TIMESTAMP_FIELDS));
    fields.push(("processingState", nullable("string")));
    fields.push(("type", nullable("string")));
    object(&fields)
}

fn event_schema() -> Value {
    object(&[
        ("appName", nullable("string")),
        ("response", nullable("string")),
        ("id", nullable("string")),
        ("created", nullable("integer")),
        ("attempt", nullable("integer")),
        ("type", nullable("string")),
        (
            "sentBy",
            object(&[("id", nullable("string")), ("created", nullable("integer"))]),
        ),
        ("smtpId", nullable("string")),
        ("portalId", nullable("integer")),
        ("recipient", nullable("string")),
        ("appId", nullable("integer")),
        ("emailCampaignId", nullable("integer")),
        ("emailCampaignGroupId", nullable("integer")),
    ])
}

fn subscription_schema() -> Value {
    let status = object(&[
        ("id", nullable("integer")),
        ("updatedAt", nullable("integer")),
        ("subscribed", nullable("boolean")),
        ("optState", nullable("string")),
    ]);
    object(&[
        ("subscribed", nullable("boolean")),
        ("markedAsSpam", nullable("boolean")),
        ("unsubscribeFromPortal", nullable("boolean")),
        ("portalId", nullable("integer")),
        ("bounced", nullable("boolean")),
        ("email", nullable("string")),
        (
            "subscriptionStatuses",
            json!({ "type": ["array", "null"], "items": status }),
        ),
        ("status", nullable("string")),
    ])
}
