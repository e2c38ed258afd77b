// src/api/types.rs
//! Type definitions for the HubSpot API module.
//!
//! An [`Endpoint`] describes where a stage's data lives; a [`QueryPlan`] is
//! that endpoint bound to one fetch key and the stage filters; a
//! [`PageRequest`] is one concrete request of the plan.

use crate::constants::{HUBSPOT_PAGE_SIZE, OFFSET_FIELD};
use crate::error::FetchError;
use crate::types::{Cursor, EpochMillis, FetchKey, Record, ValidatedUrl};
use indexmap::IndexMap;
use std::sync::Arc;
use url::Url;

/// Request headers supplied by the authentication provider.
pub type HeaderSet = IndexMap<String, String>;

// --- Endpoint description ---

/// Where the records of a response body live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordsLocation {
    /// An array under a top-level field, e.g. `{"events": [...]}`.
    Field(&'static str),
    /// The body itself: an object is one record, an array is many.
    Body,
}

/// Static description of one remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Path below the base URL; `{name}` segments are filled from the key.
    pub path_template: &'static str,
    /// `(query parameter, key parameter)` pairs appended from the key.
    pub key_query: Vec<(&'static str, &'static str)>,
    pub records: RecordsLocation,
    /// Whether responses carry `hasMore`/`offset`.
    pub paginated: bool,
}

impl Endpoint {
    pub fn new(path_template: &'static str, records: RecordsLocation) -> Self {
        Self {
            path_template,
            key_query: Vec::new(),
            records,
            paginated: false,
        }
    }

    pub fn paginated(self) -> Self {
        Self {
            paginated: true,
            ..self
        }
    }

    pub fn with_key_query(self, query_param: &'static str, key_param: &'static str) -> Self {
        let mut key_query = self.key_query;
        key_query.push((query_param, key_param));
        Self { key_query, ..self }
    }

    /// Fills `{name}` placeholders from the key.
    pub fn render_path(&self, key: &FetchKey) -> Result<String, FetchError> {
        let mut rendered = String::with_capacity(self.path_template.len() + 16);
        let mut rest = self.path_template;

        while let Some(open) = rest.find('{') {
            let close = rest[open..]
                .find('}')
                .map(|i| open + i)
                .ok_or_else(|| {
                    FetchError::fatal(format!("unterminated placeholder in {}", self.path_template))
                })?;
            let name = &rest[open + 1..close];
            let value = key.get(name).ok_or_else(|| {
                FetchError::fatal(format!("fetch key {} has no parameter '{}'", key, name))
            })?;
            rendered.push_str(&rest[..open]);
            rendered.push_str(&encode_path_segment(&value.to_string()));
            rest = &rest[close + 1..];
        }
        rendered.push_str(rest);
        Ok(rendered)
    }
}

/// Percent-encodes a value for use as a single path segment.
fn encode_path_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

// --- Query filters ---

/// Optional stage-level filters, each appended to the query only when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryFilters {
    pub start_timestamp: Option<EpochMillis>,
    pub end_timestamp: Option<EpochMillis>,
    pub event_type: Option<String>,
    pub exclude_filtered_events: Option<bool>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(start) = self.start_timestamp {
            pairs.push(("startTimestamp", start.to_string()));
        }
        if let Some(end) = self.end_timestamp {
            pairs.push(("endTimestamp", end.to_string()));
        }
        if let Some(event_type) = &self.event_type {
            pairs.push(("eventType", event_type.clone()));
        }
        if let Some(exclude) = self.exclude_filtered_events {
            pairs.push(("excludeFilteredEvents", exclude.to_string()));
        }
        pairs
    }
}

/// Everything besides the key that shapes a stage's queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub filters: QueryFilters,
    /// Incremental cursor field; requests ascending order on it.
    pub replication_key: Option<String>,
}

// --- Query plans and requests ---

/// One endpoint bound to one fetch key: the Paginator's start state.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    base: Url,
    paginated: bool,
}

impl QueryPlan {
    /// Builds the initial query for `key`.
    ///
    /// Fails fatally when the key lacks a parameter the endpoint needs.
    pub fn new(
        base_url: &ValidatedUrl,
        endpoint: &Endpoint,
        key: &FetchKey,
        options: &QueryOptions,
    ) -> Result<Self, FetchError> {
        let path = endpoint.render_path(key)?;
        let mut url = base_url.as_url().clone();
        let joined_path = format!("{}{}", url.path().trim_end_matches('/'), path);
        url.set_path(&joined_path);

        {
            let mut query = url.query_pairs_mut();
            for (query_param, key_param) in &endpoint.key_query {
                let value = key.get(key_param).ok_or_else(|| {
                    FetchError::fatal(format!("fetch key {} has no parameter '{}'", key, key_param))
                })?;
                query.append_pair(query_param, &value.to_string());
            }
            if endpoint.paginated {
                query.append_pair("limit", &HUBSPOT_PAGE_SIZE.to_string());
            }
            for (name, value) in options.filters.query_pairs() {
                query.append_pair(name, &value);
            }
            if let Some(field) = &options.replication_key {
                query.append_pair("sort", "asc");
                query.append_pair("order_by", field);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(Self {
            base: url,
            paginated: endpoint.paginated,
        })
    }

    pub fn is_paginated(&self) -> bool {
        self.paginated
    }

    /// The concrete request for the first page (`cursor == None`) or a later one.
    pub fn page_request(&self, cursor: Option<&Cursor>, headers: &Arc<HeaderSet>) -> PageRequest {
        let mut url = self.base.clone();
        if let Some(cursor) = cursor {
            url.query_pairs_mut()
                .append_pair(OFFSET_FIELD, &cursor.as_query_value());
        }
        PageRequest {
            url,
            headers: Arc::clone(headers),
        }
    }
}

/// A fully formed request: URL with query string, plus headers.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    pub url: Url,
    pub headers: Arc<HeaderSet>,
}

impl PageRequest {
    /// Value of a query parameter, if present.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

// --- Decoded pages ---

/// One decoded page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    pub has_more: bool,
    pub cursor: Option<Cursor>,
}

impl Page {
    /// A terminal page with the given records.
    pub fn last(records: Vec<Record>) -> Self {
        Self {
            records,
            has_more: false,
            cursor: None,
        }
    }
}
