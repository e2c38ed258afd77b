// tests/common/mod.rs
//! Shared test doubles: a scripted page fetcher and pipeline builders.

#![allow(dead_code)]

use hubspot_tap::{
    Endpoint, FetchError, FetchKey, HeaderSet, KeyMapping, PageFetcher, PageRequest, Pipeline,
    RecordsLocation, RetryPolicy, Stage, StageGraph, StageName, ValidatedUrl,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const BASE_URL: &str = "http://stub.hubapi.test";

/// What the stub answers for one request.
pub struct Reply {
    pub result: Result<Value, FetchError>,
    pub delay: Duration,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self {
            result: Ok(body),
            delay: Duration::ZERO,
        }
    }

    pub fn err(error: FetchError) -> Self {
        Self {
            result: Err(error),
            delay: Duration::ZERO,
        }
    }

    pub fn rate_limited() -> Self {
        Self::err(FetchError::RateLimited {
            status: 429,
            retry_after: None,
        })
    }

    pub fn after(self, delay: Duration) -> Self {
        Self { delay, ..self }
    }
}

type Responder = Box<dyn Fn(&PageRequest, usize) -> Reply + Send + Sync>;

/// A [`PageFetcher`] answering from a closure.
///
/// The closure receives the request and how many times that exact URL was
/// requested before. Every call is logged, along with start/end events for
/// checking batch boundaries.
pub struct StubFetcher {
    responder: Responder,
    calls: Mutex<Vec<PageRequest>>,
    seen: Mutex<HashMap<String, usize>>,
    events: Mutex<Vec<String>>,
}

impl StubFetcher {
    pub fn new(responder: impl Fn(&PageRequest, usize) -> Reply + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            seen: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<PageRequest> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Requests whose path starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> Vec<PageRequest> {
        self.calls
            .lock()
            .iter()
            .filter(|r| r.url.path().starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait::async_trait]
impl PageFetcher for StubFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Value, FetchError> {
        let url = request.url.to_string();
        let previous = {
            let mut seen = self.seen.lock();
            let count = seen.entry(url.clone()).or_insert(0);
            let previous = *count;
            *count += 1;
            previous
        };
        self.calls.lock().push(request.clone());
        self.events.lock().push(format!("start {}", request.url.path()));

        let reply = (self.responder)(request, previous);
        if !reply.delay.is_zero() {
            tokio::time::sleep(reply.delay).await;
        }

        self.events.lock().push(format!("end {}", request.url.path()));
        reply.result
    }
}

/// Retry policy with millisecond waits.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        rate_limit_delay: Duration::from_millis(5),
        max_rate_limit_retries: None,
        transient_attempts: 3,
        transient_backoff: Duration::from_millis(1),
        transient_backoff_cap: Duration::from_millis(4),
        jitter: Duration::ZERO,
    }
}

pub fn name(s: &str) -> StageName {
    StageName::new(s).unwrap()
}

/// A paginated root stage at `/parents` with records under `items`.
pub fn parent_stage() -> Stage {
    Stage::root(
        name("parents"),
        Endpoint::new("/parents", RecordsLocation::Field("items")).paginated(),
    )
    .with_key_properties(["id"])
    .with_retry(fast_retry())
}

/// A one-record-per-key child of `parents` at `/children/{parent_id}`.
pub fn child_stage() -> Stage {
    Stage::child(
        name("children"),
        name("parents"),
        KeyMapping::fields([("parent_id", "id")]),
        Endpoint::new("/children/{parent_id}", RecordsLocation::Body),
    )
    .with_key_properties(["parent_id"])
    .with_retry(fast_retry())
}

pub fn pipeline(stages: Vec<Stage>, fetcher: Arc<StubFetcher>) -> Pipeline {
    let mut headers = HeaderSet::new();
    headers.insert("Authorization".to_string(), "Bearer test-token".to_string());
    Pipeline::new(
        StageGraph::new(stages).unwrap(),
        ValidatedUrl::parse(BASE_URL).unwrap(),
        fetcher,
        Arc::new(headers),
    )
}

/// `{"items": [...ids], "hasMore": .., "offset": ..}`
pub fn items_page(ids: &[i64], has_more: bool, offset: Option<&str>) -> Value {
    let items: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
    let mut body = json!({ "items": items, "hasMore": has_more });
    if let Some(offset) = offset {
        body["offset"] = json!(offset);
    }
    body
}

/// The last path segment of a request, parsed as an integer id.
pub fn path_id(request: &PageRequest) -> i64 {
    request
        .url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|s| s.parse().ok())
        .unwrap_or(-1)
}

pub fn ids(records: &[Value], field: &str) -> Vec<i64> {
    records.iter().filter_map(|r| r[field].as_i64()).collect()
}

pub fn key(pairs: &[(&str, i64)]) -> FetchKey {
    FetchKey::from_pairs(pairs.iter().map(|(k, v)| (*k, *v)))
}
