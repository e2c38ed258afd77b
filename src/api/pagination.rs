// src/api/pagination.rs
//! Cursor pagination for one fetch key.
//!
//! A [`Paginator`] walks `Start → Fetching → Advancing → Done`. The only
//! terminal signals are a false `hasMore` flag, a missing cursor, or the
//! stage's record budget running out.

use super::budget::RecordBudget;
use super::parser::decode_page;
use super::types::{HeaderSet, QueryPlan, RecordsLocation};
use super::PageFetcher;
use crate::error::FetchError;
use crate::error_recovery::{retry_with_backoff, RateLimitState, RetryPolicy};
use crate::types::{Cursor, Record};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Records and bookkeeping from paginating one key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyRun {
    pub records: Vec<Record>,
    /// Page requests that completed (retries not counted).
    pub pages: u32,
    pub retries: RateLimitState,
}

enum PageState {
    Start,
    Fetching { cursor: Option<Cursor> },
    Advancing { has_more: bool, cursor: Option<Cursor> },
    Done,
}

/// Drives repeated page fetches for one stage; shared by every key task.
pub struct Paginator<'a> {
    fetcher: &'a dyn PageFetcher,
    headers: Arc<HeaderSet>,
    policy: &'a RetryPolicy,
    budget: &'a RecordBudget,
    records_at: &'a RecordsLocation,
    cancel: &'a CancellationToken,
}

impl<'a> Paginator<'a> {
    pub fn new(
        fetcher: &'a dyn PageFetcher,
        headers: Arc<HeaderSet>,
        policy: &'a RetryPolicy,
        budget: &'a RecordBudget,
        records_at: &'a RecordsLocation,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            headers,
            policy,
            budget,
            records_at,
            cancel,
        }
    }

    /// Fetches every page of `plan`, stopping early when the budget runs out.
    pub async fn run(&self, plan: &QueryPlan, label: &str) -> Result<KeyRun, FetchError> {
        let mut run = KeyRun::default();
        let mut state = PageState::Start;

        loop {
            state = match state {
                PageState::Start => PageState::Fetching { cursor: None },

                PageState::Fetching { cursor } => {
                    let request = plan.page_request(cursor.as_ref(), &self.headers);
                    let (body, retries) = retry_with_backoff(
                        || self.fetcher.fetch_page(&request),
                        self.policy,
                        self.cancel,
                        label,
                    )
                    .await?;
                    run.retries.absorb(&retries);
                    run.pages += 1;

                    let mut page = decode_page(body, self.records_at, plan.is_paginated())?;
                    let fetched = page.records.len();
                    let granted = self.budget.reserve(fetched);
                    if granted < fetched {
                        log::debug!(
                            "{}: record cap reached, keeping {} of {} records from page {}",
                            label,
                            granted,
                            fetched,
                            run.pages
                        );
                        page.records.truncate(granted);
                    }
                    run.records.append(&mut page.records);

                    PageState::Advancing {
                        has_more: page.has_more,
                        cursor: page.cursor,
                    }
                }

                PageState::Advancing { has_more, cursor } => {
                    if self.budget.is_exhausted() {
                        if has_more {
                            self.budget.mark_truncated();
                        }
                        PageState::Done
                    } else if !has_more {
                        PageState::Done
                    } else if let Some(cursor) = cursor {
                        PageState::Fetching {
                            cursor: Some(cursor),
                        }
                    } else {
                        log::warn!(
                            "{}: response reports more pages but carries no offset; stopping after page {}",
                            label,
                            run.pages
                        );
                        PageState::Done
                    }
                }

                PageState::Done => {
                    log::debug!(
                        "{}: {} records in {} pages",
                        label,
                        run.records.len(),
                        run.pages
                    );
                    return Ok(run);
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{Endpoint, PageRequest, QueryOptions};
    use crate::types::{FetchKey, RecordCap, ValidatedUrl};
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;

    /// Replays scripted bodies in order and logs each request URL.
    struct Scripted {
        bodies: Mutex<VecDeque<Result<Value, FetchError>>>,
        requests: Mutex<Vec<PageRequest>>,
    }

    impl Scripted {
        fn new(bodies: Vec<Result<Value, FetchError>>) -> Self {
            Self {
                bodies: Mutex::new(bodies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl PageFetcher for Scripted {
        async fn fetch_page(&self, request: &PageRequest) -> Result<Value, FetchError> {
            self.requests.lock().push(request.clone());
            self.bodies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(FetchError::fatal("script exhausted")))
        }
    }

    fn plan() -> QueryPlan {
        let endpoint = Endpoint::new("/email/public/v1/events", RecordsLocation::Field("events")).paginated();
        QueryPlan::new(
            &ValidatedUrl::parse("http://api.hubapi.com").unwrap(),
            &endpoint,
            &FetchKey::root(),
            &QueryOptions::default(),
        )
        .unwrap()
    }

    fn page(ids: &[i64], has_more: bool, offset: Option<&str>) -> Result<Value, FetchError> {
        let events: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        let mut body = json!({ "events": events, "hasMore": has_more });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        Ok(body)
    }

    async fn paginate(fetcher: &Scripted, cap: RecordCap) -> (Result<KeyRun, FetchError>, RecordBudget) {
        let policy = RetryPolicy::default();
        let budget = RecordBudget::new(cap);
        let records_at = RecordsLocation::Field("events");
        let cancel = CancellationToken::new();
        let paginator = Paginator::new(
            fetcher,
            Arc::new(HeaderSet::new()),
            &policy,
            &budget,
            &records_at,
            &cancel,
        );
        let result = paginator.run(&plan(), "email_events").await;
        (result, budget)
    }

    #[tokio::test]
    async fn follows_offsets_until_has_more_is_false() {
        let fetcher = Scripted::new(vec![
            page(&[1, 2], true, Some("a")),
            page(&[3], true, Some("b")),
            page(&[4], false, None),
        ]);
        let (run, _) = paginate(&fetcher, RecordCap::Unlimited).await;
        let run = run.unwrap();

        assert_eq!(run.pages, 3);
        assert_eq!(run.records.len(), 4);
        let offsets: Vec<Option<String>> = fetcher
            .requests
            .lock()
            .iter()
            .map(|r| r.query_param("offset"))
            .collect();
        assert_eq!(offsets, vec![None, Some("a".to_string()), Some("b".to_string())]);
    }

    #[tokio::test]
    async fn missing_offset_terminates() {
        let fetcher = Scripted::new(vec![page(&[1], true, None), page(&[2], false, None)]);
        let (run, _) = paginate(&fetcher, RecordCap::Unlimited).await;
        assert_eq!(run.unwrap().pages, 1);
        assert_eq!(fetcher.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn cap_truncates_and_stops() {
        let fetcher = Scripted::new(vec![
            page(&[1, 2, 3], true, Some("a")),
            page(&[4, 5, 6], true, Some("b")),
            page(&[7], false, None),
        ]);
        let (run, budget) = paginate(&fetcher, RecordCap::AtMost(4)).await;
        let run = run.unwrap();

        assert_eq!(run.records.len(), 4);
        assert_eq!(run.pages, 2);
        assert!(budget.was_truncated());
    }

    #[tokio::test]
    async fn fatal_page_fails_the_key() {
        let fetcher = Scripted::new(vec![
            page(&[1], true, Some("a")),
            Err(FetchError::from_status(404, "gone")),
        ]);
        let (run, _) = paginate(&fetcher, RecordCap::Unlimited).await;
        assert!(matches!(run, Err(FetchError::Fatal { status: Some(404), .. })));
    }
}
