// src/api/parser.rs
//! Response decoding and classification.
//!
//! These functions are pure: they take a status, headers and body text and
//! decide what the response means. The HTTP client only moves bytes.

use super::types::{Page, RecordsLocation};
use crate::constants::{
    ERROR_BODY_PREVIEW_LENGTH, HAS_MORE_FIELD, OFFSET_FIELD, RATE_LIMIT_CATEGORY,
};
use crate::error::FetchError;
use crate::types::Cursor;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Error body returned by the HubSpot API.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HubSpotErrorBody {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl HubSpotErrorBody {
    fn is_rate_limit(&self) -> bool {
        self.category.as_deref() == Some(RATE_LIMIT_CATEGORY)
    }
}

/// Raw response as received from the wire.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub body: String,
    pub url: String,
}

/// Classifies a raw response and decodes its JSON body.
///
/// 2xx with valid JSON → `Ok(body)`; 429 or a `RATE_LIMITS` error body →
/// `RateLimited`; 408/5xx → `Transient`; anything else, including a 2xx
/// whose body is not JSON → `Fatal`.
pub fn classify_response(response: RawResponse) -> Result<Value, FetchError> {
    if (200..300).contains(&response.status) {
        return serde_json::from_str(&response.body).map_err(|e| {
            log::error!("Failed to parse response from {}: {}", response.url, e);
            FetchError::Fatal {
                status: Some(response.status),
                message: format!("malformed body ({}): {}", e, preview(&response.body)),
            }
        });
    }

    let error_body = serde_json::from_str::<HubSpotErrorBody>(&response.body).ok();
    let rate_limited = response.status == 429
        || error_body.as_ref().is_some_and(HubSpotErrorBody::is_rate_limit);

    if rate_limited {
        return Err(FetchError::RateLimited {
            status: response.status,
            retry_after: response.retry_after,
        });
    }

    let message = error_body
        .and_then(|b| b.message)
        .unwrap_or_else(|| preview(&response.body));
    Err(FetchError::from_status(response.status, message))
}

/// Parses a `Retry-After` header given in seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Splits a decoded body into records and pagination signals.
///
/// A missing records field yields an empty page; a records field that is
/// not an array is a fatal decoding error.
pub fn decode_page(
    body: Value,
    location: &RecordsLocation,
    paginated: bool,
) -> Result<Page, FetchError> {
    let (has_more, cursor) = if paginated {
        let has_more = body
            .get(HAS_MORE_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        (has_more, Cursor::from_json(body.get(OFFSET_FIELD)))
    } else {
        (false, None)
    };

    let records = match location {
        RecordsLocation::Field(field) => match body {
            Value::Object(mut map) => match map.remove(*field) {
                Some(Value::Array(items)) => items,
                Some(Value::Null) | None => Vec::new(),
                Some(other) => {
                    return Err(FetchError::fatal(format!(
                        "expected '{}' to be an array, found {}",
                        field,
                        json_type_name(&other)
                    )))
                }
            },
            other => {
                return Err(FetchError::fatal(format!(
                    "expected an object containing '{}', found {}",
                    field,
                    json_type_name(&other)
                )))
            }
        },
        RecordsLocation::Body => match body {
            Value::Array(items) => items,
            Value::Object(_) => vec![body],
            Value::Null => Vec::new(),
            other => {
                return Err(FetchError::fatal(format!(
                    "expected a record object, found {}",
                    json_type_name(&other)
                )))
            }
        },
    };

    Ok(Page {
        records,
        has_more,
        cursor,
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn preview(body: &str) -> String {
    if body.chars().count() > ERROR_BODY_PREVIEW_LENGTH {
        let cut: String = body.chars().take(ERROR_BODY_PREVIEW_LENGTH).collect();
        format!("{}...", cut)
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use serde_json::json;

    fn raw(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            retry_after: None,
            body: body.to_string(),
            url: "http://test/".to_string(),
        }
    }

    #[test]
    fn success_body_is_decoded() {
        let body = classify_response(raw(200, r#"{"hasMore":false}"#)).unwrap();
        assert_eq!(body, json!({"hasMore": false}));
    }

    #[test]
    fn malformed_success_body_is_fatal() {
        let err = classify_response(raw(200, "<html>")).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn status_429_carries_retry_after() {
        let mut response = raw(429, "");
        response.retry_after = Some(Duration::from_secs(3));
        assert_eq!(
            classify_response(response).unwrap_err(),
            FetchError::RateLimited {
                status: 429,
                retry_after: Some(Duration::from_secs(3))
            }
        );
    }

    #[test]
    fn rate_limit_category_is_rate_limited_on_any_status() {
        let body = r#"{"status":"error","message":"You have reached your secondly limit.","category":"RATE_LIMITS"}"#;
        let err = classify_response(raw(403, body)).unwrap_err();
        assert_eq!(err.class(), ErrorClass::RateLimited);
    }

    #[test]
    fn error_message_is_taken_from_body() {
        let body = r#"{"status":"error","message":"Campaign not found","category":"OBJECT_NOT_FOUND"}"#;
        let err = classify_response(raw(404, body)).unwrap_err();
        assert_eq!(err.to_string(), "HTTP 404: Campaign not found");
    }

    #[test]
    fn server_errors_are_transient() {
        let err = classify_response(raw(502, "bad gateway")).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn decode_field_page_with_cursor() {
        let body = json!({"events": [{"id": "a"}, {"id": "b"}], "hasMore": true, "offset": "xyz"});
        let page = decode_page(body, &RecordsLocation::Field("events"), true).unwrap();
        assert_eq!(page.records.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.cursor, Some(Cursor::Text("xyz".to_string())));
    }

    #[test]
    fn decode_missing_field_is_empty_page() {
        let page = decode_page(json!({"hasMore": false}), &RecordsLocation::Field("events"), true).unwrap();
        assert!(page.records.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn decode_non_array_field_is_fatal() {
        let err = decode_page(json!({"events": 3}), &RecordsLocation::Field("events"), true).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn decode_body_object_is_single_record_without_pagination() {
        let body = json!({"id": 1, "hasMore": true, "offset": 5});
        let page = decode_page(body.clone(), &RecordsLocation::Body, false).unwrap();
        assert_eq!(page.records, vec![body]);
        assert!(!page.has_more);
        assert_eq!(page.cursor, None);
    }

    #[test]
    fn retry_after_parses_seconds_only() {
        assert_eq!(parse_retry_after(" 7 "), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
    }
}
