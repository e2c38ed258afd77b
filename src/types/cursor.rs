// src/types/cursor.rs
//! Opaque pagination continuation tokens.

use std::fmt;

/// A continuation token returned by the API.
///
/// HubSpot's legacy email endpoints return `offset` either as a string
/// (events) or a number (campaigns). The token is echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Cursor {
    Text(String),
    Number(serde_json::Number),
}

impl Cursor {
    /// Reads a cursor from a response field.
    ///
    /// Null, missing, empty-string, and non-scalar values are all treated as
    /// "no cursor", which the paginator interprets as termination.
    pub fn from_json(value: Option<&serde_json::Value>) -> Option<Self> {
        match value? {
            serde_json::Value::String(s) if !s.is_empty() => Some(Self::Text(s.clone())),
            serde_json::Value::Number(n) => Some(Self::Number(n.clone())),
            _ => None,
        }
    }

    /// The value to place in the next request's query string.
    pub fn as_query_value(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_query_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_from_string_and_number() {
        assert_eq!(
            Cursor::from_json(Some(&json!("abc"))),
            Some(Cursor::Text("abc".to_string()))
        );
        let numeric = Cursor::from_json(Some(&json!(250))).unwrap();
        assert_eq!(numeric.as_query_value(), "250");
    }

    #[test]
    fn absent_or_null_cursor_is_none() {
        assert_eq!(Cursor::from_json(None), None);
        assert_eq!(Cursor::from_json(Some(&json!(null))), None);
        assert_eq!(Cursor::from_json(Some(&json!(""))), None);
        assert_eq!(Cursor::from_json(Some(&json!({"page": 2}))), None);
    }
}
