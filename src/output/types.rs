// src/output/types.rs
//! Type definitions for output messages.

use serde::Serialize;
use serde_json::Value;

/// One line of Singer-style output.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum SingerMessage<'a> {
    Schema {
        stream: &'a str,
        schema: &'a Value,
        key_properties: &'a [String],
    },
    Record {
        stream: &'a str,
        record: &'a Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        time_extracted: Option<&'a str>,
    },
}

/// Counters kept by a sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStats {
    pub stages: usize,
    pub records: usize,
    pub bytes_written: usize,
}
