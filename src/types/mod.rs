use thiserror::Error;

mod cursor;
mod domain_types;
mod keys;

pub use cursor::*;
pub use domain_types::*;
pub use keys::*;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Empty required field: {0}")]
    EmptyField(&'static str),

    #[error("Invalid access token format: {reason}")]
    InvalidAccessToken { reason: String },

    #[error("Invalid stage name '{name}': {reason}")]
    InvalidStageName { name: String, reason: String },

    #[error("Invalid record cap {0}: expected -1 (unlimited) or a non-negative count")]
    InvalidRecordCap(i64),

    #[error("Invalid timestamp '{value}': {reason}")]
    InvalidTimestamp { value: String, reason: String },

    #[error("Timestamp range is inverted: start {start} is after end {end}")]
    InvertedTimeRange { start: i64, end: i64 },

    #[error("Value out of bounds: {value}, expected {min}..={max}")]
    OutOfBounds { value: u64, min: u64, max: u64 },

    #[error("Invalid URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Stage '{0}' is declared more than once")]
    DuplicateStage(String),

    #[error("Stage '{stage}' depends on unknown stage '{parent}'")]
    UnknownParent { stage: String, parent: String },

    #[error("Stage '{0}' has a parent but no child key mapping")]
    MissingKeyMapping(String),

    #[error("Dependency cycle through stage '{0}'")]
    DependencyCycle(String),

    #[error("Unknown stage selected: {0}")]
    UnknownStage(String),
}
