// src/output/mod.rs
//! Record output.
//!
//! Sinks receive each emitted stage's records from the pipeline; formatting
//! and I/O stay here.

mod memory;
mod types;
mod writer;

// Re-export the public interface
pub use memory::MemorySink;
pub use types::{OutputStats, SingerMessage};
pub use writer::{open_output, JsonLinesSink};
