// src/output/memory.rs
//! In-memory sink for tests and embedding.

use crate::error::AppError;
use crate::pipeline::RecordSink;
use crate::stage::Stage;
use crate::types::{Record, StageName};
use indexmap::IndexMap;

/// Collects emitted records per stage, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    stages: IndexMap<StageName, Vec<Record>>,
    finished: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self, stage: &str) -> &[Record] {
        self.stages
            .iter()
            .find(|(name, _)| name.as_str() == stage)
            .map(|(_, records)| records.as_slice())
            .unwrap_or(&[])
    }

    /// Emitted stage names in order.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.keys().map(StageName::as_str).collect()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl RecordSink for MemorySink {
    fn begin_stage(&mut self, stage: &Stage) -> Result<(), AppError> {
        self.stages.entry(stage.name.clone()).or_default();
        Ok(())
    }

    fn emit(&mut self, stage: &StageName, records: &[Record]) -> Result<(), AppError> {
        self.stages
            .entry(stage.clone())
            .or_default()
            .extend_from_slice(records);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), AppError> {
        self.finished = true;
        Ok(())
    }
}
