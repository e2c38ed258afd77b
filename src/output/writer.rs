// src/output/writer.rs
//! JSON-lines sink: the only place record output touches I/O.

use super::types::{OutputStats, SingerMessage};
use crate::error::AppError;
use crate::pipeline::RecordSink;
use crate::stage::Stage;
use crate::types::{Record, StageName};
use chrono::{SecondsFormat, Utc};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Writes one SCHEMA line per stage and one RECORD line per record.
pub struct JsonLinesSink<W: Write> {
    out: W,
    stats: OutputStats,
    stamp_records: bool,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            stats: OutputStats::default(),
            stamp_records: true,
        }
    }

    /// Omits `time_extracted`, giving byte-stable output.
    pub fn without_timestamps(self) -> Self {
        Self {
            stamp_records: false,
            ..self
        }
    }

    pub fn stats(&self) -> OutputStats {
        self.stats
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_line(&mut self, message: &SingerMessage<'_>) -> Result<(), AppError> {
        let line = serde_json::to_string(message)
            .map_err(|e| AppError::Sink(format!("failed to serialize message: {}", e)))?;
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.stats.bytes_written += line.len() + 1;
        Ok(())
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn begin_stage(&mut self, stage: &Stage) -> Result<(), AppError> {
        self.write_line(&SingerMessage::Schema {
            stream: stage.name.as_str(),
            schema: &stage.schema,
            key_properties: &stage.key_properties,
        })?;
        self.stats.stages += 1;
        Ok(())
    }

    fn emit(&mut self, stage: &StageName, records: &[Record]) -> Result<(), AppError> {
        let extracted = self
            .stamp_records
            .then(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        for record in records {
            self.write_line(&SingerMessage::Record {
                stream: stage.as_str(),
                record,
                time_extracted: extracted.as_deref(),
            })?;
        }
        self.stats.records += records.len();
        log::debug!("Wrote {} {} records", records.len(), stage);
        Ok(())
    }

    fn finish(&mut self) -> Result<(), AppError> {
        self.out.flush()?;
        log::debug!(
            "Output flushed: {} stages, {} records, {} bytes",
            self.stats.stages,
            self.stats.records,
            self.stats.bytes_written
        );
        Ok(())
    }
}

/// Opens the record destination: a file when `path` is given, else stdout.
///
/// Parent directories of the file are created as needed.
pub fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, AppError> {
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            log::info!("Writing records to {}", path.display());
            Ok(Box::new(BufWriter::new(fs::File::create(path)?)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout()))),
    }
}
