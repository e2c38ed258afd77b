// src/pipeline.rs
//! Pipeline coordinator: runs stages parents-first and hands their records
//! to a sink.
//!
//! Inter-stage state lives in a [`RunContext`] owned by one call to
//! [`Pipeline::run`]; nothing survives the run.

use crate::api::{
    AuthProvider, KeyOutcome, KeyRun, PageFetcher, Paginator, QueryPlan, RecordBudget, Scheduler,
};
use crate::error::{AppError, ErrorClass, FetchError};
use crate::error_recovery::RateLimitState;
use crate::propagation::propagate_keys;
use crate::stage::{Stage, StageGraph};
use crate::types::{FetchKey, Record, StageName, ValidatedUrl};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Receives the records of each emitted stage, in stage order.
pub trait RecordSink {
    /// Called once per emitted stage before its records.
    fn begin_stage(&mut self, stage: &Stage) -> Result<(), AppError>;
    fn emit(&mut self, stage: &StageName, records: &[Record]) -> Result<(), AppError>;
    /// Flushes buffered output. Called at the end of every run, failed or not.
    fn finish(&mut self) -> Result<(), AppError>;
}

// --- Run reports ---

/// A key that was abandoned.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFailure {
    pub key: FetchKey,
    pub class: ErrorClass,
    pub message: String,
}

/// What one stage execution did.
#[derive(Debug, Clone, PartialEq)]
pub struct StageReport {
    pub stage: StageName,
    /// False for ancestors run only to derive keys.
    pub emitted: bool,
    pub keys_scheduled: usize,
    pub failures: Vec<KeyFailure>,
    pub records: usize,
    pub pages: u32,
    pub retries: RateLimitState,
    /// Whether the record cap cut the stage short.
    pub truncated: bool,
    /// Highest replication-key value seen.
    pub bookmark: Option<Value>,
    pub elapsed: Duration,
}

impl StageReport {
    pub fn keys_failed(&self) -> usize {
        self.failures.len()
    }

    /// A stage fails when it had keys and none of them succeeded.
    pub fn is_failed(&self) -> bool {
        self.keys_scheduled > 0 && self.failures.len() == self.keys_scheduled
    }
}

/// Per-stage reports of a completed run, in execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    pub stages: Vec<StageReport>,
}

impl PipelineReport {
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage.as_str() == name)
    }

    /// Records sent to the sink.
    pub fn total_emitted(&self) -> usize {
        self.stages
            .iter()
            .filter(|s| s.emitted)
            .map(|s| s.records)
            .sum()
    }

    pub fn log_summary(&self) {
        for stage in &self.stages {
            log::info!(
                "{}: {} records from {} keys ({} failed), {} pages, {} retries{}{}{}",
                stage.stage,
                stage.records,
                stage.keys_scheduled,
                stage.keys_failed(),
                stage.pages,
                stage.retries.total_retries(),
                if stage.truncated { ", truncated by cap" } else { "" },
                if stage.emitted { "" } else { ", not emitted" },
                stage
                    .bookmark
                    .as_ref()
                    .map(|b| format!(", bookmark {}", b))
                    .unwrap_or_default()
            );
        }
        log::info!("Run complete: {} records emitted", self.total_emitted());
    }
}

// --- Run context ---

/// Fetch keys waiting for their stage, keyed by stage name.
#[derive(Debug, Default)]
struct RunContext {
    pending: HashMap<StageName, Vec<FetchKey>>,
}

impl RunContext {
    fn seed(&mut self, stage: StageName, keys: Vec<FetchKey>) {
        self.pending.insert(stage, keys);
    }

    fn take_keys(&mut self, stage: &StageName) -> Vec<FetchKey> {
        self.pending.remove(stage).unwrap_or_default()
    }
}

struct StageRun {
    records: Vec<Record>,
    report: StageReport,
}

impl StageRun {
    /// The error that failed the stage, if every key failed.
    fn failure(&self) -> Option<AppError> {
        if !self.report.is_failed() {
            return None;
        }
        let failures = &self.report.failures;
        if failures.iter().all(|f| f.class == ErrorClass::Cancelled) {
            return Some(AppError::Cancelled);
        }
        failures
            .iter()
            .find(|f| f.class != ErrorClass::Cancelled)
            .map(|first| AppError::StageFailed {
                stage: self.report.stage.to_string(),
                class: first.class,
                message: format!("{} (key {})", first.message, first.key),
            })
    }
}

// --- Coordinator ---

/// Sequences stages and moves records between them.
pub struct Pipeline {
    graph: StageGraph,
    base_url: ValidatedUrl,
    fetcher: Arc<dyn PageFetcher>,
    auth: Arc<dyn AuthProvider>,
    selection: Vec<StageName>,
}

impl Pipeline {
    pub fn new(
        graph: StageGraph,
        base_url: ValidatedUrl,
        fetcher: Arc<dyn PageFetcher>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            graph,
            base_url,
            fetcher,
            auth,
            selection: Vec::new(),
        }
    }

    /// Limits emitted stages; ancestors still run. Empty selects everything.
    pub fn with_selection(self, selection: Vec<StageName>) -> Self {
        Self { selection, ..self }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    /// Runs every planned stage and emits the selected ones to `sink`.
    ///
    /// A root stage that fails ends the run at once. A child stage that
    /// loses all of its keys is not emitted and its descendants are
    /// skipped, but unrelated stages still run; the first such failure is
    /// returned as [`AppError::StageFailed`] once the plan is done.
    /// [`AppError::Cancelled`] is returned when `cancel` fires. The sink is
    /// finished on every path; records already emitted stay emitted.
    pub async fn run(
        &self,
        sink: &mut dyn RecordSink,
        cancel: &CancellationToken,
    ) -> Result<PipelineReport, AppError> {
        let plan = self.graph.plan(&self.selection)?;
        let stages = self.graph.stages();
        let planned: HashSet<&StageName> = plan.iter().map(|p| &stages[p.index].name).collect();

        let mut context = RunContext::default();
        let mut report = PipelineReport::default();
        let mut blocked: HashSet<&StageName> = HashSet::new();
        let mut first_failure: Option<AppError> = None;

        for step in &plan {
            let stage = &stages[step.index];
            if cancel.is_cancelled() {
                log::warn!("Run cancelled before stage {}", stage.name);
                close_sink(sink);
                return Err(AppError::Cancelled);
            }

            if stage.parent.as_ref().is_some_and(|p| blocked.contains(p)) {
                log::warn!("Stage {} skipped: its parent stage failed", stage.name);
                blocked.insert(&stage.name);
                continue;
            }

            let keys = if stage.is_root() {
                vec![FetchKey::root()]
            } else {
                context.take_keys(&stage.name)
            };

            let mut run = match self.run_stage(stage, keys, cancel).await {
                Ok(run) => run,
                Err(e) => {
                    close_sink(sink);
                    return Err(e);
                }
            };
            run.report.emitted = step.emit;

            if cancel.is_cancelled() {
                log::warn!("Run cancelled during stage {}; its records are discarded", stage.name);
                close_sink(sink);
                return Err(AppError::Cancelled);
            }
            if let Some(error) = run.failure() {
                log::error!("{}", error);
                if stage.is_root() || matches!(error, AppError::Cancelled) {
                    close_sink(sink);
                    return Err(error);
                }
                run.report.emitted = false;
                report.stages.push(run.report);
                blocked.insert(&stage.name);
                first_failure.get_or_insert(error);
                continue;
            }

            if step.emit {
                sink.begin_stage(stage)?;
                sink.emit(&stage.name, &run.records)?;
            }

            for child in self
                .graph
                .children_of(&stage.name)
                .filter(|c| planned.contains(&c.name))
            {
                let Some(mapping) = &child.key_mapping else {
                    continue;
                };
                let propagated = propagate_keys(mapping, &run.records);
                log::info!(
                    "{} -> {}: {} keys ({} duplicates, {} records without a key)",
                    stage.name,
                    child.name,
                    propagated.keys.len(),
                    propagated.duplicates,
                    propagated.unmapped
                );
                context.seed(child.name.clone(), propagated.keys);
            }

            report.stages.push(run.report);
        }

        if let Some(error) = first_failure {
            close_sink(sink);
            report.log_summary();
            return Err(error);
        }

        sink.finish()?;
        report.log_summary();
        Ok(report)
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        keys: Vec<FetchKey>,
        cancel: &CancellationToken,
    ) -> Result<StageRun, AppError> {
        let started = Instant::now();
        let keys_scheduled = keys.len();
        let mut report = StageReport {
            stage: stage.name.clone(),
            emitted: true,
            keys_scheduled,
            failures: Vec::new(),
            records: 0,
            pages: 0,
            retries: RateLimitState::default(),
            truncated: false,
            bookmark: None,
            elapsed: Duration::ZERO,
        };

        if keys.is_empty() {
            log::info!("Stage {}: no keys, nothing to fetch", stage.name);
            return Ok(StageRun {
                records: Vec::new(),
                report,
            });
        }

        let headers = Arc::new(self.auth.headers()?);
        let budget = RecordBudget::new(stage.cap);
        let options = stage.query_options();
        let paginator = Paginator::new(
            self.fetcher.as_ref(),
            headers,
            &stage.options.retry,
            &budget,
            &stage.endpoint.records,
            cancel,
        );
        let scheduler = Scheduler::new(stage.options.batch_size);

        log::info!(
            "Stage {}: {} keys in batches of {} (cap {})",
            stage.name,
            keys_scheduled,
            scheduler.batch_size(),
            stage.cap
        );

        let outcomes = scheduler
            .run(keys, cancel, stage.name.as_str(), |key| {
                let paginator = &paginator;
                let budget = &budget;
                let options = &options;
                async move {
                    if budget.is_exhausted() {
                        budget.mark_truncated();
                        return Ok::<_, FetchError>(KeyRun::default());
                    }
                    let plan = QueryPlan::new(&self.base_url, &stage.endpoint, &key, options)?;
                    let label = if key.is_root() {
                        stage.name.to_string()
                    } else {
                        format!("{} [{}]", stage.name, key)
                    };
                    paginator.run(&plan, &label).await
                }
            })
            .await;

        let mut records = Vec::new();
        for KeyOutcome { key, result } in outcomes {
            match result {
                Ok(mut run) => {
                    report.pages += run.pages;
                    report.retries.absorb(&run.retries);
                    records.append(&mut run.records);
                }
                Err(error) => {
                    if error != FetchError::Cancelled {
                        log::warn!("{} [{}]: key abandoned: {}", stage.name, key, error);
                    }
                    report.failures.push(KeyFailure {
                        key,
                        class: error.class(),
                        message: error.to_string(),
                    });
                }
            }
        }

        report.records = records.len();
        report.truncated = budget.was_truncated();
        report.bookmark = stage
            .replication_key
            .as_deref()
            .and_then(|field| max_bookmark(&records, field));
        report.elapsed = started.elapsed();

        log::info!(
            "Stage {}: {} records, {} of {} keys failed in {:?}",
            stage.name,
            report.records,
            report.keys_failed(),
            keys_scheduled,
            report.elapsed
        );

        Ok(StageRun { records, report })
    }
}

/// Finishes the sink on a failing path. A flush error is logged; the
/// caller returns its own error.
fn close_sink(sink: &mut dyn RecordSink) {
    if let Err(e) = sink.finish() {
        log::error!("Failed to finish output: {}", e);
    }
}

/// Highest value of `field` across `records`.
///
/// Numbers compare numerically and strings lexically (RFC 3339 timestamps
/// sort correctly as text); mixed or other types are ignored.
fn max_bookmark(records: &[Record], field: &str) -> Option<Value> {
    records
        .iter()
        .filter_map(|r| r.get(field))
        .fold(None::<&Value>, |best, candidate| match best {
            None if !candidate.is_null() => Some(candidate),
            None => None,
            Some(current) if is_later(candidate, current) => Some(candidate),
            Some(current) => Some(current),
        })
        .cloned()
}

fn is_later(candidate: &Value, current: &Value) -> bool {
    match (candidate, current) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a > b,
            _ => a.as_f64().unwrap_or(f64::MIN) > b.as_f64().unwrap_or(f64::MIN),
        },
        (Value::String(a), Value::String(b)) => a > b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(keys_scheduled: usize, failures: usize) -> StageReport {
        StageReport {
            stage: StageName::new("email_events").unwrap(),
            emitted: true,
            keys_scheduled,
            failures: (0..failures)
                .map(|_| KeyFailure {
                    key: FetchKey::root(),
                    class: ErrorClass::Fatal,
                    message: "HTTP 404: gone".to_string(),
                })
                .collect(),
            records: 0,
            pages: 0,
            retries: RateLimitState::default(),
            truncated: false,
            bookmark: None,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn stage_fails_only_when_every_key_fails() {
        assert!(!report(0, 0).is_failed());
        assert!(!report(3, 2).is_failed());
        assert!(report(3, 3).is_failed());
    }

    #[test]
    fn failed_stage_reports_name_and_class() {
        let run = StageRun {
            records: Vec::new(),
            report: report(1, 1),
        };
        match run.failure() {
            Some(AppError::StageFailed { stage, class, .. }) => {
                assert_eq!(stage, "email_events");
                assert_eq!(class, ErrorClass::Fatal);
            }
            other => panic!("expected StageFailed, got {:?}", other),
        }
    }

    #[test]
    fn bookmark_is_the_maximum_value() {
        let records = vec![
            json!({"created": 30}),
            json!({"created": 100}),
            json!({"created": null}),
            json!({"other": 1}),
            json!({"created": 7}),
        ];
        assert_eq!(max_bookmark(&records, "created"), Some(json!(100)));

        let records = vec![
            json!({"updatedAt": "2024-03-01T00:00:00Z"}),
            json!({"updatedAt": "2024-05-01T00:00:00Z"}),
        ];
        assert_eq!(
            max_bookmark(&records, "updatedAt"),
            Some(json!("2024-05-01T00:00:00Z"))
        );
        assert_eq!(max_bookmark(&records, "missing"), None);
    }

    #[test]
    fn run_context_hands_keys_over_once() {
        let mut context = RunContext::default();
        let stage = StageName::new("email_events").unwrap();
        context.seed(stage.clone(), vec![FetchKey::root()]);
        assert_eq!(context.take_keys(&stage).len(), 1);
        assert!(context.take_keys(&stage).is_empty());
    }
}
