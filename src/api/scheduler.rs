// src/api/scheduler.rs
//! Bounded fan-out over the fetch keys of one stage.
//!
//! Keys are split into fixed-size batches. Every key in a batch runs
//! concurrently on the current task; the next batch starts only after the
//! whole batch has finished. Outcomes come back in submission order
//! regardless of completion order.

use crate::error::FetchError;
use crate::types::FetchKey;
use futures::future::join_all;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Result of one key.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyOutcome<T> {
    pub key: FetchKey,
    pub result: Result<T, FetchError>,
}

/// Runs per-key work in sequential batches of at most `batch_size` keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduler {
    batch_size: usize,
}

impl Scheduler {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Runs `task` once per key.
    ///
    /// A failed key never affects its siblings. Once `cancel` fires no
    /// further batch is started and the remaining keys report
    /// [`FetchError::Cancelled`].
    pub async fn run<T, F, Fut>(
        &self,
        keys: Vec<FetchKey>,
        cancel: &CancellationToken,
        label: &str,
        task: F,
    ) -> Vec<KeyOutcome<T>>
    where
        F: Fn(FetchKey) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let total_batches = keys.len().div_ceil(self.batch_size);
        let mut outcomes = Vec::with_capacity(keys.len());

        for (index, batch) in keys.chunks(self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                outcomes.extend(batch.iter().map(|key| KeyOutcome {
                    key: key.clone(),
                    result: Err(FetchError::Cancelled),
                }));
                continue;
            }

            log::debug!(
                "{}: batch {}/{} ({} keys)",
                label,
                index + 1,
                total_batches,
                batch.len()
            );
            let results = join_all(batch.iter().cloned().map(&task)).await;

            let failed = results.iter().filter(|r| r.is_err()).count();
            if failed > 0 {
                log::warn!(
                    "{}: {} of {} keys failed in batch {}",
                    label,
                    failed,
                    batch.len(),
                    index + 1
                );
            }
            outcomes.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(results)
                    .map(|(key, result)| KeyOutcome { key, result }),
            );
        }

        outcomes
    }
}
