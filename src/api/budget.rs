// src/api/budget.rs
//! Shared record budget for one stage run.
//!
//! Every concurrent paginator of a stage holds a clone of the same budget
//! and reserves room for each page it fetches. The counter and stop flag
//! are the only state shared between those tasks.

use crate::types::RecordCap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
struct BudgetState {
    cap: Option<usize>,
    taken: AtomicUsize,
    stopped: AtomicBool,
    truncated: AtomicBool,
}

/// Record counter plus stop flag, cloned into each task of a stage.
#[derive(Debug, Clone)]
pub struct RecordBudget {
    state: Arc<BudgetState>,
}

impl RecordBudget {
    pub fn new(cap: RecordCap) -> Self {
        let cap = cap.limit();
        Self {
            state: Arc::new(BudgetState {
                cap,
                taken: AtomicUsize::new(0),
                stopped: AtomicBool::new(cap == Some(0)),
                truncated: AtomicBool::new(false),
            }),
        }
    }

    /// Reserves room for up to `wanted` records and returns how many fit.
    ///
    /// When fewer than `wanted` fit the caller must drop the excess; the
    /// budget then records the truncation and raises the stop flag.
    pub fn reserve(&self, wanted: usize) -> usize {
        let state = &self.state;
        let Some(cap) = state.cap else {
            state.taken.fetch_add(wanted, Ordering::Relaxed);
            return wanted;
        };

        let mut current = state.taken.load(Ordering::Acquire);
        loop {
            let granted = wanted.min(cap.saturating_sub(current));
            match state.taken.compare_exchange_weak(
                current,
                current + granted,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    if current + granted >= cap {
                        state.stopped.store(true, Ordering::Release);
                    }
                    if granted < wanted {
                        state.truncated.store(true, Ordering::Release);
                    }
                    return granted;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// True once the cap has been reached; tasks stop fetching.
    pub fn is_exhausted(&self) -> bool {
        self.state.stopped.load(Ordering::Acquire)
    }

    /// Notes that data was left behind because the cap was reached.
    pub fn mark_truncated(&self) {
        self.state.truncated.store(true, Ordering::Release);
    }

    pub fn was_truncated(&self) -> bool {
        self.state.truncated.load(Ordering::Acquire)
    }

    /// Records reserved so far.
    pub fn consumed(&self) -> usize {
        self.state.taken.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlimited_never_truncates() {
        let budget = RecordBudget::new(RecordCap::Unlimited);
        assert_eq!(budget.reserve(1000), 1000);
        assert_eq!(budget.reserve(1000), 1000);
        assert!(!budget.is_exhausted());
        assert!(!budget.was_truncated());
        assert_eq!(budget.consumed(), 2000);
    }

    #[test]
    fn cap_truncates_the_last_reservation() {
        let budget = RecordBudget::new(RecordCap::AtMost(5));
        assert_eq!(budget.reserve(3), 3);
        assert!(!budget.is_exhausted());
        assert_eq!(budget.reserve(3), 2);
        assert!(budget.is_exhausted());
        assert!(budget.was_truncated());
        assert_eq!(budget.reserve(3), 0);
        assert_eq!(budget.consumed(), 5);
    }

    #[test]
    fn exact_fill_stops_without_truncation() {
        let budget = RecordBudget::new(RecordCap::AtMost(4));
        assert_eq!(budget.reserve(4), 4);
        assert!(budget.is_exhausted());
        assert!(!budget.was_truncated());
    }

    #[test]
    fn zero_cap_starts_exhausted() {
        let budget = RecordBudget::new(RecordCap::AtMost(0));
        assert!(budget.is_exhausted());
    }

    #[test]
    fn concurrent_reservations_never_exceed_the_cap() {
        let budget = RecordBudget::new(RecordCap::AtMost(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = budget.clone();
                std::thread::spawn(move || (0..100).map(|_| budget.reserve(7)).sum::<usize>())
            })
            .collect();
        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 1_000);
        assert_eq!(budget.consumed(), 1_000);
    }
}
