// src/propagation.rs
//! Stage context propagation: parent records in, child fetch keys out.

use crate::stage::KeyMapping;
use crate::types::{FetchKey, Record};
use indexmap::IndexSet;

/// Fetch keys derived for one child stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropagatedKeys {
    /// Unique keys in first-occurrence order.
    pub keys: Vec<FetchKey>,
    /// Parent records that yielded no key (missing, null or empty field).
    pub unmapped: usize,
    /// Keys dropped as repeats of an earlier one.
    pub duplicates: usize,
}

impl PropagatedKeys {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Applies `mapping` to every parent record and deduplicates the result.
pub fn propagate_keys(mapping: &KeyMapping, parent_records: &[Record]) -> PropagatedKeys {
    let mut unique = IndexSet::with_capacity(parent_records.len());
    let mut unmapped = 0;
    let mut duplicates = 0;

    for record in parent_records {
        match mapping.derive(record) {
            Some(key) => {
                if !unique.insert(key) {
                    duplicates += 1;
                }
            }
            None => unmapped += 1,
        }
    }

    PropagatedKeys {
        keys: unique.into_iter().collect(),
        unmapped,
        duplicates,
    }
}
