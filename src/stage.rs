// src/stage.rs
//! Stage declarations and the dependency forest they form.
//!
//! A [`Stage`] is static metadata: where its records come from, how a
//! parent record becomes one of its fetch keys, and how it is tuned. A
//! [`StageGraph`] validates a set of stages and fixes their execution
//! order.

use crate::api::{Endpoint, QueryFilters, QueryOptions};
use crate::constants::CAMPAIGN_FANOUT_BATCH_SIZE;
use crate::error_recovery::RetryPolicy;
use crate::types::{FetchKey, KeyValue, Record, RecordCap, StageName, ValidationError};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Derives a child fetch key from a parent record.
pub type KeyFn = Arc<dyn Fn(&Record) -> Option<FetchKey> + Send + Sync>;

/// How a child stage turns one parent record into zero or one fetch key.
#[derive(Clone)]
pub enum KeyMapping {
    /// `(key parameter, record field)` bindings; every field must be present
    /// and non-empty for a key to be produced.
    Fields(Vec<(String, String)>),
    Custom(KeyFn),
}

impl KeyMapping {
    pub fn fields<I, K, F>(bindings: I) -> Self
    where
        I: IntoIterator<Item = (K, F)>,
        K: Into<String>,
        F: Into<String>,
    {
        Self::Fields(
            bindings
                .into_iter()
                .map(|(k, f)| (k.into(), f.into()))
                .collect(),
        )
    }

    pub fn custom(f: impl Fn(&Record) -> Option<FetchKey> + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    pub fn derive(&self, record: &Record) -> Option<FetchKey> {
        match self {
            Self::Fields(bindings) => {
                let mut pairs = Vec::with_capacity(bindings.len());
                for (param, field) in bindings {
                    let value = KeyValue::from_json(record.get(field)?)?;
                    pairs.push((param.clone(), value));
                }
                Some(FetchKey::from_pairs(pairs))
            }
            Self::Custom(f) => f(record),
        }
    }
}

impl fmt::Debug for KeyMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fields(bindings) => f.debug_tuple("Fields").field(bindings).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Per-stage tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOptions {
    /// Keys per concurrent batch.
    pub batch_size: usize,
    pub retry: RetryPolicy,
    pub filters: QueryFilters,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            batch_size: CAMPAIGN_FANOUT_BATCH_SIZE,
            retry: RetryPolicy::default(),
            filters: QueryFilters::default(),
        }
    }
}

/// One extraction stage.
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: StageName,
    /// JSON Schema of the records; opaque to the pipeline.
    pub schema: Value,
    pub key_properties: Vec<String>,
    pub parent: Option<StageName>,
    /// Required exactly when `parent` is set.
    pub key_mapping: Option<KeyMapping>,
    pub endpoint: Endpoint,
    pub cap: RecordCap,
    /// Incremental cursor field; its maximum is reported as the bookmark.
    pub replication_key: Option<String>,
    pub options: StageOptions,
}

impl Stage {
    /// A stage fetched once with the root key.
    pub fn root(name: StageName, endpoint: Endpoint) -> Self {
        Self {
            name,
            schema: Value::Object(Default::default()),
            key_properties: Vec::new(),
            parent: None,
            key_mapping: None,
            endpoint,
            cap: RecordCap::Unlimited,
            replication_key: None,
            options: StageOptions::default(),
        }
    }

    /// A stage fetched once per key derived from its parent's records.
    pub fn child(name: StageName, parent: StageName, mapping: KeyMapping, endpoint: Endpoint) -> Self {
        Self {
            parent: Some(parent),
            key_mapping: Some(mapping),
            ..Self::root(name, endpoint)
        }
    }

    pub fn with_schema(self, schema: Value) -> Self {
        Self { schema, ..self }
    }

    pub fn with_key_properties<I, S>(self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_properties: properties.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn with_cap(self, cap: RecordCap) -> Self {
        Self { cap, ..self }
    }

    pub fn with_replication_key(self, field: impl Into<String>) -> Self {
        Self {
            replication_key: Some(field.into()),
            ..self
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.options.filters = filters;
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Everything besides the key that shapes this stage's queries.
    pub fn query_options(&self) -> QueryOptions {
        QueryOptions {
            filters: self.options.filters.clone(),
            replication_key: self.replication_key.clone(),
        }
    }
}

/// A stage scheduled for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStage {
    /// Index into [`StageGraph::stages`].
    pub index: usize,
    /// Whether its records go to the sink; ancestors of selected stages
    /// run for their keys only.
    pub emit: bool,
}

/// Validated stage forest in execution order.
#[derive(Debug, Clone)]
pub struct StageGraph {
    stages: Vec<Stage>,
}

impl StageGraph {
    /// Validates the stages and orders them parents-first.
    ///
    /// Declaration order is kept among stages whose parents are already
    /// placed.
    pub fn new(stages: Vec<Stage>) -> Result<Self, ValidationError> {
        let mut names = HashSet::with_capacity(stages.len());
        for stage in &stages {
            if !names.insert(stage.name.clone()) {
                return Err(ValidationError::DuplicateStage(stage.name.to_string()));
            }
        }
        for stage in &stages {
            if let Some(parent) = &stage.parent {
                if !names.contains(parent) {
                    return Err(ValidationError::UnknownParent {
                        stage: stage.name.to_string(),
                        parent: parent.to_string(),
                    });
                }
                if stage.key_mapping.is_none() {
                    return Err(ValidationError::MissingKeyMapping(stage.name.to_string()));
                }
            }
        }

        let mut pending = stages;
        let mut ordered = Vec::with_capacity(pending.len());
        let mut placed: HashSet<StageName> = HashSet::with_capacity(pending.len());

        while !pending.is_empty() {
            let (ready, blocked): (Vec<Stage>, Vec<Stage>) = pending
                .into_iter()
                .partition(|s| s.parent.as_ref().map_or(true, |p| placed.contains(p)));
            if ready.is_empty() {
                let names: Vec<String> = blocked.iter().map(|s| s.name.to_string()).collect();
                return Err(ValidationError::DependencyCycle(names.join(", ")));
            }
            placed.extend(ready.iter().map(|s| s.name.clone()));
            ordered.extend(ready);
            pending = blocked;
        }

        Ok(Self { stages: ordered })
    }

    /// Stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn get(&self, name: &StageName) -> Option<&Stage> {
        self.stages.iter().find(|s| &s.name == name)
    }

    pub fn children_of<'a>(&'a self, name: &'a StageName) -> impl Iterator<Item = &'a Stage> + 'a {
        self.stages
            .iter()
            .filter(move |s| s.parent.as_ref() == Some(name))
    }

    /// Chooses the stages to run for `selected`; empty means all.
    ///
    /// Ancestors of a selected stage are included with `emit: false`.
    pub fn plan(&self, selected: &[StageName]) -> Result<Vec<PlannedStage>, ValidationError> {
        if selected.is_empty() {
            return Ok((0..self.stages.len())
                .map(|index| PlannedStage { index, emit: true })
                .collect());
        }

        let mut required: HashSet<&StageName> = HashSet::new();
        for name in selected {
            let mut current = self
                .get(name)
                .ok_or_else(|| ValidationError::UnknownStage(name.to_string()))?;
            required.insert(&current.name);
            while let Some(parent) = &current.parent {
                required.insert(parent);
                match self.get(parent) {
                    Some(stage) => current = stage,
                    None => break,
                }
            }
        }

        Ok(self
            .stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| required.contains(&stage.name))
            .map(|(index, stage)| PlannedStage {
                index,
                emit: selected.contains(&stage.name),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RecordsLocation;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn name(s: &str) -> StageName {
        StageName::new(s).unwrap()
    }

    fn endpoint() -> Endpoint {
        Endpoint::new("/x", RecordsLocation::Body)
    }

    fn child(n: &str, parent: &str) -> Stage {
        Stage::child(name(n), name(parent), KeyMapping::fields([("id", "id")]), endpoint())
    }

    fn order(graph: &StageGraph) -> Vec<&str> {
        graph.stages().iter().map(|s| s.name.as_str()).collect()
    }

    #[test]
    fn parents_are_ordered_before_children() {
        let graph = StageGraph::new(vec![
            child("subscriptions", "events"),
            child("events", "campaigns"),
            Stage::root(name("campaigns"), endpoint()),
            child("details", "campaigns"),
        ])
        .unwrap();
        assert_eq!(order(&graph), vec!["campaigns", "events", "details", "subscriptions"]);
    }

    #[test]
    fn duplicate_stage_is_rejected() {
        let err = StageGraph::new(vec![
            Stage::root(name("campaigns"), endpoint()),
            Stage::root(name("campaigns"), endpoint()),
        ])
        .unwrap_err();
        assert_eq!(err, ValidationError::DuplicateStage("campaigns".to_string()));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let err = StageGraph::new(vec![child("events", "campaigns")]).unwrap_err();
        assert!(matches!(err, ValidationError::UnknownParent { .. }));
    }

    #[test]
    fn child_without_mapping_is_rejected() {
        let mut stage = child("events", "campaigns");
        stage.key_mapping = None;
        let err = StageGraph::new(vec![Stage::root(name("campaigns"), endpoint()), stage]).unwrap_err();
        assert_eq!(err, ValidationError::MissingKeyMapping("events".to_string()));
    }

    #[test]
    fn cycle_is_rejected() {
        let err = StageGraph::new(vec![child("a", "b"), child("b", "a")]).unwrap_err();
        assert!(matches!(err, ValidationError::DependencyCycle(_)));
    }

    #[test]
    fn selection_pulls_in_ancestors_without_emitting_them() {
        let graph = StageGraph::new(vec![
            Stage::root(name("campaigns"), endpoint()),
            child("events", "campaigns"),
            child("details", "campaigns"),
            child("subscriptions", "events"),
        ])
        .unwrap();

        let plan = graph.plan(&[name("subscriptions")]).unwrap();
        let planned: Vec<(&str, bool)> = plan
            .iter()
            .map(|p| (graph.stages()[p.index].name.as_str(), p.emit))
            .collect();
        assert_eq!(
            planned,
            vec![("campaigns", false), ("events", false), ("subscriptions", true)]
        );

        assert_eq!(graph.plan(&[]).unwrap().len(), 4);
        assert_eq!(
            graph.plan(&[name("nope")]).unwrap_err(),
            ValidationError::UnknownStage("nope".to_string())
        );
    }

    #[test]
    fn field_mapping_requires_every_field() {
        let mapping = KeyMapping::fields([("campaign_id", "id"), ("app_id", "appId")]);

        let key = mapping.derive(&json!({"id": 7, "appId": 113})).unwrap();
        assert_eq!(key.get("campaign_id"), Some(&KeyValue::Int(7)));
        assert_eq!(key.get("app_id"), Some(&KeyValue::Int(113)));

        assert_eq!(mapping.derive(&json!({"id": 7})), None);
        assert_eq!(mapping.derive(&json!({"id": 7, "appId": null})), None);
        assert_eq!(mapping.derive(&json!({"id": "", "appId": 1})), None);
    }

    #[test]
    fn custom_mapping_is_called() {
        let mapping = KeyMapping::custom(|record| {
            record
                .get("recipient")
                .and_then(|v| v.as_str())
                .map(|r| FetchKey::from_pairs([("recipient_email_id", r.to_lowercase())]))
        });
        let key = mapping.derive(&json!({"recipient": "A@Example.com"})).unwrap();
        assert_eq!(key.to_string(), "recipient_email_id=a@example.com");
    }
}
