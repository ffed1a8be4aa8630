//! Pool and model registration objects.
//!
//! These mirror the custom resources pushed in by the external reconcilers:
//! an `InferencePool` selects the pods that make up the fleet, and an
//! `InferenceModel` registers a served model name against that pool.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pod::NamespacedName;

/// Object identity plus the timestamps that drive oldest-wins resolution and
/// tombstone filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub name: String,
    pub namespace: String,
    pub creation_timestamp: DateTime<Utc>,
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
        }
    }

    pub fn created_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.creation_timestamp = timestamp;
        self
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        NamespacedName::new(self.namespace.clone(), self.name.clone())
    }

    /// Marked for deletion by the backing store but not yet gone.
    pub fn is_tombstoned(&self) -> bool {
        self.deletion_timestamp.is_some()
    }
}

/// Request class a model's traffic defaults to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criticality {
    Critical,
    Standard,
    Sheddable,
}

/// A model registration. Uniqueness is keyed by `model_name`; when the same
/// name is registered from several namespaces, the oldest creation wins.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceModel {
    pub metadata: ObjectMeta,
    pub model_name: String,
    /// Name of the `InferencePool` this registration belongs to.
    pub pool_ref: String,
    pub criticality: Option<Criticality>,
}

impl InferenceModel {
    pub fn new(
        metadata: ObjectMeta,
        model_name: impl Into<String>,
        pool_ref: impl Into<String>,
    ) -> Self {
        Self {
            metadata,
            model_name: model_name.into(),
            pool_ref: pool_ref.into(),
            criticality: None,
        }
    }

    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = Some(criticality);
        self
    }

    pub fn is_critical(&self) -> bool {
        matches!(self.criticality, Some(Criticality::Critical))
    }

    pub fn namespaced_name(&self) -> NamespacedName {
        self.metadata.namespaced_name()
    }
}

/// The active pool descriptor. Its selector drives pod membership.
#[derive(Debug, Clone, PartialEq)]
pub struct InferencePool {
    pub metadata: ObjectMeta,
    pub selector: HashMap<String, String>,
    /// Serving port used when building pod addresses from discovery.
    pub target_port: u16,
}

impl InferencePool {
    pub fn new(metadata: ObjectMeta, selector: HashMap<String, String>, target_port: u16) -> Self {
        Self {
            metadata,
            selector,
            target_port,
        }
    }

    /// Whether the pool's selector admits the given label set. An empty
    /// selector admits everything, matching set-based selector semantics.
    pub fn labels_match(&self, labels: &HashMap<String, String>) -> bool {
        self.selector
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_with_selector(pairs: &[(&str, &str)]) -> InferencePool {
        let selector = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InferencePool::new(ObjectMeta::new("default", "pool"), selector, 8000)
    }

    #[test]
    fn test_labels_match() {
        let pool = pool_with_selector(&[("app", "vllm")]);

        let mut labels = HashMap::new();
        labels.insert("app".to_string(), "vllm".to_string());
        labels.insert("zone".to_string(), "us-east".to_string());
        assert!(pool.labels_match(&labels));

        labels.insert("app".to_string(), "other".to_string());
        assert!(!pool.labels_match(&labels));
    }

    #[test]
    fn test_empty_selector_matches_all() {
        let pool = pool_with_selector(&[]);
        assert!(pool.labels_match(&HashMap::new()));
    }

    #[test]
    fn test_criticality() {
        let meta = ObjectMeta::new("default", "model-a");
        let model = InferenceModel::new(meta.clone(), "llama", "pool")
            .with_criticality(Criticality::Critical);
        assert!(model.is_critical());

        let standard = InferenceModel::new(meta, "llama", "pool");
        assert!(!standard.is_critical());
    }

    #[test]
    fn test_tombstone() {
        let mut meta = ObjectMeta::new("default", "model-a");
        assert!(!meta.is_tombstoned());
        meta.deletion_timestamp = Some(Utc::now());
        assert!(meta.is_tombstoned());
    }
}
