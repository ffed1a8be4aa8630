//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use llm_endpoint_picker::{
    scheduling::scorer::PodCacheScore, Datastore, InferenceModel, KvCacheIndexer, MetricsClient,
    NamespacedName, ObjectClient, Pod, PodMetrics, PodMetricsFactory, SchedulerError,
    SchedulerResult, SessionConfig,
};

/// Metrics source backed by a mutable table keyed by pod name.
#[derive(Debug, Default)]
pub struct TableMetricsClient {
    metrics: Mutex<HashMap<String, PodMetrics>>,
}

impl TableMetricsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, pod_name: &str, metrics: PodMetrics) {
        self.metrics
            .lock()
            .unwrap()
            .insert(pod_name.to_string(), metrics);
    }
}

impl MetricsClient for TableMetricsClient {
    fn scrape(&self, pod: &Pod) -> Option<PodMetrics> {
        self.metrics.lock().unwrap().get(&pod.key.name).cloned()
    }
}

/// Backing-store stand-in serving fixed model and pod lists.
#[derive(Debug, Default)]
pub struct FakeObjectClient {
    pub models: Mutex<Vec<InferenceModel>>,
    pub pods: Mutex<Vec<Pod>>,
}

#[async_trait]
impl ObjectClient for FakeObjectClient {
    async fn list_models(
        &self,
        namespace: &str,
        model_name: &str,
    ) -> SchedulerResult<Vec<InferenceModel>> {
        Ok(self
            .models
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.metadata.namespace == namespace && m.model_name == model_name)
            .cloned()
            .collect())
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        selector: &HashMap<String, String>,
    ) -> SchedulerResult<Vec<Pod>> {
        Ok(self
            .pods
            .lock()
            .unwrap()
            .iter()
            .filter(|p| selector.iter().all(|(k, v)| p.labels.get(k) == Some(v)))
            .cloned()
            .collect())
    }
}

/// Indexer serving a fixed address → score table, or a hard failure.
#[derive(Debug, Default)]
pub struct TableIndexer {
    pub scores: Mutex<HashMap<String, f64>>,
    pub fail: Mutex<bool>,
}

impl TableIndexer {
    pub fn with_scores(entries: &[(&str, f64)]) -> Arc<Self> {
        let indexer = Self::default();
        *indexer.scores.lock().unwrap() = entries
            .iter()
            .map(|(addr, score)| (addr.to_string(), *score))
            .collect();
        Arc::new(indexer)
    }

    pub fn unavailable() -> Arc<Self> {
        let indexer = Self::default();
        *indexer.fail.lock().unwrap() = true;
        Arc::new(indexer)
    }
}

#[async_trait]
impl KvCacheIndexer for TableIndexer {
    async fn pod_scores(
        &self,
        _prompt: &str,
        _model: &str,
        pod_addresses: &[String],
    ) -> SchedulerResult<Vec<PodCacheScore>> {
        if *self.fail.lock().unwrap() {
            return Err(SchedulerError::IndexerUnavailable {
                reason: "indexer offline".to_string(),
            });
        }
        let scores = self.scores.lock().unwrap();
        Ok(pod_addresses
            .iter()
            .filter_map(|addr| {
                scores.get(addr).map(|score| PodCacheScore {
                    name: addr.clone(),
                    score: *score,
                })
            })
            .collect())
    }
}

pub fn pod(name: &str) -> Pod {
    Pod::new(NamespacedName::new("default", name), format!("{}:8000", name))
}

pub fn pod_at(name: &str, address: &str) -> Pod {
    Pod::new(NamespacedName::new("default", name), address)
}

pub fn ready_metrics(queue_depth: u64, kv: f64) -> PodMetrics {
    PodMetrics {
        queue_depth,
        kv_cache_utilization: kv,
        ready: true,
        ..PodMetrics::default()
    }
}

/// Datastore over a table metrics client with a fast refresh cadence.
pub fn datastore_with(client: Arc<TableMetricsClient>) -> Arc<Datastore> {
    Arc::new(Datastore::new(PodMetricsFactory::new(
        client,
        Duration::from_millis(50),
    )))
}

/// Same, with short session TTLs for expiry tests.
pub fn datastore_with_sessions(
    client: Arc<TableMetricsClient>,
    session_config: SessionConfig,
) -> Arc<Datastore> {
    Arc::new(Datastore::with_session_config(
        PodMetricsFactory::new(client, Duration::from_millis(50)),
        session_config,
    ))
}
