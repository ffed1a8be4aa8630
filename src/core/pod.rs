//! Pod identity, live metrics, and the per-pod refresh machinery.
//!
//! A `PodMetricsHandle` is the live object kept in the datastore: the pod's
//! (mutable) properties plus the most recent scrape of its serving metrics.
//! The handle owns a refresh loop that pulls fresh values through a pluggable
//! [`MetricsClient`]; the loop is stopped exactly once, either explicitly on
//! pod deletion or when the handle is dropped.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Arc, Mutex, RwLock},
    time::Duration,
};

use serde::Serialize;

use super::periodic::PeriodicTask;

/// Structural `(namespace, name)` identity used as the map key for pods and
/// for model objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A single backend serving process.
///
/// `address` is the `host:port` identifier handed to external services such
/// as the KV-cache indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pod {
    pub key: NamespacedName,
    pub address: String,
    pub labels: HashMap<String, String>,
}

impl Pod {
    pub fn new(key: NamespacedName, address: impl Into<String>) -> Self {
        Self {
            key,
            address: address.into(),
            labels: HashMap::new(),
        }
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }
}

/// Most recent scrape of a pod's serving metrics.
#[derive(Debug, Clone, PartialEq)]
pub struct PodMetrics {
    pub queue_depth: u64,
    /// Fraction of the KV-cache currently in use, in `[0, 1]`.
    pub kv_cache_utilization: f64,
    pub active_lora_adapters: HashSet<String>,
    pub max_lora_slots: u32,
    /// Only ready pods are admitted into scheduling snapshots.
    pub ready: bool,
}

impl Default for PodMetrics {
    fn default() -> Self {
        Self {
            queue_depth: 0,
            kv_cache_utilization: 0.0,
            active_lora_adapters: HashSet::new(),
            max_lora_slots: 1,
            ready: false,
        }
    }
}

impl PodMetrics {
    /// Whether a slot is free to load one more LoRA adapter.
    pub fn has_free_lora_slot(&self) -> bool {
        (self.active_lora_adapters.len() as u32) < self.max_lora_slots
    }
}

/// Client used by the refresh loop to pull fresh metrics for a pod.
///
/// Implementations talk to the model server's metrics endpoint; returning
/// `None` leaves the previous values in place. Scrapes run on a dedicated
/// refresh thread and should be bounded by their own timeout.
pub trait MetricsClient: Send + Sync + fmt::Debug {
    fn scrape(&self, pod: &Pod) -> Option<PodMetrics>;
}

/// Live per-pod entry held by the datastore.
#[derive(Debug)]
pub struct PodMetricsHandle {
    pod: RwLock<Pod>,
    metrics: RwLock<PodMetrics>,
    refresh: Mutex<Option<PeriodicTask>>,
}

impl PodMetricsHandle {
    fn new(pod: Pod) -> Self {
        Self {
            pod: RwLock::new(pod),
            metrics: RwLock::new(PodMetrics::default()),
            refresh: Mutex::new(None),
        }
    }

    pub fn pod(&self) -> Pod {
        self.pod.read().expect("pod lock poisoned").clone()
    }

    /// Update mutable pod properties (address, labels) in place.
    pub fn update_pod(&self, pod: Pod) {
        *self.pod.write().expect("pod lock poisoned") = pod;
    }

    pub fn metrics(&self) -> PodMetrics {
        self.metrics.read().expect("metrics lock poisoned").clone()
    }

    pub fn set_metrics(&self, metrics: PodMetrics) {
        *self.metrics.write().expect("metrics lock poisoned") = metrics;
    }

    fn attach_refresh(&self, task: PeriodicTask) {
        *self.refresh.lock().expect("refresh lock poisoned") = Some(task);
    }

    /// Stop the refresh loop. Take-then-close: the task is moved out under
    /// the lock, so concurrent callers race for ownership and the loop is
    /// joined exactly once. Safe to call repeatedly.
    pub fn stop_refresh(&self) {
        let task = self.refresh.lock().expect("refresh lock poisoned").take();
        drop(task);
    }
}

impl Drop for PodMetricsHandle {
    fn drop(&mut self) {
        self.stop_refresh();
    }
}

/// Builds `PodMetricsHandle`s with their refresh loop attached.
#[derive(Debug, Clone)]
pub struct PodMetricsFactory {
    client: Arc<dyn MetricsClient>,
    refresh_interval: Duration,
}

impl PodMetricsFactory {
    pub fn new(client: Arc<dyn MetricsClient>, refresh_interval: Duration) -> Self {
        Self {
            client,
            refresh_interval,
        }
    }

    /// Create the live handle for a newly seen pod.
    ///
    /// The pod is scraped once inline so the entry starts with real values,
    /// then a periodic refresh keeps them current until `stop_refresh`.
    pub fn new_handle(&self, pod: Pod) -> Arc<PodMetricsHandle> {
        let handle = Arc::new(PodMetricsHandle::new(pod));

        if let Some(metrics) = self.client.scrape(&handle.pod()) {
            handle.set_metrics(metrics);
        }

        // The loop holds a weak reference: the handle owns the task, not the
        // other way around, so removal from the datastore tears it down.
        let weak = Arc::downgrade(&handle);
        let client = Arc::clone(&self.client);
        let task = PeriodicTask::spawn(self.refresh_interval, "pod-metrics-refresh", move || {
            if let Some(handle) = weak.upgrade() {
                if let Some(metrics) = client.scrape(&handle.pod()) {
                    handle.set_metrics(metrics);
                }
            }
        });
        handle.attach_refresh(task);

        handle
    }
}
