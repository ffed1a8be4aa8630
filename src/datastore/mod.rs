//! Concurrent registry backing the scheduler.
//!
//! The datastore is a local cache of everything relevant to the active
//! inference pool: the pool descriptor, the model registrations keyed by
//! served name, the live pod set with its metrics handles, and the
//! session-affinity table. External reconcilers drive membership through the
//! upsert/delete/resync entry points; the scheduler only takes snapshots.
//!
//! Thread-safe under many readers and occasional writers: pool and models sit
//! behind a reader-writer lock, pods and sessions in lock-free concurrent
//! maps.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, RwLock},
    time::Instant,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::{
    config::SessionConfig,
    core::{
        error::{SchedulerError, SchedulerResult},
        model::{InferenceModel, InferencePool},
        periodic::PeriodicTask,
        pod::{NamespacedName, Pod, PodMetricsFactory, PodMetricsHandle},
    },
    scheduling::types::PodSnapshot,
};

/// Client for the backing object store (the Kubernetes API in production).
///
/// Listing is only needed for the resync paths; the normal flow is push-based
/// through the upsert/delete operations.
#[async_trait]
pub trait ObjectClient: Send + Sync {
    /// List all model registrations with the given served name in a namespace,
    /// including tombstoned ones.
    async fn list_models(
        &self,
        namespace: &str,
        model_name: &str,
    ) -> SchedulerResult<Vec<InferenceModel>>;

    /// List the ready pods matching a label selector in a namespace.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &HashMap<String, String>,
    ) -> SchedulerResult<Vec<Pod>>;
}

#[derive(Debug, Clone)]
struct SessionEntry {
    pod: Pod,
    last_used: Instant,
}

#[derive(Debug, Default)]
struct PoolAndModels {
    pool: Option<InferencePool>,
    // key: InferenceModel.model_name
    models: HashMap<String, InferenceModel>,
}

/// Process-wide registry of pool, models, pods, and sessions.
#[derive(Debug)]
pub struct Datastore {
    pool_and_models: RwLock<PoolAndModels>,
    pods: DashMap<NamespacedName, Arc<PodMetricsHandle>>,
    sessions: Arc<DashMap<String, SessionEntry>>,
    factory: PodMetricsFactory,
    _session_sweep: PeriodicTask,
}

impl Datastore {
    pub fn new(factory: PodMetricsFactory) -> Self {
        Self::with_session_config(factory, SessionConfig::default())
    }

    pub fn with_session_config(factory: PodMetricsFactory, session_config: SessionConfig) -> Self {
        let sessions: Arc<DashMap<String, SessionEntry>> = Arc::new(DashMap::new());

        let sweep_sessions = Arc::clone(&sessions);
        let keep_alive = session_config.keep_alive;
        let session_sweep = PeriodicTask::spawn(
            session_config.check_frequency,
            "session-sweep",
            move || {
                let now = Instant::now();
                let before = sweep_sessions.len();
                sweep_sessions.retain(|_, entry| now.duration_since(entry.last_used) <= keep_alive);
                let evicted = before - sweep_sessions.len();
                if evicted > 0 {
                    debug!(evicted, "session sweep removed idle sessions");
                }
            },
        );

        Self {
            pool_and_models: RwLock::new(PoolAndModels::default()),
            pods: DashMap::new(),
            sessions,
            factory,
            _session_sweep: session_sweep,
        }
    }

    // /// Pool operations ///

    pub fn pool_set(&self, pool: InferencePool) {
        let mut guard = self.pool_and_models.write().expect("pool lock poisoned");
        guard.pool = Some(pool);
    }

    pub fn pool_get(&self) -> SchedulerResult<InferencePool> {
        let guard = self.pool_and_models.read().expect("pool lock poisoned");
        guard.pool.clone().ok_or(SchedulerError::PoolNotSynced)
    }

    pub fn pool_has_synced(&self) -> bool {
        let guard = self.pool_and_models.read().expect("pool lock poisoned");
        guard.pool.is_some()
    }

    pub fn pool_labels_match(&self, labels: &HashMap<String, String>) -> bool {
        let guard = self.pool_and_models.read().expect("pool lock poisoned");
        guard
            .pool
            .as_ref()
            .is_some_and(|pool| pool.labels_match(labels))
    }

    // /// Model operations ///

    /// Insert or replace the registration for `model.model_name`.
    ///
    /// When the existing entry refers to a different namespaced object, the
    /// one with the earlier creation timestamp is kept. An incoming object
    /// with the same identity replaces unconditionally, so a re-created
    /// object with a fresh timestamp still wins over its stale entry.
    /// Returns true iff the store now holds the incoming object.
    pub fn model_set_if_older(&self, model: InferenceModel) -> bool {
        let mut guard = self.pool_and_models.write().expect("pool lock poisoned");
        if let Some(existing) = guard.models.get(&model.model_name) {
            let different_object = existing.metadata.name != model.metadata.name
                || existing.metadata.namespace != model.metadata.namespace;
            if different_object
                && existing.metadata.creation_timestamp < model.metadata.creation_timestamp
            {
                return false;
            }
        }
        guard.models.insert(model.model_name.clone(), model);
        true
    }

    pub fn model_get(&self, model_name: &str) -> Option<InferenceModel> {
        let guard = self.pool_and_models.read().expect("pool lock poisoned");
        guard.models.get(model_name).cloned()
    }

    pub fn model_get_all(&self) -> Vec<InferenceModel> {
        let guard = self.pool_and_models.read().expect("pool lock poisoned");
        guard.models.values().cloned().collect()
    }

    /// Remove the registration backed by the given namespaced object.
    pub fn model_delete(&self, namespaced_name: &NamespacedName) -> Option<InferenceModel> {
        let mut guard = self.pool_and_models.write().expect("pool lock poisoned");
        let model_name = guard
            .models
            .values()
            .find(|m| m.namespaced_name() == *namespaced_name)
            .map(|m| m.model_name.clone())?;
        guard.models.remove(&model_name)
    }

    /// Re-scan the backing store for registrations of `model_name` belonging
    /// to this pool and install the oldest surviving one. Returns whether any
    /// survived.
    pub async fn model_resync(
        &self,
        client: &dyn ObjectClient,
        model_name: &str,
    ) -> SchedulerResult<bool> {
        let pool = self.pool_get()?;
        let models = client
            .list_models(&pool.metadata.namespace, model_name)
            .await?;

        let oldest = models
            .into_iter()
            .filter(|m| {
                m.model_name == model_name
                    && m.pool_ref == pool.metadata.name
                    && !m.metadata.is_tombstoned()
            })
            .min_by_key(|m| m.metadata.creation_timestamp);

        let Some(oldest) = oldest else {
            return Ok(false);
        };

        let mut guard = self.pool_and_models.write().expect("pool lock poisoned");
        guard.models.insert(model_name.to_string(), oldest);
        Ok(true)
    }

    // /// Pod operations ///

    /// All live pod handles, fresh and stale alike.
    pub fn pod_get_all(&self) -> Vec<Arc<PodMetricsHandle>> {
        self.pod_list(|_| true)
    }

    pub fn pod_list<F>(&self, predicate: F) -> Vec<Arc<PodMetricsHandle>>
    where
        F: Fn(&PodMetricsHandle) -> bool,
    {
        self.pods
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Create the metrics handle on first sight, update the mutable pod
    /// fields otherwise. Returns whether the pod already existed.
    pub fn pod_update_or_add(&self, pod: Pod) -> bool {
        use dashmap::mapref::entry::Entry;

        match self.pods.entry(pod.key.clone()) {
            Entry::Occupied(entry) => {
                entry.get().update_pod(pod);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(self.factory.new_handle(pod));
                false
            }
        }
    }

    /// Remove a pod and stop its refresh loop. Idempotent; the loop is
    /// stopped exactly once even under concurrent deletes.
    pub fn pod_delete(&self, namespaced_name: &NamespacedName) {
        if let Some((_, handle)) = self.pods.remove(namespaced_name) {
            handle.stop_refresh();
        }
    }

    /// Reconcile the pod set against the backing store: upsert every ready
    /// pod matching the pool selector, delete everything else.
    pub async fn pod_resync_all(&self, client: &dyn ObjectClient) -> SchedulerResult<()> {
        let pool = self.pool_get()?;
        let pods = client
            .list_pods(&pool.metadata.namespace, &pool.selector)
            .await?;

        let mut active: HashSet<NamespacedName> = HashSet::with_capacity(pods.len());
        for pod in pods {
            let key = pod.key.clone();
            active.insert(key.clone());
            if self.pod_update_or_add(pod) {
                debug!(pod = %key, "pod already exists");
            } else {
                info!(pod = %key, "pod added");
            }
        }

        let stale: Vec<NamespacedName> = self
            .pods
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| !active.contains(key))
            .collect();
        for key in stale {
            info!(pod = %key, "removing pod");
            self.pod_delete(&key);
        }
        Ok(())
    }

    /// Ready pods only, copied into point-in-time values for one scheduling
    /// call.
    pub fn pod_snapshot(&self) -> Vec<PodSnapshot> {
        self.pods
            .iter()
            .filter_map(|entry| {
                let metrics = entry.value().metrics();
                metrics.ready.then(|| PodSnapshot {
                    pod: entry.value().pod(),
                    metrics,
                })
            })
            .collect()
    }

    // /// Session operations ///

    /// Commit or refresh the session's pod; refreshes `last_used`.
    pub fn set_pod_for_session(&self, session_id: &str, pod: &Pod) {
        self.sessions.insert(
            session_id.to_string(),
            SessionEntry {
                pod: pod.clone(),
                last_used: Instant::now(),
            },
        );
    }

    pub fn get_pod_for_session(&self, session_id: &str) -> Option<Pod> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.pod.clone())
    }

    /// Drop pool, models, pods, and sessions. Used when the pool itself goes
    /// away; every refresh loop is stopped on the way out.
    pub fn clear(&self) {
        {
            let mut guard = self.pool_and_models.write().expect("pool lock poisoned");
            guard.pool = None;
            guard.models.clear();
        }
        let keys: Vec<NamespacedName> = self.pods.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            self.pod_delete(&key);
        }
        self.sessions.clear();
    }
}
