//! Request scheduler (endpoint picker) for pools of LLM inference backends.
//!
//! Given an inbound inference request, the scheduler selects exactly one
//! backend pod from a dynamic fleet using per-pod live metrics (queue depth,
//! KV-cache utilization, active LoRA adapters) and request-level hints
//! (criticality, session id, model, prompt). Sheddable traffic is dropped
//! under saturation, sessions stick to their pod, and pods whose KV-cache
//! already holds the prompt's prefix are preferred.
//!
//! The crate is the decision core only: the gateway front-end, the metrics
//! scraper endpoints, and the Kubernetes reconcilers are external and talk to
//! it through the [`datastore::Datastore`] entry points and
//! [`scheduling::Scheduler::schedule`].

pub mod config;
pub mod core;
pub mod datastore;
pub mod observability;
pub mod scheduling;

// Re-export the public surface for convenience
pub use config::{KvCacheIndexerConfig, SchedulerConfig, SessionConfig};
pub use crate::core::{
    Criticality, InferenceModel, InferencePool, MetricsClient, NamespacedName, ObjectMeta, Pod,
    PodMetrics, PodMetricsFactory, SchedulerError, SchedulerResult,
};
pub use datastore::{Datastore, ObjectClient};
pub use scheduling::{
    scorer::{HttpKvCacheIndexer, KvCacheAwareScorer, KvCacheIndexer, SessionAffinityScorer},
    types::{LLMRequest, PodSnapshot},
    Scheduler,
};
