//! Scheduler configuration
//!
//! All knobs come from environment variables with sane defaults so the
//! picker can run unconfigured next to its pool.

use std::{env, str::FromStr, time::Duration};

use serde::Serialize;
use tracing::info;

const DEFAULT_KV_CACHE_THRESHOLD: f64 = 0.8;
const DEFAULT_QUEUE_THRESHOLD_CRITICAL: u64 = 5;
const DEFAULT_QUEUEING_THRESHOLD_LORA: u64 = 128;
const DEFAULT_LORA_AFFINITY_THRESHOLD: f64 = 0.999;

const DEFAULT_INDEXER_ENDPOINT: &str =
    "http://vllm-p2p-lookup-server-service.default.svc.cluster.local:8100";
const DEFAULT_INDEXER_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_INDEXER_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

const DEFAULT_SESSION_KEEP_ALIVE: Duration = Duration::from_secs(60 * 60);
const DEFAULT_SESSION_CHECK_FREQUENCY: Duration = Duration::from_secs(15 * 60);

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Thresholds driving the filter pipelines.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerConfig {
    /// Max KV-cache utilization for a pod to accept a sheddable request.
    pub kv_cache_threshold: f64,
    /// Queue depth under which a pod counts as uncongested.
    pub queue_threshold_critical: u64,
    /// Queue-depth gate for LoRA affinity candidates.
    pub queueing_threshold_lora: u64,
    /// Probability of preferring LoRA-resident pods over free-slot pods.
    pub lora_affinity_threshold: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            kv_cache_threshold: DEFAULT_KV_CACHE_THRESHOLD,
            queue_threshold_critical: DEFAULT_QUEUE_THRESHOLD_CRITICAL,
            queueing_threshold_lora: DEFAULT_QUEUEING_THRESHOLD_LORA,
            lora_affinity_threshold: DEFAULT_LORA_AFFINITY_THRESHOLD,
        }
    }
}

impl SchedulerConfig {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let config = Self {
            kv_cache_threshold: env_or("KV_CACHE_THRESHOLD", DEFAULT_KV_CACHE_THRESHOLD),
            queue_threshold_critical: env_or(
                "QUEUE_THRESHOLD_CRITICAL",
                DEFAULT_QUEUE_THRESHOLD_CRITICAL,
            ),
            queueing_threshold_lora: env_or(
                "QUEUING_THRESHOLD_LORA",
                DEFAULT_QUEUEING_THRESHOLD_LORA,
            ),
            lora_affinity_threshold: env_or(
                "LORA_AFFINITY_THRESHOLD",
                DEFAULT_LORA_AFFINITY_THRESHOLD,
            ),
        };
        info!(config = ?config, "scheduler configuration loaded");
        config
    }
}

/// Connection settings for the external KV-cache indexer service.
#[derive(Debug, Clone, Serialize)]
pub struct KvCacheIndexerConfig {
    pub endpoint: String,
    pub request_timeout: Duration,
    /// Cadence of the indexer's internal availability refresh.
    pub refresh_interval: Duration,
}

impl Default for KvCacheIndexerConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_INDEXER_ENDPOINT.to_string(),
            request_timeout: DEFAULT_INDEXER_TIMEOUT,
            refresh_interval: DEFAULT_INDEXER_REFRESH_INTERVAL,
        }
    }
}

impl KvCacheIndexerConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("KV_CACHE_INDEXER_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_INDEXER_ENDPOINT.to_string()),
            ..Self::default()
        }
    }
}

/// Session-affinity table tuning.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// How long an idle session stays alive.
    pub keep_alive: Duration,
    /// How often the sweep looks for overly idle sessions.
    pub check_frequency: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keep_alive: DEFAULT_SESSION_KEEP_ALIVE,
            check_frequency: DEFAULT_SESSION_CHECK_FREQUENCY,
        }
    }
}
