//! Request scheduling.
//!
//! The scheduler freezes a snapshot of the ready pod set, narrows it through
//! the criticality-appropriate filter pipeline, and hands the survivors to
//! the weighted scorers. Critical requests always reach scoring as long as
//! any ready pod exists; sheddable requests are dropped once every pod is
//! saturated.

pub mod filter;
pub mod picker;
pub mod scorer;
pub mod types;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    config::SchedulerConfig,
    core::error::{SchedulerError, SchedulerResult},
    datastore::Datastore,
};
use filter::{
    drop_request_filter, has_capacity_filter, least_kv_cache_filter, least_queue_filter,
    lora_affinity_filter, low_queue_filter, DecisionTreeFilter, Filter,
};
use picker::RandomPicker;
use scorer::{KvCacheAwareScorer, KvCacheIndexer, ScorerManager, SessionAffinityScorer};
use types::{LLMRequest, PodSnapshot, SchedulingContext};

/// Default scorer weights. A KV-cache hit dominates unless an active session
/// pins a pod.
pub const SESSION_AFFINITY_WEIGHT: f64 = 1.0;
pub const KV_CACHE_AWARE_WEIGHT: f64 = 5.0;

/// Latency-first pipeline for critical traffic.
///
/// Uncongested pods take the affinity → least-queue → least-KV chain; when
/// every pod is congested the ordering flips to least-queue first so the
/// request still lands somewhere.
fn low_latency_pipeline(config: &SchedulerConfig) -> Arc<dyn Filter> {
    let on_success = DecisionTreeFilter::always(
        lora_affinity_filter(config),
        Arc::new(DecisionTreeFilter::always(
            least_queue_filter(),
            Arc::new(DecisionTreeFilter::leaf(least_kv_cache_filter())),
        )),
    );
    let on_failure = DecisionTreeFilter::always(
        least_queue_filter(),
        Arc::new(DecisionTreeFilter::always(
            lora_affinity_filter(config),
            Arc::new(DecisionTreeFilter::leaf(least_kv_cache_filter())),
        )),
    );
    Arc::new(DecisionTreeFilter::on_outcome(
        low_queue_filter(config),
        Some(Arc::new(on_success)),
        Some(Arc::new(on_failure)),
    ))
}

/// Sheddable pipeline: a pod with spare queue and KV-cache headroom routes
/// into the critical pipeline; otherwise the request is dropped to protect
/// critical traffic.
fn sheddable_pipeline(config: &SchedulerConfig) -> Arc<dyn Filter> {
    Arc::new(DecisionTreeFilter::on_outcome(
        has_capacity_filter(config),
        Some(low_latency_pipeline(config)),
        Some(drop_request_filter()),
    ))
}

/// Top-level orchestrator: snapshot → filter → score → pick.
#[derive(Debug)]
pub struct Scheduler {
    datastore: Arc<Datastore>,
    critical_request_filter: Arc<dyn Filter>,
    sheddable_request_filter: Arc<dyn Filter>,
    scorer_manager: ScorerManager,
}

impl Scheduler {
    /// Build a scheduler with the default scorer set: session affinity plus
    /// the KV-cache-aware scorer over the given indexer.
    pub fn new(
        datastore: Arc<Datastore>,
        config: SchedulerConfig,
        indexer: Arc<dyn KvCacheIndexer>,
    ) -> Self {
        let mut scorer_manager = ScorerManager::new(Box::new(RandomPicker::new()));
        scorer_manager.add_scorer(
            Arc::new(SessionAffinityScorer::new(Arc::clone(&datastore))),
            SESSION_AFFINITY_WEIGHT,
        );
        scorer_manager.add_scorer(
            Arc::new(KvCacheAwareScorer::new(indexer)),
            KV_CACHE_AWARE_WEIGHT,
        );
        Self::with_scorer_manager(datastore, config, scorer_manager)
    }

    /// Build a scheduler around a caller-assembled scorer set.
    pub fn with_scorer_manager(
        datastore: Arc<Datastore>,
        config: SchedulerConfig,
        scorer_manager: ScorerManager,
    ) -> Self {
        Self {
            datastore,
            critical_request_filter: low_latency_pipeline(&config),
            sheddable_request_filter: sheddable_pipeline(&config),
            scorer_manager,
        }
    }

    /// Select the target pod for one request.
    ///
    /// Side-effect free on every failure path; in particular the session
    /// table is only written by the caller, after a successful dispatch, via
    /// [`Datastore::set_pod_for_session`].
    pub async fn schedule(
        &self,
        cancellation: &CancellationToken,
        request: &LLMRequest,
    ) -> SchedulerResult<PodSnapshot> {
        if cancellation.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }
        if !self.datastore.pool_has_synced() {
            return Err(SchedulerError::PoolNotSynced);
        }

        // One frozen view for the whole call: reduces datastore contention
        // and keeps filters and scorers agreeing on what exists.
        let snapshot = self.datastore.pod_snapshot();
        let ctx = SchedulingContext::new(request.clone(), snapshot, cancellation.clone());
        debug!(request = ?ctx.request, pods = ctx.pods_snapshot.len(), "scheduling a request");

        let pipeline = if request.critical {
            &self.critical_request_filter
        } else {
            &self.sheddable_request_filter
        };

        let candidates = match pipeline.filter(&ctx, &ctx.pods_snapshot) {
            Ok(pods) if !pods.is_empty() => pods,
            Ok(_) => {
                return Err(SchedulerError::Internal {
                    message: "filter pipeline produced no candidate pods".to_string(),
                })
            }
            // Admission drops and cancellations keep their meaning; anything
            // else out of a filter is an invariant violation.
            Err(err @ (SchedulerError::ResourceExhausted | SchedulerError::Cancelled)) => {
                return Err(err)
            }
            Err(err) => {
                return Err(SchedulerError::Internal {
                    message: format!("filter pipeline failed: {err}"),
                })
            }
        };

        let target = self.scorer_manager.score_targets(&ctx, &candidates).await?;
        info!(pod = %target.pod.key, model = %request.model, "selected target pod");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::core::pod::{NamespacedName, Pod, PodMetrics};

    fn snapshot(name: &str, queue_depth: u64, kv: f64) -> PodSnapshot {
        PodSnapshot {
            pod: Pod::new(NamespacedName::new("default", name), format!("{}:8000", name)),
            metrics: PodMetrics {
                queue_depth,
                kv_cache_utilization: kv,
                ready: true,
                ..PodMetrics::default()
            },
        }
    }

    fn ctx_for(request: LLMRequest, pods: Vec<PodSnapshot>) -> SchedulingContext {
        SchedulingContext::new(request, pods, CancellationToken::new())
    }

    #[test]
    fn test_critical_pipeline_congested_pods_still_pass() {
        let config = SchedulerConfig::default();
        let pipeline = low_latency_pipeline(&config);
        // All pods far above every threshold.
        let pods = vec![snapshot("a", 80, 0.99), snapshot("b", 40, 0.99)];
        let ctx = ctx_for(LLMRequest::new("llama").critical(true), pods.clone());

        let result = pipeline.filter(&ctx, &pods).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].pod.key.name, "b"); // least queue wins
    }

    #[test]
    fn test_sheddable_pipeline_drops_when_saturated() {
        let config = SchedulerConfig::default();
        let pipeline = sheddable_pipeline(&config);
        let pods = vec![snapshot("a", 10, 0.95)];
        let ctx = ctx_for(LLMRequest::new("llama"), pods.clone());

        assert!(matches!(
            pipeline.filter(&ctx, &pods),
            Err(SchedulerError::ResourceExhausted)
        ));
    }

    #[test]
    fn test_sheddable_pipeline_admits_with_capacity() {
        let config = SchedulerConfig::default();
        let pipeline = sheddable_pipeline(&config);
        let pods = vec![snapshot("a", 10, 0.95), snapshot("b", 1, 0.2)];
        let ctx = ctx_for(LLMRequest::new("llama"), pods.clone());

        let result = pipeline.filter(&ctx, &pods).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].pod.key.name, "b");
    }

    #[test]
    fn test_filter_output_is_subset_of_input() {
        let config = SchedulerConfig::default();
        let pipeline = low_latency_pipeline(&config);
        let pods = vec![
            snapshot("a", 1, 0.1),
            snapshot("b", 2, 0.2),
            snapshot("c", 3, 0.3),
        ];
        let ctx = ctx_for(LLMRequest::new("llama"), pods.clone());

        let result = pipeline.filter(&ctx, &pods).unwrap();
        let input_keys: HashSet<_> = pods.iter().map(|p| p.pod.key.clone()).collect();
        assert!(result.iter().all(|p| input_keys.contains(&p.pod.key)));
    }
}
