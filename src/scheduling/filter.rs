//! Candidate filtering for the scheduling pipeline.
//!
//! Atomic filters wrap a predicate over the frozen pod snapshot; the
//! decision-tree filter composes them into try-this-then-that logic. A node
//! routes on whether its own filter produced any pods: the success child sees
//! the narrowed list, the failure child sees the node's *input*, so a failed
//! filter never starves its successor.

use std::{fmt, sync::Arc};

use rand::Rng;
use tracing::debug;

use super::types::{PodSnapshot, SchedulingContext};
use crate::{
    config::SchedulerConfig,
    core::error::{SchedulerError, SchedulerResult},
};

/// A selector narrowing a candidate pod list. Output is a subsequence of the
/// input; implementations never mutate what they are given.
pub trait Filter: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn filter(
        &self,
        ctx: &SchedulingContext,
        pods: &[PodSnapshot],
    ) -> SchedulerResult<Vec<PodSnapshot>>;
}

type FilterFn =
    Box<dyn Fn(&SchedulingContext, &[PodSnapshot]) -> SchedulerResult<Vec<PodSnapshot>> + Send + Sync>;

/// Atomic filter around a filtering function.
pub struct BasicFilter {
    name: &'static str,
    filter: FilterFn,
}

impl BasicFilter {
    pub fn new(name: &'static str, filter: FilterFn) -> Self {
        Self { name, filter }
    }

    /// Keep the pods satisfying a per-pod predicate, preserving order.
    pub fn from_predicate<P>(name: &'static str, predicate: P) -> Self
    where
        P: Fn(&SchedulingContext, &PodSnapshot) -> bool + Send + Sync + 'static,
    {
        Self::new(
            name,
            Box::new(move |ctx, pods| {
                Ok(pods
                    .iter()
                    .filter(|pod| predicate(ctx, pod))
                    .cloned()
                    .collect())
            }),
        )
    }
}

impl Filter for BasicFilter {
    fn name(&self) -> &'static str {
        self.name
    }

    fn filter(
        &self,
        ctx: &SchedulingContext,
        pods: &[PodSnapshot],
    ) -> SchedulerResult<Vec<PodSnapshot>> {
        ctx.check_cancelled()?;
        let result = (self.filter)(ctx, pods);
        if let Ok(filtered) = &result {
            debug!(
                filter = self.name,
                input = pods.len(),
                output = filtered.len(),
                "filter applied"
            );
        }
        result
    }
}

impl fmt::Debug for BasicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicFilter").field("name", &self.name).finish()
    }
}

/// Successor routing for a decision-tree node. The tagged representation
/// keeps the unconditional route and the outcome-split route mutually
/// exclusive, so a malformed tree cannot be constructed.
#[derive(Debug)]
pub enum NextStep {
    /// Terminal node; the node's own output is the result.
    Leaf,
    /// Route by outcome; either side may be absent.
    OnOutcome {
        on_success: Option<Arc<dyn Filter>>,
        on_failure: Option<Arc<dyn Filter>>,
    },
    /// Same successor regardless of outcome.
    Always(Arc<dyn Filter>),
}

/// Composite filter routing to a successor on its own success or failure.
/// Success means a non-empty, error-free output.
#[derive(Debug)]
pub struct DecisionTreeFilter {
    current: Arc<dyn Filter>,
    next: NextStep,
}

impl DecisionTreeFilter {
    pub fn leaf(current: Arc<dyn Filter>) -> Self {
        Self {
            current,
            next: NextStep::Leaf,
        }
    }

    pub fn on_outcome(
        current: Arc<dyn Filter>,
        on_success: Option<Arc<dyn Filter>>,
        on_failure: Option<Arc<dyn Filter>>,
    ) -> Self {
        Self {
            current,
            next: NextStep::OnOutcome {
                on_success,
                on_failure,
            },
        }
    }

    pub fn always(current: Arc<dyn Filter>, next: Arc<dyn Filter>) -> Self {
        Self {
            current,
            next: NextStep::Always(next),
        }
    }
}

impl Filter for DecisionTreeFilter {
    fn name(&self) -> &'static str {
        self.current.name()
    }

    fn filter(
        &self,
        ctx: &SchedulingContext,
        pods: &[PodSnapshot],
    ) -> SchedulerResult<Vec<PodSnapshot>> {
        match self.current.filter(ctx, pods) {
            Ok(filtered) if !filtered.is_empty() => match &self.next {
                NextStep::Leaf => Ok(filtered),
                NextStep::Always(next) => next.filter(ctx, &filtered),
                NextStep::OnOutcome {
                    on_success: Some(next),
                    ..
                } => next.filter(ctx, &filtered),
                NextStep::OnOutcome {
                    on_success: None, ..
                } => Ok(filtered),
            },
            // Failure: the successor sees the node's input, not the empty
            // output.
            outcome => match &self.next {
                NextStep::Leaf => outcome,
                NextStep::Always(next) => next.filter(ctx, pods),
                NextStep::OnOutcome {
                    on_failure: Some(next),
                    ..
                } => next.filter(ctx, pods),
                NextStep::OnOutcome {
                    on_failure: None, ..
                } => outcome,
            },
        }
    }
}

// /// Concrete filters ///

/// Pods whose queue is below the critical congestion threshold.
pub(crate) fn low_queue_filter(config: &SchedulerConfig) -> Arc<dyn Filter> {
    let threshold = config.queue_threshold_critical;
    Arc::new(BasicFilter::from_predicate("low-queueing", move |_, pod| {
        pod.metrics.queue_depth <= threshold
    }))
}

/// Pods sharing the minimum observed queue depth.
pub(crate) fn least_queue_filter() -> Arc<dyn Filter> {
    Arc::new(BasicFilter::new(
        "least-queueing",
        Box::new(|_, pods| {
            let Some(min) = pods.iter().map(|p| p.metrics.queue_depth).min() else {
                return Ok(Vec::new());
            };
            Ok(pods
                .iter()
                .filter(|p| p.metrics.queue_depth == min)
                .cloned()
                .collect())
        }),
    ))
}

/// Pods sharing the minimum observed KV-cache utilization.
pub(crate) fn least_kv_cache_filter() -> Arc<dyn Filter> {
    Arc::new(BasicFilter::new(
        "least-kv-cache",
        Box::new(|_, pods| {
            if pods.is_empty() {
                return Ok(Vec::new());
            }
            let min = pods
                .iter()
                .map(|p| p.metrics.kv_cache_utilization)
                .fold(f64::INFINITY, f64::min);
            Ok(pods
                .iter()
                .filter(|p| p.metrics.kv_cache_utilization == min)
                .cloned()
                .collect())
        }),
    ))
}

/// Soft LoRA affinity. Identity when the request names no adapter.
///
/// Otherwise pods are split into an affinity group (adapter already loaded,
/// queue below the LoRA gate) and an availability group (free adapter slot).
/// When both exist, the affinity group wins with probability
/// `lora_affinity_threshold`; the occasional availability pick keeps the
/// adapter spreading onto fresh pods under sustained traffic.
pub(crate) fn lora_affinity_filter(config: &SchedulerConfig) -> Arc<dyn Filter> {
    let queue_gate = config.queueing_threshold_lora;
    let affinity_threshold = config.lora_affinity_threshold;
    Arc::new(BasicFilter::new(
        "lora-affinity",
        Box::new(move |ctx, pods| {
            let Some(adapter) = ctx.request.lora_adapter.as_deref() else {
                return Ok(pods.to_vec());
            };

            let mut affinity = Vec::new();
            let mut available = Vec::new();
            for pod in pods {
                if pod.metrics.active_lora_adapters.contains(adapter) {
                    if pod.metrics.queue_depth <= queue_gate {
                        affinity.push(pod.clone());
                    }
                } else if pod.metrics.has_free_lora_slot() {
                    available.push(pod.clone());
                }
            }

            if !affinity.is_empty() && !available.is_empty() {
                let use_affinity = rand::rng().random::<f64>() < affinity_threshold;
                return Ok(if use_affinity { affinity } else { available });
            }
            if !affinity.is_empty() {
                return Ok(affinity);
            }
            Ok(available)
        }),
    ))
}

/// Whether a pod can take a sheddable request without hurting critical
/// traffic: uncongested queue and KV-cache below the threshold.
pub(crate) fn has_capacity_filter(config: &SchedulerConfig) -> Arc<dyn Filter> {
    let queue_threshold = config.queue_threshold_critical;
    let kv_threshold = config.kv_cache_threshold;
    Arc::new(BasicFilter::from_predicate(
        "has-capacity-for-sheddable",
        move |_, pod| {
            pod.metrics.queue_depth <= queue_threshold
                && pod.metrics.kv_cache_utilization <= kv_threshold
        },
    ))
}

/// Terminal drop for sheddable requests once every pod is saturated.
pub(crate) fn drop_request_filter() -> Arc<dyn Filter> {
    Arc::new(BasicFilter::new(
        "drop-request",
        Box::new(|ctx, _| {
            debug!(request = ?ctx.request, "request dropped");
            Err(SchedulerError::ResourceExhausted)
        }),
    ))
}
