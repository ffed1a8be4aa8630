//! Scoring of candidate pods and weighted combination.
//!
//! Each scorer assigns a `[0, 1]` score per pod for a given request; the
//! manager multiplies by the scorer's weight, sums across scorers, and picks
//! the pod with the highest combined score. Scoring is all-or-nothing: one
//! failing scorer fails the request, since a ranking built from partial
//! scores is unsafe.

mod kvcache_aware;
mod session_affinity;

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use tracing::debug;

pub use kvcache_aware::{
    HttpKvCacheIndexer, KvCacheAwareScorer, KvCacheIndexer, PodCacheScore,
};
pub use session_affinity::SessionAffinityScorer;

use super::{
    picker::Picker,
    types::{PodSnapshot, SchedulingContext},
};
use crate::core::error::{SchedulerError, SchedulerResult};

/// A scored candidate.
#[derive(Debug, Clone)]
pub struct PodScore {
    pub pod: PodSnapshot,
    pub score: f64,
}

/// Assigns a score per candidate pod for a request.
///
/// Scores are in `[0, 1]` by convention; pods a scorer has nothing to say
/// about may be omitted and count as zero. Implementations are idempotent
/// and never mutate the candidates.
#[async_trait]
pub trait Scorer: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    async fn score_targets(
        &self,
        ctx: &SchedulingContext,
        pods: &[PodSnapshot],
    ) -> SchedulerResult<Vec<PodScore>>;
}

/// Runs the registered scorers and reduces their output to a single winner.
#[derive(Debug)]
pub struct ScorerManager {
    scorers: Vec<(Arc<dyn Scorer>, f64)>,
    picker: Box<dyn Picker>,
}

impl ScorerManager {
    pub fn new(picker: Box<dyn Picker>) -> Self {
        Self {
            scorers: Vec::new(),
            picker,
        }
    }

    /// Register a scorer with a positive weight.
    pub fn add_scorer(&mut self, scorer: Arc<dyn Scorer>, weight: f64) {
        self.scorers.push((scorer, weight));
    }

    /// Weighted-sum scoring over the candidates, ties broken by the picker.
    pub async fn score_targets(
        &self,
        ctx: &SchedulingContext,
        pods: &[PodSnapshot],
    ) -> SchedulerResult<PodSnapshot> {
        ctx.check_cancelled()?;
        if pods.is_empty() {
            return Err(SchedulerError::Internal {
                message: "no candidate pods to score".to_string(),
            });
        }

        // Every candidate participates, scorers only add on top.
        let mut combined: HashMap<_, f64> = pods
            .iter()
            .map(|pod| (pod.pod.key.clone(), 0.0))
            .collect();

        for (scorer, weight) in &self.scorers {
            let scores = scorer.score_targets(ctx, pods).await?;
            for entry in scores {
                if let Some(total) = combined.get_mut(&entry.pod.pod.key) {
                    *total += weight * entry.score;
                }
            }
            debug!(scorer = scorer.name(), weight, "scorer applied");
        }

        let best = combined
            .values()
            .fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        // Input order is kept so tie-breaking is stable for a fixed snapshot.
        let candidates: Vec<PodScore> = pods
            .iter()
            .filter(|pod| combined[&pod.pod.key] == best)
            .map(|pod| PodScore {
                pod: pod.clone(),
                score: best,
            })
            .collect();

        let winner = self.picker.pick(ctx, &candidates);
        debug!(pod = %winner.pod.pod.key, score = winner.score, "selected winner");
        Ok(winner.pod)
    }
}
