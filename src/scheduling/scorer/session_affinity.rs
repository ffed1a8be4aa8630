//! Session-affinity scorer.
//!
//! Routes later requests in a session to the pod the first request landed on
//! by scoring that pod 1.0 and everything else 0.0. Never fails; a missing or
//! expired session simply contributes nothing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{PodScore, Scorer};
use crate::{
    core::error::SchedulerResult,
    datastore::Datastore,
    scheduling::types::{PodSnapshot, SchedulingContext},
};

#[derive(Debug)]
pub struct SessionAffinityScorer {
    datastore: Arc<Datastore>,
}

impl SessionAffinityScorer {
    pub fn new(datastore: Arc<Datastore>) -> Self {
        Self { datastore }
    }
}

#[async_trait]
impl Scorer for SessionAffinityScorer {
    fn name(&self) -> &'static str {
        "session-affinity"
    }

    async fn score_targets(
        &self,
        ctx: &SchedulingContext,
        pods: &[PodSnapshot],
    ) -> SchedulerResult<Vec<PodScore>> {
        ctx.check_cancelled()?;

        let session_pod = ctx
            .request
            .session_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .and_then(|id| self.datastore.get_pod_for_session(id));

        if let Some(pod) = &session_pod {
            debug!(
                session_id = ctx.request.session_id.as_deref().unwrap_or(""),
                pod = %pod.key,
                "pod found for session"
            );
        }

        Ok(pods
            .iter()
            .map(|candidate| {
                let affine = session_pod
                    .as_ref()
                    .is_some_and(|pod| pod.key == candidate.pod.key);
                PodScore {
                    pod: candidate.clone(),
                    score: if affine { 1.0 } else { 0.0 },
                }
            })
            .collect())
    }
}
