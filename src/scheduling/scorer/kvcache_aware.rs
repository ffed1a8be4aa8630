//! KV-cache-aware scorer.
//!
//! Delegates to the external KV-cache indexer service: given the prompt, the
//! model, and the candidate pod addresses, the indexer reports a prefix-hit
//! score per pod it knows about. Pods the indexer does not score are omitted
//! and count as zero. Indexer failures are transient and surface as
//! `IndexerUnavailable`.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{PodScore, Scorer};
use crate::{
    config::KvCacheIndexerConfig,
    core::error::{SchedulerError, SchedulerResult},
    scheduling::types::{PodSnapshot, SchedulingContext},
};

/// Per-pod prefix-hit score reported by the indexer. `name` is the pod
/// address the scorer handed in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodCacheScore {
    pub name: String,
    pub score: f64,
}

/// Black-box prefix-cache index lookup.
#[async_trait]
pub trait KvCacheIndexer: Send + Sync + std::fmt::Debug {
    /// Score the given pod addresses for the prompt; the result may be any
    /// subset of the input addresses.
    async fn pod_scores(
        &self,
        prompt: &str,
        model: &str,
        pod_addresses: &[String],
    ) -> SchedulerResult<Vec<PodCacheScore>>;
}

#[derive(Debug, Serialize)]
struct ScoreRequest<'a> {
    prompt: &'a str,
    model: &'a str,
    pods: &'a [String],
}

/// HTTP client for the indexer service.
///
/// `run` drives the indexer's internal refresh loop for the lifetime of the
/// given token, keeping a cheap availability signal current so scoring
/// failures can be reported without waiting out a full request timeout.
#[derive(Debug)]
pub struct HttpKvCacheIndexer {
    config: KvCacheIndexerConfig,
    client: reqwest::Client,
    available: Arc<AtomicBool>,
}

impl HttpKvCacheIndexer {
    pub fn new(config: KvCacheIndexerConfig) -> SchedulerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SchedulerError::Internal {
                message: format!("failed to build indexer http client: {e}"),
            })?;
        Ok(Self {
            config,
            client,
            available: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Spawn the refresh loop; it stops when `cancel` fires.
    pub fn run(&self, cancel: CancellationToken) {
        let client = self.client.clone();
        let endpoint = self.config.endpoint.clone();
        let interval = self.config.refresh_interval;
        let available = Arc::clone(&self.available);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("kv-cache indexer refresh loop stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let healthy = client
                            .get(format!("{}/healthz", endpoint))
                            .send()
                            .await
                            .map(|resp| resp.status().is_success())
                            .unwrap_or(false);
                        if healthy != available.swap(healthy, Ordering::Relaxed) {
                            warn!(healthy, "kv-cache indexer availability changed");
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl KvCacheIndexer for HttpKvCacheIndexer {
    async fn pod_scores(
        &self,
        prompt: &str,
        model: &str,
        pod_addresses: &[String],
    ) -> SchedulerResult<Vec<PodCacheScore>> {
        let response = self
            .client
            .post(format!("{}/scores", self.config.endpoint))
            .json(&ScoreRequest {
                prompt,
                model,
                pods: pod_addresses,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SchedulerError::IndexerUnavailable {
                reason: format!("indexer returned status {status}"),
            });
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| SchedulerError::IndexerUnavailable {
            reason: format!("malformed indexer response: {e}"),
        })
    }
}

/// Scorer delegating to a [`KvCacheIndexer`]. Stateless per call.
#[derive(Debug)]
pub struct KvCacheAwareScorer {
    indexer: Arc<dyn KvCacheIndexer>,
}

impl KvCacheAwareScorer {
    pub fn new(indexer: Arc<dyn KvCacheIndexer>) -> Self {
        Self { indexer }
    }

    /// Build the scorer around an HTTP indexer whose refresh loop lives as
    /// long as `cancel`.
    pub fn with_http(
        config: KvCacheIndexerConfig,
        cancel: CancellationToken,
    ) -> SchedulerResult<Self> {
        let indexer = HttpKvCacheIndexer::new(config)?;
        indexer.run(cancel);
        Ok(Self::new(Arc::new(indexer)))
    }
}

#[async_trait]
impl Scorer for KvCacheAwareScorer {
    fn name(&self) -> &'static str {
        "kv-cache-aware"
    }

    async fn score_targets(
        &self,
        ctx: &SchedulingContext,
        pods: &[PodSnapshot],
    ) -> SchedulerResult<Vec<PodScore>> {
        ctx.check_cancelled()?;

        let addresses: Vec<String> = pods.iter().map(|p| p.pod.address.clone()).collect();
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let by_address: HashMap<&str, &PodSnapshot> = pods
            .iter()
            .map(|p| (p.pod.address.as_str(), p))
            .collect();

        let scores = self
            .indexer
            .pod_scores(&ctx.request.prompt, &ctx.request.model, &addresses)
            .await?;

        let scored: Vec<PodScore> = scores
            .into_iter()
            .filter_map(|entry| {
                by_address.get(entry.name.as_str()).map(|pod| PodScore {
                    pod: (*pod).clone(),
                    score: entry.score,
                })
            })
            .collect();

        debug!(
            model = %ctx.request.model,
            scored = scored.len(),
            candidates = pods.len(),
            "kv-cache scores received"
        );
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        core::pod::{NamespacedName, Pod, PodMetrics},
        scheduling::types::LLMRequest,
    };

    #[derive(Debug)]
    struct StaticIndexer {
        scores: Vec<PodCacheScore>,
        fail: bool,
    }

    #[async_trait]
    impl KvCacheIndexer for StaticIndexer {
        async fn pod_scores(
            &self,
            _prompt: &str,
            _model: &str,
            _pod_addresses: &[String],
        ) -> SchedulerResult<Vec<PodCacheScore>> {
            if self.fail {
                return Err(SchedulerError::IndexerUnavailable {
                    reason: "down".to_string(),
                });
            }
            Ok(self.scores.clone())
        }
    }

    fn snapshot(name: &str, address: &str) -> PodSnapshot {
        PodSnapshot {
            pod: Pod::new(NamespacedName::new("default", name), address),
            metrics: PodMetrics::default(),
        }
    }

    fn ctx() -> SchedulingContext {
        SchedulingContext::new(
            LLMRequest::new("llama").with_prompt("once upon a time"),
            Vec::new(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_maps_indexer_scores_to_pods() {
        let scorer = KvCacheAwareScorer::new(Arc::new(StaticIndexer {
            scores: vec![
                PodCacheScore {
                    name: "10.0.0.1:8000".to_string(),
                    score: 0.9,
                },
                PodCacheScore {
                    name: "10.0.0.9:8000".to_string(), // not a candidate
                    score: 0.5,
                },
            ],
            fail: false,
        }));
        let pods = vec![
            snapshot("a", "10.0.0.1:8000"),
            snapshot("b", "10.0.0.2:8000"),
        ];

        let scores = scorer.score_targets(&ctx(), &pods).await.unwrap();
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].pod.pod.key.name, "a");
        assert_eq!(scores[0].score, 0.9);
    }

    #[tokio::test]
    async fn test_empty_candidates_skip_the_indexer_call() {
        let scorer = KvCacheAwareScorer::new(Arc::new(StaticIndexer {
            scores: Vec::new(),
            fail: true, // would fail if called
        }));

        let scores = scorer.score_targets(&ctx(), &[]).await.unwrap();
        assert!(scores.is_empty());
    }

    #[tokio::test]
    async fn test_indexer_failure_propagates() {
        let scorer = KvCacheAwareScorer::new(Arc::new(StaticIndexer {
            scores: Vec::new(),
            fail: true,
        }));
        let pods = vec![snapshot("a", "10.0.0.1:8000")];

        assert!(matches!(
            scorer.score_targets(&ctx(), &pods).await,
            Err(SchedulerError::IndexerUnavailable { .. })
        ));
    }

    #[test]
    fn test_score_request_wire_format() {
        let pods = vec!["10.0.0.1:8000".to_string()];
        let request = ScoreRequest {
            prompt: "hello",
            model: "llama",
            pods: &pods,
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["prompt"], "hello");
        assert_eq!(wire["model"], "llama");
        assert_eq!(wire["pods"][0], "10.0.0.1:8000");
    }
}
