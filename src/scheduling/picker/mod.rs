//! Tie-breaking pickers.
//!
//! A picker resolves the final choice once scoring leaves one or more pods
//! tied at the top. Picking is infallible; callers hand in a non-empty
//! candidate list.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Mutex,
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

use super::{
    scorer::PodScore,
    types::SchedulingContext,
};
use crate::core::pod::NamespacedName;

pub trait Picker: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Select one of the candidates. `candidates` must be non-empty.
    fn pick(&self, ctx: &SchedulingContext, candidates: &[PodScore]) -> PodScore;
}

/// Uniform random selection.
///
/// Holds its own RNG so a seeded instance yields reproducible picks.
#[derive(Debug)]
pub struct RandomPicker {
    rng: Mutex<StdRng>,
}

impl RandomPicker {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Picker for RandomPicker {
    fn name(&self) -> &'static str {
        "random"
    }

    fn pick(&self, _ctx: &SchedulingContext, candidates: &[PodScore]) -> PodScore {
        let index = self
            .rng
            .lock()
            .expect("picker rng poisoned")
            .random_range(0..candidates.len());
        candidates[index].clone()
    }
}

/// Least-recently-used selection over a process-local usage table.
///
/// The candidate with the fewest prior picks wins; ties fall through to
/// random. Usage entries for pods that have left the fleet are pruned against
/// the call's snapshot, so the table stays bounded under pod churn.
#[derive(Debug)]
pub struct LruPicker {
    random: RandomPicker,
    usage: Mutex<HashMap<NamespacedName, u64>>,
}

impl LruPicker {
    pub fn new() -> Self {
        Self {
            random: RandomPicker::new(),
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            random: RandomPicker::seeded(seed),
            usage: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for LruPicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Picker for LruPicker {
    fn name(&self) -> &'static str {
        "lru"
    }

    fn pick(&self, ctx: &SchedulingContext, candidates: &[PodScore]) -> PodScore {
        let winner = {
            let mut usage = self.usage.lock().expect("lru usage poisoned");

            let live: HashSet<&NamespacedName> =
                ctx.pods_snapshot.iter().map(|p| &p.pod.key).collect();
            usage.retain(|key, _| live.contains(key));

            let mut min_usage = u64::MAX;
            let mut best: Vec<&PodScore> = Vec::new();
            for candidate in candidates {
                let count = *usage.entry(candidate.pod.pod.key.clone()).or_insert(0);
                if count < min_usage {
                    min_usage = count;
                    best = vec![candidate];
                } else if count == min_usage {
                    best.push(candidate);
                }
            }

            let winner = if best.len() == 1 {
                best[0].clone()
            } else {
                let tied: Vec<PodScore> = best.into_iter().cloned().collect();
                self.random.pick(ctx, &tied)
            };

            *usage.entry(winner.pod.pod.key.clone()).or_insert(0) += 1;
            winner
        };

        debug!(pod = %winner.pod.pod.key, "lru picker selected pod");
        winner
    }
}
