//! Core abstractions for the endpoint picker
//!
//! This module contains the fundamental types used throughout the scheduler:
//! - Pod identity, metrics, and the per-pod refresh handle
//! - Pool and model registration objects
//! - Error types
//! - The periodic background task helper

pub mod error;
pub mod model;
pub mod periodic;
pub mod pod;

// Re-export commonly used types for convenience
pub use error::{SchedulerError, SchedulerResult};
pub use model::{Criticality, InferenceModel, InferencePool, ObjectMeta};
pub use periodic::PeriodicTask;
pub use pod::{MetricsClient, NamespacedName, Pod, PodMetrics, PodMetricsFactory, PodMetricsHandle};
