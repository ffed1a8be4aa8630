//! Error types for the endpoint picker core
//!
//! The variants mirror the codes surfaced to the gateway front-end: admission
//! drops, configuration races, cancellations, transient scorer failures, and
//! invariant violations.

/// Scheduling errors surfaced to the caller.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A sheddable request was dropped to protect critical traffic.
    #[error("dropping request due to limited backend resources")]
    ResourceExhausted,

    /// The inference pool has not been registered in the datastore yet.
    #[error("inference pool is not initialized in the datastore")]
    PoolNotSynced,

    /// The request's deadline expired or its caller went away.
    #[error("scheduling was cancelled")]
    Cancelled,

    /// The KV-cache indexer could not be reached or returned garbage.
    #[error("kv-cache indexer unavailable: {reason}")]
    IndexerUnavailable { reason: String },

    /// Invariant violation; with a non-empty ready pod set this is a bug.
    #[error("internal scheduling error: {message}")]
    Internal { message: String },
}

/// Result type for scheduling operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

impl SchedulerError {
    /// Transient failures the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SchedulerError::Cancelled | SchedulerError::IndexerUnavailable { .. }
        )
    }

    /// Admission failures the caller should map to back-pressure (429).
    pub fn is_admission(&self) -> bool {
        matches!(self, SchedulerError::ResourceExhausted)
    }
}

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        SchedulerError::IndexerUnavailable {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_exhausted_display() {
        let error = SchedulerError::ResourceExhausted;
        assert_eq!(
            error.to_string(),
            "dropping request due to limited backend resources"
        );
    }

    #[test]
    fn test_indexer_unavailable_display() {
        let error = SchedulerError::IndexerUnavailable {
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "kv-cache indexer unavailable: connection refused"
        );
    }

    #[test]
    fn test_classification() {
        assert!(SchedulerError::Cancelled.is_transient());
        assert!(SchedulerError::IndexerUnavailable {
            reason: "timeout".to_string()
        }
        .is_transient());
        assert!(!SchedulerError::ResourceExhausted.is_transient());

        assert!(SchedulerError::ResourceExhausted.is_admission());
        assert!(!SchedulerError::PoolNotSynced.is_admission());
        assert!(!SchedulerError::Internal {
            message: "empty candidate list".to_string()
        }
        .is_admission());
    }

    #[test]
    fn test_error_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SchedulerError>();
    }
}
