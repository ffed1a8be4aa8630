//! Request and per-call context types for the scheduling pipeline.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::core::{
    error::{SchedulerError, SchedulerResult},
    pod::{Pod, PodMetrics},
};

/// One inbound inference request, immutable for the duration of the call.
#[derive(Clone, Default)]
pub struct LLMRequest {
    /// Requested model name; maps to a registered model.
    pub model: String,
    /// Prompt text, used by the KV-cache scorer. May be empty.
    pub prompt: String,
    /// Client session identifier; `None` means no affinity.
    pub session_id: Option<String>,
    /// Critical requests are never shed.
    pub critical: bool,
    /// Resolved LoRA adapter when the model maps to an adapter overlay;
    /// `None` means the request names no adapter.
    pub lora_adapter: Option<String>,
}

impl LLMRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_lora_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.lora_adapter = Some(adapter.into());
        self
    }
}

// Prompts must not leak into logs; Debug carries the length only.
impl fmt::Debug for LLMRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LLMRequest")
            .field("model", &self.model)
            .field("prompt_len", &self.prompt.len())
            .field("session_id", &self.session_id)
            .field("critical", &self.critical)
            .field("lora_adapter", &self.lora_adapter)
            .finish()
    }
}

/// Point-in-time copy of one pod and its metrics, frozen at `schedule` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PodSnapshot {
    pub pod: Pod,
    pub metrics: PodMetrics,
}

/// Per-request working set handed through filters, scorers, and pickers.
#[derive(Debug, Clone)]
pub struct SchedulingContext {
    pub request: LLMRequest,
    /// Frozen ordered pod view; never mutated during the call.
    pub pods_snapshot: Vec<PodSnapshot>,
    pub cancellation: CancellationToken,
}

impl SchedulingContext {
    pub fn new(
        request: LLMRequest,
        pods_snapshot: Vec<PodSnapshot>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            request,
            pods_snapshot,
            cancellation,
        }
    }

    /// Cheap cancellation check at stage boundaries.
    pub fn check_cancelled(&self) -> SchedulerResult<()> {
        if self.cancellation.is_cancelled() {
            Err(SchedulerError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = LLMRequest::new("llama")
            .with_prompt("hello")
            .with_session_id("s1")
            .critical(true);

        assert_eq!(req.model, "llama");
        assert_eq!(req.prompt, "hello");
        assert_eq!(req.session_id.as_deref(), Some("s1"));
        assert!(req.critical);
        assert!(req.lora_adapter.is_none());
    }

    #[test]
    fn test_debug_redacts_prompt() {
        let req = LLMRequest::new("llama").with_prompt("super secret prompt");
        let rendered = format!("{:?}", req);
        assert!(!rendered.contains("super secret"));
        assert!(rendered.contains("prompt_len"));
    }

    #[test]
    fn test_cancellation_check() {
        let token = CancellationToken::new();
        let ctx = SchedulingContext::new(LLMRequest::new("llama"), Vec::new(), token.clone());
        assert!(ctx.check_cancelled().is_ok());

        token.cancel();
        assert!(matches!(
            ctx.check_cancelled(),
            Err(SchedulerError::Cancelled)
        ));
    }
}
