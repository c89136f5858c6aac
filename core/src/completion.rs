//! Post-response decision hook.

use async_trait::async_trait;

use crate::api::ApiDefinition;
use crate::provider::DataResult;

/// What to do with a received result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionDecision {
    /// Deliver the result to the caller.
    Proceed,
    /// Run the request again from the pre-send plugin stage.
    Retry,
}

/// Decides whether a request is finished. Runs after the post-receive plugin
/// hooks and may suspend, e.g. to refresh credentials before a retry.
#[async_trait]
pub trait CompletionStrategy: Send + Sync {
    async fn should_finish(&self, result: &DataResult, api: &ApiDefinition) -> CompletionDecision;
}

/// Always proceeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProceedStrategy;

#[async_trait]
impl CompletionStrategy for ProceedStrategy {
    async fn should_finish(&self, _result: &DataResult, _api: &ApiDefinition) -> CompletionDecision {
        CompletionDecision::Proceed
    }
}
