//! SovdExecutor trait - the seam between an outer layer and a translation engine

use async_trait::async_trait;

use crate::models::{SovdRequest, SovdResponse};

/// Executes symbolic SOVD operations.
///
/// A REST front-end, CLI or test harness holds an `Arc<dyn SovdExecutor>` and
/// never needs to know how the operation reaches the vehicle. Failures are
/// carried inside the [`SovdResponse`] envelope rather than as `Err`, so the
/// caller can render them uniformly.
#[async_trait]
pub trait SovdExecutor: Send + Sync {
    /// Execute one request to completion
    async fn execute_request(&self, request: SovdRequest) -> SovdResponse;

    /// Identifiers of the components this executor can reach
    fn component_ids(&self) -> Vec<String>;
}
