//! Exec command - run a raw request and print the response envelope

use anyhow::{Context, Result};
use sovd2uds::{SovdExecutor, SovdRequest, TranslationEngine};

use crate::output::OutputContext;

/// Run a request given as JSON, e.g.
/// `{"component_id":"engine","operation_kind":"read_data","identifier":"vin"}`.
///
/// Returns whether the request succeeded; the envelope is always printed.
pub async fn exec(engine: &TranslationEngine, json: &str, ctx: &OutputContext) -> Result<bool> {
    let request: SovdRequest = serde_json::from_str(json).context("Invalid request JSON")?;
    let response = engine.execute_request(request).await;
    ctx.print_json(&response);
    Ok(response.is_success())
}
