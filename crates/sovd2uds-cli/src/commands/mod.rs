//! Command implementations for sovd2uds

pub mod control;
pub mod data;
pub mod exec;
pub mod faults;
pub mod list;
pub mod session;

pub use control::{actuate, routine};
pub use data::{read, write};
pub use exec::exec;
pub use faults::{clear, dtc};
pub use list::list;
pub use session::{reset, session, unlock};

use anyhow::{Context, Result};
use sovd2uds::{SovdRequest, SovdValue, TranslationEngine};
use tracing::debug;

/// Run one request, attaching the operation to any error
async fn run(engine: &TranslationEngine, request: SovdRequest) -> Result<Option<SovdValue>> {
    debug!(
        component = %request.component_id,
        operation = %request.operation_kind,
        identifier = %request.identifier,
        "Executing request"
    );
    engine.execute(&request).await.with_context(|| {
        format!(
            "{} '{}' on '{}' failed",
            request.operation_kind, request.identifier, request.component_id
        )
    })
}

/// Interpret a command-line value: JSON when it parses, else a plain string
/// (hex strings are accepted for byte-typed items)
fn parse_value(raw: &str) -> SovdValue {
    serde_json::from_str(raw).unwrap_or_else(|_| SovdValue::from(raw))
}
