//! Session, unlock and reset commands

use anyhow::Result;
use sovd2uds::{OperationKind, SovdRequest, TranslationEngine};
use tracing::warn;

use super::run;
use crate::output::OutputContext;

/// Change diagnostic session
pub async fn session(
    engine: &TranslationEngine,
    ecu: &str,
    session_type: &str,
    ctx: &OutputContext,
) -> Result<()> {
    let value = run(
        engine,
        SovdRequest::new(ecu, OperationKind::SessionControl, session_type),
    )
    .await?;
    ctx.print_value("session", value.as_ref());
    Ok(())
}

/// Unlock a security level with the target's configured key algorithm
pub async fn unlock(
    engine: &TranslationEngine,
    ecu: &str,
    level: u8,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!("Requesting security access level {level}..."));
    let value = run(
        engine,
        SovdRequest::new(ecu, OperationKind::SecurityAccess, level.to_string()),
    )
    .await?;
    match ctx.format {
        crate::output::OutputFormat::Json => ctx.print_value("security", value.as_ref()),
        crate::output::OutputFormat::Table => ctx.success("Security access granted"),
    }
    Ok(())
}

/// Reset the ECU: hard, key_off_on or soft
pub async fn reset(
    engine: &TranslationEngine,
    ecu: &str,
    reset_type: &str,
    ctx: &OutputContext,
) -> Result<()> {
    warn!(ecu, reset_type, "Requesting ECU reset");
    let value = run(
        engine,
        SovdRequest::new(ecu, OperationKind::EcuReset, reset_type),
    )
    .await?;
    match ctx.format {
        crate::output::OutputFormat::Json => ctx.print_value("reset", value.as_ref()),
        crate::output::OutputFormat::Table => {
            ctx.success(&format!("ECU '{ecu}' reset ({reset_type})"))
        }
    }
    Ok(())
}
