//! Actuator and routine commands

use anyhow::Result;
use sovd2uds::{OperationKind, SovdRequest, SovdValue, TranslationEngine};

use super::{parse_value, run};
use crate::output::OutputContext;

/// Control an actuator: `short_term_adjustment` (with a value),
/// `return_control`, `reset_to_default` or `freeze`
pub async fn actuate(
    engine: &TranslationEngine,
    ecu: &str,
    actuator: &str,
    action: Option<&str>,
    value: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    let mut request = SovdRequest::new(ecu, OperationKind::ControlActuator, actuator);
    if let Some(action) = action {
        request = request.with_parameter("action", action);
    }
    if let Some(value) = value {
        request = request.with_parameter("value", parse_value(value));
    }
    let state = run(engine, request).await?;
    ctx.print_value(actuator, state.as_ref());
    Ok(())
}

/// Start or stop a routine, or fetch its results
pub async fn routine(
    engine: &TranslationEngine,
    ecu: &str,
    name: &str,
    action: &str,
    data: Option<&str>,
    ctx: &OutputContext,
) -> Result<()> {
    let mut request =
        SovdRequest::new(ecu, OperationKind::ExecuteRoutine, name).with_parameter("action", action);
    if let Some(data) = data {
        request = request.with_parameter("data", SovdValue::from(data));
    }
    let result = run(engine, request).await?;
    ctx.print_value(name, result.as_ref());
    Ok(())
}
