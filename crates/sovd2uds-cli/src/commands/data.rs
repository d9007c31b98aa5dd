//! Read and write commands - data items

use anyhow::Result;
use sovd2uds::{OperationKind, SovdRequest, TranslationEngine};

use super::{parse_value, run};
use crate::output::{format_value, DataRow, OutputContext};

/// Read one or more data items. Failures are reported per row.
pub async fn read(
    engine: &TranslationEngine,
    ecu: &str,
    params: &[String],
    ctx: &OutputContext,
) -> Result<()> {
    if let [param] = params {
        let value = run(engine, SovdRequest::new(ecu, OperationKind::ReadData, param)).await?;
        if ctx.format == crate::output::OutputFormat::Json {
            ctx.print_value(param, value.as_ref());
            return Ok(());
        }
        let row = DataRow {
            parameter: param.clone(),
            value: value.as_ref().map(format_value).unwrap_or_else(|| "-".to_string()),
            unit: unit(engine, ecu, param),
        };
        ctx.print(&[row]);
        return Ok(());
    }

    let mut rows = Vec::with_capacity(params.len());
    for param in params {
        let value = match engine
            .execute(&SovdRequest::new(ecu, OperationKind::ReadData, param))
            .await
        {
            Ok(value) => value.as_ref().map(format_value).unwrap_or_else(|| "-".to_string()),
            Err(e) => format!("Error: {e}"),
        };
        rows.push(DataRow {
            parameter: param.clone(),
            value,
            unit: unit(engine, ecu, param),
        });
    }
    ctx.print(&rows);
    Ok(())
}

pub async fn write(
    engine: &TranslationEngine,
    ecu: &str,
    param: &str,
    value: &str,
    ctx: &OutputContext,
) -> Result<()> {
    let request = SovdRequest::new(ecu, OperationKind::WriteData, param)
        .with_parameter("value", parse_value(value));
    run(engine, request).await?;
    ctx.success(&format!("Wrote {param}"));
    Ok(())
}

fn unit(engine: &TranslationEngine, ecu: &str, param: &str) -> String {
    engine
        .target(ecu)
        .and_then(|t| t.catalog.resolve(param).ok())
        .and_then(|m| m.unit.clone())
        .unwrap_or_default()
}
