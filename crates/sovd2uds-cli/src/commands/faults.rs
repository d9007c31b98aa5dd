//! DTC commands - read and clear diagnostic trouble codes

use anyhow::Result;
use sovd2uds::{OperationKind, SovdRequest, SovdValue, TranslationEngine};

use super::run;
use crate::output::{format_value, FaultRow, OutputContext, OutputFormat};

/// Read a DTC report: `all`, `count`, `snapshot` or `extended`
pub async fn dtc(
    engine: &TranslationEngine,
    ecu: &str,
    report: &str,
    status_mask: Option<u8>,
    code: Option<&str>,
    record: Option<u8>,
    ctx: &OutputContext,
) -> Result<()> {
    let mut request = SovdRequest::new(ecu, OperationKind::ReadDtc, report);
    if let Some(mask) = status_mask {
        request = request.with_parameter("status_mask", mask as i64);
    }
    if let Some(code) = code {
        request = request.with_parameter("dtc", code);
    }
    if let Some(record) = record {
        request = request.with_parameter("record", record as i64);
    }

    let value = run(engine, request).await?;
    match (&value, ctx.format) {
        (Some(SovdValue::Array(dtcs)), OutputFormat::Table) => {
            if dtcs.is_empty() {
                ctx.info("No DTCs stored");
                return Ok(());
            }
            let rows: Vec<FaultRow> = dtcs.iter().map(fault_row).collect();
            ctx.print(&rows);
        }
        _ => ctx.print_value(report, value.as_ref()),
    }
    Ok(())
}

/// Clear DTCs, optionally restricted to a group or to specific codes
pub async fn clear(
    engine: &TranslationEngine,
    ecu: &str,
    group: Option<&str>,
    codes: &[String],
    ctx: &OutputContext,
) -> Result<()> {
    let mut request = SovdRequest::new(ecu, OperationKind::ClearDtc, "all");
    if let Some(group) = group {
        request = request.with_parameter("group", group);
    }
    if !codes.is_empty() {
        let codes = codes.iter().map(|c| SovdValue::from(c.as_str())).collect();
        request = request.with_parameter("dtcs", SovdValue::Array(codes));
    }

    match run(engine, request).await? {
        None => ctx.success("DTCs cleared"),
        Some(report) => {
            if let Some(SovdValue::Array(missing)) = report.get("not_present") {
                if !missing.is_empty() {
                    ctx.warn(&format!(
                        "Not stored: {}",
                        format_value(&SovdValue::Array(missing.clone()))
                    ));
                }
            }
            ctx.print_value("cleared", Some(&report));
        }
    }
    Ok(())
}

fn fault_row(dtc: &SovdValue) -> FaultRow {
    let text = |v: Option<&SovdValue>| v.map(format_value).unwrap_or_else(|| "-".to_string());
    let flag = |name: &str| {
        match dtc.get("status").and_then(|s| s.get(name)).and_then(SovdValue::as_bool) {
            Some(true) => "Yes".to_string(),
            _ => "No".to_string(),
        }
    };
    FaultRow {
        code: text(dtc.get("code")),
        category: text(dtc.get("category")),
        confirmed: flag("confirmed"),
        pending: flag("pending"),
        status: dtc
            .get("status")
            .and_then(|s| s.get("raw"))
            .and_then(SovdValue::as_i64)
            .map(|raw| format!("0x{raw:02X}"))
            .unwrap_or_else(|| "-".to_string()),
    }
}
