//! List command - show configured components or one component's catalog

use anyhow::{Context, Result};
use sovd2uds::TranslationEngine;

use crate::output::{CatalogRow, ComponentRow, OutputContext};

pub async fn list(engine: &TranslationEngine, ecu: Option<&str>, ctx: &OutputContext) -> Result<()> {
    let Some(ecu) = ecu else {
        let rows: Vec<ComponentRow> = engine
            .components()
            .iter()
            .map(|t| ComponentRow {
                id: t.id.clone(),
                name: t.display_name().to_string(),
                transport: t.transport.kind().to_string(),
                data: t.catalog.data().count(),
                routines: t.catalog.routines().count(),
                actuators: t.catalog.actuators().count(),
            })
            .collect();
        ctx.print(&rows);
        return Ok(());
    };

    let target = engine
        .target(ecu)
        .with_context(|| format!("Unknown component '{ecu}'"))?;
    let catalog = &target.catalog;

    let data = catalog.data().map(|m| CatalogRow {
        kind: "data".to_string(),
        name: m.name.clone(),
        id: format!("0x{:04X}", m.did),
        data_type: m.data_type.to_string(),
        access: match (m.writable, m.security_level) {
            (false, _) => "read".to_string(),
            (true, 0) => "read/write".to_string(),
            (true, level) => format!("read/write (level {level})"),
        },
    });
    let routines = catalog.routines().map(|r| CatalogRow {
        kind: "routine".to_string(),
        name: r.name.clone(),
        id: format!("0x{:04X}", r.rid),
        data_type: r
            .result_type
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "bytes".to_string()),
        access: security(r.security_level),
    });
    let actuators = catalog.actuators().map(|a| CatalogRow {
        kind: "actuator".to_string(),
        name: a.name.clone(),
        id: format!("0x{:04X}", a.ioid),
        data_type: a.data_type.to_string(),
        access: security(a.security_level),
    });

    let rows: Vec<CatalogRow> = data.chain(routines).chain(actuators).collect();
    ctx.print(&rows);
    Ok(())
}

fn security(level: u8) -> String {
    if level == 0 {
        "-".to_string()
    } else {
        format!("level {level}")
    }
}
