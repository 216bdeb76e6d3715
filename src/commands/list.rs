use crate::output::UserOutput;
use instance_fleet::LifecycleController;

pub async fn run_list(
    controller: &LifecycleController,
    running: bool,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if running {
        list_running(controller, json, out).await
    } else {
        list_known(controller, json, out)
    }
}

fn list_known(
    controller: &LifecycleController,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let known = controller.list_known()?;

    if json {
        use serde_json::json;

        // Secrets are never part of machine-readable output
        let entries: Vec<_> = known
            .iter()
            .map(|(key, identity)| {
                json!({
                    "server": key.server(),
                    "instance": key.instance(),
                    "unit": controller.unit_id(key),
                    "port": identity.service_port,
                    "database": identity.database_name,
                    "cache_namespace": identity.cache_namespace_index,
                    "created_at": identity.created_at.to_rfc3339(),
                })
            })
            .collect();
        out.status(&serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    out.status("Provisioned instances:");
    out.status(&format!("{:-<60}", ""));
    if known.is_empty() {
        out.status("  No instances provisioned");
    } else {
        for (key, identity) in &known {
            out.status(&format!(
                "  {:<30} port {:<6} cache {:<4} db {}",
                key.to_string(),
                identity.service_port,
                identity.cache_namespace_index,
                identity.database_name
            ));
        }
    }
    Ok(())
}

async fn list_running(
    controller: &LifecycleController,
    json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let units = controller.list_running().await?;

    if json {
        use serde_json::json;

        let entries: Vec<_> = units
            .iter()
            .map(|unit| {
                json!({
                    "unit": unit.name,
                    "state": unit.state,
                    "ports": unit.ports,
                })
            })
            .collect();
        out.status(&serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    out.status("Units:");
    out.status(&format!("{:-<60}", ""));
    if units.is_empty() {
        out.status("  No units found");
    } else {
        for unit in &units {
            let icon = if unit.state == "running" { "+" } else { "o" };
            let ports = unit
                .ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            out.status(&format!(
                "  {} {:<30} {:<10} {}",
                icon, unit.name, unit.state, ports
            ));
        }
    }
    Ok(())
}
