use crate::output::UserOutput;
use instance_fleet::LifecycleController;

pub async fn run_infra_up(
    controller: &LifecycleController,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let project = &controller.settings().infra_project;
    out.status(&format!("Starting shared infrastructure '{}'...", project));

    let report = controller.infra_up().await?;
    if report.created {
        out.status("Master database credential recorded.");
    }
    out.success("Shared infrastructure is healthy");
    Ok(())
}

pub async fn run_infra_down(
    controller: &LifecycleController,
    force: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if controller.infra_down(force).await? {
        out.success("Shared infrastructure removed");
    } else {
        out.warning("No shared infrastructure recorded; nothing to do");
    }
    Ok(())
}

pub async fn run_infra_status(
    controller: &LifecycleController,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let status = controller.infra_status().await?;
    let project = &controller.settings().infra_project;

    out.status(&format!("Shared infrastructure '{}':", project));
    out.status(&format!(
        "  provisioned: {}",
        if status.provisioned { "yes" } else { "no" }
    ));
    out.status(&format!(
        "  running:     {}",
        if status.running { "yes" } else { "no" }
    ));
    Ok(())
}
