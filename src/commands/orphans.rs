use crate::output::UserOutput;
use instance_fleet::LifecycleController;

pub async fn run_orphans(
    controller: &LifecycleController,
    dry_run: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let report = controller.reconciler().run(dry_run).await?;

    if report.candidates.is_empty() {
        out.success("No orphaned volumes found");
        return Ok(());
    }

    if dry_run {
        out.status(&format!(
            "{} orphaned volume(s) (dry run, nothing deleted):",
            report.candidates.len()
        ));
        for name in &report.candidates {
            out.status(&format!("  {}", name));
        }
        return Ok(());
    }

    for name in &report.deleted {
        out.status(&format!("  deleted {}", name));
    }
    for name in &report.skipped {
        out.status(&format!("  kept    {}", name));
    }
    for (name, reason) in &report.failed {
        out.warning(&format!("  failed  {} ({})", name, reason));
    }
    out.blank();
    out.status(&format!(
        "Deleted {}, kept {}, failed {}",
        report.deleted.len(),
        report.skipped.len(),
        report.failed.len()
    ));

    if !report.failed.is_empty() {
        anyhow::bail!("{} volume(s) could not be deleted", report.failed.len());
    }
    Ok(())
}
