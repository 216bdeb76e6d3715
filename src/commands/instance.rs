use super::print_identity;
use crate::output::UserOutput;
use instance_fleet::{InstanceKey, LifecycleController};

pub async fn run_up(
    controller: &LifecycleController,
    key: &InstanceKey,
    port: Option<u16>,
    show_secrets: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let unit = controller.unit_id(key);
    out.status(&format!("Starting {}...", unit));

    let provisioned = controller.activate(key, port).await?;
    if !provisioned.created && port.is_some_and(|p| p != provisioned.identity.service_port) {
        out.warning(&format!(
            "{} was already provisioned; keeping port {}",
            key, provisioned.identity.service_port
        ));
    }

    out.success(&format!(
        "{} is up on port {}",
        key, provisioned.identity.service_port
    ));
    out.blank();
    print_identity(key, &unit, &provisioned.identity, show_secrets, out);
    Ok(())
}

pub async fn run_update(
    controller: &LifecycleController,
    key: &InstanceKey,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    out.status(&format!("Updating {}...", controller.unit_id(key)));
    let identity = controller.update(key).await?;
    out.success(&format!("{} updated, up on port {}", key, identity.service_port));
    Ok(())
}

pub async fn run_down(
    controller: &LifecycleController,
    key: &InstanceKey,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    out.progress(&format!("  Removing {}...", controller.unit_id(key)));
    match controller.deactivate(key).await {
        Ok(true) => {
            out.finish_progress(" done");
            Ok(())
        }
        Ok(false) => {
            out.finish_progress(" not provisioned, nothing to do");
            Ok(())
        }
        Err(e) => {
            out.finish_progress(" failed");
            Err(e.into())
        }
    }
}

pub fn run_show(
    controller: &LifecycleController,
    key: &InstanceKey,
    show_secrets: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let identity = controller.show(key)?;
    print_identity(key, &controller.unit_id(key), &identity, show_secrets, out);
    Ok(())
}
