mod infra;
mod instance;
mod list;
mod orphans;

pub use infra::{run_infra_down, run_infra_status, run_infra_up};
pub use instance::{run_down, run_show, run_up, run_update};
pub use list::run_list;
pub use orphans::run_orphans;

use crate::output::UserOutput;
use instance_fleet::allocator::mask_secret;
use instance_fleet::{InstanceIdentity, InstanceKey};

/// Print an identity, masking secrets unless asked not to.
pub(crate) fn print_identity(
    key: &InstanceKey,
    unit: &str,
    identity: &InstanceIdentity,
    show_secrets: bool,
    out: &dyn UserOutput,
) {
    let secret = |value: &str| {
        if show_secrets {
            value.to_string()
        } else {
            mask_secret(value)
        }
    };

    out.status(&format!("Instance:        {}", key));
    out.status(&format!("Unit:            {}", unit));
    out.status(&format!("Port:            {}", identity.service_port));
    out.status(&format!("Database:        {}", identity.database_name));
    out.status(&format!("Database user:   {}", identity.database_user));
    out.status(&format!("Database pass:   {}", secret(&identity.database_password)));
    out.status(&format!("Cache namespace: {}", identity.cache_namespace_index));
    out.status(&format!("Encryption key:  {}", secret(&identity.encryption_key)));
    out.status(&format!("Created:         {}", identity.created_at.to_rfc3339()));
}
