// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use crate::docker::DockerError;
use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// A required precondition does not hold. Raised before any side effect.
    #[error("Precondition failed: {0}")]
    #[diagnostic(code(fleet::precondition))]
    Precondition(String),

    #[error("Resource allocation failed: {0}")]
    #[diagnostic(
        code(fleet::allocation::failed),
        help("Free some local ports or pass a different starting port with --port")
    )]
    Allocation(String),

    /// A database administrative command failed. Resources created earlier in
    /// the same invocation are left in place.
    #[error("Administrative command '{step}' failed: {reason}")]
    #[diagnostic(code(fleet::database::admin))]
    AdministrativeCommand { step: String, reason: String },

    #[error("Service '{service}' in '{unit}' did not become healthy after {attempts} probes")]
    #[diagnostic(
        code(fleet::health::timeout),
        help("Containers were left running for inspection. Check them with `docker compose -p {unit} ps`")
    )]
    HealthTimeout {
        service: String,
        unit: String,
        attempts: u32,
        /// Tail of the service's logs, fetched when the gate failed.
        logs: String,
    },

    #[error("Instance '{0}' is not provisioned")]
    #[diagnostic(
        code(fleet::instance::not_provisioned),
        help("Provision it first with `fleet up`")
    )]
    NotProvisioned(String),

    #[error("State error: {0}")]
    #[diagnostic(code(fleet::state::error))]
    State(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Docker error: {0}")]
    #[diagnostic(
        code(fleet::docker::error),
        help("Check that Docker is running with `docker ps`")
    )]
    Docker(#[from] DockerError),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Operation aborted by user")]
    Aborted,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::Precondition(msg) if msg.contains("shared infrastructure") => {
                Some("Start the shared tier first with: fleet infra up".to_string())
            }
            Error::Allocation(_) => Some(
                "Pass a different starting port with --port, or stop whatever holds the range."
                    .to_string(),
            ),
            Error::AdministrativeCommand { .. } => Some(
                "Nothing was rolled back. Run `fleet down <server> <instance>` to drop whatever was created, then retry."
                    .to_string(),
            ),
            Error::HealthTimeout { unit, .. } => Some(format!(
                "The unit was left running. Inspect it with: docker compose -p {} logs",
                unit
            )),
            Error::NotProvisioned(key) => Some(format!(
                "No record exists for '{}'. List known instances with: fleet list",
                key
            )),
            Error::State(_) => Some(
                "Check permissions on the state directory (it should be owned by you, mode 0700)."
                    .to_string(),
            ),
            Error::Config(_) | Error::Yaml(_) => {
                Some("Check your fleet.yaml against the documented keys.".to_string())
            }
            Error::Docker(_) => Some("Check that Docker is running: docker ps".to_string()),
            _ => None,
        }
    }
}
