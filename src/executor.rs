//! The orchestration engine that runs deployment units.
//!
//! The core only talks to [`Executor`]. [`ComposeExecutor`] drives
//! `docker compose`, one compose project per deployment unit.

use crate::config::Settings;
use crate::docker::{ContainerRow, DockerClient};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Lines of log output surfaced when a service fails its health gate.
const FAILURE_LOG_TAIL: usize = 100;

/// Configuration handed to a deployment unit when it starts.
///
/// Values may be secrets, so `Debug` prints variable names only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct UnitConfig {
    vars: BTreeMap<String, String>,
}

impl UnitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: impl ToString) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }
}

impl fmt::Debug for UnitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.vars.keys()).finish()
    }
}

/// A deployment unit the executor currently knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningUnit {
    pub name: String,
    pub state: String,
    /// Host ports published by any of the unit's services.
    pub ports: Vec<u16>,
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Start a unit, recreating in place whatever changed since the last start.
    async fn start(&self, unit: &str, config: &UnitConfig) -> Result<()>;

    async fn stop(&self, unit: &str, remove_volumes: bool) -> Result<()>;

    /// Fetch newer images for `services` of a unit.
    async fn pull(&self, unit: &str, services: &[String], config: &UnitConfig) -> Result<()>;

    /// Health reported by a service, or `None` if it is not reporting yet.
    async fn probe_health(&self, unit: &str, service: &str) -> Result<Option<String>>;

    async fn list_running_units(&self, prefix: &str) -> Result<Vec<RunningUnit>>;

    async fn list_storage_resources(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete_storage_resource(&self, name: &str) -> Result<()>;

    async fn fetch_logs(&self, unit: &str, service: &str) -> Result<String>;
}

/// [`Executor`] backed by `docker compose`.
///
/// The shared tier and the instances use different compose files; the file is
/// chosen by whether the unit is the infra project.
pub struct ComposeExecutor {
    client: DockerClient,
    infra_project: String,
    infra_compose_file: PathBuf,
    instance_compose_file: PathBuf,
}

impl ComposeExecutor {
    pub fn new(
        client: DockerClient,
        infra_project: String,
        infra_compose_file: PathBuf,
        instance_compose_file: PathBuf,
    ) -> Self {
        Self {
            client,
            infra_project,
            infra_compose_file,
            instance_compose_file,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self::new(
            DockerClient::new(settings.command_timeout()?),
            settings.infra_project.clone(),
            settings.infra_compose_file.clone(),
            settings.instance_compose_file.clone(),
        ))
    }

    fn compose_file(&self, unit: &str) -> &PathBuf {
        if unit == self.infra_project {
            &self.infra_compose_file
        } else {
            &self.instance_compose_file
        }
    }
}

#[async_trait]
impl Executor for ComposeExecutor {
    async fn start(&self, unit: &str, config: &UnitConfig) -> Result<()> {
        tracing::info!("Starting unit '{}' with {:?}", unit, config);
        self.client
            .compose_up(unit, self.compose_file(unit), config.vars())
            .await?;
        Ok(())
    }

    async fn stop(&self, unit: &str, remove_volumes: bool) -> Result<()> {
        tracing::info!("Stopping unit '{}' (remove volumes: {})", unit, remove_volumes);
        self.client.compose_down(unit, remove_volumes).await?;
        Ok(())
    }

    async fn pull(&self, unit: &str, services: &[String], config: &UnitConfig) -> Result<()> {
        tracing::info!("Pulling images for '{}': {}", unit, services.join(", "));
        self.client
            .compose_pull(unit, self.compose_file(unit), services, config.vars())
            .await?;
        Ok(())
    }

    async fn probe_health(&self, unit: &str, service: &str) -> Result<Option<String>> {
        let Some(container) = self.client.compose_container_id(unit, service).await? else {
            return Ok(None);
        };
        Ok(self.client.health_status(&container).await?)
    }

    async fn list_running_units(&self, prefix: &str) -> Result<Vec<RunningUnit>> {
        let rows = self.client.ps_projects(prefix).await?;
        Ok(group_units(rows))
    }

    async fn list_storage_resources(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self.client.volume_ls(prefix).await?)
    }

    async fn delete_storage_resource(&self, name: &str) -> Result<()> {
        self.client.volume_rm(name).await?;
        Ok(())
    }

    async fn fetch_logs(&self, unit: &str, service: &str) -> Result<String> {
        Ok(self
            .client
            .compose_logs(unit, service, FAILURE_LOG_TAIL)
            .await?)
    }
}

/// Collapse per-container rows into one entry per project.
///
/// A unit counts as running if any of its containers is.
fn group_units(rows: Vec<ContainerRow>) -> Vec<RunningUnit> {
    let mut units: BTreeMap<String, RunningUnit> = BTreeMap::new();
    for row in rows {
        let entry = units.entry(row.project.clone()).or_insert_with(|| RunningUnit {
            name: row.project.clone(),
            state: row.state.clone(),
            ports: Vec::new(),
        });
        if row.state == "running" {
            entry.state = row.state.clone();
        }
        for port in parse_published_ports(&row.ports) {
            if !entry.ports.contains(&port) {
                entry.ports.push(port);
            }
        }
    }
    units
        .into_values()
        .map(|mut unit| {
            unit.ports.sort_unstable();
            unit
        })
        .collect()
}

/// Host ports from a `docker ps` ports column such as
/// `0.0.0.0:5678->5678/tcp, :::5678->5678/tcp, 6379/tcp`.
pub fn parse_published_ports(column: &str) -> Vec<u16> {
    let mut ports = Vec::new();
    for mapping in column.split(',') {
        let Some((host, _container)) = mapping.trim().split_once("->") else {
            // Exposed but not published
            continue;
        };
        let Some(port) = host.rsplit(':').next().and_then(|p| p.parse::<u16>().ok()) else {
            continue;
        };
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports
}
