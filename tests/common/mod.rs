//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use instance_fleet::{
    DatabaseAdmin, Error, Executor, LifecycleController, MemoryStateStore, PortProbe, Result,
    RunningUnit, ScriptedOperator, Settings, Sleeper, UnitConfig,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Executor that records every call and simulates compose volumes.
///
/// Services are healthy on their first probe unless listed in `unhealthy`
/// (never healthy) or `healthy_after` (healthy on the given probe).
#[derive(Default)]
pub struct FakeExecutor {
    pub calls: Mutex<Vec<String>>,
    pub started: Mutex<Vec<(String, UnitConfig)>>,
    pub unhealthy: Mutex<HashSet<String>>,
    pub healthy_after: Mutex<HashMap<String, u32>>,
    pub probe_errors: Mutex<bool>,
    pub probes: Mutex<HashMap<(String, String), u32>>,
    pub volumes: Mutex<BTreeSet<String>>,
    pub undeletable: Mutex<HashSet<String>>,
    pub running: Mutex<Vec<RunningUnit>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn never_healthy(self, service: &str) -> Self {
        self.unhealthy.lock().insert(service.to_string());
        self
    }

    pub fn healthy_after(self, service: &str, probes: u32) -> Self {
        self.healthy_after.lock().insert(service.to_string(), probes);
        self
    }

    pub fn with_volumes(self, names: &[&str]) -> Self {
        self.volumes
            .lock()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn probe_count(&self, unit: &str, service: &str) -> u32 {
        self.probes
            .lock()
            .get(&(unit.to_string(), service.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn last_config(&self, unit: &str) -> Option<UnitConfig> {
        self.started
            .lock()
            .iter()
            .rev()
            .find(|(name, _)| name == unit)
            .map(|(_, config)| config.clone())
    }

    pub fn volumes(&self) -> BTreeSet<String> {
        self.volumes.lock().clone()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn start(&self, unit: &str, config: &UnitConfig) -> Result<()> {
        self.calls.lock().push(format!("start {}", unit));
        self.started.lock().push((unit.to_string(), config.clone()));
        let mut volumes = self.volumes.lock();
        volumes.insert(format!("{}_data", unit));
        volumes.insert(format!("{}_temp", unit));
        Ok(())
    }

    async fn stop(&self, unit: &str, remove_volumes: bool) -> Result<()> {
        self.calls
            .lock()
            .push(format!("stop {} {}", unit, remove_volumes));
        if remove_volumes {
            let owned = format!("{}_", unit);
            self.volumes.lock().retain(|v| !v.starts_with(&owned));
        }
        Ok(())
    }

    async fn pull(&self, unit: &str, services: &[String], _config: &UnitConfig) -> Result<()> {
        self.calls
            .lock()
            .push(format!("pull {} {}", unit, services.join(",")));
        Ok(())
    }

    async fn probe_health(&self, unit: &str, service: &str) -> Result<Option<String>> {
        let count = {
            let mut probes = self.probes.lock();
            let count = probes
                .entry((unit.to_string(), service.to_string()))
                .or_insert(0);
            *count += 1;
            *count
        };
        if *self.probe_errors.lock() {
            return Err(Error::State("engine unreachable".to_string()));
        }
        if self.unhealthy.lock().contains(service) {
            return Ok(Some("unhealthy".to_string()));
        }
        match self.healthy_after.lock().get(service) {
            Some(&after) if count < after => Ok(Some("starting".to_string())),
            _ => Ok(Some("healthy".to_string())),
        }
    }

    async fn list_running_units(&self, prefix: &str) -> Result<Vec<RunningUnit>> {
        Ok(self
            .running
            .lock()
            .iter()
            .filter(|u| u.name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn list_storage_resources(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .volumes
            .lock()
            .iter()
            .filter(|v| v.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete_storage_resource(&self, name: &str) -> Result<()> {
        self.calls.lock().push(format!("rm {}", name));
        if self.undeletable.lock().contains(name) {
            return Err(Error::State(format!("volume {} is in use", name)));
        }
        self.volumes.lock().remove(name);
        Ok(())
    }

    async fn fetch_logs(&self, unit: &str, service: &str) -> Result<String> {
        self.calls.lock().push(format!("logs {} {}", unit, service));
        Ok(format!("{} crashed on boot", service))
    }
}

/// Database admin that records calls and can fail one step.
#[derive(Default)]
pub struct FakeAdmin {
    pub calls: Mutex<Vec<String>>,
    pub fail_on: Mutex<Option<&'static str>>,
}

impl FakeAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(step: &'static str) -> Self {
        let admin = Self::default();
        *admin.fail_on.lock() = Some(step);
        admin
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, step: &'static str, detail: String) -> Result<()> {
        self.calls.lock().push(format!("{} {}", step, detail));
        if *self.fail_on.lock() == Some(step) {
            return Err(Error::AdministrativeCommand {
                step: step.to_string(),
                reason: "permission denied".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseAdmin for FakeAdmin {
    async fn create_database(&self, name: &str) -> Result<()> {
        self.record("create_database", name.to_string())
    }

    async fn create_role(&self, name: &str, _password: &str) -> Result<()> {
        self.record("create_role", name.to_string())
    }

    async fn grant_all(&self, database: &str, role: &str) -> Result<()> {
        self.record("grant_all", format!("{} {}", database, role))
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        self.record("drop_database", name.to_string())
    }

    async fn drop_role(&self, name: &str) -> Result<()> {
        self.record("drop_role", name.to_string())
    }
}

/// Sleeper that returns immediately and remembers each requested delay.
#[derive(Default)]
pub struct RecordingSleeper {
    pub sleeps: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn count(&self) -> usize {
        self.sleeps.lock().len()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

/// Port probe with a fixed set of occupied ports.
#[derive(Default)]
pub struct BusyPorts(pub HashSet<u16>);

impl BusyPorts {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn of(ports: &[u16]) -> Self {
        Self(ports.iter().copied().collect())
    }
}

impl PortProbe for BusyPorts {
    fn is_free(&self, port: u16) -> bool {
        !self.0.contains(&port)
    }
}

/// A controller wired to fakes, with handles to inspect them.
pub struct Harness {
    pub controller: LifecycleController,
    pub store: Arc<MemoryStateStore>,
    pub executor: Arc<FakeExecutor>,
    pub admin: Arc<FakeAdmin>,
    pub operator: Arc<ScriptedOperator>,
    pub sleeper: Arc<RecordingSleeper>,
}

pub struct HarnessBuilder {
    store: MemoryStateStore,
    executor: FakeExecutor,
    admin: FakeAdmin,
    operator: ScriptedOperator,
    ports: BusyPorts,
}

impl HarnessBuilder {
    /// Shared tier already provisioned, every port free, all healthy.
    pub fn new() -> Self {
        Self {
            store: MemoryStateStore::with_infra("master-secret"),
            executor: FakeExecutor::new(),
            admin: FakeAdmin::new(),
            operator: ScriptedOperator::new(),
            ports: BusyPorts::none(),
        }
    }

    pub fn without_infra(mut self) -> Self {
        self.store = MemoryStateStore::new();
        self
    }

    pub fn executor(mut self, executor: FakeExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn admin(mut self, admin: FakeAdmin) -> Self {
        self.admin = admin;
        self
    }

    pub fn operator(mut self, operator: ScriptedOperator) -> Self {
        self.operator = operator;
        self
    }

    pub fn busy_ports(mut self, ports: &[u16]) -> Self {
        self.ports = BusyPorts::of(ports);
        self
    }

    pub fn build(self) -> Harness {
        let store = Arc::new(self.store);
        let executor = Arc::new(self.executor);
        let admin = Arc::new(self.admin);
        let operator = Arc::new(self.operator);
        let sleeper = Arc::new(RecordingSleeper::default());

        let controller = LifecycleController::new(
            Settings::default(),
            store.clone(),
            executor.clone(),
            admin.clone(),
            operator.clone(),
        )
        .with_port_probe(Box::new(self.ports))
        .with_sleeper(sleeper.clone());

        Harness {
            controller,
            store,
            executor,
            admin,
            operator,
            sleeper,
        }
    }
}

pub fn key(server: &str, instance: &str) -> instance_fleet::InstanceKey {
    instance_fleet::InstanceKey::new(server, instance).unwrap()
}
