//! Instance lifecycle: provision, activate, update, deactivate.
//!
//! `LifecycleController` is the only component that sequences multiple
//! steps. Every collaborator call is awaited before the next one starts, so
//! administrative commands, unit starts and health probes happen strictly in
//! order. An interrupted invocation leaves whatever it already did in place;
//! re-running `activate` reuses the persisted identity and carries on.

use crate::allocator::{generate_secret, PortProbe, ResourceAllocator, TcpPortProbe};
use crate::config::Settings;
use crate::database::DatabaseAdmin;
use crate::error::{Error, Result};
use crate::executor::{Executor, RunningUnit, UnitConfig};
use crate::health::{HealthGate, Sleeper, TokioSleeper};
use crate::interaction::Operator;
use crate::reconcile::Reconciler;
use crate::state::{InstanceIdentity, InstanceKey, SharedInfraState, StateStore};
use chrono::Utc;
use std::sync::Arc;

/// Outcome of provision-or-reuse.
#[derive(Debug, Clone)]
pub struct Provisioned {
    pub key: InstanceKey,
    pub identity: InstanceIdentity,
    /// `false` when an existing record was reused unchanged.
    pub created: bool,
}

/// Outcome of bringing the shared tier up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfraReport {
    /// `true` when the master credential was created by this call.
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfraStatus {
    pub provisioned: bool,
    pub running: bool,
}

pub struct LifecycleController {
    settings: Settings,
    store: Arc<dyn StateStore>,
    executor: Arc<dyn Executor>,
    admin: Arc<dyn DatabaseAdmin>,
    operator: Arc<dyn Operator>,
    sleeper: Arc<dyn Sleeper>,
    allocator: ResourceAllocator,
}

impl LifecycleController {
    pub fn new(
        settings: Settings,
        store: Arc<dyn StateStore>,
        executor: Arc<dyn Executor>,
        admin: Arc<dyn DatabaseAdmin>,
        operator: Arc<dyn Operator>,
    ) -> Self {
        let allocator = ResourceAllocator::from_settings(&settings, Box::new(TcpPortProbe));
        Self {
            settings,
            store,
            executor,
            admin,
            operator,
            sleeper: Arc::new(TokioSleeper),
            allocator,
        }
    }

    /// Replace the host port probe (tests use a scripted one).
    pub fn with_port_probe(mut self, probe: Box<dyn PortProbe>) -> Self {
        self.allocator = ResourceAllocator::from_settings(&self.settings, probe);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn unit_id(&self, key: &InstanceKey) -> String {
        key.unit_id(&self.settings.unit_prefix)
    }

    fn health_gate(&self) -> Result<HealthGate<'_>> {
        Ok(HealthGate::new(
            self.executor.as_ref(),
            self.sleeper.as_ref(),
            self.settings.health_interval()?,
            self.settings.health_attempts,
        ))
    }

    fn require_infra(&self) -> Result<SharedInfraState> {
        self.store.get_infra()?.ok_or_else(|| {
            Error::Precondition("shared infrastructure is not provisioned".to_string())
        })
    }

    /// Refuse a new key whose database, role or unit is already owned by
    /// another record (possible with hand-edited records).
    fn check_name_collisions(
        &self,
        key: &InstanceKey,
        existing: &[(InstanceKey, InstanceIdentity)],
    ) -> Result<()> {
        let database = key.database_name();
        let unit = self.unit_id(key);
        for (other, identity) in existing.iter().filter(|(k, _)| k != key) {
            if identity.database_name == database || identity.database_user == database {
                return Err(Error::Precondition(format!(
                    "database '{}' already belongs to '{}'",
                    database, other
                )));
            }
            if self.unit_id(other) == unit {
                return Err(Error::Precondition(format!(
                    "unit '{}' already belongs to '{}'",
                    unit, other
                )));
            }
        }
        Ok(())
    }

    /// Configuration surface handed to an instance's unit.
    pub fn unit_config(&self, key: &InstanceKey, identity: &InstanceIdentity) -> UnitConfig {
        UnitConfig::new()
            .set("INSTANCE_SERVER", key.server())
            .set("INSTANCE_NAME", key.instance())
            .set("FLEET_PORT", identity.service_port)
            .set("DB_POSTGRESDB_DATABASE", &identity.database_name)
            .set("DB_POSTGRESDB_USER", &identity.database_user)
            .set("DB_POSTGRESDB_PASSWORD", &identity.database_password)
            .set("QUEUE_BULL_REDIS_DB", identity.cache_namespace_index)
            .set("ENCRYPTION_KEY", &identity.encryption_key)
    }

    // ========================================================================
    // Shared infrastructure
    // ========================================================================

    /// Bring the shared database/cache tier up, creating its master
    /// credential on first use.
    pub async fn infra_up(&self) -> Result<InfraReport> {
        let (state, created) = match self.store.get_infra()? {
            Some(state) => (state, false),
            None => {
                let entered = self
                    .operator
                    .prompt_secret("Master database password (leave empty to generate)")?;
                let admin_password = if entered.is_empty() {
                    generate_secret()
                } else {
                    entered
                };
                let state = SharedInfraState {
                    admin_password,
                    created_at: Utc::now(),
                };
                // Persist before starting so a failed start never loses the credential
                self.store.put_infra(&state)?;
                tracing::info!("Recorded new shared infrastructure credential");
                (state, true)
            }
        };

        let project = &self.settings.infra_project;
        let config = UnitConfig::new()
            .set("POSTGRES_USER", &self.settings.admin_user)
            .set("POSTGRES_PASSWORD", &state.admin_password);
        self.executor.start(project, &config).await?;

        let services = [
            self.settings.database_service.clone(),
            self.settings.cache_service.clone(),
        ];
        self.health_gate()?.verify(project, &services).await?;
        Ok(InfraReport { created })
    }

    /// Tear the shared tier down and wipe its storage.
    ///
    /// Refuses while instances are provisioned unless `force` is set, and
    /// always asks the operator first. Returns `false` if nothing was recorded.
    pub async fn infra_down(&self, force: bool) -> Result<bool> {
        if self.store.get_infra()?.is_none() {
            return Ok(false);
        }

        let known = self.store.list()?;
        if !known.is_empty() && !force {
            return Err(Error::Precondition(format!(
                "{} instance(s) still provisioned; tear them down first or pass --force",
                known.len()
            )));
        }

        let question = format!(
            "Tear down '{}' and permanently delete all of its data?",
            self.settings.infra_project
        );
        if !self.operator.confirm(&question)? {
            return Err(Error::Aborted);
        }

        self.executor
            .stop(&self.settings.infra_project, true)
            .await?;
        self.store.delete_infra()?;
        tracing::info!("Shared infrastructure removed");
        Ok(true)
    }

    pub async fn infra_status(&self) -> Result<InfraStatus> {
        let provisioned = self.store.get_infra()?.is_some();
        let running = self
            .executor
            .list_running_units(&self.settings.infra_project)
            .await?
            .iter()
            .any(|unit| unit.name == self.settings.infra_project && unit.state == "running");
        Ok(InfraStatus {
            provisioned,
            running,
        })
    }

    // ========================================================================
    // Instances
    // ========================================================================

    /// Reuse the stored identity for `key`, or allocate, create the database
    /// objects and persist a new one.
    ///
    /// A failed administrative command aborts without undoing earlier ones.
    pub async fn provision_or_reuse(
        &self,
        key: &InstanceKey,
        preferred_port: Option<u16>,
    ) -> Result<Provisioned> {
        self.require_infra()?;

        if let Some(identity) = self.store.get(key)? {
            tracing::info!("Reusing identity of '{}'", key);
            return Ok(Provisioned {
                key: key.clone(),
                identity,
                created: false,
            });
        }

        let _guard = self.store.lock_allocations()?;

        // Another invocation may have finished while we waited for the lock
        if let Some(identity) = self.store.get(key)? {
            return Ok(Provisioned {
                key: key.clone(),
                identity,
                created: false,
            });
        }

        let existing = self.store.list()?;
        self.check_name_collisions(key, &existing)?;
        let identity = self.allocator.allocate(key, &existing, preferred_port)?;

        self.admin.create_database(&identity.database_name).await?;
        self.admin
            .create_role(&identity.database_user, &identity.database_password)
            .await?;
        self.admin
            .grant_all(&identity.database_name, &identity.database_user)
            .await?;

        self.store.put(key, &identity)?;
        tracing::info!("Provisioned '{}'", key);

        Ok(Provisioned {
            key: key.clone(),
            identity,
            created: true,
        })
    }

    /// Provision (or reuse) an instance, start its unit and wait for every
    /// service to become healthy.
    pub async fn activate(
        &self,
        key: &InstanceKey,
        preferred_port: Option<u16>,
    ) -> Result<Provisioned> {
        let provisioned = self.provision_or_reuse(key, preferred_port).await?;

        let unit = self.unit_id(key);
        let config = self.unit_config(key, &provisioned.identity);
        self.executor.start(&unit, &config).await?;
        self.health_gate()?
            .verify(&unit, &self.settings.services)
            .await?;

        tracing::info!(
            "'{}' is up on port {}",
            key,
            provisioned.identity.service_port
        );
        Ok(provisioned)
    }

    /// Pull newer images and recreate an existing instance in place.
    pub async fn update(&self, key: &InstanceKey) -> Result<InstanceIdentity> {
        let identity = self
            .store
            .get(key)?
            .ok_or_else(|| Error::NotProvisioned(key.to_string()))?;
        self.require_infra()?;

        let unit = self.unit_id(key);
        let config = self.unit_config(key, &identity);
        self.executor
            .pull(&unit, &self.settings.image_services(), &config)
            .await?;
        self.executor.start(&unit, &config).await?;
        self.health_gate()?
            .verify(&unit, &self.settings.services)
            .await?;
        Ok(identity)
    }

    /// Stop an instance, drop its database objects and forget its identity.
    ///
    /// Returns `false` if there was nothing to tear down.
    pub async fn deactivate(&self, key: &InstanceKey) -> Result<bool> {
        let Some(identity) = self.store.get(key)? else {
            tracing::info!("'{}' is not provisioned; nothing to do", key);
            return Ok(false);
        };

        self.executor.stop(&self.unit_id(key), true).await?;

        if self.store.get_infra()?.is_some() {
            self.admin.drop_database(&identity.database_name).await?;
            self.admin.drop_role(&identity.database_user).await?;
        } else {
            // The shared tier's storage is gone, and the database with it
            tracing::warn!(
                "Shared infrastructure not provisioned; skipping database cleanup for '{}'",
                key
            );
        }

        self.store.delete(key)?;
        tracing::info!("Deprovisioned '{}'", key);
        Ok(true)
    }

    /// The stored identity of one instance.
    pub fn show(&self, key: &InstanceKey) -> Result<InstanceIdentity> {
        self.store
            .get(key)?
            .ok_or_else(|| Error::NotProvisioned(key.to_string()))
    }

    /// Every persisted identity, running or not.
    pub fn list_known(&self) -> Result<Vec<(InstanceKey, InstanceIdentity)>> {
        self.store.list()
    }

    /// Units the executor reports under this tool's naming convention.
    ///
    /// May include units without a record (after a crash) and omit known
    /// instances that are stopped.
    pub async fn list_running(&self) -> Result<Vec<RunningUnit>> {
        let prefix = format!("{}-", self.settings.unit_prefix);
        let units = self.executor.list_running_units(&prefix).await?;
        Ok(units
            .into_iter()
            .filter(|unit| unit.name != self.settings.infra_project)
            .collect())
    }

    pub fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(
            self.store.as_ref(),
            self.executor.as_ref(),
            self.operator.as_ref(),
            &self.settings.unit_prefix,
            &self.settings.infra_project,
        )
    }
}
