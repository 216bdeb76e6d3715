#![allow(unused_assignments)]

//! # Instance Fleet
//!
//! Runs many isolated instances of one containerized application side by
//! side on a single host, all sharing one database server and one cache
//! server.
//!
//! ## Features
//!
//! - **Durable identity**: every instance keeps its database credentials,
//!   cache namespace, service port and encryption key across restarts
//! - **Collision-free allocation**: ports and cache namespaces are unique
//!   across every recorded instance, recomputed from disk on each allocation
//! - **Idempotent `up`**: re-running activation reuses the stored identity
//! - **Health gating**: an instance is only reported up once every service
//!   answers healthy, within a bounded number of probes
//! - **Orphan reconciliation**: storage left behind by crashed or partial
//!   teardowns is found and, with confirmation, deleted
//!
//! ## Quick Start
//!
//! ```no_run
//! use instance_fleet::{
//!     ComposeExecutor, DockerClient, FileStateStore, InstanceKey, LifecycleController,
//!     PsqlAdmin, Settings, TerminalOperator,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> instance_fleet::Result<()> {
//! let settings = Settings::load(None)?;
//! let store = Arc::new(FileStateStore::open(settings.resolved_state_dir()?)?);
//! let executor = Arc::new(ComposeExecutor::from_settings(&settings)?);
//! let admin = Arc::new(PsqlAdmin::new(
//!     DockerClient::new(settings.command_timeout()?),
//!     &settings.infra_project,
//!     &settings.database_service,
//!     &settings.admin_user,
//! ));
//!
//! let controller =
//!     LifecycleController::new(settings, store, executor, admin, Arc::new(TerminalOperator));
//! let key = InstanceKey::new("web", "alpha")?;
//! let provisioned = controller.activate(&key, None).await?;
//! println!("up on port {}", provisioned.identity.service_port);
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! One command invocation at a time. Within an invocation every step is
//! awaited before the next begins. Concurrent invocations are serialized
//! only around allocation, through [`StateStore::lock_allocations`].

pub mod allocator;
pub mod config;
pub mod database;
pub mod docker;
pub mod error;
pub mod executor;
pub mod health;
pub mod interaction;
pub mod lifecycle;
pub mod reconcile;
pub mod state;

// Re-export commonly used types
pub use allocator::{PortProbe, ResourceAllocator, TcpPortProbe};
pub use config::Settings;
pub use database::{DatabaseAdmin, PsqlAdmin};
pub use docker::DockerClient;
pub use error::{Error, Result};
pub use executor::{ComposeExecutor, Executor, RunningUnit, UnitConfig};
pub use health::{GateState, HealthGate, Sleeper, TokioSleeper};
pub use interaction::{Operator, ScriptedOperator, TerminalOperator};
pub use lifecycle::{InfraReport, InfraStatus, LifecycleController, Provisioned};
pub use reconcile::{ReconcileReport, Reconciler};
pub use state::{
    FileStateStore, InstanceIdentity, InstanceKey, MemoryStateStore, SharedInfraState,
    StateStore,
};
