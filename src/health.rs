//! Bounded health verification of a unit's services.
//!
//! Each service starts `Pending` and is probed until it reports the
//! `healthy` sentinel or the attempt ceiling is reached, which is terminal.
//! Services are verified one after another; the first failure aborts the
//! sequence.

use crate::error::{Error, Result};
use crate::executor::Executor;
use async_trait::async_trait;
use std::time::Duration;

/// Status string a service reports once it is ready.
pub const HEALTHY: &str = "healthy";

/// Progress of one service through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Pending { attempts: u32 },
    Healthy { attempts: u32 },
    Failed { attempts: u32 },
}

impl GateState {
    pub fn new() -> Self {
        GateState::Pending { attempts: 0 }
    }

    /// Fold one probe result into the state. Terminal states never change.
    pub fn observe(self, status: Option<&str>, max_attempts: u32) -> Self {
        let GateState::Pending { attempts } = self else {
            return self;
        };
        let attempts = attempts + 1;
        if status == Some(HEALTHY) {
            GateState::Healthy { attempts }
        } else if attempts >= max_attempts {
            GateState::Failed { attempts }
        } else {
            GateState::Pending { attempts }
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GateState::Pending { .. })
    }
}

impl Default for GateState {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocking delay between probes, swappable in tests.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Short-lived helper that polls the executor for service health.
pub struct HealthGate<'a> {
    executor: &'a dyn Executor,
    sleeper: &'a dyn Sleeper,
    interval: Duration,
    max_attempts: u32,
}

impl<'a> HealthGate<'a> {
    pub fn new(
        executor: &'a dyn Executor,
        sleeper: &'a dyn Sleeper,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            executor,
            sleeper,
            interval,
            max_attempts,
        }
    }

    /// Probe one service until it is healthy or out of attempts.
    ///
    /// Returns the terminal state. Probes are separated by the interval; no
    /// sleep follows the final probe.
    pub async fn wait_for(&self, unit: &str, service: &str) -> GateState {
        let mut state = GateState::new();
        loop {
            let status = match self.executor.probe_health(unit, service).await {
                Ok(status) => status,
                Err(e) => {
                    tracing::debug!("Health probe of '{}' in '{}' failed: {}", service, unit, e);
                    None
                }
            };
            state = state.observe(status.as_deref(), self.max_attempts);

            match state {
                GateState::Healthy { attempts } => {
                    tracing::info!("Service '{}' in '{}' is healthy ({} probes)", service, unit, attempts);
                    return state;
                }
                GateState::Failed { attempts } => {
                    tracing::warn!(
                        "Service '{}' in '{}' not healthy after {} probes",
                        service,
                        unit,
                        attempts
                    );
                    return state;
                }
                GateState::Pending { attempts } => {
                    tracing::debug!(
                        "Service '{}' reported {:?} (probe {}/{}), waiting...",
                        service,
                        status,
                        attempts,
                        self.max_attempts
                    );
                    self.sleeper.sleep(self.interval).await;
                }
            }
        }
    }

    /// Verify every service in order. All must become healthy.
    ///
    /// On the first failure the service's logs are fetched and returned
    /// inside [`Error::HealthTimeout`]; the unit is left running.
    pub async fn verify(&self, unit: &str, services: &[String]) -> Result<()> {
        for service in services {
            if let GateState::Failed { attempts } = self.wait_for(unit, service).await {
                let logs = match self.executor.fetch_logs(unit, service).await {
                    Ok(logs) => logs,
                    Err(e) => format!("(could not fetch logs: {})", e),
                };
                return Err(Error::HealthTimeout {
                    service: service.clone(),
                    unit: unit.to_string(),
                    attempts,
                    logs,
                });
            }
        }
        Ok(())
    }
}
