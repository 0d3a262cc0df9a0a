//! Source-side live migration coordinator.
//!
//! ## Protocol
//!
//! ```text
//! Idle ──► AwaitingRemotePreflight ──► RemoteAccepted ──► Migrating ──► Completed
//!                 │        │                  │               │
//!                 │        └─► RemoteTimeout  │               └─► MigrationFailed
//!                 └──────────► PreflightRejected ◄────────────┘ (re-fetch failed)
//! ```
//!
//! A rejection reported by the destination and an exhausted poll budget are
//! absorbed: `migrate` returns `Ok` with the matching [`MigrationOutcome`].
//! Every other failure is returned unchanged as `Err`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, instrument, warn};

use crate::config::CoordinatorConfig;
use crate::context::RequestContext;
use crate::error::{MigrationError, RemoteError, Result};
use crate::rpc::{RemoteOutcome, RemoteProcedureChannel, RemoteRequest};
use crate::traits::{HypervisorDriver, PersistenceGateway};
use crate::types::{PowerState, WorkloadId, WorkloadState};

/// Where a migration is in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationPhase {
    Idle,
    AwaitingRemotePreflight,
    RemoteAccepted,
    Migrating,
    Completed,
    PreflightRejected,
    RemoteTimeout,
    MigrationFailed,
}

impl MigrationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MigrationPhase::Completed
                | MigrationPhase::PreflightRejected
                | MigrationPhase::RemoteTimeout
                | MigrationPhase::MigrationFailed
        )
    }
}

/// Observable progress of the latest migration of a workload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MigrationStatus {
    pub workload_id: WorkloadId,
    pub destination: String,
    pub phase: MigrationPhase,
    /// `preflight_status` polls issued so far
    pub poll_attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Failure detail for terminal failure phases
    pub error: Option<String>,
}

/// How a migration ended when `migrate` did not return an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MigrationOutcome {
    /// The workload now runs on `destination`.
    Completed {
        workload_id: WorkloadId,
        destination: String,
    },
    /// The destination rejected the workload; the workload was marked failed.
    Rejected {
        workload_id: WorkloadId,
        error: RemoteError,
    },
    /// The destination never finished preflight; nothing was recorded.
    TimedOut {
        workload_id: WorkloadId,
        destination: String,
        attempts: u32,
    },
}

impl MigrationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, MigrationOutcome::Completed { .. })
    }

    pub fn phase(&self) -> MigrationPhase {
        match self {
            MigrationOutcome::Completed { .. } => MigrationPhase::Completed,
            MigrationOutcome::Rejected { .. } => MigrationPhase::PreflightRejected,
            MigrationOutcome::TimedOut { .. } => MigrationPhase::RemoteTimeout,
        }
    }
}

/// Terminal answer of the remote preflight.
enum PreflightReply {
    Accepted(serde_json::Value),
    Rejected(RemoteError),
    TimedOut { attempts: u32 },
}

/// Removes a workload from the active set when dropped.
struct ActiveMigration<'a> {
    active: &'a Mutex<HashSet<WorkloadId>>,
    workload_id: WorkloadId,
}

impl Drop for ActiveMigration<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.remove(&self.workload_id);
    }
}

/// Drives live migrations away from this host.
pub struct MigrationCoordinator {
    gateway: Arc<dyn PersistenceGateway>,
    driver: Arc<dyn HypervisorDriver>,
    channel: Arc<dyn RemoteProcedureChannel>,
    config: CoordinatorConfig,
    active: Mutex<HashSet<WorkloadId>>,
    statuses: RwLock<HashMap<WorkloadId, MigrationStatus>>,
}

impl MigrationCoordinator {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        driver: Arc<dyn HypervisorDriver>,
        channel: Arc<dyn RemoteProcedureChannel>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            gateway,
            driver,
            channel,
            config,
            active: Mutex::new(HashSet::new()),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Status of the latest migration of a workload.
    pub fn status(&self, workload_id: &WorkloadId) -> Option<MigrationStatus> {
        let statuses = self.statuses.read().unwrap_or_else(|e| e.into_inner());
        statuses.get(workload_id).cloned()
    }

    /// Status of every migration this coordinator has run.
    pub fn statuses(&self) -> Vec<MigrationStatus> {
        let statuses = self.statuses.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = statuses.values().cloned().collect();
        all.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        all
    }

    /// Live-migrate `workload_id` to `destination`.
    ///
    /// Returns `Err` for anything the caller has to recover from. `Ok` means
    /// the migration either completed or failed in a way that has already
    /// been handled; inspect the [`MigrationOutcome`].
    #[instrument(
        skip(self, ctx),
        fields(request_id = %ctx.request_id, workload_id = %workload_id, destination = %destination)
    )]
    pub async fn migrate(
        &self,
        ctx: &RequestContext,
        workload_id: &WorkloadId,
        destination: &str,
    ) -> Result<MigrationOutcome> {
        let _active = self.begin(workload_id, destination)?;
        info!("Starting live migration");

        self.set_phase(workload_id, MigrationPhase::AwaitingRemotePreflight);
        let reply = self
            .await_preflight(ctx, workload_id, destination)
            .await
            .map_err(|e| self.fail(workload_id, MigrationPhase::PreflightRejected, e))?;

        match reply {
            PreflightReply::Accepted(report) => {
                debug!(report = %report, "Remote preflight accepted");
            }
            PreflightReply::Rejected(remote) => {
                error!(
                    error = %remote,
                    "Live migration failed: error at remote preflight on {}", destination
                );

                let state = WorkloadState::with_description(
                    PowerState::Failed,
                    format!("live migration to {} rejected: {}", destination, remote.kind),
                );
                self.gateway
                    .set_workload_state(workload_id, state)
                    .await
                    .map_err(|e| self.fail(workload_id, MigrationPhase::PreflightRejected, e))?;

                self.finish(workload_id, MigrationPhase::PreflightRejected, Some(remote.to_string()));
                return Ok(MigrationOutcome::Rejected {
                    workload_id: workload_id.clone(),
                    error: remote,
                });
            }
            PreflightReply::TimedOut { attempts } => {
                warn!(
                    attempts,
                    "Live migration aborted: timeout waiting for remote preflight on {}", destination
                );

                self.finish(
                    workload_id,
                    MigrationPhase::RemoteTimeout,
                    Some(format!("no preflight result after {} polls", attempts)),
                );
                return Ok(MigrationOutcome::TimedOut {
                    workload_id: workload_id.clone(),
                    destination: destination.to_string(),
                    attempts,
                });
            }
        }

        self.set_phase(workload_id, MigrationPhase::RemoteAccepted);
        let workload = self
            .gateway
            .get_workload(workload_id)
            .await
            .map_err(|e| self.fail(workload_id, MigrationPhase::PreflightRejected, e))?;

        self.set_phase(workload_id, MigrationPhase::Migrating);
        if let Err(e) = self.driver.migrate(ctx, &workload, destination).await {
            // Preflight state on the destination is left for reconciliation.
            warn!(
                error = %e,
                "Local migration failed after {} accepted the workload; destination not rolled back",
                destination
            );
            return Err(self.fail(workload_id, MigrationPhase::MigrationFailed, e));
        }

        self.gateway
            .set_workload_host(workload_id, destination)
            .await
            .map_err(|e| self.fail(workload_id, MigrationPhase::MigrationFailed, e))?;
        self.gateway
            .set_workload_state(workload_id, WorkloadState::running())
            .await
            .map_err(|e| self.fail(workload_id, MigrationPhase::MigrationFailed, e))?;

        self.finish(workload_id, MigrationPhase::Completed, None);
        info!("Live migration completed");

        Ok(MigrationOutcome::Completed {
            workload_id: workload_id.clone(),
            destination: destination.to_string(),
        })
    }

    /// Ask the destination to prepare and poll until it answers or the
    /// attempt budget runs out.
    async fn await_preflight(
        &self,
        ctx: &RequestContext,
        workload_id: &WorkloadId,
        destination: &str,
    ) -> Result<PreflightReply> {
        let request = RemoteRequest::PrepareLiveMigration {
            workload_id: workload_id.clone(),
            destination: destination.to_string(),
        };
        let mut outcome = self.channel.call(ctx, destination, request).await?;

        let interval = self.config.poll_interval();
        let mut attempts = 0u32;

        loop {
            match outcome {
                RemoteOutcome::Completed(report) => return Ok(PreflightReply::Accepted(report)),
                RemoteOutcome::Rejected(err) => return Ok(PreflightReply::Rejected(err)),
                RemoteOutcome::Pending => {}
            }

            if attempts >= self.config.preflight_poll_attempts {
                return Ok(PreflightReply::TimedOut { attempts });
            }

            tokio::time::sleep(interval).await;
            attempts += 1;
            self.record_poll(workload_id, attempts);
            debug!(attempt = attempts, "Polling remote preflight");

            let request = RemoteRequest::PreflightStatus {
                workload_id: workload_id.clone(),
            };
            outcome = self.channel.call(ctx, destination, request).await?;
        }
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    fn begin(&self, workload_id: &WorkloadId, destination: &str) -> Result<ActiveMigration<'_>> {
        {
            let mut active = self
                .active
                .lock()
                .map_err(|_| MigrationError::Unexpected("Lock poisoned".to_string()))?;
            if !active.insert(workload_id.clone()) {
                warn!("Migration already in progress");
                return Err(MigrationError::AlreadyInProgress(workload_id.to_string()));
            }
        }

        let mut statuses = self.statuses.write().unwrap_or_else(|e| e.into_inner());
        statuses.insert(
            workload_id.clone(),
            MigrationStatus {
                workload_id: workload_id.clone(),
                destination: destination.to_string(),
                phase: MigrationPhase::Idle,
                poll_attempts: 0,
                started_at: Utc::now(),
                finished_at: None,
                error: None,
            },
        );
        evict_finished(&mut statuses, self.config.status_history);

        Ok(ActiveMigration {
            active: &self.active,
            workload_id: workload_id.clone(),
        })
    }

    fn update_status(&self, workload_id: &WorkloadId, f: impl FnOnce(&mut MigrationStatus)) {
        let mut statuses = self.statuses.write().unwrap_or_else(|e| e.into_inner());
        if let Some(status) = statuses.get_mut(workload_id) {
            f(status);
        }
    }

    fn set_phase(&self, workload_id: &WorkloadId, phase: MigrationPhase) {
        debug!(phase = ?phase, "Migration phase changed");
        self.update_status(workload_id, |status| status.phase = phase);
    }

    fn record_poll(&self, workload_id: &WorkloadId, attempts: u32) {
        self.update_status(workload_id, |status| status.poll_attempts = attempts);
    }

    fn finish(&self, workload_id: &WorkloadId, phase: MigrationPhase, error: Option<String>) {
        debug!(phase = ?phase, "Migration finished");
        self.update_status(workload_id, |status| {
            status.phase = phase;
            status.finished_at = Some(Utc::now());
            status.error = error;
        });
    }

    /// Record a terminal failure and hand the error back unchanged.
    fn fail(&self, workload_id: &WorkloadId, phase: MigrationPhase, err: MigrationError) -> MigrationError {
        self.finish(workload_id, phase, Some(err.to_string()));
        err
    }
}

/// Drop the oldest finished statuses until at most `limit` remain.
/// Statuses of migrations still running are never dropped.
fn evict_finished(statuses: &mut HashMap<WorkloadId, MigrationStatus>, limit: usize) {
    if statuses.len() <= limit {
        return;
    }

    let mut finished: Vec<_> = statuses
        .values()
        .filter(|status| status.phase.is_terminal())
        .map(|status| (status.finished_at, status.workload_id.clone()))
        .collect();
    finished.sort();

    let excess = statuses.len() - limit;
    for (_, workload_id) in finished.into_iter().take(excess) {
        debug!(workload_id = %workload_id, "Evicting migration status");
        statuses.remove(&workload_id);
    }
}
