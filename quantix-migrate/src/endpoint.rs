//! Destination-side request handling.
//!
//! `prepare_live_migration` starts the preflight in the background and waits
//! briefly for it; if it is still running the reply is `Pending` and the
//! source polls with `preflight_status` until the result is available. A
//! finished result is handed out once and then forgotten; one nobody asks
//! for is dropped after the configured retention. A new
//! `prepare_live_migration` only joins a preflight that is still running,
//! otherwise the checks run again.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::EndpointConfig;
use crate::context::RequestContext;
use crate::error::{MigrationError, Result};
use crate::preflight::{PreflightValidator, PreflightVerdict};
use crate::rpc::{RemoteEndpoint, RemoteOutcome, RemoteRequest};
use crate::types::WorkloadId;

#[derive(Clone)]
struct FinishedPreflight {
    result: Result<PreflightVerdict>,
    at: Instant,
}

type PreflightSlot = watch::Receiver<Option<FinishedPreflight>>;

/// Still running: no result yet and the task is alive.
fn is_running(slot: &PreflightSlot) -> bool {
    slot.borrow().is_none() && slot.has_changed().is_ok()
}

/// Serves preflight requests for one destination host.
pub struct PreflightEndpoint {
    host: String,
    validator: Arc<PreflightValidator>,
    config: EndpointConfig,
    inflight: Mutex<HashMap<WorkloadId, PreflightSlot>>,
}

impl PreflightEndpoint {
    pub fn new(host: impl Into<String>, validator: Arc<PreflightValidator>, config: EndpointConfig) -> Self {
        Self {
            host: host.into(),
            validator,
            config,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Host name this endpoint answers for.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Number of preflights started but not yet collected.
    pub fn in_flight(&self) -> usize {
        self.inflight.lock().map(|m| m.len()).unwrap_or(0)
    }

    /// Drop finished results older than the retention window.
    fn prune_expired(&self, inflight: &mut HashMap<WorkloadId, PreflightSlot>) {
        let retention = self.config.result_retention();
        inflight.retain(|workload_id, slot| {
            let expired = slot
                .borrow()
                .as_ref()
                .is_some_and(|finished| finished.at.elapsed() > retention);
            if expired {
                debug!(workload_id = %workload_id, "Dropping uncollected preflight result");
            }
            !expired
        });
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<WorkloadId, PreflightSlot>>> {
        self.inflight
            .lock()
            .map_err(|_| MigrationError::Unexpected("Lock poisoned".to_string()))
    }

    /// Start (or join) the preflight for a workload and wait up to the
    /// configured reply window for it.
    #[instrument(skip(self, ctx), fields(request_id = %ctx.request_id, workload_id = %workload_id))]
    async fn start(
        &self,
        ctx: &RequestContext,
        workload_id: WorkloadId,
        destination: String,
    ) -> Result<RemoteOutcome> {
        if destination != self.host {
            return Err(MigrationError::InvalidRequest(format!(
                "preflight for {} delivered to {}",
                destination, self.host
            )));
        }

        let mut slot = {
            let mut inflight = self.lock()?;
            self.prune_expired(&mut inflight);

            let running = inflight
                .get(&workload_id)
                .filter(|slot| is_running(slot))
                .cloned();
            match running {
                Some(slot) => {
                    debug!("Preflight already running, joining it");
                    slot
                }
                None => {
                    if inflight.remove(&workload_id).is_some() {
                        debug!("Discarding earlier preflight result, checking again");
                    }

                    let (tx, rx) = watch::channel(None);
                    let validator = self.validator.clone();
                    let ctx = ctx.clone();
                    let id = workload_id.clone();

                    tokio::spawn(async move {
                        let result = validator.prepare(&ctx, &id, &destination).await;
                        let _ = tx.send(Some(FinishedPreflight {
                            result,
                            at: Instant::now(),
                        }));
                    });

                    info!("Preflight started");
                    inflight.insert(workload_id.clone(), rx.clone());
                    rx
                }
            }
        };

        let reply_wait = self.config.reply_wait();
        let _ = tokio::time::timeout(reply_wait, async {
            loop {
                let done = slot.borrow().is_some();
                if done || slot.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        self.collect(&workload_id)
    }

    /// Report the state of a preflight, removing it once finished.
    fn collect(&self, workload_id: &WorkloadId) -> Result<RemoteOutcome> {
        let mut inflight = self.lock()?;
        self.prune_expired(&mut inflight);

        let Some(slot) = inflight.get(workload_id) else {
            return Err(MigrationError::NotFound(format!(
                "no preflight in progress for workload {}",
                workload_id
            )));
        };

        let finished = slot.borrow().clone();
        let sender_gone = slot.has_changed().is_err();

        match finished {
            Some(finished) => {
                inflight.remove(workload_id);
                verdict_to_outcome(finished.result)
            }
            None if sender_gone => {
                inflight.remove(workload_id);
                warn!(workload_id = %workload_id, "Preflight task exited without a result");
                Err(MigrationError::Unexpected(format!(
                    "preflight task for workload {} exited without a result",
                    workload_id
                )))
            }
            None => Ok(RemoteOutcome::Pending),
        }
    }
}

fn verdict_to_outcome(result: Result<PreflightVerdict>) -> Result<RemoteOutcome> {
    match result? {
        PreflightVerdict::Ready(report) => {
            let value = serde_json::to_value(&report)
                .map_err(|e| MigrationError::Unexpected(format!("failed to encode preflight report: {}", e)))?;
            Ok(RemoteOutcome::Completed(value))
        }
        PreflightVerdict::Rejected(err) => Ok(RemoteOutcome::Rejected(err)),
    }
}

#[async_trait]
impl RemoteEndpoint for PreflightEndpoint {
    async fn handle(&self, ctx: &RequestContext, request: RemoteRequest) -> Result<RemoteOutcome> {
        debug!(method = request.method(), workload_id = %request.workload_id(), "Handling remote request");

        match request {
            RemoteRequest::PrepareLiveMigration {
                workload_id,
                destination,
            } => self.start(ctx, workload_id, destination).await,
            RemoteRequest::PreflightStatus { workload_id } => self.collect(&workload_id),
        }
    }
}
