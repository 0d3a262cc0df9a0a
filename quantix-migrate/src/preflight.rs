//! Destination-side preflight for an incoming live migration.
//!
//! Runs on the host that will receive the workload. Everything the workload
//! needs there (volume exports, a fixed address, host filters, compute
//! networking) is checked or provisioned before the source host is allowed to
//! start moving memory.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::context::RequestContext;
use crate::error::{MigrationError, RemoteError, Result};
use crate::traits::{HypervisorDriver, NetworkProvisioner, PersistenceGateway};
use crate::types::{StorageLocation, WorkloadId};

/// Failure name reported when the workload has no fixed address.
pub const NO_PRIMARY_ADDRESS: &str = "NoPrimaryAddress";

/// A volume and where it is exported from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumePlacement {
    pub volume_id: u64,
    pub location: StorageLocation,
}

/// What the destination resolved and provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightReport {
    pub workload_id: WorkloadId,
    pub destination: String,
    pub volumes: Vec<VolumePlacement>,
    pub primary_address: IpAddr,
    /// Security groups the filters were built from
    pub policies: Vec<String>,
}

/// Result of a preflight that ran to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum PreflightVerdict {
    /// The destination can accept the workload.
    Ready(PreflightReport),
    /// The destination cannot accept the workload; reported to the source as
    /// a remote error rather than raised.
    Rejected(RemoteError),
}

/// Checks and provisions migration preconditions on the destination host.
pub struct PreflightValidator {
    gateway: Arc<dyn PersistenceGateway>,
    driver: Arc<dyn HypervisorDriver>,
    network: Arc<dyn NetworkProvisioner>,
}

impl PreflightValidator {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        driver: Arc<dyn HypervisorDriver>,
        network: Arc<dyn NetworkProvisioner>,
    ) -> Self {
        Self {
            gateway,
            driver,
            network,
        }
    }

    /// Prepare this host to receive `workload_id`.
    ///
    /// Lookup and provisioning failures are returned unchanged. A workload
    /// without volumes is accepted; a workload without a primary address is
    /// rejected with [`PreflightVerdict::Rejected`].
    #[instrument(
        skip(self, ctx),
        fields(request_id = %ctx.request_id, workload_id = %workload_id, destination = %destination)
    )]
    pub async fn prepare(
        &self,
        ctx: &RequestContext,
        workload_id: &WorkloadId,
        destination: &str,
    ) -> Result<PreflightVerdict> {
        info!("Starting live migration preflight");

        let workload = self.gateway.get_workload(workload_id).await?;

        let volumes = match self.gateway.volumes_for_workload(workload_id).await {
            Ok(volumes) => volumes,
            Err(MigrationError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        if volumes.is_empty() {
            warn!(workload_id = %workload_id, "Workload has no volume, skipping volume checks");
        }

        let mut placements = Vec::with_capacity(volumes.len());
        for volume in &volumes {
            let location = self.gateway.storage_location(volume.id).await?;
            debug!(volume_id = volume.id, location = %location, "Resolved volume export");
            placements.push(VolumePlacement {
                volume_id: volume.id,
                location,
            });
        }

        let Some(address) = self.gateway.primary_address(workload_id).await? else {
            warn!(workload_id = %workload_id, "Workload has no fixed address, rejecting migration");
            return Ok(PreflightVerdict::Rejected(RemoteError::new(
                destination,
                NO_PRIMARY_ADDRESS,
                format!("workload {} has no fixed address", workload_id),
            )));
        };

        let policies = self.gateway.security_policies(workload_id).await?;
        self.driver.configure_filters(&workload, &policies).await?;
        debug!(policies = policies.len(), "Host filters configured");

        self.network.configure_destination_network(ctx, &workload).await?;

        info!(
            volumes = placements.len(),
            address = %address.address,
            "Preflight finished, destination ready"
        );

        Ok(PreflightVerdict::Ready(PreflightReport {
            workload_id: workload_id.clone(),
            destination: destination.to_string(),
            volumes: placements,
            primary_address: address.address,
            policies: policies.into_iter().map(|p| p.name).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{DriverOp, MockDriver, MockNetwork, MockStore, StoreOp};
    use crate::types::{SecurityPolicySet, VolumeAttachment, Workload};
    use quantix_migrate_common::CapturedLogs;

    struct Fixture {
        store: Arc<MockStore>,
        driver: Arc<MockDriver>,
        network: Arc<MockNetwork>,
        validator: PreflightValidator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MockStore::new());
        store.insert_workload(Workload::new("i-12345", "host1"));
        store.insert_volume(
            VolumeAttachment {
                id: 1,
                workload_id: "i-12345".into(),
                host: "host1".to_string(),
                mountpoint: Some("/dev/vdb".to_string()),
            },
            StorageLocation { shelf: 3, blade: 4 },
        );
        store.insert_volume(
            VolumeAttachment {
                id: 2,
                workload_id: "i-12345".into(),
                host: "host1".to_string(),
                mountpoint: None,
            },
            StorageLocation { shelf: 3, blade: 5 },
        );
        store.set_primary_address(&"i-12345".into(), 1, "1.1.1.1".parse().unwrap());
        store.insert_policy(&"i-12345".into(), SecurityPolicySet::new(1, "default"));
        store.insert_policy(&"i-12345".into(), SecurityPolicySet::new(2, "def2"));

        let driver = Arc::new(MockDriver::new());
        let network = Arc::new(MockNetwork::new());
        let validator = PreflightValidator::new(store.clone(), driver.clone(), network.clone());

        Fixture {
            store,
            driver,
            network,
            validator,
        }
    }

    async fn prepare(fx: &Fixture) -> Result<PreflightVerdict> {
        fx.validator
            .prepare(&RequestContext::admin(), &"i-12345".into(), "host2")
            .await
    }

    #[tokio::test]
    async fn test_workload_not_found() {
        let fx = fixture();
        fx.store.fail(StoreOp::GetWorkload, MigrationError::NotFound("ERR".into()));

        let err = prepare(&fx).await.unwrap_err();
        assert_eq!(err, MigrationError::NotFound("ERR".into()));
    }

    #[tokio::test]
    async fn test_volume_lookup_not_authorized() {
        let fx = fixture();
        fx.store.fail(StoreOp::ListVolumes, MigrationError::NotAuthorized("ERR".into()));

        let err = prepare(&fx).await.unwrap_err();
        assert_eq!(err, MigrationError::NotAuthorized("ERR".into()));
    }

    #[tokio::test]
    async fn test_volume_lookup_unexpected() {
        let fx = fixture();
        fx.store.fail(StoreOp::ListVolumes, MigrationError::Unexpected("ERR".into()));

        let err = prepare(&fx).await.unwrap_err();
        assert_eq!(err, MigrationError::Unexpected("ERR".into()));
    }

    #[tokio::test]
    async fn test_no_volume_and_no_address_is_rejected() {
        let fx = fixture();
        fx.store.fail(StoreOp::ListVolumes, MigrationError::NotFound("ERR".into()));
        fx.store.remove_primary_address(&"i-12345".into());

        let logs = CapturedLogs::new();
        let verdict = {
            let _guard = logs.install();
            prepare(&fx).await.unwrap()
        };

        match verdict {
            PreflightVerdict::Rejected(err) => {
                assert_eq!(err.kind, NO_PRIMARY_ADDRESS);
                assert_eq!(err.host, "host2");
            }
            other => panic!("expected rejection, got {:?}", other),
        }
        assert!(logs.contains("has no volume"));
        assert!(fx.driver.filtered_workloads().is_empty());
    }

    #[tokio::test]
    async fn test_empty_volume_list_is_not_fatal() {
        let fx = fixture();
        fx.store.clear_volumes(&"i-12345".into());

        let verdict = prepare(&fx).await.unwrap();
        match verdict {
            PreflightVerdict::Ready(report) => assert!(report.volumes.is_empty()),
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_storage_location_failure_propagates() {
        let fx = fixture();
        fx.store.fail(StoreOp::StorageLocation, MigrationError::NotFound("no export".into()));

        let err = prepare(&fx).await.unwrap_err();
        assert_eq!(err, MigrationError::NotFound("no export".into()));
    }

    #[tokio::test]
    async fn test_address_lookup_error_propagates() {
        let fx = fixture();
        fx.store.fail(StoreOp::PrimaryAddress, MigrationError::NotFound("ERR".into()));

        let err = prepare(&fx).await.unwrap_err();
        assert_eq!(err, MigrationError::NotFound("ERR".into()));
    }

    #[tokio::test]
    async fn test_policy_lookup_failure_propagates() {
        let fx = fixture();
        fx.store.fail(StoreOp::SecurityPolicies, MigrationError::NotAuthorized("ERR".into()));

        let err = prepare(&fx).await.unwrap_err();
        assert_eq!(err, MigrationError::NotAuthorized("ERR".into()));
    }

    #[tokio::test]
    async fn test_filter_setup_not_found() {
        let fx = fixture();
        fx.driver.fail(DriverOp::ConfigureFilters, MigrationError::NotFound("ERR".into()));

        let err = prepare(&fx).await.unwrap_err();
        assert_eq!(err, MigrationError::NotFound("ERR".into()));
        assert!(fx.network.configured().is_empty());
    }

    #[tokio::test]
    async fn test_network_setup_execution_error() {
        let fx = fixture();
        fx.network.fail(MigrationError::execution("brctl addbr br100", "ERR"));

        let err = prepare(&fx).await.unwrap_err();
        assert!(matches!(err, MigrationError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_network_setup_not_found() {
        let fx = fixture();
        fx.network.fail(MigrationError::NotFound("ERR".into()));

        let err = prepare(&fx).await.unwrap_err();
        assert_eq!(err, MigrationError::NotFound("ERR".into()));
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let fx = fixture();

        let verdict = prepare(&fx).await.unwrap();
        let report = match verdict {
            PreflightVerdict::Ready(report) => report,
            other => panic!("expected ready, got {:?}", other),
        };

        assert_eq!(report.destination, "host2");
        assert_eq!(report.volumes.len(), 2);
        assert_eq!(report.volumes[0].location, StorageLocation { shelf: 3, blade: 4 });
        assert_eq!(report.primary_address.to_string(), "1.1.1.1");
        assert_eq!(report.policies, vec!["default".to_string(), "def2".to_string()]);

        assert_eq!(fx.driver.filtered_workloads(), vec![WorkloadId::new("i-12345")]);
        assert_eq!(fx.network.configured(), vec![WorkloadId::new("i-12345")]);
    }
}
