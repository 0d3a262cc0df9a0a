//! Collaborator interfaces used by the preflight validator and coordinator.
//!
//! Implementations live outside this crate (control-plane database, libvirt
//! driver, bridge/VLAN provisioning). The [`crate::mock`] module provides
//! in-memory versions for tests and development nodes.

use async_trait::async_trait;

use crate::context::RequestContext;
use crate::error::Result;
use crate::types::*;

/// Access to the shared control-plane records.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    // =========================================================================
    // Lookups
    // =========================================================================

    /// Get a workload record. Fails with `NotFound` when absent.
    async fn get_workload(&self, id: &WorkloadId) -> Result<Workload>;

    /// Volumes attached to a workload.
    ///
    /// Implementations may return either an empty list or `NotFound` when the
    /// workload has no volumes.
    async fn volumes_for_workload(&self, id: &WorkloadId) -> Result<Vec<VolumeAttachment>>;

    /// Export location of a volume.
    async fn storage_location(&self, volume_id: u64) -> Result<StorageLocation>;

    /// Primary fixed address of a workload.
    ///
    /// `Ok(None)` means the lookup worked and nothing is assigned.
    async fn primary_address(&self, id: &WorkloadId) -> Result<Option<NetworkAddressAssignment>>;

    /// Security groups applied to a workload.
    async fn security_policies(&self, id: &WorkloadId) -> Result<Vec<SecurityPolicySet>>;

    // =========================================================================
    // Updates
    // =========================================================================

    /// Set state code and description in one write.
    async fn set_workload_state(&self, id: &WorkloadId, state: WorkloadState) -> Result<()>;

    /// Record the host now running the workload.
    async fn set_workload_host(&self, id: &WorkloadId, host: &str) -> Result<()>;
}

/// Hypervisor operations needed on either end of a migration.
#[async_trait]
pub trait HypervisorDriver: Send + Sync {
    /// (Re)create host network filters for the workload (destination side).
    async fn configure_filters(
        &self,
        workload: &Workload,
        policies: &[SecurityPolicySet],
    ) -> Result<()>;

    /// Live-migrate the workload to `destination` (source side).
    async fn migrate(
        &self,
        ctx: &RequestContext,
        workload: &Workload,
        destination: &str,
    ) -> Result<()>;
}

/// Compute-network setup on the destination host.
#[async_trait]
pub trait NetworkProvisioner: Send + Sync {
    /// Bridges, VLANs and forwarding rules the workload needs on this host.
    async fn configure_destination_network(
        &self,
        ctx: &RequestContext,
        workload: &Workload,
    ) -> Result<()>;
}
