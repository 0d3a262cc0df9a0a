//! In-memory persistence gateway.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::error::{MigrationError, Result};
use crate::traits::PersistenceGateway;
use crate::types::*;

/// Gateway operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    GetWorkload,
    ListVolumes,
    StorageLocation,
    PrimaryAddress,
    SecurityPolicies,
    SetWorkloadState,
    SetWorkloadHost,
}

/// Seed data for a [`MockStore`], loadable from YAML or JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Inventory {
    pub workloads: Vec<Workload>,
    pub volumes: Vec<VolumeAttachment>,
    /// Export location keyed by volume ID
    pub storage_locations: HashMap<u64, StorageLocation>,
    pub addresses: Vec<NetworkAddressAssignment>,
    pub security_policies: HashMap<WorkloadId, Vec<SecurityPolicySet>>,
}

#[derive(Default)]
struct StoreState {
    workloads: HashMap<WorkloadId, Workload>,
    volumes: Vec<VolumeAttachment>,
    locations: HashMap<u64, StorageLocation>,
    addresses: HashMap<WorkloadId, NetworkAddressAssignment>,
    policies: HashMap<WorkloadId, Vec<SecurityPolicySet>>,
    faults: HashMap<StoreOp, MigrationError>,
    calls: HashMap<StoreOp, usize>,
    state_writes: Vec<(WorkloadId, WorkloadState)>,
}

/// Persistence gateway backed by in-memory tables.
///
/// Used by tests and by development nodes. Any operation can be forced to
/// fail with [`MockStore::fail`]; the fault stays until cleared.
#[derive(Default)]
pub struct MockStore {
    state: RwLock<StoreState>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated from an inventory.
    pub fn from_inventory(inventory: Inventory) -> Self {
        info!(
            workloads = inventory.workloads.len(),
            volumes = inventory.volumes.len(),
            "Loading in-memory inventory"
        );

        let mut state = StoreState {
            volumes: inventory.volumes,
            locations: inventory.storage_locations,
            policies: inventory.security_policies,
            ..StoreState::default()
        };
        for workload in inventory.workloads {
            state.workloads.insert(workload.id.clone(), workload);
        }
        for address in inventory.addresses {
            state.addresses.insert(address.workload_id.clone(), address);
        }

        Self {
            state: RwLock::new(state),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    // =========================================================================
    // Seeding
    // =========================================================================

    pub fn insert_workload(&self, workload: Workload) {
        self.write().workloads.insert(workload.id.clone(), workload);
    }

    pub fn insert_volume(&self, volume: VolumeAttachment, location: StorageLocation) {
        let mut state = self.write();
        state.locations.insert(volume.id, location);
        state.volumes.push(volume);
    }

    pub fn clear_volumes(&self, workload_id: &WorkloadId) {
        self.write().volumes.retain(|v| &v.workload_id != workload_id);
    }

    pub fn set_primary_address(&self, workload_id: &WorkloadId, network_id: u64, address: IpAddr) {
        let mut state = self.write();
        let id = state.addresses.len() as u64 + 1;
        state.addresses.insert(
            workload_id.clone(),
            NetworkAddressAssignment {
                id,
                workload_id: workload_id.clone(),
                network_id,
                address,
                allocated: true,
            },
        );
    }

    pub fn remove_primary_address(&self, workload_id: &WorkloadId) {
        self.write().addresses.remove(workload_id);
    }

    pub fn insert_policy(&self, workload_id: &WorkloadId, policy: SecurityPolicySet) {
        self.write()
            .policies
            .entry(workload_id.clone())
            .or_default()
            .push(policy);
    }

    // =========================================================================
    // Fault injection & inspection
    // =========================================================================

    /// Make every later call of `op` fail with `err`.
    pub fn fail(&self, op: StoreOp, err: MigrationError) {
        self.write().faults.insert(op, err);
    }

    pub fn clear_fault(&self, op: StoreOp) {
        self.write().faults.remove(&op);
    }

    /// Number of times `op` was invoked, failed calls included.
    pub fn calls(&self, op: StoreOp) -> usize {
        self.read().calls.get(&op).copied().unwrap_or(0)
    }

    /// State writes for a workload, oldest first.
    pub fn state_writes(&self, workload_id: &WorkloadId) -> Vec<WorkloadState> {
        self.read()
            .state_writes
            .iter()
            .filter(|(id, _)| id == workload_id)
            .map(|(_, state)| state.clone())
            .collect()
    }

    /// Current record, bypassing fault injection.
    pub fn workload(&self, workload_id: &WorkloadId) -> Option<Workload> {
        self.read().workloads.get(workload_id).cloned()
    }

    /// Count the call and return the injected fault, if any.
    fn enter(&self, op: StoreOp) -> Result<std::sync::RwLockWriteGuard<'_, StoreState>> {
        let mut state = self.write();
        *state.calls.entry(op).or_insert(0) += 1;
        if let Some(err) = state.faults.get(&op).cloned() {
            return Err(err);
        }
        Ok(state)
    }
}

fn workload_not_found(id: &WorkloadId) -> MigrationError {
    MigrationError::NotFound(format!("Instance {} not found", id))
}

#[async_trait]
impl PersistenceGateway for MockStore {
    async fn get_workload(&self, id: &WorkloadId) -> Result<Workload> {
        let state = self.enter(StoreOp::GetWorkload)?;
        state
            .workloads
            .get(id)
            .cloned()
            .ok_or_else(|| workload_not_found(id))
    }

    async fn volumes_for_workload(&self, id: &WorkloadId) -> Result<Vec<VolumeAttachment>> {
        let state = self.enter(StoreOp::ListVolumes)?;
        Ok(state
            .volumes
            .iter()
            .filter(|v| &v.workload_id == id)
            .cloned()
            .collect())
    }

    async fn storage_location(&self, volume_id: u64) -> Result<StorageLocation> {
        let state = self.enter(StoreOp::StorageLocation)?;
        state
            .locations
            .get(&volume_id)
            .copied()
            .ok_or_else(|| MigrationError::NotFound(format!("No export device for volume {}", volume_id)))
    }

    async fn primary_address(&self, id: &WorkloadId) -> Result<Option<NetworkAddressAssignment>> {
        let state = self.enter(StoreOp::PrimaryAddress)?;
        Ok(state.addresses.get(id).filter(|a| a.allocated).cloned())
    }

    async fn security_policies(&self, id: &WorkloadId) -> Result<Vec<SecurityPolicySet>> {
        let state = self.enter(StoreOp::SecurityPolicies)?;
        Ok(state.policies.get(id).cloned().unwrap_or_default())
    }

    #[instrument(skip(self, state), fields(workload_id = %id, code = state.code.code()))]
    async fn set_workload_state(&self, id: &WorkloadId, state: WorkloadState) -> Result<()> {
        let mut store = self.enter(StoreOp::SetWorkloadState)?;
        let workload = store
            .workloads
            .get_mut(id)
            .ok_or_else(|| workload_not_found(id))?;

        workload.state = state.clone();
        store.state_writes.push((id.clone(), state));

        debug!("Workload state updated");
        Ok(())
    }

    #[instrument(skip(self), fields(workload_id = %id))]
    async fn set_workload_host(&self, id: &WorkloadId, host: &str) -> Result<()> {
        let mut store = self.enter(StoreOp::SetWorkloadHost)?;
        let workload = store
            .workloads
            .get_mut(id)
            .ok_or_else(|| workload_not_found(id))?;

        workload.host = host.to_string();

        debug!("Workload host updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_workload_is_not_found() {
        let store = MockStore::new();
        let err = store.get_workload(&"i-404".into()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.calls(StoreOp::GetWorkload), 1);
    }

    #[tokio::test]
    async fn test_fault_persists_until_cleared() {
        let store = MockStore::new();
        store.insert_workload(Workload::new("i-1", "host1"));
        store.fail(StoreOp::GetWorkload, MigrationError::Unexpected("ERR".into()));

        assert!(store.get_workload(&"i-1".into()).await.is_err());
        assert!(store.get_workload(&"i-1".into()).await.is_err());

        store.clear_fault(StoreOp::GetWorkload);
        assert_eq!(store.get_workload(&"i-1".into()).await.unwrap().host, "host1");
        assert_eq!(store.calls(StoreOp::GetWorkload), 3);
    }

    #[tokio::test]
    async fn test_state_write_updates_record_and_journal() {
        let store = MockStore::new();
        let id = WorkloadId::new("i-1");
        store.insert_workload(Workload::new("i-1", "host1"));

        let state = WorkloadState::with_description(PowerState::Failed, "migration failed");
        store.set_workload_state(&id, state.clone()).await.unwrap();

        assert_eq!(store.workload(&id).unwrap().state, state);
        assert_eq!(store.state_writes(&id), vec![state]);
    }

    #[tokio::test]
    async fn test_unallocated_address_is_not_primary() {
        let store = MockStore::from_inventory(Inventory {
            addresses: vec![NetworkAddressAssignment {
                id: 1,
                workload_id: "i-1".into(),
                network_id: 1,
                address: "10.0.0.5".parse().unwrap(),
                allocated: false,
            }],
            ..Inventory::default()
        });

        assert!(store.primary_address(&"i-1".into()).await.unwrap().is_none());
    }

    #[test]
    fn test_inventory_from_json() {
        let inventory: Inventory = serde_json::from_value(serde_json::json!({
            "workloads": [{"id": "i-1", "host": "host1", "hostname": "web-1"}],
            "storage_locations": {"7": {"shelf": 3, "blade": 4}},
            "security_policies": {"i-1": [{"id": 1, "name": "default"}]},
        }))
        .unwrap();

        assert_eq!(inventory.workloads.len(), 1);
        assert_eq!(inventory.storage_locations[&7], StorageLocation { shelf: 3, blade: 4 });
        assert_eq!(inventory.security_policies[&WorkloadId::new("i-1")][0].name, "default");
    }
}
