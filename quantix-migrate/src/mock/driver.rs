//! Mock hypervisor driver and network provisioner.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tracing::{info, instrument};

use crate::context::RequestContext;
use crate::error::{MigrationError, Result};
use crate::traits::{HypervisorDriver, NetworkProvisioner};
use crate::types::{SecurityPolicySet, Workload, WorkloadId};

/// Driver operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOp {
    ConfigureFilters,
    Migrate,
}

/// A migration the mock driver carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub workload_id: WorkloadId,
    pub source: String,
    pub destination: String,
}

#[derive(Default)]
struct DriverState {
    faults: HashMap<DriverOp, MigrationError>,
    filters: Vec<(WorkloadId, Vec<String>)>,
    migrations: Vec<MigrationRecord>,
}

/// Hypervisor driver that records calls instead of touching a host.
#[derive(Default)]
pub struct MockDriver {
    state: RwLock<DriverState>,
    migration_delay: Duration,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate time spent copying memory.
    pub fn with_migration_delay(mut self, delay: Duration) -> Self {
        self.migration_delay = delay;
        self
    }

    pub fn fail(&self, op: DriverOp, err: MigrationError) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.faults.insert(op, err);
    }

    pub fn clear_fault(&self, op: DriverOp) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.faults.remove(&op);
    }

    /// Workloads whose filters were configured, in call order.
    pub fn filtered_workloads(&self) -> Vec<WorkloadId> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.filters.iter().map(|(id, _)| id.clone()).collect()
    }

    /// Policy names used for the last filter setup of a workload.
    pub fn filter_policies(&self, workload_id: &WorkloadId) -> Option<Vec<String>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .filters
            .iter()
            .rev()
            .find(|(id, _)| id == workload_id)
            .map(|(_, names)| names.clone())
    }

    pub fn migrations(&self) -> Vec<MigrationRecord> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.migrations.clone()
    }

    fn fault(&self, op: DriverOp) -> Result<()> {
        let state = self
            .state
            .read()
            .map_err(|_| MigrationError::Unexpected("Lock poisoned".to_string()))?;
        match state.faults.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl HypervisorDriver for MockDriver {
    #[instrument(skip(self, workload, policies), fields(workload_id = %workload.id))]
    async fn configure_filters(
        &self,
        workload: &Workload,
        policies: &[SecurityPolicySet],
    ) -> Result<()> {
        self.fault(DriverOp::ConfigureFilters)?;

        let names: Vec<String> = policies.iter().map(|p| p.name.clone()).collect();
        info!(policies = ?names, "Configuring mock host filters");

        let mut state = self
            .state
            .write()
            .map_err(|_| MigrationError::Unexpected("Lock poisoned".to_string()))?;
        state.filters.push((workload.id.clone(), names));
        Ok(())
    }

    #[instrument(skip(self, ctx, workload), fields(request_id = %ctx.request_id, workload_id = %workload.id))]
    async fn migrate(
        &self,
        ctx: &RequestContext,
        workload: &Workload,
        destination: &str,
    ) -> Result<()> {
        self.fault(DriverOp::Migrate)?;

        info!(source = %workload.host, "Simulating live migration");

        if !self.migration_delay.is_zero() {
            tokio::time::sleep(self.migration_delay).await;
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| MigrationError::Unexpected("Lock poisoned".to_string()))?;
        state.migrations.push(MigrationRecord {
            workload_id: workload.id.clone(),
            source: workload.host.clone(),
            destination: destination.to_string(),
        });

        info!("Mock migration complete");
        Ok(())
    }
}

#[derive(Default)]
struct NetworkState {
    fault: Option<MigrationError>,
    configured: Vec<WorkloadId>,
}

/// Network provisioner that records calls instead of creating bridges.
#[derive(Default)]
pub struct MockNetwork {
    state: RwLock<NetworkState>,
    setup_delay: Duration,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate slow bridge/VLAN setup.
    pub fn with_setup_delay(mut self, delay: Duration) -> Self {
        self.setup_delay = delay;
        self
    }

    pub fn fail(&self, err: MigrationError) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.fault = Some(err);
    }

    pub fn configured(&self) -> Vec<WorkloadId> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.configured.clone()
    }
}

#[async_trait]
impl NetworkProvisioner for MockNetwork {
    #[instrument(skip(self, ctx, workload), fields(request_id = %ctx.request_id, workload_id = %workload.id))]
    async fn configure_destination_network(
        &self,
        ctx: &RequestContext,
        workload: &Workload,
    ) -> Result<()> {
        if !self.setup_delay.is_zero() {
            tokio::time::sleep(self.setup_delay).await;
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| MigrationError::Unexpected("Lock poisoned".to_string()))?;
        if let Some(err) = state.fault.clone() {
            return Err(err);
        }

        info!("Configuring mock compute network");
        state.configured.push(workload.id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_driver_records_migration() {
        let driver = MockDriver::new();
        let workload = Workload::new("i-1", "host1");

        driver
            .migrate(&RequestContext::admin(), &workload, "host2")
            .await
            .unwrap();

        assert_eq!(
            driver.migrations(),
            vec![MigrationRecord {
                workload_id: "i-1".into(),
                source: "host1".to_string(),
                destination: "host2".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_driver_fault() {
        let driver = MockDriver::new();
        driver.fail(DriverOp::Migrate, MigrationError::execution("virsh migrate", "ERR"));

        let err = driver
            .migrate(&RequestContext::admin(), &Workload::new("i-1", "host1"), "host2")
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::ExecutionFailed { .. }));
        assert!(driver.migrations().is_empty());

        driver.clear_fault(DriverOp::Migrate);
        let policies = vec![SecurityPolicySet::new(1, "default")];
        driver
            .configure_filters(&Workload::new("i-1", "host1"), &policies)
            .await
            .unwrap();
        assert_eq!(driver.filter_policies(&"i-1".into()), Some(vec!["default".to_string()]));
    }

    #[tokio::test]
    async fn test_network_fault() {
        let network = MockNetwork::new();
        network.fail(MigrationError::NotFound("bridge".into()));

        let err = network
            .configure_destination_network(&RequestContext::admin(), &Workload::new("i-1", "host1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(network.configured().is_empty());
    }
}
