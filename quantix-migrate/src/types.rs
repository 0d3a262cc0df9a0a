//! Records observed and updated during a live migration.
//!
//! These mirror rows owned by the control plane's persistence store. The
//! migration crates never create or delete them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

// =============================================================================
// Identifiers
// =============================================================================

/// Workload identifier as seen by the control plane (e.g. `i-12345`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkloadId(String);

impl WorkloadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkloadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for WorkloadId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

// =============================================================================
// Workload
// =============================================================================

/// Power state codes stored on a workload record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    #[default]
    NoState,
    Running,
    Blocked,
    Paused,
    Shutdown,
    Shutoff,
    Crashed,
    Suspended,
    Failed,
}

impl PowerState {
    /// Numeric code as persisted.
    pub fn code(self) -> u8 {
        match self {
            PowerState::NoState => 0x00,
            PowerState::Running => 0x01,
            PowerState::Blocked => 0x02,
            PowerState::Paused => 0x03,
            PowerState::Shutdown => 0x04,
            PowerState::Shutoff => 0x05,
            PowerState::Crashed => 0x06,
            PowerState::Suspended => 0x07,
            PowerState::Failed => 0x08,
        }
    }

    /// Canonical name, used as the default state description.
    pub fn name(self) -> &'static str {
        match self {
            PowerState::NoState => "pending",
            PowerState::Running => "running",
            PowerState::Blocked => "blocked",
            PowerState::Paused => "paused",
            PowerState::Shutdown => "shutdown",
            PowerState::Shutoff => "shutdown",
            PowerState::Crashed => "crashed",
            PowerState::Suspended => "suspended",
            PowerState::Failed => "failed to spawn",
        }
    }
}

/// State code plus description; always written together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadState {
    pub code: PowerState,
    pub description: String,
}

impl WorkloadState {
    /// State with the code's canonical description.
    pub fn new(code: PowerState) -> Self {
        Self {
            code,
            description: code.name().to_string(),
        }
    }

    pub fn with_description(code: PowerState, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn running() -> Self {
        Self::new(PowerState::Running)
    }
}

impl Default for WorkloadState {
    fn default() -> Self {
        Self::new(PowerState::NoState)
    }
}

/// A migratable workload (running VM instance).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    /// Compute host currently running the workload
    pub host: String,
    /// Network hostname of the guest
    pub hostname: String,
    #[serde(default)]
    pub state: WorkloadState,
    #[serde(default)]
    pub vcpus: u32,
    #[serde(default)]
    pub memory_mb: u64,
}

impl Workload {
    pub fn new(id: impl Into<WorkloadId>, host: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            hostname: id.to_string(),
            id,
            host: host.into(),
            state: WorkloadState::running(),
            vcpus: 1,
            memory_mb: 512,
        }
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Volume attached to a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub id: u64,
    pub workload_id: WorkloadId,
    /// Storage host exporting the volume
    pub host: String,
    #[serde(default)]
    pub mountpoint: Option<String>,
}

/// Export location of a volume (shelf/blade pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub shelf: u32,
    pub blade: u32,
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}.{}", self.shelf, self.blade)
    }
}

// =============================================================================
// Network
// =============================================================================

/// Fixed address assigned to a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAddressAssignment {
    pub id: u64,
    pub workload_id: WorkloadId,
    pub network_id: u64,
    pub address: IpAddr,
    #[serde(default = "default_allocated")]
    pub allocated: bool,
}

fn default_allocated() -> bool {
    true
}

/// Named security group applied to a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicySet {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl SecurityPolicySet {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_codes() {
        assert_eq!(PowerState::NoState.code(), 0);
        assert_eq!(PowerState::Running.code(), 1);
        assert_eq!(PowerState::Failed.code(), 8);
    }

    #[test]
    fn test_workload_state_default_description() {
        let state = WorkloadState::new(PowerState::Running);
        assert_eq!(state.description, "running");

        let state = WorkloadState::with_description(PowerState::Failed, "preflight rejected");
        assert_eq!(state.code, PowerState::Failed);
        assert_eq!(state.description, "preflight rejected");
    }

    #[test]
    fn test_workload_json_defaults() {
        let workload: Workload = serde_json::from_value(serde_json::json!({
            "id": "i-12345",
            "host": "host1",
            "hostname": "web-1",
        }))
        .unwrap();

        assert_eq!(workload.id.as_str(), "i-12345");
        assert_eq!(workload.state.code, PowerState::NoState);
        assert_eq!(workload.state.description, "pending");
        assert_eq!(workload.vcpus, 0);
    }

    #[test]
    fn test_address_assignment_parses_ip() {
        let assignment: NetworkAddressAssignment = serde_json::from_value(serde_json::json!({
            "id": 1,
            "workload_id": "i-12345",
            "network_id": 1,
            "address": "1.1.1.1",
        }))
        .unwrap();

        assert!(assignment.allocated);
        assert_eq!(assignment.address.to_string(), "1.1.1.1");
    }
}
