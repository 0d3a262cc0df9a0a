//! In-memory collaborators for testing and development.
//!
//! These stand in for the control-plane database, the libvirt driver, the
//! network provisioner and the messaging transport. Every one of them records
//! what it was asked to do and can be told to fail:
//! - Unit and integration testing
//! - Development nodes without libvirt or a control plane

mod channel;
mod driver;
mod store;

pub use channel::{MockChannel, RecordedCall};
pub use driver::{DriverOp, MigrationRecord, MockDriver, MockNetwork};
pub use store::{Inventory, MockStore, StoreOp};
