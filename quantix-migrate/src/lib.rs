//! # Quantix Migrate
//!
//! Live migration of running workloads between compute hosts.
//!
//! A migration is a two-phase protocol:
//! 1. The source host's [`MigrationCoordinator`] asks the destination to run
//!    [`PreflightValidator::prepare`] through a [`RemoteProcedureChannel`],
//!    polling until the destination answers.
//! 2. Only if the destination accepted, the coordinator tells the local
//!    [`HypervisorDriver`] to move the workload and records the new host.
//!
//! ## Architecture
//!
//! ```text
//!   source host                                destination host
//! ┌──────────────────────┐   RemoteRequest   ┌──────────────────────┐
//! │ MigrationCoordinator │ ────────────────► │  PreflightEndpoint   │
//! │                      │ ◄──────────────── │          │           │
//! └──────────┬───────────┘   RemoteOutcome   │          ▼           │
//!            │                               │ PreflightValidator   │
//!            ▼                               └──────────┬───────────┘
//!    HypervisorDriver                                   ▼
//!    PersistenceGateway            PersistenceGateway / HypervisorDriver /
//!                                  NetworkProvisioner
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quantix_migrate::{
//!     CoordinatorConfig, InProcessChannel, MigrationCoordinator, RequestContext,
//!     mock::{MockDriver, MockStore},
//! };
//!
//! let coordinator = MigrationCoordinator::new(
//!     Arc::new(MockStore::new()),
//!     Arc::new(MockDriver::new()),
//!     Arc::new(InProcessChannel::new()),
//!     CoordinatorConfig::default(),
//! );
//! let outcome = coordinator
//!     .migrate(&RequestContext::admin(), &"i-12345".into(), "host2")
//!     .await?;
//! ```

pub mod config;
pub mod context;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod mock;
pub mod preflight;
pub mod rpc;
pub mod traits;
pub mod types;

pub use config::{CoordinatorConfig, EndpointConfig};
pub use context::RequestContext;
pub use coordinator::{MigrationCoordinator, MigrationOutcome, MigrationPhase, MigrationStatus};
pub use endpoint::PreflightEndpoint;
pub use error::{ErrorKind, MigrationError, RemoteError, Result};
pub use preflight::{PreflightReport, PreflightValidator, PreflightVerdict, VolumePlacement};
pub use rpc::{
    InProcessChannel, RemoteEndpoint, RemoteOutcome, RemoteProcedureChannel, RemoteRequest,
    RpcReply,
};
pub use traits::{HypervisorDriver, NetworkProvisioner, PersistenceGateway};
pub use types::*;
