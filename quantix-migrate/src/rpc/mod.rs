//! Remote procedure calls between the source and destination hosts.
//!
//! A call ends in one of three ways:
//!
//! - `Ok(RemoteOutcome::Completed(..))` / `Ok(RemoteOutcome::Pending)`: the
//!   peer answered normally
//! - `Ok(RemoteOutcome::Rejected(..))`: the peer ran the request and reported
//!   a structured failure
//! - `Err(MigrationError)`: the call itself failed, or the peer raised an
//!   error whose kind is handed back unchanged
//!
//! Retrying and polling are the caller's business; channels deliver exactly
//! one request per `call`.

mod loopback;

pub use loopback::InProcessChannel;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RequestContext;
use crate::error::{MigrationError, RemoteError, Result};
use crate::types::WorkloadId;

/// Operations a host accepts from its peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum RemoteRequest {
    /// Start destination-side preflight for a workload.
    PrepareLiveMigration {
        workload_id: WorkloadId,
        destination: String,
    },
    /// Idempotent query for a preflight started earlier.
    PreflightStatus { workload_id: WorkloadId },
}

impl RemoteRequest {
    pub fn method(&self) -> &'static str {
        match self {
            RemoteRequest::PrepareLiveMigration { .. } => "prepare_live_migration",
            RemoteRequest::PreflightStatus { .. } => "preflight_status",
        }
    }

    pub fn workload_id(&self) -> &WorkloadId {
        match self {
            RemoteRequest::PrepareLiveMigration { workload_id, .. } => workload_id,
            RemoteRequest::PreflightStatus { workload_id } => workload_id,
        }
    }
}

/// Normal (non-raising) reply from a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum RemoteOutcome {
    /// The operation finished; payload is operation specific.
    Completed(serde_json::Value),
    /// The operation is still running on the peer.
    Pending,
    /// The peer finished and rejected the request.
    Rejected(RemoteError),
}

impl RemoteOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RemoteOutcome::Pending)
    }
}

/// Wire envelope carrying either a reply or a raised error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RpcReply {
    Outcome(RemoteOutcome),
    Error(MigrationError),
}

impl RpcReply {
    pub fn into_result(self) -> Result<RemoteOutcome> {
        match self {
            RpcReply::Outcome(outcome) => Ok(outcome),
            RpcReply::Error(err) => Err(err),
        }
    }
}

impl From<Result<RemoteOutcome>> for RpcReply {
    fn from(result: Result<RemoteOutcome>) -> Self {
        match result {
            Ok(outcome) => RpcReply::Outcome(outcome),
            Err(err) => RpcReply::Error(err),
        }
    }
}

/// Sends a request to a named host.
#[async_trait]
pub trait RemoteProcedureChannel: Send + Sync {
    async fn call(
        &self,
        ctx: &RequestContext,
        host: &str,
        request: RemoteRequest,
    ) -> Result<RemoteOutcome>;
}

/// Receiving end of a channel on the peer host.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn handle(&self, ctx: &RequestContext, request: RemoteRequest) -> Result<RemoteOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let request = RemoteRequest::PrepareLiveMigration {
            workload_id: WorkloadId::new("i-12345"),
            destination: "host2".to_string(),
        };
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["method"], "prepare_live_migration");
        assert_eq!(json["args"]["workload_id"], "i-12345");
        assert_eq!(json["args"]["destination"], "host2");
        assert_eq!(request.method(), "prepare_live_migration");
    }

    #[test]
    fn test_reply_envelope_keeps_error_kind() {
        let reply = RpcReply::from(Err(MigrationError::NotAuthorized("ERR".into())));
        let json = serde_json::to_string(&reply).unwrap();
        let back: RpcReply = serde_json::from_str(&json).unwrap();

        assert_eq!(
            back.into_result().unwrap_err(),
            MigrationError::NotAuthorized("ERR".into())
        );
    }

    #[test]
    fn test_pending_is_not_terminal() {
        assert!(!RemoteOutcome::Pending.is_terminal());
        assert!(RemoteOutcome::Completed(serde_json::Value::Bool(true)).is_terminal());
        assert!(RemoteOutcome::Rejected(RemoteError::new("h", "k", "m")).is_terminal());
    }
}
