//! In-process channel routing calls to endpoints registered by host name.
//!
//! Requests and replies are pushed through their JSON form so anything that
//! would not survive a real transport fails here too.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, instrument};

use super::{RemoteEndpoint, RemoteOutcome, RemoteProcedureChannel, RemoteRequest, RpcReply};
use crate::context::RequestContext;
use crate::error::{MigrationError, Result};

/// Channel delivering requests to endpoints in the same process.
#[derive(Default)]
pub struct InProcessChannel {
    hosts: RwLock<HashMap<String, Arc<dyn RemoteEndpoint>>>,
}

impl InProcessChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route calls for `host` to `endpoint`, replacing any previous route.
    pub fn register(&self, host: impl Into<String>, endpoint: Arc<dyn RemoteEndpoint>) {
        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        hosts.insert(host.into(), endpoint);
    }

    /// Drop the route for `host`; later calls fail as unreachable.
    pub fn unregister(&self, host: &str) {
        let mut hosts = self.hosts.write().unwrap_or_else(|e| e.into_inner());
        hosts.remove(host);
    }

    fn endpoint(&self, host: &str) -> Result<Arc<dyn RemoteEndpoint>> {
        let hosts = self
            .hosts
            .read()
            .map_err(|_| MigrationError::Unexpected("Lock poisoned".to_string()))?;

        hosts
            .get(host)
            .cloned()
            .ok_or_else(|| MigrationError::Transport(format!("host {} is unreachable", host)))
    }
}

#[async_trait]
impl RemoteProcedureChannel for InProcessChannel {
    #[instrument(skip(self, ctx, request), fields(request_id = %ctx.request_id, method = request.method()))]
    async fn call(
        &self,
        ctx: &RequestContext,
        host: &str,
        request: RemoteRequest,
    ) -> Result<RemoteOutcome> {
        let endpoint = self.endpoint(host)?;

        let encoded = serde_json::to_value(&request)
            .map_err(|e| MigrationError::Transport(format!("failed to encode request: {}", e)))?;
        let request: RemoteRequest = serde_json::from_value(encoded)
            .map_err(|e| MigrationError::Transport(format!("failed to decode request: {}", e)))?;

        let reply = RpcReply::from(endpoint.handle(ctx, request).await);

        let encoded = serde_json::to_value(&reply)
            .map_err(|e| MigrationError::Transport(format!("failed to encode reply: {}", e)))?;
        let reply: RpcReply = serde_json::from_value(encoded)
            .map_err(|e| MigrationError::Transport(format!("failed to decode reply: {}", e)))?;

        debug!(host = %host, "In-process call finished");
        reply.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;

    struct Echo;

    #[async_trait]
    impl RemoteEndpoint for Echo {
        async fn handle(&self, _ctx: &RequestContext, request: RemoteRequest) -> Result<RemoteOutcome> {
            match request {
                RemoteRequest::PrepareLiveMigration { destination, .. } => Ok(
                    RemoteOutcome::Rejected(RemoteError::new(destination, "Echo", "rejected")),
                ),
                RemoteRequest::PreflightStatus { workload_id } => {
                    Err(MigrationError::NotFound(workload_id.to_string()))
                }
            }
        }
    }

    #[tokio::test]
    async fn test_unknown_host_is_transport_error() {
        let channel = InProcessChannel::new();
        let request = RemoteRequest::PreflightStatus { workload_id: "i-1".into() };

        let err = channel
            .call(&RequestContext::admin(), "nowhere", request)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Transport(_)));
    }

    #[tokio::test]
    async fn test_routes_to_registered_endpoint() {
        let channel = InProcessChannel::new();
        channel.register("host2", Arc::new(Echo));
        let ctx = RequestContext::admin();

        let outcome = channel
            .call(
                &ctx,
                "host2",
                RemoteRequest::PrepareLiveMigration {
                    workload_id: "i-1".into(),
                    destination: "host2".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome, RemoteOutcome::Rejected(RemoteError::new("host2", "Echo", "rejected")));

        let err = channel
            .call(&ctx, "host2", RemoteRequest::PreflightStatus { workload_id: "i-1".into() })
            .await
            .unwrap_err();
        assert_eq!(err, MigrationError::NotFound("i-1".to_string()));

        channel.unregister("host2");
        let err = channel
            .call(&ctx, "host2", RemoteRequest::PreflightStatus { workload_id: "i-1".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, MigrationError::Transport(_)));
    }
}
