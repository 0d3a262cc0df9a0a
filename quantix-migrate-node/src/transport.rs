//! HTTP channel to peer migration nodes.
//!
//! Each call is a single `POST {peer}/api/v1/rpc` carrying an [`RpcEnvelope`];
//! the peer answers with an [`RpcReply`] so raised errors keep their kind.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use quantix_migrate::{
    MigrationError, RemoteOutcome, RemoteProcedureChannel, RemoteRequest, RequestContext, Result,
    RpcReply,
};

/// Body of a peer RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope {
    pub context: RequestContext,
    pub request: RemoteRequest,
}

/// Remote procedure channel over HTTP.
pub struct HttpChannel {
    peers: HashMap<String, String>,
    http_client: reqwest::Client,
}

impl HttpChannel {
    /// Create a channel resolving host names through `peers` (host -> base URL).
    pub fn new(peers: HashMap<String, String>, timeout: Duration) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for peer RPC")?;

        Ok(Self { peers, http_client })
    }

    fn rpc_url(&self, host: &str) -> Result<String> {
        let base = self
            .peers
            .get(host)
            .ok_or_else(|| MigrationError::Transport(format!("no address known for host {}", host)))?;
        Ok(format!("{}/api/v1/rpc", base.trim_end_matches('/')))
    }
}

#[async_trait]
impl RemoteProcedureChannel for HttpChannel {
    async fn call(
        &self,
        ctx: &RequestContext,
        host: &str,
        request: RemoteRequest,
    ) -> Result<RemoteOutcome> {
        let url = self.rpc_url(host)?;
        debug!(
            host = %host,
            method = request.method(),
            request_id = %ctx.request_id,
            "Sending peer RPC"
        );

        let envelope = RpcEnvelope {
            context: ctx.clone(),
            request,
        };

        let response = self
            .http_client
            .post(&url)
            .json(&envelope)
            .send()
            .await
            .map_err(|e| MigrationError::Transport(format!("{} unreachable: {}", host, e)))?;

        // Error statuses still carry an RpcReply body; only an undecodable
        // body is a transport failure.
        let status = response.status();
        let reply: RpcReply = response.json().await.map_err(|e| {
            MigrationError::Transport(format!("bad reply from {} ({}): {}", host, status, e))
        })?;

        reply.into_result()
    }
}
