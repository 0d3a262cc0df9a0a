//! HTTP server for peer RPC and migration control.
//!
//! Routes (all under `/api/v1`):
//! - `POST /rpc` - peer requests handled by the local preflight endpoint
//! - `GET  /migrations` - status of every migration started on this node
//! - `GET  /migrations/:workload_id` - status of one migration
//! - `POST /migrations` - start a live migration away from this node
//! - `GET  /health` - liveness probe

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use quantix_migrate::{
    ErrorKind, MigrationCoordinator, MigrationError, PreflightEndpoint, RemoteEndpoint,
    RequestContext, RpcReply, WorkloadId,
};

use crate::transport::RpcEnvelope;

/// Shared state for HTTP handlers
pub struct AppState {
    pub hostname: String,
    pub endpoint: Arc<PreflightEndpoint>,
    pub coordinator: Arc<MigrationCoordinator>,
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Serialize)]
struct ApiError {
    error: String,
    message: String,
}

impl ApiError {
    fn from_migration(err: &MigrationError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StartMigrationRequest {
    pub workload_id: String,
    pub destination: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    hostname: String,
    in_flight_preflights: usize,
}

fn status_for(err: &MigrationError) -> StatusCode {
    match err.kind() {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::NotAuthorized => StatusCode::FORBIDDEN,
        ErrorKind::AlreadyInProgress => StatusCode::CONFLICT,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Execution | ErrorKind::Unexpected => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: MigrationError) -> Response {
    (status_for(&err), Json(ApiError::from_migration(&err))).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<RpcEnvelope>,
) -> Response {
    let RpcEnvelope { context, request } = envelope;
    let reply = RpcReply::from(state.endpoint.handle(&context, request).await);

    let status = match reply {
        RpcReply::Outcome(_) => StatusCode::OK,
        RpcReply::Error(ref err) => status_for(err),
    };
    (status, Json(reply)).into_response()
}

async fn list_migrations(State(state): State<Arc<AppState>>) -> Response {
    Json(state.coordinator.statuses()).into_response()
}

async fn get_migration(
    State(state): State<Arc<AppState>>,
    Path(workload_id): Path<String>,
) -> Response {
    let workload_id = WorkloadId::new(workload_id);
    match state.coordinator.status(&workload_id) {
        Some(status) => Json(status).into_response(),
        None => error_response(MigrationError::NotFound(format!(
            "no migration recorded for workload {}",
            workload_id
        ))),
    }
}

async fn start_migration(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartMigrationRequest>,
) -> Response {
    let ctx = RequestContext::admin();
    let workload_id = WorkloadId::new(req.workload_id);

    info!(
        workload_id = %workload_id,
        destination = %req.destination,
        request_id = %ctx.request_id,
        "Migration requested over HTTP"
    );

    match state
        .coordinator
        .migrate(&ctx, &workload_id, &req.destination)
        .await
    {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => {
            warn!(workload_id = %workload_id, error = %e, "Migration request failed");
            error_response(e)
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        hostname: state.hostname.clone(),
        in_flight_preflights: state.endpoint.in_flight(),
    })
}

// ============================================================================
// Server
// ============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/migrations", get(list_migrations).post(start_migration))
        .route("/migrations/:workload_id", get(get_migration))
        .route("/health", get(health));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on an already-bound listener.
pub async fn serve(listener: tokio::net::TcpListener, state: Arc<AppState>) -> anyhow::Result<()> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Bind `addr` and serve until the process exits.
pub async fn run(addr: SocketAddr, state: Arc<AppState>) -> anyhow::Result<()> {
    info!(address = %addr, hostname = %state.hostname, "Starting migration HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, state).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use quantix_migrate::mock::{MockDriver, MockNetwork, MockStore};
    use quantix_migrate::{
        CoordinatorConfig, EndpointConfig, InProcessChannel, MigrationOutcome, MigrationPhase,
        PreflightValidator, RemoteProcedureChannel, SecurityPolicySet, StorageLocation,
        VolumeAttachment, Workload,
    };

    use crate::transport::HttpChannel;

    fn seeded_store() -> Arc<MockStore> {
        let store = Arc::new(MockStore::new());
        let id = WorkloadId::new("i-12345");
        store.insert_workload(Workload::new("i-12345", "host1"));
        store.insert_volume(
            VolumeAttachment {
                id: 1,
                workload_id: id.clone(),
                host: "host1".to_string(),
                mountpoint: None,
            },
            StorageLocation { shelf: 3, blade: 4 },
        );
        store.set_primary_address(&id, 1, "10.0.0.5".parse().unwrap());
        store.insert_policy(&id, SecurityPolicySet::new(1, "default"));
        store
    }

    fn coordinator(
        store: Arc<MockStore>,
        channel: Arc<dyn RemoteProcedureChannel>,
    ) -> Arc<MigrationCoordinator> {
        Arc::new(MigrationCoordinator::new(
            store,
            Arc::new(MockDriver::new()),
            channel,
            CoordinatorConfig {
                preflight_poll_attempts: 5,
                preflight_poll_interval_ms: 10,
                ..CoordinatorConfig::default()
            },
        ))
    }

    /// Start a destination node named `host2` and return its base URL.
    async fn spawn_destination(store: Arc<MockStore>) -> String {
        let validator = Arc::new(PreflightValidator::new(
            store.clone(),
            Arc::new(MockDriver::new()),
            Arc::new(MockNetwork::new()),
        ));
        let state = Arc::new(AppState {
            hostname: "host2".to_string(),
            endpoint: Arc::new(PreflightEndpoint::new(
                "host2",
                validator,
                EndpointConfig::default(),
            )),
            coordinator: coordinator(store, Arc::new(InProcessChannel::new())),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));

        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_migration_over_http() {
        let store = seeded_store();
        let base = spawn_destination(store.clone()).await;

        let mut peers = HashMap::new();
        peers.insert("host2".to_string(), base);
        let source = coordinator(
            store.clone(),
            Arc::new(HttpChannel::new(peers, Duration::from_secs(5)).unwrap()),
        );

        let outcome = source
            .migrate(&RequestContext::admin(), &"i-12345".into(), "host2")
            .await
            .unwrap();

        assert!(matches!(outcome, MigrationOutcome::Completed { .. }));
        assert_eq!(store.workload(&"i-12345".into()).unwrap().host, "host2");
        assert_eq!(
            source.status(&"i-12345".into()).unwrap().phase,
            MigrationPhase::Completed
        );
    }

    #[tokio::test]
    async fn test_remote_error_kind_survives_http() {
        let store = Arc::new(MockStore::new());
        let base = spawn_destination(store.clone()).await;

        let mut peers = HashMap::new();
        peers.insert("host2".to_string(), base);
        let source = coordinator(
            store,
            Arc::new(HttpChannel::new(peers, Duration::from_secs(5)).unwrap()),
        );

        let err = source
            .migrate(&RequestContext::admin(), &"i-missing".into(), "host2")
            .await
            .unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_status_routes() {
        let store = seeded_store();
        let base = spawn_destination(store).await;
        let client = reqwest::Client::new();

        let health: serde_json::Value = client
            .get(format!("{}/api/v1/health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["hostname"], "host2");
        assert_eq!(health["status"], "ok");

        let missing = client
            .get(format!("{}/api/v1/migrations/i-12345", base))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

        let all: Vec<serde_json::Value> = client
            .get(format!("{}/api/v1/migrations", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&MigrationError::AlreadyInProgress("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&MigrationError::Transport("x".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&MigrationError::execution("virsh", "ERR")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
