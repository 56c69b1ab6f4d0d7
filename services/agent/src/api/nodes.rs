//! Node lifecycle endpoints.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::agent::NodeInfo;
use crate::node::{NodeId, NodeKind};
use crate::process::ProcessStatus;

/// Log lines returned when the request does not ask for a count.
pub const DEFAULT_LOG_TAIL: usize = 30;

/// Body of `POST /node`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateNodeRequest {
    /// Release to run; absent or empty runs the local binary.
    #[serde(default)]
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Kind-specific settings.
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeResponse {
    pub id: String,
    pub binary: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub port: u16,
    pub health_check_url: String,
    pub status: ProcessStatus,
}

impl From<NodeInfo> for NodeResponse {
    fn from(info: NodeInfo) -> Self {
        Self {
            id: info.id.to_string(),
            binary: info.kind,
            version: info.version,
            port: info.port,
            health_check_url: info.health_check_url,
            status: info.status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListNodesResponse {
    pub nodes: Vec<NodeResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn ok() -> Json<Self> {
        Json(Self {
            message: "ok".to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<usize>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/node", post(create_node).get(list_nodes))
        .route("/node/{id}", get(get_node).delete(delete_node))
        .route("/node/{id}/logs", get(node_logs))
        .route("/node/{id}/start", post(start_node))
        .route("/node/{id}/stop", post(stop_node))
}

/// Unknown and malformed ids are both "not found".
fn parse_id(raw: &str) -> Result<NodeId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("node '{raw}' not found")))
}

async fn create_node(
    State(state): State<AppState>,
    payload: Result<Json<CreateNodeRequest>, JsonRejection>,
) -> Result<Json<NodeResponse>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    info!(kind = %request.kind, version = ?request.version, "Creating node");

    let info = state
        .agent()
        .create_node(request.kind, request.version, request.config)
        .await?;
    Ok(Json(info.into()))
}

async fn list_nodes(State(state): State<AppState>) -> Json<ListNodesResponse> {
    let nodes = state
        .agent()
        .list_nodes()
        .await
        .into_iter()
        .map(NodeResponse::from)
        .collect();
    Json(ListNodesResponse { nodes })
}

async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NodeResponse>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.agent().get_node(&id).await?.into()))
}

async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = match id.parse::<NodeId>() {
        Ok(id) => id,
        // Nothing can exist under a malformed id.
        Err(_) => return Ok(MessageResponse::ok()),
    };
    state.agent().delete_node(&id).await?;
    Ok(MessageResponse::ok())
}

async fn node_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<LogsQuery>, QueryRejection>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let id = parse_id(&id)?;
    let Query(query) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let lines = query.lines.unwrap_or(DEFAULT_LOG_TAIL);

    Ok(Json(state.agent().node_logs(&id, lines).await?))
}

async fn start_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&id)?;
    state.agent().start_node(&id).await?;
    Ok(MessageResponse::ok())
}

async fn stop_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&id)?;
    state.agent().stop_node(&id).await?;
    Ok(MessageResponse::ok())
}
