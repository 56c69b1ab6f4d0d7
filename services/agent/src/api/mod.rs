//! HTTP control API.

pub mod error;
mod health;
mod nodes;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::agent::Agent;

pub use nodes::{CreateNodeRequest, ListNodesResponse, MessageResponse, NodeResponse, DEFAULT_LOG_TAIL};

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Agent>,
}

impl AppState {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self { inner: agent }
    }

    pub fn agent(&self) -> &Agent {
        &self.inner
    }
}

/// Create the API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(nodes::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
