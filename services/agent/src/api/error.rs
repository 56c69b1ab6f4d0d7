//! API error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::agent::AgentError;
use crate::artifact::ArtifactError;
use crate::node::SettingsError;

/// JSON body of every error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        let message = e.to_string();
        match e {
            AgentError::NodeNotFound(_) => Self::not_found(message),
            AgentError::NodeMustBeStopped(_) | AgentError::AlreadyRunning(_) => {
                Self::conflict(message)
            }
            AgentError::NoLocalBinary
            | AgentError::Settings(SettingsError::Invalid { .. })
            | AgentError::Settings(SettingsError::MissingS3Bucket)
            | AgentError::Artifact(ArtifactError::InvalidComponent(_)) => {
                Self::bad_request(message)
            }
            AgentError::Artifact(ArtifactError::ArtifactNotFound { .. })
            | AgentError::Artifact(ArtifactError::ReleaseNotFound(_)) => Self::not_found(message),
            _ => {
                error!(error = %message, "Request failed");
                Self::internal(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}
