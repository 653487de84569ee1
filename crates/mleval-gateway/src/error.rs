use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::forward::MODEL_ID_HEADER;

use mleval_common::ModelId;
use mleval_registry::{RegistryError, TrackerError};
use mleval_scheduler::SchedulerError;

/// Transport-level failure class of an outbound worker call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamKind {
    Timeout,
    Connect,
    Other,
}

impl UpstreamKind {
    pub fn classify(error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return UpstreamKind::Timeout;
        }
        if error.is_connect() {
            return UpstreamKind::Connect;
        }
        UpstreamKind::Other
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamKind::Timeout => "timeout",
            UpstreamKind::Connect => "connect",
            UpstreamKind::Other => "other",
        }
    }
}

impl std::fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("malformed request: {0}")]
    MalformedRequest(String),

    #[error("request body too large: {0}")]
    PayloadTooLarge(String),

    #[error("failed to build worker request: {0}")]
    Internal(String),

    /// `model_id` is set when the failed call belonged to a model minted by
    /// the same request, so the caller still learns which id it created.
    #[error("request to {host} failed ({kind}): {message}")]
    Upstream {
        host: String,
        kind: UpstreamKind,
        message: String,
        model_id: Option<ModelId>,
    },
}

impl ApiError {
    pub fn malformed(message: impl std::fmt::Display) -> Self {
        ApiError::MalformedRequest(message.to_string())
    }

    pub fn upstream(host: impl Into<String>, error: &reqwest::Error) -> Self {
        ApiError::Upstream {
            host: host.into(),
            kind: UpstreamKind::classify(error),
            message: error.to_string(),
            model_id: None,
        }
    }

    /// Tag an upstream failure with the id minted for it.
    pub fn for_model(self, id: ModelId) -> Self {
        match self {
            ApiError::Upstream {
                host,
                kind,
                message,
                ..
            } => ApiError::Upstream {
                host,
                kind,
                message,
                model_id: Some(id),
            },
            other => other,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Registry(RegistryError::IdSpaceExhausted) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::Scheduler(SchedulerError::NotAssigned(_)) => StatusCode::NOT_FOUND,
            ApiError::Scheduler(SchedulerError::NoWorkersAvailable) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Tracker(TrackerError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Upstream {
                kind: UpstreamKind::Timeout,
                ..
            } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Registry(RegistryError::NotFound(_)) => "not_found",
            ApiError::Registry(RegistryError::IdSpaceExhausted) => "id_space_exhausted",
            ApiError::Scheduler(SchedulerError::NotAssigned(_)) => "not_assigned",
            ApiError::Scheduler(SchedulerError::NoWorkersAvailable) => "no_workers_available",
            ApiError::Tracker(TrackerError::NotFound(_)) => "not_found",
            ApiError::MalformedRequest(_) => "malformed_request",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::Internal(_) => "internal",
            ApiError::Upstream { .. } => "upstream",
        }
    }

    pub fn host(&self) -> Option<&str> {
        match self {
            ApiError::Upstream { host, .. } => Some(host),
            _ => None,
        }
    }

    pub fn model_id(&self) -> Option<ModelId> {
        match self {
            ApiError::Upstream { model_id, .. } => *model_id,
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_id: Option<ModelId>,
    request_id: String,
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: ErrorDetail<'a>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let request_id = format!("req_{}", Uuid::new_v4());
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), %request_id, "request failed");
        } else {
            tracing::warn!(error = %self, code = self.code(), %request_id, "request rejected");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                host: self.host(),
                model_id: self.model_id(),
                request_id,
            },
        };
        let mut resp = (status, Json(body)).into_response();
        if let Some(id) = self.model_id() {
            resp.headers_mut()
                .insert(MODEL_ID_HEADER, HeaderValue::from(id));
        }
        resp
    }
}
