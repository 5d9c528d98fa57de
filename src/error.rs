use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::registry::NOAUTH_ROUTE;

/// StoreError
///
/// Any failure talking to the persistence layer. Retryable at the operation level;
/// surfaced to HTTP callers as a generic 5xx and never converted into an allow.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{operation} timed out after {limit:?}")]
    Timeout {
        operation: &'static str,
        limit: Duration,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// AccessError
///
/// Outcomes of the enforcement stage that stop the pipeline. `PermissionDenied` is
/// normal control flow and renders as a redirect; the rest are server faults.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("account {username} has no role")]
    NoRoleAssigned { username: String },

    #[error("role has no permission for {route}")]
    PermissionDenied { route: String },

    #[error("request did not resolve to a route template")]
    UnresolvedRoute,
}

impl IntoResponse for AccessError {
    fn into_response(self) -> Response {
        match self {
            AccessError::PermissionDenied { .. } => Redirect::temporary(NOAUTH_ROUTE).into_response(),
            AccessError::NoRoleAssigned { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "account has no role").into_response()
            }
            AccessError::Store(_) | AccessError::UnresolvedRoute => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
        }
    }
}

/// ReconcileError
///
/// A reconciliation pass aborted partway. The counts describe what had already been
/// applied; the next trigger (or startup) re-runs the full pass.
#[derive(Debug, Error)]
#[error("reconciliation aborted after {upserted} upserts and {deleted} deletes: {source}")]
pub struct ReconcileError {
    pub upserted: usize,
    pub deleted: usize,
    #[source]
    pub source: StoreError,
}

/// AppError
///
/// Error type returned by the JSON handlers. Each variant maps to one status code and
/// a `{ "error": ... }` body.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(message) => AppError::Conflict(message),
            other => AppError::Store(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Store(_) | AppError::Reconcile(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Persistence details stay in the logs.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
