use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::auth::AuthError;

/// Outcome of a failed lifecycle operation, as seen by the caller.
///
/// `NotFound` covers unknown names, names outside the workspace convention
/// and workspaces owned by someone else; callers cannot tell them apart.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Not Authorized")]
    Unauthorized,

    #[error("Not found")]
    NotFound,

    #[error("{0}")]
    Internal(String),
}

impl From<AuthError> for LifecycleError {
    fn from(err: AuthError) -> Self {
        LifecycleError::Internal(err.to_string())
    }
}

impl LifecycleError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            LifecycleError::Unauthorized => StatusCode::UNAUTHORIZED,
            LifecycleError::NotFound => StatusCode::NOT_FOUND,
            LifecycleError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for LifecycleError {
    fn into_response(self) -> Response {
        if let LifecycleError::Internal(message) = &self {
            tracing::error!("Lifecycle operation failed: {}", message);
        }
        (
            self.status_code(),
            Json(json!({ "message": self.to_string() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            LifecycleError::Unauthorized.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(LifecycleError::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            LifecycleError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(LifecycleError::Internal("boom".into()).to_string(), "boom");
    }
}
