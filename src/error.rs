use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Everything that can go wrong below the HTTP layer. Each variant maps to
/// exactly one status code; detail carried by the internal variants is logged
/// and never echoed to the client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("Email already registered")]
    DuplicateEmail,
    #[error("Federated identity already linked")]
    DuplicateIdentity,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Invalid token")]
    TokenInvalid,
    #[error("Token expired")]
    TokenExpired,
    #[error("State mismatch")]
    StateMismatch,
    #[error("Not found")]
    NotFound,
    #[error("provider error: {0}")]
    Provider(anyhow::Error),
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("hashing error: {0}")]
    Hashing(anyhow::Error),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::DuplicateEmail | ApiError::DuplicateIdentity => StatusCode::CONFLICT,
            ApiError::InvalidCredentials
            | ApiError::TokenInvalid
            | ApiError::TokenExpired
            | ApiError::StateMismatch => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Provider(_)
            | ApiError::Storage(_)
            | ApiError::Hashing(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<crate::auth::jwt::TokenError> for ApiError {
    fn from(err: crate::auth::jwt::TokenError) -> Self {
        match err {
            crate::auth::jwt::TokenError::Expired => ApiError::TokenExpired,
            crate::auth::jwt::TokenError::Invalid => ApiError::TokenInvalid,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Provider(anyhow::Error::new(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Provider(e) => {
                error!(error = %e, "provider call failed");
                "Provider error".to_string()
            }
            ApiError::Storage(e) => {
                error!(error = %e, "storage failure");
                "Internal error".to_string()
            }
            ApiError::Hashing(e) => {
                error!(error = %e, "hashing failure");
                "Internal error".to_string()
            }
            ApiError::Internal(e) => {
                error!(error = %e, "internal failure");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variants_map_to_expected_status() {
        assert_eq!(
            ApiError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::DuplicateEmail.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::DuplicateIdentity.status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::InvalidCredentials.status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::TokenInvalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::TokenExpired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::StateMismatch.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::Provider(anyhow::anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Storage(sqlx::Error::RowNotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn internal_detail_is_not_echoed() {
        let response = ApiError::Storage(sqlx::Error::PoolTimedOut).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("Internal error"));
        assert!(!text.contains("timed out"));
    }
}
