use crate::core::traits::ServiceError;
use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use log::error;
use serde_json::json;
use thiserror::Error;

pub mod agent;
pub mod auth;
pub mod conversations;
pub mod datasets;
pub mod jobs;
pub mod models;
pub mod system;
pub mod users;

/// The whole versioned API surface; `main` nests this under `/api/v1`.
pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .nest("/auth", auth::router())
        .nest("/models", models::router())
        .nest("/datasets", datasets::router())
        .nest("/jobs", jobs::router())
        .nest("/conversations", conversations::router())
        .nest("/users", users::router())
        .nest("/agent", agent::router())
        .nest("/system", system::router())
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({ "message": "LLM studio backend is running!" }))
}

/// Raw bearer token from the `Authorization` header. Handlers hand it to
/// the auth service; requests without a usable header never reach them.
#[derive(Debug)]
pub struct ExtractToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, ApiError> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .ok_or(ApiError::Unauthorized)?
            .to_str()
            .map_err(|_| ApiError::Unauthorized)?;

        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or(ApiError::Unauthorized)?;

        if token.is_empty() {
            return Err(ApiError::Unauthorized);
        }
        Ok(ExtractToken(token.to_owned()))
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid bearer token")]
    Unauthorized,
    #[error("admin role required")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("internal server error")]
    Internal(#[source] anyhow::Error),
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidCredentials => ApiError::Unauthorized,
            ServiceError::Forbidden => ApiError::Forbidden,
            ServiceError::NotFound(what) => ApiError::NotFound(what),
            ServiceError::Validation(message) => ApiError::Validation(message),
            ServiceError::Conflict(message) => ApiError::Conflict(message),
            ServiceError::Database(e) => ApiError::Internal(anyhow::Error::from(e)),
            ServiceError::Internal(e) => ApiError::Internal(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(err) => {
                error!("internal error: {err:#}");
                crate::core::agent::report(format!("{err:#}"), None, None);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
