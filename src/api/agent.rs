//! Code health endpoints

use crate::api::{ApiError, ExtractToken};
use crate::core::traits::{AgentService, AuthService};
use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/errors", get(list_errors))
        .route("/errors/:id", get(get_error))
}

async fn list_errors(
    Inject(agent_service): Inject<dyn AgentService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::ErrorList>, ApiError> {
    auth_service.require_admin(&token).await?;

    let errors = agent_service.list_errors().await?;
    Ok(Json(schemas::ErrorList {
        errors: errors
            .into_iter()
            .map(schemas::CapturedError::from)
            .collect(),
    }))
}

async fn get_error(
    Inject(agent_service): Inject<dyn AgentService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(error_id): Path<Uuid>,
) -> Result<Json<schemas::CapturedError>, ApiError> {
    auth_service.require_admin(&token).await?;

    let error = agent_service.get_error(error_id).await?;
    Ok(Json(error.into()))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::Serialize;
    use uuid::Uuid;

    #[derive(Serialize, Debug)]
    pub struct CapturedError {
        pub id: Uuid,
        pub traceback: String,
        pub file_path: Option<String>,
        pub line_number: Option<i64>,
        pub analysis: Option<String>,
        pub proposed_fix: Option<String>,
        pub status: entities::ErrorStatus,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::CapturedError> for CapturedError {
        fn from(error: entities::CapturedError) -> Self {
            CapturedError {
                id: error.id,
                traceback: error.traceback,
                file_path: error.file_path,
                line_number: error.line_number,
                analysis: error.analysis,
                proposed_fix: error.proposed_fix,
                status: error.status,
                created_at: error.created_at,
            }
        }
    }

    #[derive(Serialize, Debug, Default)]
    pub struct ErrorList {
        pub errors: Vec<CapturedError>,
    }
}
