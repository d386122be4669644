//! Model registry endpoints

use crate::api::{ApiError, ExtractToken};
use crate::core::traits::{AuthService, ModelService};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_models))
        .route("/download", post(download_model))
        .route("/:id", delete(delete_model))
}

async fn list_models(
    Inject(model_service): Inject<dyn ModelService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::ModelList>, ApiError> {
    auth_service.authenticate(&token).await?;

    let models = model_service.list_models().await?;
    Ok(Json(schemas::ModelList {
        models: models.into_iter().map(schemas::Model::from).collect(),
    }))
}

async fn download_model(
    Inject(model_service): Inject<dyn ModelService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Json(request): Json<schemas::DownloadModel>,
) -> Result<(StatusCode, Json<schemas::Model>), ApiError> {
    auth_service.authenticate(&token).await?;

    let model = model_service
        .start_download(request.name, request.source_id)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(model.into())))
}

async fn delete_model(
    Inject(model_service): Inject<dyn ModelService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(model_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    auth_service.require_admin(&token).await?;

    model_service.delete_model(model_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct DownloadModel {
        pub source_id: String,
        #[serde(default)]
        pub name: Option<String>,
    }

    #[derive(Serialize, Debug)]
    pub struct Model {
        pub id: Uuid,
        pub name: String,
        pub source_id: String,
        pub status: entities::DownloadStatus,
        pub path: Option<String>,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Model> for Model {
        fn from(model: entities::Model) -> Self {
            Model {
                id: model.id,
                name: model.name,
                source_id: model.source_id,
                status: model.status,
                path: model.path,
                created_at: model.created_at,
            }
        }
    }

    #[derive(Serialize, Debug, Default)]
    pub struct ModelList {
        pub models: Vec<Model>,
    }
}
