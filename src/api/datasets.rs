//! Dataset endpoints

use crate::api::{ApiError, ExtractToken};
use crate::core::traits::{AuthService, DatasetService};
use axum::extract::{Multipart, Path};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_datasets))
        .route("/upload", post(upload_dataset))
        .route("/:id", delete(delete_dataset))
}

async fn list_datasets(
    Inject(dataset_service): Inject<dyn DatasetService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::DatasetList>, ApiError> {
    auth_service.authenticate(&token).await?;

    let datasets = dataset_service.list_datasets().await?;
    Ok(Json(schemas::DatasetList {
        datasets: datasets.into_iter().map(schemas::Dataset::from).collect(),
    }))
}

async fn upload_dataset(
    Inject(dataset_service): Inject<dyn DatasetService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<schemas::Dataset>), ApiError> {
    let user = auth_service.authenticate(&token).await?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("broken multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| ApiError::Validation("file field has no filename".to_owned()))?;
        let contents = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("broken upload: {e}")))?;

        let dataset = dataset_service
            .store_upload(user.id, &filename, &contents)
            .await?;
        return Ok((StatusCode::CREATED, Json(dataset.into())));
    }

    Err(ApiError::Validation("missing 'file' field".to_owned()))
}

async fn delete_dataset(
    Inject(dataset_service): Inject<dyn DatasetService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(dataset_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user = auth_service.authenticate(&token).await?;

    dataset_service.delete_dataset(&user, dataset_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::Serialize;
    use uuid::Uuid;

    #[derive(Serialize, Debug)]
    pub struct Dataset {
        pub id: Uuid,
        pub owner: Uuid,
        pub filename: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Dataset> for Dataset {
        fn from(dataset: entities::Dataset) -> Self {
            Dataset {
                id: dataset.id,
                owner: dataset.owner,
                filename: dataset.filename,
                created_at: dataset.created_at,
            }
        }
    }

    #[derive(Serialize, Debug, Default)]
    pub struct DatasetList {
        pub datasets: Vec<Dataset>,
    }
}
