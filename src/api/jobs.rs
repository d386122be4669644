//! Training job endpoints
//!
//! The dashboard polls these; job state only ever moves forward, so a
//! plain GET per poll is all the scheduling there is.

use crate::api::{ApiError, ExtractToken};
use crate::core::traits::{AuthService, JobService, NewJob};
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_jobs))
        .route("/start", post(start_job))
        .route("/:id", get(job_detail))
}

async fn list_jobs(
    Inject(job_service): Inject<dyn JobService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::JobList>, ApiError> {
    auth_service.authenticate(&token).await?;

    let jobs = job_service.list_jobs().await?;
    Ok(Json(schemas::JobList {
        jobs: jobs.into_iter().map(schemas::Job::from).collect(),
    }))
}

async fn start_job(
    Inject(job_service): Inject<dyn JobService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Json(request): Json<schemas::StartJob>,
) -> Result<(StatusCode, Json<schemas::Job>), ApiError> {
    let user = auth_service.authenticate(&token).await?;

    let job = job_service
        .start_job(
            &user,
            NewJob {
                model_id: request.model_id,
                dataset_id: request.dataset_id,
                eval_dataset_id: request.eval_dataset_id,
                epochs: request.epochs,
                batch_size: request.batch_size,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(job.into())))
}

async fn job_detail(
    Inject(job_service): Inject<dyn JobService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(job_id): Path<Uuid>,
) -> Result<Json<schemas::JobDetail>, ApiError> {
    auth_service.authenticate(&token).await?;

    let detail = job_service.job_detail(job_id).await?;
    Ok(Json(detail.into()))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use crate::infrastructure::entities::{JobStatus, MetricRecord};
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct StartJob {
        pub model_id: Uuid,
        pub dataset_id: Uuid,
        #[serde(default)]
        pub eval_dataset_id: Option<Uuid>,
        #[serde(default)]
        pub epochs: Option<i64>,
        #[serde(default)]
        pub batch_size: Option<i64>,
    }

    #[derive(Serialize, Debug)]
    pub struct Job {
        pub id: Uuid,
        pub model_id: Uuid,
        pub dataset_id: Uuid,
        pub eval_dataset_id: Option<Uuid>,
        pub epochs: i64,
        pub batch_size: i64,
        pub status: JobStatus,
        pub created_at: DateTime<Utc>,
        pub completed_at: Option<DateTime<Utc>>,
    }

    impl From<entities::TrainingJob> for Job {
        fn from(job: entities::TrainingJob) -> Self {
            Job {
                id: job.id,
                model_id: job.model_id,
                dataset_id: job.dataset_id,
                eval_dataset_id: job.eval_dataset_id,
                epochs: job.epochs,
                batch_size: job.batch_size,
                status: job.status,
                created_at: job.created_at,
                completed_at: job.completed_at,
            }
        }
    }

    #[derive(Serialize, Debug, Default)]
    pub struct JobList {
        pub jobs: Vec<Job>,
    }

    /// The polling view: the job plus its logs, accumulated metric
    /// snapshots, and the names the dashboard shows next to them.
    #[derive(Serialize, Debug)]
    pub struct JobDetail {
        pub id: Uuid,
        pub model_id: Uuid,
        pub model_name: String,
        pub dataset_id: Uuid,
        pub dataset_filename: String,
        pub eval_dataset_id: Option<Uuid>,
        pub epochs: i64,
        pub batch_size: i64,
        pub status: JobStatus,
        pub logs: String,
        pub metrics: Vec<MetricRecord>,
        pub created_at: DateTime<Utc>,
        pub completed_at: Option<DateTime<Utc>>,
    }

    impl From<entities::TrainingJobDetail> for JobDetail {
        fn from(detail: entities::TrainingJobDetail) -> Self {
            let metrics = detail.job.metric_records();
            let job = detail.job;
            JobDetail {
                id: job.id,
                model_id: job.model_id,
                model_name: detail.model_name,
                dataset_id: job.dataset_id,
                dataset_filename: detail.dataset_filename,
                eval_dataset_id: job.eval_dataset_id,
                epochs: job.epochs,
                batch_size: job.batch_size,
                status: job.status,
                logs: job.logs,
                metrics,
                created_at: job.created_at,
                completed_at: job.completed_at,
            }
        }
    }
}
