//! Database entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub default_epochs: i64,
    pub default_batch_size: i64,
    pub theme: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug, Clone, FromRow)]
pub struct Model {
    pub id: Uuid,
    pub name: String,
    pub source_id: String,
    pub path: Option<String>,
    pub status: DownloadStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Dataset {
    pub id: Uuid,
    pub owner: Uuid,
    pub filename: String,
    pub path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub user: Uuid,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::Type)]
#[repr(u8)]
pub enum MessageKind {
    System = 1,
    Bot = 2,
    User = 3,
}

#[derive(Debug, FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One metric snapshot appended by the training worker. Field names match
/// what the trainer emits per logging interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub step: i64,
    pub epoch: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eval_perplexity: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct TrainingJob {
    pub id: Uuid,
    pub model_id: Uuid,
    pub dataset_id: Uuid,
    pub eval_dataset_id: Option<Uuid>,
    pub epochs: i64,
    pub batch_size: i64,
    pub status: JobStatus,
    pub logs: String,
    /// JSON-encoded ordered list of [`MetricRecord`]s.
    pub metrics: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TrainingJob {
    pub fn metric_records(&self) -> Vec<MetricRecord> {
        serde_json::from_str(&self.metrics).unwrap_or_default()
    }
}

/// A job row joined with the names the dashboard shows next to it.
#[derive(Debug, FromRow)]
pub struct TrainingJobDetail {
    #[sqlx(flatten)]
    pub job: TrainingJob,
    pub model_name: String,
    pub dataset_filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    New,
    Analyzing,
    Analyzed,
    AnalysisFailed,
}

#[derive(Debug, Clone, FromRow)]
pub struct CapturedError {
    pub id: Uuid,
    pub traceback: String,
    pub file_path: Option<String>,
    pub line_number: Option<i64>,
    pub analysis: Option<String>,
    pub proposed_fix: Option<String>,
    pub status: ErrorStatus,
    pub created_at: DateTime<Utc>,
}
