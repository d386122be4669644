//! Infrastructure traits, used for DI on higher levels

use crate::infrastructure::entities;
use crate::infrastructure::entities::{DownloadStatus, ErrorStatus, MetricRecord, Role};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn count_users(&self) -> Result<i64, sqlx::Error>;

    async fn create_user(&self, user: entities::User) -> Result<entities::User, sqlx::Error>;

    async fn find_by_username(&self, username: &str)
    -> Result<Option<entities::User>, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<entities::User>, sqlx::Error>;

    async fn list_users(&self) -> Result<Vec<entities::User>, sqlx::Error>;

    /// Returns the number of rows changed, zero when the user is unknown.
    async fn update_role(&self, id: Uuid, role: Role) -> Result<u64, sqlx::Error>;

    async fn update_settings(
        &self,
        id: Uuid,
        default_epochs: i64,
        default_batch_size: i64,
        theme: &str,
    ) -> Result<u64, sqlx::Error>;

    async fn delete_user(&self, id: Uuid) -> Result<u64, sqlx::Error>;

    async fn create_session(
        &self,
        token_hash: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error>;

    /// Resolves an unexpired session token hash to its user.
    async fn find_user_by_session(
        &self,
        token_hash: &str,
    ) -> Result<Option<entities::User>, sqlx::Error>;
}

#[async_trait]
pub trait ModelRepository: Send + Sync {
    async fn list_models(&self) -> Result<Vec<entities::Model>, sqlx::Error>;

    async fn create_model(&self, model: entities::Model) -> Result<entities::Model, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<entities::Model>, sqlx::Error>;

    async fn find_by_source(&self, source_id: &str)
    -> Result<Option<entities::Model>, sqlx::Error>;

    async fn set_status(
        &self,
        id: Uuid,
        status: DownloadStatus,
        path: Option<&str>,
    ) -> Result<u64, sqlx::Error>;

    /// The oldest model that finished downloading, if any.
    async fn first_ready(&self) -> Result<Option<entities::Model>, sqlx::Error>;

    async fn delete_model(&self, id: Uuid) -> Result<u64, sqlx::Error>;
}

#[async_trait]
pub trait DatasetRepository: Send + Sync {
    async fn list_datasets(&self) -> Result<Vec<entities::Dataset>, sqlx::Error>;

    async fn create_dataset(
        &self,
        dataset: entities::Dataset,
    ) -> Result<entities::Dataset, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<entities::Dataset>, sqlx::Error>;

    async fn find_by_filename(
        &self,
        filename: &str,
    ) -> Result<Option<entities::Dataset>, sqlx::Error>;

    async fn delete_dataset(&self, id: Uuid) -> Result<u64, sqlx::Error>;
}

#[async_trait]
pub trait TrainingJobRepository: Send + Sync {
    async fn create_job(
        &self,
        job: entities::TrainingJob,
    ) -> Result<entities::TrainingJob, sqlx::Error>;

    async fn list_jobs(&self) -> Result<Vec<entities::TrainingJob>, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<entities::TrainingJob>, sqlx::Error>;

    async fn find_detail(
        &self,
        id: Uuid,
    ) -> Result<Option<entities::TrainingJobDetail>, sqlx::Error>;

    /// `pending -> running`. Returns zero when the job was not pending, so
    /// no other transition is reachable through this call.
    async fn set_running(&self, id: Uuid) -> Result<u64, sqlx::Error>;

    /// `running -> completed`, stamping `completed_at`.
    async fn complete_job(&self, id: Uuid, log_line: &str) -> Result<u64, sqlx::Error>;

    /// `running -> failed`, appending the failure text to the logs.
    async fn fail_job(&self, id: Uuid, error_text: &str) -> Result<u64, sqlx::Error>;

    async fn append_metric(
        &self,
        id: Uuid,
        record: MetricRecord,
        raw_line: &str,
    ) -> Result<(), sqlx::Error>;

    async fn append_logs(&self, id: Uuid, line: &str) -> Result<(), sqlx::Error>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<entities::Conversation>, sqlx::Error>;

    async fn create_conversation(
        &self,
        conversation: entities::Conversation,
    ) -> Result<entities::Conversation, sqlx::Error>;

    async fn find_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<entities::Conversation>, sqlx::Error>;

    /// Deletes the conversation when it belongs to the user; messages go
    /// with it by cascade. Returns the number of conversations removed.
    async fn delete_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<u64, sqlx::Error>;

    async fn list_conversation_messages(
        &self,
        user_id: Uuid,
        conversation: Uuid,
    ) -> Result<Vec<entities::Message>, sqlx::Error>;

    async fn create_message(
        &self,
        message: entities::Message,
    ) -> Result<entities::Message, sqlx::Error>;
}

#[async_trait]
pub trait ErrorRepository: Send + Sync {
    async fn insert_error(
        &self,
        error: entities::CapturedError,
    ) -> Result<entities::CapturedError, sqlx::Error>;

    async fn list_errors(&self) -> Result<Vec<entities::CapturedError>, sqlx::Error>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<entities::CapturedError>, sqlx::Error>;

    async fn set_status(&self, id: Uuid, status: ErrorStatus) -> Result<u64, sqlx::Error>;

    async fn set_analysis(
        &self,
        id: Uuid,
        analysis: &str,
        proposed_fix: &str,
    ) -> Result<u64, sqlx::Error>;

    async fn set_analysis_failed(&self, id: Uuid, failure: &str) -> Result<u64, sqlx::Error>;
}
