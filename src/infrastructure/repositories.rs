//! DB Repository abstractions

use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{
    CapturedError, Conversation, Dataset, DownloadStatus, ErrorStatus, JobStatus, Message,
    MetricRecord, Model, Role, TrainingJob, TrainingJobDetail, User,
};
use crate::infrastructure::traits::{
    ConversationRepository, DatasetRepository, ErrorRepository, ModelRepository,
    TrainingJobRepository, UserRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use di::{Ref, injectable};
use uuid::Uuid;

#[injectable(UserRepository)]
pub struct DbUserRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbUserRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        DbUserRepository { connection }
    }
}

#[async_trait]
impl UserRepository for DbUserRepository {
    async fn count_users(&self) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&**self.connection)
            .await?;
        Ok(row.0)
    }

    async fn create_user(&self, user: User) -> Result<User, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO users (id, username, email, password_hash, role, default_epochs, default_batch_size, theme, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(user.id)
        .bind(user.username)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.role)
        .bind(user.default_epochs)
        .bind(user.default_batch_size)
        .bind(user.theme)
        .bind(user.created_at)
        .fetch_one(&**self.connection)
        .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&**self.connection)
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&**self.connection)
            .await
    }

    async fn list_users(&self) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM users ORDER BY datetime(created_at) ASC")
            .fetch_all(&**self.connection)
            .await
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<u64, sqlx::Error> {
        sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role)
            .bind(id)
            .execute(&**self.connection)
            .await
            .map(|r| r.rows_affected())
    }

    async fn update_settings(
        &self,
        id: Uuid,
        default_epochs: i64,
        default_batch_size: i64,
        theme: &str,
    ) -> Result<u64, sqlx::Error> {
        sqlx::query(
            "UPDATE users SET default_epochs = ?, default_batch_size = ?, theme = ? WHERE id = ?",
        )
        .bind(default_epochs)
        .bind(default_batch_size)
        .bind(theme)
        .bind(id)
        .execute(&**self.connection)
        .await
        .map(|r| r.rows_affected())
    }

    async fn delete_user(&self, id: Uuid) -> Result<u64, sqlx::Error> {
        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&**self.connection)
            .await
            .map(|r| r.rows_affected())
    }

    async fn create_session(
        &self,
        token_hash: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sessions (token_hash, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(token_hash)
        .bind(user_id)
        .bind(Utc::now())
        .bind(expires_at)
        .execute(&**self.connection)
        .await
        .map(|_| ())
    }

    async fn find_user_by_session(&self, token_hash: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as(
            "SELECT users.* FROM users INNER JOIN sessions ON sessions.user_id = users.id \
             WHERE sessions.token_hash = ? AND datetime(sessions.expires_at) > datetime('now')",
        )
        .bind(token_hash)
        .fetch_optional(&**self.connection)
        .await
    }
}

#[injectable(ModelRepository)]
pub struct DbModelRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbModelRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        DbModelRepository { connection }
    }
}

#[async_trait]
impl ModelRepository for DbModelRepository {
    async fn list_models(&self) -> Result<Vec<Model>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM models ORDER BY datetime(created_at) ASC")
            .fetch_all(&**self.connection)
            .await
    }

    async fn create_model(&self, model: Model) -> Result<Model, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO models (id, name, source_id, path, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(model.id)
        .bind(model.name)
        .bind(model.source_id)
        .bind(model.path)
        .bind(model.status)
        .bind(model.created_at)
        .fetch_one(&**self.connection)
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Model>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM models WHERE id = ?")
            .bind(id)
            .fetch_optional(&**self.connection)
            .await
    }

    async fn find_by_source(&self, source_id: &str) -> Result<Option<Model>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM models WHERE source_id = ?")
            .bind(source_id)
            .fetch_optional(&**self.connection)
            .await
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: DownloadStatus,
        path: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        sqlx::query("UPDATE models SET status = ?, path = COALESCE(?, path) WHERE id = ?")
            .bind(status)
            .bind(path)
            .bind(id)
            .execute(&**self.connection)
            .await
            .map(|r| r.rows_affected())
    }

    async fn first_ready(&self) -> Result<Option<Model>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM models WHERE status = ? ORDER BY datetime(created_at) ASC LIMIT 1",
        )
        .bind(DownloadStatus::Ready)
        .fetch_optional(&**self.connection)
        .await
    }

    async fn delete_model(&self, id: Uuid) -> Result<u64, sqlx::Error> {
        sqlx::query("DELETE FROM models WHERE id = ?")
            .bind(id)
            .execute(&**self.connection)
            .await
            .map(|r| r.rows_affected())
    }
}

#[injectable(DatasetRepository)]
pub struct DbDatasetRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbDatasetRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        DbDatasetRepository { connection }
    }
}

#[async_trait]
impl DatasetRepository for DbDatasetRepository {
    async fn list_datasets(&self) -> Result<Vec<Dataset>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM datasets ORDER BY datetime(created_at) ASC")
            .fetch_all(&**self.connection)
            .await
    }

    async fn create_dataset(&self, dataset: Dataset) -> Result<Dataset, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO datasets (id, owner, filename, path, created_at) \
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(dataset.id)
        .bind(dataset.owner)
        .bind(dataset.filename)
        .bind(dataset.path)
        .bind(dataset.created_at)
        .fetch_one(&**self.connection)
        .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Dataset>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM datasets WHERE id = ?")
            .bind(id)
            .fetch_optional(&**self.connection)
            .await
    }

    async fn find_by_filename(&self, filename: &str) -> Result<Option<Dataset>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM datasets WHERE filename = ?")
            .bind(filename)
            .fetch_optional(&**self.connection)
            .await
    }

    async fn delete_dataset(&self, id: Uuid) -> Result<u64, sqlx::Error> {
        sqlx::query("DELETE FROM datasets WHERE id = ?")
            .bind(id)
            .execute(&**self.connection)
            .await
            .map(|r| r.rows_affected())
    }
}

#[injectable(TrainingJobRepository)]
pub struct DbTrainingJobRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbTrainingJobRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        DbTrainingJobRepository { connection }
    }
}

#[async_trait]
impl TrainingJobRepository for DbTrainingJobRepository {
    async fn create_job(&self, job: TrainingJob) -> Result<TrainingJob, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO training_jobs (id, model_id, dataset_id, eval_dataset_id, epochs, batch_size, status, logs, metrics, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(job.id)
        .bind(job.model_id)
        .bind(job.dataset_id)
        .bind(job.eval_dataset_id)
        .bind(job.epochs)
        .bind(job.batch_size)
        .bind(job.status)
        .bind(job.logs)
        .bind(job.metrics)
        .bind(job.created_at)
        .fetch_one(&**self.connection)
        .await
    }

    async fn list_jobs(&self) -> Result<Vec<TrainingJob>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM training_jobs ORDER BY datetime(created_at) DESC")
            .fetch_all(&**self.connection)
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<TrainingJob>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM training_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&**self.connection)
            .await
    }

    async fn find_detail(&self, id: Uuid) -> Result<Option<TrainingJobDetail>, sqlx::Error> {
        sqlx::query_as(
            "SELECT training_jobs.*, models.name AS model_name, datasets.filename AS dataset_filename \
             FROM training_jobs \
             INNER JOIN models ON models.id = training_jobs.model_id \
             INNER JOIN datasets ON datasets.id = training_jobs.dataset_id \
             WHERE training_jobs.id = ?",
        )
        .bind(id)
        .fetch_optional(&**self.connection)
        .await
    }

    async fn set_running(&self, id: Uuid) -> Result<u64, sqlx::Error> {
        sqlx::query("UPDATE training_jobs SET status = ?, logs = logs || ? WHERE id = ? AND status = ?")
            .bind(JobStatus::Running)
            .bind("Training started...\n")
            .bind(id)
            .bind(JobStatus::Pending)
            .execute(&**self.connection)
            .await
            .map(|r| r.rows_affected())
    }

    async fn complete_job(&self, id: Uuid, log_line: &str) -> Result<u64, sqlx::Error> {
        sqlx::query(
            "UPDATE training_jobs SET status = ?, completed_at = ?, logs = logs || ? \
             WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Completed)
        .bind(Utc::now())
        .bind(log_line)
        .bind(id)
        .bind(JobStatus::Running)
        .execute(&**self.connection)
        .await
        .map(|r| r.rows_affected())
    }

    async fn fail_job(&self, id: Uuid, error_text: &str) -> Result<u64, sqlx::Error> {
        sqlx::query(
            "UPDATE training_jobs SET status = ?, logs = logs || ? WHERE id = ? AND status = ?",
        )
        .bind(JobStatus::Failed)
        .bind(format!("\nERROR: {error_text}\n"))
        .bind(id)
        .bind(JobStatus::Running)
        .execute(&**self.connection)
        .await
        .map(|r| r.rows_affected())
    }

    async fn append_metric(
        &self,
        id: Uuid,
        record: MetricRecord,
        raw_line: &str,
    ) -> Result<(), sqlx::Error> {
        let current: Option<(String,)> =
            sqlx::query_as("SELECT metrics FROM training_jobs WHERE id = ?")
                .bind(id)
                .fetch_optional(&**self.connection)
                .await?;
        let Some((metrics,)) = current else {
            return Ok(());
        };

        let mut records: Vec<MetricRecord> = serde_json::from_str(&metrics).unwrap_or_default();
        records.push(record);
        let encoded = serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_owned());

        sqlx::query("UPDATE training_jobs SET metrics = ?, logs = logs || ? WHERE id = ?")
            .bind(encoded)
            .bind(format!("{raw_line}\n"))
            .bind(id)
            .execute(&**self.connection)
            .await
            .map(|_| ())
    }

    async fn append_logs(&self, id: Uuid, line: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE training_jobs SET logs = logs || ? WHERE id = ?")
            .bind(format!("{line}\n"))
            .bind(id)
            .execute(&**self.connection)
            .await
            .map(|_| ())
    }
}

#[injectable(ConversationRepository)]
pub struct DbConversationRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbConversationRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        DbConversationRepository { connection }
    }
}

#[async_trait]
impl ConversationRepository for DbConversationRepository {
    async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<Conversation>, sqlx::Error> {
        sqlx::query_as(
            "SELECT * FROM conversations WHERE user = ? ORDER BY datetime(created_at) ASC",
        )
        .bind(user_id)
        .fetch_all(&**self.connection)
        .await
    }

    async fn create_conversation(
        &self,
        conversation: Conversation,
    ) -> Result<Conversation, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO conversations (id, user, title, created_at) VALUES (?, ?, ?, ?) RETURNING *",
        )
        .bind(conversation.id)
        .bind(conversation.user)
        .bind(conversation.title)
        .bind(conversation.created_at)
        .fetch_one(&**self.connection)
        .await
    }

    async fn find_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Option<Conversation>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM conversations WHERE id = ? AND user = ?")
            .bind(conversation_id)
            .bind(user_id)
            .fetch_optional(&**self.connection)
            .await
    }

    async fn delete_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<u64, sqlx::Error> {
        sqlx::query("DELETE FROM conversations WHERE id = ? AND user = ?")
            .bind(conversation_id)
            .bind(user_id)
            .execute(&**self.connection)
            .await
            .map(|r| r.rows_affected())
    }

    async fn list_conversation_messages(
        &self,
        user_id: Uuid,
        conversation: Uuid,
    ) -> Result<Vec<Message>, sqlx::Error> {
        sqlx::query_as(
            "SELECT messages.id, messages.conversation_id, messages.kind, messages.created_at, messages.text \
             FROM messages INNER JOIN conversations ON conversations.id = messages.conversation_id \
             WHERE conversation_id = ? AND user = ? ORDER BY datetime(messages.created_at) ASC",
        )
        .bind(conversation)
        .bind(user_id)
        .fetch_all(&**self.connection)
        .await
    }

    async fn create_message(&self, message: Message) -> Result<Message, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO messages (id, conversation_id, kind, created_at, text) \
             VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(message.id)
        .bind(message.conversation_id)
        .bind(message.kind)
        .bind(message.created_at)
        .bind(message.text)
        .fetch_one(&**self.connection)
        .await
    }
}

#[injectable(ErrorRepository)]
pub struct DbErrorRepository {
    connection: Ref<DatabaseConnection>,
}

impl DbErrorRepository {
    pub fn new(connection: Ref<DatabaseConnection>) -> Self {
        DbErrorRepository { connection }
    }
}

#[async_trait]
impl ErrorRepository for DbErrorRepository {
    async fn insert_error(&self, error: CapturedError) -> Result<CapturedError, sqlx::Error> {
        sqlx::query_as(
            "INSERT INTO captured_errors (id, traceback, file_path, line_number, analysis, proposed_fix, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(error.id)
        .bind(error.traceback)
        .bind(error.file_path)
        .bind(error.line_number)
        .bind(error.analysis)
        .bind(error.proposed_fix)
        .bind(error.status)
        .bind(error.created_at)
        .fetch_one(&**self.connection)
        .await
    }

    async fn list_errors(&self) -> Result<Vec<CapturedError>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM captured_errors ORDER BY datetime(created_at) DESC")
            .fetch_all(&**self.connection)
            .await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<CapturedError>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM captured_errors WHERE id = ?")
            .bind(id)
            .fetch_optional(&**self.connection)
            .await
    }

    async fn set_status(&self, id: Uuid, status: ErrorStatus) -> Result<u64, sqlx::Error> {
        sqlx::query("UPDATE captured_errors SET status = ? WHERE id = ?")
            .bind(status)
            .bind(id)
            .execute(&**self.connection)
            .await
            .map(|r| r.rows_affected())
    }

    async fn set_analysis(
        &self,
        id: Uuid,
        analysis: &str,
        proposed_fix: &str,
    ) -> Result<u64, sqlx::Error> {
        sqlx::query(
            "UPDATE captured_errors SET analysis = ?, proposed_fix = ?, status = ? WHERE id = ?",
        )
        .bind(analysis)
        .bind(proposed_fix)
        .bind(ErrorStatus::Analyzed)
        .bind(id)
        .execute(&**self.connection)
        .await
        .map(|r| r.rows_affected())
    }

    async fn set_analysis_failed(&self, id: Uuid, failure: &str) -> Result<u64, sqlx::Error> {
        sqlx::query("UPDATE captured_errors SET analysis = ?, status = ? WHERE id = ?")
            .bind(failure)
            .bind(ErrorStatus::AnalysisFailed)
            .bind(id)
            .execute(&**self.connection)
            .await
            .map(|r| r.rows_affected())
    }
}
