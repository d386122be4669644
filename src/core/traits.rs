//! DI "Interfaces"

use crate::infrastructure::entities;
use crate::infrastructure::entities::{MessageKind, Role};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the service layer; the API layer maps these onto
/// status codes.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("forbidden")]
    Forbidden,
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The user a bearer token resolved to.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: Uuid,
    pub username: String,
    pub role: Role,
}

impl AuthedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Everything a new training job needs from the request; unset
/// hyperparameters fall back to the submitting user's settings.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub model_id: Uuid,
    pub dataset_id: Uuid,
    pub eval_dataset_id: Option<Uuid>,
    pub epochs: Option<i64>,
    pub batch_size: Option<i64>,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Registers a new account. The first account ever created becomes the
    /// admin; everyone after that is a regular user.
    async fn register(
        &self,
        username: String,
        email: String,
        password: String,
    ) -> Result<entities::User, ServiceError>;

    /// Verifies credentials and issues a fresh bearer token.
    async fn login(
        &self,
        username: String,
        password: String,
    ) -> Result<(String, entities::User), ServiceError>;

    /// Resolves a bearer token to its user, or `InvalidCredentials`.
    async fn authenticate(&self, token: &str) -> Result<AuthedUser, ServiceError>;

    /// Like [`authenticate`](AuthService::authenticate), but also demands
    /// the admin role.
    async fn require_admin(&self, token: &str) -> Result<AuthedUser, ServiceError> {
        let user = self.authenticate(token).await?;
        if user.is_admin() {
            Ok(user)
        } else {
            Err(ServiceError::Forbidden)
        }
    }
}

#[async_trait]
pub trait ModelService: Send + Sync {
    async fn list_models(&self) -> Result<Vec<entities::Model>, ServiceError>;

    /// Records a `pending` model row and kicks off the runtime pull in the
    /// background; the row flips to `ready` or `failed` when it finishes.
    async fn start_download(
        &self,
        name: Option<String>,
        source_id: String,
    ) -> Result<entities::Model, ServiceError>;

    async fn delete_model(&self, id: Uuid) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait DatasetService: Send + Sync {
    async fn list_datasets(&self) -> Result<Vec<entities::Dataset>, ServiceError>;

    /// Stores an uploaded file under the datasets directory and records it.
    ///
    /// Returns `Conflict` if a dataset with the same (sanitized) filename
    /// already exists.
    async fn store_upload(
        &self,
        owner: Uuid,
        filename: &str,
        contents: &[u8],
    ) -> Result<entities::Dataset, ServiceError>;

    /// Removes the dataset row and its stored file. Owner or admin only.
    async fn delete_dataset(&self, user: &AuthedUser, id: Uuid) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait JobService: Send + Sync {
    async fn list_jobs(&self) -> Result<Vec<entities::TrainingJob>, ServiceError>;

    /// Validates the referenced model and datasets, writes the `pending`
    /// row, and hands the job id to the training worker.
    async fn start_job(
        &self,
        user: &AuthedUser,
        new_job: NewJob,
    ) -> Result<entities::TrainingJob, ServiceError>;

    async fn job_detail(&self, id: Uuid) -> Result<entities::TrainingJobDetail, ServiceError>;
}

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Lists all conversations for the given user.
    async fn list_conversations(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<entities::Conversation>, ServiceError>;

    /// Creates a new conversation for the given user, seeded with the
    /// assistant system prompt.
    async fn create_conversation(
        &self,
        user_id: Uuid,
        title: Option<String>,
    ) -> Result<entities::Conversation, ServiceError>;

    /// Fetches one conversation owned by the given user.
    async fn get_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<entities::Conversation, ServiceError>;

    /// Deletes a given conversation from the given user.
    ///
    /// Returns `NotFound` if the conversation did not exist or belongs to
    /// someone else.
    async fn delete_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<(), ServiceError>;

    /// List all messages in a conversation.
    ///
    /// Returns `NotFound` if the user doesn't own this conversation.
    async fn list_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> Result<Vec<entities::Message>, ServiceError>;

    /// Picks the chat model: the given one (which must be `ready`), or the
    /// oldest ready model when none is given.
    async fn resolve_chat_model(
        &self,
        model_id: Option<Uuid>,
    ) -> Result<entities::Model, ServiceError>;

    /// Creates a new message in a conversation.
    ///
    /// The helper functions `create_X_message` should be used instead for
    /// clarity.
    async fn create_raw_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        kind: MessageKind,
        content: String,
        message_id: Uuid,
    ) -> Result<entities::Message, ServiceError>;

    /// Create a new user message in a conversation.
    async fn create_user_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: String,
    ) -> Result<entities::Message, ServiceError> {
        self.create_raw_message(
            user_id,
            conversation_id,
            MessageKind::User,
            message,
            Uuid::new_v4(),
        )
        .await
    }

    /// Create a new bot message under a caller-chosen id, so the SSE stream
    /// can reference the message before it is stored.
    async fn create_bot_message_with_id(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: String,
        message_id: Uuid,
    ) -> Result<entities::Message, ServiceError> {
        self.create_raw_message(user_id, conversation_id, MessageKind::Bot, message, message_id)
            .await
    }

    /// Create a new system message in a conversation.
    async fn create_system_message(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        message: String,
    ) -> Result<entities::Message, ServiceError> {
        self.create_raw_message(
            user_id,
            conversation_id,
            MessageKind::System,
            message,
            Uuid::new_v4(),
        )
        .await
    }
}

#[async_trait]
pub trait UserService: Send + Sync {
    async fn list_users(&self) -> Result<Vec<entities::User>, ServiceError>;

    async fn get_user(&self, id: Uuid) -> Result<entities::User, ServiceError>;

    async fn set_role(&self, id: Uuid, role: Role) -> Result<entities::User, ServiceError>;

    async fn delete_user(&self, id: Uuid) -> Result<(), ServiceError>;

    async fn get_settings(&self, user_id: Uuid) -> Result<entities::User, ServiceError>;

    async fn update_settings(
        &self,
        user_id: Uuid,
        default_epochs: i64,
        default_batch_size: i64,
        theme: String,
    ) -> Result<entities::User, ServiceError>;
}

#[async_trait]
pub trait AgentService: Send + Sync {
    async fn list_errors(&self) -> Result<Vec<entities::CapturedError>, ServiceError>;

    async fn get_error(&self, id: Uuid) -> Result<entities::CapturedError, ServiceError>;
}
