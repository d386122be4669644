//! Conversations endpoints

use crate::GENERATION_SENDER;
use crate::api::{ApiError, ExtractToken};
use crate::core::generation::GenerationTask;
use crate::core::runtime::ChatMessage;
use crate::core::traits::{AuthService, ConversationService};
use anyhow::anyhow;
use async_stream::stream;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;
use futures_util::Stream;
use log::error;
use std::convert::Infallible;
use std::time::Duration;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_conversations).post(new_conversation))
        .route("/:id", get(get_conversation).delete(delete_conversation))
        .route(
            "/:id/messages",
            get(conversation_messages).post(post_message),
        )
}

async fn list_conversations(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
) -> Result<Json<schemas::ConversationList>, ApiError> {
    let user = auth_service.authenticate(&token).await?;

    let conversations = conversation_service.list_conversations(user.id).await?;
    Ok(Json(schemas::ConversationList {
        conversations: conversations
            .into_iter()
            .map(schemas::Conversation::from)
            .collect(),
    }))
}

async fn new_conversation(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Json(request): Json<schemas::CreateConversation>,
) -> Result<(StatusCode, Json<schemas::Conversation>), ApiError> {
    let user = auth_service.authenticate(&token).await?;

    let conversation = conversation_service
        .create_conversation(user.id, request.title)
        .await?;

    Ok((StatusCode::CREATED, Json(conversation.into())))
}

async fn get_conversation(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<schemas::Conversation>, ApiError> {
    let user = auth_service.authenticate(&token).await?;

    let conversation = conversation_service
        .get_conversation(user.id, conversation_id)
        .await?;
    Ok(Json(conversation.into()))
}

async fn delete_conversation(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(conversation_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let user = auth_service.authenticate(&token).await?;

    conversation_service
        .delete_conversation(user.id, conversation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn conversation_messages(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(conversation_id): Path<Uuid>,
) -> Result<Json<schemas::MessagesList>, ApiError> {
    let user = auth_service.authenticate(&token).await?;

    let messages = conversation_service
        .list_messages(user.id, conversation_id)
        .await?;

    Ok(Json(schemas::MessagesList {
        messages: messages.into_iter().map(schemas::Message::from).collect(),
    }))
}

/// Stores the user's message and streams the assistant's reply back as
/// SSE: one `new_message` event for the stored message, then a
/// `message_part` event per chunk. The assembled reply is stored as a
/// bot message when the stream ends.
async fn post_message(
    Inject(conversation_service): Inject<dyn ConversationService>,
    Inject(auth_service): Inject<dyn AuthService>,
    ExtractToken(token): ExtractToken,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<schemas::CreateMessage>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let user = auth_service.authenticate(&token).await?;

    if request.text.trim().is_empty() {
        return Err(ApiError::Validation("missing 'text'".to_owned()));
    }

    let model = conversation_service
        .resolve_chat_model(request.model_id)
        .await?;

    let message = conversation_service
        .create_user_message(user.id, conversation_id, request.text)
        .await?;

    let transcript: Vec<ChatMessage> = conversation_service
        .list_messages(user.id, conversation_id)
        .await?
        .into_iter()
        .map(ChatMessage::from)
        .collect();

    let (task, mut receiver) = GenerationTask::new(model.source_id, transcript);

    let sender = GENERATION_SENDER
        .get()
        .ok_or_else(|| ApiError::Internal(anyhow!("generation worker not running")))?;
    sender
        .send(task)
        .await
        .map_err(|_| ApiError::Internal(anyhow!("generation worker gone")))?;

    let message_id = Uuid::new_v4();
    let user_id = user.id;

    let stream = stream! {
        if let Ok(event) = Event::default()
            .event("new_message")
            .json_data(schemas::Message::from(message))
        {
            yield Ok(event);
        }

        let mut assistant_message = String::new();

        while let Some(message_part) = receiver.recv().await {
            assistant_message.push_str(&message_part);

            let part = schemas::MessagePart {
                conversation_id,
                message_id,
                message_part,
            };
            if let Ok(event) = Event::default()
                .event("message_part")
                .retry(Duration::from_millis(100))
                .json_data(part)
            {
                yield Ok(event);
            }
        }

        if let Err(e) = conversation_service
            .create_bot_message_with_id(user_id, conversation_id, assistant_message, message_id)
            .await
        {
            error!("failed to store assistant message for conversation {conversation_id}: {e}");
            crate::core::agent::report(
                format!("failed to store assistant message: {e}"),
                Some(file!()),
                Some(line!()),
            );
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct CreateConversation {
        #[serde(default)]
        pub title: Option<String>,
    }

    #[derive(Serialize, Debug)]
    pub struct Conversation {
        pub id: Uuid,
        pub title: Option<String>,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Conversation> for Conversation {
        fn from(conversation: entities::Conversation) -> Self {
            Conversation {
                id: conversation.id,
                title: conversation.title,
                created_at: conversation.created_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ConversationList {
        pub conversations: Vec<Conversation>,
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
    }

    #[derive(Serialize, Debug)]
    pub enum MessageKind {
        System,
        Bot,
        User,
    }

    impl From<entities::MessageKind> for MessageKind {
        fn from(kind: entities::MessageKind) -> Self {
            match kind {
                entities::MessageKind::System => MessageKind::System,
                entities::MessageKind::Bot => MessageKind::Bot,
                entities::MessageKind::User => MessageKind::User,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct Message {
        pub conversation_id: Uuid,
        pub id: Uuid,
        pub kind: MessageKind,
        pub text: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::Message> for Message {
        fn from(message: entities::Message) -> Self {
            Message {
                conversation_id: message.conversation_id,
                id: message.id,
                kind: message.kind.into(),
                text: message.text,
                created_at: message.created_at,
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        pub text: String,
        #[serde(default)]
        pub model_id: Option<Uuid>,
    }

    #[derive(Serialize, Debug)]
    pub struct MessagePart {
        pub conversation_id: Uuid,
        pub message_id: Uuid,
        pub message_part: String,
    }
}
