//! Chats endpoints

use crate::api::chats::schemas::{ChatList, CreateChat, CreateMessage};
use crate::api::{ApiError, ExtractUser};
use crate::core::inference::InferenceService;
use crate::core::traits::ChatService;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Json, Router};
use di_axum::Inject;
use log::{error, info};
use std::sync::Arc;
use uuid::Uuid;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_chats).post(new_chat))
        .route("/:id/messages", get(chat_messages).post(post_message))
}

async fn list_chats(
    Inject(chat_service): Inject<dyn ChatService>,
    ExtractUser(current_user): ExtractUser,
) -> Result<Json<ChatList>, ApiError> {
    let chats = chat_service
        .list_chats(current_user)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(ChatList {
        chats: chats.into_iter().map(schemas::Chat::from).collect(),
    }))
}

async fn new_chat(
    Inject(chat_service): Inject<dyn ChatService>,
    Extension(inference): Extension<Arc<InferenceService>>,
    ExtractUser(current_user): ExtractUser,
    Json(create_chat): Json<CreateChat>,
) -> Result<(StatusCode, Json<schemas::Chat>), ApiError> {
    if inference.descriptor(&create_chat.model).is_none() {
        return Err(ApiError::not_found(format!(
            "unknown model: {}",
            create_chat.model
        )));
    }

    let chat = chat_service
        .create_chat(current_user, &create_chat.model)
        .await
        .map_err(ApiError::internal)?;

    Ok((StatusCode::CREATED, Json(chat.into())))
}

async fn chat_messages(
    Inject(chat_service): Inject<dyn ChatService>,
    Path(chat_id): Path<Uuid>,
    ExtractUser(current_user): ExtractUser,
) -> Result<Json<schemas::MessagesList>, ApiError> {
    if chat_service
        .get_chat(current_user, chat_id)
        .await
        .map_err(ApiError::internal)?
        .is_none()
    {
        return Err(ApiError::not_found(format!("chat {chat_id} not found")));
    }

    let messages = chat_service
        .list_messages(current_user, chat_id)
        .await
        .map_err(ApiError::internal)?;

    Ok(Json(schemas::MessagesList {
        messages: messages.into_iter().map(schemas::Message::from).collect(),
    }))
}

async fn post_message(
    Inject(chat_service): Inject<dyn ChatService>,
    Extension(inference): Extension<Arc<InferenceService>>,
    ExtractUser(current_user): ExtractUser,
    Path(chat_id): Path<Uuid>,
    Json(message): Json<CreateMessage>,
) -> Result<Json<schemas::Completion>, ApiError> {
    let Some(chat) = chat_service
        .get_chat(current_user, chat_id)
        .await
        .map_err(ApiError::internal)?
    else {
        return Err(ApiError::not_found(format!("chat {chat_id} not found")));
    };

    let history = chat_service
        .get_history(current_user, chat_id)
        .await
        .map_err(ApiError::internal)?;

    let response = inference
        .request_completion(&chat.model_name, &message.message, &history)
        .await?;

    // The reply is returned whether or not it can be stored.
    let saved_message = message.message.clone();
    let saved_response = response.clone();
    tokio::spawn(async move {
        match chat_service
            .save_turn(current_user, chat_id, saved_message, saved_response)
            .await
        {
            Ok(saved) => info!("Saved turn {} in chat {chat_id}", saved.id),
            Err(e) => error!("failed to save turn in chat {chat_id}: {e:#}"),
        }
    });

    Ok(Json(schemas::Completion {
        chat_id,
        model: chat.model_name,
        response,
    }))
}

pub mod schemas {
    use crate::infrastructure::entities;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Deserialize, Debug)]
    pub struct CreateChat {
        pub model: String,
    }

    #[derive(Serialize, Debug)]
    pub struct Chat {
        pub id: Uuid,
        pub title: String,
        pub model: String,
        pub created_at: DateTime<Utc>,
        pub updated_at: DateTime<Utc>,
    }

    impl From<entities::Chat> for Chat {
        fn from(chat: entities::Chat) -> Self {
            Chat {
                id: chat.id,
                title: chat.title,
                model: chat.model_name,
                created_at: chat.created_at,
                updated_at: chat.updated_at,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ChatList {
        pub chats: Vec<Chat>,
    }

    #[derive(Serialize, Debug, Default)]
    pub struct MessagesList {
        pub messages: Vec<Message>,
    }

    #[derive(Serialize, Debug)]
    pub struct Message {
        pub chat_id: Uuid,
        pub id: Uuid,
        pub user_message: String,
        pub assistant_response: String,
        pub created_at: DateTime<Utc>,
    }

    impl From<entities::ChatMessage> for Message {
        fn from(message: entities::ChatMessage) -> Self {
            Message {
                chat_id: message.chat_id,
                id: message.id,
                user_message: message.user_message,
                assistant_response: message.assistant_response,
                created_at: message.created_at,
            }
        }
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        pub message: String,
    }

    #[derive(Serialize, Debug)]
    pub struct Completion {
        pub chat_id: Uuid,
        pub model: String,
        pub response: String,
    }
}
