//! Database entities

use crate::core::window::ChatTurn;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct Chat {
    pub id: Uuid,
    pub user: Uuid,
    /// `{model_name}_{NN}`, numbered per user and model.
    pub title: String,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub user_message: String,
    pub assistant_response: String,
    pub created_at: DateTime<Utc>,
}

impl From<ChatMessage> for ChatTurn {
    fn from(m: ChatMessage) -> Self {
        ChatTurn {
            user_message: m.user_message,
            assistant_response: m.assistant_response,
        }
    }
}
