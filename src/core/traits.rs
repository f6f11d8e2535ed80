//! DI "Interfaces"

use crate::core::window::ChatTurn;
use crate::infrastructure::entities;
use async_trait::async_trait;
use uuid::Uuid;

/// Chat history provider and persistence for completed turns.
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Lists all chats of the given user, most recently active first.
    async fn list_chats(&self, user_id: Uuid) -> anyhow::Result<Vec<entities::Chat>>;

    /// Creates a new chat titled `{model_name}_{NN}`.
    async fn create_chat(&self, user_id: Uuid, model_name: &str) -> anyhow::Result<entities::Chat>;

    /// Returns `None` if the chat does not exist or belongs to another user.
    async fn get_chat(&self, user_id: Uuid, chat_id: Uuid)
    -> anyhow::Result<Option<entities::Chat>>;

    /// List all message pairs in a chat, oldest first.
    async fn list_messages(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
    ) -> anyhow::Result<Vec<entities::ChatMessage>>;

    /// Stores a completed turn.
    async fn save_turn(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        message: String,
        response: String,
    ) -> anyhow::Result<entities::ChatMessage>;

    /// The chat's prior turns in chronological order.
    async fn get_history(&self, user_id: Uuid, chat_id: Uuid) -> anyhow::Result<Vec<ChatTurn>> {
        Ok(self
            .list_messages(user_id, chat_id)
            .await?
            .into_iter()
            .map(ChatTurn::from)
            .collect())
    }
}
