//! Infrastructure traits, used for DI on higher levels

use crate::infrastructure::entities;
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait ChatRepository: Send + Sync {
    /// Chats of a user, most recently active first.
    async fn list_chats(&self, user_id: Uuid) -> sqlx::Result<Vec<entities::Chat>>;

    async fn find_chat(&self, user_id: Uuid, chat_id: Uuid)
    -> sqlx::Result<Option<entities::Chat>>;

    /// The newest chat the user opened with `model_name`.
    async fn latest_chat_for_model(
        &self,
        user_id: Uuid,
        model_name: &str,
    ) -> sqlx::Result<Option<entities::Chat>>;

    async fn create_chat(&self, chat: entities::Chat) -> sqlx::Result<entities::Chat>;

    /// Messages of a chat owned by `user_id`, oldest first.
    async fn list_chat_messages(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
    ) -> sqlx::Result<Vec<entities::ChatMessage>>;

    /// Stores a message pair and bumps the chat's `updated_at`.
    async fn create_chat_message(
        &self,
        message: entities::ChatMessage,
    ) -> sqlx::Result<entities::ChatMessage>;
}
