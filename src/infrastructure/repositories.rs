//! DB Repository abstractions

use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{Chat, ChatMessage};
use crate::infrastructure::traits::ChatRepository;
use async_trait::async_trait;
use di::{Ref, injectable};
use log::error;
use uuid::Uuid;

#[injectable(ChatRepository)]
pub struct DbChatRepository {
    connection: Ref<DatabaseConnection>,
}

#[async_trait]
impl ChatRepository for DbChatRepository {
    async fn list_chats(&self, user_id: Uuid) -> sqlx::Result<Vec<Chat>> {
        sqlx::query_as(
            "SELECT * FROM chats WHERE user = ? ORDER BY datetime(updated_at) DESC, rowid DESC",
        )
        .bind(user_id)
        .fetch_all(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))
    }

    async fn find_chat(&self, user_id: Uuid, chat_id: Uuid) -> sqlx::Result<Option<Chat>> {
        sqlx::query_as("SELECT * FROM chats WHERE id = ? AND user = ?")
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&**self.connection)
            .await
            .inspect_err(|e| error!("{e}"))
    }

    async fn latest_chat_for_model(
        &self,
        user_id: Uuid,
        model_name: &str,
    ) -> sqlx::Result<Option<Chat>> {
        sqlx::query_as(
            "SELECT * FROM chats WHERE user = ? AND model_name = ? ORDER BY datetime(created_at) DESC, rowid DESC LIMIT 1",
        )
        .bind(user_id)
        .bind(model_name)
        .fetch_optional(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))
    }

    async fn create_chat(&self, chat: Chat) -> sqlx::Result<Chat> {
        sqlx::query_as(
            "INSERT INTO chats (id, user, title, model_name, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?) RETURNING *",
        )
        .bind(chat.id)
        .bind(chat.user)
        .bind(chat.title)
        .bind(chat.model_name)
        .bind(chat.created_at)
        .bind(chat.updated_at)
        .fetch_one(&**self.connection)
        .await
        .inspect_err(|e| error!("{e}"))
    }

    async fn list_chat_messages(&self, user_id: Uuid, chat_id: Uuid) -> sqlx::Result<Vec<ChatMessage>> {
        sqlx::query_as(
            "SELECT chat_messages.id, chat_messages.chat_id, chat_messages.user_message, chat_messages.assistant_response, chat_messages.created_at FROM chat_messages INNER JOIN chats ON chats.id = chat_messages.chat_id WHERE chat_id = ? AND user = ? ORDER BY datetime(chat_messages.created_at) ASC, chat_messages.rowid ASC",
        )
            .bind(chat_id)
            .bind(user_id)
            .fetch_all(&**self.connection)
            .await
            .inspect_err(|e| error!("{e}"))
    }

    async fn create_chat_message(&self, message: ChatMessage) -> sqlx::Result<ChatMessage> {
        let mut tx = self.connection.begin().await?;

        let saved: ChatMessage = sqlx::query_as(
            "INSERT INTO chat_messages (id, chat_id, user_message, assistant_response, created_at) VALUES (?, ?, ?, ?, ?) RETURNING *",
        )
            .bind(message.id)
            .bind(message.chat_id)
            .bind(message.user_message)
            .bind(message.assistant_response)
            .bind(message.created_at)
            .fetch_one(&mut *tx)
            .await
            .inspect_err(|e| error!("{e}"))?;

        sqlx::query("UPDATE chats SET updated_at = ? WHERE id = ?")
            .bind(saved.created_at)
            .bind(saved.chat_id)
            .execute(&mut *tx)
            .await
            .inspect_err(|e| error!("{e}"))?;

        tx.commit().await?;
        Ok(saved)
    }
}
