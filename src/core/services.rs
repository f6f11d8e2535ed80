//! Implementations for the service the app needs.
//!

use crate::core::traits::ChatService;
use crate::infrastructure::entities::{Chat, ChatMessage};
use crate::infrastructure::traits::ChatRepository;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;
use di::{Ref, injectable};
use uuid::Uuid;

#[injectable(ChatService)]
pub struct DbChatService {
    repo: Ref<dyn ChatRepository>,
}

/// Title following `previous` in the `{model}_{NN}` sequence.
pub fn next_chat_title(model_name: &str, previous: Option<&str>) -> String {
    let last = previous
        .and_then(|title| title.rsplit('_').next())
        .and_then(|n| n.parse::<u32>().ok())
        .unwrap_or(0);
    format!("{model_name}_{:02}", last + 1)
}

#[async_trait]
impl ChatService for DbChatService {
    async fn list_chats(&self, user_id: Uuid) -> anyhow::Result<Vec<Chat>> {
        Ok(self.repo.list_chats(user_id).await?)
    }

    async fn create_chat(&self, user_id: Uuid, model_name: &str) -> anyhow::Result<Chat> {
        let previous = self.repo.latest_chat_for_model(user_id, model_name).await?;
        let now = Utc::now();

        Ok(self
            .repo
            .create_chat(Chat {
                id: Uuid::new_v4(),
                user: user_id,
                title: next_chat_title(model_name, previous.as_ref().map(|c| c.title.as_str())),
                model_name: model_name.to_owned(),
                created_at: now,
                updated_at: now,
            })
            .await?)
    }

    async fn get_chat(&self, user_id: Uuid, chat_id: Uuid) -> anyhow::Result<Option<Chat>> {
        Ok(self.repo.find_chat(user_id, chat_id).await?)
    }

    async fn list_messages(&self, user_id: Uuid, chat_id: Uuid) -> anyhow::Result<Vec<ChatMessage>> {
        Ok(self.repo.list_chat_messages(user_id, chat_id).await?)
    }

    async fn save_turn(
        &self,
        user_id: Uuid,
        chat_id: Uuid,
        message: String,
        response: String,
    ) -> anyhow::Result<ChatMessage> {
        if self.repo.find_chat(user_id, chat_id).await?.is_none() {
            return Err(anyhow!("chat {chat_id} not found for user {user_id}"));
        }

        Ok(self
            .repo
            .create_chat_message(ChatMessage {
                id: Uuid::new_v4(),
                chat_id,
                user_message: message,
                assistant_response: response,
                created_at: Utc::now(),
            })
            .await?)
    }
}
