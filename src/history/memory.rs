use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::history::{ next_timestamp, tail, HistoryStore, StoreError };
use crate::models::chat::{ Conversation, ConversationSummary, Role, Turn };

#[derive(Default)]
struct Inner {
    conversations: HashMap<String, Conversation>,
    turns: HashMap<String, Vec<Turn>>,
    turn_owner: HashMap<String, String>,
}

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryHistoryStore {
    inner: RwLock<Inner>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn create_conversation(
        &self,
        title: &str,
        owner_id: &str
    ) -> Result<Conversation, StoreError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.write().await;
        inner.conversations.insert(conversation.id.clone(), conversation.clone());
        inner.turns.insert(conversation.id.clone(), Vec::new());
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        conversation_id: &str
    ) -> Result<Option<Conversation>, StoreError> {
        Ok(self.inner.read().await.conversations.get(conversation_id).cloned())
    }

    async fn list_conversations(
        &self,
        owner_id: &str
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let inner = self.inner.read().await;
        let mut summaries: Vec<ConversationSummary> = inner.conversations
            .values()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| ConversationSummary {
                conversation: c.clone(),
                message_count: inner.turns.get(&c.id).map_or(0, Vec::len),
            })
            .collect();
        summaries.sort_by(|a, b| b.conversation.updated_at.cmp(&a.conversation.updated_at));
        Ok(summaries)
    }

    async fn update_conversation_title(
        &self,
        conversation_id: &str,
        title: &str
    ) -> Result<Option<Conversation>, StoreError> {
        let mut inner = self.inner.write().await;
        Ok(
            inner.conversations.get_mut(conversation_id).map(|c| {
                c.title = title.to_string();
                c.updated_at = next_timestamp(Some(c.updated_at));
                c.clone()
            })
        )
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(turns) = inner.turns.remove(conversation_id) {
            for turn in turns {
                inner.turn_owner.remove(&turn.id);
            }
        }
        Ok(inner.conversations.remove(conversation_id).is_some())
    }

    async fn create_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<Turn, StoreError> {
        let mut inner = self.inner.write().await;
        let Inner { conversations, turns, turn_owner } = &mut *inner;

        let conversation = conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::MissingConversation(conversation_id.to_string()))?;
        let list = turns.entry(conversation_id.to_string()).or_default();

        let turn = Turn {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: next_timestamp(list.last().map(|t| t.created_at)),
        };
        conversation.updated_at = next_timestamp(Some(conversation.updated_at)).max(turn.created_at);
        turn_owner.insert(turn.id.clone(), conversation_id.to_string());
        list.push(turn.clone());
        Ok(turn)
    }

    async fn list_turns(
        &self,
        conversation_id: &str,
        limit: Option<usize>
    ) -> Result<Vec<Turn>, StoreError> {
        let inner = self.inner.read().await;
        let turns = inner.turns.get(conversation_id).cloned().unwrap_or_default();
        Ok(tail(turns, limit))
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>, StoreError> {
        let inner = self.inner.read().await;
        Ok(
            inner.turn_owner
                .get(turn_id)
                .and_then(|conv| inner.turns.get(conv))
                .and_then(|list| list.iter().find(|t| t.id == turn_id).cloned())
        )
    }

    async fn update_turn_content(
        &self,
        turn_id: &str,
        content: &str
    ) -> Result<Option<Turn>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(conv) = inner.turn_owner.get(turn_id).cloned() else {
            return Ok(None);
        };
        Ok(
            inner.turns
                .get_mut(&conv)
                .and_then(|list| list.iter_mut().find(|t| t.id == turn_id))
                .map(|turn| {
                    turn.content = content.to_string();
                    turn.clone()
                })
        )
    }

    async fn delete_turn(&self, turn_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(conv) = inner.turn_owner.remove(turn_id) else {
            return Ok(false);
        };
        if let Some(list) = inner.turns.get_mut(&conv) {
            list.retain(|t| t.id != turn_id);
        }
        Ok(true)
    }
}
