mod memory;
mod redis;

pub use self::memory::MemoryHistoryStore;
pub use self::redis::RedisHistoryStore;

use async_trait::async_trait;
use chrono::{ DateTime, Duration, Utc };
use log::info;
use std::sync::Arc;
use thiserror::Error;
use crate::cli::Args;
use crate::models::chat::{ Conversation, ConversationSummary, Role, Turn };

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("stored record could not be decoded: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("conversation '{0}' does not exist")]
    MissingConversation(String),

    #[error("unsupported history store type: {0}")]
    UnsupportedType(String),
}

/// Persistence for conversations and their ordered turns.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn create_conversation(
        &self,
        title: &str,
        owner_id: &str
    ) -> Result<Conversation, StoreError>;

    async fn get_conversation(
        &self,
        conversation_id: &str
    ) -> Result<Option<Conversation>, StoreError>;

    /// Conversations of one owner, most recently updated first.
    async fn list_conversations(
        &self,
        owner_id: &str
    ) -> Result<Vec<ConversationSummary>, StoreError>;

    async fn update_conversation_title(
        &self,
        conversation_id: &str,
        title: &str
    ) -> Result<Option<Conversation>, StoreError>;

    /// Removes the conversation and every turn in it.
    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, StoreError>;

    async fn create_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<Turn, StoreError>;

    /// Turns oldest first. With a limit only the most recent `limit` turns
    /// are returned, still in chronological order.
    async fn list_turns(
        &self,
        conversation_id: &str,
        limit: Option<usize>
    ) -> Result<Vec<Turn>, StoreError>;

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>, StoreError>;

    async fn update_turn_content(
        &self,
        turn_id: &str,
        content: &str
    ) -> Result<Option<Turn>, StoreError>;

    async fn delete_turn(&self, turn_id: &str) -> Result<bool, StoreError>;
}

pub fn create_history_store(args: &Args) -> Result<Arc<dyn HistoryStore>, StoreError> {
    match args.history_type.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryHistoryStore::new())),
        "redis" => {
            let store = RedisHistoryStore::new(
                &args.history_host,
                args.history_redis_prefix.clone()
            )?;
            Ok(Arc::new(store))
        }
        _ => Err(StoreError::UnsupportedType(args.history_type.clone())),
    }
}

pub fn initialize_history_store(args: &Args) -> Result<Arc<dyn HistoryStore>, StoreError> {
    if args.history_type.eq_ignore_ascii_case("memory") {
        info!("Chat history will be kept in process memory");
    } else {
        info!("Chat history will be stored in: {} at {}", args.history_type, args.history_host);
    }
    create_history_store(args)
}

/// A creation time strictly after `previous`, so turns never share a timestamp.
pub(crate) fn next_timestamp(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if now <= prev => prev + Duration::microseconds(1),
        _ => now,
    }
}

pub(crate) fn tail<T>(mut items: Vec<T>, limit: Option<usize>) -> Vec<T> {
    if let Some(k) = limit {
        if items.len() > k {
            items.drain(..items.len() - k);
        }
    }
    items
}
