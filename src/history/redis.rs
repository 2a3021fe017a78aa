use async_trait::async_trait;
use chrono::Utc;
use log::error;
use redis::{ AsyncCommands, Client };
use uuid::Uuid;
use crate::history::{ next_timestamp, HistoryStore, StoreError };
use crate::models::chat::{ Conversation, ConversationSummary, Role, Turn };

/// Redis layout, all keys under `key_prefix`:
/// `conv:{id}` conversation JSON, `owner:{owner}` zset of conversation ids
/// scored by last update (ms), `turns:{conv}` list of turn ids oldest first,
/// `turn:{id}` turn JSON.
pub struct RedisHistoryStore {
    client: Client,
    key_prefix: String,
}

/// `LRANGE` start index for the newest `limit` turns; `None` means nothing to read.
fn lrange_start(limit: Option<usize>) -> Option<isize> {
    match limit {
        None => Some(0),
        Some(0) => None,
        Some(k) => Some(-isize::try_from(k).unwrap_or(isize::MAX)),
    }
}

impl RedisHistoryStore {
    pub fn new(host: &str, key_prefix: String) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix,
        })
    }

    async fn get_connection(&self) -> Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    fn conversation_key(&self, id: &str) -> String {
        format!("{}conv:{}", self.key_prefix, id)
    }

    fn owner_key(&self, owner_id: &str) -> String {
        format!("{}owner:{}", self.key_prefix, owner_id)
    }

    fn turns_key(&self, conversation_id: &str) -> String {
        format!("{}turns:{}", self.key_prefix, conversation_id)
    }

    fn turn_key(&self, id: &str) -> String {
        format!("{}turn:{}", self.key_prefix, id)
    }

    async fn load_conversation(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &str
    ) -> Result<Option<Conversation>, StoreError> {
        let raw: Option<String> = conn.get(self.conversation_key(id)).await?;
        raw.map(|json| serde_json::from_str(&json)).transpose().map_err(StoreError::from)
    }

    async fn load_turn(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        id: &str
    ) -> Result<Option<Turn>, StoreError> {
        let raw: Option<String> = conn.get(self.turn_key(id)).await?;
        raw.map(|json| serde_json::from_str(&json)).transpose().map_err(StoreError::from)
    }

    async fn load_turns(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        ids: &[String]
    ) -> Result<Vec<Turn>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| self.turn_key(id))
            .collect();
        let entries: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;

        let mut turns = Vec::with_capacity(entries.len());
        for entry in entries.into_iter().flatten() {
            match serde_json::from_str::<Turn>(&entry) {
                Ok(turn) => turns.push(turn),
                Err(e) => error!("Error parsing stored turn: {}", e),
            }
        }
        Ok(turns)
    }

    async fn save_conversation(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        conversation: &Conversation
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(conversation)?;
        redis
            ::pipe()
            .atomic()
            .set(self.conversation_key(&conversation.id), json)
            .ignore()
            .zadd(
                self.owner_key(&conversation.owner_id),
                &conversation.id,
                conversation.updated_at.timestamp_millis()
            )
            .ignore()
            .query_async::<_, ()>(conn).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for RedisHistoryStore {
    async fn create_conversation(
        &self,
        title: &str,
        owner_id: &str
    ) -> Result<Conversation, StoreError> {
        let mut conn = self.get_connection().await?;
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            owner_id: owner_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.save_conversation(&mut conn, &conversation).await?;
        Ok(conversation)
    }

    async fn get_conversation(
        &self,
        conversation_id: &str
    ) -> Result<Option<Conversation>, StoreError> {
        let mut conn = self.get_connection().await?;
        self.load_conversation(&mut conn, conversation_id).await
    }

    async fn list_conversations(
        &self,
        owner_id: &str
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.zrevrange(self.owner_key(owner_id), 0, -1).await?;

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_conversation(&mut conn, &id).await? {
                Some(conversation) => {
                    let message_count: usize = conn.llen(self.turns_key(&id)).await?;
                    summaries.push(ConversationSummary { conversation, message_count });
                }
                None => error!("Owner index references missing conversation {}", id),
            }
        }
        Ok(summaries)
    }

    async fn update_conversation_title(
        &self,
        conversation_id: &str,
        title: &str
    ) -> Result<Option<Conversation>, StoreError> {
        let mut conn = self.get_connection().await?;
        let Some(mut conversation) = self.load_conversation(&mut conn, conversation_id).await? else {
            return Ok(None);
        };
        conversation.title = title.to_string();
        conversation.updated_at = next_timestamp(Some(conversation.updated_at));
        self.save_conversation(&mut conn, &conversation).await?;
        Ok(Some(conversation))
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.get_connection().await?;
        let Some(conversation) = self.load_conversation(&mut conn, conversation_id).await? else {
            return Ok(false);
        };
        let turns_key = self.turns_key(conversation_id);
        let turn_ids: Vec<String> = conn.lrange(&turns_key, 0, -1).await?;

        let mut keys: Vec<String> = turn_ids
            .iter()
            .map(|id| self.turn_key(id))
            .collect();
        keys.push(turns_key);
        keys.push(self.conversation_key(conversation_id));

        redis
            ::pipe()
            .atomic()
            .del(keys)
            .ignore()
            .zrem(self.owner_key(&conversation.owner_id), conversation_id)
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(true)
    }

    async fn create_turn(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str
    ) -> Result<Turn, StoreError> {
        let mut conn = self.get_connection().await?;
        let mut conversation = self
            .load_conversation(&mut conn, conversation_id).await?
            .ok_or_else(|| StoreError::MissingConversation(conversation_id.to_string()))?;

        let turns_key = self.turns_key(conversation_id);
        let last_id: Option<String> = conn.lindex(&turns_key, -1).await?;
        let previous = match last_id {
            Some(id) => self.load_turn(&mut conn, &id).await?.map(|t| t.created_at),
            None => None,
        };

        let turn = Turn {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: next_timestamp(previous),
        };
        conversation.updated_at = next_timestamp(Some(conversation.updated_at)).max(turn.created_at);

        let turn_json = serde_json::to_string(&turn)?;
        let conversation_json = serde_json::to_string(&conversation)?;
        redis
            ::pipe()
            .atomic()
            .set(self.turn_key(&turn.id), turn_json)
            .ignore()
            .rpush(&turns_key, &turn.id)
            .ignore()
            .set(self.conversation_key(conversation_id), conversation_json)
            .ignore()
            .zadd(
                self.owner_key(&conversation.owner_id),
                conversation_id,
                conversation.updated_at.timestamp_millis()
            )
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(turn)
    }

    async fn list_turns(
        &self,
        conversation_id: &str,
        limit: Option<usize>
    ) -> Result<Vec<Turn>, StoreError> {
        let Some(start) = lrange_start(limit) else {
            return Ok(Vec::new());
        };
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.lrange(self.turns_key(conversation_id), start, -1).await?;
        self.load_turns(&mut conn, &ids).await
    }

    async fn get_turn(&self, turn_id: &str) -> Result<Option<Turn>, StoreError> {
        let mut conn = self.get_connection().await?;
        self.load_turn(&mut conn, turn_id).await
    }

    async fn update_turn_content(
        &self,
        turn_id: &str,
        content: &str
    ) -> Result<Option<Turn>, StoreError> {
        let mut conn = self.get_connection().await?;
        let Some(mut turn) = self.load_turn(&mut conn, turn_id).await? else {
            return Ok(None);
        };
        turn.content = content.to_string();
        let json = serde_json::to_string(&turn)?;
        let _: () = conn.set(self.turn_key(turn_id), json).await?;
        Ok(Some(turn))
    }

    async fn delete_turn(&self, turn_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.get_connection().await?;
        let Some(turn) = self.load_turn(&mut conn, turn_id).await? else {
            return Ok(false);
        };
        redis
            ::pipe()
            .atomic()
            .lrem(self.turns_key(&turn.conversation_id), 0, turn_id)
            .ignore()
            .del(self.turn_key(turn_id))
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(true)
    }
}
