use chrono::{ DateTime, Utc };
use serde::{ Serialize, Deserialize };
use std::fmt;

pub const DEFAULT_TITLE: &str = "New Chat";
const AUTO_TITLE_CHARS: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted message of a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_default_title(&self) -> bool {
        self.title == DEFAULT_TITLE
    }
}

/// Listing entry: a conversation plus how many turns it holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub message_count: usize,
}

/// Title derived from the first user message: the first 20 characters,
/// with an ellipsis when the message is longer.
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() > AUTO_TITLE_CHARS {
        let head: String = trimmed.chars().take(AUTO_TITLE_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_becomes_title_verbatim() {
        assert_eq!(derive_title("Hello"), "Hello");
    }

    #[test]
    fn long_content_is_cut_at_twenty_chars() {
        assert_eq!(derive_title("abcdefghijklmnopqrstuvwxyz"), "abcdefghijklmnopqrst...");
    }

    #[test]
    fn title_cut_respects_char_boundaries() {
        let title = derive_title("ééééééééééééééééééééééé");
        assert_eq!(title.chars().count(), 23);
    }

    #[test]
    fn turn_serializes_camel_case() {
        let turn = Turn {
            id: "t".into(),
            conversation_id: "c".into(),
            role: Role::Assistant,
            content: "hi".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("conversationId").is_some());
        assert!(json.get("createdAt").is_some());
    }
}
