use crate::history::{ HistoryStore, StoreError };
use crate::llm::chat::{ ProviderMessage, ProviderRole };
use crate::models::chat::{ Role, Turn };

/// Window sizes seen in practice are 5 and 20.
pub const DEFAULT_CONTEXT_WINDOW: usize = 20;

/// The most recent `window` turns of a conversation, oldest first.
/// An unknown conversation yields an empty window.
pub async fn select_context_window(
    store: &dyn HistoryStore,
    conversation_id: &str,
    window: usize
) -> Result<Vec<Turn>, StoreError> {
    store.list_turns(conversation_id, Some(window)).await
}

pub fn provider_role(role: Role) -> ProviderRole {
    match role {
        Role::User => ProviderRole::User,
        Role::Assistant => ProviderRole::Assistant,
    }
}

pub fn to_provider_messages(turns: &[Turn], system_prompt: Option<&str>) -> Vec<ProviderMessage> {
    let system = system_prompt
        .filter(|s| !s.trim().is_empty())
        .map(|s| ProviderMessage::new(ProviderRole::System, s));

    system
        .into_iter()
        .chain(turns.iter().map(|t| ProviderMessage::new(provider_role(t.role), t.content.clone())))
        .collect()
}
