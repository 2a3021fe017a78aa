use crate::cli::Args;
use crate::config::prompt::{ self, PromptConfig };
use crate::context::{ select_context_window, to_provider_messages };
use crate::error::{ ChatError, ChatResult };
use crate::history::{ initialize_history_store, HistoryStore };
use crate::llm::chat::{
    new_client as new_chat_client,
    ChatClient,
    FragmentStream,
    ProviderMessage,
    ProviderRole,
};
use crate::llm::reducer::{ strip_reasoning, ReduceState, ReducedCompletion, StreamReducer };
use crate::llm::{ GenerationParams, LlmConfig, LlmError, LlmType, ModelId };
use crate::models::chat::{
    derive_title,
    Conversation,
    ConversationSummary,
    Role,
    Turn,
    DEFAULT_TITLE,
};

use futures::StreamExt;
use log::{ info, warn, error };
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub owner_id: String,
    pub context_window: usize,
    pub system_prompt: Option<String>,
    pub params: GenerationParams,
    pub max_tokens_floor: u32,
    pub stream: bool,
    pub request_timeout: Duration,
}

impl AgentSettings {
    pub fn new(model: ModelId) -> Self {
        Self {
            owner_id: "default-user".to_string(),
            context_window: crate::context::DEFAULT_CONTEXT_WINDOW,
            system_prompt: None,
            params: GenerationParams::new(model),
            max_tokens_floor: crate::llm::DEFAULT_MAX_TOKENS_FLOOR,
            stream: true,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// The user turn and the assistant reply persisted for one send.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub user_turn: Turn,
    pub assistant_turn: Turn,
}

#[derive(Debug, Clone, Default)]
pub struct PreviewRequest {
    pub message: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub system_prompt: Option<String>,
    pub prompt_mode: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PreviewOutcome {
    pub response: String,
    pub model: ModelId,
    pub temperature: f32,
    pub max_tokens: u32,
    pub input_message: String,
    pub system_prompt: String,
    pub chunk_count: usize,
    pub response_length: usize,
    pub state: ReduceState,
}

#[derive(Clone)]
pub struct ChatAgent {
    history_store: Arc<dyn HistoryStore>,
    chat_client: Arc<dyn ChatClient>,
    reducer: StreamReducer,
    prompt_config: Arc<PromptConfig>,
    settings: Arc<AgentSettings>,
}

fn validate_id(id: &str, what: &str) -> ChatResult<()> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| ChatError::Validation(format!("Invalid {} ID", what)))
}

fn require_content(content: &str) -> ChatResult<()> {
    if content.trim().is_empty() {
        return Err(ChatError::Validation("Message content is required".to_string()));
    }
    Ok(())
}

impl ChatAgent {
    pub fn from_parts(
        history_store: Arc<dyn HistoryStore>,
        chat_client: Arc<dyn ChatClient>,
        reducer: StreamReducer,
        prompt_config: Arc<PromptConfig>,
        settings: AgentSettings
    ) -> Self {
        Self {
            history_store,
            chat_client,
            reducer,
            prompt_config,
            settings: Arc::new(settings),
        }
    }

    fn initialize_chat_client(
        args: &Args
    ) -> Result<(Arc<dyn ChatClient>, LlmType), Box<dyn Error + Send + Sync>> {
        let chat_llm_type: LlmType = args.chat_llm_type.parse()?;
        let chat_api_key = if !args.chat_api_key.is_empty() {
            Some(args.chat_api_key.clone())
        } else {
            None
        };
        let chat_config = LlmConfig {
            llm_type: chat_llm_type,
            base_url: args.chat_base_url.clone(),
            api_key: chat_api_key,
        };
        let chat_client = new_chat_client(&chat_config)?;
        info!(
            "Chat client configured: Type={}, BaseURL={:?}",
            chat_llm_type,
            chat_config.base_url.as_deref().unwrap_or(chat_llm_type.default_base_url())
        );
        if !chat_client.has_credentials() {
            warn!("No API key configured for {}; chat requests will fail until CHAT_API_KEY is set", chat_llm_type);
        }
        Ok((chat_client, chat_llm_type))
    }

    fn settings_from_args(
        args: &Args,
        llm_type: LlmType,
        prompt_config: &PromptConfig
    ) -> Result<AgentSettings, Box<dyn Error + Send + Sync>> {
        let model = match &args.chat_model {
            Some(name) if !name.trim().is_empty() => name.parse::<ModelId>()?,
            _ => llm_type.default_model(),
        };
        let params = (GenerationParams {
            model,
            temperature: args.temperature,
            max_tokens: args.max_tokens,
            top_p: args.top_p,
            stop: Some(args.stop.clone()).filter(|s| !s.is_empty()),
        }).with_token_floor(args.max_tokens_floor);
        params.validate()?;

        let system_prompt = match &args.system_prompt {
            Some(s) if !s.trim().is_empty() => s.clone(),
            _ => prompt_config.default_prompt()?.to_string(),
        };

        Ok(AgentSettings {
            owner_id: args.default_owner.clone(),
            context_window: args.context_window,
            system_prompt: Some(system_prompt),
            params,
            max_tokens_floor: args.max_tokens_floor,
            stream: args.stream,
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        })
    }

    pub async fn new(args: Args) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let (chat_client, llm_type) = Self::initialize_chat_client(&args)?;
        let history_store = initialize_history_store(&args)?;
        let prompt_config = prompt::load_prompts(
            args.prompts_path.as_deref().map(Path::new),
            args.prompt_mode.as_deref()
        )?;
        let settings = Self::settings_from_args(&args, llm_type, &prompt_config)?;
        let reducer = StreamReducer::new(
            args.stream_max_fragments,
            Duration::from_millis(args.stream_settle_ms)
        );
        info!(
            "Replies use model {} with a {}-turn context window ({} mode)",
            settings.params.model,
            settings.context_window,
            if settings.stream { "streaming" } else { "blocking" }
        );

        Ok(Self::from_parts(history_store, chat_client, reducer, prompt_config, settings))
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub async fn list_conversations(&self) -> ChatResult<Vec<ConversationSummary>> {
        Ok(self.history_store.list_conversations(&self.settings.owner_id).await?)
    }

    pub async fn create_conversation(&self, title: Option<&str>) -> ChatResult<Conversation> {
        let title = title
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE);
        let conversation = self.history_store.create_conversation(
            title,
            &self.settings.owner_id
        ).await?;
        info!("Created conversation {}", conversation.id);
        Ok(conversation)
    }

    async fn require_conversation(&self, conversation_id: &str) -> ChatResult<Conversation> {
        validate_id(conversation_id, "chat")?;
        self.history_store
            .get_conversation(conversation_id).await?
            .ok_or_else(|| ChatError::NotFound("Chat not found".to_string()))
    }

    pub async fn get_conversation_with_turns(
        &self,
        conversation_id: &str
    ) -> ChatResult<(Conversation, Vec<Turn>)> {
        let conversation = self.require_conversation(conversation_id).await?;
        let turns = self.history_store.list_turns(conversation_id, None).await?;
        Ok((conversation, turns))
    }

    pub async fn rename_conversation(
        &self,
        conversation_id: &str,
        title: &str
    ) -> ChatResult<Conversation> {
        validate_id(conversation_id, "chat")?;
        if title.trim().is_empty() {
            return Err(ChatError::Validation("Title is required".to_string()));
        }
        self.history_store
            .update_conversation_title(conversation_id, title.trim()).await?
            .ok_or_else(|| ChatError::NotFound("Chat not found".to_string()))
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> ChatResult<()> {
        validate_id(conversation_id, "chat")?;
        if !self.history_store.delete_conversation(conversation_id).await? {
            return Err(ChatError::NotFound("Chat not found".to_string()));
        }
        info!("Deleted conversation {}", conversation_id);
        Ok(())
    }

    pub async fn list_turns(&self, conversation_id: &str) -> ChatResult<Vec<Turn>> {
        validate_id(conversation_id, "chat")?;
        Ok(self.history_store.list_turns(conversation_id, None).await?)
    }

    pub async fn edit_turn(&self, turn_id: &str, content: &str) -> ChatResult<Turn> {
        validate_id(turn_id, "message")?;
        require_content(content)?;
        self.history_store
            .update_turn_content(turn_id, content.trim()).await?
            .ok_or_else(|| ChatError::NotFound("Message not found".to_string()))
    }

    pub async fn delete_turn(&self, turn_id: &str) -> ChatResult<()> {
        validate_id(turn_id, "message")?;
        if !self.history_store.delete_turn(turn_id).await? {
            return Err(ChatError::NotFound("Message not found".to_string()));
        }
        Ok(())
    }

    /// Persists the user turn, generates a reply from the recent context and
    /// persists it. A failed generation leaves the user turn in place.
    pub async fn send_message(&self, conversation_id: &str, content: &str) -> ChatResult<Exchange> {
        validate_id(conversation_id, "chat")?;
        require_content(content)?;
        if !self.chat_client.has_credentials() {
            return Err(
                (LlmError::MissingCredential {
                    provider: self.chat_client.provider_name(),
                }).into()
            );
        }
        let conversation = self.require_conversation(conversation_id).await?;

        let user_turn = self.history_store.create_turn(conversation_id, Role::User, content).await?;
        if conversation.has_default_title() {
            let title = derive_title(content);
            if let Err(e) = self.history_store.update_conversation_title(conversation_id, &title).await {
                warn!("Failed to auto-title conversation {}: {}", conversation_id, e);
            }
        }

        let deadline = self.settings.request_timeout;
        let reply = match tokio::time::timeout(deadline, self.generate_reply(conversation_id)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                error!("Reply generation failed for {}: {}", conversation_id, e);
                return Err(e);
            }
            Err(_) => {
                error!("Reply generation for {} exceeded {:?}", conversation_id, deadline);
                return Err(ChatError::Timeout { secs: deadline.as_secs() });
            }
        };

        let assistant_turn = self.history_store.create_turn(
            conversation_id,
            Role::Assistant,
            &reply.text
        ).await?;
        info!(
            "Reply persisted for {} ({:?}, {} fragments, {} chars)",
            conversation_id,
            reply.state,
            reply.fragments,
            reply.text.len()
        );

        Ok(Exchange { user_turn, assistant_turn })
    }

    async fn generate_reply(&self, conversation_id: &str) -> ChatResult<ReducedCompletion> {
        let window = select_context_window(
            self.history_store.as_ref(),
            conversation_id,
            self.settings.context_window
        ).await?;
        let messages = to_provider_messages(&window, self.settings.system_prompt.as_deref());
        let params = &self.settings.params;

        let reply = if self.settings.stream {
            let stream = self.chat_client.stream_completion(&messages, params).await?;
            self.reducer.reduce(stream).await.map_err(|failure| {
                warn!(
                    "Stream for {} ended {:?} after {} fragments",
                    conversation_id,
                    failure.state,
                    failure.fragments
                );
                LlmError::from(failure)
            })?
        } else {
            let resp = self.chat_client.complete(&messages, params).await?;
            ReducedCompletion {
                text: strip_reasoning(&resp.response),
                state: ReduceState::Complete,
                fragments: 0,
                settle_pauses: 0,
                interrupted: None,
            }
        };

        if reply.text.is_empty() {
            return Err(
                ChatError::Provider(LlmError::Malformed {
                    reason: "provider returned an empty completion".to_string(),
                })
            );
        }
        if reply.state == ReduceState::Truncated {
            warn!(
                "Reply for {} truncated after {} fragments{}",
                conversation_id,
                reply.fragments,
                reply.interrupted.as_deref().map(|e| format!(" ({})", e)).unwrap_or_default()
            );
        }
        Ok(reply)
    }

    /// One-shot streamed completion without touching the store.
    pub async fn preview_completion(&self, req: PreviewRequest) -> ChatResult<PreviewOutcome> {
        require_content(&req.message).map_err(|_| {
            ChatError::Validation("Message is required".to_string())
        })?;
        if !self.chat_client.has_credentials() {
            return Err(
                (LlmError::MissingCredential {
                    provider: self.chat_client.provider_name(),
                }).into()
            );
        }

        let model = match req.model.as_deref() {
            Some(name) => name.parse::<ModelId>().map_err(|e| ChatError::Validation(e.to_string()))?,
            None => self.settings.params.model,
        };
        let system_prompt = match (&req.system_prompt, &req.prompt_mode) {
            (Some(s), _) if !s.trim().is_empty() => s.clone(),
            (_, Some(mode)) => self.prompt_config.preset(mode)?.to_string(),
            _ => self.prompt_config.default_prompt()?.to_string(),
        };

        let mut params = self.settings.params.clone();
        params.model = model;
        if let Some(t) = req.temperature {
            params.temperature = t;
        }
        if let Some(m) = req.max_tokens {
            params.max_tokens = m;
        }
        let params = params.with_token_floor(self.settings.max_tokens_floor);
        params.validate().map_err(ChatError::Validation)?;

        let messages = vec![
            ProviderMessage::new(ProviderRole::System, system_prompt.clone()),
            ProviderMessage::new(ProviderRole::User, req.message.clone())
        ];

        let deadline = self.settings.request_timeout;
        let generation = async {
            let stream = self.chat_client.stream_completion(&messages, &params).await?;
            Ok::<_, LlmError>(self.reducer.reduce(stream).await?)
        };
        let reduced = tokio::time::timeout(deadline, generation).await
            .map_err(|_| ChatError::Timeout { secs: deadline.as_secs() })??;

        Ok(PreviewOutcome {
            response_length: reduced.text.chars().count(),
            response: reduced.text,
            model,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            input_message: req.message,
            system_prompt,
            chunk_count: reduced.fragments,
            state: reduced.state,
        })
    }

    /// Stateless relay: streams the provider's fragments for a client-held
    /// message list, bounded by the request deadline.
    pub async fn relay_stream(&self, messages: Vec<ProviderMessage>) -> ChatResult<FragmentStream> {
        if messages.iter().all(|m| m.content.trim().is_empty()) {
            return Err(ChatError::Validation("Messages are required".to_string()));
        }

        let mut outgoing = Vec::with_capacity(messages.len() + 1);
        if !messages.iter().any(|m| m.role == ProviderRole::System) {
            if let Some(system) = &self.settings.system_prompt {
                outgoing.push(ProviderMessage::new(ProviderRole::System, system.clone()));
            }
        }
        outgoing.extend(messages);

        let stream = self.chat_client.stream_completion(&outgoing, &self.settings.params).await?;
        Ok(with_deadline(stream, self.settings.request_timeout))
    }
}

/// Forwards `stream` until it ends or `deadline` passes. On expiry a final
/// `LlmError::Stream` item tells the consumer the stream was cut short.
fn with_deadline(stream: FragmentStream, deadline: Duration) -> FragmentStream {
    let sleep = Box::pin(tokio::time::sleep(deadline));
    let bounded = futures::stream::unfold(
        Some((stream, sleep)),
        move |state| async move {
            let (mut stream, mut sleep) = state?;
            tokio::select! {
                item = stream.next() => item.map(|item| (item, Some((stream, sleep)))),
                _ = &mut sleep => {
                    warn!("Relay stream stopped at the {:?} deadline", deadline);
                    let err = LlmError::Stream {
                        reason: format!("relay exceeded {}s deadline", deadline.as_secs()),
                    };
                    Some((Err(err), None))
                }
            }
        }
    );
    Box::pin(bounded)
}
