use async_trait::async_trait;
use log::info;
use reqwest::Client as HttpClient;
use serde::{ Deserialize, Serialize };

use super::{
    sse_fragment_stream,
    status_error,
    ChatClient,
    CompletionResponse,
    FragmentStream,
    ProviderMessage,
};
use crate::llm::{ GenerationParams, LlmConfig, LlmError, LlmType };

/// Client for OpenAI-compatible `/chat/completions` endpoints (OpenAI, Groq).
pub struct OpenAIChatClient {
    http: HttpClient,
    llm_type: LlmType,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ProviderMessage],
    temperature: f32,
    max_completion_tokens: u32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIChatClient {
    pub fn new(
        llm_type: LlmType,
        api_key: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, LlmError> {
        let api_url = base_url.unwrap_or_else(|| llm_type.default_base_url().to_string());
        let http = HttpClient::builder().build()?;

        Ok(Self {
            http,
            llm_type,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            base_url: api_url,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Self::new(config.llm_type, config.api_key.clone(), config.base_url.clone())
    }

    fn api_key(&self) -> Result<&str, LlmError> {
        self.api_key.as_deref().ok_or_else(|| LlmError::MissingCredential {
            provider: self.llm_type.to_string(),
        })
    }

    async fn send(
        &self,
        messages: &[ProviderMessage],
        params: &GenerationParams,
        stream: bool
    ) -> Result<reqwest::Response, LlmError> {
        let api_key = self.api_key()?;
        let req = ChatRequest {
            model: params.model.as_str(),
            messages,
            temperature: params.temperature,
            max_completion_tokens: params.max_tokens,
            top_p: params.top_p,
            stop: params.stop.as_deref(),
            stream,
        };

        let resp = self.http
            .post(self.base_url.trim_end_matches('/'))
            .bearer_auth(api_key)
            .json(&req)
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), body));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(
        &self,
        messages: &[ProviderMessage],
        params: &GenerationParams
    ) -> Result<CompletionResponse, LlmError> {
        let resp = self.send(messages, params, false).await?;
        let body = resp.json::<ChatResponse>().await.map_err(|e| LlmError::Malformed {
            reason: e.to_string(),
        })?;

        let content = body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::Malformed {
                reason: format!("no choices in {} response", self.llm_type),
            })?;

        Ok(CompletionResponse { response: content })
    }

    async fn stream_completion(
        &self,
        messages: &[ProviderMessage],
        params: &GenerationParams
    ) -> Result<FragmentStream, LlmError> {
        info!(
            "Starting {} stream request to {} (model {})",
            self.llm_type,
            self.base_url,
            params.model
        );
        let resp = self.send(messages, params, true).await?;
        Ok(sse_fragment_stream(resp))
    }

    fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    fn provider_name(&self) -> String {
        self.llm_type.to_string()
    }
}
