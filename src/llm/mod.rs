pub mod chat;
pub mod reducer;

use serde::{ Deserialize, Serialize };
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Smallest `max_tokens` ever sent to the provider unless configured otherwise.
pub const DEFAULT_MAX_TOKENS_FLOOR: u32 = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    Groq,
    OpenAI,
}

impl LlmType {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmType::Groq => "https://api.groq.com/openai/v1/chat/completions",
            LlmType::OpenAI => "https://api.openai.com/v1/chat/completions",
        }
    }

    pub fn default_model(&self) -> ModelId {
        match self {
            LlmType::Groq => ModelId::DeepseekR1DistillLlama70b,
            LlmType::OpenAI => ModelId::Gpt4o,
        }
    }
}

impl fmt::Display for LlmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmType::Groq => f.write_str("groq"),
            LlmType::OpenAI => f.write_str("openai"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseLlmTypeError {
    message: String,
}

impl FromStr for LlmType {
    type Err = ParseLlmTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "groq" => Ok(LlmType::Groq),
            "openai" => Ok(LlmType::OpenAI),
            _ =>
                Err(ParseLlmTypeError {
                    message: format!("Invalid LLM type: '{}'", s),
                }),
        }
    }
}

/// The models this service is willing to route requests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ModelId {
    #[serde(rename = "deepseek-r1-distill-llama-70b")]
    DeepseekR1DistillLlama70b,
    #[serde(rename = "meta-llama/llama-4-scout-17b-16e-instruct")]
    Llama4Scout17b,
    #[serde(rename = "llama-3.3-70b-versatile")]
    Llama33_70bVersatile,
    #[serde(rename = "gemma2-9b-it")]
    Gemma2_9bIt,
    #[serde(rename = "qwen-qwq-32b")]
    QwenQwq32b,
    #[serde(rename = "gpt-3.5-turbo")]
    Gpt35Turbo,
    #[serde(rename = "gpt-4o")]
    Gpt4o,
}

impl ModelId {
    pub const ALL: [ModelId; 7] = [
        ModelId::DeepseekR1DistillLlama70b,
        ModelId::Llama4Scout17b,
        ModelId::Llama33_70bVersatile,
        ModelId::Gemma2_9bIt,
        ModelId::QwenQwq32b,
        ModelId::Gpt35Turbo,
        ModelId::Gpt4o,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::DeepseekR1DistillLlama70b => "deepseek-r1-distill-llama-70b",
            ModelId::Llama4Scout17b => "meta-llama/llama-4-scout-17b-16e-instruct",
            ModelId::Llama33_70bVersatile => "llama-3.3-70b-versatile",
            ModelId::Gemma2_9bIt => "gemma2-9b-it",
            ModelId::QwenQwq32b => "qwen-qwq-32b",
            ModelId::Gpt35Turbo => "gpt-3.5-turbo",
            ModelId::Gpt4o => "gpt-4o",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, Error)]
#[error("unsupported model '{0}'")]
pub struct UnknownModelError(pub String);

impl FromStr for ModelId {
    type Err = UnknownModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s.trim())
            .ok_or_else(|| UnknownModelError(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: ModelId,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub stop: Option<Vec<String>>,
}

impl GenerationParams {
    pub fn new(model: ModelId) -> Self {
        Self {
            model,
            temperature: 0.7,
            max_tokens: DEFAULT_MAX_TOKENS_FLOOR,
            top_p: 1.0,
            stop: None,
        }
    }

    /// Raises `max_tokens` to at least `floor`.
    pub fn with_token_floor(mut self, floor: u32) -> Self {
        self.max_tokens = self.max_tokens.max(floor);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(format!("temperature must be within 0..=2, got {}", self.temperature));
        }
        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(format!("top_p must be within 0..=1, got {}", self.top_p));
        }
        if self.max_tokens == 0 {
            return Err("max_tokens must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub llm_type: LlmType,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            llm_type: LlmType::Groq,
            api_key: None,
            base_url: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("{provider} API key is not configured")]
    MissingCredential {
        provider: String,
    },

    #[error("provider rate limit reached: {body}")]
    RateLimited {
        body: String,
    },

    #[error("provider returned HTTP {status}: {body}")]
    Http {
        status: u16,
        body: String,
    },

    #[error("provider request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("stream error: {reason}")]
    Stream {
        reason: String,
    },

    #[error("malformed provider response: {reason}")]
    Malformed {
        reason: String,
    },
}

impl LlmError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, LlmError::MissingCredential { .. })
    }

    /// Errors a caller could reasonably retry.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } | LlmError::Network(_) => true,
            LlmError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
