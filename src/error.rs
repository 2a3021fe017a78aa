use thiserror::Error;
use crate::config::prompt::PromptError;
use crate::history::StoreError;
use crate::llm::LlmError;

/// Failures a request handler can report to its caller.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Provider(LlmError),

    #[error("request exceeded {secs}s deadline")]
    Timeout {
        secs: u64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        if err.is_configuration() {
            ChatError::Configuration(err.to_string())
        } else {
            ChatError::Provider(err)
        }
    }
}

impl From<PromptError> for ChatError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::PresetNotFound(_) => ChatError::Validation(err.to_string()),
            other => ChatError::Configuration(other.to_string()),
        }
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
