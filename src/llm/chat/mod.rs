pub mod openai;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use serde::{ Deserialize, Serialize };
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use super::{ GenerationParams, LlmConfig, LlmError };
use self::openai::OpenAIChatClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderMessage {
    pub role: ProviderRole,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: ProviderRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

/// One chunk of a streamed completion. Every field may be absent.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StreamFragment {
    #[serde(default)]
    pub choices: Vec<FragmentChoice>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FragmentChoice {
    #[serde(default)]
    pub delta: FragmentDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct FragmentDelta {
    #[serde(default)]
    pub content: Option<String>,
}

impl StreamFragment {
    /// Fragment carrying a single text piece.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            choices: vec![FragmentChoice {
                delta: FragmentDelta { content: Some(content.into()) },
                finish_reason: None,
            }],
        }
    }

    /// The first choice's text piece, if there is one.
    pub fn text_piece(&self) -> Option<&str> {
        self.choices.first().and_then(|c| c.delta.content.as_deref())
    }
}

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<StreamFragment, LlmError>> + Send>>;

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[ProviderMessage],
        params: &GenerationParams
    ) -> Result<CompletionResponse, LlmError>;

    async fn stream_completion(
        &self,
        messages: &[ProviderMessage],
        params: &GenerationParams
    ) -> Result<FragmentStream, LlmError>;

    fn has_credentials(&self) -> bool;

    fn provider_name(&self) -> String;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, LlmError> {
    let client = OpenAIChatClient::from_config(config)?;
    Ok(Arc::new(client))
}

/// Result of interpreting one SSE line.
#[derive(Debug, PartialEq)]
pub enum SseLine {
    Fragment(StreamFragment),
    Done,
    Skip,
}

pub fn parse_sse_line(line: &str) -> Result<SseLine, LlmError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Done);
    }
    serde_json
        ::from_str::<StreamFragment>(data)
        .map(SseLine::Fragment)
        .map_err(|e| LlmError::Malformed {
            reason: format!("failed to parse stream chunk: {} (data: {})", e, data),
        })
}

pub(crate) fn status_error(status: u16, body: String) -> LlmError {
    if status == 429 {
        LlmError::RateLimited { body }
    } else {
        LlmError::Http { status, body }
    }
}

/// Decodes one complete line. Lines are only decoded once their `\n` has
/// arrived, so a character split across network chunks is reassembled first.
fn decode_sse_line(raw: &[u8]) -> Result<SseLine, LlmError> {
    let line = std::str::from_utf8(raw).map_err(|e| LlmError::Malformed {
        reason: format!("stream line is not valid UTF-8: {}", e),
    })?;
    parse_sse_line(line)
}

/// Turns an SSE HTTP response into a fragment stream, reading on a spawned task.
pub fn sse_fragment_stream(resp: reqwest::Response) -> FragmentStream {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut bytes = resp.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = bytes.next().await {
            let buf = match chunk {
                Ok(buf) => buf,
                Err(e) => {
                    warn!("SSE body failed mid-stream: {}", e);
                    let _ = tx.send(Err(LlmError::Stream { reason: e.to_string() })).await;
                    return;
                }
            };
            buffer.extend_from_slice(&buf);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                match decode_sse_line(&line) {
                    Ok(SseLine::Fragment(fragment)) => {
                        debug!("stream fragment: {:?}", fragment.text_piece());
                        if tx.send(Ok(fragment)).await.is_err() {
                            return;
                        }
                    }
                    Ok(SseLine::Done) => {
                        return;
                    }
                    Ok(SseLine::Skip) => {}
                    Err(e) => {
                        warn!("Dropping SSE stream on bad line: {}", e);
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }
        }

        match decode_sse_line(&buffer) {
            Ok(SseLine::Fragment(fragment)) => {
                let _ = tx.send(Ok(fragment)).await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Unparseable trailing SSE data ({} bytes): {}", buffer.len(), e);
                let _ = tx.send(Err(e)).await;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}
