//! Folds a streamed completion into the final assistant text.
//!
//! The reducer reads at most `max_fragments` fragments so a provider that
//! never closes its stream still yields a result. After a fragment that makes
//! the text look finished (a closing tag or code fence) it waits briefly
//! before reading on. That wait is a heuristic only: it never ends the stream
//! and may fire on ordinary text ending in `}`.

use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use std::time::Duration;
use thiserror::Error;
use super::chat::StreamFragment;
use super::LlmError;

pub const DEFAULT_MAX_FRAGMENTS: usize = 1000;
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(100);

pub const COMPLETION_MARKERS: [&str; 6] = ["</html>", "</body>", "}", "</script>", "```", "</div>"];

const REASONING_DELIMITERS: [(&str, &str); 2] = [
    ("<think>", "</think>"),
    ("<thinking>", "</thinking>"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceState {
    Idle,
    Streaming,
    Complete,
    Truncated,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReducedCompletion {
    pub text: String,
    pub state: ReduceState,
    pub fragments: usize,
    pub settle_pauses: usize,
    /// Set when the stream raised after usable text had already arrived.
    pub interrupted: Option<String>,
}

/// A stream that failed before any usable text arrived.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct ReduceFailure {
    pub state: ReduceState,
    pub fragments: usize,
    #[source]
    pub source: LlmError,
}

impl From<ReduceFailure> for LlmError {
    fn from(failure: ReduceFailure) -> Self {
        failure.source
    }
}

#[derive(Debug, Clone)]
pub struct StreamReducer {
    max_fragments: usize,
    settle_delay: Duration,
    markers: Vec<String>,
}

impl Default for StreamReducer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAGMENTS, DEFAULT_SETTLE_DELAY)
    }
}

impl StreamReducer {
    pub fn new(max_fragments: usize, settle_delay: Duration) -> Self {
        Self {
            max_fragments,
            settle_delay,
            markers: COMPLETION_MARKERS.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn with_markers(mut self, markers: Vec<String>) -> Self {
        self.markers = markers;
        self
    }

    pub fn max_fragments(&self) -> usize {
        self.max_fragments
    }

    fn looks_finished(&self, text: &str) -> bool {
        let trimmed = text.trim_end();
        self.markers.iter().any(|m| trimmed.ends_with(m.as_str()))
    }

    pub async fn reduce<S>(&self, mut stream: S) -> Result<ReducedCompletion, ReduceFailure>
        where S: Stream<Item = Result<StreamFragment, LlmError>> + Unpin
    {
        let mut state = ReduceState::Idle;
        let mut text = String::new();
        let mut fragments = 0usize;
        let mut settle_pauses = 0usize;
        let mut interrupted = None;

        loop {
            let next = stream.next().await;
            match next {
                None => {
                    state = ReduceState::Complete;
                    break;
                }
                Some(Ok(fragment)) => {
                    if fragments >= self.max_fragments {
                        warn!(
                            "Reached maximum fragment limit ({}), truncating stream",
                            self.max_fragments
                        );
                        state = ReduceState::Truncated;
                        break;
                    }
                    if state == ReduceState::Idle {
                        debug!("First fragment received, streaming");
                        state = ReduceState::Streaming;
                    }
                    fragments += 1;

                    let Some(piece) = fragment.text_piece() else {
                        continue;
                    };
                    text.push_str(piece);

                    if !piece.is_empty() && self.looks_finished(&text) {
                        debug!("Accumulated text looks complete, settling before next read");
                        settle_pauses += 1;
                        if !self.settle_delay.is_zero() {
                            tokio::time::sleep(self.settle_delay).await;
                        }
                    }
                }
                Some(Err(e)) => {
                    if text.trim().is_empty() {
                        debug!("Stream failed in state {:?} before any text", state);
                        state = ReduceState::Failed;
                        return Err(ReduceFailure { state, fragments, source: e });
                    }
                    warn!("Stream error after {} fragments, keeping partial text: {}", fragments, e);
                    state = ReduceState::Truncated;
                    interrupted = Some(e.to_string());
                    break;
                }
            }
        }

        Ok(ReducedCompletion {
            text: strip_reasoning(&text),
            state,
            fragments,
            settle_pauses,
            interrupted,
        })
    }
}

/// Removes paired reasoning blocks. An opener without a closer drops
/// everything after it.
pub fn strip_reasoning(input: &str) -> String {
    let mut output = input.to_string();
    for (open, close) in REASONING_DELIMITERS {
        while let Some(start) = output.find(open) {
            let Some(relative_end) = output[start + open.len()..].find(close) else {
                output.truncate(start);
                break;
            };
            let end = start + open.len() + relative_end + close.len();
            output.replace_range(start..end, "");
        }
    }
    output.trim().to_string()
}
