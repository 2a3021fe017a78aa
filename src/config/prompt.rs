use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use log::info;
use thiserror::Error;

pub const DEFAULT_MODE: &str = "Complete Code";

const BUILTIN_PRESETS: [(&str, &str); 4] = [
    (
        "Complete Code",
        "You are a helpful AI assistant specialized in providing complete, working code. When asked for code, always provide the FULL, COMPLETE code without any truncation. Include all necessary imports, closing tags, brackets, and complete functions. Never leave code incomplete or cut off mid-sentence.",
    ),
    (
        "Standard",
        "You are a helpful AI assistant. When providing code, always provide the complete code without truncation. If the code is long, make sure to include all necessary parts including closing tags, brackets, and complete functions.",
    ),
    (
        "Creative",
        "You are a creative AI assistant. Provide detailed and imaginative responses while ensuring code is complete and functional.",
    ),
    (
        "Concise",
        "You are a concise AI assistant. Provide brief but complete responses with all necessary code elements included.",
    ),
];

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt preset '{0}' not found")]
    PresetNotFound(String),

    #[error("prompt file IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("prompt JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Deserialize, Debug, Default)]
struct PromptFile {
    #[serde(default)]
    default_mode: Option<String>,
    #[serde(default)]
    presets: BTreeMap<String, String>,
}

/// Named system instructions selectable per request.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub default_mode: String,
    pub presets: BTreeMap<String, String>,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            default_mode: DEFAULT_MODE.to_string(),
            presets: BUILTIN_PRESETS.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl PromptConfig {
    pub fn preset(&self, mode: &str) -> Result<&str, PromptError> {
        self.presets
            .get(mode)
            .map(|s| s.as_str())
            .ok_or_else(|| PromptError::PresetNotFound(mode.to_string()))
    }

    pub fn default_prompt(&self) -> Result<&str, PromptError> {
        self.preset(&self.default_mode)
    }

    pub fn modes(&self) -> Vec<&str> {
        self.presets.keys().map(|k| k.as_str()).collect()
    }
}

/// Built-in presets, overlaid with the entries of `path` when given.
pub fn load_prompts(
    path: Option<&Path>,
    mode_override: Option<&str>
) -> Result<Arc<PromptConfig>, PromptError> {
    let mut config = PromptConfig::default();

    if let Some(path) = path {
        let file_content = fs::read_to_string(path)?;
        let file: PromptFile = serde_json::from_str(&file_content)?;
        info!("Loaded {} prompt preset(s) from {}", file.presets.len(), path.display());
        config.presets.extend(file.presets);
        if let Some(mode) = file.default_mode {
            config.default_mode = mode;
        }
    }
    if let Some(mode) = mode_override.filter(|m| !m.trim().is_empty()) {
        config.default_mode = mode.to_string();
    }

    config.default_prompt()?;
    Ok(Arc::new(config))
}
