use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- History Store Args ---
    /// History chat store type (memory, redis)
    #[arg(long, env = "HISTORY_TYPE", default_value = "memory")]
    pub history_type: String,

    /// History chat store host endpoint (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "chat:")]
    pub history_redis_prefix: String,

    /// Owner id assigned to conversations (no per-user auth yet).
    #[arg(long, env = "DEFAULT_OWNER", default_value = "default-user")]
    pub default_owner: String,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (groq, openai)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "groq")]
    pub chat_llm_type: String,

    /// Full chat completions URL; defaults to the provider's public endpoint.
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Model name for chat completion (e.g., deepseek-r1-distill-llama-70b, gpt-4o)
    #[arg(long, env = "CHAT_MODEL")] // No default, rely on provider default if None
    pub chat_model: Option<String>,

    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "4096")]
    pub max_tokens: u32,

    /// Requested max_tokens values below this are raised to it.
    #[arg(long, env = "CHAT_MAX_TOKENS_FLOOR", default_value = "4096")]
    pub max_tokens_floor: u32,

    #[arg(long, env = "CHAT_TOP_P", default_value = "1.0")]
    pub top_p: f32,

    /// Stop sequences, comma separated.
    #[arg(long, env = "CHAT_STOP", value_delimiter = ',')]
    pub stop: Vec<String>,

    /// Stream completions from the provider instead of waiting for the full reply.
    #[arg(long, env = "CHAT_STREAM", default_value = "true", action = clap::ArgAction::Set)]
    pub stream: bool,

    // --- Context & Prompt Args ---
    /// Number of most recent turns sent to the provider as context.
    #[arg(long, env = "CONTEXT_WINDOW", default_value = "20")]
    pub context_window: usize,

    /// System instruction prepended to every chat request; overrides the prompt preset.
    #[arg(long, env = "SYSTEM_PROMPT")]
    pub system_prompt: Option<String>,

    /// Optional JSON file with extra prompt presets.
    #[arg(long, env = "PROMPTS_PATH")]
    pub prompts_path: Option<String>,

    /// Prompt preset used when no system prompt is given.
    #[arg(long, env = "PROMPT_MODE")]
    pub prompt_mode: Option<String>,

    // --- Stream Reducer Args ---
    /// Maximum number of stream fragments read per reply.
    #[arg(long, env = "STREAM_MAX_FRAGMENTS", default_value = "1000")]
    pub stream_max_fragments: usize,

    /// Pause (ms) after a fragment that makes the reply look finished.
    #[arg(long, env = "STREAM_SETTLE_MS", default_value = "100")]
    pub stream_settle_ms: u64,

    /// Overall deadline for generating one reply.
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    pub request_timeout_secs: u64,

    // --- Server Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:4000")]
    pub server_addr: String,

    /// Optional API Key required in the X-API-Key header. If set, clients must provide this key.
    #[arg(long, env = "SERVER_API_KEY")]
    pub server_api_key: Option<String>,

    /// Requests accepted per second across all clients.
    #[arg(long, env = "RATE_LIMIT_PER_SECOND", default_value = "10")]
    pub rate_limit_per_second: u32,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}
