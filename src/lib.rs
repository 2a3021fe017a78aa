pub mod agent;
pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;

use agent::ChatAgent;
use cli::Args;
use log::info;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("History Store Type: {}", args.history_type);
    if !args.history_type.eq_ignore_ascii_case("memory") {
        info!("History Store Host: {}", args.history_host);
    }
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model.as_deref().unwrap_or("provider default"));
    info!("Chat API Key Set: {}", !args.chat_api_key.is_empty());
    info!("Streaming: {}", args.stream);
    info!("Context Window: {}", args.context_window);
    info!("Max Tokens: {} (floor {})", args.max_tokens, args.max_tokens_floor);
    info!("Stream Fragment Limit: {}", args.stream_max_fragments);
    info!("Request Timeout: {}s", args.request_timeout_secs);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in presets"));
    info!("TLS Enabled: {}", args.enable_tls);
    info!("-------------------------");

    let agent = Arc::new(ChatAgent::new(args.clone()).await?);
    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, agent, args);
    server.run().await?;

    Ok(())
}
