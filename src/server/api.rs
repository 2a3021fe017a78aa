use crate::agent::{ ChatAgent, PreviewRequest };
use crate::error::{ ChatError, ChatResult };
use crate::llm::chat::ProviderMessage;
use crate::models::chat::ConversationSummary;

use std::convert::Infallible;
use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use axum::{
    routing::{ get, post, put },
    Router,
    Json,
    extract::{ Path, Request, State, rejection::JsonRejection },
    middleware::{ self, Next },
    response::{ IntoResponse, Response, sse::{ Event, KeepAlive, Sse } },
    http::StatusCode,
};
use futures::{ stream, Stream, StreamExt };
use governor::{ DefaultDirectRateLimiter, Quota, RateLimiter };
use serde::Deserialize;
use serde_json::{ json, Value as JsonValue };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, warn, error };

#[derive(Clone)]
pub struct AppState {
    agent: Arc<ChatAgent>,
    api_key: Option<Arc<str>>,
    limiter: Arc<DefaultDirectRateLimiter>,
}

#[derive(Deserialize, Default)]
struct CreateChatBody {
    title: Option<String>,
}

#[derive(Deserialize)]
struct TitleBody {
    title: Option<String>,
}

#[derive(Deserialize)]
struct ContentBody {
    content: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewBody {
    message: Option<String>,
    model: Option<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    prompt_mode: Option<String>,
}

#[derive(Deserialize)]
struct RelayBody {
    #[serde(default)]
    messages: Vec<ProviderMessage>,
}

fn error_status(err: &ChatError) -> StatusCode {
    match err {
        ChatError::Validation(_) => StatusCode::BAD_REQUEST,
        ChatError::NotFound(_) => StatusCode::NOT_FOUND,
        ChatError::Configuration(_) | ChatError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ChatError::Provider(e) if e.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
        ChatError::Provider(_) => StatusCode::BAD_GATEWAY,
        ChatError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = error_status(&self);
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            info!("Request rejected: {}", self);
        }
        (status, Json(json!({ "success": false, "error": self.to_string() }))).into_response()
    }
}

/// Wraps a payload object in the `{success: true, ...}` envelope.
fn ok(payload: JsonValue) -> Response {
    let mut body = json!({ "success": true });
    if let (Some(target), JsonValue::Object(fields)) = (body.as_object_mut(), payload) {
        target.extend(fields);
    }
    (StatusCode::OK, Json(body)).into_response()
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> ChatResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|rejection| ChatError::Validation(rejection.body_text()))
}

pub fn build_router(agent: Arc<ChatAgent>, api_key: Option<String>, rate_limit_per_second: u32) -> Router {
    let quota = Quota::per_second(NonZeroU32::new(rate_limit_per_second).unwrap_or(NonZeroU32::MIN));
    let state = AppState {
        agent,
        api_key: api_key.filter(|k| !k.trim().is_empty()).map(Arc::from),
        limiter: Arc::new(RateLimiter::direct(quota)),
    };

    if state.api_key.is_some() {
        info!("HTTP API configured with API Key authentication.");
    } else {
        warn!("HTTP API configured WITHOUT API Key authentication. Endpoints are open.");
    }

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let api = Router::new()
        .route("/api/chats", get(list_chats_handler).post(create_chat_handler))
        .route(
            "/api/chats/{chat_id}",
            get(get_chat_handler).put(update_chat_handler).delete(delete_chat_handler)
        )
        .route("/api/chats/{chat_id}/messages", get(list_messages_handler).post(send_message_handler))
        .route("/api/messages/{message_id}", put(update_message_handler).delete(delete_message_handler))
        .route("/api/completions/preview", post(preview_handler))
        .route("/api/chat", post(relay_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_handler))
        .merge(api)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .layer(cors)
        .with_state(state)
}

async fn require_api_key(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if let Some(required) = &state.api_key {
        let provided = req
            .headers()
            .get("X-API-Key")
            .and_then(|v| v.to_str().ok());
        if provided != Some(&**required) {
            warn!("Rejected {} {}: bad or missing API key", req.method(), req.uri().path());
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "success": false, "error": "Unauthorized" })),
            ).into_response();
        }
    }
    next.run(req).await
}

async fn rate_limit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if state.limiter.check().is_err() {
        warn!("Global request rate limit exceeded for {}. Rejecting.", req.uri().path());
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({ "success": false, "error": "Too many requests" })),
        ).into_response();
    }
    next.run(req).await
}

pub async fn start_http_server(
    addr: &str,
    router: Router,
    tls: Option<(String, String)>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;

    if let Some((cert_path, key_path)) = tls {
        info!(
            "TLS enabled. Loading certificate from '{}' and key from '{}'",
            cert_path,
            key_path
        );
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;
        info!("HTTPS server listening on: https://{}", addr);
        axum_server::bind_rustls(addr, tls_config).serve(router.into_make_service()).await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            e
        })?;
        info!("HTTP server listening on: http://{}", addr);
        axum::serve(listener, router.into_make_service()).await?;
    }

    Ok(())
}

async fn health_handler() -> Response {
    ok(json!({ "status": "ok" }))
}

async fn list_chats_handler(State(state): State<AppState>) -> ChatResult<Response> {
    let chats = state.agent.list_conversations().await?;
    Ok(ok(json!({ "chats": chats })))
}

async fn create_chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<CreateChatBody>, JsonRejection>
) -> ChatResult<Response> {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(JsonRejection::MissingJsonContentType(_)) => CreateChatBody::default(),
        Err(rejection) => {
            return Err(ChatError::Validation(rejection.body_text()));
        }
    };
    let chat = state.agent.create_conversation(body.title.as_deref()).await?;
    Ok(ok(json!({ "chat": ConversationSummary { conversation: chat, message_count: 0 } })))
}

async fn get_chat_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>
) -> ChatResult<Response> {
    let (conversation, messages) = state.agent.get_conversation_with_turns(&chat_id).await?;
    let chat = ConversationSummary { conversation, message_count: messages.len() };
    Ok(ok(json!({ "chat": chat, "messages": messages })))
}

async fn update_chat_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    payload: Result<Json<TitleBody>, JsonRejection>
) -> ChatResult<Response> {
    let body = parse_body(payload)?;
    let chat = state.agent.rename_conversation(&chat_id, body.title.as_deref().unwrap_or("")).await?;
    Ok(ok(json!({ "chat": chat })))
}

async fn delete_chat_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>
) -> ChatResult<Response> {
    state.agent.delete_conversation(&chat_id).await?;
    Ok(ok(json!({ "message": "Chat deleted successfully" })))
}

async fn list_messages_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>
) -> ChatResult<Response> {
    let messages = state.agent.list_turns(&chat_id).await?;
    Ok(ok(json!({ "messages": messages })))
}

async fn send_message_handler(
    State(state): State<AppState>,
    Path(chat_id): Path<String>,
    payload: Result<Json<ContentBody>, JsonRejection>
) -> ChatResult<Response> {
    let body = parse_body(payload)?;
    let exchange = state.agent.send_message(&chat_id, body.content.as_deref().unwrap_or("")).await?;
    Ok(
        ok(
            json!({
                "userMessage": exchange.user_turn,
                "assistantMessage": exchange.assistant_turn,
            })
        )
    )
}

async fn update_message_handler(
    State(state): State<AppState>,
    Path(message_id): Path<String>,
    payload: Result<Json<ContentBody>, JsonRejection>
) -> ChatResult<Response> {
    let body = parse_body(payload)?;
    let message = state.agent.edit_turn(&message_id, body.content.as_deref().unwrap_or("")).await?;
    Ok(ok(json!({ "message": message })))
}

async fn delete_message_handler(
    State(state): State<AppState>,
    Path(message_id): Path<String>
) -> ChatResult<Response> {
    state.agent.delete_turn(&message_id).await?;
    Ok(ok(json!({ "message": "Message deleted successfully" })))
}

async fn preview_handler(
    State(state): State<AppState>,
    payload: Result<Json<PreviewBody>, JsonRejection>
) -> ChatResult<Response> {
    let body = parse_body(payload)?;
    let outcome = state.agent.preview_completion(PreviewRequest {
        message: body.message.unwrap_or_default(),
        model: body.model,
        temperature: body.temperature,
        max_tokens: body.max_tokens,
        system_prompt: body.system_prompt,
        prompt_mode: body.prompt_mode,
    }).await?;

    Ok(
        ok(
            json!({
                "response": outcome.response,
                "model": outcome.model,
                "temperature": outcome.temperature,
                "maxTokens": outcome.max_tokens,
                "inputMessage": outcome.input_message,
                "systemPrompt": outcome.system_prompt,
                "chunkCount": outcome.chunk_count,
                "responseLength": outcome.response_length,
            })
        )
    )
}

async fn relay_handler(
    State(state): State<AppState>,
    payload: Result<Json<RelayBody>, JsonRejection>
) -> ChatResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let body = parse_body(payload)?;
    let fragments = state.agent.relay_stream(body.messages).await?;

    let events = fragments
        .filter_map(|item| async move {
            match item {
                Ok(fragment) =>
                    fragment
                        .text_piece()
                        .filter(|piece| !piece.is_empty())
                        .map(|piece| Ok::<_, Infallible>(Event::default().data(piece))),
                Err(e) => {
                    warn!("Relay stream error: {}", e);
                    Some(Ok::<_, Infallible>(Event::default().event("error").data(e.to_string())))
                }
            }
        })
        .chain(stream::once(async { Ok::<_, Infallible>(Event::default().data("[DONE]")) }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
