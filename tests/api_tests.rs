use async_trait::async_trait;
use axum::body::{ self, Body };
use axum::http::{ Request, StatusCode };
use axum::Router;
use chrono::{ DateTime, Utc };
use chat_relay::agent::{ AgentSettings, ChatAgent };
use chat_relay::config::prompt::PromptConfig;
use chat_relay::history::MemoryHistoryStore;
use chat_relay::llm::chat::{
    ChatClient,
    CompletionResponse,
    FragmentStream,
    ProviderMessage,
    ProviderRole,
    StreamFragment,
};
use chat_relay::llm::reducer::StreamReducer;
use chat_relay::llm::{ GenerationParams, LlmError, ModelId };
use futures::stream;
use serde_json::{ json, Value };
use std::sync::{ Arc, Mutex };
use std::time::Duration;
use tower::ServiceExt;

/// Replays a fixed list of fragments, optionally followed by an error, or
/// never yields at all.
struct ScriptedClient {
    pieces: Vec<String>,
    fail: bool,
    hang: bool,
    credentials: bool,
    seen: Mutex<Vec<Vec<ProviderMessage>>>,
}

impl ScriptedClient {
    fn replying(pieces: &[&str]) -> Self {
        Self {
            pieces: pieces.iter().map(|p| p.to_string()).collect(),
            fail: false,
            hang: false,
            credentials: true,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self::failing_after(&[])
    }

    fn failing_after(pieces: &[&str]) -> Self {
        Self { fail: true, ..Self::replying(pieces) }
    }

    fn hanging() -> Self {
        Self { hang: true, ..Self::replying(&[]) }
    }

    fn without_key() -> Self {
        Self { credentials: false, ..Self::replying(&["unused"]) }
    }
}

#[async_trait]
impl ChatClient for ScriptedClient {
    async fn complete(
        &self,
        messages: &[ProviderMessage],
        _params: &GenerationParams
    ) -> Result<CompletionResponse, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        Ok(CompletionResponse { response: self.pieces.concat() })
    }

    async fn stream_completion(
        &self,
        messages: &[ProviderMessage],
        _params: &GenerationParams
    ) -> Result<FragmentStream, LlmError> {
        self.seen.lock().unwrap().push(messages.to_vec());
        if self.hang {
            return Ok(Box::pin(stream::pending::<Result<StreamFragment, LlmError>>()));
        }
        let mut items: Vec<Result<StreamFragment, LlmError>> = self.pieces
            .iter()
            .map(|p| Ok(StreamFragment::text(p.clone())))
            .collect();
        if self.fail {
            items.push(Err(LlmError::Stream { reason: "connection reset".to_string() }));
        }
        Ok(Box::pin(stream::iter(items)))
    }

    fn has_credentials(&self) -> bool {
        self.credentials
    }

    fn provider_name(&self) -> String {
        "scripted".to_string()
    }
}

struct Harness {
    router: Router,
    client: Arc<ScriptedClient>,
}

fn harness(client: ScriptedClient, api_key: Option<&str>) -> Harness {
    harness_with(client, api_key, |_| {})
}

fn harness_with(
    client: ScriptedClient,
    api_key: Option<&str>,
    configure: impl FnOnce(&mut AgentSettings)
) -> Harness {
    let client = Arc::new(client);
    let mut settings = AgentSettings::new(ModelId::DeepseekR1DistillLlama70b);
    settings.system_prompt = Some("You are terse.".to_string());
    settings.request_timeout = Duration::from_secs(5);
    configure(&mut settings);
    let agent = ChatAgent::from_parts(
        Arc::new(MemoryHistoryStore::new()),
        client.clone(),
        StreamReducer::new(1000, Duration::ZERO),
        Arc::new(PromptConfig::default()),
        settings
    );
    let router = chat_relay::server::api::build_router(
        Arc::new(agent),
        api_key.map(str::to_string),
        1000
    );
    Harness { router, client }
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) =>
            builder
                .header("content-type", "application/json")
                .body(Body::from(v.to_string()))
                .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

async fn new_chat(router: &Router) -> String {
    let (status, body) = call(router, "POST", "/api/chats", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chat"]["title"], "New Chat");
    body["chat"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn first_message_titles_chat_and_persists_reply() {
    let h = harness(ScriptedClient::replying(&["<think>plan</think>", "Hi ", "there!"]), None);
    let id = new_chat(&h.router).await;

    let (status, body) = call(
        &h.router,
        "POST",
        &format!("/api/chats/{}/messages", id),
        Some(json!({ "content": "Hello" }))
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["userMessage"]["role"], "user");
    assert_eq!(body["assistantMessage"]["content"], "Hi there!");

    let (_, chat) = call(&h.router, "GET", &format!("/api/chats/{}", id), None).await;
    assert_eq!(chat["chat"]["title"], "Hello");
    let messages = chat["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
    let created = |v: &Value| v["createdAt"].as_str().unwrap().parse::<DateTime<Utc>>().unwrap();
    assert!(created(&messages[0]) < created(&messages[1]));

    let seen = h.client.seen.lock().unwrap();
    assert_eq!(seen[0][0].role, ProviderRole::System);
    assert_eq!(seen[0].last().unwrap().content, "Hello");
}

#[tokio::test]
async fn long_first_message_title_is_shortened() {
    let h = harness(ScriptedClient::replying(&["ok"]), None);
    let id = new_chat(&h.router).await;
    call(
        &h.router,
        "POST",
        &format!("/api/chats/{}/messages", id),
        Some(json!({ "content": "Explain borrow checking in detail" }))
    ).await;

    let (_, chats) = call(&h.router, "GET", "/api/chats", None).await;
    assert_eq!(chats["chats"][0]["title"], "Explain borrow check...");
    assert_eq!(chats["chats"][0]["messageCount"], 2);
}

#[tokio::test]
async fn provider_failure_keeps_only_the_user_turn() {
    let h = harness(ScriptedClient::failing(), None);
    let id = new_chat(&h.router).await;

    let (status, body) = call(
        &h.router,
        "POST",
        &format!("/api/chats/{}/messages", id),
        Some(json!({ "content": "Hello" }))
    ).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("connection reset"));

    let (_, listed) = call(&h.router, "GET", &format!("/api/chats/{}/messages", id), None).await;
    let messages = listed["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user");
}

#[tokio::test]
async fn missing_api_key_persists_nothing() {
    let h = harness(ScriptedClient::without_key(), None);
    let id = new_chat(&h.router).await;

    let (status, body) = call(
        &h.router,
        "POST",
        &format!("/api/chats/{}/messages", id),
        Some(json!({ "content": "Hello" }))
    ).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("API key"));

    let (_, listed) = call(&h.router, "GET", &format!("/api/chats/{}/messages", id), None).await;
    assert!(listed["messages"].as_array().unwrap().is_empty());
    assert!(h.client.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn deleting_a_chat_removes_its_turns() {
    let h = harness(ScriptedClient::replying(&["reply"]), None);
    let id = new_chat(&h.router).await;
    call(&h.router, "POST", &format!("/api/chats/{}/messages", id), Some(json!({ "content": "x" }))).await;

    let (status, _) = call(&h.router, "DELETE", &format!("/api/chats/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, listed) = call(&h.router, "GET", &format!("/api/chats/{}/messages", id), None).await;
    assert!(listed["messages"].as_array().unwrap().is_empty());
    let (_, chats) = call(&h.router, "GET", "/api/chats", None).await;
    assert!(chats["chats"].as_array().unwrap().is_empty());

    let (status, _) = call(&h.router, "DELETE", &format!("/api/chats/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn ids_are_validated_before_lookup() {
    let h = harness(ScriptedClient::replying(&["reply"]), None);

    let (status, body) = call(&h.router, "GET", "/api/chats/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid chat ID");

    let unknown = "6f1c2d3e-4a5b-4c6d-8e7f-901234567890";
    let (status, body) = call(&h.router, "GET", &format!("/api/chats/{}", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Chat not found");

    let (status, _) = call(
        &h.router,
        "POST",
        &format!("/api/chats/{}/messages", unknown),
        Some(json!({ "content": "hi" }))
    ).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn messages_can_be_edited_and_deleted() {
    let h = harness(ScriptedClient::replying(&["reply"]), None);
    let id = new_chat(&h.router).await;
    let (_, sent) = call(
        &h.router,
        "POST",
        &format!("/api/chats/{}/messages", id),
        Some(json!({ "content": "first" }))
    ).await;
    let turn_id = sent["userMessage"]["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &h.router,
        "PUT",
        &format!("/api/messages/{}", turn_id),
        Some(json!({ "content": "   " }))
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, edited) = call(
        &h.router,
        "PUT",
        &format!("/api/messages/{}", turn_id),
        Some(json!({ "content": "  edited  " }))
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(edited["message"]["content"], "edited");

    let (status, _) = call(&h.router, "DELETE", &format!("/api/messages/{}", turn_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, listed) = call(&h.router, "GET", &format!("/api/chats/{}/messages", id), None).await;
    assert_eq!(listed["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn rename_requires_a_title() {
    let h = harness(ScriptedClient::replying(&["reply"]), None);
    let id = new_chat(&h.router).await;

    let (status, _) = call(&h.router, "PUT", &format!("/api/chats/{}", id), Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &h.router,
        "PUT",
        &format!("/api/chats/{}", id),
        Some(json!({ "title": "Renamed" }))
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["chat"]["title"], "Renamed");
}

#[tokio::test]
async fn preview_reports_fragment_count_without_storing() {
    let h = harness(ScriptedClient::replying(&["<think>x</think>", "fn ", "main() {}"]), None);

    let (status, _) = call(&h.router, "POST", "/api/completions/preview", Some(json!({ "message": "" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &h.router,
        "POST",
        "/api/completions/preview",
        Some(json!({ "message": "write main", "maxTokens": 100, "promptMode": "Concise" }))
    ).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"], "fn main() {}");
    assert_eq!(body["chunkCount"], 3);
    assert_eq!(body["maxTokens"], 4096);
    assert_eq!(body["model"], "deepseek-r1-distill-llama-70b");
    assert!(body["systemPrompt"].as_str().unwrap().starts_with("You are a concise"));

    let (_, chats) = call(&h.router, "GET", "/api/chats", None).await;
    assert!(chats["chats"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn preview_rejects_unknown_model_and_mode() {
    let h = harness(ScriptedClient::replying(&["ok"]), None);

    let (status, _) = call(
        &h.router,
        "POST",
        "/api/completions/preview",
        Some(json!({ "message": "hi", "model": "not-a-model" }))
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &h.router,
        "POST",
        "/api/completions/preview",
        Some(json!({ "message": "hi", "promptMode": "Pirate" }))
    ).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn relay_streams_pieces_then_done() {
    let h = harness(ScriptedClient::replying(&["Hel", "lo"]), None);
    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "messages": [{ "role": "user", "content": "hi" }] }).to_string()))
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let hel = text.find("data: Hel").unwrap();
    let lo = text.find("data: lo").unwrap();
    let done = text.find("data: [DONE]").unwrap();
    assert!(hel < lo && lo < done);

    let seen = h.client.seen.lock().unwrap();
    assert_eq!(seen[0][0], ProviderMessage::new(ProviderRole::System, "You are terse."));
}

#[tokio::test]
async fn api_key_guards_everything_but_health() {
    let h = harness(ScriptedClient::replying(&["ok"]), Some("secret"));

    let (status, _) = call(&h.router, "GET", "/api/chats", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&h.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let request = Request::builder()
        .uri("/api/chats")
        .header("X-API-Key", "secret")
        .body(Body::empty())
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn send(router: &Router, chat_id: &str, content: &str) -> (StatusCode, Value) {
    call(
        router,
        "POST",
        &format!("/api/chats/{}/messages", chat_id),
        Some(json!({ "content": content }))
    ).await
}

async fn stored_roles(router: &Router, chat_id: &str) -> Vec<String> {
    let (_, listed) = call(router, "GET", &format!("/api/chats/{}/messages", chat_id), None).await;
    listed["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn blocking_mode_strips_reasoning_before_storing() {
    let h = harness_with(
        ScriptedClient::replying(&["<think>hidden</think>", "Plain answer"]),
        None,
        |s| s.stream = false
    );
    let id = new_chat(&h.router).await;

    let (status, body) = send(&h.router, &id, "Hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assistantMessage"]["content"], "Plain answer");
    assert_eq!(stored_roles(&h.router, &id).await, vec!["user", "assistant"]);
}

#[tokio::test]
async fn blocking_mode_empty_reply_is_not_stored() {
    let h = harness_with(ScriptedClient::replying(&["<think>only thoughts</think>"]), None, |s| {
        s.stream = false;
    });
    let id = new_chat(&h.router).await;

    let (status, body) = send(&h.router, &id, "Hello").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("empty completion"));
    assert_eq!(stored_roles(&h.router, &id).await, vec!["user"]);
}

#[tokio::test]
async fn slow_provider_times_out_and_keeps_user_turn() {
    let h = harness_with(ScriptedClient::hanging(), None, |s| {
        s.request_timeout = Duration::from_millis(50);
    });
    let id = new_chat(&h.router).await;

    let (status, body) = send(&h.router, &id, "Hello").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["success"], false);
    assert_eq!(stored_roles(&h.router, &id).await, vec!["user"]);
}

#[tokio::test]
async fn stream_error_after_text_stores_partial_reply() {
    let h = harness(ScriptedClient::failing_after(&["Partial ", "answer"]), None);
    let id = new_chat(&h.router).await;

    let (status, body) = send(&h.router, &id, "Hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assistantMessage"]["content"], "Partial answer");
    assert_eq!(stored_roles(&h.router, &id).await, vec!["user", "assistant"]);
}

#[tokio::test]
async fn relay_reports_deadline_before_done() {
    let h = harness_with(ScriptedClient::hanging(), None, |s| {
        s.request_timeout = Duration::from_millis(50);
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "messages": [{ "role": "user", "content": "hi" }] }).to_string()))
        .unwrap();
    let response = h.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    let error = text.find("event: error").unwrap();
    let done = text.find("data: [DONE]").unwrap();
    assert!(text.contains("deadline"));
    assert!(error < done);
}
