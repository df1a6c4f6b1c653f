use anyhow::Result;
use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::chat::chat_handler;
use super::RelayState;
use crate::models::{day_key, resolve_session_id, HealthResponse, UsageQuery, UsageSnapshot};

pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/usage", get(usage_handler))
        .route("/chat", post(chat_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler(State(state): State<RelayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        store: state.sessions.backend().to_string(),
        store_connected: state.sessions.is_connected().await,
        fact_lookup: state.facts.is_some(),
    })
}

async fn usage_handler(
    State(state): State<RelayState>,
    Query(query): Query<UsageQuery>,
) -> Json<UsageSnapshot> {
    let session_id = resolve_session_id(query.session_id.as_deref());
    let day = day_key(chrono::Utc::now());

    let usage = state
        .sessions
        .read_usage(&session_id, &day)
        .await
        .or_fallback("usage read", state.sessions.empty_usage(&day));

    Json(usage)
}

pub struct RelayServer {
    state: RelayState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl RelayServer {
    pub fn new(state: RelayState) -> Self {
        Self {
            state,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Bind and serve in the background; returns the bound address
    pub async fn start(&mut self, addr: SocketAddr) -> Result<SocketAddr> {
        if self.handle.is_some() {
            anyhow::bail!("Relay server is already running");
        }

        let app = router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        self.shutdown_tx = Some(tx);
        tracing::info!("PULSE running on http://{}", local_addr);

        let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(async {
            let _ = rx.await;
            tracing::info!("Relay server shutting down");
        });

        self.handle = Some(tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!("Relay server error: {}", e);
            }
        }));

        Ok(local_addr)
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Outcome;
    use crate::relay::hooks::registry::tests::CountingHook;
    use crate::relay::language::Language;
    use crate::relay::llm::{ChatMessage, LlmError};
    use crate::relay::{ChatModel, Detectors, FactLookup, HookRegistry, RelaySettings};
    use crate::storage::session_state::tests::DownStore;
    use crate::storage::{KvStore, MemoryStore, SessionPolicy, SessionState};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::Ordering;
    use std::sync::{Arc, Mutex};
    use tower::ServiceExt;

    /// Records prompts and answers with a fixed reply
    struct FakeModel {
        reply: Result<String, String>,
        calls: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl FakeModel {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(message.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }

        fn last_prompt(&self) -> Vec<ChatMessage> {
            self.calls.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ChatModel for FakeModel {
        fn model_id(&self) -> &str {
            "fake"
        }

        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.calls.lock().unwrap().push(messages.to_vec());
            self.reply.clone().map_err(|message| LlmError::Api {
                status: 502,
                message,
            })
        }
    }

    struct FakeFacts {
        outcome: Outcome<String>,
        calls: Mutex<Vec<(String, Language)>>,
    }

    #[async_trait]
    impl FactLookup for FakeFacts {
        async fn head_of_state(&self, entity_id: &str, language: Language) -> Outcome<String> {
            self.calls
                .lock()
                .unwrap()
                .push((entity_id.to_string(), language));
            self.outcome.clone()
        }
    }

    fn state_with(
        store: Arc<dyn KvStore>,
        model: Arc<FakeModel>,
        facts: Option<Arc<FakeFacts>>,
        daily_limit: i64,
    ) -> RelayState {
        RelayState {
            sessions: SessionState::new(
                store,
                SessionPolicy {
                    daily_limit,
                    ..Default::default()
                },
            ),
            model,
            facts: facts.map(|f| f as Arc<dyn FactLookup>),
            detectors: Arc::new(Detectors::default()),
            hooks: HookRegistry::new(),
            settings: RelaySettings::default(),
        }
    }

    fn memory_state(model: Arc<FakeModel>, daily_limit: i64) -> RelayState {
        state_with(Arc::new(MemoryStore::open()), model, None, daily_limit)
    }

    async fn post_chat(app: &Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, request).await
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        send(app, request).await
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health_reports_store() {
        let app = router(memory_state(FakeModel::replying("ok"), 3));
        let (status, json) = get_json(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["ok"], true);
        assert_eq!(json["store"], "memory");
        assert_eq!(json["storeConnected"], true);
        assert_eq!(json["factLookup"], false);
    }

    #[tokio::test]
    async fn test_missing_text_is_bad_request() {
        let model = FakeModel::replying("ok");
        let app = router(memory_state(model.clone(), 3));

        let (status, json) = post_chat(&app, serde_json::json!({ "sessionId": "s1" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "No text provided");

        let (status, _) = post_chat(&app, serde_json::json!({ "text": "   " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .body(Body::from("not json"))
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().starts_with("Invalid request body"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_numeric_session_id_is_used_as_key() {
        let model = FakeModel::replying("ok");
        let app = router(memory_state(model.clone(), 3));

        let (status, json) = post_chat(&app, serde_json::json!({ "text": "hello", "sessionId": 42 })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["usedToday"], 1);
        assert_eq!(model.call_count(), 1);

        let (_, usage) = get_json(&app, "/usage?sessionId=42").await;
        assert_eq!(usage["usedToday"], 1);
        let (_, default_usage) = get_json(&app, "/usage").await;
        assert_eq!(default_usage["usedToday"], 0);
    }

    #[tokio::test]
    async fn test_unusable_session_id_falls_back_to_default() {
        let app = router(memory_state(FakeModel::replying("ok"), 3));

        let (status, _) = post_chat(&app, serde_json::json!({ "text": "hello", "sessionId": true })).await;
        assert_eq!(status, StatusCode::OK);
        let (_, usage) = get_json(&app, "/usage").await;
        assert_eq!(usage["usedToday"], 1);
    }

    #[tokio::test]
    async fn test_reply_is_shaped_and_usage_reported() {
        let model = FakeModel::replying("Line one.\n\nLine two.\nLine three.");
        let app = router(memory_state(model, 3));

        let (status, json) = post_chat(&app, serde_json::json!({ "text": "hello", "sessionId": "s1" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["reply"], "Line one.\nLine two.");
        assert_eq!(json["paywall"], false);
        assert_eq!(json["source"], "model");
        assert_eq!(json["usedToday"], 1);
        assert_eq!(json["remainingToday"], 2);
        assert_eq!(json["limit"], 3);

        let (_, usage) = get_json(&app, "/usage?sessionId=s1").await;
        assert_eq!(usage["usedToday"], 1);
        let (_, other) = get_json(&app, "/usage?sessionId=s2").await;
        assert_eq!(other["usedToday"], 0);
    }

    #[tokio::test]
    async fn test_paywall_after_limit_skips_model() {
        let model = FakeModel::replying("ok");
        let app = router(memory_state(model.clone(), 2));

        for _ in 0..2 {
            let (_, json) = post_chat(&app, serde_json::json!({ "text": "hello", "sessionId": "s1" })).await;
            assert_eq!(json["paywall"], false);
        }

        for _ in 0..3 {
            let (status, json) = post_chat(&app, serde_json::json!({ "text": "hola, que tal?", "sessionId": "s1" })).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["paywall"], true);
            assert_eq!(json["usedToday"], 2);
            assert_eq!(json["remainingToday"], 0);
            assert!(json["reply"].as_str().unwrap().starts_with("Límite gratis alcanzado"));
        }

        let (_, json) = post_chat(&app, serde_json::json!({ "text": "hello", "sessionId": "s1" })).await;
        assert!(json["reply"].as_str().unwrap().starts_with("Free limit reached"));
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    async fn test_missing_session_uses_default() {
        let app = router(memory_state(FakeModel::replying("ok"), 3));
        post_chat(&app, serde_json::json!({ "text": "hello" })).await;
        let (_, usage) = get_json(&app, "/usage").await;
        assert_eq!(usage["usedToday"], 1);
    }

    #[tokio::test]
    async fn test_name_reaches_next_prompt() {
        let model = FakeModel::replying("Hola Ana.");
        let app = router(memory_state(model.clone(), 10));

        post_chat(&app, serde_json::json!({ "text": "hola, me llamo Ana", "sessionId": "s1" })).await;
        post_chat(&app, serde_json::json!({ "text": "como me llamo?", "sessionId": "s1" })).await;

        let prompt = model.last_prompt();
        assert_eq!(prompt[0].role, "system");
        assert!(prompt[0].content.contains("Ana"));

        let roles: Vec<_> = prompt.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
        assert_eq!(prompt[3].content, "como me llamo?");
    }

    #[tokio::test]
    async fn test_non_matching_text_keeps_name() {
        let model = FakeModel::replying("ok");
        let app = router(memory_state(model.clone(), 10));

        post_chat(&app, serde_json::json!({ "text": "my name is Alice", "sessionId": "s1" })).await;
        post_chat(&app, serde_json::json!({ "text": "what's the time?", "sessionId": "s1" })).await;
        assert!(model.last_prompt()[0].content.contains("Nombre del usuario: Alice"));

        post_chat(&app, serde_json::json!({ "text": "me llamo Marcos", "sessionId": "s1" })).await;
        assert!(model.last_prompt()[0].content.contains("Nombre del usuario: Marcos"));
    }

    #[tokio::test]
    async fn test_context_window_is_bounded() {
        let model = FakeModel::replying("ok");
        let app = router(memory_state(model.clone(), 100));

        for i in 0..8 {
            post_chat(&app, serde_json::json!({ "text": format!("msg {}", i), "sessionId": "s1" })).await;
        }

        let prompt = model.last_prompt();
        assert_eq!(prompt.len(), 1 + RelaySettings::default().context_turns);
        assert_eq!(prompt.last().unwrap().content, "msg 7");
    }

    #[tokio::test]
    async fn test_model_failure_is_server_error() {
        let model = FakeModel::failing("upstream exploded");
        let state = memory_state(model, 3);
        let hook = Arc::new(CountingHook::default());
        state.hooks.register(hook.clone()).await;
        let app = router(state);

        let (status, json) = post_chat(&app, serde_json::json!({ "text": "hello" })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("upstream exploded"));
        assert_eq!(hook.failures.load(Ordering::SeqCst), 1);
        assert_eq!(hook.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_store_outage_degrades_to_stateless() {
        let model = FakeModel::replying("Hi.");
        let app = router(state_with(Arc::new(DownStore), model.clone(), None, 1));

        for _ in 0..3 {
            let (status, json) = post_chat(&app, serde_json::json!({ "text": "hello", "sessionId": "s1" })).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["paywall"], false);
            assert_eq!(json["usedToday"], 0);
        }

        let prompt = model.last_prompt();
        assert_eq!(prompt.len(), 2);
        assert_eq!(prompt[1].content, "hello");

        let (_, health) = get_json(&app, "/health").await;
        assert_eq!(health["ok"], true);
        assert_eq!(health["storeConnected"], false);
    }

    #[tokio::test]
    async fn test_fact_lookup_bypasses_model() {
        let model = FakeModel::replying("model answer");
        let facts = Arc::new(FakeFacts {
            outcome: Outcome::Success("José Raúl Mulino".to_string()),
            calls: Mutex::new(Vec::new()),
        });
        let app = router(state_with(Arc::new(MemoryStore::open()), model.clone(), Some(facts.clone()), 3));

        let (status, json) = post_chat(&app, serde_json::json!({ "text": "quien es el presidente de panama" })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["reply"], "El presidente de Panamá es José Raúl Mulino.");
        assert_eq!(json["source"], "facts");
        assert_eq!(json["usedToday"], 1);
        assert_eq!(model.call_count(), 0);
        assert_eq!(facts.calls.lock().unwrap()[0], ("Q804".to_string(), Language::Es));
    }

    #[tokio::test]
    async fn test_fact_lookup_failure_falls_back_to_model() {
        for outcome in [
            Outcome::Unavailable("no result".to_string()),
            Outcome::Error("timeout".to_string()),
        ] {
            let model = FakeModel::replying("Creo que es X.");
            let facts = Arc::new(FakeFacts {
                outcome,
                calls: Mutex::new(Vec::new()),
            });
            let app = router(state_with(Arc::new(MemoryStore::open()), model.clone(), Some(facts), 3));

            let (_, json) = post_chat(&app, serde_json::json!({ "text": "quien es el presidente de panama" })).await;
            assert_eq!(json["reply"], "Creo que es X.");
            assert_eq!(json["source"], "model");
            assert_eq!(model.call_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_disabled_fact_lookup_uses_model() {
        let model = FakeModel::replying("model answer");
        let app = router(memory_state(model.clone(), 3));
        let (_, json) = post_chat(&app, serde_json::json!({ "text": "who is the president of mexico?" })).await;
        assert_eq!(json["source"], "model");
        assert_eq!(model.call_count(), 1);
    }

    #[tokio::test]
    async fn test_exchange_hooks_see_paywall() {
        let state = memory_state(FakeModel::replying("ok"), 0);
        let hook = Arc::new(CountingHook::default());
        state.hooks.register(hook.clone()).await;
        let app = router(state);

        let (_, json) = post_chat(&app, serde_json::json!({ "text": "hello" })).await;
        assert_eq!(json["paywall"], true);
        assert_eq!(hook.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_server_start_and_stop() {
        let mut server = RelayServer::new(memory_state(FakeModel::replying("ok"), 3));
        let addr = server.start(SocketAddr::from(([127, 0, 0, 1], 0))).await.unwrap();
        assert!(server.start(addr).await.is_err());

        let health: serde_json::Value = reqwest::get(format!("http://{}/health", addr))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(health["ok"], true);

        server.stop().await.unwrap();
        assert!(reqwest::get(format!("http://{}/health", addr)).await.is_err());
    }
}
