//! Pipeline Web Server
//!
//! Axum-based server exposing the board, its analytics and live updates.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod websocket;

use axum::{
    middleware,
    routing::{get, patch, post},
    Router,
};
use pipeline_core::board::{BoardController, BoardModel};
use pipeline_core::notify::BroadcastChangeFeed;
use pipeline_core::PipelineConfig;
use pipeline_redis::{RedisCardStore, RedisPreferenceStore};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use state::{AppState, RedisSessions};

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Board
        .route("/board", get(routes::board::get_board))
        .route("/board/refresh", post(routes::board::refresh_board))
        .route("/cards/{id}/move", patch(routes::board::move_card))
        // Analytics
        .route("/analytics/stages", get(routes::analytics::stage_totals))
        .route("/analytics/win-loss", get(routes::analytics::win_loss))
        // Session
        .route("/preferences", get(routes::preferences::get_preferences))
        .route("/session", get(routes::session::current_session))
        .route("/session/sign-out", post(routes::session::sign_out))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_session,
        ))
        .with_state(state.clone());

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(websocket::ws_handler))
        .route("/internal/notify", post(routes::internal::notify))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Run the web server against Redis.
pub async fn run_server(config: PipelineConfig) -> anyhow::Result<()> {
    let pool = pipeline_redis::init_pool(&config.redis_url).await?;
    let feed = BroadcastChangeFeed::new();

    let store = Arc::new(RedisCardStore::new(pool.clone(), feed.clone()));
    let board = BoardController::new(BoardModel::new(config.board.stages.clone()), store)
        .with_write_timeout(config.write_timeout());
    board.refresh().await?;

    let preferences = Arc::new(RedisPreferenceStore::new(pool.clone(), feed.clone()));
    let sessions = Arc::new(RedisSessions::new(pool));
    let state = AppState::new(board, preferences, sessions, feed, &config);
    let _relays = state.start_relays();

    let app = create_router(state);
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Web server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use axum::extract::ws::Message;
    use chrono::{Duration, Utc};
    use futures::channel::mpsc;
    use futures::StreamExt;
    use pipeline_core::board::{default_stages, Card, DealType};
    use pipeline_core::memory::{
        InMemoryAuthService, InMemoryCardStore, InMemoryLocalStorage, InMemoryPreferenceStore,
    };
    use pipeline_core::service::{AuthEvent, AuthService, AuthSession, LocalStorage};
    use pipeline_core::notifier;
    use pipeline_core::session::SESSION_START_KEY;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tower::ServiceExt;

    use crate::state::{SessionServices, WebSocketMessage};

    #[derive(Default)]
    struct TestSessions {
        auth: Mutex<HashMap<String, Arc<InMemoryAuthService>>>,
        storage: Mutex<HashMap<String, Arc<InMemoryLocalStorage>>>,
    }

    impl TestSessions {
        fn sign_in(&self, token: &str, user_id: &str) -> Arc<InMemoryAuthService> {
            let auth = Arc::new(InMemoryAuthService::new(Some(AuthSession {
                user_id: user_id.to_string(),
                email: None,
                issued_at: Utc::now(),
            })));
            self.auth.lock().unwrap().insert(token.to_string(), auth.clone());
            auth
        }

        fn local(&self, token: &str) -> Arc<InMemoryLocalStorage> {
            self.storage
                .lock()
                .unwrap()
                .entry(token.to_string())
                .or_default()
                .clone()
        }
    }

    impl SessionServices for TestSessions {
        fn auth(&self, token: &str) -> Arc<dyn AuthService> {
            self.auth
                .lock()
                .unwrap()
                .entry(token.to_string())
                .or_insert_with(|| Arc::new(InMemoryAuthService::new(None)))
                .clone()
        }

        fn storage(&self, token: &str) -> Arc<dyn LocalStorage> {
            self.local(token)
        }
    }

    struct Harness {
        state: AppState,
        store: Arc<InMemoryCardStore>,
        sessions: Arc<TestSessions>,
    }

    fn card(id: &str, stage: &str, position: u32, value: f64, probability: u8) -> Card {
        Card {
            id: id.to_string(),
            name: format!("Deal {}", id),
            deal_type: DealType::Pilot,
            value,
            probability,
            stage: stage.to_string(),
            contact_name: None,
            company: Some("Northwind".to_string()),
            days_in_stage: 1,
            position,
        }
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryCardStore::new(vec![
            card("c1", "lead", 0, 10_000.0, 20),
            card("c2", "lead", 1, 50_000.0, 50),
            card("c3", "won", 0, 30_000.0, 100),
            card("c4", "lost", 0, 8_000.0, 0),
        ]));
        let config = PipelineConfig::default();
        let board = BoardController::new(BoardModel::new(default_stages()), store.clone());
        board.refresh().await.unwrap();

        let sessions = Arc::new(TestSessions::default());
        sessions.sign_in("t1", "partner-1");
        let state = AppState::new(
            board,
            Arc::new(InMemoryPreferenceStore::new()),
            sessions.clone(),
            BroadcastChangeFeed::new(),
            &config,
        );
        Harness {
            state,
            store,
            sessions,
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("x-session-id", "t1")
            .body(Body::empty())
            .unwrap()
    }

    fn patch_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("PATCH")
            .uri(uri)
            .header("x-session-id", "t1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_missing_session_is_401_with_redirect() {
        let h = harness().await;
        let request = Request::builder()
            .uri("/api/board")
            .body(Body::empty())
            .unwrap();
        let response = create_router(h.state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["redirect_to"], "/login");
    }

    #[tokio::test]
    async fn test_browser_without_session_is_redirected() {
        let h = harness().await;
        let request = Request::builder()
            .uri("/api/board")
            .header(header::ACCEPT, "text/html")
            .body(Body::empty())
            .unwrap();
        let response = create_router(h.state).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/login");
    }

    #[tokio::test]
    async fn test_expired_session_signs_out() {
        let h = harness().await;
        let nine_hours_ago = (Utc::now() - Duration::hours(9)).timestamp_millis();
        h.sessions
            .local("t1")
            .set(SESSION_START_KEY, &nine_hours_ago.to_string())
            .await
            .unwrap();
        let auth = h.sessions.auth.lock().unwrap()["t1"].clone();

        let response = create_router(h.state).oneshot(get("/api/board")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(auth.sign_out_count(), 1);
        assert_eq!(h.sessions.local("t1").get(SESSION_START_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_board() {
        let h = harness().await;
        let response = create_router(h.state).oneshot(get("/api/board")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        let lead = &body["columns"][0];
        assert_eq!(lead["id"], "lead");
        assert_eq!(lead["card_ids"], serde_json::json!(["c1", "c2"]));
    }

    #[tokio::test]
    async fn test_move_card_waits_for_confirmation() {
        let h = harness().await;
        let app = create_router(h.state.clone());

        let response = app
            .oneshot(patch_json(
                "/api/cards/c2/move",
                serde_json::json!({ "stage_id": "proposal", "index": 0, "wait": true }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "confirmed");
        assert_eq!(h.store.stage_of("c2").await.as_deref(), Some("proposal"));

        let snapshot = h.state.board.snapshot().await;
        assert_eq!(snapshot.column("proposal").unwrap().card_ids, vec!["c2"]);
    }

    #[tokio::test]
    async fn test_move_unknown_card_is_400() {
        let h = harness().await;
        let response = create_router(h.state)
            .oneshot(patch_json(
                "/api/cards/nope/move",
                serde_json::json!({ "stage_id": "won", "index": 0 }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_is_rolled_back() {
        let h = harness().await;
        h.store.fail_writes(true);
        let before = h.state.board.snapshot().await;

        let response = create_router(h.state.clone())
            .oneshot(patch_json(
                "/api/cards/c1/move",
                serde_json::json!({ "stage_id": "won", "index": 0, "wait": true }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(h.state.board.snapshot().await, before);
    }

    #[tokio::test]
    async fn test_win_loss_endpoint() {
        let h = harness().await;
        let response = create_router(h.state)
            .oneshot(get("/api/analytics/win-loss"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["won"], 1);
        assert_eq!(body["closed"], 2);
        assert_eq!(body["overall_win_rate"], 50);
    }

    #[tokio::test]
    async fn test_stage_totals_endpoint() {
        let h = harness().await;
        let response = create_router(h.state)
            .oneshot(get("/api/analytics/stages"))
            .await
            .unwrap();

        let body = json_body(response).await;
        assert_eq!(body[0]["stage_id"], "lead");
        assert_eq!(body[0]["count"], 2);
        assert_eq!(body[0]["weighted_value"], 27_000.0);
    }

    #[tokio::test]
    async fn test_preferences_default_when_missing() {
        let h = harness().await;
        let response = create_router(h.state)
            .oneshot(get("/api/preferences"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["loading"], false);
        assert_eq!(body["preferences"]["items_per_page"], 25);
        assert_eq!(body["preferences"]["date_format"], "dd MMM yyyy");
    }

    #[tokio::test]
    async fn test_sign_out_ends_session() {
        let h = harness().await;
        let app = create_router(h.state);
        let request = Request::builder()
            .method("POST")
            .uri("/api/session/sign-out")
            .header("x-session-id", "t1")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.oneshot(get("/api/session")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    fn notify_request(body: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/internal/notify")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(routes::internal::NOTIFY_TOKEN_HEADER, token);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_internal_notify_refuses_session_messages() {
        let h = harness().await;
        let mut rx = h.state.tx.subscribe();
        let app = create_router(h.state.clone());

        let signed_out = r#"{"type":"SignedOut","data":{"redirect_to":"https://elsewhere.test/login"}}"#;
        let response = app.clone().oneshot(notify_request(signed_out, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let confirmed = r#"{"type":"MoveConfirmed","data":{"card_id":"c1"}}"#;
        let response = app.oneshot(notify_request(confirmed, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn test_internal_notify_checks_token() {
        let mut h = harness().await;
        h.state.notify_token = Some("s3cret".to_string());
        let app = create_router(h.state);
        let refresh = r#"{"type":"BoardRefresh"}"#;

        let response = app.clone().oneshot(notify_request(refresh, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(notify_request(refresh, Some("guess")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(notify_request(refresh, Some("s3cret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_notifier_payloads_are_accepted() {
        let h = harness().await;
        let _relays = h.state.start_relays();
        let mut rx = h.state.tx.subscribe();
        let app = create_router(h.state);

        let prefs = notifier::preferences_changed_payload("partner-1").to_string();
        let response = app.clone().oneshot(notify_request(&prefs, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            rx.recv().await.unwrap(),
            WebSocketMessage::PreferencesChanged {
                user_id: Some("partner-1".to_string())
            }
        );

        let refresh = notifier::board_refresh_payload().to_string();
        let response = app.oneshot(notify_request(&refresh, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(rx.recv().await.unwrap(), WebSocketMessage::BoardRefresh);
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while !done() {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_socket_close_releases_subscriptions() {
        let h = harness().await;
        let auth = h.sessions.auth.lock().unwrap()["t1"].clone();
        let (guard, current) = auth::authorize(&h.state, Some("t1".to_string()), false)
            .await
            .unwrap();
        assert_eq!(auth.listener_count(), 1);

        let (to_client, mut from_server) = mpsc::unbounded::<Message>();
        let (to_server, from_client) = mpsc::unbounded::<Result<Message, axum::Error>>();
        let socket = tokio::spawn(websocket::pump(
            to_client,
            from_client,
            h.state.clone(),
            guard,
            current.session.user_id,
        ));

        wait_until(|| h.state.tx.receiver_count() == 1).await;
        h.state.broadcast(WebSocketMessage::BoardRefresh);
        let forwarded = from_server.next().await.unwrap();
        assert!(matches!(forwarded, Message::Text(ref t) if t.as_str().contains("BoardRefresh")));

        to_server.unbounded_send(Ok(Message::Close(None))).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), socket)
            .await
            .unwrap()
            .unwrap();

        wait_until(|| auth.listener_count() == 0 && h.state.tx.receiver_count() == 0).await;
    }

    #[tokio::test]
    async fn test_socket_sign_out_closes_and_releases() {
        let h = harness().await;
        let auth = h.sessions.auth.lock().unwrap()["t1"].clone();
        let (guard, current) = auth::authorize(&h.state, Some("t1".to_string()), false)
            .await
            .unwrap();

        let (to_client, mut from_server) = mpsc::unbounded::<Message>();
        let (_to_server, from_client) = mpsc::unbounded::<Result<Message, axum::Error>>();
        let socket = tokio::spawn(websocket::pump(
            to_client,
            from_client,
            h.state.clone(),
            guard,
            current.session.user_id,
        ));

        auth.push(AuthEvent::SignedOut).await;
        let notice = from_server.next().await.unwrap();
        assert!(matches!(notice, Message::Text(ref t) if t.as_str().contains("SignedOut")));
        assert!(matches!(from_server.next().await, Some(Message::Close(None))));

        tokio::time::timeout(std::time::Duration::from_secs(2), socket)
            .await
            .unwrap()
            .unwrap();
        wait_until(|| auth.listener_count() == 0 && h.state.tx.receiver_count() == 0).await;
    }

    #[tokio::test]
    async fn test_external_card_change_refreshes_board() {
        let h = harness().await;
        let _relays = h.state.start_relays();
        let mut rx = h.state.tx.subscribe();

        h.store.insert(card("c5", "qualified", 0, 1_000.0, 30)).await;
        let request = Request::builder()
            .method("POST")
            .uri("/internal/notify")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"type":"BoardRefresh"}"#))
            .unwrap();
        create_router(h.state.clone()).oneshot(request).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), WebSocketMessage::BoardRefresh);
        let snapshot = h.state.board.snapshot().await;
        assert_eq!(snapshot.column("qualified").unwrap().card_ids, vec!["c5"]);
    }
}
