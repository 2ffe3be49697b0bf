use std::io;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{Body, to_bytes};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{Request, StatusCode};
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;
use tracing_subscriber::fmt::MakeWriter;
use uuid::Uuid;

use kindred_db::Database;
use kindred_gateway::{Gateway, GatewayConfig};
use kindred_types::api::Claims;
use kindred_types::models::UserProfile;

use crate::router;
use crate::state::{AppState, AppStateInner};

const SECRET: &str = "test-secret";

fn test_state() -> AppState {
    let db = Database::open_in_memory().expect("db");
    Arc::new(AppStateInner {
        gateway: Gateway::new(Arc::new(db), GatewayConfig::default()),
        jwt_secret: SECRET.to_string(),
    })
}

fn test_user(state: &AppState, name: &str) -> Uuid {
    let profile = UserProfile {
        id: Uuid::new_v4(),
        display_name: name.to_string(),
        photo_url: None,
        ghost_mode: false,
        last_seen_at: None,
    };
    state.gateway.store().database().upsert_user(&profile).expect("user");
    profile.id
}

fn test_token(user_id: Uuid) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time")
        .as_secs();
    let claims = Claims {
        sub: user_id,
        exp: (now + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).expect("token")
}

fn request(method: &str, uri: &str, user_id: Option<Uuid>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user_id {
        builder = builder.header(AUTHORIZATION, format!("Bearer {}", test_token(user_id)));
    }
    match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
        None => builder.body(Body::empty()).expect("request"),
    }
}

async fn call(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json")
    };
    (status, body)
}

/// Log sink for asserting on what a request logged.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("logs")).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().expect("logs").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Likes in both directions and returns the conversation id.
async fn mutual_match(app: &axum::Router, alice: Uuid, bob: Uuid) -> Uuid {
    let (status, _) = call(
        app,
        request("POST", "/swipes", Some(alice), Some(json!({ "targetUserId": bob, "action": "like" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        app,
        request("POST", "/swipes", Some(bob), Some(json!({ "targetUserId": alice, "action": "like" }))),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["newMatch"], json!(true));
    assert_eq!(body["isMutual"], json!(true));
    body["matchId"].as_str().expect("match id").parse().expect("uuid")
}

#[tokio::test]
async fn protected_routes_require_a_bearer_token() {
    let app = router(test_state());

    let (status, body) = call(&app, request("GET", "/matches", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], json!("unauthenticated"));

    let forged = Request::builder()
        .method("GET")
        .uri("/matches")
        .header(AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .expect("request");
    let (status, _) = call(&app, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn missing_and_forged_tokens_are_audited() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);
    let app = router(test_state());

    let (status, _) = call(&app, request("GET", "/matches", None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let logged = logs.contents();
    assert!(logged.contains("kindred::audit"), "{}", logged);
    assert!(logged.contains("request without bearer token"), "{}", logged);
    assert!(logged.contains("/matches"), "{}", logged);

    let forged = Request::builder()
        .method("GET")
        .uri("/swipes/exclusions")
        .header(AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .expect("request");
    let (status, _) = call(&app, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let logged = logs.contents();
    assert!(logged.contains("rejected bearer token"), "{}", logged);
    assert!(logged.contains("/swipes/exclusions"), "{}", logged);
}

#[tokio::test]
async fn malformed_requests_get_the_error_envelope() {
    let state = test_state();
    let app = router(state.clone());
    let alice = test_user(&state, "alice");

    let broken = Request::builder()
        .method("POST")
        .uri("/swipes")
        .header(AUTHORIZATION, format!("Bearer {}", test_token(alice)))
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{\"targetUserId\": "))
        .expect("request");
    let (status, body) = call(&app, broken).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("invalid_input"));

    let (status, body) = call(
        &app,
        request("POST", "/swipes", Some(alice), Some(json!({ "targetUserId": "nobody" }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("invalid_input"));

    let (status, body) = call(&app, request("GET", "/matches/not-a-uuid/messages", Some(alice), None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("invalid_input"));

    let (status, body) = call(
        &app,
        request("GET", "/swipes/exclusions?pool=astrology", Some(alice), None),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!("invalid_input"));
}

#[tokio::test]
async fn online_count_is_public() {
    let app = router(test_state());
    let (status, body) = call(&app, request("GET", "/online-count", None, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "count": 0 }));
}

#[tokio::test]
async fn reciprocal_likes_open_a_listed_conversation() {
    let state = test_state();
    let app = router(state.clone());
    let alice = test_user(&state, "alice");
    let bob = test_user(&state, "bob");

    let match_id = mutual_match(&app, alice, bob).await;

    let (status, body) = call(&app, request("GET", "/matches", Some(alice), None)).await;
    assert_eq!(status, StatusCode::OK);
    let listed = body.as_array().expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], json!(match_id));
    assert_eq!(listed[0]["otherUserId"], json!(bob));
    assert_eq!(listed[0]["pools"], json!(["dating"]));
}

#[tokio::test]
async fn retried_send_returns_the_earlier_message() {
    let state = test_state();
    let app = router(state.clone());
    let alice = test_user(&state, "alice");
    let bob = test_user(&state, "bob");
    let match_id = mutual_match(&app, alice, bob).await;
    let uri = format!("/matches/{}/messages", match_id);
    let payload = json!({ "receiverId": bob, "content": "are you free on friday?" });

    let (status, first) = call(&app, request("POST", &uri, Some(alice), Some(payload.clone()))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(first.get("duplicateOf").is_none());

    let (status, retry) = call(&app, request("POST", &uri, Some(alice), Some(payload))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(retry["duplicateOf"], json!("recent_exact"));
    assert_eq!(retry["message"]["id"], first["message"]["id"]);

    let (status, history) = call(&app, request("GET", &uri, Some(bob), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history.as_array().expect("history").len(), 1);
}

#[tokio::test]
async fn only_the_receiver_marks_read() {
    let state = test_state();
    let app = router(state.clone());
    let alice = test_user(&state, "alice");
    let bob = test_user(&state, "bob");
    let match_id = mutual_match(&app, alice, bob).await;

    let (_, sent) = call(
        &app,
        request(
            "POST",
            &format!("/matches/{}/messages", match_id),
            Some(alice),
            Some(json!({ "receiverId": bob, "content": "hello there" })),
        ),
    )
    .await;
    let message_id = sent["message"]["id"].as_str().expect("id").to_string();
    let uri = format!("/messages/{}/read", message_id);

    let (status, body) = call(&app, request("POST", &uri, Some(alice), None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"]["code"], json!("unauthorized"));

    let (status, body) = call(&app, request("POST", &uri, Some(bob), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messageId"], json!(message_id));
    assert!(body["readAt"].is_string());
}

#[tokio::test]
async fn outsiders_cannot_read_history() {
    let state = test_state();
    let app = router(state.clone());
    let alice = test_user(&state, "alice");
    let bob = test_user(&state, "bob");
    let mallory = test_user(&state, "mallory");
    let match_id = mutual_match(&app, alice, bob).await;

    let (status, _) = call(
        &app,
        request("GET", &format!("/matches/{}/messages", match_id), Some(mallory), None),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(
        &app,
        request("GET", &format!("/matches/{}/messages", Uuid::new_v4()), Some(alice), None),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("not_found"));
}

#[tokio::test]
async fn unmatch_removes_the_conversation_from_the_list() {
    let state = test_state();
    let app = router(state.clone());
    let alice = test_user(&state, "alice");
    let bob = test_user(&state, "bob");
    let match_id = mutual_match(&app, alice, bob).await;

    let (status, _) = call(&app, request("DELETE", &format!("/matches/{}", match_id), Some(bob), None)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, body) = call(&app, request("GET", "/matches", Some(alice), None)).await;
    assert!(body.as_array().expect("list").is_empty());

    // Unmatching replaces the conversation, so the old id is gone.
    let (status, body) = call(
        &app,
        request(
            "POST",
            &format!("/matches/{}/messages", match_id),
            Some(alice),
            Some(json!({ "receiverId": bob, "content": "wait" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!("not_found"));

    let (status, _) = call(
        &app,
        request("POST", "/matches/direct", Some(alice), Some(json!({ "targetUserId": bob }))),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn ghost_mode_needs_a_known_user() {
    let state = test_state();
    let app = router(state.clone());
    let alice = test_user(&state, "alice");

    let (status, _) = call(
        &app,
        request("PUT", "/me/ghost-mode", Some(alice), Some(json!({ "enabled": true }))),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(
        &app,
        request("PUT", "/me/ghost-mode", Some(Uuid::new_v4()), Some(json!({ "enabled": true }))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
