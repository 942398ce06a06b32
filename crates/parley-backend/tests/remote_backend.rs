//! Drives `RemoteBackend` against a small axum stand-in for the hosted
//! service: token grants, sign-up, logout, PostgREST rows and the realtime
//! socket.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::{Value, json};
use tokio::sync::mpsc;

use parley_backend::{Backend, BackendError, RemoteBackend, RemoteConfig};
use parley_types::{NewMessage, SessionEvent, SessionEventKind};

#[derive(Clone, Default)]
struct Fake {
    rows: Arc<Mutex<Vec<Value>>>,
    inserts: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
    logouts: Arc<Mutex<Vec<String>>>,
    frames: Option<mpsc::UnboundedSender<Value>>,
    /// Lifetime of tokens from the password grant; 3600 when unset.
    expires_in: Option<i64>,
    reject_refresh: bool,
}

fn token_body(access: &str, refresh: &str, expires_in: i64, email: &Value) -> Value {
    json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": expires_in,
        "refresh_token": refresh,
        "user": { "id": "u1", "email": email }
    })
}

async fn token(
    State(fake): State<Fake>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    match params.get("grant_type").map(String::as_str) {
        Some("password") if body["password"] == "pw" => (
            StatusCode::OK,
            Json(token_body(
                "access-1",
                "refresh-1",
                fake.expires_in.unwrap_or(3600),
                &body["email"],
            )),
        ),
        Some("refresh_token") if !fake.reject_refresh && body["refresh_token"] == "refresh-1" => (
            StatusCode::OK,
            Json(token_body("access-2", "refresh-2", 3600, &json!("alice@x.com"))),
        ),
        Some("refresh_token") => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "Invalid Refresh Token"})),
        ),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid_grant", "error_description": "Invalid login credentials"})),
        ),
    }
}

async fn signup(Json(body): Json<Value>) -> Json<Value> {
    let email = body["email"].as_str().unwrap_or_default();
    if email.starts_with("pending") {
        Json(json!({"id": "u9", "email": email, "confirmation_sent_at": "2024-05-01T10:00:00Z"}))
    } else {
        Json(token_body("access-new", "refresh-new", 3600, &body["email"]))
    }
}

async fn logout(State(fake): State<Fake>, headers: HeaderMap) -> StatusCode {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    fake.logouts.lock().unwrap().push(auth);
    StatusCode::NO_CONTENT
}

async fn list_messages(
    State(fake): State<Fake>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    assert_eq!(params.get("order").map(String::as_str), Some("created_at.asc"));
    Json(Value::Array(fake.rows.lock().unwrap().clone()))
}

async fn insert_messages(
    State(fake): State<Fake>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    fake.inserts.lock().unwrap().push((headers, body));
    StatusCode::CREATED
}

async fn realtime(State(fake): State<Fake>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| realtime_session(socket, fake))
}

async fn realtime_session(mut socket: WebSocket, fake: Fake) {
    while let Some(Ok(msg)) = socket.recv().await {
        let WsMessage::Text(text) = msg else { continue };
        let frame: Value = serde_json::from_str(text.as_str()).unwrap();
        if let Some(frames) = &fake.frames {
            let _ = frames.send(frame.clone());
        }

        if frame["event"] == "phx_join" {
            let reply = json!({
                "topic": frame["topic"],
                "event": "phx_reply",
                "payload": {"status": "ok", "response": {}},
                "ref": frame["ref"],
            });
            socket.send(WsMessage::Text(reply.to_string().into())).await.unwrap();

            // Noise the client has to skip before the real row.
            socket.send(WsMessage::Text("{not json".into())).await.unwrap();
            let broken = json!({
                "topic": frame["topic"],
                "event": "postgres_changes",
                "payload": {"data": {"type": "INSERT", "record": {"id": "m-broken"}}},
                "ref": null,
            });
            socket.send(WsMessage::Text(broken.to_string().into())).await.unwrap();

            let push = json!({
                "topic": frame["topic"],
                "event": "postgres_changes",
                "payload": {"data": {
                    "type": "INSERT",
                    "schema": "public",
                    "table": "messages",
                    "record": {
                        "id": "m2",
                        "content": "hi",
                        "username": "alice",
                        "created_at": "2024-05-01T10:00:02+00:00",
                        "user_id": "u1"
                    }
                }},
                "ref": null,
            });
            socket.send(WsMessage::Text(push.to_string().into())).await.unwrap();
        }
    }
}

async fn serve(fake: Fake) -> String {
    let app = Router::new()
        .route("/auth/v1/token", post(token))
        .route("/auth/v1/signup", post(signup))
        .route("/auth/v1/logout", post(logout))
        .route("/rest/v1/messages", get(list_messages).post(insert_messages))
        .route("/realtime/v1/websocket", get(realtime))
        .with_state(fake);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn backend(url: &str) -> RemoteBackend {
    RemoteBackend::new(RemoteConfig::new(url, "anon-key").unwrap())
}

#[tokio::test]
async fn sign_in_query_and_insert_use_session_token() {
    let fake = Fake::default();
    fake.rows.lock().unwrap().extend([
        json!({"id": "m1", "content": "first", "username": "bob", "created_at": "2024-05-01T10:00:00+00:00", "user_id": "u2"}),
        json!({"id": "m2", "content": "second", "username": "alice", "created_at": "2024-05-01T10:00:01+00:00", "user_id": "u1"}),
    ]);
    let url = serve(fake.clone()).await;
    let backend = backend(&url);
    let mut events = backend.on_session_change();

    let session = backend.sign_in("alice@x.com", "pw").await.unwrap();
    assert_eq!(session.user_id(), "u1");
    assert_eq!(session.username(), "alice");
    assert_eq!(events.recv().await.unwrap().kind, SessionEventKind::SignedIn);
    assert_eq!(backend.current_session().await.unwrap(), Some(session));

    let messages = backend.query_messages().await.unwrap();
    let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, ["m1", "m2"]);

    backend
        .insert_message(NewMessage {
            content: "hello".into(),
            user_id: "u1".into(),
            username: "alice".into(),
        })
        .await
        .unwrap();

    let inserts = fake.inserts.lock().unwrap();
    let (headers, body) = &inserts[0];
    assert_eq!(headers["authorization"], "Bearer access-1");
    assert_eq!(headers["apikey"], "anon-key");
    assert_eq!(headers["prefer"], "return=minimal");
    assert_eq!(body, &json!([{"content": "hello", "user_id": "u1", "username": "alice"}]));
}

#[tokio::test]
async fn bad_password_maps_to_invalid_credentials() {
    let url = serve(Fake::default()).await;
    let backend = backend(&url);

    let err = backend.sign_in("alice@x.com", "wrong").await.unwrap_err();
    assert!(matches!(err, BackendError::InvalidCredentials), "got {err:?}");
    assert_eq!(backend.current_session().await.unwrap(), None);
}

#[tokio::test]
async fn sign_out_revokes_and_announces() {
    let fake = Fake::default();
    let url = serve(fake.clone()).await;
    let backend = backend(&url);
    backend.sign_in("alice@x.com", "pw").await.unwrap();

    let mut events = backend.on_session_change();
    backend.sign_out().await.unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, SessionEventKind::SignedOut);
    assert_eq!(event.session, None);
    assert_eq!(backend.current_session().await.unwrap(), None);
    assert_eq!(fake.logouts.lock().unwrap().as_slice(), ["Bearer access-1"]);
}

async fn next_event(events: &mut parley_backend::Subscription<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("session event in time")
        .expect("session stream open")
}

/// First frame the client sent with the given event name.
async fn frame_with_event(frames: &mut mpsc::UnboundedReceiver<Value>, event: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = frames.recv().await.unwrap();
            if frame["event"] == event {
                return frame;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{event} frame in time"))
}

#[tokio::test]
async fn expiring_token_is_refreshed() {
    let fake = Fake {
        expires_in: Some(1),
        ..Fake::default()
    };
    let url = serve(fake).await;
    let backend = backend(&url);
    let mut events = backend.on_session_change();

    backend.sign_in("alice@x.com", "pw").await.unwrap();
    assert_eq!(next_event(&mut events).await.kind, SessionEventKind::SignedIn);

    let refreshed = next_event(&mut events).await;
    assert_eq!(refreshed.kind, SessionEventKind::TokenRefreshed);
    let session = refreshed.session.expect("refreshed session");
    assert_eq!(session.access_token, "access-2");
    assert_eq!(session.user_id(), "u1");
    assert_eq!(backend.current_session().await.unwrap(), Some(session));
}

#[tokio::test]
async fn failed_refresh_signs_out() {
    let fake = Fake {
        expires_in: Some(1),
        reject_refresh: true,
        ..Fake::default()
    };
    let url = serve(fake).await;
    let backend = backend(&url);
    let mut events = backend.on_session_change();

    backend.sign_in("alice@x.com", "pw").await.unwrap();
    assert_eq!(next_event(&mut events).await.kind, SessionEventKind::SignedIn);

    let event = next_event(&mut events).await;
    assert_eq!(event, SessionEvent::signed_out());
    assert_eq!(backend.current_session().await.unwrap(), None);
}

#[tokio::test]
async fn sign_up_signs_in_when_no_confirmation_is_needed() {
    let url = serve(Fake::default()).await;
    let backend = backend(&url);
    let mut events = backend.on_session_change();

    let session = backend
        .sign_up("carol@z.net", "pw")
        .await
        .unwrap()
        .expect("immediate session");
    assert_eq!(session.access_token, "access-new");
    assert_eq!(session.username(), "carol");

    let event = next_event(&mut events).await;
    assert_eq!(event, SessionEvent::signed_in(session.clone()));
    assert_eq!(backend.current_session().await.unwrap(), Some(session));
}

#[tokio::test]
async fn pending_sign_up_stays_signed_out() {
    let url = serve(Fake::default()).await;
    let backend = backend(&url);
    let mut events = backend.on_session_change();

    assert_eq!(backend.sign_up("pending@z.net", "pw").await.unwrap(), None);
    assert_eq!(backend.current_session().await.unwrap(), None);
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn open_feed_receives_fresh_tokens() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let fake = Fake {
        frames: Some(frames_tx),
        expires_in: Some(1),
        ..Fake::default()
    };
    let url = serve(fake).await;
    let backend = backend(&url);
    let mut events = backend.on_session_change();

    let mut feed = backend.subscribe_inserts();
    tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("insert event in time")
        .expect("feed open");
    let join = frame_with_event(&mut frames_rx, "phx_join").await;
    assert_eq!(join["payload"]["access_token"], "anon-key");

    backend.sign_in("alice@x.com", "pw").await.unwrap();
    assert_eq!(next_event(&mut events).await.kind, SessionEventKind::SignedIn);
    assert_eq!(next_event(&mut events).await.kind, SessionEventKind::TokenRefreshed);

    let push = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let frame = frame_with_event(&mut frames_rx, "access_token").await;
            if frame["payload"]["access_token"] == "access-2" {
                return frame;
            }
        }
    })
    .await
    .expect("refreshed token pushed in time");
    assert_eq!(push["topic"], "realtime:public:messages");
}

#[tokio::test]
async fn close_waits_for_the_feed_to_leave() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let fake = Fake {
        frames: Some(frames_tx),
        ..Fake::default()
    };
    let url = serve(fake).await;
    let backend = backend(&url);

    let mut feed = backend.subscribe_inserts();
    tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("insert event in time")
        .expect("feed open");

    tokio::time::timeout(Duration::from_secs(5), backend.close())
        .await
        .expect("close in time");
    // The feed task is gone, so its sender is too.
    assert_eq!(feed.recv().await, None);

    let leave = frame_with_event(&mut frames_rx, "phx_leave").await;
    assert_eq!(leave["topic"], "realtime:public:messages");
}

#[tokio::test]
async fn insert_feed_skips_bad_frames_and_leaves_on_release() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let fake = Fake {
        frames: Some(frames_tx),
        ..Fake::default()
    };
    let url = serve(fake).await;
    let backend = backend(&url);

    let mut feed = backend.subscribe_inserts();
    let message = tokio::time::timeout(Duration::from_secs(5), feed.recv())
        .await
        .expect("insert event in time")
        .expect("feed open");
    assert_eq!(message.id, "m2");
    assert_eq!(message.content, "hi");

    let join = frames_rx.recv().await.unwrap();
    assert_eq!(join["event"], "phx_join");
    assert_eq!(join["topic"], "realtime:public:messages");
    assert_eq!(join["payload"]["access_token"], "anon-key");

    // Neither the garbage text nor the broken record reached the stream.
    assert!(feed.try_recv().is_none());

    feed.unsubscribe();
    let leave = frame_with_event(&mut frames_rx, "phx_leave").await;
    assert_eq!(leave["topic"], "realtime:public:messages");
}
