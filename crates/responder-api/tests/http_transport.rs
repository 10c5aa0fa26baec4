use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::{header::AUTHORIZATION, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use chat_sync::{
    AlwaysForeground, ChatSyncEngine, MessageTransport, SendRequest, Sender, StaticUserProvider,
    SyncConfig, TransportError, User,
};
use responder_api::ResponderApiClient;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const TOKEN: &str = "test-token";

#[derive(Clone, Default)]
struct Backend {
    posted: Arc<Mutex<Vec<(String, Value)>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) == Some("Bearer test-token")
}

async fn list_messages(Path(task_id): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "missing bearer token").into_response();
    }
    match task_id.as_str() {
        "broken" => (StatusCode::OK, "<html>maintenance</html>").into_response(),
        "closed" => (
            StatusCode::FORBIDDEN,
            Json(json!({ "success": false, "message": "Task is closed" })),
        )
            .into_response(),
        _ => Json(json!({
            "success": true,
            "data": [
                {
                    "id": 2,
                    "message": "on my way",
                    "sender_type": "responder",
                    "created_at": "2024-05-01T10:05:00Z"
                },
                {
                    "id": "1",
                    "message": "where are you?",
                    "sender_type": "client",
                    "created_at": "2024-05-01T10:00:00Z",
                    "file_urls": ["https://files.example/map.png"]
                }
            ]
        }))
        .into_response(),
    }
}

async fn post_message(
    State(backend): State<Backend>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    backend
        .posted
        .lock()
        .unwrap()
        .push((task_id, body.clone()));
    Json(json!({
        "success": true,
        "data": {
            "id": 99,
            "message": body["message"],
            "sender_type": body["sender_type"],
            "created_at": "2024-05-01T10:10:00Z",
            "file_urls": body["file_urls"]
        }
    }))
    .into_response()
}

async fn delete_message(Path(message_id): Path<String>) -> Response {
    match message_id.as_str() {
        "locked" => (
            StatusCode::FORBIDDEN,
            Json(json!({ "success": false, "message": "Message can no longer be deleted" })),
        )
            .into_response(),
        "boom" => (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response(),
        _ => Json(json!({ "success": true, "data": { "deleted": message_id } })).into_response(),
    }
}

async fn spawn_backend() -> (String, Backend) {
    let backend = Backend::default();
    let router = Router::new()
        .route(
            "/api/tasks/:task_id/messages",
            get(list_messages).post(post_message),
        )
        .route("/api/messages/:message_id", delete(delete_message))
        .with_state(backend.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    (format!("http://{addr}/api"), backend)
}

#[tokio::test]
async fn lists_messages_with_bearer_auth() {
    let (base, _) = spawn_backend().await;
    let client = ResponderApiClient::new(&base, TOKEN).expect("client");

    let response = client.list_messages("task-1").await.expect("list");

    assert!(response.success);
    let records = response.data.expect("data");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "2");
    assert_eq!(records[1].id, "1");
    assert_eq!(
        records[1].file_urls.as_deref(),
        Some(&["https://files.example/map.png".to_string()][..])
    );
}

#[tokio::test]
async fn posts_message_body_in_wire_shape() {
    let (base, backend) = spawn_backend().await;
    let client = ResponderApiClient::new(&base, TOKEN).expect("client");

    let response = client
        .send(SendRequest {
            conversation_id: "task-1".into(),
            text: "be there in 5".into(),
            file_urls: vec!["https://files.example/eta.png".into()],
            sender_marker: "responder".into(),
        })
        .await
        .expect("send");

    assert_eq!(response.data.expect("data").id, "99");
    let posted = backend.posted.lock().unwrap().clone();
    assert_eq!(
        posted,
        vec![(
            "task-1".to_string(),
            json!({
                "message": "be there in 5",
                "file_urls": ["https://files.example/eta.png"],
                "sender_type": "responder"
            })
        )]
    );
}

#[tokio::test]
async fn refusal_envelopes_survive_error_statuses() {
    let (base, _) = spawn_backend().await;
    let client = ResponderApiClient::new(&base, TOKEN).expect("client");

    let listed = client.list_messages("closed").await.expect("envelope");
    assert!(!listed.success);
    assert_eq!(listed.message.as_deref(), Some("Task is closed"));

    let deleted = client.delete("locked").await.expect("envelope");
    assert!(!deleted.success);
    assert_eq!(
        deleted.message.as_deref(),
        Some("Message can no longer be deleted")
    );

    let ok = client.delete("7").await.expect("delete");
    assert!(ok.success);
}

#[tokio::test]
async fn non_envelope_failures_become_transport_errors() {
    let (base, _) = spawn_backend().await;

    let client = ResponderApiClient::new(&base, TOKEN).expect("client");
    match client.delete("boom").await {
        Err(TransportError::UnexpectedStatus { status, body }) => {
            assert_eq!(status, 500);
            assert_eq!(body, "upstream exploded");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(matches!(
        client.list_messages("broken").await,
        Err(TransportError::Decode(_))
    ));

    let anonymous = ResponderApiClient::new(&base, "wrong").expect("client");
    assert!(matches!(
        anonymous.list_messages("task-1").await,
        Err(TransportError::UnexpectedStatus { status: 401, .. })
    ));
}

#[tokio::test]
async fn unreachable_server_is_a_network_error() {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let client = ResponderApiClient::new(format!("http://{addr}"), TOKEN).expect("client");
    assert!(matches!(
        client.list_messages("task-1").await,
        Err(TransportError::Network(_))
    ));
}

#[tokio::test]
async fn engine_syncs_over_http() {
    let (base, backend) = spawn_backend().await;
    let client = ResponderApiClient::new(&base, TOKEN).expect("client");
    let engine = ChatSyncEngine::new(
        Arc::new(client),
        Arc::new(AlwaysForeground::new()),
        Arc::new(StaticUserProvider::new(Some(User {
            id: "resp-1".into(),
            display_name: "Sam".into(),
            avatar_url: None,
        }))),
        SyncConfig::default(),
    );

    engine.bind(Some("task-1")).await.expect("bind");
    let ids: Vec<String> = engine
        .messages()
        .iter()
        .map(|m| m.id.to_string())
        .collect();
    assert_eq!(ids, ["1", "2"]);
    assert_eq!(engine.messages()[1].sender, Sender::Own);

    let sent = engine.send_message("copy that", &[]).await.expect("send");
    assert_eq!(sent.id.as_str(), "99");
    assert_eq!(engine.messages().len(), 3);
    assert_eq!(backend.posted.lock().unwrap().len(), 1);
}
