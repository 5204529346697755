mod common;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use common::{balance, start, suno_channel, user};
use http::{HeaderMap, StatusCode};
use serde_json::{Value, json};
use taskledger::adaptor::{FetchRequest, SunoAdaptor, TaskAdaptor};
use taskledger::core::LedgerError;
use taskledger::task::{NewTask, TaskPlatform, TaskStatus, TaskStore};
use taskledger::{AdaptorRegistry, MemoryDatabase};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Upstream {
    seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn fetch(
    State(upstream): State<Upstream>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    upstream.seen.lock().unwrap().push((auth.clone(), body.clone()));

    if auth.as_deref() != Some("Bearer sk-1") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "code": "unauthorized", "message": "bad key", "data": null })),
        );
    }

    let data: Vec<Value> = body["ids"]
        .as_array()
        .cloned()
        .unwrap_or_default()
        .into_iter()
        .map(|id| {
            json!({
                "task_id": id,
                "action": "MUSIC",
                "status": "FAILURE",
                "fail_reason": "generation failed",
                "finish_time": 1_700_000_000,
                "data": null
            })
        })
        .collect();
    (
        StatusCode::OK,
        Json(json!({ "code": "success", "message": "", "data": data })),
    )
}

async fn slow() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({ "code": "success", "data": [] }))
}

async fn spawn_upstream(upstream: Upstream) -> SocketAddr {
    let app = Router::new()
        .route("/suno/fetch", post(fetch))
        .route("/slow/suno/fetch", post(slow))
        .with_state(upstream);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn suno_fetch_posts_ids_with_bearer_key() {
    let upstream = Upstream::default();
    let addr = spawn_upstream(upstream.clone()).await;
    let adaptor = SunoAdaptor::new(Duration::from_secs(5));

    let request = FetchRequest::new(vec!["a-1".into(), "a-2".into()]);
    let response = adaptor
        .fetch_tasks(&format!("http://{addr}/"), "sk-1", &request)
        .await
        .unwrap();
    assert!(response.is_ok());

    let envelope = adaptor.parse_tasks(&response.body).unwrap();
    assert!(envelope.is_success());
    let ids: Vec<&str> = envelope.data.iter().map(|t| t.external_id.as_str()).collect();
    assert_eq!(ids, vec!["a-1", "a-2"]);
    assert_eq!(envelope.data[0].status, "FAILURE");

    let seen = upstream.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0.as_deref(), Some("Bearer sk-1"));
    assert_eq!(seen[0].1, json!({ "ids": ["a-1", "a-2"] }));
}

#[tokio::test]
async fn non_200_status_is_returned_not_raised() {
    let addr = spawn_upstream(Upstream::default()).await;
    let adaptor = SunoAdaptor::default();

    let response = adaptor
        .fetch_tasks(&format!("http://{addr}"), "wrong", &FetchRequest::new(vec![]))
        .await
        .unwrap();
    assert_eq!(response.status, 401);
    assert!(!response.is_ok());
}

#[tokio::test]
async fn client_timeout_is_a_transport_error() {
    let addr = spawn_upstream(Upstream::default()).await;
    let adaptor = SunoAdaptor::new(Duration::from_millis(100));

    let result = adaptor
        .fetch_tasks(&format!("http://{addr}/slow"), "sk-1", &FetchRequest::new(vec![]))
        .await;
    assert!(matches!(result, Err(LedgerError::Transport(_))));
}

#[tokio::test]
async fn unreachable_upstream_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let result = SunoAdaptor::new(Duration::from_secs(1))
        .fetch_tasks(&format!("http://{addr}"), "sk-1", &FetchRequest::new(vec![]))
        .await;
    assert!(matches!(result, Err(LedgerError::Transport(_))));
}

#[tokio::test]
async fn sweep_over_http_fails_and_refunds_jobs() {
    let addr = spawn_upstream(Upstream::default()).await;

    let db = MemoryDatabase::new();
    user(&db, 1, 50, 0).await;
    db.insert_channel(suno_channel(1, &format!("http://{addr}")))
        .await;
    let first = db
        .insert(
            NewTask::new(TaskPlatform::suno(), 1, 1)
                .external_id("song-1")
                .quota(120),
        )
        .await
        .unwrap();
    let second = db
        .insert(
            NewTask::new(TaskPlatform::suno(), 1, 1)
                .external_id("song-2")
                .quota(80),
        )
        .await
        .unwrap();

    let services = start(&db, AdaptorRegistry::with_builtin(Duration::from_secs(5)));
    let report = services.reconciler.sweep().await.unwrap();
    assert_eq!(report.updated, 2);
    assert_eq!(report.compensated, 2);

    for task in [&first, &second] {
        let stored = db.get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failure);
        assert_eq!(stored.fail_reason, "generation failed");
        assert_eq!(stored.finish_time, 1_700_000_000);
        assert!(stored.is_finished());
    }
    assert_eq!(balance(&db, 1).await.quota, 250);
    services.shutdown().await.unwrap();
}
