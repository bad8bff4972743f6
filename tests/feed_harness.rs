use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::Stream;
use futures_util::stream;
use mailfeed_sdk::api::{ApiError, EmailRecord, NewEmailRecord, RecordsApiClient};
use mailfeed_sdk::feed::client::{FeedClient, FeedClientOptions};
use mailfeed_sdk::feed::event::FeedEvent;
use mailfeed_sdk::retry::ReconnectPolicy;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::time::{sleep, timeout};

/// Frame pushed to connected feed subscribers; `Shutdown` ends the response
/// stream, simulating a server-side connection drop.
#[derive(Clone, Debug)]
enum FeedFrame {
    Data(String),
    Shutdown,
}

#[derive(Clone)]
struct FeedState {
    frames: broadcast::Sender<FeedFrame>,
    connections: Arc<AtomicUsize>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn feed_end_to_end_reconnects_and_keeps_latest() {
    let (frames_tx, _) = broadcast::channel(16);
    let connections = Arc::new(AtomicUsize::new(0));
    let state = FeedState {
        frames: frames_tx.clone(),
        connections: Arc::clone(&connections),
    };
    let app = Router::new()
        .route("/events", get(events_handler))
        .with_state(state);
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let client = FeedClient::with_options(FeedClientOptions {
        endpoint: format!("http://{addr}/events"),
        reconnect: ReconnectPolicy {
            delay: Duration::from_millis(100),
            max_attempts: None,
        },
    })
    .expect("build feed client");
    let mut updates = client.subscribe();

    client.activate();
    client.activate();
    wait_for_connections(&connections, 1).await;

    frames_tx
        .send(FeedFrame::Data(json!({"x": 1}).to_string()))
        .expect("push first frame");
    let first = next_update(&mut updates).await;
    assert_eq!(first.field("x").and_then(Value::as_i64), Some(1));
    assert!(first.received_at_ms > 0);
    assert_eq!(connections.load(Ordering::SeqCst), 1);

    // A malformed frame is skipped and leaves the latest value untouched.
    frames_tx
        .send(FeedFrame::Data("{bad".to_string()))
        .expect("push malformed frame");
    sleep(Duration::from_millis(150)).await;
    assert_eq!(client.latest(), Some(first.clone()));

    // deactivate() is a documented no-op: the stream must stay usable.
    client.deactivate();
    frames_tx
        .send(FeedFrame::Data(json!({"x": 2}).to_string()))
        .expect("push frame after deactivate");
    let second = next_update(&mut updates).await;
    assert_eq!(second.field("x").and_then(Value::as_i64), Some(2));
    assert_eq!(connections.load(Ordering::SeqCst), 1);

    // Drop the connection server-side; the client reconnects on its own.
    frames_tx
        .send(FeedFrame::Shutdown)
        .expect("push shutdown frame");
    wait_for_connections(&connections, 2).await;

    frames_tx
        .send(FeedFrame::Data(json!({"x": 3}).to_string()))
        .expect("push frame on second connection");
    let third = next_update(&mut updates).await;
    assert_eq!(third.field("x").and_then(Value::as_i64), Some(3));
    assert!(third.seq > second.seq);
    assert!(third.received_at_ms >= second.received_at_ms);

    let _ = shutdown_tx.send(());
    server_task.abort();
}

async fn events_handler(
    State(state): State<FeedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.frames.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);
    let frames = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(FeedFrame::Data(data)) => Some((Ok(Event::default().data(data)), rx)),
            Ok(FeedFrame::Shutdown) | Err(_) => None,
        }
    });
    Sse::new(frames)
}

async fn wait_for_connections(connections: &AtomicUsize, at_least: usize) {
    timeout(Duration::from_secs(2), async {
        while connections.load(Ordering::SeqCst) < at_least {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for a feed connection");
}

async fn next_update(updates: &mut watch::Receiver<Option<FeedEvent>>) -> FeedEvent {
    timeout(Duration::from_secs(2), updates.changed())
        .await
        .expect("timed out waiting for a feed update")
        .expect("feed channel closed");
    updates
        .borrow_and_update()
        .clone()
        .expect("feed update value")
}

#[derive(Clone, Default)]
struct ApiState {
    created: Arc<Mutex<Option<Value>>>,
    updated: Arc<Mutex<Option<(i64, Value)>>>,
    deleted: Arc<Mutex<Option<i64>>>,
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn api_client_round_trips_records_endpoints() {
    let state = ApiState::default();
    let app = Router::new()
        .route(
            "/emails",
            get(list_records_handler).post(create_record_handler),
        )
        .route(
            "/emails/{id}",
            axum::routing::put(update_record_handler).delete(delete_record_handler),
        )
        .with_state(state.clone());
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let client = RecordsApiClient::new()
        .expect("build api client")
        .with_base_url(format!("http://{addr}"));

    let records = client.list_records().await.expect("list records");
    assert_eq!(
        records,
        vec![EmailRecord {
            id: 1,
            name: "ada".to_string(),
            email: "ada@example.com".to_string(),
        }]
    );

    client
        .create_record(&NewEmailRecord {
            name: "grace".to_string(),
            email: "grace@example.com".to_string(),
        })
        .await
        .expect("create record");
    let created = state
        .created
        .lock()
        .expect("created lock")
        .clone()
        .expect("captured create body");
    assert_eq!(created.get("name").and_then(Value::as_str), Some("grace"));
    assert_eq!(
        created.get("email").and_then(Value::as_str),
        Some("grace@example.com")
    );

    client
        .update_record(
            1,
            &NewEmailRecord {
                name: "grace".to_string(),
                email: "grace@newhost.example".to_string(),
            },
        )
        .await
        .expect("update record");
    let (updated_id, updated_body) = state
        .updated
        .lock()
        .expect("updated lock")
        .clone()
        .expect("captured update");
    assert_eq!(updated_id, 1);
    assert_eq!(
        updated_body.get("email").and_then(Value::as_str),
        Some("grace@newhost.example")
    );

    client.delete_record(1).await.expect("delete record");
    assert_eq!(*state.deleted.lock().expect("deleted lock"), Some(1));

    let _ = shutdown_tx.send(());
    server_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn api_client_surfaces_error_envelopes_and_statuses() {
    let app = Router::new().route(
        "/emails",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database down") })
            .post(|| async { Json(json!({"status": "error"})) }),
    );
    let (addr, shutdown_tx, server_task) = spawn_server(app).await;

    let client = RecordsApiClient::new()
        .expect("build api client")
        .with_base_url(format!("http://{addr}"));

    let listed = client.list_records().await;
    assert!(matches!(
        listed,
        Err(ApiError::HttpStatus { status, .. }) if status == StatusCode::INTERNAL_SERVER_ERROR
    ));

    let created = client
        .create_record(&NewEmailRecord {
            name: "grace".to_string(),
            email: "grace@example.com".to_string(),
        })
        .await;
    assert!(matches!(created, Err(ApiError::Envelope(status)) if status == "error"));

    let _ = shutdown_tx.send(());
    server_task.abort();
}

async fn list_records_handler() -> Json<Value> {
    Json(json!([
        {"id": 1, "name": "ada", "email": "ada@example.com"}
    ]))
}

async fn create_record_handler(
    State(state): State<ApiState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    *state.created.lock().expect("created lock") = Some(body);
    (StatusCode::CREATED, Json(json!({"status": "ok"})))
}

async fn update_record_handler(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Json(body): Json<Value>,
) -> Json<Value> {
    *state.updated.lock().expect("updated lock") = Some((id, body));
    Json(json!({"status": "ok"}))
}

async fn delete_record_handler(State(state): State<ApiState>, Path(id): Path<i64>) -> Json<Value> {
    *state.deleted.lock().expect("deleted lock") = Some(id);
    Json(json!({"status": "ok"}))
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server listener");
    let addr = listener
        .local_addr()
        .expect("read mock server listener address");
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .expect("mock server should run");
    });
    (addr, shutdown_tx, task)
}
