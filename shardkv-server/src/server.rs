use crate::forward::{FORWARDED_HEADER, Forwarder};
use axum::{
    Router,
    extract::{OriginalUri, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use shardkv_core::replication::protocol::{ACK_OK, DeleteReplicationKey};
use shardkv_core::{
    KvError, KvStore, NextKeyValue, PurgeExtraKeysOperation, Result, ShardTable, route_or_serve,
    run_blocking,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub store: Arc<KvStore>,
    pub table: Arc<ShardTable>,
    pub forwarder: Forwarder,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl ServerState {
    pub fn new(store: Arc<KvStore>, table: Arc<ShardTable>, forwarder: Forwarder) -> Self {
        Self {
            store,
            table,
            forwarder,
            started_at: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GetQuery {
    #[serde(default)]
    key: String,
}

#[derive(Debug, Deserialize)]
struct SetQuery {
    #[serde(default)]
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    shard_index: usize,
    shard_count: usize,
    read_only: bool,
    outbox_pending: u64,
    started_at: String,
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/get", get(get_handler))
        .route("/set", get(set_handler))
        .route("/purge", get(purge_handler))
        .route("/next-replication-key", get(next_replication_key))
        .route("/delete-replication-key", get(delete_replication_key))
        .route("/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: tokio::net::TcpListener, state: Arc<ServerState>) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(
        "Shard {} of {} listening on {} (read_only={})",
        state.table.current_index(),
        state.table.count(),
        addr,
        state.store.is_read_only()
    );

    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

fn error_status(error: &KvError) -> StatusCode {
    match error {
        KvError::ReadOnly => StatusCode::FORBIDDEN,
        KvError::KeyNotFound(_) => StatusCode::NOT_FOUND,
        KvError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        KvError::StaleAck => StatusCode::EXPECTATION_FAILED,
        KvError::Http(_) | KvError::Remote(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: KvError) -> Response {
    (error_status(&error), format!("error: {}", error)).into_response()
}

/// Serve locally or proxy to the owner. A request that was already
/// forwarded once is never forwarded again.
async fn serve_key<L, LF>(
    state: &ServerState,
    key: &str,
    headers: &HeaderMap,
    uri: &OriginalUri,
    local: L,
) -> Response
where
    L: FnOnce() -> LF,
    LF: std::future::Future<Output = Result<Response>>,
{
    if key.is_empty() {
        return error_response(KvError::InvalidRequest("key is required".to_string()));
    }

    let already_forwarded = headers.contains_key(FORWARDED_HEADER);
    let path_and_query = uri
        .0
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.0.path().to_string());

    let result = route_or_serve(&state.table, key.as_bytes(), local, |shard, address| async move {
        if already_forwarded {
            tracing::warn!(
                "Refusing to re-forward key for shard {}; shard tables disagree between nodes",
                shard
            );
            return Ok((
                StatusCode::LOOP_DETECTED,
                format!(
                    "error: shard {} received a forwarded request for shard {}",
                    state.table.current_index(),
                    shard
                ),
            )
                .into_response());
        }

        tracing::debug!(
            "Redirecting from shard {} to shard {} ({})",
            state.table.current_index(),
            shard,
            address
        );
        state.forwarder.forward(&address, &path_and_query).await
    })
    .await;

    match result {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!("Request for key {:?} failed: {}", key, error);
            error_response(error)
        }
    }
}

async fn get_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    uri: OriginalUri,
    Query(query): Query<GetQuery>,
) -> Response {
    let key = query.key;
    let store = state.store.clone();
    serve_key(&state, &key, &headers, &uri, || read_local(store, key.clone())).await
}

async fn read_local(store: Arc<KvStore>, key: String) -> Result<Response> {
    let lookup = key.clone();
    match run_blocking(move || store.get(lookup.as_bytes())).await? {
        Some(value) => Ok((StatusCode::OK, value).into_response()),
        None => Err(KvError::KeyNotFound(key)),
    }
}

async fn set_handler(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    uri: OriginalUri,
    Query(query): Query<SetQuery>,
) -> Response {
    let SetQuery { key, value } = query;
    let store = state.store.clone();
    serve_key(&state, &key, &headers, &uri, || {
        write_local(store, key.clone(), value)
    })
    .await
}

async fn write_local(store: Arc<KvStore>, key: String, value: String) -> Result<Response> {
    run_blocking(move || store.put(key.as_bytes(), value.as_bytes())).await?;
    Ok((StatusCode::OK, "ok").into_response())
}

/// DANGER: hard-deletes every record this shard does not own.
async fn purge_handler(State(state): State<Arc<ServerState>>) -> Response {
    let operation = PurgeExtraKeysOperation::new(state.store.clone(), state.table.clone());

    match run_blocking(move || operation.run()).await {
        Ok(result) => (StatusCode::OK, format!("purged {} keys", result.purged)).into_response(),
        Err(error) => {
            tracing::error!("Purge failed: {}", error);
            error_response(error)
        }
    }
}

async fn next_replication_key(State(state): State<Arc<ServerState>>) -> Response {
    let store = state.store.clone();
    let payload = match run_blocking(move || store.peek_oldest_outbox_entry()).await {
        Ok(entry) => NextKeyValue::from_entry(entry.as_ref()),
        Err(error) => {
            tracing::error!("Failed to read replication outbox: {}", error);
            NextKeyValue::from_error(&error)
        }
    };

    (StatusCode::OK, axum::Json(payload)).into_response()
}

/// DANGER: call only after the entry has been applied on the replica.
async fn delete_replication_key(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DeleteReplicationKey>,
) -> Response {
    let store = state.store.clone();
    let result = match query.into_entry() {
        Ok(entry) => run_blocking(move || store.ack_outbox_entry(&entry.key, &entry.value)).await,
        Err(error) => Err(error),
    };

    match result {
        Ok(()) => (StatusCode::OK, ACK_OK).into_response(),
        Err(error) => error_response(error),
    }
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> Response {
    let store = state.store.clone();
    let outbox_pending = match run_blocking(move || store.outbox_len()).await {
        Ok(count) => count,
        Err(error) => return error_response(error),
    };

    let response = HealthResponse {
        shard_index: state.table.current_index(),
        shard_count: state.table.count(),
        read_only: state.store.is_read_only(),
        outbox_pending,
        started_at: state.started_at.to_rfc3339(),
    };

    (StatusCode::OK, axum::Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use shardkv_core::{ShardEntry, build_peer_client};
    use std::time::Duration;
    use tower::ServiceExt;

    fn state(self_name: &str, read_only: bool) -> (tempfile::TempDir, Arc<ServerState>) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(KvStore::open(temp_dir.path().join("db"), read_only).unwrap());
        let entries = vec![
            ShardEntry::new("A", 0, "127.0.0.1:1"),
            ShardEntry::new("B", 1, "127.0.0.1:1"),
        ];
        let table = Arc::new(ShardTable::build(&entries, self_name).unwrap());
        let forwarder = Forwarder::new(build_peer_client(Duration::from_millis(200)).unwrap());
        (temp_dir, Arc::new(ServerState::new(store, table, forwarder)))
    }

    async fn call(state: &Arc<ServerState>, uri: &str) -> (StatusCode, String) {
        call_with(state, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
    }

    async fn call_with(state: &Arc<ServerState>, request: Request<Body>) -> (StatusCode, String) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_set_then_get_local() {
        // "foo" hashes to shard 0
        let (_dir, state) = state("A", false);

        let (status, body) = call(&state, "/set?key=foo&value=hello").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");

        let (status, body) = call(&state, "/get?key=foo").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello");

        assert_eq!(state.store.outbox_entry(b"foo").unwrap(), Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let (_dir, state) = state("A", false);
        let (status, _) = call(&state, "/get?key=foo").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_empty_key_rejected() {
        let (_dir, state) = state("A", false);
        let (status, _) = call(&state, "/get").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = call(&state, "/set?key=&value=1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_replica_rejects_writes() {
        let (_dir, state) = state("A", true);
        let (status, body) = call(&state, "/set?key=foo&value=1").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body.contains("read-only"));
    }

    #[tokio::test]
    async fn test_forward_failure_is_bad_gateway() {
        // "a" belongs to shard 1 whose address refuses connections
        let (_dir, state) = state("A", false);
        let (status, _) = call(&state, "/get?key=a").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_forwarded_request_is_not_forwarded_again() {
        let (_dir, state) = state("A", false);
        let request = Request::builder()
            .uri("/get?key=a")
            .header(FORWARDED_HEADER, "1")
            .body(Body::empty())
            .unwrap();
        let (status, _) = call_with(&state, request).await;
        assert_eq!(status, StatusCode::LOOP_DETECTED);
    }

    #[tokio::test]
    async fn test_replication_endpoints() {
        let (_dir, state) = state("A", false);

        let (_, body) = call(&state, "/next-replication-key").await;
        let payload: NextKeyValue = serde_json::from_str(&body).unwrap();
        assert_eq!(payload.key, "");
        assert_eq!(payload.error, None);

        call(&state, "/set?key=foo&value=1").await;
        let (_, body) = call(&state, "/next-replication-key").await;
        let payload: NextKeyValue = serde_json::from_str(&body).unwrap();
        assert_eq!(payload.key, hex::encode("foo"));
        assert_eq!(payload.value, hex::encode("1"));

        let stale = format!(
            "/delete-replication-key?key={}&value={}",
            hex::encode("foo"),
            hex::encode("2")
        );
        let (status, body) = call(&state, &stale).await;
        assert_eq!(status, StatusCode::EXPECTATION_FAILED);
        assert!(body.starts_with("error:"));

        let ack = format!(
            "/delete-replication-key?key={}&value={}",
            hex::encode("foo"),
            hex::encode("1")
        );
        let (status, body) = call(&state, &ack).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
        assert_eq!(state.store.outbox_len().unwrap(), 0);

        let (status, body) = call(&state, &ack).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.starts_with("error:"));

        let (status, _) = call(&state, "/delete-replication-key?key=zz").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_purge_and_health() {
        let (_dir, state) = state("A", false);
        state.store.put(b"foo", b"mine").unwrap();
        // Written directly: "a" is owned by shard 1
        state.store.put(b"a", b"theirs").unwrap();

        let (status, body) = call(&state, "/purge").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "purged 1 keys");
        assert_eq!(state.store.get(b"a").unwrap(), None);
        assert_eq!(state.store.get(b"foo").unwrap(), Some(b"mine".to_vec()));

        let (status, body) = call(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let health: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["shard_index"], 0);
        assert_eq!(health["shard_count"], 2);
        assert_eq!(health["read_only"], false);
        assert_eq!(health["outbox_pending"], 2);
    }
}
