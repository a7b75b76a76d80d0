use crate::config::Config;
use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use icey_core::{
    BitmapStore, CodeStoreBuilder, ContentRecordOrchestrator, ErrorKind, IceyError, Result,
    StoreBuilder, Tally, UlidGenerator, VerificationGate, VersionedStore, Vote,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct ServerState {
    pub records: ContentRecordOrchestrator,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    msg: String,
    data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(msg: &str, data: Option<T>) -> Response {
        let body = ApiResponse {
            success: true,
            msg: msg.to_string(),
            data,
        };
        (StatusCode::OK, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct CommitRequest {
    subject: String,
    content: String,
    code: String,
}

#[derive(Debug, Serialize)]
struct CommitResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    subject: String,
    code: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct VoteRequest {
    subject: String,
    id: String,
    vote: u8,
    code: String,
}

#[derive(Debug, Serialize)]
struct VoteResponse {
    percent: u8,
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    subject: String,
}

#[derive(Debug, Serialize)]
struct RecordResponse {
    id: String,
    timestamp: u64,
    created_at: String,
    content: String,
    percent: u8,
    tally: TallyResponse,
}

#[derive(Debug, Serialize)]
struct TallyResponse {
    total: usize,
    trusted: usize,
    distrusted: usize,
    percent: u8,
}

impl From<Tally> for TallyResponse {
    fn from(tally: Tally) -> Self {
        Self {
            total: tally.total,
            trusted: tally.trusted,
            distrusted: tally.distrusted,
            percent: tally.percent(),
        }
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let sharding = config.repository.sharding();

    let mut store_builder = StoreBuilder::new()
        .backend(config.repository.backend.as_str())
        .root(sharding.store_dir())
        .author(config.repository.author());
    if let Some(url) = &config.repository.url {
        store_builder = store_builder.url(url);
    }
    if let Some(key) = &config.repository.ssh_key {
        store_builder = store_builder.ssh_key(key);
    }
    if let Some(owner) = &config.repository.lock_owner {
        store_builder = store_builder.lock_owner(owner);
    }
    let store = store_builder.build()?;

    store.pull().await?;
    tracing::info!(
        "Shared store ready at {} (lock identity {})",
        store.root().display(),
        store.identity().await?
    );

    let codes = code_store_builder(&config).build().await?;
    let records = ContentRecordOrchestrator::new(
        store,
        sharding,
        VerificationGate::new(codes, config.verification.max_attempts),
        Arc::new(BitmapStore::new(config.storage.bitmap_size)),
        Arc::new(UlidGenerator::new()),
    )?;

    let state = Arc::new(ServerState { records });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr).await?;
    tracing::info!("Server listening on {}", config.server.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn code_store_builder(config: &Config) -> CodeStoreBuilder {
    let mut builder = CodeStoreBuilder::new().backend(config.code_store.backend.as_str());
    if let Some(redis) = &config.code_store.redis {
        builder = builder.redis_url(&redis.url);
    }
    builder
}

pub fn create_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/commit", post(commit_handler))
        .route("/delete", post(delete_handler))
        .route("/vote", post(vote_handler))
        .route("/query", post(query_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::VerificationFailed => StatusCode::FORBIDDEN,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::LockConflict => StatusCode::CONFLICT,
        ErrorKind::Storage => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: IceyError) -> Response {
    let kind = error.kind();
    match kind {
        ErrorKind::Storage | ErrorKind::Internal => tracing::error!("Request failed: {}", error),
        _ => tracing::debug!("Request rejected: {}", error),
    }

    let body = ApiResponse::<()> {
        success: false,
        msg: error.to_string(),
        data: None,
    };
    (status_for(kind), Json(body)).into_response()
}

fn rejection_response(rejection: JsonRejection) -> Response {
    error_response(IceyError::InvalidRequest(rejection.body_text()))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn commit_handler(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<CommitRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };

    match state
        .records
        .submit(&request.subject, request.content, &request.code)
        .await
    {
        Ok(result) => ApiResponse::ok(
            "submitted",
            Some(CommitResponse {
                token: result.token,
            }),
        ),
        Err(error) => error_response(error),
    }
}

async fn delete_handler(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<DeleteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };

    match state
        .records
        .delete(&request.subject, &request.code, &request.token)
        .await
    {
        Ok(_) => ApiResponse::<()>::ok("deleted", None),
        Err(error) => error_response(error),
    }
}

async fn vote_handler(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<VoteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };

    let vote = match Vote::from_bit(request.vote) {
        Ok(vote) => vote,
        Err(error) => return error_response(error),
    };

    match state
        .records
        .vote(&request.subject, &request.id, vote, &request.code)
        .await
    {
        Ok(result) => ApiResponse::ok(
            "voted",
            Some(VoteResponse {
                percent: result.percent,
            }),
        ),
        Err(error) => error_response(error),
    }
}

async fn query_handler(
    State(state): State<Arc<ServerState>>,
    payload: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return rejection_response(rejection),
    };

    match state.records.query(&request.subject).await {
        Ok(result) => {
            let records: Vec<RecordResponse> = result
                .items
                .into_iter()
                .map(|item| RecordResponse {
                    id: item.id.to_string(),
                    timestamp: item.id.timestamp_ms(),
                    created_at: item.created_at.to_rfc3339(),
                    content: String::from_utf8_lossy(&item.content).into_owned(),
                    percent: item.percent,
                    tally: item.tally.into(),
                })
                .collect();
            ApiResponse::ok("ok", Some(records))
        }
        Err(error) => error_response(error),
    }
}
