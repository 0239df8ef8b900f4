//! HTTP endpoints.
//!
//! | route | response |
//! |---|---|
//! | `GET /api/segment/get/{tag}` | next id as plain text |
//! | `GET /api/segment/allocs` | store rows as JSON |
//! | `GET /api/segment/cache` | buffer snapshots as JSON |
//! | `GET /health` | `ok`, or 503 until the allocator is ready |
//!
//! Allocation failures are not HTTP errors: the sentinel id is returned with
//! status 200 and the failure kind in the [`STATUS_HEADER`] header.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use segid::{AllocStore, SegmentAllocator};

/// Header carrying the exception kind of a failed allocation.
pub const STATUS_HEADER: &str = "x-segid-status";

pub struct AppState<S> {
    allocator: SegmentAllocator<S>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            allocator: self.allocator.clone(),
        }
    }
}

impl<S: AllocStore> AppState<S> {
    pub const fn new(allocator: SegmentAllocator<S>) -> Self {
        Self { allocator }
    }
}

pub fn router<S: AllocStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/api/segment/get/{tag}", get(next_id::<S>))
        .route("/api/segment/allocs", get(allocations::<S>))
        .route("/api/segment/cache", get(cache::<S>))
        .route("/health", get(health::<S>))
        .with_state(state)
}

async fn next_id<S: AllocStore>(
    State(state): State<AppState<S>>,
    Path(tag): Path<String>,
) -> Response {
    let result = state.allocator.next_id(&tag).await;
    match result.exception_kind() {
        None => result.id.to_string().into_response(),
        Some(kind) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(tag = tag.as_str(), %kind, "Allocation failed");
            ([(STATUS_HEADER, kind.as_str())], result.id.to_string()).into_response()
        }
    }
}

async fn allocations<S: AllocStore>(State(state): State<AppState<S>>) -> Response {
    match state.allocator.allocations().await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::warn!("Listing allocations failed: {e}");
            (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
        }
    }
}

async fn cache<S: AllocStore>(State(state): State<AppState<S>>) -> Response {
    Json(state.allocator.cache_snapshot()).into_response()
}

async fn health<S: AllocStore>(State(state): State<AppState<S>>) -> Response {
    if state.allocator.is_ready() {
        "ok".into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "initializing").into_response()
    }
}
