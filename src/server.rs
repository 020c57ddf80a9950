//! HTTP front for a `LineStore`.
//!
//! # Endpoints
//!
//! - `GET /lines/{n}` - the raw bytes of line `n` (1-based)
//!
//! A line past the end of the file is answered with `413`, everything the router doesn't know
//! with `404`.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::{error::Error, LineStore};

/// Build the router serving lines out of `store`.
pub fn router(store: Arc<dyn LineStore>) -> Router {
    Router::new()
        .route(
            "/lines/:line",
            get(handle_get_line).fallback(handle_unknown),
        )
        .fallback(handle_unknown)
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// Handle GET /lines/{n}
async fn handle_get_line(
    State(store): State<Arc<dyn LineStore>>,
    Path(line): Path<String>,
) -> Response {
    let line = match line.parse::<usize>() {
        Ok(line) => line,
        // A number too large for any file is just past its end
        Err(_) if !line.is_empty() && line.bytes().all(|b| b.is_ascii_digit()) => {
            return out_of_range(format!("line {} is past the end of the file", line));
        }
        Err(_) => return handle_unknown().await.into_response(),
    };

    match store.get_line(line).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            bytes,
        )
            .into_response(),
        Err(e @ Error::LineOutOfRange { .. }) => out_of_range(e.to_string()),
        Err(e) => {
            error!(?e, line, "failed to read line");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

fn out_of_range(message: String) -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        format!("Request out of range: {}", message),
    )
        .into_response()
}

async fn handle_unknown() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "No handler for endpoint")
}
