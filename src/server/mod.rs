//! # HTTP Editor API
//!
//! Serves the raster image editor over HTTP: upload an image into a
//! session, apply edits, undo, and download the result.
//!
//! ## Usage
//!
//! ```bash
//! folio serve --listen 0.0.0.0:8080
//! ```
//!
//! | Route | Action |
//! |-------|--------|
//! | `POST /api/editor/upload` | multipart `image` (+ `containerWidth`, `containerHeight`) |
//! | `GET /api/editor/:id` | session state |
//! | `POST /api/editor/:id/draw` | `{points, size?, color?}` |
//! | `POST /api/editor/:id/crop` | `{x, y, width, height}` |
//! | `POST /api/editor/:id/pixelate` | `{x, y, width, height, pixelSize?}` |
//! | `POST /api/editor/:id/undo` | pop one snapshot |
//! | `POST /api/editor/:id/revert` | back to the loaded image |
//! | `GET /api/editor/:id/export?format=png` | encoded working surface |
//! | `DELETE /api/editor/:id` | end the session |

mod handlers;
mod state;

pub use state::ServerConfig;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::FolioError;
use state::{AppState, SESSION_EXPIRATION_SECS};

/// Build the router over shared state.
fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/editor/upload",
            post(handlers::editor::upload).layer(DefaultBodyLimit::max(50 * 1024 * 1024)),
        )
        .route(
            "/api/editor/:id",
            get(handlers::editor::show).delete(handlers::editor::close),
        )
        .route("/api/editor/:id/draw", post(handlers::editor::draw))
        .route("/api/editor/:id/crop", post(handlers::editor::crop))
        .route("/api/editor/:id/pixelate", post(handlers::editor::pixelate))
        .route("/api/editor/:id/undo", post(handlers::editor::undo))
        .route("/api/editor/:id/revert", post(handlers::editor::revert))
        .route("/api/editor/:id/export", get(handlers::editor::export))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: ServerConfig) -> Result<(), FolioError> {
    let app_state = Arc::new(AppState::new(config.clone()));

    // Spawn background session cleanup task
    tokio::spawn(cleanup_sessions(app_state.clone()));

    let app = router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(listen = %config.listen_addr, "folio editor server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Background task to drop idle editor sessions.
async fn cleanup_sessions(state: Arc<AppState>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    let expiration = Duration::from_secs(SESSION_EXPIRATION_SECS);

    loop {
        interval.tick().await;
        let now = Instant::now();

        let mut sessions = state.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, v| now.duration_since(v.last_accessed) < expiration);
        let after = sessions.len();
        if before != after {
            info!(
                expired = before - after,
                remaining = after,
                "cleaned up editor sessions"
            );
        }
    }
}
