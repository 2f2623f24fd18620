//! Image editor session API handlers.

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::{StatusCode, header},
    response::IntoResponse,
};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::editor::{EditorHandle, EditorOptions, RasterEditor, Rect, parse_color};
use crate::error::FolioError;

use super::super::state::{AppState, EditorSession};

type ApiError = (StatusCode, String);

fn api_error(e: FolioError) -> ApiError {
    let status = match &e {
        FolioError::Validation(_) | FolioError::Image(_) => StatusCode::BAD_REQUEST,
        FolioError::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

/// Editor session summary returned by every mutating endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorState {
    pub id: String,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    pub undo_depth: usize,
}

#[derive(Debug, Deserialize)]
pub struct DrawRequest {
    pub points: Vec<(f32, f32)>,
    #[serde(default)]
    pub size: Option<u32>,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RectRequest {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<RectRequest> for Rect {
    fn from(r: RectRequest) -> Self {
        Rect::new(r.x, r.y, r.width, r.height)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelateRequest {
    #[serde(flatten)]
    pub rect: RectRequest,
    #[serde(default)]
    pub pixel_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// Look up a session, keeping it alive.
async fn session(state: &AppState, id: &str) -> Result<(EditorHandle, String), ApiError> {
    let session_id = Uuid::parse_str(id)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid session ID".to_string()))?;
    let mut sessions = state.sessions.write().await;
    let session = sessions
        .get_mut(&session_id)
        .ok_or((StatusCode::NOT_FOUND, "Session not found or expired".to_string()))?;
    session.touch();
    Ok((session.editor.clone(), session.file_name.clone()))
}

async fn describe(id: &str, file_name: String, editor: &EditorHandle) -> EditorState {
    let editor = editor.lock().await;
    let (width, height) = editor.dimensions();
    EditorState {
        id: id.to_string(),
        file_name,
        width,
        height,
        undo_depth: editor.undo_depth(),
    }
}

/// POST /api/editor/upload - Start a session from an uploaded image.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<EditorState>, ApiError> {
    let mut image_data: Option<Vec<u8>> = None;
    let mut file_name = String::from("image");
    let mut container_width: Option<u32> = None;
    let mut container_height: Option<u32> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "image" => {
                file_name = field.file_name().unwrap_or("image").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read image: {}", e)))?;
                image_data = Some(bytes.to_vec());
            }
            "containerWidth" | "containerHeight" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read {}: {}", name, e)))?;
                let value = text
                    .trim()
                    .parse::<u32>()
                    .map_err(|_| (StatusCode::BAD_REQUEST, format!("{} must be a number", name)))?;
                if name == "containerWidth" {
                    container_width = Some(value);
                } else {
                    container_height = Some(value);
                }
            }
            _ => {}
        }
    }

    let image_bytes = image_data.ok_or((StatusCode::BAD_REQUEST, "No image field found".to_string()))?;
    let container = container_width.zip(container_height);
    let options = EditorOptions::from(&state.config.engine);

    // Decoding and the initial resample are CPU-bound
    let editor = tokio::task::spawn_blocking(move || {
        let mut editor = RasterEditor::new(options);
        editor.load_bytes(&image_bytes, container).map(|_| editor)
    })
    .await
    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, format!("Processing error: {}", e)))?
    .map_err(api_error)?;

    let session_id = Uuid::new_v4();
    let handle = EditorHandle::new(editor);
    let summary = describe(&session_id.to_string(), file_name.clone(), &handle).await;
    state
        .sessions
        .write()
        .await
        .insert(session_id, EditorSession::new(handle, file_name));
    info!(session = %session_id, width = summary.width, height = summary.height, "editor session started");

    Ok(Json(summary))
}

/// GET /api/editor/:id - Current session state.
pub async fn show(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EditorState>, ApiError> {
    let (editor, file_name) = session(&state, &id).await?;
    Ok(Json(describe(&id, file_name, &editor).await))
}

/// POST /api/editor/:id/draw - Draw one stroke through the given points.
pub async fn draw(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<DrawRequest>,
) -> Result<Json<EditorState>, ApiError> {
    if req.points.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "A stroke needs at least one point".to_string()));
    }
    let color = match &req.color {
        Some(color) => Some(
            parse_color(color)
                .ok_or((StatusCode::BAD_REQUEST, format!("Invalid color: {}", color)))?,
        ),
        None => None,
    };
    let (editor, file_name) = session(&state, &id).await?;
    let points = req.points;
    let count = points.len();
    let size = req.size;
    editor
        .run_blocking(move |editor| {
            let mut brush = editor.brush();
            if let Some(size) = size {
                brush.size = size.max(1);
            }
            if let Some(color) = color {
                brush.color = color;
            }
            editor.set_brush(brush);
            editor.draw_path(&points);
        })
        .await
        .map_err(api_error)?;
    debug!(session = %id, points = count, "stroke drawn");
    Ok(Json(describe(&id, file_name, &editor).await))
}

/// POST /api/editor/:id/crop - Crop the working surface to a rectangle.
pub async fn crop(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<RectRequest>,
) -> Result<Json<EditorState>, ApiError> {
    let (editor, file_name) = session(&state, &id).await?;
    let rect = Rect::from(req);
    let cropped = editor
        .run_blocking(move |editor| editor.crop(rect))
        .await
        .map_err(api_error)?;
    if !cropped {
        return Err((StatusCode::BAD_REQUEST, "Selection is outside the image".to_string()));
    }
    Ok(Json(describe(&id, file_name, &editor).await))
}

/// POST /api/editor/:id/pixelate - Pixelate a rectangle.
pub async fn pixelate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<PixelateRequest>,
) -> Result<Json<EditorState>, ApiError> {
    let (editor, file_name) = session(&state, &id).await?;
    let rect = Rect::from(req.rect);
    let requested = req.pixel_size;
    let applied = editor
        .run_blocking(move |editor| {
            let pixel_size = requested.unwrap_or_else(|| editor.pixel_size());
            editor.pixelate(rect, pixel_size)
        })
        .await
        .map_err(api_error)?;
    if !applied {
        return Err((StatusCode::BAD_REQUEST, "Selection is outside the image".to_string()));
    }
    Ok(Json(describe(&id, file_name, &editor).await))
}

/// POST /api/editor/:id/undo - Restore the previous surface.
pub async fn undo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EditorState>, ApiError> {
    let (editor, file_name) = session(&state, &id).await?;
    if !editor.lock().await.undo() {
        return Err((StatusCode::CONFLICT, "Nothing to undo".to_string()));
    }
    Ok(Json(describe(&id, file_name, &editor).await))
}

/// POST /api/editor/:id/revert - Discard all edits.
pub async fn revert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<EditorState>, ApiError> {
    let (editor, file_name) = session(&state, &id).await?;
    editor
        .run_blocking(|editor| editor.revert_to_original())
        .await
        .map_err(api_error)?;
    Ok(Json(describe(&id, file_name, &editor).await))
}

/// GET /api/editor/:id/export - Encoded working surface (png or jpeg).
pub async fn export(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let format = match query.format.as_deref().unwrap_or("png") {
        "png" => ImageFormat::Png,
        "jpeg" | "jpg" => ImageFormat::Jpeg,
        other => return Err((StatusCode::BAD_REQUEST, format!("Unsupported format: {}", other))),
    };
    let (editor, _) = session(&state, &id).await?;
    let bytes = editor.export_snapshot(format).await.map_err(api_error)?;
    Ok(([(header::CONTENT_TYPE, format.to_mime_type())], bytes))
}

/// DELETE /api/editor/:id - End a session.
pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let session_id = Uuid::parse_str(&id)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid session ID".to_string()))?;
    match state.sessions.write().await.remove(&session_id) {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err((StatusCode::NOT_FOUND, "Session not found or expired".to_string())),
    }
}
