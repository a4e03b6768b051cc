//! Image uploads for proof photos and avatars. Files land in the uploads
//! directory under a random name and are served statically.

use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::Actor;
use crate::shared::error::{AppError, AppResult};
use crate::shared::state::AppState;

const MAX_UPLOAD_BYTES: usize = 5 * 1024 * 1024;
const ALLOWED_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

fn extension_of(filename: &str) -> Result<String, AppError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .ok_or_else(|| AppError::Validation("file has no extension".to_string()))?;
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(AppError::Validation(format!(
            "unsupported file type: .{ext}"
        )))
    }
}

pub async fn upload_image(
    State(state): State<Arc<AppState>>,
    _actor: Actor,
    mut multipart: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("bad upload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::Validation("missing filename".to_string()))?;
        let ext = extension_of(&filename)?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("bad upload: {e}")))?;
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::Validation("file exceeds 5MB limit".to_string()));
        }

        let name = format!("{}.{ext}", Uuid::new_v4());
        let dir = state.config.uploads.dir.clone();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| AppError::Database(format!("upload dir unavailable: {e}")))?;
        let path = Path::new(&dir).join(&name);
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| AppError::Database(format!("upload write failed: {e}")))?;

        return Ok(Json(serde_json::json!({ "url": format!("/uploads/{name}") })));
    }
    Err(AppError::Validation("missing 'file' field".to_string()))
}

pub fn configure_files_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/files/upload", post(upload_image))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_allow_list() {
        assert_eq!(extension_of("photo.JPG").unwrap(), "jpg");
        assert!(extension_of("script.exe").is_err());
        assert!(extension_of("noext").is_err());
    }
}
