use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
};
use tracing::{error, info, warn};

use motionx_sync::AuthUser;
use motionx_types::api::UploadResponse;

use crate::state::AppState;
use crate::storage::{BlobError, BlobStore};

/// Request bodies above this are refused before the handler runs.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

type Reply = (StatusCode, Json<UploadResponse>);

fn reply(status: StatusCode, body: UploadResponse) -> Reply {
    (status, Json(body))
}

/// POST /api/upload: multipart form with a `file` part and an optional
/// `filename` text part naming the destination path. Returns the public
/// URL of the stored blob.
pub async fn upload(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Reply {
    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut target: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed upload from {}: {}", user.id, e);
                return reply(StatusCode::BAD_REQUEST, UploadResponse::err(e.body_text()));
            }
        };

        match field.name() {
            Some("file") => {
                let name = field.file_name().map(str::to_string);
                match field.bytes().await {
                    Ok(bytes) => file = Some((name, bytes.to_vec())),
                    Err(e) => {
                        return reply(StatusCode::BAD_REQUEST, UploadResponse::err(e.body_text()));
                    }
                }
            }
            Some("filename") => match field.text().await {
                Ok(text) => target = Some(text),
                Err(e) => {
                    return reply(StatusCode::BAD_REQUEST, UploadResponse::err(e.body_text()));
                }
            },
            _ => {}
        }
    }

    let Some((original_name, bytes)) = file.filter(|(_, b)| !b.is_empty()) else {
        return reply(StatusCode::BAD_REQUEST, UploadResponse::err("No file provided"));
    };

    let Some(path) = target.or(original_name) else {
        return reply(StatusCode::BAD_REQUEST, UploadResponse::err("No file name provided"));
    };

    if let Err(e) = BlobStore::sanitize(&path) {
        return reply(StatusCode::BAD_REQUEST, UploadResponse::err(e.to_string()));
    }

    match state.blobs.put(&path, &bytes).await {
        Ok(url) => {
            info!("{} uploaded {} ({} bytes)", user.id, path, bytes.len());
            reply(StatusCode::OK, UploadResponse::ok(url))
        }
        Err(BlobError::Exists(_)) => {
            warn!("{} tried to overwrite {}", user.id, path);
            reply(StatusCode::CONFLICT, UploadResponse::err("File already exists"))
        }
        Err(BlobError::NotConfigured) => {
            error!("Upload rejected: blob write token missing");
            reply(StatusCode::INTERNAL_SERVER_ERROR, UploadResponse::not_configured())
        }
        Err(e) => {
            error!("Failed to store {}: {}", path, e);
            reply(StatusCode::INTERNAL_SERVER_ERROR, UploadResponse::err("Upload failed"))
        }
    }
}
