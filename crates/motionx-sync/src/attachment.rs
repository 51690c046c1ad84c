//! Attachment validation and upload. Every check runs before the first
//! byte leaves the client; a rejected file never reaches the relay.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, info, warn};
use uuid::Uuid;

use motionx_types::api::UploadResponse;
use motionx_types::models::AttachmentKind;

use crate::config::SyncConfig;
use crate::error::{Result, SyncError, ValidationError};

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];
const VIDEO_TYPES: &[&str] = &["video/mp4", "video/webm", "video/quicktime"];

/// Where an attachment is going; decides allowed types, ceiling and folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentPurpose {
    Post,
    Reel,
    RoomMessage,
    DirectMessage,
    Avatar,
}

impl AttachmentPurpose {
    pub fn folder(&self) -> &'static str {
        match self {
            Self::Post => "posts",
            Self::Reel => "reels",
            Self::RoomMessage => "chat",
            Self::DirectMessage => "dm",
            Self::Avatar => "avatars",
        }
    }

    fn allows(&self, mime: &str) -> bool {
        match self {
            Self::Reel => VIDEO_TYPES.contains(&mime),
            Self::Avatar => IMAGE_TYPES.contains(&mime),
            Self::Post | Self::RoomMessage | Self::DirectMessage => {
                IMAGE_TYPES.contains(&mime) || VIDEO_TYPES.contains(&mime)
            }
        }
    }

    fn max_bytes(&self, config: &SyncConfig) -> u64 {
        match self {
            Self::Reel => config.reel_max_bytes,
            _ => config.attachment_max_bytes,
        }
    }
}

/// A file picked by the user.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Bytes,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, mime_type: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn kind(&self) -> Option<AttachmentKind> {
        AttachmentKind::from_mime(&self.mime_type)
    }

    fn extension(&self) -> &str {
        self.file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or("bin")
    }
}

/// A stored attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub url: String,
    pub kind: AttachmentKind,
}

/// Sends a validated file to blob storage and returns its public URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, path: String, attachment: Attachment) -> Result<String>;
}

/// Uploads through the relay endpoint as `multipart/form-data`.
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpUploader {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token: token.into(),
        }
    }

    pub fn from_config(config: &SyncConfig, token: impl Into<String>) -> Self {
        Self::new(config.upload_url.clone(), token)
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, path: String, attachment: Attachment) -> Result<String> {
        let part = reqwest::multipart::Part::bytes(attachment.bytes.to_vec())
            .file_name(attachment.file_name.clone())
            .mime_str(&attachment.mime_type)
            .map_err(|e| SyncError::Upload(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("filename", path);

        let resp = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SyncError::Upload(e.to_string()))?;

        let status = resp.status();
        let body: UploadResponse = resp
            .json()
            .await
            .map_err(|e| SyncError::Upload(format!("bad relay response ({}): {}", status, e)))?;

        if body.is_not_configured() {
            return Err(SyncError::Config(
                body.error
                    .unwrap_or_else(|| "Upload service not configured".to_string()),
            ));
        }
        match (body.success, body.url) {
            (true, Some(url)) => Ok(url),
            _ => Err(SyncError::Upload(
                body.error.unwrap_or_else(|| status.to_string()),
            )),
        }
    }
}

#[derive(Clone)]
pub struct AttachmentPipeline {
    uploader: Arc<dyn Uploader>,
    config: Arc<SyncConfig>,
}

impl AttachmentPipeline {
    pub fn new(uploader: Arc<dyn Uploader>, config: Arc<SyncConfig>) -> Self {
        Self { uploader, config }
    }

    /// Check type and size against the purpose's limits.
    pub fn validate(&self, purpose: AttachmentPurpose, attachment: &Attachment) -> Result<AttachmentKind> {
        let size = attachment.bytes.len() as u64;
        let limit = purpose.max_bytes(&self.config);
        if size > limit {
            return Err(ValidationError::TooLarge { limit_bytes: limit }.into());
        }
        if size == 0 {
            return Err(ValidationError::EmptyFile.into());
        }
        let kind = match attachment.kind() {
            Some(kind) if purpose.allows(&attachment.mime_type) => kind,
            _ => {
                return Err(ValidationError::UnsupportedType(attachment.mime_type.clone()).into());
            }
        };
        Ok(kind)
    }

    /// Validate, then upload to `{folder}/{owner}/{random}.{ext}`.
    pub async fn upload(
        &self,
        purpose: AttachmentPurpose,
        owner: Uuid,
        attachment: Attachment,
    ) -> Result<Uploaded> {
        let kind = match self.validate(purpose, &attachment) {
            Ok(kind) => kind,
            Err(e) => {
                warn!("Rejected {} attachment '{}': {}", purpose.folder(), attachment.file_name, e);
                return Err(e);
            }
        };

        let path = format!(
            "{}/{}/{}.{}",
            purpose.folder(),
            owner,
            Uuid::new_v4(),
            attachment.extension()
        );
        let size = attachment.bytes.len();

        match self.uploader.upload(path.clone(), attachment).await {
            Ok(url) => {
                info!("Uploaded {} ({} bytes)", path, size);
                Ok(Uploaded { url, kind })
            }
            Err(e) => {
                error!("Upload of {} failed: {}", path, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingUploader {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Uploader for CountingUploader {
        async fn upload(&self, path: String, _attachment: Attachment) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://blobs.test/{}", path))
        }
    }

    fn pipeline() -> (AttachmentPipeline, Arc<CountingUploader>) {
        let uploader = Arc::new(CountingUploader::default());
        let pipeline = AttachmentPipeline::new(uploader.clone(), Arc::new(SyncConfig::default()));
        (pipeline, uploader)
    }

    #[tokio::test]
    async fn oversized_file_never_uploads() {
        let (pipeline, uploader) = pipeline();
        let big = Attachment::new("big.png", "image/png", vec![0u8; 10 * 1024 * 1024 + 1]);

        let err = pipeline
            .upload(AttachmentPurpose::Post, Uuid::new_v4(), big)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "File size must be less than 10MB");
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn reels_take_video_only() {
        let (pipeline, uploader) = pipeline();
        let image = Attachment::new("pic.jpg", "image/jpeg", vec![1u8; 64]);
        assert!(matches!(
            pipeline.upload(AttachmentPurpose::Reel, Uuid::new_v4(), image).await,
            Err(SyncError::Validation(ValidationError::UnsupportedType(_)))
        ));

        let owner = Uuid::new_v4();
        let video = Attachment::new("clip.mp4", "video/mp4", vec![1u8; 64]);
        let uploaded = pipeline
            .upload(AttachmentPurpose::Reel, owner, video)
            .await
            .unwrap();
        assert_eq!(uploaded.kind, AttachmentKind::Video);
        assert!(uploaded.url.contains(&format!("reels/{}/", owner)));
        assert!(uploaded.url.ends_with(".mp4"));
        assert_eq!(uploader.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reel_ceiling_is_larger() {
        let (pipeline, _) = pipeline();
        let clip = Attachment::new("clip.mp4", "video/mp4", vec![0u8; 20 * 1024 * 1024]);
        assert!(pipeline.validate(AttachmentPurpose::Reel, &clip).is_ok());
        assert!(matches!(
            pipeline.validate(AttachmentPurpose::DirectMessage, &clip),
            Err(SyncError::Validation(ValidationError::TooLarge { .. }))
        ));
    }
}
