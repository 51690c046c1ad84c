use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob write token is not configured")]
    NotConfigured,

    #[error("invalid blob path '{0}'")]
    InvalidPath(String),

    #[error("blob '{0}' already exists")]
    Exists(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Public blob storage on local disk.
///
/// Each blob is stored at `{dir}/{path}` and served back from
/// `{public_url}/blobs/{path}`. Writes need the write token; without it the
/// store is read-only and uploads fail with [`BlobError::NotConfigured`].
pub struct BlobStore {
    dir: PathBuf,
    public_url: String,
    write_token: Option<String>,
}

impl BlobStore {
    pub async fn new(dir: PathBuf, public_url: &str, write_token: Option<String>) -> anyhow::Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob storage directory: {}", dir.display());
        let write_token = write_token.filter(|t| !t.trim().is_empty());
        if write_token.is_none() {
            warn!("BLOB_READ_WRITE_TOKEN is not set; uploads will be rejected");
        }
        Ok(Self {
            dir,
            public_url: public_url.trim_end_matches('/').to_string(),
            write_token,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_writable(&self) -> bool {
        self.write_token.is_some()
    }

    /// Relative path made only of plain segments: no `..`, no roots, no
    /// hidden files.
    pub fn sanitize(path: &str) -> Result<PathBuf, BlobError> {
        let invalid = || BlobError::InvalidPath(path.to_string());
        let rel = Path::new(path);
        if path.is_empty() || path.contains('\\') || path.len() > 512 {
            return Err(invalid());
        }

        let mut clean = PathBuf::new();
        for component in rel.components() {
            let Component::Normal(part) = component else {
                return Err(invalid());
            };
            let part = part.to_str().ok_or_else(invalid)?;
            let allowed = part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if part.starts_with('.') || !allowed {
                return Err(invalid());
            }
            clean.push(part);
        }
        if clean.as_os_str().is_empty() {
            return Err(invalid());
        }
        Ok(clean)
    }

    pub fn public_url(&self, rel: &Path) -> String {
        let segments: Vec<&str> = rel.iter().filter_map(|s| s.to_str()).collect();
        format!("{}/blobs/{}", self.public_url, segments.join("/"))
    }

    /// Store `data` at `path` and return its public URL.
    pub async fn put(&self, path: &str, data: &[u8]) -> Result<String, BlobError> {
        if self.write_token.is_none() {
            return Err(BlobError::NotConfigured);
        }
        let rel = Self::sanitize(path)?;
        let full = self.dir.join(&rel);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write-once: an existing blob is never replaced.
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&full)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(BlobError::Exists(path.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        file.write_all(data).await?;
        file.flush().await?;

        info!("Stored blob {} ({} bytes)", rel.display(), data.len());
        Ok(self.public_url(&rel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_escaping_paths() {
        for bad in ["../etc/passwd", "/abs/path", "posts/../../x", "posts/.hidden", "", "a\\b", "posts/a b.png"] {
            assert!(BlobStore::sanitize(bad).is_err(), "accepted {:?}", bad);
        }
        assert_eq!(
            BlobStore::sanitize("posts/u1/abc.png").unwrap(),
            PathBuf::from("posts/u1/abc.png")
        );
    }

    #[tokio::test]
    async fn put_writes_under_dir_and_returns_public_url() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::new(tmp.path().to_path_buf(), "http://cdn.test/", Some("t".into()))
            .await
            .unwrap();

        let url = store.put("dm/u1/pic.png", b"png-bytes").await.unwrap();
        assert_eq!(url, "http://cdn.test/blobs/dm/u1/pic.png");
        let stored = tokio::fs::read(tmp.path().join("dm/u1/pic.png")).await.unwrap();
        assert_eq!(stored, b"png-bytes");
    }

    #[tokio::test]
    async fn writes_need_the_token() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::new(tmp.path().to_path_buf(), "http://cdn.test", None)
            .await
            .unwrap();
        assert!(!store.is_writable());
        assert!(matches!(
            store.put("posts/u/x.png", b"x").await,
            Err(BlobError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn blank_token_is_treated_as_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::new(tmp.path().to_path_buf(), "http://cdn.test", Some("  ".into()))
            .await
            .unwrap();
        assert!(!store.is_writable());
    }

    #[tokio::test]
    async fn existing_blob_is_not_overwritten() {
        let tmp = tempfile::tempdir().unwrap();
        let store = BlobStore::new(tmp.path().to_path_buf(), "http://cdn.test", Some("t".into()))
            .await
            .unwrap();

        store.put("avatars/victim/me.png", b"victim").await.unwrap();
        assert!(matches!(
            store.put("avatars/victim/me.png", b"attacker").await,
            Err(BlobError::Exists(_))
        ));
        let stored = tokio::fs::read(tmp.path().join("avatars/victim/me.png")).await.unwrap();
        assert_eq!(stored, b"victim");
    }
}
