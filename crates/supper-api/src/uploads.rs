use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

pub const DEFAULT_BUCKET: &str = "uploads";
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 1024 * 1024;

/// Filesystem upload provider.
///
/// Objects live at `{base_dir}/{bucket}/{kind}/{entity_id}/{filename}`; the
/// part after `base_dir` is the object key handed back to callers.
#[derive(Debug, Clone)]
pub struct UploadManager {
    base_dir: PathBuf,
    bucket: String,
    max_size: usize,
}

impl UploadManager {
    pub fn new(base_dir: impl Into<PathBuf>, bucket: impl Into<String>, max_size: usize) -> Self {
        Self { base_dir: base_dir.into(), bucket: bucket.into(), max_size }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn key(&self, kind: &str, entity_id: &str, filename: &str) -> String {
        format!("{}/{}/{}/{}", self.bucket, kind, sanitize(entity_id), sanitize(filename))
    }

    /// Writes `bytes` and returns the object key. An existing object under
    /// the same key is replaced.
    pub async fn save(&self, kind: &str, entity_id: &str, filename: &str, bytes: &[u8]) -> Result<String> {
        if bytes.len() > self.max_size {
            anyhow::bail!("upload of {} bytes exceeds the {} byte limit", bytes.len(), self.max_size);
        }
        let key = self.key(kind, entity_id, filename);
        let path = self.base_dir.join(&key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write beside the target, then rename, so readers never see half a file.
        let staging = path.with_extension("partial");
        let mut file = fs::File::create(&staging).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);
        if let Err(e) = fs::rename(&staging, &path).await {
            warn!("could not move upload into place at {}: {}", path.display(), e);
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }

        info!(key = %key, size = bytes.len(), "stored upload");
        Ok(key)
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>> {
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            anyhow::bail!("invalid object key");
        }
        Ok(fs::read(self.base_dir.join(key)).await?)
    }
}

/// Keeps a single safe path component: no separators, no leading dots.
fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() { "_".to_string() } else { trimmed.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cannot_escape_their_directory() {
        let uploads = UploadManager::new("/srv", "bucket", 10);
        assert_eq!(uploads.key("avatars", "u1", "me.png"), "bucket/avatars/u1/me.png");
        assert_eq!(uploads.key("avatars", "u1", "../../etc/passwd"), "bucket/avatars/u1/_.._etc_passwd");
        assert_eq!(uploads.key("avatars", "..", ".hidden"), "bucket/avatars/_/hidden");
    }

    #[tokio::test]
    async fn saves_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = UploadManager::new(dir.path(), "bucket", 16);

        let key = uploads.save("avatars", "u1", "avatar.png", b"png bytes").await.unwrap();
        assert_eq!(key, "bucket/avatars/u1/avatar.png");
        assert_eq!(uploads.read(&key).await.unwrap(), b"png bytes");

        assert!(uploads.save("avatars", "u1", "big.png", &[0u8; 17]).await.is_err());
        assert!(uploads.read("bucket/../secret").await.is_err());
    }
}
