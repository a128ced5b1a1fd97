//! Managed temp directory for images pulled off the chat surface.

use std::{
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    anyhow::{Context, Result, bail},
    tokio::fs,
    tracing::{debug, warn},
};

/// Temp image store.
///
/// Files are named `{prefix}_{unix_ms}.png` so the periodic cleanup can
/// reason about age even on filesystems with coarse mtimes.
pub struct MediaStore {
    dir: PathBuf,
}

impl MediaStore {
    /// Use `dir`, or `<system tmp>/relais_images` when `None`.
    pub async fn new(dir: Option<PathBuf>) -> Result<Self> {
        let dir = dir.unwrap_or_else(|| std::env::temp_dir().join("relais_images"));
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve an inbound image source to a local file.
    ///
    /// A `data:` URL is decoded and saved into the store; anything else is
    /// treated as an already-local path and must exist.
    pub async fn acquire(&self, source: &str, prefix: &str) -> Result<PathBuf> {
        if source.starts_with("data:") {
            return self.save_data_url(source, prefix).await;
        }

        let path = PathBuf::from(source);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            bail!("image path does not exist: {}", path.display());
        }
        Ok(path)
    }

    /// Decode a `data:image/...;base64,...` URL into the store.
    pub async fn save_data_url(&self, data_url: &str, prefix: &str) -> Result<PathBuf> {
        use base64::Engine;

        let encoded = data_url
            .split_once("base64,")
            .map(|(_, rest)| rest)
            .context("data URL has no base64 payload")?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .context("invalid base64 in data URL")?;
        self.save_bytes(&bytes, prefix).await
    }

    /// Write raw image bytes to a fresh store file.
    pub async fn save_bytes(&self, bytes: &[u8], prefix: &str) -> Result<PathBuf> {
        let path = self.dir.join(format!("{prefix}_{}.png", unix_millis()));
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(path = %path.display(), bytes = bytes.len(), "saved image");
        Ok(path)
    }

    /// Delete store files older than `max_age`. Returns how many were removed.
    pub async fn cleanup_older_than(&self, max_age: Duration) -> Result<usize> {
        // An age larger than the epoch offset keeps everything.
        let cutoff = SystemTime::now()
            .checked_sub(max_age)
            .unwrap_or(UNIX_EPOCH);
        let mut removed = 0;

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(metadata) = entry.metadata().await else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified().unwrap_or(SystemTime::now());
            if modified <= cutoff {
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "cleanup failed"),
                }
            }
        }

        if removed > 0 {
            debug!(removed, "cleaned up temp images");
        }
        Ok(removed)
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use base64::Engine;

    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, 0x50, 0x4e, 0x47];

    async fn store(dir: &tempfile::TempDir) -> MediaStore {
        MediaStore::new(Some(dir.path().to_path_buf())).await.unwrap()
    }

    #[tokio::test]
    async fn data_url_is_decoded_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let encoded = base64::engine::general_purpose::STANDARD.encode(PNG_MAGIC);
        let url = format!("data:image/png;base64,{encoded}");
        let path = store.acquire(&url, "whatsapp").await.unwrap();

        assert!(path.starts_with(dir.path()));
        assert_eq!(std::fs::read(&path).unwrap(), PNG_MAGIC);
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("whatsapp_") && name.ends_with(".png"));
    }

    #[tokio::test]
    async fn local_path_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        let existing = dir.path().join("already_saved.png");
        std::fs::write(&existing, PNG_MAGIC).unwrap();

        let path = store
            .acquire(existing.to_str().unwrap(), "whatsapp")
            .await
            .unwrap();
        assert_eq!(path, existing);
    }

    #[tokio::test]
    async fn missing_path_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        assert!(store.acquire("/nope/missing.png", "whatsapp").await.is_err());
    }

    #[tokio::test]
    async fn malformed_data_url_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        assert!(store.acquire("data:image/png;base64,!!!", "x").await.is_err());
    }

    #[tokio::test]
    async fn cleanup_removes_aged_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;

        store.save_bytes(PNG_MAGIC, "old").await.unwrap();
        store.save_bytes(PNG_MAGIC, "older").await.unwrap();

        // Zero max age: everything qualifies.
        let removed = store.cleanup_older_than(Duration::ZERO).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn cleanup_with_huge_max_age_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.save_bytes(PNG_MAGIC, "keep").await.unwrap();

        // Larger than the epoch offset; must not panic and must not delete.
        let removed = store
            .cleanup_older_than(Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn cleanup_keeps_fresh_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir).await;
        store.save_bytes(PNG_MAGIC, "fresh").await.unwrap();

        let removed = store
            .cleanup_older_than(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
