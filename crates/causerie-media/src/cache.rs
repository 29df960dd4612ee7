//! Disk cache for sent and received media, keyed by the remote content
//! reference.
//!
//! Writing happens right after an upload succeeds, independent of
//! message delivery, so the local view can render the file before the
//! remote echo round-trips.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::MediaError;

const MEDIA_CACHE_DIR: &str = "media";

#[derive(Debug, Clone)]
pub struct MediaCache {
    root: PathBuf,
}

impl MediaCache {
    pub async fn new(data_dir: &Path) -> Result<Self, MediaError> {
        let root = data_dir.join(MEDIA_CACHE_DIR);
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    /// Cache path for a remote reference. References are opaque URLs;
    /// hashing keeps the filename filesystem-safe.
    fn path_for(&self, reference: &str) -> PathBuf {
        let hash = blake3::hash(reference.as_bytes());
        self.root.join(hex::encode(hash.as_bytes()))
    }

    /// Copy an already-uploaded local file into the cache.
    pub async fn put_file(&self, reference: &str, source: &Path) -> Result<PathBuf, MediaError> {
        let dest = self.path_for(reference);
        tokio::fs::copy(source, &dest).await?;
        debug!(reference, path = %dest.display(), "Cached uploaded file");
        Ok(dest)
    }

    /// Store in-memory bytes (thumbnails) under a remote reference.
    pub async fn put_bytes(&self, reference: &str, bytes: &[u8]) -> Result<PathBuf, MediaError> {
        let dest = self.path_for(reference);
        tokio::fs::write(&dest, bytes).await?;
        debug!(reference, size = bytes.len(), "Cached media bytes");
        Ok(dest)
    }

    /// Cached file for a reference, if present.
    pub async fn get(&self, reference: &str) -> Option<PathBuf> {
        let path = self.path_for(reference);
        tokio::fs::try_exists(&path)
            .await
            .ok()
            .filter(|exists| *exists)
            .map(|_| path)
    }
}
