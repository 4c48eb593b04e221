//! Blob store: one file per key under a root directory.

use std::path::PathBuf;

use async_trait::async_trait;
use pipeline::{BlobKey, BlobSink, SinkWriteError};
use tracing::{debug, instrument};

use crate::fs::write_atomic;

/// Filesystem-backed [`BlobSink`].
///
/// A key's `/`-separated segments become directories under the root.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Creates a store rooted at `root`. The directory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolves `key` to a path below the root.
    ///
    /// # Errors
    ///
    /// Returns [`SinkWriteError::InvalidKey`] for absolute keys, empty
    /// segments, `.`/`..` segments, backslashes, and NUL bytes.
    pub fn path_for(&self, key: &BlobKey) -> Result<PathBuf, SinkWriteError> {
        let raw = key.as_str();
        let invalid = |reason: &str| SinkWriteError::InvalidKey {
            key: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.starts_with('/') {
            return Err(invalid("key must be relative"));
        }
        if raw.contains('\\') || raw.contains('\0') {
            return Err(invalid("key contains a backslash or NUL byte"));
        }

        let mut path = self.root.clone();
        for segment in raw.split('/') {
            match segment {
                "" => return Err(invalid("key contains an empty segment")),
                "." | ".." => return Err(invalid("key contains a relative segment")),
                s => path.push(s),
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl BlobSink for FsBlobStore {
    #[instrument(skip_all, fields(key = %key, bytes = content.len()))]
    async fn put(&self, key: &BlobKey, content: &[u8]) -> Result<(), SinkWriteError> {
        let path = self.path_for(key)?;
        write_atomic(&path, content).await?;
        debug!(path = %path.display(), "blob written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: &str) -> BlobKey {
        BlobKey::new(value).unwrap()
    }

    #[tokio::test]
    async fn test_put_writes_under_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store
            .put(&key("archive/abc123-20240506-070809-output.json"), b"{\"id\":\"abc123\"}")
            .await
            .unwrap();

        let written =
            std::fs::read(dir.path().join("archive/abc123-20240506-070809-output.json")).unwrap();
        assert_eq!(written, b"{\"id\":\"abc123\"}");
    }

    #[tokio::test]
    async fn test_put_same_key_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put(&key("archive/x.json"), b"old").await.unwrap();
        store.put(&key("archive/x.json"), b"new").await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("archive/x.json")).unwrap(), b"new");
    }

    #[test]
    fn test_unsafe_keys_rejected() {
        let store = FsBlobStore::new("/srv/archive");
        for bad in ["/etc/passwd", "archive/../../x", "archive//x", "./x", "a\\b"] {
            assert!(
                matches!(store.path_for(&key(bad)), Err(SinkWriteError::InvalidKey { .. })),
                "{bad} should be rejected"
            );
        }
        assert_eq!(
            store.path_for(&key("archive/a.json")).unwrap(),
            PathBuf::from("/srv/archive/archive/a.json")
        );
    }
}
