//! Byte-blob backend contract.
//!
//! Keys are opaque strings; directory scoping is a constructor parameter,
//! with every key prefixed by a configured root and transparent to callers.

use async_trait::async_trait;
use batchflow_core::BackendError;

/// Minimal byte-blob capability a task or typed object storage consumes.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Write `bytes` under `key`, overwriting any existing value.
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<(), BackendError>;

    /// Read the bytes stored under `key`.
    async fn download(&self, key: &str) -> Result<Vec<u8>, BackendError>;

    /// Whether `key` currently has a value.
    async fn check_exists(&self, key: &str) -> Result<bool, BackendError>;

    /// Remove `key`. Idempotent: dropping a key that does not exist is not
    /// an error.
    async fn drop_file(&self, key: &str) -> Result<(), BackendError>;
}

/// A `FileSystem` rooted at a directory on the local disk.
pub struct LocalFileSystem {
    root: std::path::PathBuf,
}

impl LocalFileSystem {
    /// Creates the root directory if it does not already exist.
    pub async fn new(root: impl Into<std::path::PathBuf>) -> Result<Self, BackendError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| BackendError::Io {
                key: root.display().to_string(),
                source,
            })?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> std::path::PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<(), BackendError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| BackendError::Io {
                    key: key.to_string(),
                    source,
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| BackendError::Io {
                key: key.to_string(),
                source,
            })
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        tokio::fs::read(self.path_for(key))
            .await
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::NotFound => BackendError::NotFound {
                    key: key.to_string(),
                },
                _ => BackendError::Io {
                    key: key.to_string(),
                    source,
                },
            })
    }

    async fn check_exists(&self, key: &str) -> Result<bool, BackendError> {
        Ok(tokio::fs::try_exists(self.path_for(key))
            .await
            .map_err(|source| BackendError::Io {
                key: key.to_string(),
                source,
            })?)
    }

    async fn drop_file(&self, key: &str) -> Result<(), BackendError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BackendError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path()).await.unwrap();
        assert!(!fs.check_exists("a").await.unwrap());
        fs.upload("a", b"hello".to_vec()).await.unwrap();
        assert!(fs.check_exists("a").await.unwrap());
        assert_eq!(fs.download("a").await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn drop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path()).await.unwrap();
        fs.drop_file("missing").await.unwrap();
        fs.upload("a", b"x".to_vec()).await.unwrap();
        fs.drop_file("a").await.unwrap();
        fs.drop_file("a").await.unwrap();
        assert!(!fs.check_exists("a").await.unwrap());
    }

    #[tokio::test]
    async fn missing_download_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let fs = LocalFileSystem::new(dir.path()).await.unwrap();
        let err = fs.download("nope").await.unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }
}
