//! In-Memory Artifact Store

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;
use uuid::Uuid;

use crate::artifacts::{object_key, ArtifactReader, ArtifactRef, ArtifactStore, StoreOptions};
use crate::errors::{ArtifactError, ArtifactResult};

const READ_CHUNK: usize = 8 * 1024;

/// In-memory artifact store
pub struct InMemoryArtifactStore {
    objects: RwLock<HashMap<String, (ArtifactRef, Vec<u8>)>>,
}

impl InMemoryArtifactStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn store(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        options: StoreOptions,
    ) -> ArtifactResult<ArtifactRef> {
        let mut content = Vec::new();
        let mut hasher = Sha256::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let read = reader
                .read(&mut chunk)
                .await
                .map_err(|e| ArtifactError::ConnectionFailed(anyhow::Error::new(e)))?;
            if read == 0 {
                break;
            }
            hasher.update(&chunk[..read]);
            content.extend_from_slice(&chunk[..read]);
        }

        let artifact = ArtifactRef {
            id: Uuid::now_v7().to_string(),
            name: options.name,
            size: content.len() as u64,
            content_type: options
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            checksum: Some(format!("{:x}", hasher.finalize())),
            metadata: options.metadata,
        };

        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.insert(object_key(&artifact.id), (artifact.clone(), content));

        debug!(artifact_id = %artifact.id, size = artifact.size, "stored artifact");
        Ok(artifact)
    }

    async fn retrieve(&self, artifact: &ArtifactRef) -> ArtifactResult<ArtifactReader> {
        artifact.validate()?;

        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        let (_, content) = objects
            .get(&object_key(&artifact.id))
            .ok_or_else(|| ArtifactError::ArtifactNotFound(artifact.id.clone()))?;

        Ok(Box::new(Cursor::new(content.clone())))
    }

    async fn delete(&self, artifact: &ArtifactRef) -> ArtifactResult<()> {
        artifact.validate()?;

        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects
            .remove(&object_key(&artifact.id))
            .map(|_| ())
            .ok_or_else(|| ArtifactError::ArtifactNotFound(artifact.id.clone()))
    }

    async fn exists(&self, artifact: &ArtifactRef) -> ArtifactResult<bool> {
        artifact.validate()?;

        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        Ok(objects.contains_key(&object_key(&artifact.id)))
    }

    async fn metadata(&self, artifact: &ArtifactRef) -> ArtifactResult<ArtifactRef> {
        artifact.validate()?;

        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(&object_key(&artifact.id))
            .map(|(stored, _)| stored.clone())
            .ok_or_else(|| ArtifactError::ArtifactNotFound(artifact.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // SHA-256 of "hello world"
    const HELLO_SHA256: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    #[tokio::test]
    async fn store_computes_size_and_checksum() {
        let store = InMemoryArtifactStore::new();
        let mut reader = Cursor::new(b"hello world".to_vec());

        let artifact = store
            .store(
                &mut reader,
                StoreOptions {
                    name: Some("greeting.txt".to_string()),
                    content_type: Some("text/plain".to_string()),
                    metadata: HashMap::from([("run_id".to_string(), "run-1".to_string())]),
                },
            )
            .await
            .unwrap();

        assert!(!artifact.id.is_empty());
        assert_eq!(artifact.size, 11);
        assert_eq!(artifact.checksum.as_deref(), Some(HELLO_SHA256));
        assert_eq!(artifact.content_type, "text/plain");
        assert_eq!(artifact.name.as_deref(), Some("greeting.txt"));
    }

    #[tokio::test]
    async fn retrieve_round_trips_content() {
        let store = InMemoryArtifactStore::new();
        let mut reader = Cursor::new(b"payload bytes".to_vec());
        let artifact = store
            .store(&mut reader, StoreOptions::default())
            .await
            .unwrap();

        let mut read_back = store.retrieve(&artifact).await.unwrap();
        let mut content = Vec::new();
        read_back.read_to_end(&mut content).await.unwrap();

        assert_eq!(content, b"payload bytes");
        assert_eq!(artifact.content_type, "application/octet-stream");
    }

    #[tokio::test]
    async fn exists_delete_metadata_lifecycle() {
        let store = InMemoryArtifactStore::new();
        let mut reader = Cursor::new(b"x".to_vec());
        let artifact = store
            .store(&mut reader, StoreOptions::default())
            .await
            .unwrap();

        assert!(store.exists(&artifact).await.unwrap());
        assert_eq!(store.metadata(&artifact).await.unwrap(), artifact);

        store.delete(&artifact).await.unwrap();
        assert!(!store.exists(&artifact).await.unwrap());
        assert!(matches!(
            store.metadata(&artifact).await,
            Err(ArtifactError::ArtifactNotFound(_))
        ));
        assert!(matches!(
            store.delete(&artifact).await,
            Err(ArtifactError::ArtifactNotFound(_))
        ));
    }

    #[tokio::test]
    async fn invalid_ref_is_rejected_before_lookup() {
        let store = InMemoryArtifactStore::new();
        let bogus = ArtifactRef {
            id: String::new(),
            name: None,
            size: 0,
            content_type: "text/plain".to_string(),
            checksum: None,
            metadata: HashMap::new(),
        };

        assert!(matches!(
            store.retrieve(&bogus).await,
            Err(ArtifactError::InvalidRef(_))
        ));
    }
}
