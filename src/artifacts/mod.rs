//! Artifact Store Abstraction
//!
//! Opaque large payloads (transcripts, tool outputs, snapshots too big
//! for the event log) live behind this contract. Content is streamed to
//! the backend while size and a SHA-256 checksum are computed on the
//! way through; the returned reference is the only handle back.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;

use crate::errors::{ArtifactError, ArtifactResult};

pub mod memory;

pub use memory::InMemoryArtifactStore;

/// Reference to one stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Store-assigned identifier
    pub id: String,

    /// Caller-supplied display name, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Content size in bytes
    pub size: u64,

    /// MIME content type
    pub content_type: String,

    /// SHA-256 checksum of the content, lowercase hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    /// Caller-supplied metadata, persisted alongside the content
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl ArtifactRef {
    /// Validate the reference before use
    pub fn validate(&self) -> ArtifactResult<()> {
        if self.id.is_empty() {
            return Err(ArtifactError::InvalidRef(
                "artifact id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Options for storing an artifact
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Display name recorded on the reference
    pub name: Option<String>,

    /// MIME content type; defaults to `application/octet-stream`
    pub content_type: Option<String>,

    /// Metadata persisted alongside the content
    pub metadata: HashMap<String, String>,
}

/// Deterministic object key an artifact is stored under
pub fn object_key(id: &str) -> String {
    format!("artifacts/{id}")
}

/// Reader type returned by [`ArtifactStore::retrieve`]
pub type ArtifactReader = Box<dyn AsyncRead + Unpin + Send>;

/// Artifact store contract
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stream content into the store
    ///
    /// Size and checksum are computed while the content streams through;
    /// the returned reference carries both.
    async fn store(
        &self,
        reader: &mut (dyn AsyncRead + Unpin + Send),
        options: StoreOptions,
    ) -> ArtifactResult<ArtifactRef>;

    /// Open the content for reading, or `ArtifactNotFound`
    async fn retrieve(&self, artifact: &ArtifactRef) -> ArtifactResult<ArtifactReader>;

    /// Remove the artifact, or `ArtifactNotFound`
    async fn delete(&self, artifact: &ArtifactRef) -> ArtifactResult<()>;

    /// Whether the artifact exists
    async fn exists(&self, artifact: &ArtifactRef) -> ArtifactResult<bool>;

    /// Fetch the stored reference (size, checksum, metadata), or
    /// `ArtifactNotFound`
    async fn metadata(&self, artifact: &ArtifactRef) -> ArtifactResult<ArtifactRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_are_deterministic() {
        assert_eq!(object_key("abc"), "artifacts/abc");
        assert_eq!(object_key("abc"), object_key("abc"));
    }

    #[test]
    fn empty_id_fails_validation() {
        let artifact = ArtifactRef {
            id: String::new(),
            name: None,
            size: 0,
            content_type: "text/plain".to_string(),
            checksum: None,
            metadata: HashMap::new(),
        };
        assert!(matches!(
            artifact.validate(),
            Err(ArtifactError::InvalidRef(_))
        ));
    }
}
