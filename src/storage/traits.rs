//! Storage trait definitions

use crate::model::{ModelError, TimelineDocument};
use crate::provenance::ProvenanceTracker;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed timeline document: {0}")]
    Model(#[from] ModelError),

    #[error("Timeline not found: {0}")]
    NotFound(String),

    #[error("Invalid timeline name: {0}")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A timeline document together with its provenance record.
#[derive(Debug, Clone)]
pub struct StoredTimeline {
    pub document: TimelineDocument,
    /// Empty when no provenance record was saved alongside.
    pub provenance: ProvenanceTracker,
}

/// Trait for timeline storage backends
///
/// Implementations must be thread-safe (Send + Sync).
pub trait TimelineStore: Send + Sync {
    /// Save a document and its provenance under `name` (insert or replace)
    fn save(
        &self,
        name: &str,
        document: &TimelineDocument,
        provenance: &ProvenanceTracker,
    ) -> StorageResult<()>;

    /// Load a document and its provenance by name
    fn load(&self, name: &str) -> StorageResult<Option<StoredTimeline>>;

    /// Delete a document and its provenance
    fn delete(&self, name: &str) -> StorageResult<bool>;

    /// List stored timeline names
    fn list(&self) -> StorageResult<Vec<String>>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: TimelineStore + Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>) -> StorageResult<Self>;
}
