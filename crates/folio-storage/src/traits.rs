//! Storage abstraction trait
//!
//! This module defines the StorageBackend trait that all storage backends must implement.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::cache::DirectoryExistenceCache;
use crate::provision::{HierarchyProvisioner, ProvisionResult};
use crate::StorageKind;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Chunk transfer failed at offset {offset} (length {length}): {reason}")]
    Transfer {
        offset: u64,
        length: u64,
        reason: String,
    },

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage abstraction trait
///
/// All storage backends (local disk, S3-compatible, cloud drive) implement this trait.
/// Callers hold an `Arc<dyn StorageBackend>` (usually through the router) and never
/// name a concrete backend type.
///
/// Every path argument is validated as a [`crate::StoragePath`] before any I/O.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Get the storage backend type
    fn kind(&self) -> StorageKind;

    /// Create a directory and any missing parents.
    ///
    /// Idempotent: returns `true` whether the directory was created or already existed.
    async fn create_directory(&self, path: &str) -> StorageResult<bool>;

    /// Check whether a directory exists. Remote backends may answer from their cache.
    async fn directory_exists(&self, path: &str) -> StorageResult<bool>;

    /// List the names of the immediate subdirectories of `path`, sorted.
    ///
    /// Files are excluded. A missing `path` yields an empty list.
    async fn list_directories(&self, path: &str) -> StorageResult<Vec<String>>;

    /// Upload an object and return its public URL.
    ///
    /// Payloads above the configured chunk size go through the chunked transfer engine.
    async fn upload_object(&self, data: Bytes, dest: &str) -> StorageResult<String>;

    /// Download an object by its path
    async fn download_object(&self, src: &str) -> StorageResult<Bytes>;

    /// Check if an object exists
    async fn object_exists(&self, path: &str) -> StorageResult<bool>;

    /// Delete an object. Returns `false` when nothing existed at `path`.
    async fn delete_object(&self, path: &str) -> StorageResult<bool>;

    /// Public URL for `path`. Pure: no I/O is performed.
    fn get_public_url(&self, path: &str) -> StorageResult<String>;

    /// The directory existence cache, for backends that keep one.
    fn directory_cache(&self) -> Option<&DirectoryExistenceCache> {
        None
    }

    /// Create `{tenant}/{category}` and its required subfolders for every category.
    ///
    /// Per-category failures are reported in [`ProvisionResult::failed_paths`]; an error is
    /// returned only when provisioning cannot start (invalid tenant slug).
    async fn provision_hierarchy(
        &self,
        tenant: &str,
        categories: &[String],
        subfolders: &[String],
    ) -> StorageResult<ProvisionResult> {
        HierarchyProvisioner::new(self)
            .provision(tenant, categories, subfolders)
            .await
    }

    /// Release session state. Called once when the owning handle is torn down.
    async fn close(&self) {}
}
