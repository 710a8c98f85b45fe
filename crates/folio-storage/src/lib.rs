//! Folio Storage Library
//!
//! This crate provides the storage abstraction used by every Folio service: the
//! [`StorageBackend`] trait, its local-disk, S3-compatible and cloud-drive
//! implementations, the chunked transfer engine, the directory existence cache,
//! the hierarchy provisioner and the per-tenant [`StorageRouter`].
//!
//! # Path format
//!
//! Paths are backend-agnostic and tenant-scoped: `{tenant}/{category}/{order}/{subfolder}/{file}`.
//! They must not contain `..` or a leading `/`; see [`StoragePath`].

pub mod cache;
pub mod factory;
#[cfg(feature = "storage-cloud-drive")]
pub mod cloud_drive;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod path;
pub mod provision;
pub mod router;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;
pub mod transfer;

// Re-export commonly used types
pub use cache::{CacheStats, CacheTrust, DirectoryExistenceCache};
#[cfg(feature = "storage-cloud-drive")]
pub use cloud_drive::CloudDriveBackend;
pub use factory::create_backend;
pub use folio_core::StorageKind;
#[cfg(feature = "storage-local")]
pub use local::LocalDiskBackend;
pub use path::StoragePath;
pub use provision::{CategoryProvision, FailedPath, HierarchyProvisioner, ProvisionResult};
pub use router::{BackendHandle, StorageRouter};
#[cfg(feature = "storage-s3")]
pub use s3::ObjectStoreBackend;
pub use traits::{StorageBackend, StorageError, StorageResult};
pub use transfer::{
    ChunkRange, ChunkedTransferEngine, DestinationLocks, TransferChunk, TransferSettings,
    TransferStats,
};
