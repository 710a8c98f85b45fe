//! Folio Core Library
//!
//! This crate provides the configuration, constants and shared enums consumed by the
//! storage layer and the operator binaries.

pub mod config;
pub mod constants;
pub mod storage_types;

// Re-export commonly used types
pub use config::{
    BackendConfig, CloudDriveConfig, LocalDiskConfig, ObjectStoreConfig, StorageSettings,
    TenantStorageConfig,
};
pub use storage_types::StorageKind;
