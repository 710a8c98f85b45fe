#[cfg(feature = "storage-cloud-drive")]
use crate::CloudDriveBackend;
#[cfg(feature = "storage-local")]
use crate::LocalDiskBackend;
#[cfg(feature = "storage-s3")]
use crate::ObjectStoreBackend;
use crate::{StorageBackend, StorageError, StorageResult};
use folio_core::{BackendConfig, StorageSettings};
use std::sync::Arc;

/// Create a storage backend from a tenant's backend configuration
pub async fn create_backend(
    config: &BackendConfig,
    settings: &StorageSettings,
) -> StorageResult<Arc<dyn StorageBackend>> {
    config
        .validate()
        .map_err(|e| StorageError::ConfigError(e.to_string()))?;

    match config {
        #[cfg(feature = "storage-s3")]
        BackendConfig::ObjectStore(object_store) => {
            let storage = ObjectStoreBackend::new(object_store, settings).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-s3"))]
        BackendConfig::ObjectStore(_) => Err(StorageError::ConfigError(
            "Object store backend not available (storage-s3 feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-local")]
        BackendConfig::Local(local) => {
            let storage =
                LocalDiskBackend::new(local.root.clone(), local.public_base_url.clone()).await?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-local"))]
        BackendConfig::Local(_) => Err(StorageError::ConfigError(
            "Local storage backend not available (storage-local feature not enabled)".to_string(),
        )),

        #[cfg(feature = "storage-cloud-drive")]
        BackendConfig::CloudDrive(drive) => {
            let storage = CloudDriveBackend::new(drive, settings)?;
            Ok(Arc::new(storage))
        }

        #[cfg(not(feature = "storage-cloud-drive"))]
        BackendConfig::CloudDrive(_) => Err(StorageError::ConfigError(
            "Cloud drive backend not available (storage-cloud-drive feature not enabled)"
                .to_string(),
        )),
    }
}

#[cfg(all(test, feature = "storage-local"))]
mod tests {
    use super::*;
    use crate::StorageKind;
    use folio_core::LocalDiskConfig;

    #[tokio::test]
    async fn test_creates_local_backend() {
        let dir = tempfile::tempdir().unwrap();
        let config = BackendConfig::Local(LocalDiskConfig {
            root: dir.path().join("media"),
            public_base_url: "http://localhost:4000/media".to_string(),
        });

        let backend = create_backend(&config, &StorageSettings::default())
            .await
            .unwrap();
        assert_eq!(backend.kind(), StorageKind::Local);
        assert!(dir.path().join("media").is_dir());
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_before_construction() {
        let config = BackendConfig::Local(LocalDiskConfig {
            root: std::path::PathBuf::new(),
            public_base_url: "http://localhost:4000/media".to_string(),
        });

        let result = create_backend(&config, &StorageSettings::default()).await;
        assert!(matches!(result, Err(StorageError::ConfigError(_))));
    }
}
