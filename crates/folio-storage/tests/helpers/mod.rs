#![allow(dead_code)]

use std::path::PathBuf;

use folio_core::{BackendConfig, LocalDiskConfig, ObjectStoreConfig, StorageSettings, TenantStorageConfig};
use tempfile::TempDir;

pub const BASE_URL: &str = "http://localhost:4000/media";

/// Temporary local storage root for one test.
pub struct TestStorage {
    pub temp_dir: TempDir,
    pub base_path: PathBuf,
    pub base_url: String,
}

impl TestStorage {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let base_path = temp_dir.path().to_path_buf();
        Self {
            temp_dir,
            base_path,
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn local_config(&self) -> BackendConfig {
        BackendConfig::Local(LocalDiskConfig {
            root: self.base_path.clone(),
            public_base_url: self.base_url.clone(),
        })
    }

    /// Settings with `acme` on local disk and its `videos` on an object store.
    pub fn settings(&self) -> StorageSettings {
        let mut tenant = TenantStorageConfig::new(self.local_config());
        tenant.overrides.insert(
            "videos".to_string(),
            BackendConfig::ObjectStore(ObjectStoreConfig {
                bucket: "acme-videos".to_string(),
                region: Some("eu-west-1".to_string()),
                endpoint: Some("http://localhost:9000".to_string()),
                prefix: None,
                public_base_url: None,
            }),
        );
        StorageSettings::default().with_tenant("acme", tenant)
    }
}

impl Default for TestStorage {
    fn default() -> Self {
        Self::new()
    }
}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}
