//! Configuration module
//!
//! Global transfer/cache defaults come from the environment; the per-tenant backend
//! table is a JSON document named by `STORAGE_TENANTS_FILE`.
//!
//! ```json
//! {
//!   "acme": {
//!     "backend": { "storage_type": "local", "root": "/var/lib/folio", "public_base_url": "http://localhost:4000/media" },
//!     "overrides": {
//!       "videos": { "storage_type": "object_store", "bucket": "acme-videos", "region": "eu-west-1" }
//!     }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL_SECONDS, DEFAULT_CHUNK_MAX_ATTEMPTS,
    DEFAULT_CHUNK_SIZE_MB, DEFAULT_CHUNK_TIMEOUT_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
    DEFAULT_UPLOAD_CONCURRENCY, REQUIRED_SUBFOLDERS,
};
use crate::storage_types::StorageKind;

/// Local filesystem backend settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDiskConfig {
    pub root: PathBuf,
    pub public_base_url: String,
}

/// S3-compatible object store settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, DigitalOcean Spaces, etc.)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Key prefix every path is stored under
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub public_base_url: Option<String>,
}

/// OAuth cloud-drive settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudDriveConfig {
    /// Drive API base, e.g. `https://graph.microsoft.com/v1.0/me/drive`
    pub api_base: String,
    /// Folder inside the drive that holds all tenant trees
    #[serde(default)]
    pub root_folder: Option<String>,
    /// Name of the environment variable holding the access token
    pub access_token_env: String,
    pub public_base_url: String,
}

/// Backend selection for one tenant (or one tenant content type)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storage_type", rename_all = "snake_case")]
pub enum BackendConfig {
    Local(LocalDiskConfig),
    ObjectStore(ObjectStoreConfig),
    CloudDrive(CloudDriveConfig),
}

impl BackendConfig {
    pub fn kind(&self) -> StorageKind {
        match self {
            BackendConfig::Local(_) => StorageKind::Local,
            BackendConfig::ObjectStore(_) => StorageKind::ObjectStore,
            BackendConfig::CloudDrive(_) => StorageKind::CloudDrive,
        }
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        match self {
            BackendConfig::Local(local) => {
                if local.root.as_os_str().is_empty() {
                    return Err(anyhow::anyhow!("local backend requires a root directory"));
                }
            }
            BackendConfig::ObjectStore(store) => {
                if store.bucket.trim().is_empty() {
                    return Err(anyhow::anyhow!("object_store backend requires a bucket"));
                }
            }
            BackendConfig::CloudDrive(drive) => {
                if !drive.api_base.starts_with("http://") && !drive.api_base.starts_with("https://") {
                    return Err(anyhow::anyhow!(
                        "cloud_drive api_base must be an http(s) URL, got {}",
                        drive.api_base
                    ));
                }
                if drive.access_token_env.trim().is_empty() {
                    return Err(anyhow::anyhow!(
                        "cloud_drive backend requires access_token_env"
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Storage configuration of a single tenant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantStorageConfig {
    pub backend: BackendConfig,
    /// Per content-type overrides (e.g. videos on an object store, portraits on a drive)
    #[serde(default)]
    pub overrides: HashMap<String, BackendConfig>,
}

impl TenantStorageConfig {
    pub fn new(backend: BackendConfig) -> Self {
        Self {
            backend,
            overrides: HashMap::new(),
        }
    }

    pub fn backend_for(&self, content_type: &str) -> &BackendConfig {
        self.overrides.get(content_type).unwrap_or(&self.backend)
    }
}

/// Global storage settings plus the tenant table
#[derive(Clone, Debug)]
pub struct StorageSettings {
    pub chunk_size: usize,
    pub upload_concurrency: usize,
    pub chunk_timeout_secs: u64,
    pub chunk_max_attempts: u32,
    pub request_timeout_secs: u64,
    pub cache_ttl_seconds: u64,
    pub cache_max_entries: usize,
    pub required_subfolders: Vec<String>,
    pub tenants: HashMap<String, TenantStorageConfig>,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE_MB * 1024 * 1024,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            chunk_timeout_secs: DEFAULT_CHUNK_TIMEOUT_SECS,
            chunk_max_attempts: DEFAULT_CHUNK_MAX_ATTEMPTS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECONDS,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            required_subfolders: REQUIRED_SUBFOLDERS.iter().map(|s| s.to_string()).collect(),
            tenants: HashMap::new(),
        }
    }
}

impl StorageSettings {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let chunk_size_mb = lookup("STORAGE_CHUNK_SIZE_MB")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_CHUNK_SIZE_MB);
        let chunk_size = chunk_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            anyhow::anyhow!("STORAGE_CHUNK_SIZE_MB is too large: {}", chunk_size_mb)
        })?;

        let required_subfolders = lookup("STORAGE_REQUIRED_SUBFOLDERS")
            .map(|s| {
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.required_subfolders);

        let tenants = match lookup("STORAGE_TENANTS_FILE").filter(|s| !s.is_empty()) {
            Some(path) => load_tenants(Path::new(&path))?,
            None => HashMap::new(),
        };

        let settings = StorageSettings {
            chunk_size,
            upload_concurrency: lookup("STORAGE_UPLOAD_CONCURRENCY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_UPLOAD_CONCURRENCY),
            chunk_timeout_secs: lookup("STORAGE_CHUNK_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CHUNK_TIMEOUT_SECS),
            chunk_max_attempts: lookup("STORAGE_CHUNK_MAX_ATTEMPTS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CHUNK_MAX_ATTEMPTS),
            request_timeout_secs: lookup("STORAGE_REQUEST_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            cache_ttl_seconds: lookup("STORAGE_CACHE_TTL_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_TTL_SECONDS),
            cache_max_entries: lookup("STORAGE_CACHE_MAX_ENTRIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
            required_subfolders,
            tenants,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.chunk_size == 0 {
            return Err(anyhow::anyhow!("STORAGE_CHUNK_SIZE_MB must be greater than zero"));
        }
        if self.upload_concurrency == 0 {
            return Err(anyhow::anyhow!(
                "STORAGE_UPLOAD_CONCURRENCY must be greater than zero"
            ));
        }
        if self.chunk_max_attempts == 0 {
            return Err(anyhow::anyhow!(
                "STORAGE_CHUNK_MAX_ATTEMPTS must be greater than zero"
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(anyhow::anyhow!(
                "STORAGE_CACHE_MAX_ENTRIES must be greater than zero"
            ));
        }

        for (tenant, config) in &self.tenants {
            config
                .backend
                .validate()
                .with_context(|| format!("invalid storage config for tenant {}", tenant))?;
            for (content_type, backend) in &config.overrides {
                backend.validate().with_context(|| {
                    format!(
                        "invalid storage override for tenant {} content type {}",
                        tenant, content_type
                    )
                })?;
            }
        }

        Ok(())
    }

    /// Resolve the backend configured for a tenant and content type.
    pub fn backend_for(&self, tenant: &str, content_type: &str) -> Option<&BackendConfig> {
        self.tenants
            .get(tenant)
            .map(|config| config.backend_for(content_type))
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>, config: TenantStorageConfig) -> Self {
        self.tenants.insert(tenant.into(), config);
        self
    }
}

/// Load the tenant table from a JSON file.
pub fn load_tenants(path: &Path) -> Result<HashMap<String, TenantStorageConfig>, anyhow::Error> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read tenants file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse tenants file {}", path.display()))
}
