//! Per-tenant backend resolution.
//!
//! The router owns one [`BackendHandle`] per `(tenant, content_type)` pair, built lazily
//! from the tenant table in [`StorageSettings`] and kept until the tenant is invalidated
//! or the router is shut down.

use std::collections::{BTreeMap, HashMap};
use std::ops::Deref;
use std::sync::{Arc, PoisonError, RwLock};

use folio_core::StorageSettings;

use crate::cache::CacheStats;
use crate::factory::create_backend;
use crate::path::{validate_slug, StoragePath};
use crate::provision::{HierarchyProvisioner, ProvisionResult};
use crate::traits::{StorageBackend, StorageError, StorageResult};

/// A resolved backend together with the pair it was built for.
pub struct BackendHandle {
    key: String,
    tenant: String,
    content_type: String,
    backend: Arc<dyn StorageBackend>,
}

impl BackendHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }
}

impl Deref for BackendHandle {
    type Target = dyn StorageBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle")
            .field("key", &self.key)
            .field("kind", &self.backend.kind())
            .finish()
    }
}

pub struct StorageRouter {
    settings: StorageSettings,
    handles: RwLock<HashMap<String, Arc<BackendHandle>>>,
}

impl StorageRouter {
    pub fn new(settings: StorageSettings) -> Self {
        tracing::info!(
            tenants = settings.tenants.len(),
            chunk_size = settings.chunk_size,
            upload_concurrency = settings.upload_concurrency,
            "Storage router initialized"
        );
        Self {
            settings,
            handles: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &StorageSettings {
        &self.settings
    }

    fn handle_key(tenant: &str, content_type: &str) -> String {
        format!("{}:{}", tenant, content_type)
    }

    fn snapshot(&self) -> Vec<Arc<BackendHandle>> {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of live handles
    pub fn handle_count(&self) -> usize {
        self.handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Resolve the backend for a tenant's content type, building it on first use.
    ///
    /// Concurrent first calls for the same pair all receive the same handle; a backend
    /// built by a caller that lost the race is closed and discarded.
    pub async fn get_backend(
        &self,
        tenant: &str,
        content_type: &str,
    ) -> StorageResult<Arc<BackendHandle>> {
        validate_slug("tenant", tenant)?;
        validate_slug("content type", content_type)?;
        let key = Self::handle_key(tenant, content_type);

        if let Some(handle) = self
            .handles
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(handle.clone());
        }

        let config = self
            .settings
            .backend_for(tenant, content_type)
            .ok_or_else(|| {
                StorageError::ConfigError(format!("No storage configured for tenant {}", tenant))
            })?;

        let backend = create_backend(config, &self.settings).await.map_err(|e| {
            tracing::error!(error = %e, key = %key, "Failed to create storage backend");
            e
        })?;

        let handle = Arc::new(BackendHandle {
            key: key.clone(),
            tenant: tenant.to_string(),
            content_type: content_type.to_string(),
            backend,
        });

        let (winner, duplicate) = {
            let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
            match handles.get(&key) {
                Some(existing) => (existing.clone(), Some(handle)),
                None => {
                    handles.insert(key.clone(), handle.clone());
                    (handle, None)
                }
            }
        };

        match duplicate {
            Some(duplicate) => duplicate.close().await,
            None => tracing::info!(
                key = %key,
                kind = %winner.kind(),
                "Storage backend handle created"
            ),
        }

        Ok(winner)
    }

    /// Clear the existence caches of handles serving `content_type`, or of every handle.
    ///
    /// Returns the number of caches cleared.
    pub fn flush_directory_cache(&self, content_type: Option<&str>) -> usize {
        let mut flushed = 0;
        for handle in self.snapshot() {
            if content_type.is_some_and(|ct| ct != handle.content_type()) {
                continue;
            }
            if let Some(cache) = handle.directory_cache() {
                cache.clear();
                flushed += 1;
            }
        }
        tracing::info!(
            content_type = content_type.unwrap_or("*"),
            flushed,
            "Flushed directory caches"
        );
        flushed
    }

    /// Cache statistics keyed by handle key, for handles that keep a cache.
    pub fn get_cache_stats(&self) -> BTreeMap<String, CacheStats> {
        self.snapshot()
            .iter()
            .filter_map(|handle| {
                handle
                    .directory_cache()
                    .map(|cache| (handle.key().to_string(), cache.get_stats()))
            })
            .collect()
    }

    /// Public URL for a tenant-scoped path; the tenant is the first path segment.
    pub async fn get_public_url(&self, path: &str, content_type: &str) -> StorageResult<String> {
        let parsed = StoragePath::parse(path)?;
        let tenant = parsed
            .first_segment()
            .ok_or_else(|| StorageError::InvalidPath("path has no tenant segment".to_string()))?;
        let handle = self.get_backend(tenant, content_type).await?;
        handle.get_public_url(parsed.as_str())
    }

    /// Provision `categories` with the configured required subfolders.
    pub async fn provision_tenant(
        &self,
        tenant: &str,
        content_type: &str,
        categories: &[String],
    ) -> StorageResult<ProvisionResult> {
        let handle = self.get_backend(tenant, content_type).await?;
        handle
            .provision_hierarchy(tenant, categories, &self.settings.required_subfolders)
            .await
    }

    /// Create one order folder under `tenant/content_type`.
    pub async fn provision_order(
        &self,
        tenant: &str,
        content_type: &str,
        order: &str,
    ) -> StorageResult<ProvisionResult> {
        let handle = self.get_backend(tenant, content_type).await?;
        HierarchyProvisioner::new(handle.backend().as_ref())
            .provision_order(tenant, content_type, order, &self.settings.required_subfolders)
            .await
    }

    /// Add missing required subfolders to every existing order under `tenant/content_type`.
    pub async fn repair_orders(
        &self,
        tenant: &str,
        content_type: &str,
    ) -> StorageResult<ProvisionResult> {
        let handle = self.get_backend(tenant, content_type).await?;
        HierarchyProvisioner::new(handle.backend().as_ref())
            .repair_orders(tenant, content_type, &self.settings.required_subfolders)
            .await
    }

    /// Drop every handle of `tenant`, e.g. after its storage configuration changed.
    pub async fn invalidate_tenant(&self, tenant: &str) -> usize {
        let removed: Vec<Arc<BackendHandle>> = {
            let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
            let keys: Vec<String> = handles
                .values()
                .filter(|handle| handle.tenant() == tenant)
                .map(|handle| handle.key().to_string())
                .collect();
            keys.iter().filter_map(|key| handles.remove(key)).collect()
        };

        for handle in &removed {
            handle.close().await;
        }

        tracing::info!(tenant = %tenant, removed = removed.len(), "Invalidated tenant storage handles");
        removed.len()
    }

    /// Close and drop every handle.
    pub async fn shutdown(&self) {
        let handles: Vec<Arc<BackendHandle>> = self
            .handles
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();

        for handle in &handles {
            handle.close().await;
        }

        tracing::info!(closed = handles.len(), "Storage router shut down");
    }
}
