//! Tenant folder hierarchy provisioning.
//!
//! Builds `{tenant}/{category}/{subfolder}` trees (and the order-level variant
//! `{tenant}/{category}/{order}/{subfolder}`) on any [`StorageBackend`]. A failing
//! branch is recorded in the result and never stops its siblings.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::path::{validate_slug, StoragePath};
use crate::traits::{StorageBackend, StorageError, StorageResult};

/// A path that could not be created, with the category (or `category/order`) it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedPath {
    pub category: String,
    pub path: String,
    pub error: String,
}

/// Outcome for one provisioned branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryProvision {
    pub success: bool,
    pub base_path: String,
    /// Subfolders confirmed present, in creation order.
    pub subfolders: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionResult {
    pub success: bool,
    pub tenant: String,
    pub categories_provisioned: usize,
    pub hierarchy: BTreeMap<String, CategoryProvision>,
    pub failed_paths: Vec<FailedPath>,
}

impl ProvisionResult {
    fn new(tenant: &str) -> Self {
        Self {
            success: true,
            tenant: tenant.to_string(),
            categories_provisioned: 0,
            hierarchy: BTreeMap::new(),
            failed_paths: Vec::new(),
        }
    }

    fn record(
        &mut self,
        key: &str,
        base_path: String,
        subfolders: Vec<String>,
        outcome: Result<(), (String, StorageError)>,
    ) {
        self.categories_provisioned += 1;
        let error = match outcome {
            Ok(()) => None,
            Err((path, e)) => {
                tracing::warn!(
                    tenant = %self.tenant,
                    category = %key,
                    path = %path,
                    error = %e,
                    "Failed to provision folder, continuing with remaining categories"
                );
                self.failed_paths.push(FailedPath {
                    category: key.to_string(),
                    path,
                    error: e.to_string(),
                });
                Some(e.to_string())
            }
        };
        self.hierarchy.insert(
            key.to_string(),
            CategoryProvision {
                success: error.is_none(),
                base_path,
                subfolders,
                error,
            },
        );
    }

    fn finish(mut self) -> Self {
        self.success = self.failed_paths.is_empty();
        tracing::info!(
            tenant = %self.tenant,
            categories = self.categories_provisioned,
            failed = self.failed_paths.len(),
            success = self.success,
            "Hierarchy provisioning finished"
        );
        self
    }
}

/// Drives folder creation against a single backend.
pub struct HierarchyProvisioner<'a, B: StorageBackend + ?Sized> {
    backend: &'a B,
}

impl<'a, B: StorageBackend + ?Sized> HierarchyProvisioner<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Create `tenant/category` plus every subfolder, for each category in order.
    ///
    /// Fails only on an invalid tenant slug. Invalid category slugs and backend errors
    /// are reported per category.
    pub async fn provision(
        &self,
        tenant: &str,
        categories: &[String],
        subfolders: &[String],
    ) -> StorageResult<ProvisionResult> {
        validate_slug("tenant", tenant)?;
        let tenant_path = StoragePath::root().join(tenant)?;
        let mut result = ProvisionResult::new(tenant);

        for category in categories {
            let mut created = Vec::new();
            let outcome = self
                .create_branch(&tenant_path, category, subfolders, &mut created)
                .await;
            result.record(
                category,
                join_display(&tenant_path, category),
                created,
                outcome,
            );
        }

        Ok(result.finish())
    }

    /// Create a single order folder `tenant/category/order` with its subfolders.
    ///
    /// The branch is keyed `category/order` in the result.
    pub async fn provision_order(
        &self,
        tenant: &str,
        category: &str,
        order: &str,
        subfolders: &[String],
    ) -> StorageResult<ProvisionResult> {
        validate_slug("tenant", tenant)?;
        validate_slug("category", category)?;
        let category_path = StoragePath::root().join(tenant)?.join(category)?;
        let mut result = ProvisionResult::new(tenant);

        let mut created = Vec::new();
        let outcome = self
            .create_branch(&category_path, order, subfolders, &mut created)
            .await;
        result.record(
            &format!("{}/{}", category, order),
            join_display(&category_path, order),
            created,
            outcome,
        );

        Ok(result.finish())
    }

    /// Ensure every existing order folder under `tenant/category` has all subfolders.
    ///
    /// Directories named like a required subfolder are not orders and are skipped. A
    /// missing category folder means there is nothing to repair.
    pub async fn repair_orders(
        &self,
        tenant: &str,
        category: &str,
        subfolders: &[String],
    ) -> StorageResult<ProvisionResult> {
        validate_slug("tenant", tenant)?;
        validate_slug("category", category)?;
        let category_path = StoragePath::root().join(tenant)?.join(category)?;
        let mut result = ProvisionResult::new(tenant);

        if !self.backend.directory_exists(category_path.as_str()).await? {
            tracing::info!(
                tenant = %tenant,
                category = %category,
                "No category folder, nothing to repair"
            );
            return Ok(result.finish());
        }

        let orders = self
            .backend
            .list_directories(category_path.as_str())
            .await?;

        for order in orders.iter().filter(|name| !subfolders.contains(name)) {
            let mut created = Vec::new();
            let outcome = self
                .create_branch(&category_path, order, subfolders, &mut created)
                .await;
            result.record(
                &format!("{}/{}", category, order),
                join_display(&category_path, order),
                created,
                outcome,
            );
        }

        Ok(result.finish())
    }

    async fn create_branch(
        &self,
        parent: &StoragePath,
        name: &str,
        subfolders: &[String],
        created: &mut Vec<String>,
    ) -> Result<(), (String, StorageError)> {
        let base = parent
            .join(name)
            .map_err(|e| (join_display(parent, name), e))?;
        self.create(&base).await?;

        for subfolder in subfolders {
            let path = base
                .join(subfolder)
                .map_err(|e| (join_display(&base, subfolder), e))?;
            self.create(&path).await?;
            created.push(subfolder.clone());
        }

        Ok(())
    }

    async fn create(&self, path: &StoragePath) -> Result<(), (String, StorageError)> {
        match self.backend.create_directory(path.as_str()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err((
                path.to_string(),
                StorageError::BackendError(format!("{} was not created", path)),
            )),
            Err(e) => Err((path.to_string(), e)),
        }
    }
}

fn join_display(parent: &StoragePath, name: &str) -> String {
    if parent.is_root() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StorageKind;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Directory-only backend that refuses anything under `fail_under`.
    #[derive(Default)]
    struct FolderSet {
        dirs: Mutex<BTreeSet<String>>,
        creates: Mutex<Vec<String>>,
        fail_under: Option<String>,
    }

    impl FolderSet {
        fn failing_under(prefix: &str) -> Self {
            Self {
                fail_under: Some(prefix.to_string()),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl StorageBackend for FolderSet {
        fn kind(&self) -> StorageKind {
            StorageKind::Local
        }

        async fn create_directory(&self, path: &str) -> StorageResult<bool> {
            let path = StoragePath::parse(path)?;
            if let Some(prefix) = &self.fail_under {
                if path.as_str().starts_with(prefix.as_str()) {
                    return Err(StorageError::PermissionDenied(path.to_string()));
                }
            }
            self.creates.lock().unwrap().push(path.to_string());
            let mut dirs = self.dirs.lock().unwrap();
            for ancestor in path.ancestors() {
                dirs.insert(ancestor.to_string());
            }
            Ok(true)
        }

        async fn directory_exists(&self, path: &str) -> StorageResult<bool> {
            Ok(self.dirs.lock().unwrap().contains(path))
        }

        async fn list_directories(&self, path: &str) -> StorageResult<Vec<String>> {
            let prefix = format!("{}/", path);
            Ok(self
                .dirs
                .lock()
                .unwrap()
                .iter()
                .filter_map(|dir| dir.strip_prefix(&prefix))
                .filter(|rest| !rest.contains('/'))
                .map(str::to_string)
                .collect())
        }

        async fn upload_object(&self, _data: Bytes, dest: &str) -> StorageResult<String> {
            Ok(dest.to_string())
        }

        async fn download_object(&self, src: &str) -> StorageResult<Bytes> {
            Err(StorageError::NotFound(src.to_string()))
        }

        async fn object_exists(&self, _path: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn delete_object(&self, _path: &str) -> StorageResult<bool> {
            Ok(false)
        }

        fn get_public_url(&self, path: &str) -> StorageResult<String> {
            Ok(path.to_string())
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_provision_creates_every_branch() {
        let backend = FolderSet::default();
        let result = backend
            .provision_hierarchy(
                "acme",
                &strings(&["portraits", "diplomas"]),
                &strings(&["Image", "QR", "nft_markers", "nft_cache"]),
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.categories_provisioned, 2);
        assert!(result.failed_paths.is_empty());
        assert_eq!(backend.creates.lock().unwrap().len(), 10);
        assert_eq!(
            result.hierarchy["portraits"].subfolders,
            strings(&["Image", "QR", "nft_markers", "nft_cache"])
        );
        assert_eq!(result.hierarchy["diplomas"].base_path, "acme/diplomas");
    }

    #[tokio::test]
    async fn test_failing_category_does_not_stop_siblings() {
        let backend = FolderSet::failing_under("acme/bad");
        let result = HierarchyProvisioner::new(&backend)
            .provision("acme", &strings(&["bad", "good"]), &strings(&["Image"]))
            .await
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.categories_provisioned, 2);
        assert_eq!(result.failed_paths.len(), 1);
        assert_eq!(result.failed_paths[0].category, "bad");
        assert_eq!(result.failed_paths[0].path, "acme/bad");
        assert!(!result.hierarchy["bad"].success);
        assert!(result.hierarchy["bad"].error.is_some());
        assert!(result.hierarchy["good"].success);
        assert!(backend.directory_exists("acme/good/Image").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_tenant_aborts_invalid_category_does_not() {
        let backend = FolderSet::default();
        let provisioner = HierarchyProvisioner::new(&backend);

        let err = provisioner
            .provision("../acme", &strings(&["portraits"]), &[])
            .await;
        assert!(matches!(err, Err(StorageError::InvalidPath(_))));

        let result = provisioner
            .provision("acme", &strings(&["a/b", "portraits"]), &[])
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_paths[0].category, "a/b");
        assert!(result.hierarchy["portraits"].success);
    }

    #[tokio::test]
    async fn test_provision_order_keys_by_category_and_order() {
        let backend = FolderSet::default();
        let result = HierarchyProvisioner::new(&backend)
            .provision_order("acme", "portraits", "order-17", &strings(&["Image", "QR"]))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(
            result.hierarchy["portraits/order-17"].base_path,
            "acme/portraits/order-17"
        );
        assert!(backend
            .directory_exists("acme/portraits/order-17/QR")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_repair_orders_fills_missing_subfolders() {
        let backend = FolderSet::default();
        let subfolders = strings(&["Image", "QR"]);
        backend
            .provision_hierarchy("acme", &strings(&["portraits"]), &subfolders)
            .await
            .unwrap();
        backend
            .create_directory("acme/portraits/order-1/Image")
            .await
            .unwrap();
        backend.create_directory("acme/portraits/order-2").await.unwrap();

        let result = HierarchyProvisioner::new(&backend)
            .repair_orders("acme", "portraits", &subfolders)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.categories_provisioned, 2);
        assert!(!result.hierarchy.contains_key("portraits/Image"));
        assert!(backend
            .directory_exists("acme/portraits/order-1/QR")
            .await
            .unwrap());
        assert!(backend
            .directory_exists("acme/portraits/order-2/Image")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_repair_orders_missing_category_is_noop() {
        let backend = FolderSet::default();
        let result = HierarchyProvisioner::new(&backend)
            .repair_orders("acme", "portraits", &strings(&["Image"]))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.categories_provisioned, 0);
        assert!(backend.creates.lock().unwrap().is_empty());
    }

    #[test]
    fn test_result_serializes_without_empty_error() {
        let mut result = ProvisionResult::new("acme");
        result.record("portraits", "acme/portraits".to_string(), Vec::new(), Ok(()));
        let json = serde_json::to_value(result.finish()).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["categories_provisioned"], 1);
        assert!(json["hierarchy"]["portraits"].get("error").is_none());
        assert_eq!(json["failed_paths"], serde_json::json!([]));
    }
}
