use crate::cache::{CacheTrust, DirectoryExistenceCache};
use crate::path::StoragePath;
use crate::traits::{StorageBackend, StorageError, StorageResult};
use crate::transfer::{ChunkedTransferEngine, TransferChunk, TransferSettings};
use crate::StorageKind;
use async_trait::async_trait;
use bytes::Bytes;
use folio_core::constants::DIRECTORY_MARKER;
use folio_core::{ObjectStoreConfig, StorageSettings};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::multipart::MultipartStore;
use object_store::path::Path;
use object_store::Error as ObjectStoreError;
use object_store::{GetOptions, GetRange, ObjectStore, ObjectStoreExt, PutPayload};

const DEFAULT_REGION: &str = "us-east-1";

/// S3-compatible object storage implementation
///
/// Directories are virtual: a directory exists when its zero-byte marker object
/// (`{dir}/.keep`) exists or when anything is stored under its prefix.
pub struct ObjectStoreBackend<S = AmazonS3> {
    store: S,
    bucket: String,
    region: String,
    endpoint_url: Option<String>, // Custom endpoint for S3-compatible providers
    prefix: Option<String>,
    public_base_url: Option<String>,
    cache: DirectoryExistenceCache,
    engine: ChunkedTransferEngine,
}

impl ObjectStoreBackend<AmazonS3> {
    /// Create a new backend talking to S3 or an S3-compatible provider
    ///
    /// Credentials come from the standard `AWS_*` environment variables; bucket, region
    /// and endpoint from `config` (e.g. "http://localhost:9000" for MinIO).
    pub async fn new(config: &ObjectStoreConfig, settings: &StorageSettings) -> StorageResult<Self> {
        let region = config
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(config.bucket.clone());

        if let Some(ref endpoint) = config.endpoint {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(Self::with_store(store, config, settings))
    }
}

impl<S> ObjectStoreBackend<S>
where
    S: ObjectStore + MultipartStore,
{
    /// Wrap an already-built store. Used with `object_store::memory::InMemory` in tests.
    pub fn with_store(store: S, config: &ObjectStoreConfig, settings: &StorageSettings) -> Self {
        let prefix = config
            .prefix
            .as_deref()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Self {
            store,
            bucket: config.bucket.clone(),
            region: config
                .region
                .clone()
                .unwrap_or_else(|| DEFAULT_REGION.to_string()),
            endpoint_url: config.endpoint.clone(),
            prefix,
            public_base_url: config.public_base_url.clone(),
            cache: DirectoryExistenceCache::from_settings(settings),
            engine: ChunkedTransferEngine::new(TransferSettings::from_settings(settings)),
        }
    }

    pub fn engine(&self) -> &ChunkedTransferEngine {
        &self.engine
    }

    /// Object key for a storage path, including the configured prefix
    fn object_key(&self, path: &StoragePath) -> String {
        match (&self.prefix, path.is_root()) {
            (Some(prefix), true) => prefix.clone(),
            (Some(prefix), false) => format!("{}/{}", prefix, path),
            (None, _) => path.to_string(),
        }
    }

    fn marker_location(key: &str) -> Path {
        Path::from(format!("{}/{}", key, DIRECTORY_MARKER))
    }

    /// Generate public URL for an object
    ///
    /// An explicit public base URL wins. Custom endpoints use path-style URLs
    /// ({endpoint}/{bucket}/{key}); AWS uses https://{bucket}.s3.{region}.amazonaws.com/{key}
    fn generate_url(&self, key: &str) -> String {
        if let Some(ref base) = self.public_base_url {
            format!("{}/{}", base.trim_end_matches('/'), key)
        } else if let Some(ref endpoint) = self.endpoint_url {
            let base_url = endpoint.trim_end_matches('/');
            format!("{}/{}/{}", base_url, self.bucket, key)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }

    async fn object_present(&self, location: &Path) -> StorageResult<bool> {
        match ObjectStoreExt::head(&self.store, location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(map_store_error(e, location.as_ref(), StorageError::BackendError)),
        }
    }

    /// Marker object OR non-empty prefix listing, uncached.
    async fn lookup_directory(&self, key: &str) -> StorageResult<bool> {
        if self.object_present(&Self::marker_location(key)).await? {
            return Ok(true);
        }

        let prefix = Path::from(key.to_string());
        let listing = ObjectStore::list_with_delimiter(&self.store, Some(&prefix))
            .await
            .map_err(|e| map_store_error(e, key, StorageError::BackendError))?;

        Ok(!listing.common_prefixes.is_empty() || !listing.objects.is_empty())
    }

    async fn put_single(&self, key: &str, location: &Path, data: Bytes) -> StorageResult<()> {
        let store = &self.store;
        self.engine
            .single(key, data.len() as u64, || {
                let payload = PutPayload::from(data.clone());
                async move {
                    ObjectStoreExt::put(store, location, payload)
                        .await
                        .map(|_| ())
                        .map_err(|e| map_store_error(e, key, StorageError::UploadFailed))
                }
            })
            .await
    }

    /// Multipart upload with one part per engine chunk; part index equals chunk index.
    async fn put_multipart(&self, key: &str, location: &Path, data: Bytes) -> StorageResult<()> {
        let upload_id = MultipartStore::create_multipart(&self.store, location)
            .await
            .map_err(|e| map_store_error(e, key, StorageError::UploadFailed))?;

        let store = &self.store;
        let id = &upload_id;
        let parts = self
            .engine
            .upload(key, data, move |chunk: TransferChunk| async move {
                MultipartStore::put_part(
                    store,
                    location,
                    id,
                    chunk.range.index,
                    PutPayload::from(chunk.data),
                )
                .await
                .map_err(|e| StorageError::UploadFailed(e.to_string()))
            })
            .await;

        let parts = match parts {
            Ok(parts) => parts,
            Err(e) => {
                if let Err(abort_err) =
                    MultipartStore::abort_multipart(&self.store, location, &upload_id).await
                {
                    tracing::warn!(
                        error = %abort_err,
                        key = %key,
                        "Failed to abort multipart upload"
                    );
                }
                return Err(e);
            }
        };

        MultipartStore::complete_multipart(&self.store, location, &upload_id, parts)
            .await
            .map(|_| ())
            .map_err(|e| map_store_error(e, key, StorageError::UploadFailed))
    }

    async fn get_whole(&self, key: &str, location: &Path, size: u64) -> StorageResult<Bytes> {
        let store = &self.store;
        self.engine
            .single(key, size, || async move {
                let result = ObjectStoreExt::get(store, location)
                    .await
                    .map_err(|e| map_store_error(e, key, StorageError::DownloadFailed))?;
                result
                    .bytes()
                    .await
                    .map_err(|e| StorageError::DownloadFailed(e.to_string()))
            })
            .await
    }

    async fn get_ranged(&self, key: &str, location: &Path, size: u64) -> StorageResult<Bytes> {
        let store = &self.store;
        self.engine
            .download(key, size, move |range| async move {
                let options = GetOptions {
                    range: Some(GetRange::Bounded(range.as_range())),
                    ..Default::default()
                };
                let result = ObjectStore::get_opts(store, location, options)
                    .await
                    .map_err(|e| map_store_error(e, key, StorageError::DownloadFailed))?;
                result
                    .bytes()
                    .await
                    .map_err(|e| StorageError::DownloadFailed(e.to_string()))
            })
            .await
    }
}

fn map_store_error(
    err: ObjectStoreError,
    key: &str,
    otherwise: fn(String) -> StorageError,
) -> StorageError {
    match err {
        ObjectStoreError::NotFound { .. } => StorageError::NotFound(key.to_string()),
        ObjectStoreError::PermissionDenied { .. } | ObjectStoreError::Unauthenticated { .. } => {
            StorageError::PermissionDenied(key.to_string())
        }
        other => otherwise(other.to_string()),
    }
}

#[async_trait]
impl<S> StorageBackend for ObjectStoreBackend<S>
where
    S: ObjectStore + MultipartStore,
{
    fn kind(&self) -> StorageKind {
        StorageKind::ObjectStore
    }

    async fn create_directory(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;

        for ancestor in path.ancestors() {
            let key = self.object_key(&ancestor);
            if self.cache.lookup(&key, CacheTrust::PositiveOnly).is_some() {
                continue;
            }
            if !self.lookup_directory(&key).await? {
                let start = std::time::Instant::now();
                ObjectStoreExt::put(
                    &self.store,
                    &Self::marker_location(&key),
                    PutPayload::from(Bytes::new()),
                )
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        bucket = %self.bucket,
                        key = %key,
                        "Object store directory marker write failed"
                    );
                    map_store_error(e, &key, StorageError::BackendError)
                })?;

                tracing::info!(
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object store directory marker created"
                );
            }
            self.cache.set(&key, true);
        }

        Ok(true)
    }

    async fn directory_exists(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        if path.is_root() {
            return Ok(true);
        }
        let key = self.object_key(&path);

        if let Some(exists) = self.cache.lookup(&key, CacheTrust::PositiveOnly) {
            return Ok(exists);
        }

        let exists = self.lookup_directory(&key).await?;
        self.cache.set(&key, exists);
        Ok(exists)
    }

    async fn list_directories(&self, path: &str) -> StorageResult<Vec<String>> {
        let path = StoragePath::parse(path)?;
        let key = self.object_key(&path);
        let prefix = (!key.is_empty()).then(|| Path::from(key.clone()));

        let listing = ObjectStore::list_with_delimiter(&self.store, prefix.as_ref())
            .await
            .map_err(|e| match e {
                ObjectStoreError::NotFound { .. } => None,
                other => Some(map_store_error(other, &key, StorageError::BackendError)),
            });

        let listing = match listing {
            Ok(listing) => listing,
            Err(None) => return Ok(Vec::new()),
            Err(Some(e)) => return Err(e),
        };

        let mut names: Vec<String> = listing
            .common_prefixes
            .iter()
            .filter_map(|p| p.filename().map(str::to_string))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn upload_object(&self, data: Bytes, dest: &str) -> StorageResult<String> {
        let path = StoragePath::parse(dest)?;
        if path.is_root() {
            return Err(StorageError::InvalidPath("upload destination is empty".to_string()));
        }
        let key = self.object_key(&path);
        let location = Path::from(key.clone());
        let size = data.len() as u64;

        let _write = self.engine.lock_destination(&key).await;
        let start = std::time::Instant::now();

        let result = if self.engine.requires_chunking(size) {
            self.put_multipart(&key, &location, data).await
        } else {
            self.put_single(&key, &location, data).await
        };

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object store upload failed"
            );
            e
        })?;

        let url = self.generate_url(&key);

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object store upload successful"
        );

        Ok(url)
    }

    async fn download_object(&self, src: &str) -> StorageResult<Bytes> {
        let path = StoragePath::parse(src)?;
        let key = self.object_key(&path);
        let location = Path::from(key.clone());
        let start = std::time::Instant::now();

        let meta = ObjectStoreExt::head(&self.store, &location)
            .await
            .map_err(|e| map_store_error(e, &key, StorageError::DownloadFailed))?;
        let size = meta.size as u64;

        let bytes = if self.engine.requires_chunking(size) {
            self.get_ranged(&key, &location, size).await
        } else {
            self.get_whole(&key, &location, size).await
        }
        .map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %key,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Object store download failed"
            );
            e
        })?;

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = bytes.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object store download successful"
        );

        Ok(bytes)
    }

    async fn object_exists(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        let location = Path::from(self.object_key(&path));
        self.object_present(&location).await
    }

    async fn delete_object(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        let key = self.object_key(&path);
        let location = Path::from(key.clone());
        let start = std::time::Instant::now();

        // S3 deletes succeed for missing keys; check first to report absence.
        if !self.object_present(&location).await? {
            return Ok(false);
        }

        ObjectStoreExt::delete(&self.store, &location)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %key,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Object store delete failed"
                );
                map_store_error(e, &key, StorageError::DeleteFailed)
            })?;
        self.cache.remove(&key);

        tracing::info!(
            bucket = %self.bucket,
            key = %key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Object store delete successful"
        );

        Ok(true)
    }

    fn get_public_url(&self, path: &str) -> StorageResult<String> {
        let path = StoragePath::parse(path)?;
        Ok(self.generate_url(&self.object_key(&path)))
    }

    fn directory_cache(&self) -> Option<&DirectoryExistenceCache> {
        Some(&self.cache)
    }

    async fn close(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    fn config() -> ObjectStoreConfig {
        ObjectStoreConfig {
            bucket: "folio-media".to_string(),
            region: Some("eu-west-1".to_string()),
            endpoint: None,
            prefix: None,
            public_base_url: None,
        }
    }

    fn backend_with(settings: StorageSettings) -> ObjectStoreBackend<InMemory> {
        ObjectStoreBackend::with_store(InMemory::new(), &config(), &settings)
    }

    fn backend() -> ObjectStoreBackend<InMemory> {
        backend_with(StorageSettings::default())
    }

    #[tokio::test]
    async fn test_create_directory_writes_markers_for_ancestors() {
        let storage = backend();
        assert!(storage.create_directory("acme/portraits").await.unwrap());
        assert!(storage.create_directory("acme/portraits").await.unwrap());

        assert!(storage.object_exists("acme/.keep").await.unwrap());
        assert!(storage.object_exists("acme/portraits/.keep").await.unwrap());
        assert_eq!(
            storage.list_directories("acme").await.unwrap(),
            vec!["portraits".to_string()]
        );
        assert_eq!(
            storage.list_directories("").await.unwrap(),
            vec!["acme".to_string()]
        );
    }

    #[tokio::test]
    async fn test_directory_exists_by_marker_or_prefix() {
        let storage = backend();
        storage
            .upload_object(Bytes::from_static(b"png"), "acme/qr/code.png")
            .await
            .unwrap();
        storage.create_directory("acme/empty").await.unwrap();

        assert!(storage.directory_exists("acme/qr").await.unwrap());
        assert!(storage.directory_exists("acme/empty").await.unwrap());
        assert!(!storage.directory_exists("acme/missing").await.unwrap());
        assert!(storage.list_directories("acme/missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_positive_existence_is_cached() {
        let storage = backend();
        storage.create_directory("acme/portraits").await.unwrap();
        assert_eq!(storage.cache.get("acme/portraits"), Some(true));

        // Out-of-band removal is invisible until the cache is flushed.
        ObjectStoreExt::delete(&storage.store, &Path::from("acme/portraits/.keep"))
            .await
            .unwrap();
        assert!(storage.directory_exists("acme/portraits").await.unwrap());

        storage.cache.clear();
        assert!(!storage.directory_exists("acme/portraits").await.unwrap());
    }

    #[tokio::test]
    async fn test_chunked_upload_and_ranged_download() {
        let storage = backend_with(StorageSettings {
            chunk_size: 4,
            upload_concurrency: 2,
            ..StorageSettings::default()
        });
        let data = Bytes::from_static(b"0123456789abcdefghij!");

        let url = storage
            .upload_object(data.clone(), "acme/portraits/order-1/Image/face.jpg")
            .await
            .unwrap();
        assert_eq!(
            url,
            "https://folio-media.s3.eu-west-1.amazonaws.com/acme/portraits/order-1/Image/face.jpg"
        );

        let downloaded = storage
            .download_object("acme/portraits/order-1/Image/face.jpg")
            .await
            .unwrap();
        assert_eq!(downloaded, data);
        assert!(storage.engine().stats().peak_in_flight <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_chunked_uploads_to_same_destination() {
        let storage = backend_with(StorageSettings {
            chunk_size: 4,
            upload_concurrency: 2,
            ..StorageSettings::default()
        });
        let first = Bytes::from(vec![b'a'; 21]);
        let second = Bytes::from(vec![b'b'; 21]);

        let (a, b) = tokio::join!(
            storage.upload_object(first.clone(), "acme/portraits/order-1/Image/face.jpg"),
            storage.upload_object(second.clone(), "acme/portraits/order-1/Image/face.jpg"),
        );
        a.unwrap();
        b.unwrap();

        let downloaded = storage
            .download_object("acme/portraits/order-1/Image/face.jpg")
            .await
            .unwrap();
        assert!(downloaded == first || downloaded == second);
        assert!(storage.engine().stats().peak_in_flight <= 2);
    }

    #[tokio::test]
    async fn test_delete_reports_absence() {
        let storage = backend();
        storage
            .upload_object(Bytes::from_static(b"x"), "acme/file.txt")
            .await
            .unwrap();

        assert!(storage.delete_object("acme/file.txt").await.unwrap());
        assert!(!storage.delete_object("acme/file.txt").await.unwrap());
        assert!(matches!(
            storage.download_object("acme/file.txt").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[test]
    fn test_public_url_variants() {
        let settings = StorageSettings::default();

        let mut cfg = config();
        cfg.endpoint = Some("http://localhost:9000/".to_string());
        cfg.prefix = Some("/tenants/".to_string());
        let minio = ObjectStoreBackend::with_store(InMemory::new(), &cfg, &settings);
        assert_eq!(
            minio.get_public_url("acme/a.png").unwrap(),
            "http://localhost:9000/folio-media/tenants/acme/a.png"
        );

        cfg.public_base_url = Some("https://cdn.example.com".to_string());
        let cdn = ObjectStoreBackend::with_store(InMemory::new(), &cfg, &settings);
        assert_eq!(
            cdn.get_public_url("acme/a.png").unwrap(),
            "https://cdn.example.com/tenants/acme/a.png"
        );

        assert!(cdn.get_public_url("../a.png").is_err());
    }
}
