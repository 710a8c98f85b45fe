//! Cloud drive backend over a Graph-style HTTP API.
//!
//! Items are addressed by path (`{api}/root:/{path}`). Folder creation uses
//! `conflictBehavior = fail` so that 201 and 409 both mean "the folder is there".
//! Uploads above the chunk size go through an upload session; the session URL is
//! pre-authorized, so chunk PUTs carry no bearer token.

use crate::cache::{CacheTrust, DirectoryExistenceCache};
use crate::path::StoragePath;
use crate::traits::{StorageBackend, StorageError, StorageResult};
use crate::transfer::{ChunkedTransferEngine, TransferChunk, TransferSettings};
use crate::StorageKind;
use async_trait::async_trait;
use bytes::Bytes;
use folio_core::{CloudDriveConfig, StorageSettings};
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DriveItem {
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    folder: Option<serde_json::Value>,
}

impl DriveItem {
    fn is_folder(&self) -> bool {
        self.folder.is_some()
    }
}

#[derive(Debug, Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadSession {
    upload_url: String,
}

pub struct CloudDriveBackend {
    http_client: Client,
    api_base: String,
    root_folder: StoragePath,
    access_token: String,
    public_base_url: String,
    cache: DirectoryExistenceCache,
    engine: ChunkedTransferEngine,
}

impl Debug for CloudDriveBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CloudDriveBackend")
            .field("api_base", &self.api_base)
            .field("root_folder", &self.root_folder)
            .finish()
    }
}

impl CloudDriveBackend {
    /// Build a backend, reading the bearer token from the environment variable named
    /// by `config.access_token_env`.
    pub fn new(config: &CloudDriveConfig, settings: &StorageSettings) -> StorageResult<Self> {
        let token = std::env::var(&config.access_token_env).map_err(|_| {
            StorageError::ConfigError(format!(
                "{} is not set; cloud drive access token unavailable",
                config.access_token_env
            ))
        })?;
        Self::with_token(config, settings, token)
    }

    pub fn with_token(
        config: &CloudDriveConfig,
        settings: &StorageSettings,
        access_token: String,
    ) -> StorageResult<Self> {
        let root_folder = StoragePath::parse(config.root_folder.as_deref().unwrap_or(""))?;

        let http_client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| {
                StorageError::ConfigError(format!("Failed to create HTTP client for cloud drive: {}", e))
            })?;

        Ok(Self {
            http_client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            root_folder,
            access_token,
            public_base_url: config.public_base_url.clone(),
            cache: DirectoryExistenceCache::from_settings(settings),
            engine: ChunkedTransferEngine::new(TransferSettings::from_settings(settings)),
        })
    }

    pub fn engine(&self) -> &ChunkedTransferEngine {
        &self.engine
    }

    /// Existence check with an explicit cache policy.
    ///
    /// With [`CacheTrust::Trusted`] a cached `false` is returned without a remote call.
    pub async fn directory_exists_with(&self, path: &str, trust: CacheTrust) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        let remote = self.remote_path(&path);
        if remote.is_root() {
            return Ok(true);
        }

        if let Some(exists) = self.cache.lookup(remote.as_str(), trust) {
            return Ok(exists);
        }

        let exists = self
            .fetch_item(&remote)
            .await?
            .is_some_and(|item| item.is_folder());
        self.cache.set(remote.as_str(), exists);
        Ok(exists)
    }

    /// Path on the drive, below the configured root folder.
    fn remote_path(&self, path: &StoragePath) -> StoragePath {
        match (self.root_folder.is_root(), path.is_root()) {
            (true, _) => path.clone(),
            (false, true) => self.root_folder.clone(),
            (false, false) => StoragePath::parse(&format!("{}/{}", self.root_folder, path))
                .unwrap_or_else(|_| path.clone()),
        }
    }

    fn encode(path: &StoragePath) -> String {
        path.segments()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn item_url(&self, remote: &StoragePath) -> String {
        if remote.is_root() {
            format!("{}/root", self.api_base)
        } else {
            format!("{}/root:/{}", self.api_base, Self::encode(remote))
        }
    }

    fn item_action_url(&self, remote: &StoragePath, action: &str) -> String {
        if remote.is_root() {
            format!("{}/root/{}", self.api_base, action)
        } else {
            format!("{}/root:/{}:/{}", self.api_base, Self::encode(remote), action)
        }
    }

    fn generate_url(&self, path: &StoragePath) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.bearer_auth(&self.access_token)
    }

    async fn fetch_item(&self, remote: &StoragePath) -> StorageResult<Option<DriveItem>> {
        let response = self
            .authorized(self.http_client.get(self.item_url(remote)))
            .send()
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<DriveItem>()
                .await
                .map(Some)
                .map_err(|e| StorageError::BackendError(format!("Invalid item metadata: {}", e))),
            _ => Err(status_error(response, remote.as_str(), StorageError::BackendError).await),
        }
    }

    /// Create a single folder whose parent already exists. 201 and 409 are both success.
    async fn create_folder(&self, remote: &StoragePath) -> StorageResult<()> {
        let (parent, name) = match (remote.parent(), remote.file_name()) {
            (Some(parent), Some(name)) => (parent, name),
            _ => return Ok(()),
        };

        let body = json!({
            "name": name,
            "folder": {},
            "@microsoft.graph.conflictBehavior": "fail"
        });

        let start = std::time::Instant::now();
        let response = self
            .authorized(self.http_client.post(self.item_action_url(&parent, "children")))
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::BackendError(e.to_string()))?;

        match response.status() {
            StatusCode::CREATED => {
                tracing::info!(
                    key = %remote,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Cloud drive folder created"
                );
                Ok(())
            }
            StatusCode::CONFLICT => {
                tracing::debug!(key = %remote, "Cloud drive folder already exists");
                Ok(())
            }
            _ => {
                let err = status_error(response, remote.as_str(), StorageError::BackendError).await;
                tracing::error!(error = %err, key = %remote, "Cloud drive folder creation failed");
                Err(err)
            }
        }
    }

    async fn upload_small(&self, remote: &StoragePath, data: Bytes) -> StorageResult<()> {
        let url = self.item_action_url(remote, "content");
        let url = url.as_str();
        let key = remote.as_str();

        self.engine
            .single(key, data.len() as u64, || {
                let request = self
                    .authorized(self.http_client.put(url))
                    .body(data.clone());
                async move {
                    let response = request
                        .send()
                        .await
                        .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
                    if response.status().is_success() {
                        Ok(())
                    } else {
                        Err(status_error(response, key, StorageError::UploadFailed).await)
                    }
                }
            })
            .await
    }

    async fn upload_session(&self, remote: &StoragePath, data: Bytes) -> StorageResult<()> {
        let key = remote.as_str();
        let response = self
            .authorized(
                self.http_client
                    .post(self.item_action_url(remote, "createUploadSession")),
            )
            .json(&json!({ "item": { "@microsoft.graph.conflictBehavior": "replace" } }))
            .send()
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(status_error(response, key, StorageError::UploadFailed).await);
        }

        let session: UploadSession = response
            .json()
            .await
            .map_err(|e| StorageError::UploadFailed(format!("Invalid upload session: {}", e)))?;

        let client = &self.http_client;
        let upload_url = session.upload_url.as_str();

        self.engine
            .upload(key, data, move |chunk: TransferChunk| async move {
                let response = client
                    .put(upload_url)
                    .header(CONTENT_RANGE, chunk.content_range())
                    .body(chunk.data)
                    .send()
                    .await
                    .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
                if response.status().is_success() {
                    Ok(())
                } else {
                    Err(status_error(response, key, StorageError::UploadFailed).await)
                }
            })
            .await
            .map(|_| ())
    }

    async fn download_content(&self, remote: &StoragePath, size: u64) -> StorageResult<Bytes> {
        let url = self.item_action_url(remote, "content");
        let url = url.as_str();
        let key = remote.as_str();

        if !self.engine.requires_chunking(size) {
            return self
                .engine
                .single(key, size, || {
                    let request = self.authorized(self.http_client.get(url));
                    async move { read_body(request, key).await }
                })
                .await;
        }

        self.engine
            .download(key, size, |range| {
                let request = self
                    .authorized(self.http_client.get(url))
                    .header(RANGE, range.range_header());
                async move { read_body(request, key).await }
            })
            .await
    }
}

async fn read_body(request: RequestBuilder, key: &str) -> StorageResult<Bytes> {
    let response = request
        .send()
        .await
        .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
    if !response.status().is_success() {
        return Err(status_error(response, key, StorageError::DownloadFailed).await);
    }
    response
        .bytes()
        .await
        .map_err(|e| StorageError::DownloadFailed(e.to_string()))
}

async fn status_error(
    response: Response,
    key: &str,
    otherwise: fn(String) -> StorageError,
) -> StorageError {
    let status = response.status();
    match status {
        StatusCode::NOT_FOUND => StorageError::NotFound(key.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            StorageError::PermissionDenied(key.to_string())
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            otherwise(format!("{} returned {}: {}", key, status, body))
        }
    }
}

#[async_trait]
impl StorageBackend for CloudDriveBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::CloudDrive
    }

    async fn create_directory(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        let remote = self.remote_path(&path);

        for ancestor in remote.ancestors() {
            if self
                .cache
                .lookup(ancestor.as_str(), CacheTrust::PositiveOnly)
                .is_some()
            {
                continue;
            }
            self.create_folder(&ancestor).await?;
            self.cache.set(ancestor.as_str(), true);
        }

        Ok(true)
    }

    async fn directory_exists(&self, path: &str) -> StorageResult<bool> {
        self.directory_exists_with(path, CacheTrust::PositiveOnly)
            .await
    }

    async fn list_directories(&self, path: &str) -> StorageResult<Vec<String>> {
        let path = StoragePath::parse(path)?;
        let remote = self.remote_path(&path);

        let mut names = Vec::new();
        let mut next = Some(self.item_action_url(&remote, "children"));

        while let Some(url) = next.take() {
            let response = self
                .authorized(self.http_client.get(&url))
                .send()
                .await
                .map_err(|e| StorageError::BackendError(e.to_string()))?;

            match response.status() {
                StatusCode::NOT_FOUND => return Ok(Vec::new()),
                status if status.is_success() => {}
                _ => {
                    return Err(
                        status_error(response, remote.as_str(), StorageError::BackendError).await,
                    )
                }
            }

            let page: ChildrenPage = response
                .json()
                .await
                .map_err(|e| StorageError::BackendError(format!("Invalid children listing: {}", e)))?;

            for item in page.value.into_iter().filter(DriveItem::is_folder) {
                if let Ok(child) = remote.join(&item.name) {
                    self.cache.set(child.as_str(), true);
                }
                names.push(item.name);
            }
            next = page.next_link;
        }

        names.sort();
        Ok(names)
    }

    async fn upload_object(&self, data: Bytes, dest: &str) -> StorageResult<String> {
        let path = StoragePath::parse(dest)?;
        if path.is_root() {
            return Err(StorageError::InvalidPath("upload destination is empty".to_string()));
        }
        let remote = self.remote_path(&path);
        let size = data.len() as u64;

        let _write = self.engine.lock_destination(remote.as_str()).await;
        let start = std::time::Instant::now();

        let result = if self.engine.requires_chunking(size) {
            self.upload_session(&remote, data).await
        } else {
            self.upload_small(&remote, data).await
        };

        result.map_err(|e| {
            tracing::error!(
                error = %e,
                key = %remote,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "Cloud drive upload failed"
            );
            e
        })?;

        tracing::info!(
            key = %remote,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Cloud drive upload successful"
        );

        Ok(self.generate_url(&path))
    }

    async fn download_object(&self, src: &str) -> StorageResult<Bytes> {
        let path = StoragePath::parse(src)?;
        let remote = self.remote_path(&path);
        let start = std::time::Instant::now();

        let item = match self.fetch_item(&remote).await? {
            Some(item) if !item.is_folder() => item,
            _ => return Err(StorageError::NotFound(path.to_string())),
        };

        let bytes = self
            .download_content(&remote, item.size)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    key = %remote,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Cloud drive download failed"
                );
                e
            })?;

        tracing::info!(
            key = %remote,
            size_bytes = bytes.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Cloud drive download successful"
        );

        Ok(bytes)
    }

    async fn object_exists(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        let remote = self.remote_path(&path);
        Ok(self
            .fetch_item(&remote)
            .await?
            .is_some_and(|item| !item.is_folder()))
    }

    async fn delete_object(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        if path.is_root() {
            return Err(StorageError::InvalidPath("cannot delete the drive root".to_string()));
        }
        let remote = self.remote_path(&path);
        let start = std::time::Instant::now();

        let response = self
            .authorized(self.http_client.delete(self.item_url(&remote)))
            .send()
            .await
            .map_err(|e| StorageError::DeleteFailed(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => {
                self.cache.remove(remote.as_str());
                tracing::info!(
                    key = %remote,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Cloud drive delete successful"
                );
                Ok(true)
            }
            _ => {
                let err = status_error(response, remote.as_str(), StorageError::DeleteFailed).await;
                tracing::error!(error = %err, key = %remote, "Cloud drive delete failed");
                Err(err)
            }
        }
    }

    fn get_public_url(&self, path: &str) -> StorageResult<String> {
        let path = StoragePath::parse(path)?;
        Ok(self.generate_url(&path))
    }

    fn directory_cache(&self) -> Option<&DirectoryExistenceCache> {
        Some(&self.cache)
    }

    async fn close(&self) {
        self.cache.clear();
        tracing::debug!(api_base = %self.api_base, "Cloud drive session closed");
    }
}
