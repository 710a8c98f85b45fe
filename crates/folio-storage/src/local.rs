use crate::path::StoragePath;
use crate::traits::{StorageBackend, StorageError, StorageResult};
use crate::transfer::DestinationLocks;
use crate::StorageKind;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

/// Local filesystem storage implementation
pub struct LocalDiskBackend {
    root: PathBuf,
    public_base_url: String,
    writes: DestinationLocks,
}

impl LocalDiskBackend {
    /// Create a new LocalDiskBackend instance
    ///
    /// # Arguments
    /// * `root` - Root directory for file storage (e.g., "/var/lib/folio/media")
    /// * `public_base_url` - Base URL for serving files (e.g., "http://localhost:4000/media")
    pub async fn new(root: impl Into<PathBuf>, public_base_url: String) -> StorageResult<Self> {
        let root = root.into();

        fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(LocalDiskBackend {
            root,
            public_base_url,
            writes: DestinationLocks::default(),
        })
    }

    /// Convert a storage path to a filesystem path, refusing anything that resolves
    /// outside the root (e.g. through a symlink).
    fn resolve(&self, path: &StoragePath) -> StorageResult<PathBuf> {
        let target = self.root.join(path.as_str());

        if let Ok(canonical) = target.canonicalize() {
            let root_canonical = self.root.canonicalize().map_err(|e| {
                StorageError::ConfigError(format!("Failed to canonicalize root path: {}", e))
            })?;
            if canonical.strip_prefix(&root_canonical).is_err() {
                return Err(StorageError::InvalidPath(format!(
                    "{} resolves outside the storage root",
                    path
                )));
            }
        }

        Ok(target)
    }

    fn generate_url(&self, path: &StoragePath) -> String {
        format!("{}/{}", self.public_base_url.trim_end_matches('/'), path)
    }

    async fn write_atomically(&self, target: &std::path::Path, data: &[u8]) -> io::Result<()> {
        let file_name = target
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let temp = target.with_file_name(format!(".{}.{}.part", file_name, Uuid::new_v4()));

        let result = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await?;
            fs::rename(&temp, target).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp).await;
        }
        result
    }
}

fn map_io_error(err: io::Error, path: &StoragePath) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
        ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
        _ => StorageError::IoError(err),
    }
}

#[async_trait]
impl StorageBackend for LocalDiskBackend {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn create_directory(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        let target = self.resolve(&path)?;

        let existed = fs::metadata(&target)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if existed {
            tracing::debug!(path = %path, "Local directory already present");
            return Ok(true);
        }

        fs::create_dir_all(&target).await.map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
            ErrorKind::AlreadyExists | ErrorKind::NotADirectory => StorageError::BackendError(
                format!("{} exists and is not a directory", path),
            ),
            _ => StorageError::IoError(e),
        })?;

        tracing::info!(
            path = %target.display(),
            key = %path,
            "Local directory created"
        );

        Ok(true)
    }

    async fn directory_exists(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        let target = self.resolve(&path)?;
        match fs::metadata(&target).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Ok(false)
            }
            Err(e) => Err(map_io_error(e, &path)),
        }
    }

    async fn list_directories(&self, path: &str) -> StorageResult<Vec<String>> {
        let path = StoragePath::parse(path)?;
        let target = self.resolve(&path)?;

        let mut reader = match fs::read_dir(&target).await {
            Ok(reader) => reader,
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(map_io_error(e, &path)),
        };

        let mut names = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn upload_object(&self, data: Bytes, dest: &str) -> StorageResult<String> {
        let path = StoragePath::parse(dest)?;
        if path.is_root() {
            return Err(StorageError::InvalidPath("upload destination is empty".to_string()));
        }
        let target = self.resolve(&path)?;
        let size = data.len();

        let _write = self.writes.lock(path.as_str()).await;
        let start = std::time::Instant::now();

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await.map_err(|e| map_io_error(e, &path))?;
        }

        self.write_atomically(&target, &data).await.map_err(|e| {
            tracing::error!(
                error = %e,
                path = %target.display(),
                key = %path,
                size_bytes = size,
                "Local storage upload failed"
            );
            match e.kind() {
                ErrorKind::PermissionDenied => StorageError::PermissionDenied(path.to_string()),
                _ => StorageError::UploadFailed(format!(
                    "Failed to write file {}: {}",
                    target.display(),
                    e
                )),
            }
        })?;

        let url = self.generate_url(&path);

        tracing::info!(
            path = %target.display(),
            key = %path,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage upload successful"
        );

        Ok(url)
    }

    async fn download_object(&self, src: &str) -> StorageResult<Bytes> {
        let path = StoragePath::parse(src)?;
        let target = self.resolve(&path)?;
        let start = std::time::Instant::now();

        let data = fs::read(&target).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => map_io_error(e, &path),
            _ => StorageError::DownloadFailed(format!(
                "Failed to read file {}: {}",
                target.display(),
                e
            )),
        })?;

        tracing::info!(
            path = %target.display(),
            key = %path,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage download successful"
        );

        Ok(Bytes::from(data))
    }

    async fn object_exists(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        let target = self.resolve(&path)?;
        match fs::metadata(&target).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                Ok(false)
            }
            Err(e) => Err(map_io_error(e, &path)),
        }
    }

    async fn delete_object(&self, path: &str) -> StorageResult<bool> {
        let path = StoragePath::parse(path)?;
        let target = self.resolve(&path)?;
        let start = std::time::Instant::now();

        match fs::remove_file(&target).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                return Err(StorageError::PermissionDenied(path.to_string()))
            }
            Err(e) => {
                return Err(StorageError::DeleteFailed(format!(
                    "Failed to delete file {}: {}",
                    target.display(),
                    e
                )))
            }
        }

        tracing::info!(
            path = %target.display(),
            key = %path,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage delete successful"
        );

        Ok(true)
    }

    fn get_public_url(&self, path: &str) -> StorageResult<String> {
        let path = StoragePath::parse(path)?;
        Ok(self.generate_url(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn backend(dir: &std::path::Path) -> LocalDiskBackend {
        LocalDiskBackend::new(dir, "http://localhost:4000/media".to_string())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_directory_builds_parents() {
        let dir = tempdir().unwrap();
        let storage = backend(dir.path()).await;

        assert!(storage.create_directory("acme/portraits").await.unwrap());

        assert!(dir.path().join("acme").is_dir());
        assert!(dir.path().join("acme/portraits").is_dir());
        assert_eq!(
            storage.list_directories("acme").await.unwrap(),
            vec!["portraits".to_string()]
        );
    }

    #[tokio::test]
    async fn test_create_directory_is_idempotent() {
        let dir = tempdir().unwrap();
        let storage = backend(dir.path()).await;

        assert!(storage.create_directory("acme/portraits").await.unwrap());
        assert!(storage.create_directory("acme/portraits").await.unwrap());
        assert_eq!(
            storage.list_directories("acme").await.unwrap(),
            vec!["portraits".to_string()]
        );
    }

    #[tokio::test]
    async fn test_list_directories_excludes_files_and_missing() {
        let dir = tempdir().unwrap();
        let storage = backend(dir.path()).await;

        storage.create_directory("acme/portraits/order-2").await.unwrap();
        storage.create_directory("acme/portraits/order-1").await.unwrap();
        storage
            .upload_object(Bytes::from_static(b"qr"), "acme/portraits/code.png")
            .await
            .unwrap();

        assert_eq!(
            storage.list_directories("acme/portraits").await.unwrap(),
            vec!["order-1".to_string(), "order-2".to_string()]
        );
        assert!(storage.list_directories("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_download_delete() {
        let dir = tempdir().unwrap();
        let storage = backend(dir.path()).await;
        let data = Bytes::from_static(b"portrait bytes");

        let url = storage
            .upload_object(data.clone(), "acme/portraits/order-1/Image/face.jpg")
            .await
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:4000/media/acme/portraits/order-1/Image/face.jpg"
        );

        let downloaded = storage
            .download_object("acme/portraits/order-1/Image/face.jpg")
            .await
            .unwrap();
        assert_eq!(downloaded, data);
        assert!(storage
            .object_exists("acme/portraits/order-1/Image/face.jpg")
            .await
            .unwrap());

        assert!(storage
            .delete_object("acme/portraits/order-1/Image/face.jpg")
            .await
            .unwrap());
        assert!(!storage
            .delete_object("acme/portraits/order-1/Image/face.jpg")
            .await
            .unwrap());
        assert!(matches!(
            storage.download_object("acme/portraits/order-1/Image/face.jpg").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_uploads_to_same_destination() {
        let dir = tempdir().unwrap();
        let storage = backend(dir.path()).await;
        let first = Bytes::from(vec![1u8; 256 * 1024]);
        let second = Bytes::from(vec![2u8; 256 * 1024]);

        let (a, b) = tokio::join!(
            storage.upload_object(first.clone(), "acme/portraits/face.jpg"),
            storage.upload_object(second.clone(), "acme/portraits/face.jpg"),
        );
        a.unwrap();
        b.unwrap();

        let downloaded = storage.download_object("acme/portraits/face.jpg").await.unwrap();
        assert!(downloaded == first || downloaded == second);

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("acme/portraits"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("face.jpg")]);
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let dir = tempdir().unwrap();
        let storage = backend(dir.path()).await;

        let result = storage.download_object("../../../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));

        let result = storage.delete_object("../etc/passwd").await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));

        let result = storage.directory_exists("/etc").await;
        assert!(matches!(result, Err(StorageError::InvalidPath(_))));

        assert!(matches!(
            storage.get_public_url("acme/../secret"),
            Err(StorageError::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn test_file_in_the_way_is_not_already_exists() {
        let dir = tempdir().unwrap();
        let storage = backend(dir.path()).await;
        storage
            .upload_object(Bytes::from_static(b"x"), "acme/diplomas")
            .await
            .unwrap();

        let result = storage.create_directory("acme/diplomas/Image").await;
        assert!(result.is_err());
        assert!(!storage.directory_exists("acme/diplomas").await.unwrap());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_permission_denied_is_distinguished() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let storage = backend(dir.path()).await;
        storage.create_directory("acme").await.unwrap();

        let locked = dir.path().join("acme");
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        // Root ignores permission bits; nothing to assert in that environment.
        if std::fs::create_dir(locked.join("canary")).is_ok() {
            std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let result = storage.create_directory("acme/portraits").await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
        assert!(matches!(result, Err(StorageError::PermissionDenied(_))));
    }
}
