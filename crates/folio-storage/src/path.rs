//! Backend-agnostic relative storage paths.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::traits::{StorageError, StorageResult};

/// A validated relative path such as `acme/portraits/order-17/QR`.
///
/// Never starts with `/`, never contains `..`, has no empty interior segments.
/// A trailing `/` is accepted and stripped. The empty path is the backend root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoragePath(String);

impl StoragePath {
    pub fn parse(raw: &str) -> StorageResult<Self> {
        if raw.starts_with('/') {
            return Err(StorageError::InvalidPath(format!(
                "path must be relative: {}",
                raw
            )));
        }
        if raw.contains("..") {
            return Err(StorageError::InvalidPath(format!(
                "path must not contain '..': {}",
                raw
            )));
        }
        if raw.contains('\\') {
            return Err(StorageError::InvalidPath(format!(
                "path must use '/' separators: {}",
                raw
            )));
        }

        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        if trimmed.split('/').any(|segment| segment.is_empty() || segment == ".") {
            return Err(StorageError::InvalidPath(format!(
                "path contains an empty segment: {}",
                raw
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn root() -> Self {
        Self(String::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// First segment, which is the tenant for tenant-scoped paths.
    pub fn first_segment(&self) -> Option<&str> {
        self.segments().next()
    }

    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    pub fn parent(&self) -> Option<StoragePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => Some(Self::root()),
        }
    }

    /// Append a single segment.
    pub fn join(&self, segment: &str) -> StorageResult<StoragePath> {
        validate_slug("segment", segment)?;
        if self.is_root() {
            Ok(Self(segment.to_string()))
        } else {
            Ok(Self(format!("{}/{}", self.0, segment)))
        }
    }

    /// Every non-root prefix, shortest first: `a`, `a/b`, `a/b/c`.
    pub fn ancestors(&self) -> Vec<StoragePath> {
        let mut prefixes = Vec::new();
        let mut current = String::new();
        for segment in self.segments() {
            if !current.is_empty() {
                current.push('/');
            }
            current.push_str(segment);
            prefixes.push(Self(current.clone()));
        }
        prefixes
    }
}

impl Display for StoragePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

/// Validate a single path segment (tenant, category, order or subfolder name).
pub fn validate_slug(kind: &str, value: &str) -> StorageResult<()> {
    if value.trim().is_empty() {
        return Err(StorageError::InvalidPath(format!("{} must not be empty", kind)));
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") || value == "." {
        return Err(StorageError::InvalidPath(format!(
            "{} is not a single path segment: {}",
            kind, value
        )));
    }
    Ok(())
}
