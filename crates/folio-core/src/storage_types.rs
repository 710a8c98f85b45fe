use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Storage backend types
///
/// This enum defines the available storage backend types.
/// It's defined in core because it's used in tenant configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    Local,
    ObjectStore,
    CloudDrive,
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "local" | "local_disk" => Ok(StorageKind::Local),
            "object_store" | "s3" => Ok(StorageKind::ObjectStore),
            "cloud_drive" | "drive" => Ok(StorageKind::CloudDrive),
            _ => Err(anyhow::anyhow!("Invalid storage type: {}", s)),
        }
    }
}

impl Display for StorageKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageKind::Local => write!(f, "local"),
            StorageKind::ObjectStore => write!(f, "object_store"),
            StorageKind::CloudDrive => write!(f, "cloud_drive"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("s3".parse::<StorageKind>().unwrap(), StorageKind::ObjectStore);
        assert_eq!("Cloud-Drive".parse::<StorageKind>().unwrap(), StorageKind::CloudDrive);
        assert_eq!("local".parse::<StorageKind>().unwrap(), StorageKind::Local);
        assert!("nfs".parse::<StorageKind>().is_err());
    }

    #[test]
    fn test_display_matches_serde_name() {
        let json = serde_json::to_string(&StorageKind::ObjectStore).unwrap();
        assert_eq!(json, format!("\"{}\"", StorageKind::ObjectStore));
    }
}
