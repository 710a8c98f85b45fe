//! Operator tooling for Folio storage.
//!
//! Both binaries read `StorageSettings` from the environment (`.env` honoured) and the
//! tenant table from `STORAGE_TENANTS_FILE`.

use std::str::FromStr;

use anyhow::Context;
use folio_core::{StorageKind, StorageSettings};
use folio_storage::StorageRouter;

/// Initialize tracing for CLI binaries.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Build a router from the process environment.
pub fn router_from_env() -> anyhow::Result<StorageRouter> {
    let settings = StorageSettings::from_env().context("Failed to load storage settings")?;
    if settings.tenants.is_empty() {
        tracing::warn!("No tenants configured; set STORAGE_TENANTS_FILE");
    }
    Ok(StorageRouter::new(settings))
}

/// Fail unless the resolved backend is of the kind named by `--storage-type`.
pub fn ensure_storage_kind(expected: Option<&str>, actual: StorageKind) -> anyhow::Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let expected = StorageKind::from_str(expected)?;
    if expected != actual {
        anyhow::bail!(
            "Tenant backend is {}, but --storage-type asked for {}",
            actual,
            expected
        );
    }
    Ok(())
}

/// Render names as an indented tree listing under `root`.
pub fn format_listing(root: &str, names: &[String]) -> String {
    let mut out = format!("{}/\n", root.trim_end_matches('/'));
    if names.is_empty() {
        out.push_str("  (no folders)\n");
    }
    for name in names {
        out.push_str("  ");
        out.push_str(name);
        out.push_str("/\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_listing_with_entries() {
        let names = vec!["diplomas".to_string(), "portraits".to_string()];
        assert_eq!(
            format_listing("acme/", &names),
            "acme/\n  diplomas/\n  portraits/\n"
        );
    }

    #[test]
    fn storage_kind_check() {
        assert!(ensure_storage_kind(None, StorageKind::Local).is_ok());
        assert!(ensure_storage_kind(Some("local"), StorageKind::Local).is_ok());
        assert!(ensure_storage_kind(Some("s3"), StorageKind::ObjectStore).is_ok());

        let err = ensure_storage_kind(Some("cloud-drive"), StorageKind::Local).unwrap_err();
        assert!(err.to_string().contains("cloud_drive"));
        assert!(ensure_storage_kind(Some("nfs"), StorageKind::Local).is_err());
    }

    #[test]
    fn format_listing_empty() {
        assert_eq!(format_listing("acme", &[]), "acme/\n  (no folders)\n");
    }
}
