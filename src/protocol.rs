//! Study protocol document access
//!
//! The protocol is free text consumed by the policy oracle. It is re-read on
//! every access so an edit takes effect on the next query; nothing here
//! caches.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Demo governance document written on first run when no protocol exists yet.
pub const DEMO_PROTOCOL: &str = "\
# Study Protocol DEMO-101: Data Governance Rules

1. Subject-level identifiers (USUBJID) must never be returned to an analyst.
   Queries selecting, filtering on, or otherwise exposing individual subject
   identifiers are prohibited.
2. Results must be aggregate in nature. Row-level listings of individual
   subjects are prohibited; counts, averages, and other summaries grouped by
   site, sex, race, or enrollment period are permitted.
3. Any group in a reported breakdown must contain at least five subjects.
4. The dataset is read-only. Statements that insert, update, delete, or alter
   data or schema are prohibited.
5. Enrollment dates may be reported at month granularity or coarser.
";

/// Read-only handle on the study protocol document.
#[derive(Debug, Clone)]
pub struct ProtocolStore {
    path: PathBuf,
}

impl ProtocolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the protocol document. Always hits the filesystem.
    pub async fn load(&self) -> Result<String> {
        Ok(tokio::fs::read_to_string(&self.path).await?)
    }

    /// Write the demo protocol if no document exists yet. Returns whether a
    /// file was written.
    pub async fn ensure_demo(&self) -> Result<bool> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, DEMO_PROTOCOL).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_reads_fresh_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("protocol.md");
        let store = ProtocolStore::new(&path);

        tokio::fs::write(&path, "no identifiers").await.unwrap();
        assert_eq!(store.load().await.unwrap(), "no identifiers");

        // An edit is visible on the next read, no caching
        tokio::fs::write(&path, "no identifiers, no row listings")
            .await
            .unwrap();
        assert_eq!(
            store.load().await.unwrap(),
            "no identifiers, no row listings"
        );
    }

    #[tokio::test]
    async fn test_load_missing_file_errors() {
        let store = ProtocolStore::new("/nonexistent/protocol.md");
        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn test_ensure_demo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("governance").join("protocol.md");
        let store = ProtocolStore::new(&path);

        assert!(store.ensure_demo().await.unwrap());
        assert!(store.load().await.unwrap().contains("USUBJID"));

        // Second call leaves an existing document alone
        assert!(!store.ensure_demo().await.unwrap());
    }
}
