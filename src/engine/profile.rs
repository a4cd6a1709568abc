//! Per-engine Chrome profile directories
//!
//! Every launched engine gets its own UUID-named user data directory so that
//! concurrent instances never contend on `SingletonLock`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix for every profile directory this crate creates
pub const PROFILE_PREFIX: &str = "kodegen_screenshot";

/// RAII wrapper for a Chrome profile directory
///
/// The directory is removed when the profile is dropped.
#[derive(Debug)]
pub struct BrowserProfile {
    path: PathBuf,
}

impl BrowserProfile {
    /// Create a unique profile directory under `parent`
    ///
    /// Uses `create_dir` rather than `create_dir_all` so a UUID collision
    /// fails instead of sharing a directory.
    pub fn create_in(parent: &Path, prefix: &str) -> Result<Self> {
        let path = parent.join(format!("{}_{}", prefix, Uuid::new_v4()));

        std::fs::create_dir(&path)
            .with_context(|| format!("Failed to create profile directory: {}", path.display()))?;

        debug!("Created Chrome profile directory: {}", path.display());
        Ok(Self { path })
    }

    /// Create a unique profile directory in the system temp dir
    pub fn create(prefix: &str) -> Result<Self> {
        Self::create_in(&std::env::temp_dir(), prefix)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BrowserProfile {
    fn drop(&mut self) {
        if self.path.exists() {
            debug!("Removing Chrome profile directory: {}", self.path.display());
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(
                    "Failed to clean up profile directory {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_directory_is_unique_and_removed_on_drop() {
        let parent = tempfile::tempdir().expect("tempdir");

        let first = BrowserProfile::create_in(parent.path(), PROFILE_PREFIX).expect("first");
        let second = BrowserProfile::create_in(parent.path(), PROFILE_PREFIX).expect("second");

        assert_ne!(first.path(), second.path());
        assert!(first.path().exists());
        assert!(
            first
                .path()
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(PROFILE_PREFIX))
        );

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists(), "profile should be removed on drop");
        assert!(second.path().exists());
    }
}
