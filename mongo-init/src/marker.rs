//! One-shot completion marker
//!
//! The marker file records that provisioning finished, so a restarted
//! container does not provision again.

use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Check whether a previous run left its marker behind.
///
/// A marker that cannot be inspected counts as absent, so provisioning runs.
pub async fn is_complete(path: &Path) -> bool {
    match fs::try_exists(path).await {
        Ok(exists) => exists,
        Err(e) => {
            warn!(marker = %path.display(), error = %e, "Cannot check completion marker, provisioning anyway");
            false
        }
    }
}

/// Record a completed run, creating parent directories as needed.
pub async fn mark_complete(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, "")
        .await
        .with_context(|| format!("Failed to write bootstrap marker {}", path.display()))
}
