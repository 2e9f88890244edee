//! Isolated on-disk workspaces for agent sessions.
//!
//! Each session gets a fresh empty directory so runs cannot contaminate one
//! another. Names embed a UTC timestamp plus a short random id so collisions
//! across concurrent runs are effectively impossible and leftovers are easy
//! to date.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rand::{Rng, distributions::Alphanumeric};
use tracing::{debug, warn};

/// An isolated workspace directory for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub path: PathBuf,
}

impl Workspace {
    /// Create a fresh workspace under `base` named `{prefix}_{ts}_{id}`.
    pub fn allocate(base: &Path, prefix: &str) -> Result<Self> {
        let name = format!("{prefix}_{}_{}", generate_timestamp(), generate_short_id());
        let path = base.join(name);
        fs::create_dir_all(&path)
            .with_context(|| format!("create workspace dir: {}", path.display()))?;
        debug!(path = %path.display(), "workspace allocated");
        Ok(Self { path })
    }

    /// Adopt an existing directory as the workspace, creating it if missing.
    pub fn adopt(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path)
            .with_context(|| format!("create workspace dir: {}", path.display()))?;
        Ok(Self { path })
    }

    /// Remove the workspace tree. Best effort: a failed removal is logged
    /// and reported, never panicked on, since removal runs during cleanup.
    pub fn remove(&self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.path)
            .with_context(|| format!("remove workspace dir: {}", self.path.display()))
    }

    /// Remove and swallow the error with a warning. Used on cleanup paths
    /// where an earlier error must stay the reported one.
    pub fn remove_best_effort(&self) {
        if let Err(err) = self.remove() {
            warn!(err = %err, path = %self.path.display(), "workspace removal failed");
        }
    }
}

fn generate_timestamp() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}

fn generate_short_id() -> String {
    let mut rng = rand::thread_rng();
    std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase()
}
