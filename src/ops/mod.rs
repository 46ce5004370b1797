//! The engine's operations, one module per command.
//!
//! Each operation takes an [`OpContext`] — layout, settings, lock manager —
//! and returns a typed outcome. Nothing here prints; rendering belongs to
//! the binary.

use std::path::Path;

use crate::config::WmConfig;
use crate::error::WmError;
use crate::fsio::lock::LockManager;
use crate::project::ProjectLayout;

pub mod backups;
pub mod doctor;
pub mod install;
pub mod recover;
pub mod status;
pub mod update;

/// Everything an operation needs, built once per invocation.
pub struct OpContext {
    /// Path arithmetic for the project.
    pub layout: ProjectLayout,
    /// Settings from `.wm/config.toml` (defaults when absent).
    pub config: WmConfig,
    /// Lock acquisition handle; owns the lock metrics.
    pub locks: LockManager,
}

impl OpContext {
    /// Build a context for the project at `root`.
    ///
    /// # Errors
    /// Fails if `.wm/config.toml` exists but cannot be parsed.
    pub fn new(root: &Path) -> Result<Self, WmError> {
        let layout = ProjectLayout::new(root);
        let config = WmConfig::load(&layout.config_path())?;
        Ok(Self {
            layout,
            config,
            locks: LockManager::new(),
        })
    }
}
