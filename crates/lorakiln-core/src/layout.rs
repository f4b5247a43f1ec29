use crate::error::HandlerResult;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default workspace root, relative to the worker's working directory.
pub const DEFAULT_WORKSPACE_ROOT: &str = "ai-toolkit";

/// Filesystem layout for one job execution.
///
/// All job state lives under a single root: the materialized config, the
/// extracted dataset/control archives, and the trainer's output tree. The
/// layout is constructed fresh per job and torn down by [`cleanup`].
///
/// [`cleanup`]: WorkspaceLayout::cleanup
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.root.join("config")
    }

    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir().join("config.yaml")
    }

    #[must_use]
    pub fn dataset_dir(&self) -> PathBuf {
        self.root.join("dataset")
    }

    #[must_use]
    pub fn control_dir(&self) -> PathBuf {
        self.root.join("control")
    }

    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root.join("output")
    }

    /// Directory the external trainer writes model artifacts into.
    #[must_use]
    pub fn artifact_dir(&self) -> PathBuf {
        self.output_dir().join("lora")
    }

    /// Transient download location for the dataset archive.
    #[must_use]
    pub fn dataset_archive_path(&self) -> PathBuf {
        self.root.join("dataset.zip")
    }

    /// Transient download location for the control archive.
    #[must_use]
    pub fn control_archive_path(&self) -> PathBuf {
        self.root.join("control.zip")
    }

    pub fn ensure_config_dir(&self) -> HandlerResult<()> {
        std::fs::create_dir_all(self.config_dir())?;
        Ok(())
    }

    /// Removes all job state from the workspace.
    ///
    /// Dataset and control trees are deleted outright; the config and output
    /// trees are emptied of files but their directory skeletons are kept so
    /// the external trainer's expectations about its install layout hold.
    /// Idempotent: absent directories and files are not an error.
    pub fn cleanup(&self) -> HandlerResult<()> {
        info!(root = %self.root.display(), "cleaning up workspace");

        remove_files_under(&self.output_dir())?;
        remove_tree(&self.dataset_dir())?;
        remove_tree(&self.control_dir())?;
        remove_files_under(&self.config_dir())?;
        remove_file_if_present(&self.dataset_archive_path())?;
        remove_file_if_present(&self.control_archive_path())?;

        debug!(root = %self.root.display(), "workspace cleaned");
        Ok(())
    }
}

impl Default for WorkspaceLayout {
    fn default() -> Self {
        Self::new(PathBuf::from(DEFAULT_WORKSPACE_ROOT))
    }
}

/// Deletes every file below `dir`, leaving the directory tree in place.
fn remove_files_under(dir: &Path) -> HandlerResult<()> {
    if !dir.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            remove_files_under(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn remove_tree(dir: &Path) -> HandlerResult<()> {
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
    }
    Ok(())
}

fn remove_file_if_present(path: &Path) -> HandlerResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
