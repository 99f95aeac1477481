//! Per-task scratch directory for intermediate segment files.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use vexport_common::config::ScratchConfig;
use vexport_common::error::{ExportError, ExportResult};

/// Created on first use, removed exactly once, never recreated.
#[derive(Debug)]
pub(crate) struct ScratchDir {
    root: PathBuf,
    prefix: String,
    dir: Option<TempDir>,
    location: Option<PathBuf>,
    cleaned: bool,
}

impl ScratchDir {
    pub(crate) fn new(config: &ScratchConfig) -> Self {
        Self {
            root: config.resolved_root(),
            prefix: config.prefix.clone(),
            dir: None,
            location: None,
            cleaned: false,
        }
    }

    /// Path of the scratch directory, creating it if needed.
    pub(crate) fn path(&mut self) -> ExportResult<PathBuf> {
        if self.cleaned {
            return Err(ExportError::scratch("Scratch directory was already removed"));
        }
        if let Some(dir) = &self.dir {
            return Ok(dir.path().to_path_buf());
        }

        std::fs::create_dir_all(&self.root).map_err(|e| {
            ExportError::scratch(format!(
                "Failed to create scratch root {}: {e}",
                self.root.display()
            ))
        })?;
        let dir = tempfile::Builder::new()
            .prefix(&self.prefix)
            .tempdir_in(&self.root)
            .map_err(|e| {
                ExportError::scratch(format!(
                    "Failed to create scratch directory in {}: {e}",
                    self.root.display()
                ))
            })?;
        let path = dir.path().to_path_buf();
        tracing::debug!(path = %path.display(), "Created scratch directory");
        self.location = Some(path.clone());
        self.dir = Some(dir);
        Ok(path)
    }

    /// Where the directory lives (or lived), if it was ever created.
    pub(crate) fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    /// Remove the directory and everything in it. Only the first call does
    /// anything; errors are logged and swallowed.
    pub(crate) fn cleanup(&mut self) -> bool {
        if self.cleaned {
            return false;
        }
        self.cleaned = true;
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed scratch directory"),
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "Failed to remove scratch directory")
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(root: &Path) -> ScratchConfig {
        ScratchConfig {
            root: Some(root.to_path_buf()),
            prefix: "export-video-cache-".to_string(),
        }
    }

    #[test]
    fn test_created_lazily() {
        let root = tempfile::tempdir().unwrap();
        let mut scratch = ScratchDir::new(&config(root.path()));
        assert!(scratch.location().is_none());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        let path = scratch.path().unwrap();
        assert!(path.is_dir());
        assert!(path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("export-video-cache-"));
        assert_eq!(scratch.path().unwrap(), path);
    }

    #[test]
    fn test_cleanup_runs_once_and_blocks_recreation() {
        let root = tempfile::tempdir().unwrap();
        let mut scratch = ScratchDir::new(&config(root.path()));
        let path = scratch.path().unwrap();
        std::fs::write(path.join("part_0.mp4"), b"data").unwrap();

        assert!(scratch.cleanup());
        assert!(!path.exists());
        assert!(!scratch.cleanup());
        assert!(scratch.path().is_err());
        assert_eq!(scratch.location(), Some(path.as_path()));
    }

    #[test]
    fn test_cleanup_without_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut scratch = ScratchDir::new(&config(root.path()));
        assert!(scratch.cleanup());
        assert!(scratch.location().is_none());
    }

    #[test]
    fn test_missing_root_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        let mut scratch = ScratchDir::new(&config(&nested));
        assert!(scratch.path().unwrap().starts_with(&nested));
    }
}
