use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch directory owned by one dubbing job. Removed on drop unless kept.
#[derive(Debug)]
pub struct JobWorkspace {
    dir: TempDir,
    clips_dir: PathBuf,
}

impl JobWorkspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("dubber-")
            .tempdir()
            .context("Failed to create job workspace")?;
        let clips_dir = dir.path().join("clips");
        fs::create_dir_all(&clips_dir).with_context(|| {
            format!("Failed to create clip directory {}", clips_dir.display())
        })?;
        Ok(Self { dir, clips_dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn clips_dir(&self) -> &Path {
        &self.clips_dir
    }

    pub fn background_path(&self) -> PathBuf {
        self.root().join("background.wav")
    }

    pub fn artifact_path(&self, name: &str, extension: &str) -> PathBuf {
        self.root().join(format!("{name}.{extension}"))
    }

    /// Stop the directory from being deleted and return where it lives.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}
